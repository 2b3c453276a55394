//! Persisted controller settings.
//!
//! Load priority (highest to lowest):
//! 1. Command line arguments (handled by clap)
//! 2. Environment variables (NARRO_*)
//! 3. Settings file ($XDG_CONFIG_HOME/narro/settings.json or ~/.config/narro/settings.json)
//! 4. Built-in defaults
//!
//! The file is written back after each conversion start so the next run
//! picks up the last-used selection.

use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Language selection: "auto", "en" or "zh".
    pub language: String,

    /// Short synthesis model tag, empty for the per-language default.
    pub synthesis_model: String,

    /// Short vocoder tag, empty for the per-language default.
    pub vocoder_model: String,

    /// Directory the output wav/srt/lrc files land in.
    pub output_dir: String,

    /// Base name of the output files.
    pub output_name: String,

    /// Always route input files through the external document converter.
    pub always_external_converter: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            synthesis_model: String::new(),
            vocoder_model: String::new(),
            output_dir: ".".to_string(),
            output_name: "out".to_string(),
            always_external_converter: false,
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> PathBuf {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg).join("narro");
            }
        }
        dirs::home_dir()
            .map(|home| home.join(".config"))
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("narro")
    }

    pub fn settings_path() -> PathBuf {
        Self::config_dir().join("settings.json")
    }

    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let builder = Config::builder()
            .set_default("language", defaults.language)?
            .set_default("synthesis_model", defaults.synthesis_model)?
            .set_default("vocoder_model", defaults.vocoder_model)?
            .set_default("output_dir", defaults.output_dir)?
            .set_default("output_name", defaults.output_name)?
            .set_default("always_external_converter", defaults.always_external_converter)?
            .add_source(
                File::from(Self::settings_path())
                    .format(FileFormat::Json)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("NARRO")
                    .prefix_separator("_")
                    .try_parsing(true),
            );
        builder.build()?.try_deserialize()
    }

    pub fn save(&self) -> std::io::Result<()> {
        let dir = Self::config_dir();
        std::fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::settings_path(), json)
    }

    /// Output directory with `~` and environment variables expanded.
    pub fn expanded_output_dir(&self) -> String {
        shellexpand::full(&self.output_dir)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| self.output_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = AppConfig::default();
        assert_eq!(config.language, "auto");
        assert_eq!(config.output_name, "out");
        assert!(!config.always_external_converter);
    }

    #[test]
    fn settings_round_trip_through_json() {
        let mut config = AppConfig::default();
        config.language = "zh".to_string();
        config.vocoder_model = "multi_band_melgan".to_string();
        let json = serde_json::to_string(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.language, "zh");
        assert_eq!(back.vocoder_model, "multi_band_melgan");
    }
}
