//! The synthesis boundary: the conversion engine only ever talks to a
//! [`Synthesizer`] obtained from a [`ModelLoader`], plus the model catalog
//! that resolves language and override tags into concrete model identifiers.

pub mod tone;

use crate::error::Result;
use crate::text::Language;

/// Raw audio produced for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// One synthesis result: the waveform plus the measured real-time factor
/// (audio seconds produced per wall-clock second).
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub waveform: Waveform,
    pub real_time_factor: f32,
}

/// A loaded text-to-speech capability. Repeated calls within one job must
/// not re-incur model load cost; a configuration change instead invalidates
/// the instance and the engine asks its [`ModelLoader`] for a fresh one.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<Synthesis>;
}

/// The expensive load seam. Implementations may block; the engine only calls
/// this between jobs or before a job's first segment, never mid-segment.
pub trait ModelLoader: Send + Sync {
    fn load(&self, config: &ModelConfig) -> Result<Box<dyn Synthesizer>>;
}

/// Fully resolved model selection for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub language: Language,
    pub sample_rate: u32,
    pub synthesis_tag: String,
    pub vocoder_tag: String,
}

impl ModelConfig {
    /// Resolve the concrete model identifiers for a language and optional
    /// short-form overrides. Overrides are expanded against the language's
    /// corpus, so a sticky override follows a language change.
    pub fn resolve(
        language: Language,
        custom_synthesis: Option<&str>,
        custom_vocoder: Option<&str>,
    ) -> ModelConfig {
        let corpus = corpus(language);
        let synthesis_tag = format!(
            "kan-bayashi/{}_{}",
            corpus,
            custom_synthesis.unwrap_or("conformer_fastspeech2")
        );
        let vocoder_tag = match custom_vocoder {
            Some(tag) => full_vocoder_tag(tag, language),
            None => match language {
                Language::English => "ljspeech_parallel_wavegan.v3".to_string(),
                Language::Mandarin => "csmsc_parallel_wavegan.v1".to_string(),
            },
        };
        ModelConfig {
            language,
            sample_rate: sample_rate(language),
            synthesis_tag,
            vocoder_tag,
        }
    }

    /// Whether switching from `self` to `next` requires a model reload.
    /// Only an actual change in a resolved tag forces the expensive reload.
    pub fn reload_needed(&self, next: &ModelConfig) -> bool {
        self.synthesis_tag != next.synthesis_tag || self.vocoder_tag != next.vocoder_tag
    }
}

pub fn sample_rate(language: Language) -> u32 {
    match language {
        Language::English => 22050,
        Language::Mandarin => 24000,
    }
}

fn corpus(language: Language) -> &'static str {
    match language {
        Language::English => "ljspeech",
        Language::Mandarin => "csmsc",
    }
}

/// Expand a short vocoder name into its published full tag. The version
/// suffix depends on the corpus, and csmsc never shipped a full-band melgan
/// build, so that name maps to the multi-band one.
fn full_vocoder_tag(tag: &str, language: Language) -> String {
    match language {
        Language::English => {
            let version = if tag.contains("wavegan") { "v3" } else { "v2" };
            format!("ljspeech_{}.{}", tag, version)
        }
        Language::Mandarin => {
            if tag.contains("wavegan") {
                format!("csmsc_{}.v1", tag)
            } else {
                let tag = if tag == "full_band_melgan" {
                    "multi_band_melgan"
                } else {
                    tag
                };
                format!("csmsc_{}.v2", tag)
            }
        }
    }
}
