//! Text acquisition from files. Plain UTF-8 files are read directly;
//! everything else is handed to the external `ebook-convert` tool whose
//! UTF-8 text output we read back. The tool's internals are opaque here.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::{ConvertError, Result};

pub const EXTERNAL_CONVERTER: &str = "ebook-convert";
pub const EXTERNAL_CONVERTER_URL: &str = "https://calibre-ebook.com/download";

/// Whether the external converter is installed (PATH probe).
pub fn external_converter_available() -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(EXTERNAL_CONVERTER).is_file())
}

/// Read a file that is expected to contain UTF-8 text. `Ok(None)` means the
/// file exists but is not valid UTF-8 (so the caller should fall back to the
/// external converter).
pub async fn read_utf8(path: &Path) -> Result<Option<String>> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        ConvertError::Input(format!("cannot read {}: {}", path.display(), err))
    })?;
    Ok(String::from_utf8(bytes).ok())
}

/// Convert a document to text with the external tool and read the result.
pub async fn convert_external(input: &Path, scratch_dir: &Path) -> Result<String> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let output: PathBuf = scratch_dir.join(format!("external_convert_{}.txt", stem));

    info!(
        "converting {} via {}",
        input.display(),
        EXTERNAL_CONVERTER
    );
    let status = tokio::process::Command::new(EXTERNAL_CONVERTER)
        .arg(input)
        .arg(&output)
        .args(["--enable-heuristics", "--unsmarten-punctuation"])
        .status()
        .await
        .map_err(|err| {
            ConvertError::Input(format!("failed to run {}: {}", EXTERNAL_CONVERTER, err))
        })?;
    if !status.success() {
        return Err(ConvertError::Input(format!(
            "{} exited with {} for {}",
            EXTERNAL_CONVERTER,
            status,
            input.display()
        )));
    }

    tokio::fs::read_to_string(&output).await.map_err(|err| {
        ConvertError::Input(format!(
            "cannot read converter output {}: {}",
            output.display(),
            err
        ))
    })
}
