use std::error::Error as StdError;

use thiserror::Error;

/// Errors surfaced by the conversion pipeline. Each variant maps to one
/// failure class the controller can display; none of them is retried
/// automatically.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Empty or unreadable input text. The job aborts before any synthesis.
    #[error("input error: {0}")]
    Input(String),

    /// Model resolution or (re)load failure. The job aborts but the worker
    /// stays alive for a retry with a different configuration.
    #[error("model error: {0}")]
    Model(String),

    /// A segment failed to synthesize. The current job aborts.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// File system failure outside the audio-append fallback path.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Bus-level failure. Publish-with-no-subscriber is not an error (the
    /// message is dropped and logged); this covers closed channels.
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::Input(_) => "Input error",
            ConvertError::Model(_) => "Model error",
            ConvertError::Synthesis(_) => "Synthesis error",
            ConvertError::Io(_) => "IO error",
            ConvertError::Transport(_) => "Transport error",
        }
    }

    /// Render the single status block the controller displays verbatim:
    /// error kind, message, and the full source chain.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("\n[ERROR]\n");
        out.push_str("----------------------------------------\n");
        out.push_str(&format!("{}: {}\n", self.kind(), self));
        let mut source = self.source();
        while let Some(cause) = source {
            out.push_str(&format!("caused by: {}\n", cause));
            source = cause.source();
        }
        out.push_str("----------------------------------------\n");
        out.push_str("[END OF ERROR]\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_contains_kind_and_message() {
        let err = ConvertError::Model("vocoder tag not found".to_string());
        let report = err.report();
        assert!(report.contains("[ERROR]"));
        assert!(report.contains("Model error"));
        assert!(report.contains("vocoder tag not found"));
        assert!(report.contains("[END OF ERROR]"));
    }

    #[test]
    fn io_errors_keep_their_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ConvertError::Io(inner);
        assert_eq!(err.kind(), "IO error");
        assert!(err.report().contains("denied"));
    }
}
