//! Incremental WAV persistence: file-level append operations plus the
//! single-worker queue that serializes them for one job.

use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ConvertError, Result};

/// File-level audio sink. One job writes one growing mono float WAV file;
/// chunks arrive strictly in segment order via [`AppendQueue`].
pub struct AudioSink;

impl AudioSink {
    fn spec(sample_rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }

    /// Remove any previous output so a new job starts from an empty file.
    pub fn reset(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ConvertError::Io(err)),
        }
    }

    /// Append a chunk, creating the file if it does not exist yet. When the
    /// append fails for any reason the file is rewritten with only the
    /// current chunk: the loss is logged, never silent.
    pub fn write_chunk(path: &Path, samples: &[f32], sample_rate: u32) {
        let result = if path.exists() {
            Self::append(path, samples)
        } else {
            Self::rewrite(path, samples, sample_rate)
        };
        if let Err(err) = result {
            warn!(
                "appending {} samples to {} failed ({}), rewriting with current chunk only",
                samples.len(),
                path.display(),
                err
            );
            if let Err(err) = Self::rewrite(path, samples, sample_rate) {
                error!("rewrite of {} failed: {}", path.display(), err);
            }
        }
    }

    fn append(path: &Path, samples: &[f32]) -> std::result::Result<(), hound::Error> {
        let mut writer = hound::WavWriter::append(path)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()
    }

    fn rewrite(
        path: &Path,
        samples: &[f32],
        sample_rate: u32,
    ) -> std::result::Result<(), hound::Error> {
        let mut writer = hound::WavWriter::create(path, Self::spec(sample_rate))?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()
    }
}

enum SinkJob {
    Chunk { samples: Vec<f32>, sample_rate: u32 },
    Drain(oneshot::Sender<()>),
}

/// Single-worker append queue for one job. `push` is fire-and-forget from the
/// caller's side but the queue preserves submission order, so appends always
/// land in segment order even while the next segment is still synthesizing.
pub struct AppendQueue {
    tx: mpsc::UnboundedSender<SinkJob>,
}

impl AppendQueue {
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    SinkJob::Chunk {
                        samples,
                        sample_rate,
                    } => {
                        debug!("appending {} samples to {}", samples.len(), path.display());
                        AudioSink::write_chunk(&path, &samples, sample_rate);
                    }
                    SinkJob::Drain(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn push(&self, samples: Vec<f32>, sample_rate: u32) {
        let _ = self.tx.send(SinkJob::Chunk {
            samples,
            sample_rate,
        });
    }

    /// Barrier: resolves once every previously pushed chunk has been written.
    pub async fn drain(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(SinkJob::Drain(done_tx))
            .map_err(|_| ConvertError::Transport("append queue is closed".to_string()))?;
        done_rx
            .await
            .map_err(|_| ConvertError::Transport("append queue dropped mid-drain".to_string()))
    }
}
