//! Deterministic tone backend. Stands in behind the synthesis boundary so
//! the pipeline, worker and tests run end to end without a neural model:
//! every non-whitespace character becomes a short fixed-length tone whose
//! pitch is derived from the character itself.

use std::f32::consts::TAU;
use std::time::Instant;

use log::info;

use crate::error::{ConvertError, Result};
use crate::synth::{ModelConfig, ModelLoader, Synthesis, Synthesizer, Waveform};

const TONE_SECS: f64 = 0.12;
const GAP_SECS: f64 = 0.03;

pub struct ToneSynthesizer {
    sample_rate: u32,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    fn pitch(ch: char) -> f32 {
        180.0 + (ch as u32 % 24) as f32 * 20.0
    }
}

impl Synthesizer for ToneSynthesizer {
    fn synthesize(&self, text: &str) -> Result<Synthesis> {
        if text.trim().is_empty() {
            return Err(ConvertError::Synthesis(
                "cannot synthesize empty text".to_string(),
            ));
        }
        let started = Instant::now();
        let rate = self.sample_rate as f32;
        let tone_len = (TONE_SECS * self.sample_rate as f64) as usize;
        let gap_len = (GAP_SECS * self.sample_rate as f64) as usize;

        let mut samples = Vec::new();
        for ch in text.chars().filter(|c| !c.is_whitespace()) {
            let freq = Self::pitch(ch);
            for n in 0..tone_len {
                let t = n as f32 / rate;
                // Short fade at both ends keeps chunk joins click-free.
                let envelope = (n.min(tone_len - n) as f32 / (tone_len as f32 * 0.1)).min(1.0);
                samples.push((TAU * freq * t).sin() * 0.2 * envelope);
            }
            samples.extend(std::iter::repeat(0.0).take(gap_len));
        }

        let waveform = Waveform {
            samples,
            sample_rate: self.sample_rate,
        };
        let elapsed = started.elapsed().as_secs_f64().max(1e-9);
        let real_time_factor = (waveform.duration_secs() / elapsed) as f32;
        Ok(Synthesis {
            waveform,
            real_time_factor,
        })
    }
}

/// Loader for the tone backend. Construction is cheap, but it still goes
/// through the loader seam so reload bookkeeping behaves exactly as with a
/// real model.
pub struct ToneLoader;

impl ModelLoader for ToneLoader {
    fn load(&self, config: &ModelConfig) -> Result<Box<dyn Synthesizer>> {
        info!(
            "loading tone backend for {} / {} at {} Hz",
            config.synthesis_tag, config.vocoder_tag, config.sample_rate
        );
        Ok(Box::new(ToneSynthesizer::new(config.sample_rate)))
    }
}
