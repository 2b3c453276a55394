//! Job orchestration: preprocessing, model reload, per-segment synthesis,
//! ordered audio appends, timeline accumulation and subtitle emission.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use tokio::sync::mpsc;

use crate::bus::WorkerEvent;
use crate::document;
use crate::error::{ConvertError, Result};
use crate::sink::{AppendQueue, AudioSink};
use crate::synth::{ModelConfig, ModelLoader, Synthesis, Synthesizer};
use crate::text::{self, Language, SHORT_INPUT_MAX};
use crate::timeline::TimelineAccumulator;

lazy_static! {
    static ref BLANK_RUN_RE: Regex = Regex::new(r"\n(?:[ \t]*\n)+").unwrap();
}

/// Pipeline states for one job. `Failed` is reachable from every non-idle
/// state; nothing in here retries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Preprocessing,
    ShortPath,
    Segmented,
    Finalizing,
    Done,
    Failed,
}

/// One conversion request. Mutable through commands between jobs; a running
/// job never observes changes (the worker loop serializes commands behind
/// the job).
#[derive(Debug, Clone)]
pub struct Job {
    pub text: String,
    pub language: Language,
    pub auto_detect: bool,
    pub out_dir: PathBuf,
    pub out_name: String,
    pub custom_synthesis: Option<String>,
    pub custom_vocoder: Option<String>,
    pub force_external: bool,
}

impl Job {
    pub fn new(out_dir: impl Into<PathBuf>, out_name: impl Into<String>) -> Job {
        Job {
            text: String::new(),
            language: Language::Mandarin,
            auto_detect: true,
            out_dir: out_dir.into(),
            out_name: out_name.into(),
            custom_synthesis: None,
            custom_vocoder: None,
            force_external: false,
        }
    }

    pub fn wav_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.wav", self.out_name))
    }

    pub fn srt_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.srt", self.out_name))
    }

    pub fn lrc_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.lrc", self.out_name))
    }
}

/// Outbound status channel. The engine pushes events here; a separate task
/// forwards them to the bus publisher, so emitting never blocks the
/// pipeline.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSender {
    pub fn new() -> (EventSender, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, rx)
    }

    pub fn emit(&self, event: WorkerEvent) {
        let _ = self.tx.send(event);
    }

    /// Log locally and mirror the line to the controller.
    pub fn status(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        info!("{}", msg);
        self.emit(WorkerEvent::Log(format!("{}\n", msg)));
    }
}

pub struct ConversionEngine {
    job: Job,
    config: ModelConfig,
    model: Option<Box<dyn Synthesizer>>,
    loader: Box<dyn ModelLoader>,
    reload_needed: bool,
    state: EngineState,
    events: EventSender,
}

impl ConversionEngine {
    pub fn new(job: Job, loader: Box<dyn ModelLoader>, events: EventSender) -> ConversionEngine {
        let config = ModelConfig::resolve(
            job.language,
            job.custom_synthesis.as_deref(),
            job.custom_vocoder.as_deref(),
        );
        ConversionEngine {
            job,
            config,
            model: None,
            loader,
            reload_needed: true,
            state: EngineState::Idle,
            events,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn set_text(&mut self, text: String) {
        self.job.text = text;
    }

    /// Acquire job text from a file, mirroring it back over the bus on
    /// success. Non-UTF-8 files go through the external converter; if that
    /// is missing the controller gets a download prompt instead.
    pub async fn set_text_from_file(&mut self, path: &Path) {
        let text = if self.job.force_external {
            self.convert_via_external(path).await
        } else {
            match document::read_utf8(path).await {
                Ok(Some(text)) => Some(text),
                Ok(None) => self.convert_via_external(path).await,
                Err(err) => {
                    self.events.status(err.report());
                    None
                }
            }
        };
        match text {
            Some(text) if !text.trim().is_empty() => {
                self.events.emit(WorkerEvent::FileContent(text.clone()));
                self.job.text = text;
            }
            Some(_) => self.events.status(format!(
                "[ERROR] couldn't get any text from file {}, make sure it's valid and supported by the external converter",
                path.display()
            )),
            None => {}
        }
    }

    async fn convert_via_external(&self, path: &Path) -> Option<String> {
        if !document::external_converter_available() {
            self.events.emit(WorkerEvent::DownloadPrompt(format!(
                "Converting this type of file needs the external document converter, download it at {}",
                document::EXTERNAL_CONVERTER_URL
            )));
            return None;
        }
        self.events.status("Converting file via external converter...");
        match document::convert_external(path, &self.job.out_dir).await {
            Ok(text) => Some(text),
            Err(err) => {
                self.events.status(err.report());
                None
            }
        }
    }

    pub fn set_auto_detect(&mut self) {
        self.job.auto_detect = true;
    }

    pub fn set_language(&mut self, language: Language) {
        self.job.auto_detect = false;
        if self.job.language != language {
            self.job.language = language;
            self.reconfigure();
        }
    }

    /// Override the synthesis model. An empty tag clears the override;
    /// otherwise it is sticky until cleared, including across language
    /// changes (it re-resolves against the new language's corpus).
    pub fn set_custom_synthesis(&mut self, tag: &str) {
        self.job.custom_synthesis = non_empty(tag);
        self.reconfigure();
        self.report_model_selection();
    }

    pub fn set_custom_vocoder(&mut self, tag: &str) {
        self.job.custom_vocoder = non_empty(tag);
        self.reconfigure();
        self.report_model_selection();
    }

    fn report_model_selection(&self) {
        self.events.status(format!(
            "Custom model set: {} {} (reload needed: {})",
            self.config.synthesis_tag, self.config.vocoder_tag, self.reload_needed
        ));
    }

    pub fn set_output_name(&mut self, name: &str) {
        if !name.is_empty() {
            self.job.out_name = name.to_string();
        }
    }

    pub fn set_output_dir(&mut self, dir: &str) {
        if !dir.is_empty() {
            self.job.out_dir = PathBuf::from(dir);
        }
    }

    pub fn set_force_external(&mut self, on: bool) {
        self.job.force_external = on;
    }

    /// Re-resolve the model configuration and mark a reload only when a
    /// resolved tag actually changed.
    fn reconfigure(&mut self) {
        let next = ModelConfig::resolve(
            self.job.language,
            self.job.custom_synthesis.as_deref(),
            self.job.custom_vocoder.as_deref(),
        );
        if self.config.reload_needed(&next) {
            self.reload_needed = true;
        }
        self.config = next;
    }

    fn detect_language(&mut self, sample: &str) {
        self.events.status("Detecting language...");
        let detected = text::detect_language(sample);
        self.events.status(detected.display_name());
        if self.job.language != detected {
            self.job.language = detected;
            self.reconfigure();
        }
    }

    fn load_model(&mut self) -> Result<()> {
        self.events.status(format!(
            "Loading models: {} + {}...",
            self.config.synthesis_tag, self.config.vocoder_tag
        ));
        let model = self.loader.load(&self.config).map_err(|err| match err {
            err @ ConvertError::Model(_) => err,
            other => ConvertError::Model(other.to_string()),
        })?;
        self.model = Some(model);
        self.reload_needed = false;
        self.events.status("Model setup completed.");
        Ok(())
    }

    fn preprocess(&mut self) -> Result<String> {
        self.state = EngineState::Preprocessing;
        let text = normalize_whitespace(&self.job.text);
        if text.is_empty() {
            return Err(ConvertError::Input("input is empty/invalid".to_string()));
        }
        if self.job.auto_detect {
            self.detect_language(&text);
        }
        self.events
            .status(format!("Got text (characters: {})", text.chars().count()));
        Ok(text)
    }

    /// Run the configured job to completion. Errors never propagate out of
    /// here: any failure moves the job to `Failed` and surfaces as a single
    /// formatted status event. Nothing is retried.
    pub async fn run(&mut self) {
        match self.convert().await {
            Ok(path) => {
                self.events.emit(WorkerEvent::ConversionDone(
                    path.to_string_lossy().into_owned(),
                ));
                self.events
                    .status(format!("Conversion done! Saved at {}", path.display()));
            }
            Err(err) => {
                self.state = EngineState::Failed;
                self.events.status(err.report());
            }
        }
    }

    async fn convert(&mut self) -> Result<PathBuf> {
        let text = self.preprocess()?;
        // The reload is expensive and must finish before any synthesis;
        // it never happens mid-segment.
        if self.reload_needed || self.model.is_none() {
            self.load_model()?;
        }

        std::fs::create_dir_all(&self.job.out_dir)?;
        let wav_path = self.job.wav_path();
        AudioSink::reset(&wav_path)?;
        let queue = AppendQueue::spawn(wav_path.clone());
        let sample_rate = self.config.sample_rate;

        if text.chars().count() <= SHORT_INPUT_MAX {
            self.state = EngineState::ShortPath;
            let segment = text::segment(&text, self.job.language)
                .into_iter()
                .next()
                .ok_or_else(|| ConvertError::Input("input is empty/invalid".to_string()))?;
            let synthesis = self.synthesize(&segment.spoken)?;
            queue.push(synthesis.waveform.samples, sample_rate);
            queue.drain().await?;
        } else {
            self.state = EngineState::Segmented;
            let segments = text::segment(&text, self.job.language);
            let total = segments.len();
            let mut timeline = TimelineAccumulator::new();
            for (i, segment) in segments.iter().enumerate() {
                let index = i + 1;
                self.events.status(format!(
                    "Converting part {} out of {}: {}",
                    index,
                    total,
                    preview(&segment.display)
                ));
                let synthesis = self.synthesize(&segment.spoken)?;
                let duration = synthesis.waveform.duration_secs();
                // Hand the waveform off; the queue writes it while the next
                // segment synthesizes, in strict submission order.
                queue.push(synthesis.waveform.samples, sample_rate);
                timeline.record(index, &segment.display, duration);
            }
            queue.drain().await?;
            self.state = EngineState::Finalizing;
            self.events.status("Generating subtitles/lyrics file...");
            write_atomic(&self.job.srt_path(), &timeline.render_srt())?;
            write_atomic(&self.job.lrc_path(), &timeline.render_lrc())?;
        }

        self.state = EngineState::Done;
        Ok(absolute(&wav_path))
    }

    fn synthesize(&self, text: &str) -> Result<Synthesis> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ConvertError::Model("no model loaded".to_string()))?;
        let synthesis = model.synthesize(text)?;
        self.events
            .status(format!("Speed: {:.5}x", synthesis.real_time_factor));
        Ok(synthesis)
    }
}

fn non_empty(tag: &str) -> Option<String> {
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_string())
    }
}

fn preview(text: &str) -> String {
    let count = text.chars().count();
    if count < 30 {
        text.to_string()
    } else {
        let head: String = text.chars().take(30).collect();
        format!("{}... ({})", head, count)
    }
}

/// Trim and collapse runs of blank lines down to a single blank line.
fn normalize_whitespace(text: &str) -> String {
    let trimmed = text.trim();
    BLANK_RUN_RE.replace_all(trimmed, "\n\n").to_string()
}

/// Whole-file write: the content lands under a temporary name and is
/// renamed into place, so readers never observe a partial file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::synth::Waveform;

    struct ScriptedSynth {
        sample_rate: u32,
        durations: Arc<Mutex<VecDeque<usize>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Synthesizer for ScriptedSynth {
        fn synthesize(&self, text: &str) -> Result<Synthesis> {
            if text.trim().is_empty() {
                return Err(ConvertError::Synthesis("empty text".to_string()));
            }
            let samples = self
                .durations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(4800);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Synthesis {
                waveform: Waveform {
                    samples: vec![(call + 1) as f32 * 0.1; samples],
                    sample_rate: self.sample_rate,
                },
                real_time_factor: 1.0,
            })
        }
    }

    struct ScriptedLoader {
        durations: Arc<Mutex<VecDeque<usize>>>,
        loads: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedLoader {
        fn new(durations: Vec<usize>) -> ScriptedLoader {
            ScriptedLoader {
                durations: Arc::new(Mutex::new(durations.into())),
                loads: Arc::new(AtomicUsize::new(0)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct OwnedLoader(Arc<ScriptedLoader>);

    impl ModelLoader for OwnedLoader {
        fn load(&self, config: &ModelConfig) -> Result<Box<dyn Synthesizer>> {
            self.0.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSynth {
                sample_rate: config.sample_rate,
                durations: self.0.durations.clone(),
                calls: self.0.calls.clone(),
            }))
        }
    }

    fn engine_with(
        dir: &Path,
        durations: Vec<usize>,
    ) -> (
        ConversionEngine,
        mpsc::UnboundedReceiver<WorkerEvent>,
        Arc<ScriptedLoader>,
    ) {
        let loader = Arc::new(ScriptedLoader::new(durations));
        let (events, rx) = EventSender::new();
        let engine = ConversionEngine::new(
            Job::new(dir, "out"),
            Box::new(OwnedLoader(loader.clone())),
            events,
        );
        (engine, rx, loader)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn read_wav(path: &Path) -> (u32, Vec<f32>) {
        let mut reader = hound::WavReader::open(path).unwrap();
        let rate = reader.spec().sample_rate;
        let samples = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        (rate, samples)
    }

    #[tokio::test]
    async fn segmented_job_writes_audio_subtitles_and_lyrics() {
        let dir = tempfile::tempdir().unwrap();
        // Two Mandarin sentences, 28800 + 19200 samples at 24 kHz,
        // i.e. 1.2 s and 0.8 s.
        let (mut engine, mut rx, _loader) = engine_with(dir.path(), vec![28800, 19200]);
        engine.set_language(Language::Mandarin);
        engine.set_text("这是第一句话，里面有足够多的字可以超过阈值。这是第二句话，用来收尾。".to_string());
        engine.run().await;

        assert_eq!(engine.state(), EngineState::Done);

        let (rate, samples) = read_wav(&engine.job().wav_path());
        assert_eq!(rate, 24000);
        assert_eq!(samples.len(), 48000);
        assert!(samples[..28800].iter().all(|&s| s == 0.1));
        assert!(samples[28800..].iter().all(|&s| s == 0.2));

        let srt = std::fs::read_to_string(engine.job().srt_path()).unwrap();
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,200\n这是第一句话，里面有足够多的字可以超过阈值。\n\n\
             2\n00:00:01,200 --> 00:00:02,000\n这是第二句话，用来收尾。\n\n"
        );

        let lrc = std::fs::read_to_string(engine.job().lrc_path()).unwrap();
        assert_eq!(
            lrc,
            "[00:00.00]这是第一句话，里面有足够多的字可以超过阈值。\n[00:01.20]这是第二句话，用来收尾。\n"
        );

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|ev| matches!(ev, WorkerEvent::ConversionDone(_))));
    }

    #[tokio::test]
    async fn short_input_skips_subtitles() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx, _loader) = engine_with(dir.path(), vec![12000]);
        engine.set_language(Language::Mandarin);
        engine.set_text("你好。".to_string());
        engine.run().await;

        assert_eq!(engine.state(), EngineState::Done);
        assert!(engine.job().wav_path().exists());
        assert!(!engine.job().srt_path().exists());
        assert!(!engine.job().lrc_path().exists());
    }

    #[tokio::test]
    async fn empty_input_fails_before_any_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, mut rx, loader) = engine_with(dir.path(), vec![]);
        engine.set_text("   \n  ".to_string());
        engine.run().await;

        assert_eq!(engine.state(), EngineState::Failed);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
        let events = drain(&mut rx);
        assert!(events.iter().any(|ev| match ev {
            WorkerEvent::Log(line) => line.contains("Input error"),
            _ => false,
        }));
    }

    #[tokio::test]
    async fn model_reloads_only_on_configuration_change() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx, loader) = engine_with(dir.path(), vec![]);
        engine.set_language(Language::Mandarin);

        engine.set_text("你好。".to_string());
        engine.run().await;
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        // Same configuration: the loaded model is reused.
        engine.set_text("再见。".to_string());
        engine.run().await;
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        // A language change resolves to different tags and forces a reload.
        engine.set_language(Language::English);
        engine.set_text("Hello again.".to_string());
        engine.run().await;
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(engine.config().sample_rate, 22050);
    }

    #[tokio::test]
    async fn auto_detection_switches_the_job_language() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _rx, _loader) = engine_with(dir.path(), vec![]);
        assert!(engine.job().auto_detect);
        engine.set_text(
            "The quick brown fox jumps over the lazy dog. It does so every single day."
                .to_string(),
        );
        engine.run().await;

        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(engine.job().language, Language::English);
        assert_eq!(engine.config().sample_rate, 22050);
    }

    #[tokio::test]
    async fn synthesis_failure_reports_and_halts_the_job() {
        struct FailingLoader;
        struct FailingSynth;
        impl Synthesizer for FailingSynth {
            fn synthesize(&self, _text: &str) -> Result<Synthesis> {
                Err(ConvertError::Synthesis("inference blew up".to_string()))
            }
        }
        impl ModelLoader for FailingLoader {
            fn load(&self, _config: &ModelConfig) -> Result<Box<dyn Synthesizer>> {
                Ok(Box::new(FailingSynth))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let (events, mut rx) = EventSender::new();
        let mut engine =
            ConversionEngine::new(Job::new(dir.path(), "out"), Box::new(FailingLoader), events);
        engine.set_language(Language::Mandarin);
        engine.set_text("你好。".to_string());
        engine.run().await;

        assert_eq!(engine.state(), EngineState::Failed);
        let events = drain(&mut rx);
        assert!(events.iter().any(|ev| match ev {
            WorkerEvent::Log(line) => line.contains("inference blew up"),
            _ => false,
        }));
        assert!(!events
            .iter()
            .any(|ev| matches!(ev, WorkerEvent::ConversionDone(_))));
    }

    #[test]
    fn blank_line_runs_collapse_to_one() {
        let text = "first paragraph\n\n\n\nsecond paragraph\n\nthird";
        assert_eq!(
            normalize_whitespace(text),
            "first paragraph\n\nsecond paragraph\n\nthird"
        );
    }
}
