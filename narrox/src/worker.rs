//! The worker process loop: one engine, one command subscription, one event
//! publisher. Commands run strictly in arrival order; a `convert` arriving
//! while a job is running queues behind it, while `exit` is honored
//! immediately, abandoning whatever is in flight.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use log::warn;

use crate::bus::{ControllerCommand, Publisher, Subscriber, WorkerEvent, COMMAND_ADDR, EVENT_ADDR};
use crate::engine::{ConversionEngine, EventSender, Job};
use crate::error::Result;
use crate::synth::ModelLoader;
use crate::text::Language;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub command_addr: String,
    pub event_addr: String,
    pub out_dir: PathBuf,
    pub out_name: String,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            command_addr: COMMAND_ADDR.to_string(),
            event_addr: EVENT_ADDR.to_string(),
            out_dir: PathBuf::from("."),
            out_name: "out".to_string(),
        }
    }
}

/// Run the worker until an `exit` command (or a dead command channel).
/// Endpoints are bound here and dropped on every return path, so nothing
/// outlives the loop.
pub async fn run(options: WorkerOptions, loader: Box<dyn ModelLoader>) -> Result<()> {
    let events = Publisher::bind(&options.event_addr).await?;
    let (sender, mut events_rx) = EventSender::new();

    // Dedicated forwarder: the engine never waits on the bus.
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            events.publish(event.topic(), event.payload()).await;
        }
    });

    let mut engine = ConversionEngine::new(
        Job::new(options.out_dir.clone(), options.out_name.clone()),
        loader,
        sender.clone(),
    );
    let mut commands = Subscriber::connect(options.command_addr.clone());
    sender.status("Converter initialized.");

    let mut pending: VecDeque<ControllerCommand> = VecDeque::new();
    'main: loop {
        let command = match pending.pop_front() {
            Some(command) => command,
            None => match commands.recv().await {
                Some(msg) => match ControllerCommand::decode(&msg) {
                    Some(command) => command,
                    None => {
                        warn!("unknown command topic: {}", msg.topic);
                        continue;
                    }
                },
                None => break,
            },
        };

        match command {
            ControllerCommand::Exit => break,
            ControllerCommand::Convert(text) => {
                if !text.is_empty() {
                    engine.set_text(text);
                }
                let mut job = Box::pin(engine.run());
                // Keep listening while the job runs: later commands queue
                // behind it, but `exit` tears the worker down immediately.
                loop {
                    tokio::select! {
                        _ = &mut job => break,
                        msg = commands.recv() => match msg {
                            Some(msg) => match ControllerCommand::decode(&msg) {
                                Some(ControllerCommand::Exit) => break 'main,
                                Some(command) => pending.push_back(command),
                                None => warn!("unknown command topic: {}", msg.topic),
                            },
                            None => break 'main,
                        },
                    }
                }
            }
            ControllerCommand::SetFile(path) => {
                engine.set_text_from_file(Path::new(&path)).await;
            }
            ControllerCommand::SetLanguage(code) => {
                if code.is_empty() {
                    engine.set_auto_detect();
                } else {
                    match Language::from_code(&code) {
                        Some(language) => engine.set_language(language),
                        None => warn!("unknown language code: {}", code),
                    }
                }
            }
            ControllerCommand::SetSynthesisModel(tag) => engine.set_custom_synthesis(&tag),
            ControllerCommand::SetVocoderModel(tag) => engine.set_custom_vocoder(&tag),
            ControllerCommand::SetOutputName(name) => engine.set_output_name(&name),
            ControllerCommand::SetOutputDir(dir) => engine.set_output_dir(&dir),
            ControllerCommand::ForceExternalConverter(on) => engine.set_force_external(on),
        }
    }

    // Immediate teardown: no event is flushed after the decision to exit.
    commands.close();
    forwarder.abort();
    Ok(())
}

/// Best-effort crash report for abnormal worker shutdown. The controller's
/// subscriber reconnects on its own, so give it a moment to attach; if
/// nobody shows up the message is dropped like any other publish.
pub async fn report_crash(event_addr: &str, reason: &str) {
    if let Ok(publisher) = Publisher::bind(event_addr).await {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        while publisher.subscriber_count().await == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let event = WorkerEvent::Crash(reason.to_string());
        publisher.publish(event.topic(), event.payload()).await;
    }
}
