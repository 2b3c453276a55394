use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::warn;

use narrox::bus::{ControllerCommand, Subscriber, WorkerEvent, EVENT_ADDR};
use narrox::error::ConvertError;
use narrox::supervisor::WorkerSupervisor;
use narrox::synth::tone::ToneLoader;
use narrox::worker::{self, WorkerOptions};

mod config;
use config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "narro",
    version,
    about = "Turn text and documents into speech with synchronized subtitle and lyric tracks"
)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Convert a document or a string of text to speech
    #[command(alias = "c")]
    Convert {
        /// File to read text from (UTF-8, or anything the external converter understands)
        #[arg(short = 'f', long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Inline text to convert
        #[arg(short = 't', long)]
        text: Option<String>,

        /// Language: auto, en or zh
        #[arg(short = 'l', long)]
        language: Option<String>,

        /// Synthesis model: conformer_fastspeech2, tacotron2, fastspeech2 or fastspeech
        #[arg(long)]
        synthesis_model: Option<String>,

        /// Vocoder model: parallel_wavegan, multi_band_melgan or full_band_melgan
        #[arg(long)]
        vocoder_model: Option<String>,

        /// Base name for the output wav/srt/lrc files
        #[arg(short = 'o', long)]
        output_name: Option<String>,

        /// Directory the output files land in
        #[arg(long)]
        output_dir: Option<String>,

        /// Always route input files through the external document converter
        #[arg(long)]
        external_converter: bool,
    },

    /// Run the background conversion worker process
    Worker,
}

enum Outcome {
    Done,
    Failed,
    Crashed,
    Interrupted,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let code = match cli.mode {
        Mode::Worker => match run_worker().await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("{}", err.report());
                1
            }
        },
        Mode::Convert {
            file,
            text,
            language,
            synthesis_model,
            vocoder_model,
            output_name,
            output_dir,
            external_converter,
        } => {
            let overrides = Overrides {
                file,
                text,
                language,
                synthesis_model,
                vocoder_model,
                output_name,
                output_dir,
                external_converter,
            };
            match run_controller(overrides).await {
                Ok(code) => code,
                Err(err) => {
                    eprintln!("{}", err.report());
                    1
                }
            }
        }
    };
    std::process::exit(code);
}

async fn run_worker() -> narrox::Result<()> {
    let options = WorkerOptions::default();
    let event_addr = options.event_addr.clone();
    match worker::run(options, Box::new(ToneLoader)).await {
        Ok(()) => Ok(()),
        Err(err) => {
            worker::report_crash(&event_addr, &err.to_string()).await;
            Err(err)
        }
    }
}

struct Overrides {
    file: Option<PathBuf>,
    text: Option<String>,
    language: Option<String>,
    synthesis_model: Option<String>,
    vocoder_model: Option<String>,
    output_name: Option<String>,
    output_dir: Option<String>,
    external_converter: bool,
}

async fn run_controller(overrides: Overrides) -> narrox::Result<i32> {
    if overrides.file.is_none() && overrides.text.is_none() {
        return Err(ConvertError::Input(
            "nothing to convert, pass --file or --text".to_string(),
        ));
    }

    let mut settings = AppConfig::load()
        .map_err(|err| ConvertError::Input(format!("bad configuration: {}", err)))?;
    if let Some(language) = overrides.language {
        settings.language = language;
    }
    if let Some(model) = overrides.synthesis_model {
        settings.synthesis_model = model;
    }
    if let Some(model) = overrides.vocoder_model {
        settings.vocoder_model = model;
    }
    if let Some(name) = overrides.output_name {
        settings.output_name = name;
    }
    if let Some(dir) = overrides.output_dir {
        settings.output_dir = dir;
    }
    if overrides.external_converter {
        settings.always_external_converter = true;
    }

    let exe = std::env::current_exe()?;
    let mut supervisor = WorkerSupervisor::spawn(&exe, &["worker"]).await?;
    let mut events = Subscriber::connect(EVENT_ADDR);

    if !supervisor.wait_for_worker(Duration::from_secs(10)).await {
        supervisor.terminate(Duration::from_secs(2)).await?;
        return Err(ConvertError::Transport(
            "worker never subscribed to the command channel".to_string(),
        ));
    }

    let language_code = if settings.language == "auto" {
        String::new()
    } else {
        settings.language.clone()
    };
    supervisor
        .send(ControllerCommand::SetLanguage(language_code))
        .await;
    supervisor
        .send(ControllerCommand::SetSynthesisModel(
            settings.synthesis_model.clone(),
        ))
        .await;
    supervisor
        .send(ControllerCommand::SetVocoderModel(
            settings.vocoder_model.clone(),
        ))
        .await;
    supervisor
        .send(ControllerCommand::SetOutputName(settings.output_name.clone()))
        .await;
    supervisor
        .send(ControllerCommand::SetOutputDir(settings.expanded_output_dir()))
        .await;
    supervisor
        .send(ControllerCommand::ForceExternalConverter(
            settings.always_external_converter,
        ))
        .await;

    if let Some(file) = &overrides.file {
        let path = std::fs::canonicalize(file).unwrap_or_else(|_| file.clone());
        supervisor
            .send(ControllerCommand::SetFile(
                path.to_string_lossy().into_owned(),
            ))
            .await;
        supervisor.send(ControllerCommand::Convert(String::new())).await;
    } else if let Some(text) = overrides.text {
        supervisor.send(ControllerCommand::Convert(text)).await;
    }

    // Remember the selection for the next run, like every conversion start.
    if let Err(err) = settings.save() {
        warn!("could not persist settings: {}", err);
    }

    let outcome = loop {
        tokio::select! {
            msg = events.recv() => match msg {
                Some(msg) => match WorkerEvent::decode(&msg) {
                    Some(WorkerEvent::Log(line)) => {
                        print!("{}", line);
                        std::io::stdout().flush().ok();
                        // A failed job surfaces as one closed status block
                        // and nothing more will follow for this command.
                        if line.contains("[END OF ERROR]") {
                            break Outcome::Failed;
                        }
                    }
                    Some(WorkerEvent::FileContent(text)) => {
                        println!("[loaded {} characters from file]", text.chars().count());
                    }
                    Some(WorkerEvent::DownloadPrompt(prompt)) => {
                        eprintln!("{}", prompt);
                        break Outcome::Failed;
                    }
                    Some(WorkerEvent::ConversionDone(path)) => {
                        println!("Output audio: {}", path);
                        break Outcome::Done;
                    }
                    Some(WorkerEvent::Crash(reason)) => {
                        eprintln!("worker crashed: {}", reason);
                        break Outcome::Crashed;
                    }
                    None => warn!("unknown event topic: {}", msg.topic),
                },
                None => break Outcome::Crashed,
            },
            status = supervisor.wait() => {
                eprintln!("worker exited unexpectedly: {:?}", status);
                break Outcome::Crashed;
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted, shutting the worker down");
                break Outcome::Interrupted;
            }
        }
    };
    events.close();

    match outcome {
        Outcome::Done => {
            supervisor.terminate(Duration::from_secs(2)).await?;
            Ok(0)
        }
        Outcome::Failed | Outcome::Interrupted => {
            supervisor.terminate(Duration::from_secs(2)).await?;
            Ok(1)
        }
        // The child is already gone; dropping the supervisor releases the
        // command channel so a new worker can be started.
        Outcome::Crashed => Ok(1),
    }
}
