//! Asynchronous pub/sub channel between the controller and worker
//! processes. Each direction has its own well-known address whose publisher
//! binds a listener, so either process can come up first. Frames carry the
//! `"<topic>|<payload>"` wire format, length-prefixed so payloads may
//! contain `|`, newlines, or whole documents.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Controller → worker command channel.
pub const COMMAND_ADDR: &str = "127.0.0.1:10289";
/// Worker → controller status/event channel.
pub const EVENT_ADDR: &str = "127.0.0.1:10290";

const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// One decoded bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

fn encode_frame(topic: &str, payload: &str) -> Vec<u8> {
    let text = format!("{}|{}", topic, payload);
    let bytes = text.as_bytes();
    let mut frame = Vec::with_capacity(4 + bytes.len());
    frame.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    frame.extend_from_slice(bytes);
    frame
}

fn decode_text(text: &str) -> Option<BusMessage> {
    let (topic, payload) = text.split_once('|')?;
    Some(BusMessage {
        topic: topic.to_string(),
        payload: payload.to_string(),
    })
}

/// Publishing endpoint: owns the listener for its direction and writes every
/// message to all currently connected subscribers. Publishing never blocks
/// waiting for a subscriber: with none connected the message is dropped and
/// logged locally.
pub struct Publisher {
    peers: Arc<Mutex<Vec<OwnedWriteHalf>>>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Publisher {
    pub async fn bind(addr: &str) -> std::io::Result<Publisher> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let peers: Arc<Mutex<Vec<OwnedWriteHalf>>> = Arc::new(Mutex::new(Vec::new()));
        let accept_peers = peers.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        debug!("subscriber connected from {}", peer_addr);
                        let _ = stream.set_nodelay(true);
                        let (_, write_half) = stream.into_split();
                        accept_peers.lock().await.push(write_half);
                    }
                    Err(err) => {
                        warn!("accept failed on bus listener: {}", err);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
        Ok(Publisher {
            peers,
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn subscriber_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Send one message to every connected subscriber. Connections that fail
    /// mid-write are pruned; with no subscribers the message is dropped.
    pub async fn publish(&self, topic: &str, payload: &str) {
        let frame = encode_frame(topic, payload);
        let mut peers = self.peers.lock().await;
        if peers.is_empty() {
            warn!("no subscriber connected, dropping message: {}", topic);
            return;
        }
        let mut alive = Vec::with_capacity(peers.len());
        for mut peer in peers.drain(..) {
            match peer.write_all(&frame).await {
                Ok(()) => alive.push(peer),
                Err(err) => debug!("dropping disconnected subscriber: {}", err),
            }
        }
        *peers = alive;
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        // Tear down immediately: no lingering accept loop, peers close as
        // their write halves drop.
        self.accept_task.abort();
    }
}

/// Subscribing endpoint: a background task keeps a connection to the remote
/// publisher alive (reconnecting as needed) and feeds decoded messages into
/// an unbounded channel, so consuming them can never block the remote side.
pub struct Subscriber {
    rx: mpsc::UnboundedReceiver<BusMessage>,
    task: JoinHandle<()>,
}

impl Subscriber {
    pub fn connect(addr: impl Into<String>) -> Subscriber {
        let addr = addr.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                let stream = match TcpStream::connect(&addr).await {
                    Ok(stream) => stream,
                    Err(_) => {
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };
                debug!("subscribed to {}", addr);
                if read_frames(stream, &tx).await.is_err() {
                    return; // receiver side is gone, stop for good
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });
        Subscriber { rx, task }
    }

    /// Next message, forever. Returns `None` only after `close`.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read length-prefixed frames until the connection drops. Returns `Err`
/// only when the consumer side of the channel has been dropped.
async fn read_frames(
    mut stream: TcpStream,
    tx: &mpsc::UnboundedSender<BusMessage>,
) -> std::result::Result<(), ()> {
    loop {
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(());
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_BYTES {
            warn!("oversized bus frame ({} bytes), dropping connection", len);
            return Ok(());
        }
        let mut buf = vec![0u8; len];
        if stream.read_exact(&mut buf).await.is_err() {
            return Ok(());
        }
        match String::from_utf8(buf) {
            Ok(text) => match decode_text(&text) {
                Some(msg) => {
                    if tx.send(msg).is_err() {
                        return Err(());
                    }
                }
                None => warn!("malformed bus message (no delimiter): {:?}", text),
            },
            Err(_) => warn!("non-UTF-8 bus frame dropped"),
        }
    }
}

/// Events published by the worker for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Text acquired from a file, mirrored back so the front-end can show it.
    FileContent(String),
    /// One status line; the controller displays the payload verbatim.
    Log(String),
    /// The external document converter is required but not installed.
    DownloadPrompt(String),
    /// A job finished; payload is the absolute output audio path.
    ConversionDone(String),
    /// The worker is going down abnormally.
    Crash(String),
}

impl WorkerEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            WorkerEvent::FileContent(_) => "file-content",
            WorkerEvent::Log(_) => "log",
            WorkerEvent::DownloadPrompt(_) => "download-prompt",
            WorkerEvent::ConversionDone(_) => "conversion-done",
            WorkerEvent::Crash(_) => "crash",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            WorkerEvent::FileContent(s)
            | WorkerEvent::Log(s)
            | WorkerEvent::DownloadPrompt(s)
            | WorkerEvent::ConversionDone(s)
            | WorkerEvent::Crash(s) => s,
        }
    }

    pub fn decode(msg: &BusMessage) -> Option<WorkerEvent> {
        let payload = msg.payload.clone();
        match msg.topic.as_str() {
            "file-content" => Some(WorkerEvent::FileContent(payload)),
            "log" => Some(WorkerEvent::Log(payload)),
            "download-prompt" => Some(WorkerEvent::DownloadPrompt(payload)),
            "conversion-done" => Some(WorkerEvent::ConversionDone(payload)),
            "crash" => Some(WorkerEvent::Crash(payload)),
            _ => None,
        }
    }
}

/// Commands published by the controller for the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    /// Start a job. A non-empty payload replaces the job text; an empty one
    /// converts whatever text was previously set (e.g. via `SetFile`).
    Convert(String),
    SetFile(String),
    /// Language code, or empty to re-enable auto-detection.
    SetLanguage(String),
    /// Short synthesis-model tag, or empty to clear the override.
    SetSynthesisModel(String),
    /// Short vocoder tag, or empty to clear the override.
    SetVocoderModel(String),
    SetOutputName(String),
    SetOutputDir(String),
    ForceExternalConverter(bool),
    Exit,
}

impl ControllerCommand {
    pub fn topic(&self) -> &'static str {
        match self {
            ControllerCommand::Convert(_) => "convert",
            ControllerCommand::SetFile(_) => "set-file",
            ControllerCommand::SetLanguage(_) => "set-language",
            ControllerCommand::SetSynthesisModel(_) => "set-synthesis-model",
            ControllerCommand::SetVocoderModel(_) => "set-vocoder-model",
            ControllerCommand::SetOutputName(_) => "set-output-name",
            ControllerCommand::SetOutputDir(_) => "set-output-dir",
            ControllerCommand::ForceExternalConverter(_) => "force-external-converter",
            ControllerCommand::Exit => "exit",
        }
    }

    pub fn payload(&self) -> String {
        match self {
            ControllerCommand::Convert(s)
            | ControllerCommand::SetFile(s)
            | ControllerCommand::SetLanguage(s)
            | ControllerCommand::SetSynthesisModel(s)
            | ControllerCommand::SetVocoderModel(s)
            | ControllerCommand::SetOutputName(s)
            | ControllerCommand::SetOutputDir(s) => s.clone(),
            ControllerCommand::ForceExternalConverter(on) => {
                if *on { "1" } else { "0" }.to_string()
            }
            ControllerCommand::Exit => String::new(),
        }
    }

    pub fn decode(msg: &BusMessage) -> Option<ControllerCommand> {
        let payload = msg.payload.clone();
        match msg.topic.as_str() {
            "convert" => Some(ControllerCommand::Convert(payload)),
            "set-file" => Some(ControllerCommand::SetFile(payload)),
            "set-language" => Some(ControllerCommand::SetLanguage(payload)),
            "set-synthesis-model" => Some(ControllerCommand::SetSynthesisModel(payload)),
            "set-vocoder-model" => Some(ControllerCommand::SetVocoderModel(payload)),
            "set-output-name" => Some(ControllerCommand::SetOutputName(payload)),
            "set-output-dir" => Some(ControllerCommand::SetOutputDir(payload)),
            "force-external-converter" => {
                Some(ControllerCommand::ForceExternalConverter(payload == "1"))
            }
            "exit" => Some(ControllerCommand::Exit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_may_contain_the_delimiter() {
        let msg = decode_text("log|left|right|more").unwrap();
        assert_eq!(msg.topic, "log");
        assert_eq!(msg.payload, "left|right|more");
    }

    #[test]
    fn payload_may_contain_newlines() {
        let frame = encode_frame("file-content", "line one\nline two\n");
        let text = std::str::from_utf8(&frame[4..]).unwrap();
        let msg = decode_text(text).unwrap();
        assert_eq!(msg.payload, "line one\nline two\n");
    }

    #[test]
    fn command_round_trip() {
        let commands = [
            ControllerCommand::Convert("hello".to_string()),
            ControllerCommand::SetLanguage("zh".to_string()),
            ControllerCommand::ForceExternalConverter(true),
            ControllerCommand::Exit,
        ];
        for cmd in commands {
            let msg = BusMessage {
                topic: cmd.topic().to_string(),
                payload: cmd.payload(),
            };
            assert_eq!(ControllerCommand::decode(&msg), Some(cmd));
        }
    }

    #[test]
    fn unknown_topics_decode_to_none() {
        let msg = BusMessage {
            topic: "reboot".to_string(),
            payload: String::new(),
        };
        assert!(ControllerCommand::decode(&msg).is_none());
        assert!(WorkerEvent::decode(&msg).is_none());
    }

    #[tokio::test]
    async fn publish_without_subscriber_never_blocks() {
        let publisher = Publisher::bind("127.0.0.1:0").await.unwrap();
        // No subscriber yet: must return immediately and not error.
        publisher.publish("log", "dropped on the floor").await;
        assert_eq!(publisher.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_messages() {
        let publisher = Publisher::bind("127.0.0.1:0").await.unwrap();
        let addr = publisher.local_addr().to_string();

        publisher.publish("log", "before anyone listened").await;

        let mut subscriber = Subscriber::connect(addr);
        while publisher.subscriber_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        publisher.publish("log", "after subscribing").await;

        let msg = tokio::time::timeout(Duration::from_secs(5), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, "after subscribing");
    }

    #[tokio::test]
    async fn subscriber_connects_before_publisher_binds() {
        // Reserve a port, remember it, then release it so the subscriber
        // starts its retry loop against a not-yet-bound address.
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let mut subscriber = Subscriber::connect(addr.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let publisher = Publisher::bind(&addr).await.unwrap();
        while publisher.subscriber_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        publisher.publish("log", "hello").await;

        let msg = tokio::time::timeout(Duration::from_secs(5), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.topic, "log");
        assert_eq!(msg.payload, "hello");
    }
}
