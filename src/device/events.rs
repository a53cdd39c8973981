use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::Auth;
use crate::controller::AppCommand;
use crate::desk::{ConnectionError, ConnectionState, DeskEvent};

use super::client::{device_url, DeviceError, PARTICLE_API_URL};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Something the event stream learned about the desk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// Stream connection changed
    Connection(ConnectionState, Option<ConnectionError>),
    /// Desk published an event
    Event(DeskEvent),
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// `event:` field, `message` when absent
    pub event: String,
    /// `data:` lines joined with newlines
    pub data: String,
}

/// Incremental `text/event-stream` parser
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Create an empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without the line terminator)
    ///
    /// Returns a message when `line` is the blank line that ends it.
    pub fn feed_line(&mut self, line: &str) -> Option<SseMessage> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').map_or((line, ""), |(field, value)| {
            (field, value.strip_prefix(' ').unwrap_or(value))
        });

        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseMessage {
            event: event.unwrap_or_else(|| "message".to_owned()),
            data,
        })
    }
}

/// Payload of a Particle cloud event
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CloudEvent {
    /// Event payload
    #[serde(default)]
    pub data: String,
    /// Time to live in seconds
    #[serde(default)]
    pub ttl: Option<u32>,
    /// Publish timestamp
    #[serde(default)]
    pub published_at: Option<String>,
    /// Publishing device
    #[serde(default)]
    pub coreid: Option<String>,
}

/// Decode an SSE message into a desk event
///
/// Malformed payloads are logged and skipped.
#[must_use]
pub fn decode_message(message: &SseMessage) -> Option<DeskEvent> {
    let cloud_event: CloudEvent = match serde_json::from_str(&message.data) {
        Ok(event) => event,
        Err(e) => {
            warn!(event = %message.event, "event parse error: {}", e);
            return None;
        }
    };
    DeskEvent::parse(&message.event, &cloud_event.data)
}

/// Background reader for a device's event stream
pub struct EventStream {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Start streaming events for the device in `auth`
    ///
    /// Updates are sent as [`AppCommand::Stream`] tagged with the device id.
    /// The stream reconnects until [`EventStream::stop`] is called or the
    /// receiver goes away. Nothing is sent after the stop.
    ///
    /// # Errors
    /// Returns error if the thread can't be spawned
    pub fn start(auth: Auth, sender: UnboundedSender<AppCommand>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(format!("events-{}", auth.device_id))
            .spawn(move || run_stream(PARTICLE_API_URL, &auth, &sender, &thread_stop))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the thread to exit
    ///
    /// A blocked read only notices at the next event or keep-alive.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Detach: joining could block until the next keep-alive
        drop(self.handle.take());
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sends updates for one desk until the stream is stopped
struct Reporter<'a> {
    device_id: &'a str,
    sender: &'a UnboundedSender<AppCommand>,
    stop: &'a AtomicBool,
}

impl Reporter<'_> {
    /// Returns false once the stream should wind down
    fn send(&self, update: StreamUpdate) -> bool {
        if self.stop.load(Ordering::SeqCst) {
            debug!(device = %self.device_id, ?update, "stream stopped, update dropped");
            return false;
        }
        self.sender
            .send(AppCommand::Stream {
                device_id: self.device_id.to_owned(),
                update,
            })
            .is_ok()
    }
}

fn run_stream(
    api_url: &str,
    auth: &Auth,
    sender: &UnboundedSender<AppCommand>,
    stop: &AtomicBool,
) {
    let client = match Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("failed to build event stream client: {}", e);
            return;
        }
    };
    let url = format!("{}/events", device_url(api_url, &auth.device_id));
    let reporter = Reporter {
        device_id: &auth.device_id,
        sender,
        stop,
    };

    loop {
        if !reporter.send(StreamUpdate::Connection(ConnectionState::Connecting, None)) {
            break;
        }

        let error = match read_stream(&client, &url, auth, &reporter) {
            Ok(()) => None,
            Err(e) if e.is_offline() => {
                warn!("event stream offline: {}", e);
                Some(ConnectionError::Offline)
            }
            Err(e) => {
                warn!("event stream error: {}", e);
                Some(ConnectionError::Other(e.to_string()))
            }
        };

        if !reporter.send(StreamUpdate::Connection(ConnectionState::Closed, error)) {
            break;
        }

        let mut waited = Duration::ZERO;
        while waited < RETRY_DELAY && !stop.load(Ordering::SeqCst) {
            std::thread::sleep(STOP_POLL);
            waited += STOP_POLL;
        }
    }
    debug!(device = %auth.device_id, "event stream stopped");
}

fn read_stream(
    client: &Client,
    url: &str,
    auth: &Auth,
    reporter: &Reporter<'_>,
) -> Result<(), DeviceError> {
    let response = client
        .get(url)
        .header(AUTHORIZATION, format!("Bearer {}", auth.access_token))
        .header(ACCEPT, "text/event-stream")
        .send()
        .map_err(DeviceError::from_transport)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(DeviceError::Status {
            status: status.as_u16(),
            body,
        });
    }

    info!(device = %auth.device_id, "event stream open");
    if !reporter.send(StreamUpdate::Connection(ConnectionState::Open, None)) {
        return Ok(());
    }

    let mut parser = SseParser::new();
    for line in BufReader::new(response).lines() {
        if reporter.stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        let line = line.map_err(|e| DeviceError::InvalidResponse(format!("stream read: {e}")))?;
        let Some(message) = parser.feed_line(&line) else {
            continue;
        };
        if let Some(event) = decode_message(&message) {
            if !reporter.send(StreamUpdate::Event(event)) {
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn feed(parser: &mut SseParser, text: &str) -> Vec<SseMessage> {
        text.lines().filter_map(|line| parser.feed_line(line)).collect()
    }

    #[test]
    fn test_parse_named_event() {
        let mut parser = SseParser::new();
        let messages = feed(
            &mut parser,
            "event: height\ndata: {\"data\":\"74\",\"ttl\":60,\"published_at\":\"2024-01-01T00:00:00Z\",\"coreid\":\"abc\"}\n\n",
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event, "height");
        assert_eq!(decode_message(&messages[0]), Some(DeskEvent::Height(74)));
    }

    #[test]
    fn test_comments_and_keepalives_are_ignored() {
        let mut parser = SseParser::new();
        let messages = feed(&mut parser, ":ok\n\n:\n\n");
        assert!(messages.is_empty());
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut parser = SseParser::new();
        let messages = feed(&mut parser, "data: first\ndata: second\n\n");
        assert_eq!(
            messages,
            vec![SseMessage {
                event: "message".to_owned(),
                data: "first\nsecond".to_owned(),
            }]
        );
    }

    #[test]
    fn test_crlf_and_missing_space() {
        let mut parser = SseParser::new();
        assert!(parser.feed_line("event:movingup\r").is_none());
        assert!(parser.feed_line("data:{\"data\":\"\"}\r").is_none());
        let message = parser.feed_line("\r").unwrap();
        assert_eq!(message.event, "movingup");
        assert_eq!(decode_message(&message), Some(DeskEvent::MovingUp));
    }

    #[test]
    fn test_event_name_resets_between_messages() {
        let mut parser = SseParser::new();
        let messages = feed(
            &mut parser,
            "event: targetreached\ndata: {\"data\":\"\"}\n\ndata: {\"data\":\"x\"}\n\n",
        );
        assert_eq!(messages[0].event, "targetreached");
        assert_eq!(messages[1].event, "message");
    }

    #[test]
    fn test_event_without_data_is_dropped() {
        let mut parser = SseParser::new();
        let messages = feed(&mut parser, "event: movingup\n\nevent: movingdown\ndata: {}\n\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event, "movingdown");
        assert_eq!(decode_message(&messages[0]), Some(DeskEvent::MovingDown));
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        let message = SseMessage {
            event: "height".to_owned(),
            data: "74".to_owned(),
        };
        assert_eq!(decode_message(&message), None);
    }

    #[test]
    fn test_decode_status_event() {
        let message = SseMessage {
            event: "spark/status".to_owned(),
            data: r#"{"data":"online","ttl":60}"#.to_owned(),
        };
        assert_eq!(decode_message(&message), Some(DeskEvent::Online(true)));
    }

    fn auth() -> Auth {
        Auth {
            access_token: "token".to_owned(),
            device_id: "dev1".to_owned(),
        }
    }

    #[test]
    fn test_reporter_tags_updates_and_goes_quiet_when_stopped() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let stop = AtomicBool::new(false);
        let reporter = Reporter {
            device_id: "dev1",
            sender: &tx,
            stop: &stop,
        };

        assert!(reporter.send(StreamUpdate::Event(DeskEvent::MovingUp)));
        assert_eq!(
            rx.try_recv().unwrap(),
            AppCommand::Stream {
                device_id: "dev1".to_owned(),
                update: StreamUpdate::Event(DeskEvent::MovingUp),
            }
        );

        stop.store(true, Ordering::SeqCst);
        assert!(!reporter.send(StreamUpdate::Connection(ConnectionState::Closed, None)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_stopped_while_connecting_reports_nothing_more() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let api_url = format!("http://{}", listener.local_addr().unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        // Stop lands while the request is in flight, then the server answers
        let server_stop = Arc::clone(&stop);
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).unwrap();
            server_stop.store(true, Ordering::SeqCst);
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\nevent: movingup\ndata: {\"data\":\"\"}\n\n",
                )
                .unwrap();
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        run_stream(&api_url, &auth(), &tx, &stop);
        server.join().unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            AppCommand::Stream {
                device_id: "dev1".to_owned(),
                update: StreamUpdate::Connection(ConnectionState::Connecting, None),
            }
        );
        // No Open, no event, no Closed
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_already_stopped_sends_nothing() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let stop = AtomicBool::new(true);
        run_stream("http://127.0.0.1:9", &auth(), &tx, &stop);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    #[ignore = "requires network access and a real desk"]
    fn test_stream_live() {
        let auth = Auth {
            access_token: std::env::var("PARTICLE_TOKEN").unwrap(),
            device_id: std::env::var("PARTICLE_DEVICE").unwrap(),
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut stream = EventStream::start(auth, tx).unwrap();
        let first = rx.blocking_recv().unwrap();
        assert!(matches!(
            first,
            AppCommand::Stream {
                update: StreamUpdate::Connection(ConnectionState::Connecting, None),
                ..
            }
        ));
        stream.stop();
    }
}
