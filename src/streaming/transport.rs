//! WebSocket transport for streaming sessions
//!
//! A [`Connector`] opens a [`Link`]: a write half ([`FrameSink`]) plus a
//! channel of [`TransportEvent`]s produced by a background reader task.
//! The session only ever talks to these traits, so tests can swap the
//! network for an in-memory connector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::StreamingError;

/// Capacity of the inbound event channel per link
const INBOUND_CHANNEL_CAPACITY: usize = 100;

/// Low-level events reported by an open link
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A text frame arrived
    Text(String),
    /// The peer closed the connection, or the stream ended
    Closed { reason: Option<String> },
    /// The connection failed
    Error(String),
}

/// Write half of an open link
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), StreamingError>;

    async fn close(&mut self) -> Result<(), StreamingError>;

    fn is_open(&self) -> bool;
}

/// A freshly opened connection
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens links to a streaming endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Link, StreamingError>;
}

// ============================================================================
// tokio-tungstenite implementation
// ============================================================================

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Production connector backed by tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        // Both ring and aws-lc-rs may be compiled in; pick one explicitly for wss://
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            log::debug!("rustls crypto provider already installed");
        }
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Link, StreamingError> {
        log::info!("Connecting to {}", url);

        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| StreamingError::ConnectionFailed(e.to_string()))?;

        let (write, mut read) = ws_stream.split();
        let (events_tx, events_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));
        let reader_open = open.clone();

        // Forward everything the socket delivers until it closes or the session drops the link
        let reader_task = tokio::spawn(async move {
            let terminal = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if events_tx.send(TransportEvent::Text(text)).await.is_err() {
                            log::debug!("Link event channel closed");
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if events_tx.send(TransportEvent::Text(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => log::warn!("Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("WebSocket closed by server");
                        break TransportEvent::Closed {
                            reason: frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty()),
                        };
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket error: {}", e);
                        break TransportEvent::Error(e.to_string());
                    }
                    None => break TransportEvent::Closed { reason: None },
                    _ => {} // Ping/pong handled by tungstenite
                }
            };
            reader_open.store(false, Ordering::SeqCst);
            let _ = events_tx.send(terminal).await;
            log::debug!("Reader task exiting");
        });

        Ok(Link {
            sink: Box::new(WsSink {
                write,
                open,
                reader_task,
            }),
            events: events_rx,
        })
    }
}

struct WsSink {
    write: WsWrite,
    open: Arc<AtomicBool>,
    reader_task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), StreamingError> {
        if !self.is_open() {
            return Err(StreamingError::SendFailed("link is closed".to_string()));
        }
        self.write
            .send(Message::Text(text))
            .await
            .map_err(|e| StreamingError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), StreamingError> {
        self.open.store(false, Ordering::SeqCst);
        self.reader_task.abort();
        self.write
            .close()
            .await
            .map_err(|e| StreamingError::Disconnected(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for WsSink {
    fn drop(&mut self) {
        // Ensure the reader is gone even if close() was never awaited
        self.reader_task.abort();
    }
}

// ============================================================================
// In-memory connector for tests
// ============================================================================

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{Connector, FrameSink, Link, TransportEvent};
    use crate::streaming::StreamingError;

    /// Shared record of everything the mock saw
    #[derive(Default)]
    pub struct MockState {
        pub opens: AtomicUsize,
        pub sent: Mutex<Vec<String>>,
        /// Number of upcoming sends that fail
        pub failing_sends: AtomicU32,
        /// Outcomes for upcoming opens; empty means success
        pub open_outcomes: Mutex<VecDeque<bool>>,
        pub links: Mutex<Vec<(Arc<AtomicBool>, mpsc::Sender<TransportEvent>)>>,
    }

    impl MockState {
        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn fail_next_opens(&self, count: usize) {
            let mut outcomes = self.open_outcomes.lock().unwrap();
            outcomes.extend(std::iter::repeat(false).take(count));
        }

        pub fn fail_next_sends(&self, count: u32) {
            self.failing_sends.store(count, Ordering::SeqCst);
        }

        /// Deliver an event on the most recently opened link
        pub async fn push(&self, event: TransportEvent) {
            let tx = {
                let links = self.links.lock().unwrap();
                let (open, tx) = links.last().expect("no link opened");
                if matches!(event, TransportEvent::Closed { .. } | TransportEvent::Error(_)) {
                    open.store(false, Ordering::SeqCst);
                }
                tx.clone()
            };
            tx.send(event).await.expect("session dropped link");
        }

        /// Deliver an event on a specific (possibly superseded) link
        pub async fn push_to(&self, index: usize, event: TransportEvent) {
            let tx = self.links.lock().unwrap()[index].1.clone();
            let _ = tx.send(event).await;
        }
    }

    #[derive(Clone, Default)]
    pub struct MockConnector {
        pub state: Arc<MockState>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn open(&self, _url: &str) -> Result<Link, StreamingError> {
            self.state.opens.fetch_add(1, Ordering::SeqCst);
            let succeed = self
                .state
                .open_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(true);
            if !succeed {
                return Err(StreamingError::ConnectionFailed("refused".to_string()));
            }

            let (tx, rx) = mpsc::channel(32);
            let open = Arc::new(AtomicBool::new(true));
            self.state.links.lock().unwrap().push((open.clone(), tx));

            Ok(Link {
                sink: Box::new(MockSink {
                    state: self.state.clone(),
                    open,
                }),
                events: rx,
            })
        }
    }

    struct MockSink {
        state: Arc<MockState>,
        open: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameSink for MockSink {
        async fn send_text(&mut self, text: String) -> Result<(), StreamingError> {
            let failing = self.state.failing_sends.load(Ordering::SeqCst);
            if failing > 0 {
                self.state.failing_sends.store(failing - 1, Ordering::SeqCst);
                return Err(StreamingError::SendFailed("injected".to_string()));
            }
            self.state.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), StreamingError> {
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }
}
