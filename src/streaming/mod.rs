//! Streaming sessions for real-time speech and gesture recognition
//!
//! This module provides WebSocket-based streaming to the VOICE2EYE backend:
//! captured audio chunks or camera frames go out, recognition results come
//! back asynchronously while the user is still speaking or signing.
//!
//! # Architecture
//!
//! ```text
//! AudioSource / send_frame() ──▶ FrameQueue (FIFO) ──▶ FrameSink (WebSocket)
//!                                                          │
//!            on_result ◀── dispatch ◀── TransportEvent ◀───┘
//!                                           │ close / error
//!                                           ▼
//!                                  ReconnectPolicy (backoff)
//! ```
//!
//! # Recovery Strategy
//!
//! - Lost connections retry 5 times with exponential backoff (1s .. 16s, capped at 30s)
//! - Frames produced while the socket is down stay queued and flush in order on reconnect
//! - A frame that fails to send 4 times is dropped so it cannot stall the stream

mod frame_queue;
mod media;
mod protocol;
mod reconnect;
mod session;
mod transport;

pub use frame_queue::{FrameQueue, QueuedFrame, MAX_FRAME_RETRIES};
pub use media::{Frame, Gesture, MediaKind, Speech, WireFormats};
pub use protocol::{
    parse_server_messages, AudioFormat, BoundingBox, ClientMessage, ControlMessage,
    GestureResult, RecognitionResult, ServerMessage, SpeechResult, VideoFormat,
};
pub use reconnect::{ReconnectDecision, ReconnectNotice, ReconnectPolicy};
pub use session::{
    endpoint_accepts_heartbeat, ConnectionState, GestureSession, SessionOptions, SessionStatus,
    SpeechSession, StreamingSession,
};
pub use transport::{Connector, FrameSink, Link, TransportEvent, WsConnector};

/// Errors that can occur during a streaming session
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingError {
    /// Failed to establish the WebSocket connection
    ConnectionFailed(String),
    /// The socket did not report open within the open timeout
    Timeout,
    /// Connection was closed unexpectedly
    Disconnected(String),
    /// Reconnection attempts are used up; only `force_reconnect()` recovers
    ReconnectExhausted { attempts: u32 },
    /// Operation requires a connected session
    NotConnected,
    /// Recording permission was refused
    PermissionDenied,
    /// The audio source failed to start or deliver data
    Capture(String),
    /// Failed to send a frame
    SendFailed(String),
    /// A message from the backend could not be understood
    Protocol(String),
    /// The backend reported an error message on the stream
    Server(String),
    /// The session task is no longer running
    SessionClosed,
}

impl StreamingError {
    /// True for failures after which no automatic recovery is attempted
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamingError::ReconnectExhausted { .. })
    }
}

impl std::fmt::Display for StreamingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamingError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to streaming endpoint: {}", e)
            }
            StreamingError::Timeout => write!(f, "Timed out waiting for the connection to open"),
            StreamingError::Disconnected(e) => write!(f, "WebSocket disconnected: {}", e),
            StreamingError::ReconnectExhausted { attempts } => write!(
                f,
                "Max reconnection attempts reached ({}); use force reconnect to retry",
                attempts
            ),
            StreamingError::NotConnected => {
                write!(f, "Not connected: call connect() before starting the stream")
            }
            StreamingError::PermissionDenied => write!(f, "Recording permission denied"),
            StreamingError::Capture(e) => write!(f, "Audio capture failed: {}", e),
            StreamingError::SendFailed(e) => write!(f, "Failed to send frame: {}", e),
            StreamingError::Protocol(e) => write!(f, "Malformed stream message: {}", e),
            StreamingError::Server(e) => write!(f, "Backend reported an error: {}", e),
            StreamingError::SessionClosed => write!(f, "Streaming session has shut down"),
        }
    }
}

impl std::error::Error for StreamingError {}
