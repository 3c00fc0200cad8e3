//! Real-time streaming client for the VOICE2EYE assistive backend.
//!
//! Two sessions share one implementation: [`SpeechSession`] streams audio
//! chunks for speech recognition and [`GestureSession`] streams camera
//! frames for gesture recognition. Both keep a persistent WebSocket open,
//! queue frames while it is down, and reconnect with bounded exponential
//! backoff.
//!
//! ```no_run
//! use voice2eye_stream::{ClientSettings, SpeechSession};
//!
//! # async fn demo() -> Result<(), voice2eye_stream::StreamingError> {
//! let session = SpeechSession::from_settings(&ClientSettings::default());
//! session.on_result(|result| println!("{}", result.text));
//! if session.connect().await {
//!     session.start_streaming().await?;
//!     session.send_frame(vec![0u8; 320]).await;
//! }
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod capture;
pub mod config;
pub mod streaming;

pub use config::ClientSettings;
pub use streaming::{
    ConnectionState, GestureResult, GestureSession, SessionStatus, SpeechResult, SpeechSession,
    StreamingError, StreamingSession,
};
