//! REST client for the VOICE2EYE backend's status endpoints.
//!
//! Streaming happens over WebSockets (see `streaming`); these calls are the
//! plain request/response side used to check that the backend is reachable
//! and to fetch the gesture vocabulary before opening a session.

mod client;
mod types;

pub use client::{BackendClient, BackendError};
pub use types::{
    GestureDefinition, GestureStatus, GestureVocabulary, HealthReport, ServiceHealth,
    SpeechStatus,
};
