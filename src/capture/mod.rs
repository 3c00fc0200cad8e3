//! Audio capture sources for the speech session
//!
//! The session's capture loop only sees the [`AudioSource`] trait: a
//! recording handle that can be permission-checked, started, polled for
//! buffered bytes, and stopped. Two implementations ship here:
//!
//! - [`ChannelAudioSource`]: fed by an external producer (mobile bridge, tests)
//! - `CpalAudioSource`: the default input device (feature `device-capture`)

#[cfg(feature = "device-capture")]
mod cpal_source;

#[cfg(feature = "device-capture")]
pub use cpal_source::CpalAudioSource;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Errors that can occur while capturing audio
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    NoInputDevice,
    NoSupportedConfig,
    PermissionDenied,
    StreamCreationFailed(String),
    EncodeFailed(String),
    AlreadyStopped,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            CaptureError::PermissionDenied => write!(f, "Recording permission denied"),
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            CaptureError::EncodeFailed(e) => write!(f, "Failed to encode audio chunk: {}", e),
            CaptureError::AlreadyStopped => write!(f, "Recording is not running"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// A device recording handle driven by the capture loop
pub trait AudioSource: Send {
    fn has_permission(&self) -> bool;

    /// Ask for recording permission; `Ok(false)` means the user refused
    fn request_permission(&mut self) -> Result<bool, CaptureError>;

    fn start(&mut self) -> Result<(), CaptureError>;

    /// Whether the handle is currently recording
    fn is_active(&self) -> bool;

    /// Take whatever audio was buffered since the last call, if any
    fn take_buffered(&mut self) -> Option<Vec<u8>>;

    fn stop(&mut self) -> Result<(), CaptureError>;
}

#[derive(Default)]
struct FeedState {
    buffer: Mutex<Vec<u8>>,
    active: AtomicBool,
}

/// Producer side of a [`ChannelAudioSource`]
#[derive(Clone)]
pub struct AudioFeed {
    state: Arc<FeedState>,
}

impl AudioFeed {
    /// Append encoded audio; ignored while the source is not recording
    pub fn push(&self, bytes: &[u8]) -> bool {
        if !self.state.active.load(Ordering::SeqCst) {
            return false;
        }
        match self.state.buffer.lock() {
            Ok(mut buffer) => {
                buffer.extend_from_slice(bytes);
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }
}

/// Audio source fed by an external producer through an [`AudioFeed`]
pub struct ChannelAudioSource {
    state: Arc<FeedState>,
    permission: Option<bool>,
    grant_on_request: bool,
}

impl ChannelAudioSource {
    /// Create a source whose permission request is granted
    pub fn new() -> (Self, AudioFeed) {
        Self::with_permission(true)
    }

    /// Create a source whose permission request answers `grant`
    pub fn with_permission(grant: bool) -> (Self, AudioFeed) {
        let state = Arc::new(FeedState::default());
        let source = Self {
            state: state.clone(),
            permission: None,
            grant_on_request: grant,
        };
        (source, AudioFeed { state })
    }
}

impl AudioSource for ChannelAudioSource {
    fn has_permission(&self) -> bool {
        self.permission == Some(true)
    }

    fn request_permission(&mut self) -> Result<bool, CaptureError> {
        self.permission = Some(self.grant_on_request);
        Ok(self.grant_on_request)
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if !self.has_permission() {
            return Err(CaptureError::PermissionDenied);
        }
        self.state.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    fn take_buffered(&mut self) -> Option<Vec<u8>> {
        let mut buffer = self.state.buffer.lock().ok()?;
        if buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *buffer))
        }
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.state.active.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStopped);
        }
        if let Ok(mut buffer) = self.state.buffer.lock() {
            buffer.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_ignored_until_started() {
        let (mut source, feed) = ChannelAudioSource::new();
        assert!(!feed.push(&[1, 2, 3]));
        assert!(source.take_buffered().is_none());

        assert!(source.request_permission().unwrap());
        source.start().unwrap();
        assert!(feed.is_recording());
        assert!(feed.push(&[1, 2]));
        assert!(feed.push(&[3]));

        assert_eq!(source.take_buffered(), Some(vec![1, 2, 3]));
        assert!(source.take_buffered().is_none());
    }

    #[test]
    fn test_start_requires_permission() {
        let (mut source, _feed) = ChannelAudioSource::with_permission(false);
        assert!(!source.request_permission().unwrap());
        assert_eq!(source.start(), Err(CaptureError::PermissionDenied));
        assert!(!source.is_active());
    }

    #[test]
    fn test_stop_twice_reports_error() {
        let (mut source, feed) = ChannelAudioSource::new();
        source.request_permission().unwrap();
        source.start().unwrap();
        feed.push(&[9]);

        assert!(source.stop().is_ok());
        assert!(source.take_buffered().is_none());
        assert_eq!(source.stop(), Err(CaptureError::AlreadyStopped));
    }
}
