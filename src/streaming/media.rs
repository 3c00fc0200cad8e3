//! Media kinds served by a streaming session

use chrono::{DateTime, Utc};

use super::protocol::{
    AudioFormat, ClientMessage, GestureResult, RecognitionResult, SpeechResult, VideoFormat,
};

/// One captured unit of media, not yet encoded for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap raw bytes, stamped with the current time
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            captured_at: Utc::now(),
        }
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame::new(data)
    }
}

/// Formats used when encoding frames for the wire
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireFormats {
    pub audio: AudioFormat,
    pub video: VideoFormat,
}

/// Distinguishes the speech and gesture sessions.
///
/// Both share one session implementation; the media kind decides the
/// endpoint, how frames are encoded and which result type comes back.
pub trait MediaKind: Send + Sync + 'static {
    type Result: RecognitionResult;

    /// Short name used in logs
    const NAME: &'static str;

    /// Path of the streaming endpoint, relative to the API base URL
    const STREAM_PATH: &'static str;

    fn encode_frame(frame: &Frame, formats: &WireFormats) -> ClientMessage;
}

/// Audio → speech recognition
#[derive(Debug, Clone, Copy)]
pub struct Speech;

impl MediaKind for Speech {
    type Result = SpeechResult;

    const NAME: &'static str = "speech";
    const STREAM_PATH: &'static str = "/api/speech/recognize/stream";

    fn encode_frame(frame: &Frame, formats: &WireFormats) -> ClientMessage {
        ClientMessage::audio_chunk(&frame.data, &formats.audio, frame.captured_at)
    }
}

/// Video → gesture recognition
#[derive(Debug, Clone, Copy)]
pub struct Gesture;

impl MediaKind for Gesture {
    type Result = GestureResult;

    const NAME: &'static str = "gesture";
    const STREAM_PATH: &'static str = "/api/gestures/analyze/stream";

    fn encode_frame(frame: &Frame, formats: &WireFormats) -> ClientMessage {
        ClientMessage::video_frame(&frame.data, &formats.video, frame.captured_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_encodes_audio_chunks() {
        let msg = Speech::encode_frame(&Frame::new(vec![1, 2]), &WireFormats::default());
        assert_eq!(msg.kind(), "audio_chunk");
    }

    #[test]
    fn test_gesture_encodes_video_frames() {
        let msg = Gesture::encode_frame(&Frame::new(vec![1, 2]), &WireFormats::default());
        assert_eq!(msg.kind(), "video_frame");
    }
}
