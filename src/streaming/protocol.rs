//! VOICE2EYE streaming protocol types
//!
//! JSON message types exchanged with the backend over the speech and gesture
//! WebSocket endpoints.
//!
//! # Protocol Overview
//!
//! 1. Connect to `ws(s)://<host>/api/speech/recognize/stream` or
//!    `ws(s)://<host>/api/gestures/analyze/stream`
//! 2. Optionally receive `connection_established`
//! 3. Stream frames as `audio_chunk` / `video_frame` text messages
//! 4. Receive recognition results (untagged JSON objects, possibly several
//!    per text frame separated by newlines)
//! 5. Exchange `heartbeat` messages while idle

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::StreamingError;

/// Audio encoding advertised in every `audio_chunk`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    /// Container/codec label, e.g. "m4a" from the mobile recorder
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            format: "m4a".to_string(),
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// Image encoding advertised in every `video_frame`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoFormat {
    /// Omitted from the wire when `None`
    pub format: Option<String>,
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            format: Some("jpeg".to_string()),
        }
    }
}

// ============================================================================
// Client Messages (sent TO the backend)
// ============================================================================

/// Messages sent from the client to the streaming endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One chunk of recorded audio
    AudioChunk {
        timestamp: DateTime<Utc>,
        /// Base64-encoded audio bytes
        data: String,
        format: String,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        channels: u16,
    },

    /// One captured camera frame
    VideoFrame {
        timestamp: DateTime<Utc>,
        /// Base64-encoded image bytes
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },

    /// Keepalive understood by the backend's connection manager
    Heartbeat { timestamp: DateTime<Utc> },
}

impl ClientMessage {
    /// Create an audio chunk message from raw encoded audio bytes
    pub fn audio_chunk(bytes: &[u8], format: &AudioFormat, timestamp: DateTime<Utc>) -> Self {
        Self::AudioChunk {
            timestamp,
            data: STANDARD.encode(bytes),
            format: format.format.clone(),
            sample_rate: format.sample_rate,
            channels: format.channels,
        }
    }

    /// Create a video frame message from raw image bytes
    pub fn video_frame(bytes: &[u8], format: &VideoFormat, timestamp: DateTime<Utc>) -> Self {
        Self::VideoFrame {
            timestamp,
            data: STANDARD.encode(bytes),
            format: format.format.clone(),
        }
    }

    /// Create a heartbeat stamped with the current time
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    /// Wire name of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::AudioChunk { .. } => "audio_chunk",
            ClientMessage::VideoFrame { .. } => "video_frame",
            ClientMessage::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Serialize to the JSON text sent over the socket
    pub fn to_json(&self) -> Result<String, StreamingError> {
        serde_json::to_string(self).map_err(|e| StreamingError::Protocol(e.to_string()))
    }
}

// ============================================================================
// Server Messages (received FROM the backend)
// ============================================================================

/// A recognition result delivered on one of the streaming endpoints
pub trait RecognitionResult:
    DeserializeOwned + std::fmt::Debug + Clone + Send + Sync + 'static
{
    fn confidence(&self) -> f32;

    fn is_emergency(&self) -> bool;

    /// Reject results that parsed but carry impossible values
    fn validate(&self) -> Result<(), String> {
        check_confidence(self.confidence())
    }
}

/// Confidence must be a finite value in `[0, 1]`
fn check_confidence(confidence: f32) -> Result<(), String> {
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {} outside [0, 1]", confidence));
    }
    Ok(())
}

/// Speech recognition result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechResult {
    pub text: String,
    pub confidence: f32,
    pub is_emergency: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// True while the utterance is still in progress
    #[serde(default)]
    pub partial: bool,
}

impl RecognitionResult for SpeechResult {
    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn is_emergency(&self) -> bool {
        self.is_emergency
    }
}

/// Hand location within the analysed frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Gesture recognition result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureResult {
    pub gesture_type: String,
    pub confidence: f32,
    pub is_emergency: bool,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub handedness: Option<String>,
    #[serde(default)]
    pub finger_count: Option<u32>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RecognitionResult for GestureResult {
    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn is_emergency(&self) -> bool {
        self.is_emergency
    }

    fn validate(&self) -> Result<(), String> {
        if self.gesture_type.trim().is_empty() {
            return Err("empty gesture_type".to_string());
        }
        if let Some(bbox) = &self.bounding_box {
            if bbox.width < 0.0 || bbox.height < 0.0 {
                return Err(format!(
                    "negative bounding box size {}x{}",
                    bbox.width, bbox.height
                ));
            }
        }
        check_confidence(self.confidence)
    }
}

/// Connection-management messages emitted by the backend's WebSocket server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    ConnectionEstablished {
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    /// Reply to our heartbeat
    Heartbeat {
        #[serde(default)]
        status: Option<String>,
    },

    /// Backend echoed a message it did not act on
    Echo,

    SubscriptionConfirmed {
        #[serde(default)]
        subscription: Option<String>,
    },

    Error {
        #[serde(default, alias = "detail")]
        message: String,
    },
}

/// One parsed inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage<R> {
    Result(R),
    Control(ControlMessage),
}

/// Parse one text frame into messages.
///
/// A frame may carry several newline-delimited JSON objects. Objects with a
/// `type` field are control messages; all others must be a valid result of
/// type `R`. Each line yields its own outcome so one bad line does not hide
/// the good ones next to it.
pub fn parse_server_messages<R: RecognitionResult>(
    text: &str,
) -> Vec<Result<ServerMessage<R>, StreamingError>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line::<R>)
        .collect()
}

fn parse_line<R: RecognitionResult>(line: &str) -> Result<ServerMessage<R>, StreamingError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| StreamingError::Protocol(e.to_string()))?;

    if !value.is_object() {
        return Err(StreamingError::Protocol(format!(
            "expected a JSON object, got: {}",
            truncate(line)
        )));
    }

    if value.get("type").is_some() {
        return serde_json::from_value::<ControlMessage>(value)
            .map(ServerMessage::Control)
            .map_err(|e| StreamingError::Protocol(e.to_string()));
    }

    let result: R =
        serde_json::from_value(value).map_err(|e| StreamingError::Protocol(e.to_string()))?;
    result.validate().map_err(StreamingError::Protocol)?;
    Ok(ServerMessage::Result(result))
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(80) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-10-23T22:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_audio_chunk_serialization() {
        let msg = ClientMessage::audio_chunk(&[1, 2, 3], &AudioFormat::default(), ts());
        let json = msg.to_json().unwrap();

        assert!(json.contains("\"type\":\"audio_chunk\""));
        assert!(json.contains("\"format\":\"m4a\""));
        assert!(json.contains("\"sampleRate\":16000"));
        assert!(json.contains("\"channels\":1"));
        assert!(json.contains("\"timestamp\":\"2025-10-23T22:00:00Z\""));
    }

    #[test]
    fn test_video_frame_omits_missing_format() {
        let msg = ClientMessage::video_frame(&[0xff, 0xd8], &VideoFormat { format: None }, ts());
        let json = msg.to_json().unwrap();

        assert!(json.contains("\"type\":\"video_frame\""));
        assert!(!json.contains("format"));

        let msg = ClientMessage::video_frame(&[0xff, 0xd8], &VideoFormat::default(), ts());
        assert!(msg.to_json().unwrap().contains("\"format\":\"jpeg\""));
    }

    #[test]
    fn test_frame_data_is_base64() {
        let msg = ClientMessage::video_frame(&[0x34, 0x12, 0x78], &VideoFormat::default(), ts());

        if let ClientMessage::VideoFrame { data, .. } = msg {
            assert_eq!(STANDARD.decode(data).unwrap(), vec![0x34, 0x12, 0x78]);
        } else {
            panic!("Expected VideoFrame");
        }
    }

    #[test]
    fn test_speech_result_deserialization() {
        let json = r#"{
            "text": "Simulated real-time speech recognition result",
            "confidence": 0.92,
            "is_emergency": false,
            "timestamp": "2025-10-23T22:00:00Z",
            "partial": true
        }"#;

        let msg: ServerMessage<SpeechResult> =
            parse_line(&json.replace('\n', " ")).expect("valid result");

        match msg {
            ServerMessage::Result(result) => {
                assert_eq!(result.text, "Simulated real-time speech recognition result");
                assert!(result.partial);
                assert_eq!(result.timestamp, Some(ts()));
            }
            _ => panic!("Expected Result"),
        }
    }

    #[test]
    fn test_gesture_result_with_bounding_box() {
        let line = r#"{"gesture_type":"two_fingers","confidence":0.81,"is_emergency":true,"bounding_box":{"x":10,"y":20,"width":64,"height":80},"finger_count":2}"#;

        let parsed = parse_server_messages::<GestureResult>(line);
        assert_eq!(parsed.len(), 1);

        match parsed.into_iter().next().unwrap() {
            Ok(ServerMessage::Result(result)) => {
                assert!(result.is_emergency());
                assert_eq!(result.finger_count, Some(2));
                assert_eq!(result.bounding_box.unwrap().width, 64.0);
            }
            other => panic!("Expected gesture result, got {:?}", other),
        }
    }

    #[test]
    fn test_newline_delimited_frame_yields_each_message() {
        let text = concat!(
            r#"{"text":"help","confidence":0.9,"is_emergency":true,"partial":false}"#,
            "\n\n",
            r#"{"type":"heartbeat","timestamp":1729720800.5,"status":"alive"}"#,
            "\n",
            r#"{"text":"me","confidence":0.7,"is_emergency":false}"#,
            "\n"
        );

        let parsed = parse_server_messages::<SpeechResult>(text);
        assert_eq!(parsed.len(), 3);
        assert!(matches!(&parsed[0], Ok(ServerMessage::Result(r)) if r.text == "help"));
        assert!(matches!(
            &parsed[1],
            Ok(ServerMessage::Control(ControlMessage::Heartbeat { .. }))
        ));
        assert!(matches!(&parsed[2], Ok(ServerMessage::Result(r)) if !r.partial));
    }

    #[test]
    fn test_control_messages() {
        let line = r#"{"type":"connection_established","client_id":"speech_1_1729720800","timestamp":1729720800.1,"message":"Connected to speech WebSocket server"}"#;
        let parsed = parse_line::<SpeechResult>(line).unwrap();
        assert!(matches!(
            parsed,
            ServerMessage::Control(ControlMessage::ConnectionEstablished { client_id: Some(ref id), .. })
                if id == "speech_1_1729720800"
        ));

        let line = r#"{"type":"error","detail":"Speech recognition failed"}"#;
        let parsed = parse_line::<SpeechResult>(line).unwrap();
        assert_eq!(
            parsed,
            ServerMessage::Control(ControlMessage::Error {
                message: "Speech recognition failed".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        // Unknown control type
        assert!(parse_line::<SpeechResult>(r#"{"type":"bogus"}"#).is_err());
        // Not JSON
        assert!(parse_line::<SpeechResult>("Echo: hello").is_err());
        // Not an object
        assert!(parse_line::<SpeechResult>("[1,2,3]").is_err());
        // Missing required field
        assert!(parse_line::<SpeechResult>(r#"{"text":"hi","confidence":0.5}"#).is_err());
        // Confidence out of range
        assert!(parse_line::<SpeechResult>(
            r#"{"text":"hi","confidence":1.5,"is_emergency":false}"#
        )
        .is_err());
        // Empty gesture label
        assert!(parse_line::<GestureResult>(
            r#"{"gesture_type":" ","confidence":0.5,"is_emergency":false}"#
        )
        .is_err());
    }

    #[test]
    fn test_gesture_confidence_is_range_checked() {
        let base = GestureResult {
            gesture_type: "fist".to_string(),
            confidence: 0.5,
            is_emergency: false,
            bounding_box: None,
            handedness: None,
            finger_count: None,
            timestamp: None,
        };
        assert!(base.validate().is_ok());

        for confidence in [1.5, -0.1, f32::NAN, f32::INFINITY] {
            let result = GestureResult {
                confidence,
                ..base.clone()
            };
            assert!(result.validate().is_err(), "accepted {}", confidence);
        }
        assert!(parse_line::<GestureResult>(
            r#"{"gesture_type":"fist","confidence":1.01,"is_emergency":false}"#
        )
        .is_err());
    }

    #[test]
    fn test_format_defaults() {
        let audio = AudioFormat::default();
        assert_eq!(audio.format, "m4a");
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.channels, 1);
        assert_eq!(VideoFormat::default().format.as_deref(), Some("jpeg"));
    }
}
