//! Response bodies of the backend's REST endpoints.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response from `GET /api/health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Service name → state, e.g. `"speech": "operational"`
    #[serde(default)]
    pub services: HashMap<String, String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }

    /// Services whose state is anything other than "operational"
    pub fn degraded_services(&self) -> Vec<&str> {
        let mut degraded: Vec<&str> = self
            .services
            .iter()
            .filter(|(_, state)| !state.eq_ignore_ascii_case("operational"))
            .map(|(name, _)| name.as_str())
            .collect();
        degraded.sort_unstable();
        degraded
    }
}

/// Response from `GET /api/health/{service}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: String,
    #[serde(default)]
    pub details: Option<String>,
}

/// Response from `GET /api/speech/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechStatus {
    pub service: String,
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub last_recognition: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_requests: u64,
}

/// Response from `GET /api/gestures/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureStatus {
    pub service: String,
    pub status: String,
    #[serde(default)]
    pub camera_available: bool,
    #[serde(default)]
    pub last_detection: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_detections: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureDefinition {
    pub description: String,
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub finger_count: Option<u8>,
}

/// Response from `GET /api/gestures/vocabulary`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureVocabulary {
    /// Keyed by gesture type, the same labels results carry in `gesture_type`
    pub gestures: BTreeMap<String, GestureDefinition>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub confidence_threshold: f32,
}

impl GestureVocabulary {
    /// Gesture types that raise an emergency alert
    pub fn emergency_gestures(&self) -> Vec<&str> {
        self.gestures
            .iter()
            .filter(|(_, def)| def.emergency)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn describe(&self, gesture_type: &str) -> Option<&str> {
        self.gestures
            .get(gesture_type)
            .map(|def| def.description.as_str())
    }
}
