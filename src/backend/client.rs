//! HTTP client for the backend's health, status and vocabulary endpoints.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::types::{GestureStatus, GestureVocabulary, HealthReport, ServiceHealth, SpeechStatus};
use crate::config::ClientSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by [`BackendClient`]
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Network/HTTP error
    Network(String),
    /// The backend answered with a non-success status
    Api { status: u16, message: String },
    /// The response body did not match the expected shape
    Parse(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Network(e) => write!(f, "Network error: {}", e),
            BackendError::Api { status, message } => {
                write!(f, "Backend error ({}): {}", status, message)
            }
            BackendError::Parse(e) => write!(f, "Failed to parse backend response: {}", e),
        }
    }
}

impl std::error::Error for BackendError {}

/// FastAPI error body
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Client for the REST side of the backend
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, BackendError> {
        Self::new(settings.base_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthReport, BackendError> {
        self.get("/api/health").await
    }

    /// Health of one service: `speech`, `gestures`, `emergency` or `storage`
    pub async fn service_health(&self, service: &str) -> Result<ServiceHealth, BackendError> {
        self.get(&format!("/api/health/{}", service)).await
    }

    pub async fn speech_status(&self) -> Result<SpeechStatus, BackendError> {
        self.get("/api/speech/status").await
    }

    pub async fn gesture_status(&self) -> Result<GestureStatus, BackendError> {
        self.get("/api/gestures/status").await
    }

    pub async fn gesture_vocabulary(&self) -> Result<GestureVocabulary, BackendError> {
        self.get("/api/gestures/vocabulary").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body, status.canonical_reason());
            log::warn!("GET {} failed ({}): {}", path, status.as_u16(), message);
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }
}

/// Pull `detail` out of a FastAPI error body, falling back to the raw text
fn error_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.detail;
    }
    let body = body.trim();
    if body.is_empty() {
        reason.unwrap_or("Unknown error").to_string()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_detail() {
        assert_eq!(
            error_message(r#"{"detail":"Gesture analysis failed"}"#, Some("Internal Server Error")),
            "Gesture analysis failed"
        );
        assert_eq!(error_message("upstream down", None), "upstream down");
        assert_eq!(error_message("  ", Some("Not Found")), "Not Found");
        assert_eq!(error_message("", None), "Unknown error");
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = BackendClient::new("http://localhost:8000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::Api {
            status: 503,
            message: "maintenance".to_string(),
        };
        assert_eq!(err.to_string(), "Backend error (503): maintenance");
    }
}
