use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::streaming::{AudioFormat, ReconnectPolicy, VideoFormat, MAX_FRAME_RETRIES};

const SETTINGS_DIR_NAME: &str = "voice2eye";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Environment variable selecting `development` or `production`
pub const ENV_VAR_ENVIRONMENT: &str = "VOICE2EYE_ENV";

/// Environment variable overriding the API base URL outright
pub const ENV_VAR_API_URL: &str = "VOICE2EYE_API_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(Environment::Development),
            "prod" | "production" => Some(Environment::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Which backend host to talk to.
    pub environment: Environment,

    /// REST base URL used in development (LAN address of the dev machine).
    pub development_url: String,

    /// REST base URL used in production.
    pub production_url: String,

    /// How long `connect()` waits for the socket to report open.
    pub open_timeout_ms: u64,

    /// Backoff used after unexpected disconnects.
    pub reconnect: ReconnectSettings,

    /// Failed retries tolerated per queued frame before it is dropped.
    pub max_frame_retries: u32,

    /// Cadence at which the capture loop pulls buffered audio.
    pub capture_interval_ms: u64,

    /// Keepalive interval while connected; 0 disables heartbeats.
    pub heartbeat_interval_ms: u64,

    pub audio: AudioFormat,

    pub video: VideoFormat,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            development_url: "http://localhost:8000".to_string(),
            production_url: "https://api.voice2eye.app".to_string(),
            open_timeout_ms: 1000,
            reconnect: ReconnectSettings::default(),
            max_frame_retries: MAX_FRAME_RETRIES,
            capture_interval_ms: 100,
            heartbeat_interval_ms: 30_000,
            audio: AudioFormat::default(),
            video: VideoFormat::default(),
        }
    }
}

impl ClientSettings {
    /// REST base URL for the selected environment, without trailing slash
    pub fn base_url(&self) -> &str {
        let url = match self.environment {
            Environment::Development => &self.development_url,
            Environment::Production => &self.production_url,
        };
        url.trim_end_matches('/')
    }

    /// Full REST URL for an API path such as `/api/health`
    pub fn api_url(&self, path: &str) -> String {
        join_url(self.base_url(), path)
    }

    /// WebSocket URL for a streaming path, derived from the REST base URL
    pub fn websocket_url(&self, path: &str) -> String {
        join_url(&to_websocket_scheme(self.base_url()), path)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    /// Apply `VOICE2EYE_ENV` / `VOICE2EYE_API_URL` from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_VAR_ENVIRONMENT).ok().as_deref(),
            std::env::var(ENV_VAR_API_URL).ok().as_deref(),
        );
    }

    fn apply_overrides(&mut self, environment: Option<&str>, api_url: Option<&str>) {
        if let Some(value) = environment {
            match Environment::parse(value) {
                Some(env) => self.environment = env,
                None => log::warn!("Settings: ignoring unknown {}={:?}", ENV_VAR_ENVIRONMENT, value),
            }
        }

        if let Some(url) = api_url {
            self.override_base_url(url);
        }
    }

    /// Replace the base URL of the selected environment; blank input is ignored
    pub fn override_base_url(&mut self, url: &str) {
        let url = url.trim();
        if url.is_empty() {
            return;
        }
        match self.environment {
            Environment::Development => self.development_url = url.to_string(),
            Environment::Production => self.production_url = url.to_string(),
        }
    }
}

/// Swap `http` for `ws` (and `https` for `wss`); other schemes pass through
pub fn to_websocket_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Default location of `settings.json` in the platform config directory
pub fn default_settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings(path: &Path) -> ClientSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<ClientSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                ClientSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            ClientSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &ClientSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write to a sibling temp file and rename so a crash never leaves a half-written file
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // Windows rename fails when the destination exists
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_substitutes_scheme() {
        let settings = ClientSettings::default();
        assert_eq!(
            settings.websocket_url("/api/speech/recognize/stream"),
            "ws://localhost:8000/api/speech/recognize/stream"
        );

        let settings = ClientSettings {
            environment: Environment::Production,
            production_url: "https://backend.example.org/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.websocket_url("api/gestures/analyze/stream"),
            "wss://backend.example.org/api/gestures/analyze/stream"
        );
        assert_eq!(
            settings.api_url("/api/health"),
            "https://backend.example.org/api/health"
        );
    }

    #[test]
    fn test_to_websocket_scheme_passthrough() {
        assert_eq!(to_websocket_scheme("ws://host:1"), "ws://host:1");
        assert_eq!(to_websocket_scheme("http://host:1"), "ws://host:1");
    }

    #[test]
    fn test_defaults_match_policy() {
        let settings = ClientSettings::default();
        let policy = settings.reconnect_policy();
        assert_eq!(policy, ReconnectPolicy::default());
        assert_eq!(settings.open_timeout(), Duration::from_secs(1));
        assert_eq!(settings.capture_interval(), Duration::from_millis(100));
        assert_eq!(settings.heartbeat_interval(), Some(Duration::from_secs(30)));
        assert_eq!(settings.max_frame_retries, 3);
    }

    #[test]
    fn test_zero_heartbeat_disables() {
        let settings = ClientSettings {
            heartbeat_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(settings.heartbeat_interval(), None);
    }

    #[test]
    fn test_overrides() {
        let mut settings = ClientSettings::default();
        settings.apply_overrides(Some("production"), Some("https://staging.example.org"));
        assert_eq!(settings.environment, Environment::Production);
        assert_eq!(settings.base_url(), "https://staging.example.org");

        let mut settings = ClientSettings::default();
        settings.apply_overrides(Some("qa"), None);
        assert_eq!(settings.environment, Environment::Development);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: ClientSettings =
            serde_json::from_str(r#"{"environment":"production","reconnect":{"max_attempts":2}}"#)
                .unwrap();
        assert_eq!(settings.environment, Environment::Production);
        assert_eq!(settings.reconnect.max_attempts, 2);
        assert_eq!(settings.reconnect.base_delay_ms, 1000);
        assert_eq!(settings.audio.sample_rate, 16000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);

        let settings = ClientSettings {
            capture_interval_ms: 250,
            ..Default::default()
        };
        save_settings(&path, &settings).unwrap();

        assert_eq!(load_settings(&path), settings);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(load_settings(&path), ClientSettings::default());
        assert_eq!(
            load_settings(&dir.path().join("missing.json")),
            ClientSettings::default()
        );
    }
}
