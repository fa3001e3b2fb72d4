//! Configuration for the voice session
//!
//! Settings come from, lowest precedence first: built-in defaults, an
//! optional TOML file, and `VOICE_*` environment variables
//! (`VOICE_TOKEN_ENDPOINT`, `VOICE_HUB_URL`, ...). Durations are in
//! milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{VoiceError, VoiceResult};
use crate::recovery::RetryConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "VOICE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the backend; the token is read from `{base}/call/token`
    pub token_endpoint: String,
    /// Credential of the authenticated dashboard session, sent as a bearer token
    pub bearer_token: Option<String>,
    pub request_timeout_ms: u64,

    /// Connect to the agent hub at all; when false the session is call-only
    pub presence_enabled: bool,
    /// WebSocket URL of the agent hub
    pub hub_url: String,
    /// Connect attempts before the session degrades to call-only
    pub hub_connect_attempts: u32,
    pub hub_connect_backoff_ms: u64,
    pub hub_handshake_timeout_ms: u64,
    /// Delays between automatic reconnect attempts; the hub gives up after the last one
    pub hub_reconnect_delays_ms: Vec<u64>,

    /// Capacity of the session event broadcast channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_endpoint: "http://localhost:5000".to_string(),
            bearer_token: None,
            request_timeout_ms: 10_000,
            presence_enabled: true,
            hub_url: "ws://localhost:5000/hubs/agents".to_string(),
            hub_connect_attempts: 3,
            hub_connect_backoff_ms: 1_000,
            hub_handshake_timeout_ms: 10_000,
            hub_reconnect_delays_ms: vec![0, 2_000, 10_000, 30_000],
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from an optional TOML file, then apply `VOICE_*` overrides
    pub fn load(path: Option<&Path>) -> VoiceResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("hub_reconnect_delays_ms"),
        );

        let loaded: SessionConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> VoiceResult<()> {
        let endpoint = Url::parse(&self.token_endpoint).map_err(|e| VoiceError::InvalidConfiguration {
            field: "token_endpoint".to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(VoiceError::InvalidConfiguration {
                field: "token_endpoint".to_string(),
                reason: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }

        if self.request_timeout_ms == 0 {
            return Err(VoiceError::InvalidConfiguration {
                field: "request_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.presence_enabled {
            let hub = Url::parse(&self.hub_url).map_err(|e| VoiceError::InvalidConfiguration {
                field: "hub_url".to_string(),
                reason: e.to_string(),
            })?;
            if !matches!(hub.scheme(), "ws" | "wss") {
                return Err(VoiceError::InvalidConfiguration {
                    field: "hub_url".to_string(),
                    reason: "must be a ws:// or wss:// URL".to_string(),
                });
            }
            if self.hub_connect_attempts == 0 {
                return Err(VoiceError::InvalidConfiguration {
                    field: "hub_connect_attempts".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        if self.event_capacity == 0 {
            return Err(VoiceError::InvalidConfiguration {
                field: "event_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn hub_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.hub_handshake_timeout_ms)
    }

    pub fn hub_reconnect_delays(&self) -> Vec<Duration> {
        self.hub_reconnect_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }

    /// Retry policy for the initial hub connect
    pub fn hub_connect_retry(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(self.hub_connect_attempts)
            .with_initial_delay(Duration::from_millis(self.hub_connect_backoff_ms))
    }

    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    pub fn with_bearer_token(mut self, bearer: impl Into<String>) -> Self {
        self.bearer_token = Some(bearer.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_hub_url(mut self, url: impl Into<String>) -> Self {
        self.hub_url = url.into();
        self
    }

    pub fn with_presence(mut self, enabled: bool) -> Self {
        self.presence_enabled = enabled;
        self
    }

    pub fn with_hub_connect_attempts(mut self, attempts: u32) -> Self {
        self.hub_connect_attempts = attempts;
        self
    }

    pub fn with_hub_reconnect_delays(mut self, delays: &[Duration]) -> Self {
        self.hub_reconnect_delays_ms = delays.iter().map(|d| d.as_millis() as u64).collect();
        self
    }
}
