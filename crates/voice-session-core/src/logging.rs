//! Tracing subscriber setup for binaries embedding the session
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary. Output goes to stderr so anything a tool prints on stdout
//! stays machine-readable.

use std::fmt;
use std::str::FromStr;

use tracing::{info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::config::SessionConfig;
use crate::error::{VoiceError, VoiceResult};

/// Crates whose debug output drowns out call-state logs
const TRANSPORT_CRATES: [&str; 5] = ["hyper", "reqwest", "rustls", "tungstenite", "tokio_tungstenite"];

/// Line format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    /// One JSON object per line, for log shippers
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Full => "full",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(VoiceError::InvalidConfiguration {
                field: "log_format".to_string(),
                reason: format!("unknown log format '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for everything not otherwise filtered
    pub level: Level,
    pub format: LogFormat,
    /// Include file and line of each event
    pub source_location: bool,
    /// Cap HTTP, TLS and WebSocket crates at `warn`
    pub quiet_transport: bool,
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            format: LogFormat::Full,
            source_location: false,
            quiet_transport: true,
            app_name: "voice-agent".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_source_location(mut self) -> Self {
        self.source_location = true;
        self
    }

    /// Let transport crates log at the main level
    pub fn with_transport_logs(mut self) -> Self {
        self.quiet_transport = false;
        self
    }

    /// Filter directives, most general first
    pub fn directives(&self) -> Vec<String> {
        let mut directives = vec![self.level.to_string().to_lowercase()];
        if self.quiet_transport && self.level > Level::WARN {
            directives.extend(TRANSPORT_CRATES.iter().map(|krate| format!("{}=warn", krate)));
        }
        directives
    }

    /// `RUST_LOG` wins when set; otherwise the configured directives apply
    fn env_filter(&self) -> VoiceResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }

        let mut filter = EnvFilter::default();
        for directive in self.directives() {
            let parsed: Directive = directive.parse().map_err(|e| VoiceError::InvalidConfiguration {
                field: "log_level".to_string(),
                reason: format!("bad filter directive '{}': {}", directive, e),
            })?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Install the global subscriber; fails if one is already installed
pub fn setup_logging(config: &LoggingConfig) -> VoiceResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_writer(std::io::stderr)
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    let installed = match config.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| VoiceError::internal(format!("failed to install tracing subscriber: {}", e)))
}

pub fn parse_log_level(level: &str) -> VoiceResult<Level> {
    Level::from_str(level.trim()).map_err(|_| VoiceError::InvalidConfiguration {
        field: "log_level".to_string(),
        reason: format!("Invalid log level: {}", level),
    })
}

/// Record where this process will fetch tokens and announce presence
///
/// The bearer credential itself is never logged.
pub fn log_startup(app_name: &str, version: &str, config: &SessionConfig) {
    info!(
        app = app_name,
        version,
        token_endpoint = %config.token_endpoint,
        bearer = config.bearer_token.is_some(),
        presence = config.presence_enabled,
        hub_url = %config.hub_url,
        "Voice agent starting"
    );
}
