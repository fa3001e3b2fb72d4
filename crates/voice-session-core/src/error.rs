//! Error types and handling for the voice session core
//!
//! This module defines all error types that can occur while provisioning,
//! registering and driving a call session, and how each maps onto the
//! user-visible call status.
//!
//! # Error Categories
//!
//! - **Provisioning Errors** - The voice token could not be fetched; the
//!   session attempt ends in `LoginError`
//! - **Presence Errors** - The agent hub is unreachable; the session degrades
//!   to call-only operation
//! - **Device Errors** - The voice SDK reported a failure; surfaces as
//!   `ConnectionError`
//! - **State Errors** - An action was not valid for the current state
//!
//! # Error Handling Guide
//!
//! ```rust
//! use voice_session_core::VoiceError;
//!
//! let err = VoiceError::token_fetch("token endpoint returned 503");
//! assert_eq!(err.category(), "provisioning");
//! assert!(err.is_recoverable());
//!
//! let err = VoiceError::InvalidConfiguration {
//!     field: "token_endpoint".to_string(),
//!     reason: "must be an absolute URL".to_string(),
//! };
//! assert!(!err.is_recoverable());
//! ```

use thiserror::Error;

use crate::types::CallStatus;

/// Result type alias for voice session operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Error types for voice session operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// The credential provisioning request failed
    #[error("Token fetch failed: {reason}")]
    TokenFetch { reason: String },

    /// The token endpoint answered with a non-success status
    #[error("Token endpoint returned HTTP {status}")]
    TokenEndpointStatus { status: u16 },

    /// The presence hub could not be reached after the connect policy ran out
    #[error("Presence hub connect failed: {reason}")]
    HubConnect { reason: String },

    /// A presence hub invocation failed
    #[error("Presence hub invocation '{target}' failed: {reason}")]
    HubInvocation { target: String, reason: String },

    /// The presence hub transport is closed
    #[error("Presence hub transport closed")]
    HubClosed,

    /// The voice SDK reported an error
    #[error("Device error: {reason}")]
    Device { reason: String },

    /// The voice device has not been registered yet
    #[error("Voice device is not registered")]
    DeviceNotRegistered,

    /// Reserved for signaling timeouts; not raised by the current flows
    #[error("Signaling timeout after {duration_ms}ms")]
    SignalingTimeout { duration_ms: u64 },

    #[error("Action '{action}' is not valid in state {status}")]
    InvalidState { action: String, status: CallStatus },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Configuration source could not be loaded
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl VoiceError {
    /// Create a token fetch error
    pub fn token_fetch(reason: impl Into<String>) -> Self {
        Self::TokenFetch { reason: reason.into() }
    }

    /// Create a presence hub connect error
    pub fn hub_connect(reason: impl Into<String>) -> Self {
        Self::HubConnect { reason: reason.into() }
    }

    /// Create a presence hub invocation error
    pub fn hub_invocation(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HubInvocation { target: target.into(), reason: reason.into() }
    }

    /// Create a device error
    pub fn device(reason: impl Into<String>) -> Self {
        Self::Device { reason: reason.into() }
    }

    /// Create a network error
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network { reason: reason.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if this error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            VoiceError::TokenFetch { .. }
            | VoiceError::HubConnect { .. }
            | VoiceError::HubInvocation { .. }
            | VoiceError::Network { .. }
            | VoiceError::OperationTimeout { .. }
            | VoiceError::SignalingTimeout { .. } => true,

            VoiceError::TokenEndpointStatus { status } => *status >= 500 || *status == 429,

            VoiceError::InvalidConfiguration { .. }
            | VoiceError::Config { .. }
            | VoiceError::InvalidState { .. } => false,

            _ => false,
        }
    }

    /// Check if this error ends a provisioning attempt
    pub fn is_provisioning_error(&self) -> bool {
        matches!(
            self,
            VoiceError::TokenFetch { .. }
                | VoiceError::TokenEndpointStatus { .. }
                | VoiceError::DeviceNotRegistered
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            VoiceError::TokenFetch { .. } | VoiceError::TokenEndpointStatus { .. } => "provisioning",

            VoiceError::HubConnect { .. }
            | VoiceError::HubInvocation { .. }
            | VoiceError::HubClosed => "presence",

            VoiceError::Device { .. }
            | VoiceError::DeviceNotRegistered
            | VoiceError::SignalingTimeout { .. } => "device",

            VoiceError::InvalidState { .. } => "call",

            VoiceError::InvalidConfiguration { .. } | VoiceError::Config { .. } => "configuration",

            VoiceError::Network { .. } => "network",

            VoiceError::OperationTimeout { .. } | VoiceError::Internal { .. } => "system",
        }
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config { reason: err.to_string() }
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VoiceError::token_fetch(format!("request timed out: {}", err))
        } else if let Some(status) = err.status() {
            VoiceError::TokenEndpointStatus { status: status.as_u16() }
        } else {
            VoiceError::token_fetch(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(VoiceError::token_fetch("x").category(), "provisioning");
        assert_eq!(VoiceError::hub_connect("x").category(), "presence");
        assert_eq!(VoiceError::device("x").category(), "device");
        assert_eq!(VoiceError::HubClosed.category(), "presence");
    }

    #[test]
    fn test_endpoint_status_recoverability() {
        assert!(VoiceError::TokenEndpointStatus { status: 503 }.is_recoverable());
        assert!(VoiceError::TokenEndpointStatus { status: 429 }.is_recoverable());
        assert!(!VoiceError::TokenEndpointStatus { status: 403 }.is_recoverable());
        assert!(VoiceError::TokenEndpointStatus { status: 403 }.is_provisioning_error());
    }

    #[test]
    fn test_display() {
        let err = VoiceError::InvalidState {
            action: "answer_call".to_string(),
            status: CallStatus::Idle,
        };
        assert_eq!(err.to_string(), "Action 'answer_call' is not valid in state idle");
    }
}
