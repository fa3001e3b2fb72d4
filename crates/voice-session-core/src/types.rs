//! Core data types for the call session
//!
//! These are the values the state machine owns and the presentation layer
//! reads: the call status, the agent identity, the pending offers and the
//! active call.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VoiceError, VoiceResult};

/// Lifecycle status of the phone line
///
/// Exactly one status is active at any instant. Transitions performed by the
/// state machine are the only way to change it.
///
/// # Examples
///
/// ```rust
/// use voice_session_core::CallStatus;
///
/// assert_eq!(CallStatus::ConnectionError.to_string(), "connection_error");
/// assert!(CallStatus::Ready.is_idle());
/// assert!(CallStatus::Connected.is_call_in_progress());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Nothing is happening and no device is registered yet
    Idle,
    /// A token is being fetched and the device registered
    Registering,
    /// The device is registered and can place or receive calls
    Ready,
    /// At least one inbound offer is waiting for an answer
    Ringing,
    /// An outbound call is being placed
    Calling,
    /// A call is established
    Connected,
    /// A call just ended; transient, never the resting status
    Ended,
    /// The session context was torn down
    Disconnected,
    /// The device lost its registration
    Unregistered,
    /// The device reported an error
    ConnectionError,
    /// Provisioning or registration failed
    LoginError,
}

impl CallStatus {
    /// All statuses, in declaration order
    pub const ALL: [CallStatus; 11] = [
        CallStatus::Idle,
        CallStatus::Registering,
        CallStatus::Ready,
        CallStatus::Ringing,
        CallStatus::Calling,
        CallStatus::Connected,
        CallStatus::Ended,
        CallStatus::Disconnected,
        CallStatus::Unregistered,
        CallStatus::ConnectionError,
        CallStatus::LoginError,
    ];

    /// Status string surfaced to the UI
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Idle => "idle",
            CallStatus::Registering => "registering",
            CallStatus::Ready => "ready",
            CallStatus::Ringing => "ringing",
            CallStatus::Calling => "calling",
            CallStatus::Connected => "connected",
            CallStatus::Ended => "ended",
            CallStatus::Disconnected => "disconnected",
            CallStatus::Unregistered => "unregistered",
            CallStatus::ConnectionError => "connection_error",
            CallStatus::LoginError => "login_error",
        }
    }

    /// Idle-like states from which an outbound call may be placed
    pub fn is_idle(&self) -> bool {
        matches!(self, CallStatus::Idle | CallStatus::Ready)
    }

    /// Check if a call (outbound or answered) is in progress
    pub fn is_call_in_progress(&self) -> bool {
        matches!(self, CallStatus::Calling | CallStatus::Connected)
    }

    /// States from which the provisioning flow may be (re)started
    pub fn can_initialize(&self) -> bool {
        matches!(
            self,
            CallStatus::Idle
                | CallStatus::Ready
                | CallStatus::Disconnected
                | CallStatus::Unregistered
                | CallStatus::ConnectionError
                | CallStatus::LoginError
        )
    }

    /// Check if this status reports a failure to the user
    pub fn is_error(&self) -> bool {
        matches!(self, CallStatus::ConnectionError | CallStatus::LoginError)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the signed-in agent
///
/// Used both as the voice device registration identity and the presence hub
/// registration key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity(String);

impl AgentIdentity {
    /// Create an identity, rejecting blank values
    pub fn new(identity: impl Into<String>) -> VoiceResult<Self> {
        let identity = identity.into();
        if identity.trim().is_empty() {
            return Err(VoiceError::InvalidConfiguration {
                field: "identity".to_string(),
                reason: "agent identity cannot be empty".to_string(),
            });
        }
        Ok(Self(identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short-lived voice access credential
///
/// Never persisted and never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct VoiceToken(String);

impl VoiceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value, for handing to the device SDK
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for VoiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoiceToken(<redacted, {} bytes>)", self.0.len())
    }
}

/// Identifier of one inbound call offer, issued by the device SDK
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferId(pub String);

impl OfferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OfferId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One inbound call invitation, independently answerable or rejectable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCallOffer {
    /// Unique offer identifier
    pub id: OfferId,
    /// When the offer was accepted; `None` while it is pending
    pub accepted_at: Option<DateTime<Utc>>,
    /// Caller reported by the SDK (`From` parameter), if any
    pub caller: Option<String>,
    /// When the offer arrived
    pub received_at: DateTime<Utc>,
}

impl PendingCallOffer {
    pub fn new(id: impl Into<OfferId>) -> Self {
        Self {
            id: id.into(),
            accepted_at: None,
            caller: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

impl From<String> for OfferId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The call currently holding the line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCall {
    /// Offer this call was answered from; `None` for outbound calls
    pub offer_id: Option<OfferId>,
    /// When media was connected; `None` while an outbound call is dialing
    pub started_at: Option<DateTime<Utc>>,
    /// Whether the local microphone is muted
    pub muted: bool,
    /// Normalized destination of an outbound call
    pub destination: Option<String>,
    /// Session-unique call number, stamped by the state machine
    #[serde(default)]
    pub generation: u64,
}

impl ActiveCall {
    /// Outbound call that is still dialing
    pub fn outbound(destination: impl Into<String>) -> Self {
        Self {
            offer_id: None,
            started_at: None,
            muted: false,
            destination: Some(destination.into()),
            generation: 0,
        }
    }

    /// Inbound call promoted from an accepted offer
    pub fn answered(offer: &PendingCallOffer) -> Self {
        Self {
            offer_id: Some(offer.id.clone()),
            started_at: offer.accepted_at.or_else(|| Some(Utc::now())),
            muted: false,
            destination: None,
            generation: 0,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }
}

/// Availability announced to the agent hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Available,
    Busy,
}

impl PresenceState {
    /// Wire value used by `SetAgentState`
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Available => "available",
            PresenceState::Busy => "busy",
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PresenceState {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(PresenceState::Available),
            "busy" => Ok(PresenceState::Busy),
            other => Err(VoiceError::InvalidConfiguration {
                field: "presence_state".to_string(),
                reason: format!("unknown presence state '{}'", other),
            }),
        }
    }
}

/// Lifecycle of the presence hub connection, informational only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceLink {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Everything the presentation layer needs to render the phone line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub status: CallStatus,
    pub is_muted: bool,
    /// Pending offers in arrival order
    pub incoming_calls: Vec<PendingCallOffer>,
    pub active_call: Option<ActiveCall>,
    /// Seconds since the current call connected
    pub duration_secs: u64,
    pub presence_link: PresenceLink,
    pub last_error: Option<String>,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            status: CallStatus::Idle,
            is_muted: false,
            incoming_calls: Vec::new(),
            active_call: None,
            duration_secs: 0,
            presence_link: PresenceLink::Disconnected,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip_through_serde() {
        for status in CallStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_identity_rejects_blank() {
        assert!(AgentIdentity::new("   ").is_err());
        assert_eq!(AgentIdentity::new("agent-7").unwrap().as_str(), "agent-7");
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = VoiceToken::new("eyJhbGciOi.secret");
        let printed = format!("{:?}", token);
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_presence_parse() {
        assert_eq!("Busy".parse::<PresenceState>().unwrap(), PresenceState::Busy);
        assert!("away".parse::<PresenceState>().is_err());
    }
}
