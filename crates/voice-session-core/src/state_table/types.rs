use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{CallStatus, OfferId, PendingCallOffer, PresenceState};

/// Provisioning attempt counter
///
/// Every call to `initialize()` opens a new epoch. Outcomes tagged with an
/// older epoch are stale and get discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProvisioningEpoch(pub u64);

impl fmt::Display for ProvisioningEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch-{}", self.0)
    }
}

/// Normalized events produced by the voice device adapter
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Registered,
    Incoming(PendingCallOffer),
    /// The remote side answered an outbound call
    Accepted { offer_id: Option<OfferId> },
    /// A media session ended; `offer_id` names the call object when known
    Disconnect { offer_id: Option<OfferId> },
    Unregistered,
    Error { message: String },
    TokenWillExpire,
}

/// Lifecycle events of the presence hub transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Connecting,
    Connected,
    Reconnecting,
    Reconnected,
    Closed { error: Option<String> },
}

/// Actions invoked by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    CallOut { destination: String },
    Hangup,
    AnswerCall { offer_id: OfferId },
    RejectCall { offer_id: OfferId },
    ToggleMute,
}

impl UserAction {
    pub fn name(&self) -> &'static str {
        match self {
            UserAction::CallOut { .. } => "call_out",
            UserAction::Hangup => "hangup",
            UserAction::AnswerCall { .. } => "answer_call",
            UserAction::RejectCall { .. } => "reject_call",
            UserAction::ToggleMute => "toggle_mute",
        }
    }
}

/// Result of one provisioning attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningOutcome {
    Registered,
    Failed { reason: String },
}

/// Every input the state machine reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Device(DeviceEvent),
    Hub(HubEvent),
    User(UserAction),
    /// The session context is being torn down
    Teardown,
    Provisioning {
        epoch: ProvisioningEpoch,
        outcome: ProvisioningOutcome,
    },
    TimerTick { generation: u64 },
}

impl SessionInput {
    /// Short name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            SessionInput::Device(DeviceEvent::Registered) => "device.registered",
            SessionInput::Device(DeviceEvent::Incoming(_)) => "device.incoming",
            SessionInput::Device(DeviceEvent::Accepted { .. }) => "device.accepted",
            SessionInput::Device(DeviceEvent::Disconnect { .. }) => "device.disconnect",
            SessionInput::Device(DeviceEvent::Unregistered) => "device.unregistered",
            SessionInput::Device(DeviceEvent::Error { .. }) => "device.error",
            SessionInput::Device(DeviceEvent::TokenWillExpire) => "device.token_will_expire",
            SessionInput::Hub(_) => "hub",
            SessionInput::User(action) => action.name(),
            SessionInput::Teardown => "teardown",
            SessionInput::Provisioning { .. } => "provisioning.outcome",
            SessionInput::TimerTick { .. } => "timer.tick",
        }
    }
}

/// Side effects requested by a transition, executed in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Dial a normalized destination for the call numbered `call`
    ConnectDevice { destination: String, call: u64 },
    DisconnectAll,
    AcceptOffer { offer_id: OfferId, call: u64 },
    RejectOffer { offer_id: OfferId },
    SetMuted { offer_id: Option<OfferId>, muted: bool },
    Announce(PresenceState),
    StartTimer { generation: u64 },
    StopTimer,
    RefreshToken,
}

impl Action {
    /// The call a call-scoped action was issued for
    pub fn call(&self) -> Option<u64> {
        match self {
            Action::ConnectDevice { call, .. } | Action::AcceptOffer { call, .. } => Some(*call),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::ConnectDevice { .. } => "connect_device",
            Action::DisconnectAll => "disconnect_all",
            Action::AcceptOffer { .. } => "accept_offer",
            Action::RejectOffer { .. } => "reject_offer",
            Action::SetMuted { .. } => "set_muted",
            Action::Announce(_) => "announce",
            Action::StartTimer { .. } => "start_timer",
            Action::StopTimer => "stop_timer",
            Action::RefreshToken => "refresh_token",
        }
    }
}

/// Events published to subscribers after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum EventTemplate {
    StatusChanged {
        previous: CallStatus,
        new: CallStatus,
        reason: String,
    },
    OfferAdded(PendingCallOffer),
    OfferRemoved(OfferId),
}

/// Outcome of applying one input
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transition {
    /// Side effects, in the order they must run
    pub actions: Vec<Action>,
    /// Status after the input was applied, when it changed
    pub next_state: Option<CallStatus>,
    pub publish_events: Vec<EventTemplate>,
    /// Set when the input was deliberately discarded
    pub ignored: Option<&'static str>,
}

impl Transition {
    pub fn ignored(reason: &'static str) -> Self {
        Self {
            ignored: Some(reason),
            ..Default::default()
        }
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored.is_some()
    }
}
