//! Session events published to subscribers
//!
//! The snapshot on the watch channel is the state to render; these events
//! are the history of how it got there. `Ended` only ever appears here,
//! never as a resting snapshot status.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state_table::types::EventTemplate;
use crate::types::{CallStatus, OfferId, PendingCallOffer};

/// Event priority levels for filtering
///
/// ```rust
/// use voice_session_core::events::EventPriority;
///
/// assert!(EventPriority::High > EventPriority::Normal);
/// assert!(EventPriority::Normal > EventPriority::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged {
        previous: CallStatus,
        new: CallStatus,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    OfferAdded {
        offer: PendingCallOffer,
    },
    OfferRemoved {
        offer_id: OfferId,
    },
    /// A side effect failed; the status may or may not have changed
    ActionFailed {
        action: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn action_failed(action: impl Into<String>, error: impl ToString) -> Self {
        SessionEvent::ActionFailed {
            action: action.into(),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            SessionEvent::StatusChanged { new, .. } if new.is_error() => EventPriority::High,
            SessionEvent::ActionFailed { .. } => EventPriority::High,
            SessionEvent::OfferAdded { .. } => EventPriority::High,
            SessionEvent::StatusChanged { .. } => EventPriority::Normal,
            SessionEvent::OfferRemoved { .. } => EventPriority::Low,
        }
    }
}

impl From<EventTemplate> for SessionEvent {
    fn from(template: EventTemplate) -> Self {
        match template {
            EventTemplate::StatusChanged { previous, new, reason } => SessionEvent::StatusChanged {
                previous,
                new,
                reason,
                timestamp: Utc::now(),
            },
            EventTemplate::OfferAdded(offer) => SessionEvent::OfferAdded { offer },
            EventTemplate::OfferRemoved(offer_id) => SessionEvent::OfferRemoved { offer_id },
        }
    }
}
