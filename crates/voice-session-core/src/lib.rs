//! # Voice Session Core
//!
//! Call-session coordination for a browser-hosted voice agent. Three
//! independent event sources feed one authoritative state machine:
//!
//! - **Device events** from the voice SDK (registration, incoming offers,
//!   disconnects, errors, token expiry)
//! - **Presence hub events** from the agent push channel
//! - **User actions** from the presentation layer
//!
//! The presentation layer reads a single [`CallSnapshot`] and invokes
//! `call_out`, `hangup`, `answer_call`, `reject_call` and `toggle_mute` on
//! the [`CallCoordinator`]. Actions never block on the network.
//!
//! ## Architecture
//!
//! ```text
//!  presentation ──actions──▶ CallCoordinator ──effects──▶ executor task
//!       ▲                         │  ▲                       │      │
//!       │ watch<CallSnapshot>     │  │ DeviceEvent           ▼      ▼
//!       └─────────────────────────┘  └───────────── VoiceDeviceAdapter
//!                                    ▲ HubEvent       PresenceHubClient
//!                                    └──────────────────────┘
//! ```
//!
//! Inputs are applied one at a time by [`CallSessionMachine`], a synchronous
//! transition function with no I/O of its own.

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod recovery;
pub mod registry;
pub mod session;
pub mod state_machine;
pub mod state_table;
pub mod types;

pub use adapters::{
    normalize_destination, ConnectParams, DeviceDriver, HttpTokenClient, HubHandle, HubTransport,
    HubTransportEvent, PresenceHubClient, SdkEvent, TokenProvider, VoiceDeviceAdapter,
    WebSocketHubTransport,
};
pub use config::SessionConfig;
pub use coordinator::CallCoordinator;
pub use error::{VoiceError, VoiceResult};
pub use events::{EventPriority, SessionEvent};
pub use logging::{setup_logging, LogFormat, LoggingConfig};
pub use registry::IncomingCallRegistry;
pub use session::{AgentSession, AgentSessionBuilder};
pub use state_table::{CallSessionMachine, DeviceEvent, HubEvent};
pub use types::{
    ActiveCall, AgentIdentity, CallSnapshot, CallStatus, OfferId, PendingCallOffer, PresenceLink,
    PresenceState, VoiceToken,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
