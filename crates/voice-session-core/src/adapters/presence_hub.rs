//! Presence hub client
//!
//! Keeps one push connection to the agent hub per session, registers the
//! agent identity on it and mirrors the agent's availability. Presence is
//! advisory: every failure here is logged and tolerated, and none of it
//! ever changes the call status.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{VoiceError, VoiceResult};
use crate::recovery::{retry_with_backoff, RetryConfig};
use crate::state_table::types::HubEvent;
use crate::types::{AgentIdentity, PresenceState};

/// Hub method registering the agent identity on the connection
pub const REGISTER_AGENT: &str = "RegisterAgent";
/// Hub method setting the agent's availability
pub const SET_AGENT_STATE: &str = "SetAgentState";

/// Lifecycle notifications from an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubTransportEvent {
    Reconnecting,
    Reconnected,
    /// The transport gave up or was closed; no more events follow
    Closed { error: Option<String> },
}

/// Push channel to the agent hub
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Open the connection; later lifecycle changes arrive on the returned receiver
    async fn open(&self) -> VoiceResult<mpsc::UnboundedReceiver<HubTransportEvent>>;

    /// Invoke a hub method without waiting for a result
    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> VoiceResult<()>;

    async fn close(&self) -> VoiceResult<()>;
}

/// Proof of a registered hub connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubHandle {
    id: Uuid,
    identity: AgentIdentity,
}

impl HubHandle {
    fn new(identity: AgentIdentity) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }
}

struct HubClientInner {
    transport: Arc<dyn HubTransport>,
    retry: RetryConfig,
    events: mpsc::UnboundedSender<HubEvent>,
    /// Serializes connect attempts
    connect_gate: tokio::sync::Mutex<()>,
    current: parking_lot::Mutex<Option<HubHandle>>,
    last_state: parking_lot::Mutex<Option<PresenceState>>,
    lifecycle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HubClientInner {
    fn emit(&self, event: HubEvent) {
        // The coordinator may already be gone during teardown
        let _ = self.events.send(event);
    }

    fn is_current(&self, handle: &HubHandle) -> bool {
        self.current.lock().as_ref().map(|h| h.id) == Some(handle.id)
    }

    async fn set_state(&self, state: PresenceState) {
        if let Err(e) = self
            .transport
            .invoke(SET_AGENT_STATE, vec![json!(state.as_str())])
            .await
        {
            warn!(state = %state, error = %e, "Failed to announce presence");
        }
    }

    /// Restore registration and availability on a fresh connection
    async fn reregister(&self, identity: &AgentIdentity) {
        if let Err(e) = self
            .transport
            .invoke(REGISTER_AGENT, vec![json!(identity.as_str())])
            .await
        {
            warn!(identity = %identity, error = %e, "Failed to re-register agent after reconnect");
            return;
        }
        let last_state = *self.last_state.lock();
        if let Some(state) = last_state {
            self.set_state(state).await;
        }
    }
}

/// Client for the agent presence hub, cheap to clone
#[derive(Clone)]
pub struct PresenceHubClient {
    inner: Arc<HubClientInner>,
}

impl PresenceHubClient {
    pub fn new(
        transport: Arc<dyn HubTransport>,
        retry: RetryConfig,
        events: mpsc::UnboundedSender<HubEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(HubClientInner {
                transport,
                retry,
                events,
                connect_gate: tokio::sync::Mutex::new(()),
                current: parking_lot::Mutex::new(None),
                last_state: parking_lot::Mutex::new(None),
                lifecycle: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Currently registered connection, if any
    pub fn handle(&self) -> Option<HubHandle> {
        self.inner.current.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.current.lock().is_some()
    }

    /// Last availability requested, whether or not it reached the hub
    pub fn last_state(&self) -> Option<PresenceState> {
        *self.inner.last_state.lock()
    }

    /// Connect and register `identity`
    ///
    /// Returns the existing handle when already connected.
    pub async fn connect(&self, identity: &AgentIdentity) -> VoiceResult<HubHandle> {
        let _gate = self.inner.connect_gate.lock().await;
        if let Some(existing) = self.handle() {
            return Ok(existing);
        }

        self.inner.emit(HubEvent::Connecting);
        let transport = self.inner.transport.clone();
        let opened = retry_with_backoff("hub_connect", &self.inner.retry, || {
            let transport = transport.clone();
            async move { transport.open().await }
        })
        .await;

        let lifecycle = match opened {
            Ok(lifecycle) => lifecycle,
            Err(e) => {
                let err = match e {
                    VoiceError::HubConnect { .. } => e,
                    other => VoiceError::hub_connect(other.to_string()),
                };
                self.inner.emit(HubEvent::Closed {
                    error: Some(err.to_string()),
                });
                return Err(err);
            }
        };

        if let Err(e) = transport
            .invoke(REGISTER_AGENT, vec![json!(identity.as_str())])
            .await
        {
            let _ = transport.close().await;
            let err = VoiceError::hub_connect(format!("agent registration failed: {}", e));
            self.inner.emit(HubEvent::Closed {
                error: Some(err.to_string()),
            });
            return Err(err);
        }

        let handle = HubHandle::new(identity.clone());
        *self.inner.current.lock() = Some(handle.clone());
        info!(identity = %identity, "Connected to presence hub");
        self.inner.emit(HubEvent::Connected);

        // A call may have started before the hub came up
        let pending_state = *self.inner.last_state.lock();
        if let Some(state) = pending_state {
            self.inner.set_state(state).await;
        }

        let task = tokio::spawn(run_lifecycle(
            Arc::downgrade(&self.inner),
            handle.clone(),
            lifecycle,
        ));
        if let Some(previous) = self.inner.lifecycle.lock().replace(task) {
            previous.abort();
        }

        Ok(handle)
    }

    /// Announce availability on a specific connection; failures are logged
    pub async fn announce(&self, handle: &HubHandle, state: PresenceState) {
        *self.inner.last_state.lock() = Some(state);
        if !self.inner.is_current(handle) {
            debug!(state = %state, "Hub handle is stale, announce skipped");
            return;
        }
        self.inner.set_state(state).await;
    }

    /// Announce on whatever connection is current; the state is remembered
    /// and re-sent once a connection comes up
    pub async fn announce_current(&self, state: PresenceState) {
        match self.handle() {
            Some(handle) => self.announce(&handle, state).await,
            None => {
                *self.inner.last_state.lock() = Some(state);
                debug!(state = %state, "Presence hub not connected, state recorded");
            }
        }
    }

    /// Announce `available` and close the connection, best-effort
    pub async fn disconnect(&self, handle: &HubHandle) {
        if !self.inner.is_current(handle) {
            return;
        }
        self.inner.set_state(PresenceState::Available).await;

        if let Some(task) = self.inner.lifecycle.lock().take() {
            task.abort();
        }
        *self.inner.current.lock() = None;
        *self.inner.last_state.lock() = None;

        if let Err(e) = self.inner.transport.close().await {
            warn!(error = %e, "Failed to close presence hub transport");
        }
        info!(identity = %handle.identity(), "Disconnected from presence hub");
        self.inner.emit(HubEvent::Closed { error: None });
    }
}

impl std::fmt::Debug for PresenceHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceHubClient")
            .field("connected", &self.is_connected())
            .field("last_state", &self.last_state())
            .finish()
    }
}

async fn run_lifecycle(
    inner: Weak<HubClientInner>,
    handle: HubHandle,
    mut lifecycle: mpsc::UnboundedReceiver<HubTransportEvent>,
) {
    while let Some(event) = lifecycle.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            HubTransportEvent::Reconnecting => {
                warn!("Presence hub connection lost, reconnecting");
                inner.emit(HubEvent::Reconnecting);
            }
            HubTransportEvent::Reconnected => {
                info!("Presence hub reconnected");
                inner.reregister(handle.identity()).await;
                inner.emit(HubEvent::Reconnected);
            }
            HubTransportEvent::Closed { error } => {
                {
                    let mut current = inner.current.lock();
                    if current.as_ref().map(|h| h.id) == Some(handle.id) {
                        *current = None;
                    }
                }
                warn!(error = ?error, "Presence hub closed, continuing call-only");
                inner.emit(HubEvent::Closed { error });
                break;
            }
        }
    }
}
