//! Agent session context
//!
//! One `AgentSession` exists per authenticated dashboard session. It owns
//! the identity, the device adapter, the presence hub client and the call
//! coordinator, and replaces process-wide singletons with an explicit
//! `initialize()` / `teardown()` lifecycle.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use voice_session_core::{AgentSession, SessionConfig, DeviceDriver};
//! # async fn example(driver: Arc<dyn DeviceDriver>) -> voice_session_core::VoiceResult<()> {
//! let (sdk_tx, sdk_rx) = tokio::sync::mpsc::unbounded_channel();
//! let session = AgentSession::builder("front-desk")
//!     .config(SessionConfig::default().with_token_endpoint("https://shop.example.com/api"))
//!     .device_driver(driver, sdk_rx)
//!     .build()?;
//!
//! session.initialize().await?;
//! session.coordinator().call_out("555 123 4567");
//! # drop(sdk_tx);
//! session.teardown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{
    DeviceDriver, HttpTokenClient, HubTransport, PresenceHubClient, SdkEvent, TokenProvider,
    VoiceDeviceAdapter, WebSocketHubTransport,
};
use crate::config::SessionConfig;
use crate::coordinator::CallCoordinator;
use crate::error::{VoiceError, VoiceResult};
use crate::state_machine::ActionContext;
use crate::state_table::ProvisioningOutcome;
use crate::types::{AgentIdentity, CallStatus};

/// Builder for [`AgentSession`]
pub struct AgentSessionBuilder {
    identity: String,
    config: SessionConfig,
    tokens: Option<Arc<dyn TokenProvider>>,
    driver: Option<(Arc<dyn DeviceDriver>, mpsc::UnboundedReceiver<SdkEvent>)>,
    hub_transport: Option<Arc<dyn HubTransport>>,
}

impl AgentSessionBuilder {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            config: SessionConfig::default(),
            tokens: None,
            driver: None,
            hub_transport: None,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the HTTP token client
    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// The voice SDK binding and the channel its callbacks arrive on
    pub fn device_driver(
        mut self,
        driver: Arc<dyn DeviceDriver>,
        sdk_events: mpsc::UnboundedReceiver<SdkEvent>,
    ) -> Self {
        self.driver = Some((driver, sdk_events));
        self
    }

    /// Override the WebSocket hub transport
    pub fn hub_transport(mut self, transport: Arc<dyn HubTransport>) -> Self {
        self.hub_transport = Some(transport);
        self
    }

    /// Wire the session together; must run inside a tokio runtime
    pub fn build(self) -> VoiceResult<AgentSession> {
        let identity = AgentIdentity::new(self.identity)?;
        self.config.validate()?;

        let (driver, sdk_events) = self.driver.ok_or_else(|| VoiceError::InvalidConfiguration {
            field: "device_driver".to_string(),
            reason: "a voice SDK driver is required".to_string(),
        })?;

        let tokens: Arc<dyn TokenProvider> = match self.tokens {
            Some(tokens) => tokens,
            None => Arc::new(HttpTokenClient::from_config(&self.config)?),
        };

        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        let presence = if self.config.presence_enabled {
            let transport: Arc<dyn HubTransport> = match self.hub_transport {
                Some(transport) => transport,
                None => Arc::new(WebSocketHubTransport::from_config(&self.config)?),
            };
            Some(PresenceHubClient::new(transport, self.config.hub_connect_retry(), hub_tx))
        } else {
            None
        };

        let device = Arc::new(VoiceDeviceAdapter::new(driver));
        let ctx = ActionContext {
            identity: identity.clone(),
            device: device.clone(),
            presence: presence.clone(),
            tokens: tokens.clone(),
        };

        let coordinator = CallCoordinator::start(ctx, self.config.event_capacity);
        let (device_tx, device_rx) = mpsc::unbounded_channel();
        coordinator.spawn_device_pump(device_rx);
        coordinator.spawn_hub_pump(hub_rx);
        let sdk_pump = VoiceDeviceAdapter::spawn_event_pump(sdk_events, device_tx);

        Ok(AgentSession {
            id: Uuid::new_v4(),
            identity,
            config: self.config,
            tokens,
            device,
            presence,
            coordinator,
            hub_connect: Mutex::new(None),
            sdk_pump,
        })
    }
}

/// Session-scoped call context for one signed-in agent
pub struct AgentSession {
    id: Uuid,
    identity: AgentIdentity,
    config: SessionConfig,
    tokens: Arc<dyn TokenProvider>,
    device: Arc<VoiceDeviceAdapter>,
    presence: Option<PresenceHubClient>,
    coordinator: CallCoordinator,
    hub_connect: Mutex<Option<JoinHandle<()>>>,
    sdk_pump: JoinHandle<()>,
}

impl AgentSession {
    pub fn builder(identity: impl Into<String>) -> AgentSessionBuilder {
        AgentSessionBuilder::new(identity)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &CallCoordinator {
        &self.coordinator
    }

    pub fn presence(&self) -> Option<&PresenceHubClient> {
        self.presence.as_ref()
    }

    /// Provision a token, register the device and connect presence
    ///
    /// The hub connect runs in the background; its failure leaves the
    /// session working call-only. Token or registration failures end in
    /// `LoginError`. Returns the status once this attempt settles.
    pub async fn initialize(&self) -> VoiceResult<CallStatus> {
        let epoch = self.coordinator.begin_provisioning()?;
        info!(session_id = %self.id, identity = %self.identity, epoch = %epoch, "Initializing voice session");

        self.spawn_hub_connect();

        let token = match self.tokens.fetch_token(&self.identity).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, category = e.category(), "Voice token fetch failed");
                self.coordinator.complete_provisioning(
                    epoch,
                    ProvisioningOutcome::Failed { reason: e.to_string() },
                );
                return Err(e);
            }
        };

        match self.device.register(&token).await {
            Ok(()) => {
                if !self
                    .coordinator
                    .complete_provisioning(epoch, ProvisioningOutcome::Registered)
                {
                    info!(epoch = %epoch, "Provisioning finished after it was cancelled");
                }
                Ok(self.coordinator.status())
            }
            Err(e) => {
                warn!(error = %e, category = e.category(), "Voice device registration failed");
                self.coordinator.complete_provisioning(
                    epoch,
                    ProvisioningOutcome::Failed { reason: e.to_string() },
                );
                Err(e)
            }
        }
    }

    fn spawn_hub_connect(&self) {
        let Some(presence) = self.presence.clone() else {
            return;
        };
        let mut slot = self.hub_connect.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let identity = self.identity.clone();
        *slot = Some(tokio::spawn(async move {
            if let Err(e) = presence.connect(&identity).await {
                warn!(error = %e, "Presence hub unavailable, continuing call-only");
            }
        }));
    }

    /// End calls, unregister the device and leave the hub
    ///
    /// Every step is best-effort. The session can be initialized again
    /// afterwards.
    pub async fn teardown(&self) {
        info!(session_id = %self.id, "Tearing down voice session");
        self.coordinator.teardown().await;

        if let Some(task) = self.hub_connect.lock().take() {
            task.abort();
        }

        if let Err(e) = self.device.destroy().await {
            warn!(error = %e, "Failed to destroy voice device");
        }

        if let Some(presence) = &self.presence {
            if let Some(handle) = presence.handle() {
                presence.disconnect(&handle).await;
            }
        }
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.sdk_pump.abort();
        if let Some(task) = self.hub_connect.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("status", &self.coordinator.status())
            .finish()
    }
}
