//! Voice device adapter
//!
//! Thin translation layer between the voice SDK and the state machine. The
//! SDK is reached through [`DeviceDriver`]; its callbacks arrive as raw
//! [`SdkEvent`]s and leave as the closed [`DeviceEvent`] type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{VoiceError, VoiceResult};
use crate::state_table::types::DeviceEvent;
use crate::types::{OfferId, PendingCallOffer, VoiceToken};

/// Strip every whitespace character from a dial string
pub fn normalize_destination(destination: &str) -> String {
    destination.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Parameters for an outbound connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub to: String,
}

/// The voice SDK surface the adapter drives
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    async fn register(&self, token: &VoiceToken) -> VoiceResult<()>;

    async fn update_token(&self, token: &VoiceToken) -> VoiceResult<()>;

    async fn connect(&self, params: ConnectParams) -> VoiceResult<()>;

    async fn disconnect_all(&self) -> VoiceResult<()>;

    async fn destroy(&self) -> VoiceResult<()>;

    async fn accept(&self, offer_id: &OfferId) -> VoiceResult<()>;

    async fn reject(&self, offer_id: &OfferId) -> VoiceResult<()>;

    /// Mute the call object for `offer_id`, or the outbound call when `None`
    async fn mute(&self, offer_id: Option<OfferId>, muted: bool) -> VoiceResult<()>;
}

/// Raw callback reported by an SDK binding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdkEvent {
    /// Callback name, e.g. `incoming` or `tokenWillExpire`
    pub name: String,
    /// Call object identifier, when the callback concerns one call
    pub call_id: Option<String>,
    /// Call parameters (`From`, `To`, ...)
    pub parameters: HashMap<String, String>,
    /// Error message for `error` callbacks
    pub message: Option<String>,
}

impl SdkEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Translate one SDK callback into a device event
///
/// Returns `None` for callbacks the state machine does not care about.
pub fn translate_sdk_event(event: SdkEvent) -> Option<DeviceEvent> {
    let offer_id = event.call_id.clone().map(OfferId::from);

    match event.name.as_str() {
        "registered" => Some(DeviceEvent::Registered),
        "unregistered" => Some(DeviceEvent::Unregistered),
        "incoming" => {
            let Some(id) = offer_id else {
                warn!("Incoming callback without a call id, dropping");
                return None;
            };
            let mut offer = PendingCallOffer::new(id);
            if let Some(caller) = event.parameters.get("From") {
                offer = offer.with_caller(caller.clone());
            }
            Some(DeviceEvent::Incoming(offer))
        }
        "accept" => Some(DeviceEvent::Accepted { offer_id }),
        // A caller hanging up before answer is reported as cancel
        "disconnect" | "cancel" => Some(DeviceEvent::Disconnect { offer_id }),
        "error" => Some(DeviceEvent::Error {
            message: event
                .message
                .unwrap_or_else(|| "unknown device error".to_string()),
        }),
        "tokenWillExpire" => Some(DeviceEvent::TokenWillExpire),
        other => {
            debug!(callback = other, "Dropping unknown SDK callback");
            None
        }
    }
}

/// Adapter owning the device driver for one session
pub struct VoiceDeviceAdapter {
    driver: Arc<dyn DeviceDriver>,
    registered: AtomicBool,
}

impl VoiceDeviceAdapter {
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            driver,
            registered: AtomicBool::new(false),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Register the device with a freshly provisioned token
    pub async fn register(&self, token: &VoiceToken) -> VoiceResult<()> {
        self.driver.register(token).await?;
        self.registered.store(true, Ordering::SeqCst);
        info!("Voice device registered");
        Ok(())
    }

    /// Hand a refreshed token to the SDK
    pub async fn update_token(&self, token: &VoiceToken) -> VoiceResult<()> {
        self.ensure_registered()?;
        self.driver.update_token(token).await
    }

    /// Dial a destination; whitespace is stripped before dialing
    pub async fn connect(&self, destination: &str) -> VoiceResult<()> {
        self.ensure_registered()?;
        let to = normalize_destination(destination);
        if to.is_empty() {
            return Err(VoiceError::InvalidConfiguration {
                field: "destination".to_string(),
                reason: "destination is empty".to_string(),
            });
        }
        debug!(to = %to, "Connecting outbound call");
        self.driver.connect(ConnectParams { to }).await
    }

    pub async fn disconnect_all(&self) -> VoiceResult<()> {
        self.driver.disconnect_all().await
    }

    pub async fn accept_incoming(&self, offer_id: &OfferId) -> VoiceResult<()> {
        self.driver.accept(offer_id).await
    }

    pub async fn reject_incoming(&self, offer_id: &OfferId) -> VoiceResult<()> {
        self.driver.reject(offer_id).await
    }

    pub async fn set_muted(&self, offer_id: Option<OfferId>, muted: bool) -> VoiceResult<()> {
        self.driver.mute(offer_id, muted).await
    }

    /// Unregister and release the SDK device
    pub async fn destroy(&self) -> VoiceResult<()> {
        self.registered.store(false, Ordering::SeqCst);
        self.driver.destroy().await
    }

    /// Forward translated SDK callbacks until either side closes
    pub fn spawn_event_pump(
        mut sdk_events: mpsc::UnboundedReceiver<SdkEvent>,
        device_events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(raw) = sdk_events.recv().await {
                let Some(event) = translate_sdk_event(raw) else {
                    continue;
                };
                if device_events.send(event).is_err() {
                    debug!("Device event receiver dropped, stopping pump");
                    break;
                }
            }
        })
    }

    fn ensure_registered(&self) -> VoiceResult<()> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(VoiceError::DeviceNotRegistered)
        }
    }
}

impl std::fmt::Debug for VoiceDeviceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceDeviceAdapter")
            .field("registered", &self.is_registered())
            .finish()
    }
}
