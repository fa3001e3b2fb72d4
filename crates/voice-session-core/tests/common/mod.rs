//! Shared fakes for the integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Notify};

use voice_session_core::adapters::{ConnectParams, DeviceDriver, HubTransport, HubTransportEvent, SdkEvent, TokenProvider};
use voice_session_core::{
    AgentIdentity, AgentSession, CallSnapshot, OfferId, SessionConfig, VoiceError, VoiceResult, VoiceToken,
};

/// Every call the device fake received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Register,
    UpdateToken(String),
    Connect(String),
    DisconnectAll,
    Destroy,
    Accept(String),
    Reject(String),
    Mute(Option<String>, bool),
}

#[derive(Default)]
pub struct RecordingDevice {
    pub calls: Mutex<Vec<DeviceCall>>,
    pub fail_register: Mutex<Option<String>>,
    pub fail_connect: Mutex<Option<String>>,
}

impl RecordingDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: DeviceCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl DeviceDriver for RecordingDevice {
    async fn register(&self, _token: &VoiceToken) -> VoiceResult<()> {
        self.record(DeviceCall::Register);
        match self.fail_register.lock().clone() {
            Some(reason) => Err(VoiceError::device(reason)),
            None => Ok(()),
        }
    }

    async fn update_token(&self, token: &VoiceToken) -> VoiceResult<()> {
        self.record(DeviceCall::UpdateToken(token.expose().to_string()));
        Ok(())
    }

    async fn connect(&self, params: ConnectParams) -> VoiceResult<()> {
        self.record(DeviceCall::Connect(params.to));
        match self.fail_connect.lock().clone() {
            Some(reason) => Err(VoiceError::device(reason)),
            None => Ok(()),
        }
    }

    async fn disconnect_all(&self) -> VoiceResult<()> {
        self.record(DeviceCall::DisconnectAll);
        Ok(())
    }

    async fn destroy(&self) -> VoiceResult<()> {
        self.record(DeviceCall::Destroy);
        Ok(())
    }

    async fn accept(&self, offer_id: &OfferId) -> VoiceResult<()> {
        self.record(DeviceCall::Accept(offer_id.to_string()));
        Ok(())
    }

    async fn reject(&self, offer_id: &OfferId) -> VoiceResult<()> {
        self.record(DeviceCall::Reject(offer_id.to_string()));
        Ok(())
    }

    async fn mute(&self, offer_id: Option<OfferId>, muted: bool) -> VoiceResult<()> {
        self.record(DeviceCall::Mute(offer_id.map(|id| id.to_string()), muted));
        Ok(())
    }
}

/// Token provider handing out numbered tokens
#[derive(Default)]
pub struct StaticTokens {
    pub fetches: Mutex<u32>,
    pub fail_with: Mutex<Option<VoiceError>>,
    /// When set, each fetch waits for a notification first
    pub gate: Option<Arc<Notify>>,
}

impl StaticTokens {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: VoiceError) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Mutex::new(Some(err)),
            ..Default::default()
        })
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Default::default()
        })
    }
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn fetch_token(&self, identity: &AgentIdentity) -> VoiceResult<VoiceToken> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let count = {
            let mut fetches = self.fetches.lock();
            *fetches += 1;
            *fetches
        };
        if let Some(err) = self.fail_with.lock().clone() {
            return Err(err);
        }
        Ok(VoiceToken::new(format!("token-{}-{}", identity, count)))
    }
}

/// In-memory hub transport
#[derive(Default)]
pub struct FakeHub {
    pub refuse: bool,
    pub invocations: Mutex<Vec<(String, Vec<Value>)>>,
    pub lifecycle: Mutex<Option<mpsc::UnboundedSender<HubTransportEvent>>>,
    pub closed: Mutex<bool>,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Default::default()
        })
    }

    /// `SetAgentState` arguments, in order
    pub fn announced(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .filter(|(target, _)| target == "SetAgentState")
            .filter_map(|(_, args)| args.first().and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn push(&self, event: HubTransportEvent) {
        if let Some(tx) = self.lifecycle.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl HubTransport for FakeHub {
    async fn open(&self) -> VoiceResult<mpsc::UnboundedReceiver<HubTransportEvent>> {
        if self.refuse {
            return Err(VoiceError::network("connection refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.lifecycle.lock() = Some(tx);
        Ok(rx)
    }

    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> VoiceResult<()> {
        self.invocations.lock().push((target.to_string(), arguments));
        Ok(())
    }

    async fn close(&self) -> VoiceResult<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

pub struct Harness {
    pub session: AgentSession,
    pub device: Arc<RecordingDevice>,
    pub hub: Arc<FakeHub>,
    pub sdk: mpsc::UnboundedSender<SdkEvent>,
    pub snapshots: watch::Receiver<CallSnapshot>,
}

pub fn test_config() -> SessionConfig {
    SessionConfig::default()
        .with_hub_connect_attempts(2)
        .with_request_timeout(Duration::from_secs(2))
}

pub fn harness(tokens: Arc<StaticTokens>, hub: Arc<FakeHub>) -> Harness {
    harness_with_device(tokens, hub, RecordingDevice::new())
}

pub fn harness_with_device(
    tokens: Arc<StaticTokens>,
    hub: Arc<FakeHub>,
    device: Arc<RecordingDevice>,
) -> Harness {
    let (sdk_tx, sdk_rx) = mpsc::unbounded_channel();
    let session = AgentSession::builder("agent-7")
        .config(test_config())
        .token_provider(tokens)
        .hub_transport(hub.clone())
        .device_driver(device.clone(), sdk_rx)
        .build()
        .expect("session builds");
    let snapshots = session.coordinator().subscribe();

    Harness {
        session,
        device,
        hub,
        sdk: sdk_tx,
        snapshots,
    }
}

/// Wait until the snapshot satisfies `predicate`
pub async fn wait_for(
    snapshots: &mut watch::Receiver<CallSnapshot>,
    predicate: impl FnMut(&CallSnapshot) -> bool,
) -> CallSnapshot {
    tokio::time::timeout(Duration::from_secs(30), snapshots.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("coordinator dropped")
        .clone()
}

pub fn incoming(call_id: &str) -> SdkEvent {
    SdkEvent::new("incoming")
        .with_call_id(call_id)
        .with_parameter("From", "+15550100")
}
