//! The call-session transition function
//!
//! `CallSessionMachine::apply` is the single place where `CallStatus`, the
//! active call and the incoming call registry change. It is synchronous and
//! performs no I/O: every side effect is returned as an [`Action`] for the
//! executor, in the order it must run.
//!
//! ```text
//!  Idle/Ready ──call_out──▶ Calling ──accepted──▶ Connected
//!      ▲                       │                     │
//!      │                    hangup /            hangup /
//!      │                   disconnect          disconnect
//!      │                       ▼                     ▼
//!      └────── settle ◀────── Ended ◀────────────────┘
//!                 │
//!                 └──▶ Ringing (when offers are still pending)
//! ```

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::adapters::device::normalize_destination;
use crate::error::{VoiceError, VoiceResult};
use crate::registry::{AddOutcome, IncomingCallRegistry};
use crate::types::{
    ActiveCall, CallSnapshot, CallStatus, OfferId, PendingCallOffer, PresenceLink, PresenceState,
};

use super::types::*;

/// Duration timer bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TimerState {
    generation: u64,
    running: bool,
    elapsed_secs: u64,
}

#[derive(Debug)]
pub struct CallSessionMachine {
    status: CallStatus,
    registry: IncomingCallRegistry,
    active_call: Option<ActiveCall>,
    timer: TimerState,
    epoch: ProvisioningEpoch,
    /// Number of the most recently started call
    calls: u64,
    presence_link: PresenceLink,
    last_error: Option<String>,
}

impl Default for CallSessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSessionMachine {
    pub fn new() -> Self {
        Self {
            status: CallStatus::Idle,
            registry: IncomingCallRegistry::new(),
            active_call: None,
            timer: TimerState::default(),
            epoch: ProvisioningEpoch(0),
            calls: 0,
            presence_link: PresenceLink::Disconnected,
            last_error: None,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn registry(&self) -> &IncomingCallRegistry {
        &self.registry
    }

    pub fn active_call(&self) -> Option<&ActiveCall> {
        self.active_call.as_ref()
    }

    /// Whether `call` still holds the line
    pub fn is_current_call(&self, call: u64) -> bool {
        self.active_call
            .as_ref()
            .is_some_and(|active| active.generation == call)
    }

    pub fn is_muted(&self) -> bool {
        self.active_call.as_ref().map(|call| call.muted).unwrap_or(false)
    }

    pub fn duration_secs(&self) -> u64 {
        self.timer.elapsed_secs
    }

    pub fn current_epoch(&self) -> ProvisioningEpoch {
        self.epoch
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            status: self.status,
            is_muted: self.is_muted(),
            incoming_calls: self.registry.list_active(),
            active_call: self.active_call.clone(),
            duration_secs: self.timer.elapsed_secs,
            presence_link: self.presence_link,
            last_error: self.last_error.clone(),
        }
    }

    /// Keep a failure visible without changing the status
    pub fn note_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Open a new provisioning epoch and move to `Registering`
    pub fn begin_provisioning(&mut self) -> VoiceResult<(ProvisioningEpoch, Transition)> {
        if !self.status.can_initialize() {
            return Err(VoiceError::InvalidState {
                action: "initialize".to_string(),
                status: self.status,
            });
        }

        self.epoch = ProvisioningEpoch(self.epoch.0 + 1);
        self.last_error = None;

        let mut transition = Transition::default();
        self.set_status(&mut transition, CallStatus::Registering, "provisioning started");
        Ok((self.epoch, transition))
    }

    /// Apply one input and return the resulting transition
    pub fn apply(&mut self, input: SessionInput) -> Transition {
        let input_name = input.type_name();
        let from = self.status;

        let transition = match input {
            SessionInput::User(action) => self.on_user_action(action),
            SessionInput::Device(event) => self.on_device_event(event),
            SessionInput::Hub(event) => self.on_hub_event(event),
            SessionInput::Provisioning { epoch, outcome } => self.on_provisioning(epoch, outcome),
            SessionInput::TimerTick { generation } => self.on_timer_tick(generation),
            SessionInput::Teardown => self.on_teardown(),
        };

        if let Some(reason) = transition.ignored {
            debug!(input = input_name, status = %from, reason, "Input ignored");
        } else if let Some(to) = transition.next_state {
            info!(input = input_name, from = %from, to = %to, "Call status transition");
        }

        transition
    }

    fn on_user_action(&mut self, action: UserAction) -> Transition {
        match action {
            UserAction::CallOut { destination } => self.call_out(destination),
            UserAction::Hangup => self.hangup(),
            UserAction::AnswerCall { offer_id } => self.answer_call(offer_id),
            UserAction::RejectCall { offer_id } => self.reject_call(offer_id),
            UserAction::ToggleMute => self.toggle_mute(),
        }
    }

    fn call_out(&mut self, destination: String) -> Transition {
        if !self.status.is_idle() {
            return Transition::ignored("call_out requires an idle line");
        }

        let destination = normalize_destination(&destination);
        if destination.is_empty() {
            self.last_error = Some("Cannot call an empty destination".to_string());
            return Transition::ignored("empty destination");
        }

        let mut transition = Transition::default();
        let call = self.next_call();
        self.active_call = Some(ActiveCall::outbound(destination.clone()).with_generation(call));
        transition.actions.push(Action::ConnectDevice { destination, call });
        transition.actions.push(Action::Announce(PresenceState::Busy));
        self.set_status(&mut transition, CallStatus::Calling, "outbound call placed");
        transition
    }

    fn hangup(&mut self) -> Transition {
        match self.status {
            CallStatus::Calling | CallStatus::Connected => {
                let mut transition = Transition::default();
                transition.actions.push(Action::DisconnectAll);
                self.end_call(&mut transition, "local hangup");
                transition
            }
            CallStatus::Registering => {
                // Outcomes of the abandoned attempt carry the old epoch
                self.epoch = ProvisioningEpoch(self.epoch.0 + 1);
                let mut transition = Transition::default();
                self.set_status(&mut transition, CallStatus::Idle, "provisioning cancelled");
                transition
            }
            _ => Transition::ignored("nothing to hang up"),
        }
    }

    fn answer_call(&mut self, offer_id: OfferId) -> Transition {
        if self.status != CallStatus::Ringing {
            return Transition::ignored("answer_call requires a ringing line");
        }
        let Some(mut offer) = self.registry.remove(&offer_id) else {
            return Transition::ignored("offer is not pending");
        };

        offer.accepted_at = Some(Utc::now());
        let call = self.next_call();
        self.active_call = Some(ActiveCall::answered(&offer).with_generation(call));

        let mut transition = Transition::default();
        transition.actions.push(Action::AcceptOffer {
            offer_id: offer_id.clone(),
            call,
        });
        transition.actions.push(Action::Announce(PresenceState::Busy));
        transition.publish_events.push(EventTemplate::OfferRemoved(offer_id));
        self.start_timer(&mut transition);
        self.set_status(&mut transition, CallStatus::Connected, "incoming call answered");
        transition
    }

    fn reject_call(&mut self, offer_id: OfferId) -> Transition {
        if self.registry.remove(&offer_id).is_none() {
            return Transition::ignored("offer is not pending");
        }

        let mut transition = Transition::default();
        transition.actions.push(Action::RejectOffer { offer_id: offer_id.clone() });
        transition.publish_events.push(EventTemplate::OfferRemoved(offer_id));
        if self.status == CallStatus::Ringing && self.registry.is_empty() {
            self.set_status(&mut transition, CallStatus::Idle, "last pending offer rejected");
        }
        transition
    }

    fn toggle_mute(&mut self) -> Transition {
        if self.status != CallStatus::Connected {
            return Transition::ignored("mute requires a connected call");
        }
        let Some(call) = self.active_call.as_mut() else {
            return Transition::ignored("no active call");
        };

        call.muted = !call.muted;
        Transition {
            actions: vec![Action::SetMuted {
                offer_id: call.offer_id.clone(),
                muted: call.muted,
            }],
            ..Default::default()
        }
    }

    fn on_device_event(&mut self, event: DeviceEvent) -> Transition {
        match event {
            DeviceEvent::Registered => match self.status {
                CallStatus::Idle | CallStatus::Registering | CallStatus::Unregistered => {
                    let mut transition = Transition::default();
                    self.set_status(&mut transition, CallStatus::Ready, "device registered");
                    transition
                }
                _ => Transition::ignored("device already registered"),
            },
            DeviceEvent::Incoming(offer) => self.on_incoming(offer),
            DeviceEvent::Accepted { .. } => {
                if self.status != CallStatus::Calling {
                    return Transition::ignored("no outbound call is dialing");
                }
                if let Some(call) = self.active_call.as_mut() {
                    call.started_at = Some(Utc::now());
                }
                let mut transition = Transition::default();
                self.start_timer(&mut transition);
                self.set_status(&mut transition, CallStatus::Connected, "outbound call answered");
                transition
            }
            DeviceEvent::Disconnect { offer_id } => self.on_disconnect(offer_id),
            DeviceEvent::Unregistered => {
                let mut transition = Transition::default();
                self.abandon_call(&mut transition);
                self.set_status(&mut transition, CallStatus::Unregistered, "device unregistered");
                transition
            }
            DeviceEvent::Error { message } => {
                warn!(error = %message, status = %self.status, "Device reported an error");
                self.last_error = Some(message.clone());
                let mut transition = Transition::default();
                self.abandon_call(&mut transition);
                self.set_status(&mut transition, CallStatus::ConnectionError, message);
                transition
            }
            DeviceEvent::TokenWillExpire => Transition {
                actions: vec![Action::RefreshToken],
                ..Default::default()
            },
        }
    }

    fn on_incoming(&mut self, offer: PendingCallOffer) -> Transition {
        match self.registry.add(offer.clone()) {
            AddOutcome::Added => {}
            AddOutcome::Duplicate => return Transition::ignored("offer already pending"),
            AddOutcome::Retired => return Transition::ignored("offer id already used"),
        }

        let mut transition = Transition::default();
        transition.publish_events.push(EventTemplate::OfferAdded(offer));
        // An in-progress call keeps the line; the offer waits in the registry
        if !self.status.is_call_in_progress() {
            self.set_status(&mut transition, CallStatus::Ringing, "incoming call");
        }
        transition
    }

    fn on_disconnect(&mut self, offer_id: Option<OfferId>) -> Transition {
        if let Some(id) = offer_id.as_ref() {
            if self.registry.remove(id).is_some() {
                let mut transition = Transition::default();
                transition.publish_events.push(EventTemplate::OfferRemoved(id.clone()));
                if self.status == CallStatus::Ringing && self.registry.is_empty() {
                    self.set_status(&mut transition, CallStatus::Idle, "caller hung up before answer");
                }
                return transition;
            }
            let names_active_call = self
                .active_call
                .as_ref()
                .is_some_and(|call| call.offer_id.as_ref() == Some(id));
            if self.registry.is_retired(id) && !names_active_call {
                return Transition::ignored("disconnect for a resolved offer");
            }
        }

        if self.status.is_call_in_progress() {
            let mut transition = Transition::default();
            self.end_call(&mut transition, "remote disconnect");
            return transition;
        }

        Transition::ignored("no call to disconnect")
    }

    fn on_hub_event(&mut self, event: HubEvent) -> Transition {
        self.presence_link = match event {
            HubEvent::Connecting => PresenceLink::Connecting,
            HubEvent::Connected | HubEvent::Reconnected => PresenceLink::Connected,
            HubEvent::Reconnecting => PresenceLink::Reconnecting,
            HubEvent::Closed { error } => {
                if let Some(error) = error {
                    warn!(error = %error, "Presence hub closed; continuing without presence");
                }
                PresenceLink::Disconnected
            }
        };
        Transition::default()
    }

    fn on_provisioning(&mut self, epoch: ProvisioningEpoch, outcome: ProvisioningOutcome) -> Transition {
        if epoch != self.epoch || self.status != CallStatus::Registering {
            return Transition::ignored("stale provisioning result");
        }

        let mut transition = Transition::default();
        match outcome {
            ProvisioningOutcome::Registered => {
                self.set_status(&mut transition, CallStatus::Ready, "device registered");
            }
            ProvisioningOutcome::Failed { reason } => {
                self.last_error = Some(reason.clone());
                self.set_status(&mut transition, CallStatus::LoginError, reason);
            }
        }
        transition
    }

    fn on_timer_tick(&mut self, generation: u64) -> Transition {
        if !self.timer.running || self.timer.generation != generation {
            return Transition::ignored("stale timer tick");
        }
        self.timer.elapsed_secs += 1;
        Transition::default()
    }

    fn on_teardown(&mut self) -> Transition {
        let mut transition = Transition::default();
        if self.status.is_call_in_progress() {
            transition.actions.push(Action::DisconnectAll);
        }
        self.drop_call(&mut transition);
        for offer in self.registry.clear() {
            transition.publish_events.push(EventTemplate::OfferRemoved(offer.id));
        }
        self.epoch = ProvisioningEpoch(self.epoch.0 + 1);
        self.set_status(&mut transition, CallStatus::Disconnected, "session torn down");
        transition
    }

    /// Hang up bookkeeping shared by local hangup and remote disconnect
    fn end_call(&mut self, transition: &mut Transition, reason: &str) {
        transition.actions.push(Action::Announce(PresenceState::Available));
        self.drop_call(transition);
        self.set_status(transition, CallStatus::Ended, reason);

        let settled = if self.registry.is_empty() {
            CallStatus::Idle
        } else {
            CallStatus::Ringing
        };
        self.set_status(transition, settled, "call ended");
    }

    /// Drop a call the device lost; the agent is free again
    fn abandon_call(&mut self, transition: &mut Transition) {
        if self.status.is_call_in_progress() {
            transition.actions.push(Action::Announce(PresenceState::Available));
        }
        self.drop_call(transition);
    }

    fn next_call(&mut self) -> u64 {
        self.calls += 1;
        self.calls
    }

    fn drop_call(&mut self, transition: &mut Transition) {
        self.active_call = None;
        if self.timer.running {
            self.timer.running = false;
            self.timer.elapsed_secs = 0;
            transition.actions.push(Action::StopTimer);
        }
    }

    fn start_timer(&mut self, transition: &mut Transition) {
        self.timer.generation += 1;
        self.timer.running = true;
        self.timer.elapsed_secs = 0;
        transition.actions.push(Action::StartTimer {
            generation: self.timer.generation,
        });
    }

    fn set_status(&mut self, transition: &mut Transition, new: CallStatus, reason: impl Into<String>) {
        let previous = self.status;
        if previous == new {
            return;
        }
        self.status = new;
        transition.next_state = Some(new);
        transition.publish_events.push(EventTemplate::StatusChanged {
            previous,
            new,
            reason: reason.into(),
        });
    }
}
