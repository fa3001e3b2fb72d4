//! Call coordinator
//!
//! Owns the state machine and everything around it: the lock that
//! serializes inputs, the executor task that runs side effects in order, the
//! duration timer, and the channels the presentation layer reads from.
//!
//! User actions are synchronous. They apply their transition under the lock
//! and queue side effects, so by the time `hangup()` returns the status has
//! already changed even though the device has not been told yet.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::error::VoiceResult;
use crate::events::SessionEvent;
use crate::state_machine::{execute_action, is_call_critical, ActionContext};
use crate::state_table::{
    Action, CallSessionMachine, DeviceEvent, HubEvent, ProvisioningEpoch, ProvisioningOutcome,
    SessionInput, Transition, UserAction,
};
use crate::types::{CallSnapshot, CallStatus, OfferId};

const TIMER_PERIOD: Duration = Duration::from_secs(1);

enum Effect {
    Run(Action),
    /// Resolves once every effect queued before it has run
    Flush(oneshot::Sender<()>),
}

struct CoordinatorInner {
    machine: Mutex<CallSessionMachine>,
    snapshot_tx: watch::Sender<CallSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
    effects_tx: mpsc::UnboundedSender<Effect>,
    timer: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CoordinatorInner {
    fn apply(self: &Arc<Self>, input: SessionInput) -> Transition {
        let mut machine = self.machine.lock();
        let transition = machine.apply(input);
        self.dispatch(&machine, &transition);
        transition
    }

    /// Publish and queue the results of a transition
    ///
    /// Runs with the machine lock held so effects and events keep the order
    /// of the inputs that produced them.
    fn dispatch(self: &Arc<Self>, machine: &CallSessionMachine, transition: &Transition) {
        self.snapshot_tx.send_replace(machine.snapshot());

        for template in &transition.publish_events {
            let _ = self.events_tx.send(SessionEvent::from(template.clone()));
        }

        for action in &transition.actions {
            match action {
                Action::StartTimer { generation } => self.start_timer(*generation),
                Action::StopTimer => self.stop_timer(),
                other => {
                    if self.effects_tx.send(Effect::Run(other.clone())).is_err() {
                        error!(action = other.name(), "Executor is gone, action dropped");
                    }
                }
            }
        }
    }

    fn start_timer(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + TIMER_PERIOD, TIMER_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.apply(SessionInput::TimerTick { generation }).is_ignored() {
                    break;
                }
            }
        });

        if let Some(previous) = self.timer.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some(task) = self.timer.lock().take() {
            task.abort();
        }
    }

    fn on_action_failed(self: &Arc<Self>, action: &Action, err: crate::error::VoiceError) {
        warn!(
            action = action.name(),
            error = %err,
            category = err.category(),
            "Action failed"
        );
        let _ = self
            .events_tx
            .send(SessionEvent::action_failed(action.name(), &err));

        let mut machine = self.machine.lock();
        // A failure for a call that no longer holds the line must not end its successor
        let breaks_current_call = is_call_critical(action)
            && action.call().is_some_and(|call| machine.is_current_call(call));
        if breaks_current_call {
            let transition = machine.apply(SessionInput::Device(DeviceEvent::Error {
                message: err.to_string(),
            }));
            self.dispatch(&machine, &transition);
        } else {
            machine.note_error(err.to_string());
            self.snapshot_tx.send_replace(machine.snapshot());
        }
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Some(task) = self.timer.get_mut().take() {
            task.abort();
        }
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn run_executor(
    inner: Weak<CoordinatorInner>,
    ctx: ActionContext,
    mut effects: mpsc::UnboundedReceiver<Effect>,
) {
    while let Some(effect) = effects.recv().await {
        match effect {
            Effect::Flush(done) => {
                let _ = done.send(());
            }
            Effect::Run(action) => {
                if let Err(e) = execute_action(&action, &ctx).await {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    inner.on_action_failed(&action, e);
                }
            }
        }
    }
    debug!("Action executor stopped");
}

/// The single authority over one phone line
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct CallCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl CallCoordinator {
    pub fn start(ctx: ActionContext, event_capacity: usize) -> Self {
        let machine = CallSessionMachine::new();
        let (snapshot_tx, _) = watch::channel(machine.snapshot());
        let (events_tx, _) = broadcast::channel(event_capacity.max(1));
        let (effects_tx, effects_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(CoordinatorInner {
            machine: Mutex::new(machine),
            snapshot_tx,
            events_tx,
            effects_tx,
            timer: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let executor = tokio::spawn(run_executor(Arc::downgrade(&inner), ctx, effects_rx));
        inner.tasks.lock().push(executor);

        Self { inner }
    }

    /// Watch the rendered state
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Stream of status changes, offer changes and action failures
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn status(&self) -> CallStatus {
        self.inner.machine.lock().status()
    }

    /// Place an outbound call; returns whether it was accepted
    pub fn call_out(&self, destination: impl Into<String>) -> bool {
        self.user(UserAction::CallOut {
            destination: destination.into(),
        })
    }

    pub fn hangup(&self) -> bool {
        self.user(UserAction::Hangup)
    }

    pub fn answer_call(&self, offer_id: impl Into<OfferId>) -> bool {
        self.user(UserAction::AnswerCall {
            offer_id: offer_id.into(),
        })
    }

    pub fn reject_call(&self, offer_id: impl Into<OfferId>) -> bool {
        self.user(UserAction::RejectCall {
            offer_id: offer_id.into(),
        })
    }

    pub fn toggle_mute(&self) -> bool {
        self.user(UserAction::ToggleMute)
    }

    fn user(&self, action: UserAction) -> bool {
        !self.inner.apply(SessionInput::User(action)).is_ignored()
    }

    pub fn handle_device_event(&self, event: DeviceEvent) {
        self.inner.apply(SessionInput::Device(event));
    }

    pub fn handle_hub_event(&self, event: HubEvent) {
        self.inner.apply(SessionInput::Hub(event));
    }

    /// Open a provisioning epoch; fails when a call is in progress
    pub fn begin_provisioning(&self) -> VoiceResult<ProvisioningEpoch> {
        let mut machine = self.inner.machine.lock();
        let (epoch, transition) = machine.begin_provisioning()?;
        self.inner.dispatch(&machine, &transition);
        Ok(epoch)
    }

    /// Report the outcome of a provisioning attempt; returns false when stale
    pub fn complete_provisioning(&self, epoch: ProvisioningEpoch, outcome: ProvisioningOutcome) -> bool {
        !self
            .inner
            .apply(SessionInput::Provisioning { epoch, outcome })
            .is_ignored()
    }

    /// Drop every call and offer, then wait for queued effects to finish
    pub async fn teardown(&self) {
        self.inner.apply(SessionInput::Teardown);
        self.flush().await;
    }

    /// Wait until every effect queued so far has been executed
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.inner.effects_tx.send(Effect::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Feed device events into the machine until the sender closes
    pub fn spawn_device_pump(&self, mut events: mpsc::UnboundedReceiver<DeviceEvent>) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.apply(SessionInput::Device(event));
            }
        });
        self.inner.tasks.lock().push(task);
    }

    /// Feed hub lifecycle events into the machine until the sender closes
    pub fn spawn_hub_pump(&self, mut events: mpsc::UnboundedReceiver<HubEvent>) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.apply(SessionInput::Hub(event));
            }
        });
        self.inner.tasks.lock().push(task);
    }
}

impl std::fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("status", &self.status())
            .finish()
    }
}
