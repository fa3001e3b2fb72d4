use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapters::{PresenceHubClient, TokenProvider, VoiceDeviceAdapter};
use crate::error::VoiceResult;
use crate::state_table::Action;
use crate::types::AgentIdentity;

/// Everything an action may touch
#[derive(Clone)]
pub struct ActionContext {
    pub identity: AgentIdentity,
    pub device: Arc<VoiceDeviceAdapter>,
    /// `None` when presence is disabled
    pub presence: Option<PresenceHubClient>,
    pub tokens: Arc<dyn TokenProvider>,
}

/// Whether a failure of this action breaks the call itself
///
/// Such failures are fed back to the machine as a device error while the call
/// they were issued for still holds the line; everything else is only logged
/// and reported.
pub fn is_call_critical(action: &Action) -> bool {
    matches!(action, Action::ConnectDevice { .. } | Action::AcceptOffer { .. })
}

/// Execute an action from the state table
pub async fn execute_action(action: &Action, ctx: &ActionContext) -> VoiceResult<()> {
    debug!(action = action.name(), "Executing action");

    match action {
        Action::ConnectDevice { destination, .. } => {
            info!(destination = %destination, "Placing outbound call");
            ctx.device.connect(destination).await?;
        }
        Action::DisconnectAll => {
            ctx.device.disconnect_all().await?;
        }
        Action::AcceptOffer { offer_id, .. } => {
            info!(offer_id = %offer_id, "Accepting incoming call");
            ctx.device.accept_incoming(offer_id).await?;
        }
        Action::RejectOffer { offer_id } => {
            info!(offer_id = %offer_id, "Rejecting incoming call");
            ctx.device.reject_incoming(offer_id).await?;
        }
        Action::SetMuted { offer_id, muted } => {
            ctx.device.set_muted(offer_id.clone(), *muted).await?;
        }
        Action::Announce(state) => match &ctx.presence {
            // Presence failures are logged inside the client and never surface
            Some(presence) => presence.announce_current(*state).await,
            None => debug!(state = %state, "Presence disabled, announce skipped"),
        },
        Action::RefreshToken => {
            let token = ctx.tokens.fetch_token(&ctx.identity).await?;
            ctx.device.update_token(&token).await?;
            info!(identity = %ctx.identity, "Voice token refreshed");
        }
        Action::StartTimer { .. } | Action::StopTimer => {
            // Timer actions are applied by the coordinator under the machine lock
            warn!(action = action.name(), "Timer action reached the executor, ignoring");
        }
    }

    Ok(())
}
