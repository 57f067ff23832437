//! Heartbeat-side command intake and the notify-now trigger.
//!
//! The heartbeat loop itself (store metrics, the RPC exchange) lives with the
//! server; this module covers the two points where it meets the control
//! plane. Inbound: the coordinator reply carries an ordered command batch,
//! each command is pre-validated and dispatched, and rejections are returned
//! so the next heartbeat can report them. Outbound: a task finishing with
//! `is_notify` fires the trigger so the loop heartbeats immediately instead
//! of waiting out the interval.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::command::{CommandId, CommandKind, RegionCommand};
use crate::controller::RegionController;
use crate::error::Result;
use crate::region::RegionId;

/// Receiving side of the notify-now channel, owned by the heartbeat loop.
pub type HeartbeatReceiver = mpsc::UnboundedReceiver<RegionId>;

/// Fire-and-forget handle that requests an immediate heartbeat.
#[derive(Clone)]
pub struct HeartbeatTrigger {
    tx: mpsc::UnboundedSender<RegionId>,
}

impl HeartbeatTrigger {
    pub fn trigger(&self, region_id: RegionId) {
        // A dropped receiver just means the heartbeat loop is gone; the next
        // periodic heartbeat covers the notification.
        if self.tx.send(region_id).is_err() {
            tracing::debug!(region_id, "heartbeat trigger receiver dropped");
        }
    }
}

pub fn heartbeat_channel() -> (HeartbeatTrigger, HeartbeatReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HeartbeatTrigger { tx }, rx)
}

/// Outcome of one command from a heartbeat reply. Failed pre-validations are
/// reported here and never reach the command log.
pub struct CommandOutcome {
    pub command_id: CommandId,
    pub region_id: RegionId,
    pub kind: CommandKind,
    pub result: Result<()>,
}

/// Pre-validate and dispatch a heartbeat reply's command batch in order.
pub async fn apply_region_commands(
    controller: &Arc<RegionController>,
    commands: Vec<RegionCommand>,
) -> Vec<CommandOutcome> {
    let mut outcomes = Vec::with_capacity(commands.len());
    for command in commands {
        let command_id = command.id;
        let region_id = command.region_id;
        let kind = command.kind;

        let result = match controller.pre_validate(&command).await {
            Ok(()) => controller.dispatch(command).await,
            Err(err) => {
                tracing::debug!(
                    command_id,
                    region_id,
                    error = %err,
                    "region command rejected by pre-validation"
                );
                Err(err)
            }
        };
        outcomes.push(CommandOutcome {
            command_id,
            region_id,
            kind,
            result,
        });
    }
    outcomes
}
