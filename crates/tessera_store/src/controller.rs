//! Top-level dispatcher for region control commands.
//!
//! Owns the executor registry: one FIFO executor per live region plus the
//! shared executor for region-agnostic kinds. Dispatch deduplicates against
//! the command log, persists, and routes; recovery replays every command that
//! never reached a terminal status.

use std::sync::Arc;

use dashmap::DashMap;

use crate::command::{CommandKind, RegionCommand};
use crate::context::StoreContext;
use crate::error::{ControlError, Result};
use crate::executor::{ControlExecutor, ControlTask};
use crate::region::RegionId;
use crate::tasks::{
    ChangePeerTask, CreateRegionTask, DeleteRegionTask, DestroyExecutorTask, HoldVectorIndexTask,
    PurgeRegionTask, SnapshotRegionTask, SnapshotVectorIndexTask, SplitRegionTask, StopRegionTask,
    SwitchSplitTask, TransferLeaderTask, UpdateDefinitionTask,
};

pub struct RegionController {
    ctx: Arc<StoreContext>,
    shared_executor: Arc<ControlExecutor>,
    executors: DashMap<RegionId, Arc<ControlExecutor>>,
}

impl RegionController {
    /// Build the controller and bind it into the context so tasks can reach
    /// it. Call [`RegionController::init`] before accepting commands and
    /// [`RegionController::recover`] afterwards to replay in-flight work.
    pub fn new(ctx: Arc<StoreContext>) -> Arc<Self> {
        let shared_executor = ControlExecutor::start("shared", ctx.clone());
        let controller = Arc::new(Self {
            ctx: ctx.clone(),
            shared_executor,
            executors: DashMap::new(),
        });
        ctx.bind_controller(&controller);
        controller
    }

    /// Create one executor per region still alive in the meta store.
    pub fn init(&self) {
        for region in self.ctx.region_meta.all_alive() {
            self.register_executor(region.id);
        }
        tracing::debug!(executors = self.executors.len(), "region controller initialized");
    }

    /// Redispatch every command that never reached a terminal status, in id
    /// order. Returns how many commands were replayed.
    pub async fn recover(&self) -> usize {
        let pending = self
            .ctx
            .command_log
            .by_status(crate::command::CommandStatus::None);
        let mut replayed = 0usize;
        for command in pending {
            let command_id = command.id;
            match self.inner_dispatch(command).await {
                Ok(()) => replayed += 1,
                Err(err) => {
                    tracing::error!(command_id, error = %err, "recover region command failed");
                }
            }
        }
        replayed
    }

    /// Stop every executor, draining their queues.
    pub async fn destroy(&self) {
        let executors: Vec<Arc<ControlExecutor>> = self
            .executors
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for executor in executors {
            executor.stop().await;
        }
        self.shared_executor.stop().await;
    }

    /// Region ids that currently have an executor.
    pub fn region_ids(&self) -> Vec<RegionId> {
        let mut ids: Vec<RegionId> = self.executors.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Ensure an executor exists for `region_id`. Idempotent.
    pub fn register_executor(&self, region_id: RegionId) -> Arc<ControlExecutor> {
        self.executors
            .entry(region_id)
            .or_insert_with(|| {
                ControlExecutor::start(format!("region-{region_id}"), self.ctx.clone())
            })
            .clone()
    }

    /// Remove and stop a region's executor. Runs from the shared executor
    /// (a task must never tear down its own queue).
    pub async fn unregister_executor(&self, region_id: RegionId) {
        let executor = self.executors.remove(&region_id).map(|(_, e)| e);
        if let Some(executor) = executor {
            executor.stop().await;
            tracing::debug!(region_id, "region executor destroyed");
        }
    }

    pub fn executor(&self, region_id: RegionId) -> Option<Arc<ControlExecutor>> {
        self.executors.get(&region_id).map(|e| e.clone())
    }

    /// Cheap, side-effect-free validation for a command, used by the
    /// heartbeat layer before anything is persisted. Kinds without a
    /// validator pass.
    pub async fn pre_validate(&self, cmd: &RegionCommand) -> Result<()> {
        let ctx = self.ctx.as_ref();
        match cmd.kind {
            CommandKind::Create => CreateRegionTask::pre_validate(ctx, cmd),
            CommandKind::Delete => DeleteRegionTask::pre_validate(ctx, cmd),
            CommandKind::Split => SplitRegionTask::pre_validate(ctx, cmd).await,
            CommandKind::ChangePeer => ChangePeerTask::pre_validate(ctx, cmd),
            CommandKind::TransferLeader => TransferLeaderTask::pre_validate(ctx, cmd),
            CommandKind::Purge => PurgeRegionTask::pre_validate(ctx, cmd),
            CommandKind::SnapshotVectorIndex => SnapshotVectorIndexTask::pre_validate(ctx, cmd),
            CommandKind::UpdateDefinition => UpdateDefinitionTask::pre_validate(ctx, cmd),
            CommandKind::SwitchSplit => SwitchSplitTask::pre_validate(ctx, cmd),
            CommandKind::HoldVectorIndex => HoldVectorIndexTask::pre_validate(ctx, cmd),
            CommandKind::Stop => StopRegionTask::pre_validate(ctx, cmd),
            CommandKind::None
            | CommandKind::Merge
            | CommandKind::Snapshot
            | CommandKind::DestroyExecutor => Ok(()),
        }
    }

    /// Accept a command: reject repeats, persist, then route to an executor.
    pub async fn dispatch(&self, command: RegionCommand) -> Result<()> {
        if self.ctx.command_log.is_exist(command.id) {
            return Err(ControlError::RegionRepeatCommand(command.id));
        }
        self.ctx.command_log.add(command.clone())?;
        self.inner_dispatch(command).await
    }

    async fn inner_dispatch(&self, command: RegionCommand) -> Result<()> {
        let region_id = command.region_id;
        let kind = command.kind;
        tracing::debug!(
            command_id = command.id,
            region_id,
            kind = ?kind,
            "dispatch region control command"
        );

        // A create is the birth of the region's executor.
        if kind == CommandKind::Create {
            self.register_executor(region_id);
        }

        let executor = if kind.is_region_agnostic() {
            self.shared_executor.clone()
        } else {
            self.executor(region_id)
                .ok_or(ControlError::RegionNotFound(region_id))?
        };

        let task = Self::build_task(command)?;
        if !executor.execute(task) {
            return Err(ControlError::internal(
                "execute region control command failed",
            ));
        }
        Ok(())
    }

    /// The kind-to-task constructor table. Kinds without a task (merge is a
    /// placeholder) are an internal error.
    fn build_task(command: RegionCommand) -> Result<Box<dyn ControlTask>> {
        let task: Box<dyn ControlTask> = match command.kind {
            CommandKind::Create => Box::new(CreateRegionTask::new(command)),
            CommandKind::Delete => Box::new(DeleteRegionTask::new(command)),
            CommandKind::Split => Box::new(SplitRegionTask::new(command)),
            CommandKind::ChangePeer => Box::new(ChangePeerTask::new(command)),
            CommandKind::TransferLeader => Box::new(TransferLeaderTask::new(command)),
            CommandKind::Snapshot => Box::new(SnapshotRegionTask::new(command)),
            CommandKind::Purge => Box::new(PurgeRegionTask::new(command)),
            CommandKind::SnapshotVectorIndex => Box::new(SnapshotVectorIndexTask::new(command)),
            CommandKind::UpdateDefinition => Box::new(UpdateDefinitionTask::new(command)),
            CommandKind::SwitchSplit => Box::new(SwitchSplitTask::new(command)),
            CommandKind::HoldVectorIndex => Box::new(HoldVectorIndexTask::new(command)),
            CommandKind::Stop => Box::new(StopRegionTask::new(command)),
            CommandKind::DestroyExecutor => Box::new(DestroyExecutorTask::new(command)),
            CommandKind::None | CommandKind::Merge => {
                return Err(ControlError::internal(format!(
                    "no task for region control command kind {:?}",
                    command.kind
                )));
            }
        };
        Ok(task)
    }
}
