//! One task per region control command kind.
//!
//! Every task has three stages. Pre-validation is cheap, side-effect free,
//! and callable from the heartbeat thread before a command is accepted, so
//! the coordinator gets early rejections without the command ever being
//! queued or persisted. Validation plus the action run on the region's
//! executor; the action revalidates because region state may have moved
//! between enqueue and execution. The shared finish step writes terminal
//! status through the command log and fires the heartbeat trigger when the
//! command asked to be notified.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::command::{CommandKind, CommandPayload, CommandStatus, RegionCommand};
use crate::context::StoreContext;
use crate::engine::{ControlWrite, EngineKind, WriteBatch};
use crate::error::{ControlError, Result};
use crate::executor::ControlTask;
use crate::region::{
    Peer, RaftMeta, Region, RegionDefinition, RegionId, RegionState, RegionType,
    VectorIndexParameter,
};
use crate::unix_time_ns;

/// Leadership gate shared by the peer-changing tasks. A no-op on the memory
/// engine, which has no raft nodes.
fn check_raft_leader(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
    if ctx.engine.kind() != EngineKind::RaftStore {
        return Ok(());
    }
    let node = ctx
        .engine
        .node(region_id)
        .ok_or(ControlError::RaftNotFound(region_id))?;
    if !node.is_leader() {
        return Err(ControlError::RaftNotLeader {
            region_id,
            leader_store_id: node.leader_store_id(),
        });
    }
    Ok(())
}

fn region_or_not_found(ctx: &StoreContext, region_id: RegionId) -> Result<Region> {
    ctx.region_meta
        .get(region_id)
        .ok_or(ControlError::RegionNotFound(region_id))
}

fn payload_mismatch(kind: CommandKind) -> ControlError {
    ControlError::IllegalParameters(format!("payload does not match command kind {kind:?}"))
}

/// Shared completion step: record metrics, write terminal status, and notify
/// the coordinator early when requested.
async fn finish(ctx: &StoreContext, cmd: &RegionCommand, result: Result<()>) {
    let ok = result.is_ok();
    if let Err(err) = &result {
        if err.is_internal() {
            tracing::error!(
                command_id = cmd.id,
                region_id = cmd.region_id,
                kind = ?cmd.kind,
                error = %err,
                "region command failed"
            );
        } else {
            tracing::debug!(
                command_id = cmd.id,
                region_id = cmd.region_id,
                kind = ?cmd.kind,
                error = %err,
                "region command failed"
            );
        }
    }

    if let Some(metrics) = ctx.metrics.get(cmd.region_id) {
        metrics.record_command(ok);
    }

    let status = if ok {
        CommandStatus::Done
    } else {
        CommandStatus::Fail
    };
    if let Err(err) = ctx.command_log.update_status(cmd.id, status) {
        tracing::error!(command_id = cmd.id, error = %err, "update command status failed");
    }

    if cmd.is_notify {
        ctx.heartbeat.trigger(cmd.region_id);
    }
}

pub struct CreateRegionTask {
    cmd: RegionCommand,
}

impl CreateRegionTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        Self::validate(ctx, cmd.region_id)
    }

    fn validate(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        if let Some(region) = ctx.region_meta.get(region_id) {
            if region.state != RegionState::New {
                return Err(ControlError::RegionExist(region_id));
            }
        }
        Ok(())
    }

    async fn create_region(
        ctx: &StoreContext,
        region_id: RegionId,
        definition: RegionDefinition,
        split_from_region_id: RegionId,
    ) -> Result<()> {
        Self::validate(ctx, region_id)?;
        tracing::debug!(region_id, name = %definition.name, "create region");

        let region = Region::new(region_id, definition);
        ctx.region_meta.add(region.clone())?;

        let metrics = ctx.metrics.register(region_id);

        if ctx.engine.kind() == EngineKind::RaftStore {
            let raft_meta = RaftMeta::new(region_id);
            ctx.region_meta.add_raft_meta(raft_meta.clone())?;
            ctx.engine
                .add_node(
                    &region,
                    &raft_meta,
                    Some(metrics),
                    ctx.listener.clone(),
                    false,
                )
                .await?;
        }

        let target = if split_from_region_id == 0 {
            RegionState::Normal
        } else {
            RegionState::Standby
        };
        ctx.region_meta.update_state(region_id, target)?;
        Ok(())
    }
}

#[async_trait]
impl ControlTask for CreateRegionTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload.clone() {
            CommandPayload::Create {
                definition,
                split_from_region_id,
            } => {
                Self::create_region(&ctx, self.cmd.region_id, definition, split_from_region_id)
                    .await
            }
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct DeleteRegionTask {
    cmd: RegionCommand,
}

impl DeleteRegionTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        Self::validate(ctx, cmd.region_id)
    }

    fn validate(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        let region = region_or_not_found(ctx, region_id)?;
        match region.state {
            RegionState::Deleting | RegionState::Deleted => {
                Err(ControlError::RegionDeleting(region_id))
            }
            RegionState::Splitting | RegionState::Merging => Err(ControlError::RegionState {
                region_id,
                state: region.state,
                op: "delete",
            }),
            _ => Ok(()),
        }
    }

    async fn delete_region(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        Self::validate(ctx, region_id)?;
        let region = region_or_not_found(ctx, region_id)?;
        tracing::debug!(region_id, "delete region");

        ctx.region_meta
            .update_state(region_id, RegionState::Deleting)?;

        if ctx.engine.kind() == EngineKind::RaftStore {
            ctx.engine.destroy_node(region_id).await?;
        }
        ctx.engine.delete_range(region_id, region.range()).await?;

        if region.region_type == RegionType::Index {
            if ctx.vector_index.vector_index(region_id).is_some() {
                ctx.vector_index.delete(region_id)?;
            }
            ctx.vector_index
                .snapshot_manager()
                .delete_snapshots(region_id);
        }

        // The region's own executor cannot tear itself down, so executor
        // removal goes through the shared executor as its own command.
        match ctx.controller() {
            Some(controller) => {
                let destroy = RegionCommand::new(
                    unix_time_ns(),
                    region_id,
                    CommandKind::DestroyExecutor,
                    CommandPayload::DestroyExecutor { region_id },
                );
                if let Err(err) = controller.dispatch(destroy).await {
                    tracing::error!(
                        region_id,
                        error = %err,
                        "dispatch destroy executor command failed"
                    );
                }
            }
            None => {
                tracing::error!(region_id, "region controller unavailable for executor teardown");
            }
        }

        ctx.region_meta
            .update_state(region_id, RegionState::Deleted)?;
        ctx.region_meta.delete_raft_meta(region_id)?;
        ctx.metrics.remove(region_id);
        ctx.region_meta.delete(region_id)?;
        Ok(())
    }
}

#[async_trait]
impl ControlTask for DeleteRegionTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload {
            CommandPayload::Delete { region_id } => {
                Self::delete_region(&ctx, region_id).await
            }
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct SplitRegionTask {
    cmd: RegionCommand,
}

impl SplitRegionTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub async fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        match &cmd.payload {
            CommandPayload::Split {
                split_from_region_id,
                split_to_region_id,
                split_watershed_key,
            } => {
                Self::validate(
                    ctx,
                    *split_from_region_id,
                    *split_to_region_id,
                    split_watershed_key,
                )
                .await
            }
            _ => Err(payload_mismatch(cmd.kind)),
        }
    }

    async fn validate(
        ctx: &StoreContext,
        parent_id: RegionId,
        child_id: RegionId,
        watershed_key: &[u8],
    ) -> Result<()> {
        let parent = region_or_not_found(ctx, parent_id)?;
        let _child = region_or_not_found(ctx, child_id)?;

        if !parent.range().is_proper_split_key(watershed_key) {
            return Err(ControlError::KeyInvalid(
                "split watershed key is outside the parent range".to_string(),
            ));
        }

        if parent.state == RegionState::Splitting {
            return Err(ControlError::RegionSplitting(parent_id));
        }
        if !matches!(parent.state, RegionState::Normal | RegionState::Standby) {
            return Err(ControlError::RegionState {
                region_id: parent_id,
                state: parent.state,
                op: "split",
            });
        }

        if ctx.engine.kind() == EngineKind::RaftStore {
            let node = ctx
                .engine
                .node(parent_id)
                .ok_or(ControlError::RaftNotFound(parent_id))?;
            if !node.is_leader() {
                return Err(ControlError::RaftNotLeader {
                    region_id: parent_id,
                    leader_store_id: node.leader_store_id(),
                });
            }

            if parent.region_type == RegionType::Index {
                // Every follower must already hold the vector index, or the
                // child replicas would come up unable to serve.
                let self_peer = node.peer();
                for peer in node.list_peers() {
                    if peer.store_id == self_peer.store_id {
                        continue;
                    }
                    if !Self::probe_peer(ctx, &peer, parent_id).await {
                        return Err(ControlError::VectorIndexNotFound(parent_id));
                    }
                }
            }
        }

        Ok(())
    }

    /// Ask one follower whether it holds the vector index. Probe errors and
    /// timeouts count as absent.
    async fn probe_peer(ctx: &StoreContext, peer: &Peer, vector_index_id: RegionId) -> bool {
        match timeout(
            ctx.config.probe_timeout,
            ctx.prober.check_exists(peer, vector_index_id),
        )
        .await
        {
            Ok(Ok(exists)) => exists,
            Ok(Err(err)) => {
                tracing::error!(
                    peer = %peer.address(),
                    vector_index_id,
                    error = %err,
                    "check peer vector index failed"
                );
                false
            }
            Err(_) => {
                tracing::error!(
                    peer = %peer.address(),
                    vector_index_id,
                    "check peer vector index timed out"
                );
                false
            }
        }
    }

    async fn split_region(
        ctx: &StoreContext,
        parent_id: RegionId,
        child_id: RegionId,
        watershed_key: Vec<u8>,
    ) -> Result<()> {
        Self::validate(ctx, parent_id, child_id, &watershed_key).await?;

        // The split itself is a replicated write; the lifecycle transitions
        // happen when the state machine applies it. The task only submits.
        let batch = WriteBatch::single(
            parent_id,
            ControlWrite::CommitSplit {
                parent_id,
                child_id,
                watershed_key,
            },
        );
        ctx.engine
            .async_write(
                batch,
                Box::new(move |result| {
                    if let Err(err) = result {
                        tracing::error!(
                            parent_id,
                            child_id,
                            error = %err,
                            "replicated split write failed"
                        );
                    }
                }),
            )
            .await
    }
}

#[async_trait]
impl ControlTask for SplitRegionTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload.clone() {
            CommandPayload::Split {
                split_from_region_id,
                split_to_region_id,
                split_watershed_key,
            } => {
                Self::split_region(
                    &ctx,
                    split_from_region_id,
                    split_to_region_id,
                    split_watershed_key,
                )
                .await
            }
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct ChangePeerTask {
    cmd: RegionCommand,
}

impl ChangePeerTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        Self::validate(ctx, cmd.region_id)
    }

    fn validate(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        let region = region_or_not_found(ctx, region_id)?;
        if region.state != RegionState::Normal {
            return Err(ControlError::RegionState {
                region_id,
                state: region.state,
                op: "change peer",
            });
        }
        check_raft_leader(ctx, region_id)
    }

    async fn change_peer(
        ctx: &StoreContext,
        region_id: RegionId,
        definition: RegionDefinition,
    ) -> Result<()> {
        Self::validate(ctx, region_id)?;
        tracing::debug!(region_id, "change region peers");

        // Learners never enter the raft voter set; they stay in the
        // definition only.
        let voters = definition.peers_with_role(crate::region::PeerRole::Voter);
        if ctx.engine.kind() == EngineKind::RaftStore {
            ctx.engine.change_node(region_id, voters).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ControlTask for ChangePeerTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload.clone() {
            CommandPayload::ChangePeer { definition } => {
                Self::change_peer(&ctx, self.cmd.region_id, definition).await
            }
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct TransferLeaderTask {
    cmd: RegionCommand,
}

impl TransferLeaderTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        match &cmd.payload {
            CommandPayload::TransferLeader { peer } => {
                Self::validate(ctx, cmd.region_id, peer)
            }
            _ => Err(payload_mismatch(cmd.kind)),
        }
    }

    fn validate(ctx: &StoreContext, region_id: RegionId, peer: &Peer) -> Result<()> {
        let region = region_or_not_found(ctx, region_id)?;
        if region.state != RegionState::Normal {
            return Err(ControlError::RegionState {
                region_id,
                state: region.state,
                op: "transfer leader",
            });
        }
        if peer.store_id == ctx.store_id {
            return Err(ControlError::RaftTransferLeader(
                "target peer is already the leader".to_string(),
            ));
        }
        if peer.host.is_empty() || peer.host == "0.0.0.0" {
            return Err(ControlError::IllegalParameters(
                "target peer raft location is invalid".to_string(),
            ));
        }
        Ok(())
    }

    async fn transfer_leader(ctx: &StoreContext, region_id: RegionId, peer: Peer) -> Result<()> {
        Self::validate(ctx, region_id, &peer)?;
        tracing::debug!(region_id, target = %peer.address(), "transfer region leader");
        if ctx.engine.kind() == EngineKind::RaftStore {
            ctx.engine.transfer_leader(region_id, &peer).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ControlTask for TransferLeaderTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload.clone() {
            CommandPayload::TransferLeader { peer } => {
                Self::transfer_leader(&ctx, self.cmd.region_id, peer).await
            }
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct SnapshotRegionTask {
    cmd: RegionCommand,
}

impl SnapshotRegionTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }
}

#[async_trait]
impl ControlTask for SnapshotRegionTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        // Snapshots run on leaders and followers alike and never touch
        // region state.
        let result = ctx.engine.do_snapshot(self.cmd.region_id).await;
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct PurgeRegionTask {
    cmd: RegionCommand,
}

impl PurgeRegionTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        Self::validate(ctx, cmd.region_id)
    }

    fn validate(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        let region = region_or_not_found(ctx, region_id)?;
        if region.state != RegionState::Deleted {
            return Err(ControlError::RegionDeleted(region_id));
        }
        Ok(())
    }

    fn purge_region(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        Self::validate(ctx, region_id)?;
        tracing::debug!(region_id, "purge region");
        ctx.region_meta.delete(region_id)
    }
}

#[async_trait]
impl ControlTask for PurgeRegionTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload {
            CommandPayload::Purge { region_id } => Self::purge_region(&ctx, region_id),
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct SnapshotVectorIndexTask {
    cmd: RegionCommand,
}

impl SnapshotVectorIndexTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        let region_id = match &cmd.payload {
            CommandPayload::SnapshotVectorIndex { vector_index_id } => *vector_index_id,
            _ => return Err(payload_mismatch(cmd.kind)),
        };
        region_or_not_found(ctx, region_id)?;
        ctx.vector_index
            .vector_index(region_id)
            .ok_or(ControlError::VectorIndexNotFound(region_id))?;
        Ok(())
    }

    fn save_snapshot(ctx: &StoreContext, vector_index_id: RegionId) -> Result<()> {
        region_or_not_found(ctx, vector_index_id)?;
        let index = ctx
            .vector_index
            .vector_index(vector_index_id)
            .ok_or(ControlError::VectorIndexNotFound(vector_index_id))?;

        let snapshot_log_id = ctx
            .vector_index
            .snapshot_manager()
            .save_snapshot(index.as_ref())?;
        ctx.vector_index
            .update_snapshot_log_id(vector_index_id, snapshot_log_id);
        if ctx.region_meta.raft_meta(vector_index_id).is_some() {
            ctx.region_meta
                .update_snapshot_log_id(vector_index_id, snapshot_log_id)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ControlTask for SnapshotVectorIndexTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload {
            CommandPayload::SnapshotVectorIndex { vector_index_id } => {
                Self::save_snapshot(&ctx, vector_index_id)
            }
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct UpdateDefinitionTask {
    cmd: RegionCommand,
}

impl UpdateDefinitionTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        Self::validate(ctx, cmd.region_id)
    }

    fn validate(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        let region = region_or_not_found(ctx, region_id)?;
        if region.state != RegionState::Normal {
            return Err(ControlError::RegionState {
                region_id,
                state: region.state,
                op: "update definition",
            });
        }
        Ok(())
    }

    /// The only definition change supported today is enlarging an HNSW
    /// index's element capacity. A non-growing capacity is a no-op success;
    /// anything other than an HNSW parameter is a parameter error.
    fn update_definition(
        ctx: &StoreContext,
        region_id: RegionId,
        new_definition: RegionDefinition,
    ) -> Result<()> {
        Self::validate(ctx, region_id)?;
        let mut region = region_or_not_found(ctx, region_id)?;

        let index = ctx
            .vector_index
            .vector_index(region_id)
            .ok_or(ControlError::VectorIndexNotFound(region_id))?;

        let Some(VectorIndexParameter::Hnsw {
            max_elements: new_max_elements,
            ..
        }) = new_definition.index_parameter
        else {
            return Err(ControlError::IllegalParameters(format!(
                "no hnsw parameter in new definition for region {region_id}"
            )));
        };

        let hnsw = index
            .as_hnsw()
            .ok_or(ControlError::VectorIndexNotFound(region_id))?;
        let old_max_elements = hnsw.max_elements();
        if new_max_elements <= old_max_elements {
            tracing::debug!(
                region_id,
                new_max_elements,
                old_max_elements,
                "hnsw capacity not growing, skipping"
            );
            return Ok(());
        }

        hnsw.resize_max_elements(new_max_elements)?;
        region.definition.index_parameter = new_definition.index_parameter;
        ctx.region_meta.update_region(region)?;
        tracing::debug!(
            region_id,
            new_max_elements,
            old_max_elements,
            "hnsw capacity resized"
        );
        Ok(())
    }
}

#[async_trait]
impl ControlTask for UpdateDefinitionTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload.clone() {
            CommandPayload::UpdateDefinition { new_definition } => {
                Self::update_definition(&ctx, self.cmd.region_id, new_definition)
            }
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct SwitchSplitTask {
    cmd: RegionCommand,
}

impl SwitchSplitTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        region_or_not_found(ctx, cmd.region_id).map(|_| ())
    }

    fn switch_split(ctx: &StoreContext, region_id: RegionId, disable_split: bool) -> Result<()> {
        let mut region = region_or_not_found(ctx, region_id)?;
        tracing::debug!(region_id, disable_split, "switch split");
        region.disable_split = disable_split;
        ctx.region_meta.update_region(region)
    }
}

#[async_trait]
impl ControlTask for SwitchSplitTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload {
            CommandPayload::SwitchSplit {
                region_id,
                disable_split,
            } => Self::switch_split(&ctx, region_id, disable_split),
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct HoldVectorIndexTask {
    cmd: RegionCommand,
}

impl HoldVectorIndexTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        let region_id = match &cmd.payload {
            CommandPayload::HoldVectorIndex { region_id, .. } => *region_id,
            _ => return Err(payload_mismatch(cmd.kind)),
        };
        Self::validate(ctx, region_id)
    }

    fn validate(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        region_or_not_found(ctx, region_id)?;
        if ctx.engine.kind() == EngineKind::RaftStore && ctx.engine.node(region_id).is_none() {
            return Err(ControlError::RaftNotFound(region_id));
        }
        Ok(())
    }

    fn hold_vector_index(ctx: &StoreContext, region_id: RegionId, is_hold: bool) -> Result<()> {
        Self::validate(ctx, region_id)?;
        let mut region = region_or_not_found(ctx, region_id)?;
        region.hold_vector_index = is_hold;
        ctx.region_meta.update_region(region.clone())?;

        let existing = ctx.vector_index.vector_index(region_id);
        if is_hold {
            if existing.is_none() {
                // Build failures are logged, not propagated; the build can be
                // retried on the next hold command.
                match ctx.vector_index.load_or_build(&region) {
                    Ok(_) => {
                        tracing::debug!(region_id, "vector index load or build finished");
                    }
                    Err(err) => {
                        tracing::error!(
                            region_id,
                            error = %err,
                            "vector index load or build failed"
                        );
                    }
                }
            }
        } else if existing.is_some() {
            tracing::debug!(region_id, "dropping held vector index");
            ctx.vector_index.delete(region_id)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ControlTask for HoldVectorIndexTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload {
            CommandPayload::HoldVectorIndex { region_id, is_hold } => {
                Self::hold_vector_index(&ctx, region_id, is_hold)
            }
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct StopRegionTask {
    cmd: RegionCommand,
}

impl StopRegionTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    pub fn pre_validate(ctx: &StoreContext, cmd: &RegionCommand) -> Result<()> {
        Self::validate(ctx, cmd.region_id)
    }

    fn validate(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        let region = region_or_not_found(ctx, region_id)?;
        if region.state != RegionState::Orphan {
            return Err(ControlError::RegionState {
                region_id,
                state: region.state,
                op: "stop",
            });
        }
        Ok(())
    }

    async fn stop_region(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        Self::validate(ctx, region_id)?;
        tracing::debug!(region_id, "stop orphan region");
        if ctx.engine.kind() == EngineKind::RaftStore {
            // The raft node goes down; the ORPHAN record stays for purge.
            ctx.engine.stop_node(region_id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ControlTask for StopRegionTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload {
            CommandPayload::Stop { region_id } => Self::stop_region(&ctx, region_id).await,
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}

pub struct DestroyExecutorTask {
    cmd: RegionCommand,
}

impl DestroyExecutorTask {
    pub fn new(cmd: RegionCommand) -> Self {
        Self { cmd }
    }

    async fn destroy_executor(ctx: &StoreContext, region_id: RegionId) -> Result<()> {
        let controller = ctx
            .controller()
            .ok_or_else(|| ControlError::internal("region controller unavailable"))?;
        controller.unregister_executor(region_id).await;
        Ok(())
    }
}

#[async_trait]
impl ControlTask for DestroyExecutorTask {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>) {
        let result = match self.cmd.payload {
            CommandPayload::DestroyExecutor { region_id } => {
                Self::destroy_executor(&ctx, region_id).await
            }
            _ => Err(payload_mismatch(self.cmd.kind)),
        };
        finish(&ctx, &self.cmd, result).await;
    }
}
