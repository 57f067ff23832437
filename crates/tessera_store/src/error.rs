//! Error kinds surfaced by the region control plane.

use thiserror::Error;

use crate::command::CommandId;
use crate::region::{RegionId, RegionState, StoreId};

/// Result type for control-plane operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors produced while validating or executing region control commands.
///
/// The variants mirror the wire-visible error classification the coordinator
/// understands; pre-validation failures are reported through the heartbeat
/// reply and never persisted, while execution failures mark the command FAIL
/// in the command log.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("region {0} not found")]
    RegionNotFound(RegionId),

    #[error("region {0} already exists")]
    RegionExist(RegionId),

    #[error("region {0} is unavailable")]
    RegionUnavailable(RegionId),

    /// Illegal region state for the requested operation.
    #[error("region {region_id} state {state:?} does not allow {op}")]
    RegionState {
        region_id: RegionId,
        state: RegionState,
        op: &'static str,
    },

    #[error("region {0} is deleting or deleted")]
    RegionDeleting(RegionId),

    #[error("region {0} is not deleted")]
    RegionDeleted(RegionId),

    #[error("region {0} is splitting")]
    RegionSplitting(RegionId),

    #[error("repeat region command {0}")]
    RegionRepeatCommand(CommandId),

    #[error("invalid key: {0}")]
    KeyInvalid(String),

    #[error("key out of range: {0}")]
    KeyOutOfRange(String),

    #[error("illegal parameters: {0}")]
    IllegalParameters(String),

    #[error("no raft node for region {0}")]
    RaftNotFound(RegionId),

    /// Raised when an operation requires leadership this store does not hold.
    /// Carries the leader store id as a routing hint for the coordinator.
    #[error("region {region_id} is not led by this store, leader is store {leader_store_id}")]
    RaftNotLeader {
        region_id: RegionId,
        leader_store_id: StoreId,
    },

    #[error("transfer leader rejected: {0}")]
    RaftTransferLeader(String),

    #[error("vector index {0} not found")]
    VectorIndexNotFound(RegionId),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ControlError {
    /// Shorthand for an [`ControlError::Internal`] built from a message.
    pub fn internal(msg: impl Into<String>) -> Self {
        ControlError::Internal(anyhow::anyhow!(msg.into()))
    }

    /// True for faults that indicate a bug or an engine-internal failure
    /// rather than an expected validation outcome. These are logged at ERROR
    /// where expected rejections are logged at DEBUG.
    pub fn is_internal(&self) -> bool {
        matches!(self, ControlError::Internal(_))
    }
}
