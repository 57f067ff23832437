//! Store-side region control plane for the Tessera distributed vector/KV
//! database.
//!
//! A Tessera store hosts many Raft-replicated regions. The coordinator drives
//! region lifecycle (create, delete, split, change-peer, transfer-leader,
//! snapshot, ...) by attaching commands to heartbeat replies; this crate
//! receives those commands, validates them against local state, serializes
//! them per region on background executors, drives the consensus and
//! vector-index engines through each transition, and reports terminal status
//! back through the persistent command log.
//!
//! The consensus implementation, the gRPC surface, and the vector-index math
//! live outside this crate and are reached through the traits in [`engine`]
//! and [`vector_index`].

pub mod command;
pub mod command_log;
pub mod context;
pub mod controller;
pub mod engine;
pub mod error;
pub mod executor;
pub mod heartbeat;
pub mod keys;
pub mod metrics;
pub mod region;
pub mod region_meta;
pub mod tasks;
pub mod testing;
pub mod vector_index;

pub use command::{CommandId, CommandKind, CommandPayload, CommandStatus, RegionCommand};
pub use command_log::CommandLog;
pub use context::{ControlConfig, StoreContext};
pub use controller::RegionController;
pub use engine::{Engine, EngineKind, MemoryEngine};
pub use error::{ControlError, Result};
pub use region::{
    KeyRange, Peer, PeerRole, Region, RegionDefinition, RegionEpoch, RegionId, RegionState,
    RegionType, StoreId,
};
pub use region_meta::RegionMetaStore;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the unix epoch, saturating on clock errors.
pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

/// Wall-clock nanoseconds since the unix epoch, used for locally generated
/// command ids.
pub(crate) fn unix_time_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}
