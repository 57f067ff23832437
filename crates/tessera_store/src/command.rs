//! Region control commands: the records the coordinator attaches to
//! heartbeat replies and the store persists, executes, and reports on.

use serde::{Deserialize, Serialize};

use crate::region::{Peer, RegionDefinition, RegionId};
use crate::unix_time_ms;

/// Globally unique command identifier, assigned by the coordinator and
/// monotonically increasing.
pub type CommandId = u64;

/// Command kind. The discriminants are wire-visible and must stay stable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandKind {
    None = 0,
    Create = 1,
    Delete = 2,
    Split = 3,
    Merge = 4,
    ChangePeer = 5,
    TransferLeader = 6,
    Snapshot = 7,
    Purge = 8,
    SnapshotVectorIndex = 9,
    UpdateDefinition = 10,
    SwitchSplit = 11,
    HoldVectorIndex = 12,
    Stop = 30,
    DestroyExecutor = 31,
}

impl CommandKind {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Region-agnostic kinds run on the shared executor instead of a
    /// per-region one.
    pub fn is_region_agnostic(self) -> bool {
        matches!(self, CommandKind::Purge | CommandKind::DestroyExecutor)
    }
}

/// Terminal status of a command. Transitions `None -> Done` or
/// `None -> Fail` exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandStatus {
    None = 0,
    Done = 1,
    Fail = 2,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandStatus::None)
    }
}

/// Kind-specific command payload, one arm per command kind. Adding a kind is
/// one arm here plus one task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandPayload {
    None,
    Create {
        definition: RegionDefinition,
        /// Non-zero when this region is the pre-created child of a split;
        /// such regions land in STANDBY instead of NORMAL.
        split_from_region_id: RegionId,
    },
    Delete {
        region_id: RegionId,
    },
    Split {
        split_from_region_id: RegionId,
        split_to_region_id: RegionId,
        split_watershed_key: Vec<u8>,
    },
    Merge {
        merge_from_region_id: RegionId,
        merge_to_region_id: RegionId,
    },
    ChangePeer {
        definition: RegionDefinition,
    },
    TransferLeader {
        peer: Peer,
    },
    Snapshot,
    Purge {
        region_id: RegionId,
    },
    SnapshotVectorIndex {
        vector_index_id: RegionId,
    },
    UpdateDefinition {
        new_definition: RegionDefinition,
    },
    SwitchSplit {
        region_id: RegionId,
        disable_split: bool,
    },
    HoldVectorIndex {
        region_id: RegionId,
        is_hold: bool,
    },
    Stop {
        region_id: RegionId,
    },
    DestroyExecutor {
        region_id: RegionId,
    },
}

/// A persisted region control command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionCommand {
    pub id: CommandId,
    pub region_id: RegionId,
    pub kind: CommandKind,
    pub created_at_ms: u64,
    pub payload: CommandPayload,
    /// Request an immediate heartbeat once the command reaches terminal
    /// status, instead of waiting for the next interval.
    pub is_notify: bool,
    pub status: CommandStatus,
}

impl RegionCommand {
    /// Build a coordinator-issued command with status NONE.
    pub fn new(
        id: CommandId,
        region_id: RegionId,
        kind: CommandKind,
        payload: CommandPayload,
    ) -> Self {
        Self {
            id,
            region_id,
            kind,
            created_at_ms: unix_time_ms(),
            payload,
            is_notify: false,
            status: CommandStatus::None,
        }
    }

    pub fn with_notify(mut self) -> Self {
        self.is_notify = true;
        self
    }
}
