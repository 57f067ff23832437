//! Region records, definitions, and the region lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::unix_time_ms;

/// Stable region identifier, assigned by the coordinator.
pub type RegionId = u64;
/// Store (process) identifier.
pub type StoreId = u64;

/// What a region stores: plain key/value rows or a vector index partition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegionType {
    Store,
    Index,
}

/// Replica participation. Voters contribute to quorum, learners do not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PeerRole {
    Voter,
    Learner,
}

/// One replica participant of a region's consensus group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub store_id: StoreId,
    pub host: String,
    pub port: u16,
    pub role: PeerRole,
}

impl Peer {
    /// `host:port` rendering used in probe targets and log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Lexicographic key range, end-exclusive. An empty end key is unbounded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct KeyRange {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl KeyRange {
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    /// True when `key` falls inside `[start_key, end_key)`.
    pub fn contains(&self, key: &[u8]) -> bool {
        let lower_ok = self.start_key.is_empty() || key >= self.start_key.as_slice();
        let upper_ok = self.end_key.is_empty() || key < self.end_key.as_slice();
        lower_ok && upper_ok
    }

    /// True when `key` splits the range into two non-empty halves.
    pub fn is_proper_split_key(&self, key: &[u8]) -> bool {
        let above_start = self.start_key.is_empty() || key > self.start_key.as_slice();
        let below_end = self.end_key.is_empty() || key < self.end_key.as_slice();
        above_start && below_end && !key.is_empty()
    }
}

/// Vector index build parameters carried on INDEX region definitions.
///
/// Only the HNSW family is wired today; the enum leaves room for the flat and
/// IVF families the index nodes also serve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum VectorIndexParameter {
    Hnsw {
        dimension: u32,
        max_elements: u64,
        ef_construction: u32,
        m: u32,
    },
}

/// Coordinator-owned description of a region replica set and its key range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionDefinition {
    pub name: String,
    pub region_type: RegionType,
    pub replicas: u32,
    pub range: KeyRange,
    pub peers: Vec<Peer>,
    pub schema_id: u64,
    pub table_id: u64,
    pub index_id: u64,
    pub part_id: u64,
    /// Present for INDEX regions.
    pub index_parameter: Option<VectorIndexParameter>,
}

impl RegionDefinition {
    /// Peers holding the given role, preserving definition order.
    pub fn peers_with_role(&self, role: PeerRole) -> Vec<Peer> {
        self.peers
            .iter()
            .filter(|p| p.role == role)
            .cloned()
            .collect()
    }
}

/// Region lifecycle state.
///
/// ```text
///   NEW ──create ok──▶ NORMAL ──split──▶ SPLITTING ──commit──▶ NORMAL
///                                  │
///                                  ├─ delete ──▶ DELETING ──▶ DELETED
///                                  └─ merge ──▶ MERGING
///   NEW (sub-region from split) ──▶ STANDBY ──parent commit──▶ NORMAL
///   any ──peer removed──▶ ORPHAN
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegionState {
    New,
    Normal,
    Standby,
    Splitting,
    Merging,
    Deleting,
    Deleted,
    Orphan,
}

impl RegionState {
    /// Whether the lifecycle state machine permits moving to `next`.
    /// Re-entering the current state is allowed so replayed commands stay
    /// idempotent under at-least-once delivery.
    pub fn can_transition_to(self, next: RegionState) -> bool {
        use RegionState::*;
        if self == next {
            return true;
        }
        match self {
            New => matches!(next, Normal | Standby | Deleting | Orphan),
            Normal => matches!(next, Splitting | Merging | Deleting | Orphan),
            Standby => matches!(next, Normal | Splitting | Deleting | Orphan),
            Splitting => matches!(next, Normal | Orphan),
            Merging => matches!(next, Normal | Deleting | Deleted | Orphan),
            Deleting => matches!(next, Deleted),
            Deleted => false,
            Orphan => matches!(next, Deleting),
        }
    }
}

/// Region epoch. `version` bumps on range changes (split/merge),
/// `conf_version` bumps on peer-set changes. Compared lexicographically and
/// never decreases for a live region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct RegionEpoch {
    pub version: u64,
    pub conf_version: u64,
}

impl RegionEpoch {
    pub fn first() -> Self {
        Self {
            version: 1,
            conf_version: 1,
        }
    }
}

/// One entry of a region's state history, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateChange {
    pub state: RegionState,
    pub at_ms: u64,
}

/// The store-local region record. Owned by the region meta store; every
/// mutation goes through its API so transitions are validated and persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub region_type: RegionType,
    pub definition: RegionDefinition,
    pub state: RegionState,
    pub state_history: Vec<StateChange>,
    pub epoch: RegionEpoch,
    pub leader_store_id: StoreId,
    /// Split lineage: the region this one was carved out of, if any.
    pub parent_id: RegionId,
    pub children: Vec<RegionId>,
    pub last_split_at_ms: u64,
    /// Split switch controlled by the coordinator.
    pub disable_split: bool,
    /// Split switch controlled locally (e.g. while a snapshot is in flight).
    pub temporary_disable_split: bool,
    /// Whether this replica should hold an in-memory vector index.
    pub hold_vector_index: bool,
}

impl Region {
    /// Build a fresh record in the NEW state from a coordinator definition.
    pub fn new(id: RegionId, definition: RegionDefinition) -> Self {
        let region_type = definition.region_type;
        Self {
            id,
            region_type,
            definition,
            state: RegionState::New,
            state_history: vec![StateChange {
                state: RegionState::New,
                at_ms: unix_time_ms(),
            }],
            epoch: RegionEpoch::first(),
            leader_store_id: 0,
            parent_id: 0,
            children: Vec::new(),
            last_split_at_ms: 0,
            disable_split: false,
            temporary_disable_split: false,
            hold_vector_index: false,
        }
    }

    pub fn range(&self) -> &KeyRange {
        &self.definition.range
    }
}

/// Per-region raft bookkeeping persisted next to the region record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaftMeta {
    pub region_id: RegionId,
    pub term: u64,
    pub applied_index: u64,
    pub snapshot_log_id: u64,
}

impl RaftMeta {
    pub fn new(region_id: RegionId) -> Self {
        Self {
            region_id,
            term: 0,
            applied_index: 0,
            snapshot_log_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> KeyRange {
        KeyRange::new(start.as_bytes().to_vec(), end.as_bytes().to_vec())
    }

    #[test]
    fn split_key_must_be_strictly_inside_range() {
        let r = range("a", "z");
        assert!(r.is_proper_split_key(b"m"));
        assert!(!r.is_proper_split_key(b"a"));
        assert!(!r.is_proper_split_key(b"z"));
        assert!(!r.is_proper_split_key(b"zz"));
        assert!(!r.is_proper_split_key(b""));
    }

    #[test]
    fn unbounded_range_accepts_any_interior_key() {
        let r = KeyRange::default();
        assert!(r.contains(b"anything"));
        assert!(r.is_proper_split_key(b"k"));
    }

    #[test]
    fn lifecycle_permits_the_documented_transitions() {
        use RegionState::*;
        assert!(New.can_transition_to(Normal));
        assert!(New.can_transition_to(Standby));
        assert!(Normal.can_transition_to(Splitting));
        assert!(Splitting.can_transition_to(Normal));
        assert!(Standby.can_transition_to(Normal));
        assert!(Normal.can_transition_to(Deleting));
        assert!(Deleting.can_transition_to(Deleted));
        assert!(Normal.can_transition_to(Orphan));
        assert!(Orphan.can_transition_to(Deleting));
    }

    #[test]
    fn lifecycle_rejects_skipped_and_backward_transitions() {
        use RegionState::*;
        assert!(!New.can_transition_to(Splitting));
        assert!(!Deleted.can_transition_to(Normal));
        assert!(!Deleting.can_transition_to(Normal));
        assert!(!Splitting.can_transition_to(Deleting));
        assert!(!Orphan.can_transition_to(Normal));
    }

    #[test]
    fn reentering_the_same_state_is_allowed() {
        assert!(RegionState::Deleting.can_transition_to(RegionState::Deleting));
        assert!(RegionState::Deleted.can_transition_to(RegionState::Deleted));
    }

    #[test]
    fn epochs_compare_lexicographically() {
        let a = RegionEpoch {
            version: 1,
            conf_version: 9,
        };
        let b = RegionEpoch {
            version: 2,
            conf_version: 0,
        };
        assert!(a < b);
    }
}
