//! Persistent store of region records and raft bookkeeping.
//!
//! Every region mutation flows through this store: transitions are validated
//! against the lifecycle state machine, appended to the region's state
//! history, and persisted to the `control_meta` partition before the call
//! returns. The split and conf-change commit paths applied by the engine's
//! state machine also land here.

use std::sync::Arc;

use anyhow::Context;
use dashmap::DashMap;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::error::{ControlError, Result};
use crate::keys;
use crate::region::{Peer, PeerRole, RaftMeta, Region, RegionId, RegionState};
use crate::unix_time_ms;

pub struct RegionMetaStore {
    keyspace: Arc<Keyspace>,
    partition: PartitionHandle,
    regions: DashMap<RegionId, Region>,
    raft_metas: DashMap<RegionId, RaftMeta>,
}

impl RegionMetaStore {
    /// Open the store and rehydrate all region and raft-meta records from
    /// disk. Must complete before any command is accepted.
    pub fn open(keyspace: Arc<Keyspace>) -> anyhow::Result<Self> {
        let partition = keyspace
            .open_partition(
                keys::CONTROL_META_PARTITION,
                PartitionCreateOptions::default(),
            )
            .context("open control meta partition")?;

        let regions = DashMap::new();
        for item in partition.prefix(keys::REGION_PREFIX) {
            let (key, value) = item.context("scan region records")?;
            let Some(region_id) = keys::parse_id(&key, keys::REGION_PREFIX) else {
                continue;
            };
            let region: Region =
                serde_json::from_slice(&value).context("decode region record")?;
            regions.insert(region_id, region);
        }

        let raft_metas = DashMap::new();
        for item in partition.prefix(keys::RAFT_META_PREFIX) {
            let (key, value) = item.context("scan raft meta records")?;
            let Some(region_id) = keys::parse_id(&key, keys::RAFT_META_PREFIX) else {
                continue;
            };
            let meta: RaftMeta =
                serde_json::from_slice(&value).context("decode raft meta record")?;
            raft_metas.insert(region_id, meta);
        }

        tracing::debug!(
            regions = regions.len(),
            raft_metas = raft_metas.len(),
            "region meta store rehydrated"
        );

        Ok(Self {
            keyspace,
            partition,
            regions,
            raft_metas,
        })
    }

    pub fn get(&self, region_id: RegionId) -> Option<Region> {
        self.regions.get(&region_id).map(|r| r.clone())
    }

    /// Insert a new region record. An existing record is only replaced while
    /// it is still NEW, so a failed create can be retried under the same id.
    pub fn add(&self, region: Region) -> Result<()> {
        let region_id = region.id;
        if let Some(existing) = self.regions.get(&region_id) {
            if existing.state != RegionState::New {
                return Err(ControlError::RegionExist(region_id));
            }
        }
        self.persist_region(&region)?;
        self.regions.insert(region_id, region);
        Ok(())
    }

    /// Transition a region to `new_state`, validating against the lifecycle
    /// state machine and appending to the state history.
    pub fn update_state(&self, region_id: RegionId, new_state: RegionState) -> Result<Region> {
        let snapshot = {
            let mut entry = self
                .regions
                .get_mut(&region_id)
                .ok_or(ControlError::RegionNotFound(region_id))?;
            if !entry.state.can_transition_to(new_state) {
                return Err(ControlError::RegionState {
                    region_id,
                    state: entry.state,
                    op: "state transition",
                });
            }
            if entry.state != new_state {
                entry.state = new_state;
                entry.state_history.push(crate::region::StateChange {
                    state: new_state,
                    at_ms: unix_time_ms(),
                });
            }
            entry.clone()
        };
        self.persist_region(&snapshot)?;
        tracing::debug!(region_id, state = ?new_state, "region state updated");
        Ok(snapshot)
    }

    /// Replace a region record wholesale (definition edits, flag flips).
    /// State changes must go through [`RegionMetaStore::update_state`].
    pub fn update_region(&self, region: Region) -> Result<()> {
        let region_id = region.id;
        if !self.regions.contains_key(&region_id) {
            return Err(ControlError::RegionNotFound(region_id));
        }
        self.persist_region(&region)?;
        self.regions.insert(region_id, region);
        Ok(())
    }

    /// Remove a region record from memory and disk. Idempotent; called only
    /// by the terminal step of delete and by purge.
    pub fn delete(&self, region_id: RegionId) -> Result<()> {
        self.regions.remove(&region_id);
        self.partition
            .remove(keys::region_key(region_id).as_bytes())
            .context("remove region record")?;
        self.sync()?;
        Ok(())
    }

    /// All regions that still need an executor, i.e. everything not DELETED.
    /// Sorted by id for deterministic startup.
    pub fn all_alive(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = self
            .regions
            .iter()
            .filter(|r| r.state != RegionState::Deleted)
            .map(|r| r.clone())
            .collect();
        regions.sort_by_key(|r| r.id);
        regions
    }

    pub fn add_raft_meta(&self, meta: RaftMeta) -> Result<()> {
        self.persist_raft_meta(&meta)?;
        self.raft_metas.insert(meta.region_id, meta);
        Ok(())
    }

    pub fn raft_meta(&self, region_id: RegionId) -> Option<RaftMeta> {
        self.raft_metas.get(&region_id).map(|m| m.clone())
    }

    pub fn delete_raft_meta(&self, region_id: RegionId) -> Result<()> {
        self.raft_metas.remove(&region_id);
        self.partition
            .remove(keys::raft_meta_key(region_id).as_bytes())
            .context("remove raft meta record")?;
        self.sync()?;
        Ok(())
    }

    /// Record the log id of the newest vector-index snapshot for a region.
    pub fn update_snapshot_log_id(&self, region_id: RegionId, snapshot_log_id: u64) -> Result<()> {
        let snapshot = {
            let mut entry = self
                .raft_metas
                .get_mut(&region_id)
                .ok_or(ControlError::RaftNotFound(region_id))?;
            entry.snapshot_log_id = snapshot_log_id;
            entry.clone()
        };
        self.persist_raft_meta(&snapshot)?;
        Ok(())
    }

    /// Apply a committed split: the parent keeps `[start, watershed)`, the
    /// pre-created STANDBY child takes `[watershed, end)`, both end NORMAL,
    /// and the parent's epoch version is bumped.
    ///
    /// Invoked from the engine's apply path, so it must tolerate replays: a
    /// split that already took effect is a no-op success.
    pub fn commit_split(
        &self,
        parent_id: RegionId,
        child_id: RegionId,
        watershed_key: &[u8],
    ) -> Result<()> {
        let parent = self
            .get(parent_id)
            .ok_or(ControlError::RegionNotFound(parent_id))?;
        let child = self
            .get(child_id)
            .ok_or(ControlError::RegionNotFound(child_id))?;

        if parent.range().end_key.as_slice() == watershed_key
            && child.state == RegionState::Normal
        {
            tracing::debug!(parent_id, child_id, "split already applied, skipping");
            return Ok(());
        }
        if !parent.range().is_proper_split_key(watershed_key) {
            return Err(ControlError::KeyInvalid(format!(
                "watershed key does not split region {parent_id}"
            )));
        }

        let parent_end = parent.range().end_key.clone();
        self.update_state(parent_id, RegionState::Splitting)?;

        let snapshot = {
            let mut entry = self
                .regions
                .get_mut(&parent_id)
                .ok_or(ControlError::RegionNotFound(parent_id))?;
            entry.definition.range.end_key = watershed_key.to_vec();
            entry.epoch.version += 1;
            if !entry.children.contains(&child_id) {
                entry.children.push(child_id);
            }
            entry.last_split_at_ms = unix_time_ms();
            entry.clone()
        };
        self.persist_region(&snapshot)?;

        let snapshot = {
            let mut entry = self
                .regions
                .get_mut(&child_id)
                .ok_or(ControlError::RegionNotFound(child_id))?;
            entry.definition.range.start_key = watershed_key.to_vec();
            entry.definition.range.end_key = parent_end;
            entry.parent_id = parent_id;
            entry.clone()
        };
        self.persist_region(&snapshot)?;

        self.update_state(child_id, RegionState::Normal)?;
        self.update_state(parent_id, RegionState::Normal)?;

        tracing::debug!(parent_id, child_id, "split committed");
        Ok(())
    }

    /// Apply a committed peer-set change: the voter set is replaced, learners
    /// already present in the definition are retained, and the epoch's
    /// conf version is bumped.
    pub fn commit_conf_change(&self, region_id: RegionId, voters: Vec<Peer>) -> Result<()> {
        let snapshot = {
            let mut entry = self
                .regions
                .get_mut(&region_id)
                .ok_or(ControlError::RegionNotFound(region_id))?;
            let learners = entry.definition.peers_with_role(PeerRole::Learner);
            let mut peers = voters;
            peers.extend(learners);
            entry.definition.peers = peers;
            entry.epoch.conf_version += 1;
            entry.clone()
        };
        self.persist_region(&snapshot)?;
        tracing::debug!(region_id, "conf change committed");
        Ok(())
    }

    fn persist_region(&self, region: &Region) -> Result<()> {
        let value = serde_json::to_vec(region)
            .context("encode region record")?;
        self.partition
            .insert(keys::region_key(region.id).as_bytes(), value)
            .context("write region record")?;
        self.sync()
    }

    fn persist_raft_meta(&self, meta: &RaftMeta) -> Result<()> {
        let value = serde_json::to_vec(meta)
            .context("encode raft meta record")?;
        self.partition
            .insert(keys::raft_meta_key(meta.region_id).as_bytes(), value)
            .context("write raft meta record")?;
        self.sync()
    }

    fn sync(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::Buffer)
            .context("persist control meta")?;
        Ok(())
    }
}
