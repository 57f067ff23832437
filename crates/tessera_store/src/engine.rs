//! Uniform facade over the consensus + storage engine.
//!
//! The control plane drives the engine through this trait; the real
//! raft-backed implementation lives with the consensus layer outside this
//! crate. [`MemoryEngine`] is the ENG_MEMORY variant where every call is a
//! no-op success, which keeps single-process deployments and most tests free
//! of consensus machinery.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::RegionMetrics;
use crate::region::{KeyRange, Peer, RaftMeta, Region, RegionId, StoreId};

/// Engine variants. Only `RaftStore` exercises raft-path code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Memory,
    RaftStore,
}

/// Handle onto one region's consensus node.
pub trait RaftNode: Send + Sync {
    fn is_leader(&self) -> bool;
    fn leader_store_id(&self) -> StoreId;
    /// This store's own peer in the group.
    fn peer(&self) -> Peer;
    fn list_peers(&self) -> Vec<Peer>;
}

/// A control operation replicated through a region's raft group and applied
/// by the store state machine on commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlWrite {
    CommitSplit {
        parent_id: RegionId,
        child_id: RegionId,
        watershed_key: Vec<u8>,
    },
    CommitConfChange {
        region_id: RegionId,
        voters: Vec<Peer>,
    },
}

/// Batch of control writes submitted to one region's raft group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBatch {
    pub region_id: RegionId,
    pub writes: Vec<ControlWrite>,
}

impl WriteBatch {
    pub fn single(region_id: RegionId, write: ControlWrite) -> Self {
        Self {
            region_id,
            writes: vec![write],
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let raw = serde_json::to_vec(self).context("encode write batch")?;
        Ok(Bytes::from(raw))
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw).context("decode write batch")?)
    }
}

/// Callback invoked once an async write has been committed (or has failed).
pub type WriteCompletion = Box<dyn FnOnce(anyhow::Result<()>) + Send + 'static>;

/// Receives control writes as the engine's state machine applies them.
/// Implementations look regions up by id; they hold no region references of
/// their own.
pub trait EventListener: Send + Sync {
    fn on_apply(&self, region_id: RegionId, write: &ControlWrite);
}

/// The engine facade the control plane drives.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    fn kind(&self) -> EngineKind;

    /// Register a region's consensus node. `is_restart` distinguishes process
    /// restart from first creation.
    async fn add_node(
        &self,
        region: &Region,
        raft_meta: &RaftMeta,
        metrics: Option<Arc<RegionMetrics>>,
        listener: Arc<dyn EventListener>,
        is_restart: bool,
    ) -> Result<()>;

    /// Shut the node down; its on-disk state stays.
    async fn stop_node(&self, region_id: RegionId) -> Result<()>;

    /// Shut the node down and delete its log storage.
    async fn destroy_node(&self, region_id: RegionId) -> Result<()>;

    fn node(&self, region_id: RegionId) -> Option<Arc<dyn RaftNode>>;

    /// Reconfigure the group to exactly the given voter set.
    async fn change_node(&self, region_id: RegionId, voters: Vec<Peer>) -> Result<()>;

    async fn transfer_leader(&self, region_id: RegionId, peer: &Peer) -> Result<()>;

    async fn do_snapshot(&self, region_id: RegionId) -> Result<()>;

    /// Submit a replicated control write; `done` fires after commit. Returns
    /// once the write has been handed to the group.
    async fn async_write(&self, batch: WriteBatch, done: WriteCompletion) -> Result<()>;

    /// Delete a key range from the raw storage engine.
    async fn delete_range(&self, region_id: RegionId, range: &KeyRange) -> Result<()>;
}

/// ENG_MEMORY: no consensus, no raft nodes, every call succeeds.
#[derive(Debug, Default)]
pub struct MemoryEngine;

impl MemoryEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Memory
    }

    async fn add_node(
        &self,
        _region: &Region,
        _raft_meta: &RaftMeta,
        _metrics: Option<Arc<RegionMetrics>>,
        _listener: Arc<dyn EventListener>,
        _is_restart: bool,
    ) -> Result<()> {
        Ok(())
    }

    async fn stop_node(&self, _region_id: RegionId) -> Result<()> {
        Ok(())
    }

    async fn destroy_node(&self, _region_id: RegionId) -> Result<()> {
        Ok(())
    }

    fn node(&self, _region_id: RegionId) -> Option<Arc<dyn RaftNode>> {
        None
    }

    async fn change_node(&self, _region_id: RegionId, _voters: Vec<Peer>) -> Result<()> {
        Ok(())
    }

    async fn transfer_leader(&self, _region_id: RegionId, _peer: &Peer) -> Result<()> {
        Ok(())
    }

    async fn do_snapshot(&self, _region_id: RegionId) -> Result<()> {
        Ok(())
    }

    async fn async_write(&self, _batch: WriteBatch, done: WriteCompletion) -> Result<()> {
        done(Ok(()));
        Ok(())
    }

    async fn delete_range(&self, _region_id: RegionId, _range: &KeyRange) -> Result<()> {
        Ok(())
    }
}

/// Listener that applies committed control writes to the region meta store.
pub struct MetaEventListener {
    meta: Arc<crate::region_meta::RegionMetaStore>,
}

impl MetaEventListener {
    pub fn new(meta: Arc<crate::region_meta::RegionMetaStore>) -> Self {
        Self { meta }
    }
}

impl EventListener for MetaEventListener {
    fn on_apply(&self, region_id: RegionId, write: &ControlWrite) {
        let result = match write {
            ControlWrite::CommitSplit {
                parent_id,
                child_id,
                watershed_key,
            } => self.meta.commit_split(*parent_id, *child_id, watershed_key),
            ControlWrite::CommitConfChange { region_id, voters } => {
                self.meta.commit_conf_change(*region_id, voters.clone())
            }
        };
        if let Err(err) = result {
            tracing::error!(region_id, error = ?err, "apply control write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_batch_round_trips() {
        let batch = WriteBatch::single(
            100,
            ControlWrite::CommitSplit {
                parent_id: 100,
                child_id: 101,
                watershed_key: b"m".to_vec(),
            },
        );
        let raw = batch.encode().unwrap();
        let decoded = WriteBatch::decode(&raw).unwrap();
        assert_eq!(decoded.region_id, 100);
        assert_eq!(decoded.writes.len(), 1);
    }

    #[tokio::test]
    async fn memory_engine_is_all_noop_success() {
        let engine = MemoryEngine::new();
        assert_eq!(engine.kind(), EngineKind::Memory);
        assert!(engine.node(1).is_none());
        engine.stop_node(1).await.unwrap();
        engine.destroy_node(1).await.unwrap();
        engine.change_node(1, Vec::new()).await.unwrap();
        engine.do_snapshot(1).await.unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        engine
            .async_write(
                WriteBatch {
                    region_id: 1,
                    writes: Vec::new(),
                },
                Box::new(move |res| {
                    tx.send(res.is_ok()).unwrap();
                }),
            )
            .await
            .unwrap();
        assert!(rx.recv().unwrap());
    }
}
