//! Per-region vector-index lifecycle.
//!
//! The index math (graph construction, search) lives in the index libraries
//! outside this crate; the control plane only manages handle lifecycle,
//! capacity, and snapshot bookkeeping. The over-RPC follower probe used by
//! split pre-checks is the [`VectorIndexProber`] seam.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{ControlError, Result};
use crate::region::{Peer, Region, RegionId, RegionType, VectorIndexParameter};

/// One live vector-index handle. The HNSW variant is reached through
/// [`VectorIndex::as_hnsw`].
pub trait VectorIndex: Send + Sync {
    fn id(&self) -> RegionId;
    fn parameter(&self) -> VectorIndexParameter;
    fn as_hnsw(&self) -> Option<&HnswIndexHandle>;
    fn as_any(&self) -> &dyn Any;
}

impl std::fmt::Debug for dyn VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("id", &self.id())
            .field("parameter", &self.parameter())
            .finish()
    }
}

/// HNSW index handle with a resizable element capacity.
pub struct HnswIndexHandle {
    id: RegionId,
    dimension: u32,
    ef_construction: u32,
    m: u32,
    max_elements: AtomicU64,
}

impl HnswIndexHandle {
    pub fn new(id: RegionId, dimension: u32, max_elements: u64, ef_construction: u32, m: u32) -> Self {
        Self {
            id,
            dimension,
            ef_construction,
            m,
            max_elements: AtomicU64::new(max_elements),
        }
    }

    pub fn max_elements(&self) -> u64 {
        self.max_elements.load(Ordering::Acquire)
    }

    /// Grow the element capacity. Shrinking is rejected upstream; a stale
    /// enlarge below the current capacity is ignored.
    pub fn resize_max_elements(&self, new_max_elements: u64) -> Result<()> {
        self.max_elements
            .fetch_max(new_max_elements, Ordering::AcqRel);
        Ok(())
    }
}

impl VectorIndex for HnswIndexHandle {
    fn id(&self) -> RegionId {
        self.id
    }

    fn parameter(&self) -> VectorIndexParameter {
        VectorIndexParameter::Hnsw {
            dimension: self.dimension,
            max_elements: self.max_elements(),
            ef_construction: self.ef_construction,
            m: self.m,
        }
    }

    fn as_hnsw(&self) -> Option<&HnswIndexHandle> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Snapshot bookkeeping for vector indexes. Snapshot payload writing is the
/// index library's job; the control plane tracks which log id each region's
/// newest snapshot covers.
#[derive(Debug, Default)]
pub struct VectorIndexSnapshotManager {
    latest: DashMap<RegionId, u64>,
    next_snapshot_seq: AtomicU64,
}

impl VectorIndexSnapshotManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a snapshot of the index and return the log id it covers.
    pub fn save_snapshot(&self, index: &dyn VectorIndex) -> Result<u64> {
        let snapshot_log_id = self.next_snapshot_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest.insert(index.id(), snapshot_log_id);
        tracing::debug!(region_id = index.id(), snapshot_log_id, "vector index snapshot saved");
        Ok(snapshot_log_id)
    }

    pub fn delete_snapshots(&self, region_id: RegionId) {
        self.latest.remove(&region_id);
    }

    pub fn latest_snapshot_log_id(&self, region_id: RegionId) -> Option<u64> {
        self.latest.get(&region_id).map(|v| *v)
    }
}

/// Region-id keyed registry of vector-index handles.
pub trait VectorIndexManager: Send + Sync {
    fn vector_index(&self, region_id: RegionId) -> Option<Arc<dyn VectorIndex>>;

    /// Load an existing index or build a fresh one from the region's index
    /// parameter. Idempotent: an already-loaded index is returned as-is.
    fn load_or_build(&self, region: &Region) -> Result<Arc<dyn VectorIndex>>;

    fn delete(&self, region_id: RegionId) -> Result<()>;

    fn update_snapshot_log_id(&self, region_id: RegionId, snapshot_log_id: u64);

    fn snapshot_manager(&self) -> Arc<VectorIndexSnapshotManager>;
}

/// In-process vector-index manager.
#[derive(Default)]
pub struct LocalVectorIndexManager {
    indexes: DashMap<RegionId, Arc<dyn VectorIndex>>,
    snapshot_log_ids: DashMap<RegionId, u64>,
    snapshots: Arc<VectorIndexSnapshotManager>,
}

impl LocalVectorIndexManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndexManager for LocalVectorIndexManager {
    fn vector_index(&self, region_id: RegionId) -> Option<Arc<dyn VectorIndex>> {
        self.indexes.get(&region_id).map(|i| i.clone())
    }

    fn load_or_build(&self, region: &Region) -> Result<Arc<dyn VectorIndex>> {
        if let Some(existing) = self.vector_index(region.id) {
            return Ok(existing);
        }
        if region.region_type != RegionType::Index {
            return Err(ControlError::IllegalParameters(format!(
                "region {} is not an index region",
                region.id
            )));
        }
        let Some(VectorIndexParameter::Hnsw {
            dimension,
            max_elements,
            ef_construction,
            m,
        }) = region.definition.index_parameter.clone()
        else {
            return Err(ControlError::IllegalParameters(format!(
                "region {} has no vector index parameter",
                region.id
            )));
        };

        let index: Arc<dyn VectorIndex> = Arc::new(HnswIndexHandle::new(
            region.id,
            dimension,
            max_elements,
            ef_construction,
            m,
        ));
        let entry = self
            .indexes
            .entry(region.id)
            .or_insert_with(|| index.clone());
        tracing::debug!(region_id = region.id, "vector index loaded");
        Ok(entry.clone())
    }

    fn delete(&self, region_id: RegionId) -> Result<()> {
        self.indexes.remove(&region_id);
        self.snapshot_log_ids.remove(&region_id);
        tracing::debug!(region_id, "vector index deleted");
        Ok(())
    }

    fn update_snapshot_log_id(&self, region_id: RegionId, snapshot_log_id: u64) {
        self.snapshot_log_ids.insert(region_id, snapshot_log_id);
    }

    fn snapshot_manager(&self) -> Arc<VectorIndexSnapshotManager> {
        self.snapshots.clone()
    }
}

/// Probes whether a peer store holds a vector index for a region. Backed by
/// the node RPC client in production; calls are bounded by the control
/// config's probe timeout at the call site.
#[async_trait]
pub trait VectorIndexProber: Send + Sync {
    async fn check_exists(&self, peer: &Peer, vector_index_id: RegionId) -> anyhow::Result<bool>;
}
