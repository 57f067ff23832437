//! Store-wide wiring for the control plane.
//!
//! `StoreContext` carries every collaborator a task can touch: the region
//! meta store, the command log, the engine, the vector-index manager, the
//! metrics registry, and the heartbeat trigger. It is built once at store
//! startup and threaded by `Arc` into the controller and each task, so tests
//! instantiate the whole control plane against stub adapters.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use fjall::Keyspace;

use crate::command_log::CommandLog;
use crate::controller::RegionController;
use crate::engine::{Engine, EventListener, MetaEventListener};
use crate::heartbeat::{heartbeat_channel, HeartbeatReceiver, HeartbeatTrigger};
use crate::metrics::RegionMetricsRegistry;
use crate::region::StoreId;
use crate::region_meta::RegionMetaStore;
use crate::vector_index::{VectorIndexManager, VectorIndexProber};

/// Tunables for the control plane.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Upper bound on each follower vector-index probe during split
    /// pre-validation.
    pub probe_timeout: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(3),
        }
    }
}

pub struct StoreContext {
    pub store_id: StoreId,
    pub config: ControlConfig,
    pub region_meta: Arc<RegionMetaStore>,
    pub command_log: Arc<CommandLog>,
    pub engine: Arc<dyn Engine>,
    pub vector_index: Arc<dyn VectorIndexManager>,
    pub prober: Arc<dyn VectorIndexProber>,
    pub metrics: Arc<RegionMetricsRegistry>,
    pub heartbeat: HeartbeatTrigger,
    /// Listener handed to the engine on `add_node`; applies committed
    /// control writes back to the region meta store.
    pub listener: Arc<dyn EventListener>,
    controller: OnceLock<Weak<RegionController>>,
}

impl StoreContext {
    /// Rehydrate the persistent stores from `keyspace` and wire the context.
    /// Returns the context plus the receiving side of the heartbeat trigger,
    /// which the store's heartbeat loop owns.
    pub fn open(
        store_id: StoreId,
        config: ControlConfig,
        keyspace: Arc<Keyspace>,
        engine: Arc<dyn Engine>,
        vector_index: Arc<dyn VectorIndexManager>,
        prober: Arc<dyn VectorIndexProber>,
    ) -> anyhow::Result<(Arc<Self>, HeartbeatReceiver)> {
        let region_meta = Arc::new(RegionMetaStore::open(keyspace.clone())?);
        let command_log = Arc::new(CommandLog::open(keyspace)?);
        let listener: Arc<dyn EventListener> =
            Arc::new(MetaEventListener::new(region_meta.clone()));
        let (heartbeat, heartbeat_rx) = heartbeat_channel();

        let ctx = Arc::new(Self {
            store_id,
            config,
            region_meta,
            command_log,
            engine,
            vector_index,
            prober,
            metrics: Arc::new(RegionMetricsRegistry::new()),
            heartbeat,
            listener,
            controller: OnceLock::new(),
        });
        Ok((ctx, heartbeat_rx))
    }

    /// The region controller, once one has been bound. Tasks reach the
    /// controller this way (e.g. delete dispatching destroy-executor); the
    /// weak link avoids a reference cycle with the controller's own context
    /// handle.
    pub fn controller(&self) -> Option<Arc<RegionController>> {
        self.controller.get().and_then(Weak::upgrade)
    }

    pub(crate) fn bind_controller(&self, controller: &Arc<RegionController>) {
        let _ = self.controller.set(Arc::downgrade(controller));
    }
}
