//! In-process stand-ins for the out-of-crate collaborators, used by unit and
//! integration tests to drive the control plane without a consensus engine
//! or an RPC stack.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::command::{CommandId, CommandStatus};
use crate::context::{ControlConfig, StoreContext};
use crate::engine::{
    Engine, EngineKind, EventListener, MemoryEngine, RaftNode, WriteBatch, WriteCompletion,
};
use crate::error::{ControlError, Result};
use crate::heartbeat::HeartbeatReceiver;
use crate::metrics::RegionMetrics;
use crate::region::{KeyRange, Peer, PeerRole, RaftMeta, Region, RegionId, StoreId};
use crate::vector_index::{LocalVectorIndexManager, VectorIndexProber};

/// One region's stub consensus node.
pub struct StubRaftNode {
    region_id: RegionId,
    self_peer: Peer,
    peers: RwLock<Vec<Peer>>,
    leader: AtomicBool,
    leader_store_id: AtomicU64,
    stopped: AtomicBool,
    listener: Arc<dyn EventListener>,
}

impl RaftNode for StubRaftNode {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }

    fn leader_store_id(&self) -> StoreId {
        self.leader_store_id.load(Ordering::Acquire)
    }

    fn peer(&self) -> Peer {
        self.self_peer.clone()
    }

    fn list_peers(&self) -> Vec<Peer> {
        self.peers.read().unwrap().clone()
    }
}

/// Stub ENG_RAFT_STORE engine: leadership and peer sets are plain fields,
/// and async writes apply synchronously through the registered listener, so
/// tests observe committed control writes without running consensus.
#[derive(Default)]
pub struct StubRaftEngine {
    local_store_id: StoreId,
    nodes: DashMap<RegionId, Arc<StubRaftNode>>,
    destroyed: Mutex<Vec<RegionId>>,
    deleted_ranges: Mutex<Vec<(RegionId, KeyRange)>>,
    snapshots: DashMap<RegionId, u64>,
    transfers: Mutex<Vec<(RegionId, Peer)>>,
}

impl StubRaftEngine {
    pub fn new(local_store_id: StoreId) -> Self {
        Self {
            local_store_id,
            ..Self::default()
        }
    }

    /// Flip a node's leadership as observed by validation.
    pub fn set_leader(&self, region_id: RegionId, is_leader: bool, leader_store_id: StoreId) {
        if let Some(node) = self.nodes.get(&region_id) {
            node.leader.store(is_leader, Ordering::Release);
            node.leader_store_id
                .store(leader_store_id, Ordering::Release);
        }
    }

    pub fn has_node(&self, region_id: RegionId) -> bool {
        self.nodes.contains_key(&region_id)
    }

    pub fn is_stopped(&self, region_id: RegionId) -> bool {
        self.nodes
            .get(&region_id)
            .map(|n| n.stopped.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn destroyed_nodes(&self) -> Vec<RegionId> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn deleted_ranges(&self) -> Vec<(RegionId, KeyRange)> {
        self.deleted_ranges.lock().unwrap().clone()
    }

    pub fn snapshot_count(&self, region_id: RegionId) -> u64 {
        self.snapshots.get(&region_id).map(|c| *c).unwrap_or(0)
    }

    pub fn transfers(&self) -> Vec<(RegionId, Peer)> {
        self.transfers.lock().unwrap().clone()
    }

    fn self_peer_for(&self, region: &Region) -> Peer {
        region
            .definition
            .peers
            .iter()
            .find(|p| p.store_id == self.local_store_id)
            .cloned()
            .unwrap_or(Peer {
                store_id: self.local_store_id,
                host: "127.0.0.1".to_string(),
                port: 20160,
                role: PeerRole::Voter,
            })
    }
}

#[async_trait]
impl Engine for StubRaftEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::RaftStore
    }

    async fn add_node(
        &self,
        region: &Region,
        _raft_meta: &RaftMeta,
        _metrics: Option<Arc<RegionMetrics>>,
        listener: Arc<dyn EventListener>,
        _is_restart: bool,
    ) -> Result<()> {
        let node = Arc::new(StubRaftNode {
            region_id: region.id,
            self_peer: self.self_peer_for(region),
            peers: RwLock::new(region.definition.peers.clone()),
            leader: AtomicBool::new(true),
            leader_store_id: AtomicU64::new(self.local_store_id),
            stopped: AtomicBool::new(false),
            listener,
        });
        self.nodes.insert(region.id, node);
        Ok(())
    }

    async fn stop_node(&self, region_id: RegionId) -> Result<()> {
        let node = self
            .nodes
            .get(&region_id)
            .ok_or(ControlError::RaftNotFound(region_id))?;
        node.stopped.store(true, Ordering::Release);
        Ok(())
    }

    async fn destroy_node(&self, region_id: RegionId) -> Result<()> {
        self.nodes.remove(&region_id);
        self.destroyed.lock().unwrap().push(region_id);
        Ok(())
    }

    fn node(&self, region_id: RegionId) -> Option<Arc<dyn RaftNode>> {
        self.nodes
            .get(&region_id)
            .map(|n| n.clone() as Arc<dyn RaftNode>)
    }

    async fn change_node(&self, region_id: RegionId, voters: Vec<Peer>) -> Result<()> {
        let node = self
            .nodes
            .get(&region_id)
            .ok_or(ControlError::RaftNotFound(region_id))?
            .clone();
        *node.peers.write().unwrap() = voters.clone();
        node.listener.on_apply(
            region_id,
            &crate::engine::ControlWrite::CommitConfChange { region_id, voters },
        );
        Ok(())
    }

    async fn transfer_leader(&self, region_id: RegionId, peer: &Peer) -> Result<()> {
        if !self.nodes.contains_key(&region_id) {
            return Err(ControlError::RaftNotFound(region_id));
        }
        self.transfers.lock().unwrap().push((region_id, peer.clone()));
        Ok(())
    }

    async fn do_snapshot(&self, region_id: RegionId) -> Result<()> {
        *self.snapshots.entry(region_id).or_insert(0) += 1;
        Ok(())
    }

    async fn async_write(&self, batch: WriteBatch, done: WriteCompletion) -> Result<()> {
        let node = self
            .nodes
            .get(&batch.region_id)
            .ok_or(ControlError::RaftNotFound(batch.region_id))?
            .clone();
        // Round-trip through the wire encoding so the tests cover it.
        let decoded = WriteBatch::decode(&batch.encode()?)?;
        for write in &decoded.writes {
            node.listener.on_apply(node.region_id, write);
        }
        done(Ok(()));
        Ok(())
    }

    async fn delete_range(&self, region_id: RegionId, range: &KeyRange) -> Result<()> {
        self.deleted_ranges
            .lock()
            .unwrap()
            .push((region_id, range.clone()));
        Ok(())
    }
}

/// Scriptable follower probe. Responses are keyed by `(store_id, region_id)`
/// and fall back to `default_present`; an optional artificial delay lets
/// tests exercise the probe timeout.
pub struct StubProber {
    responses: DashMap<(StoreId, RegionId), bool>,
    default_present: bool,
    delay: RwLock<Option<Duration>>,
}

impl StubProber {
    pub fn new(default_present: bool) -> Self {
        Self {
            responses: DashMap::new(),
            default_present,
            delay: RwLock::new(None),
        }
    }

    pub fn set_response(&self, store_id: StoreId, region_id: RegionId, present: bool) {
        self.responses.insert((store_id, region_id), present);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap() = delay;
    }
}

#[async_trait]
impl VectorIndexProber for StubProber {
    async fn check_exists(&self, peer: &Peer, vector_index_id: RegionId) -> anyhow::Result<bool> {
        let delay = *self.delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .responses
            .get(&(peer.store_id, vector_index_id))
            .map(|r| *r)
            .unwrap_or(self.default_present))
    }
}

/// A wired control plane over stub collaborators plus its scratch directory.
pub struct TestFixture {
    pub ctx: Arc<StoreContext>,
    pub heartbeat_rx: HeartbeatReceiver,
    pub dir: PathBuf,
    pub raft: Option<Arc<StubRaftEngine>>,
    pub prober: Arc<StubProber>,
    cleanup: bool,
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        if self.cleanup {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

/// Fresh per-test scratch directory under the system temp dir.
pub fn fixture_dir(name: &str) -> PathBuf {
    let ts = crate::unix_time_ns();
    std::env::temp_dir().join(format!("tessera-store-{name}-{}-{ts}", std::process::id()))
}

fn open_fixture(
    dir: PathBuf,
    engine: Arc<dyn Engine>,
    raft: Option<Arc<StubRaftEngine>>,
    cleanup: bool,
) -> TestFixture {
    let keyspace = Arc::new(
        fjall::Config::new(&dir)
            .open()
            .expect("open fixture keyspace"),
    );
    let prober = Arc::new(StubProber::new(true));
    let mut config = ControlConfig::default();
    config.probe_timeout = Duration::from_millis(200);
    let (ctx, heartbeat_rx) = StoreContext::open(
        1,
        config,
        keyspace,
        engine,
        Arc::new(LocalVectorIndexManager::new()),
        prober.clone(),
    )
    .expect("open store context");

    TestFixture {
        ctx,
        heartbeat_rx,
        dir,
        raft,
        prober,
        cleanup,
    }
}

/// Control plane over the memory engine in a fresh scratch dir.
pub fn memory_fixture(name: &str) -> TestFixture {
    open_fixture(fixture_dir(name), Arc::new(MemoryEngine::new()), None, true)
}

/// Control plane over the memory engine at an explicit directory; used by
/// restart tests that reopen the same data dir. The caller owns cleanup.
pub fn memory_fixture_at(dir: &Path) -> TestFixture {
    open_fixture(dir.to_path_buf(), Arc::new(MemoryEngine::new()), None, false)
}

/// Control plane over the stub raft engine in a fresh scratch dir. This
/// store is store 1 and starts as leader of every node it adds.
pub fn raft_fixture(name: &str) -> TestFixture {
    let raft = Arc::new(StubRaftEngine::new(1));
    open_fixture(fixture_dir(name), raft.clone(), Some(raft), true)
}

/// Control plane over the stub raft engine at an explicit directory.
pub fn raft_fixture_at(dir: &Path) -> TestFixture {
    let raft = Arc::new(StubRaftEngine::new(1));
    open_fixture(dir.to_path_buf(), raft.clone(), Some(raft), false)
}

/// Poll the command log until `command_id` reaches `status` or panic after
/// five seconds.
pub async fn wait_for_status(ctx: &Arc<StoreContext>, command_id: CommandId, status: CommandStatus) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(cmd) = ctx.command_log.get(command_id) {
            if cmd.status == status {
                return;
            }
            if cmd.status.is_terminal() {
                panic!(
                    "command {command_id} reached {:?}, expected {status:?}",
                    cmd.status
                );
            }
        }
        if std::time::Instant::now() >= deadline {
            panic!("command {command_id} did not reach {status:?} in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
