//! Shared builders for control-plane integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tessera_store::controller::RegionController;
use tessera_store::region::{
    KeyRange, Peer, PeerRole, RegionDefinition, RegionId, RegionType, StoreId,
    VectorIndexParameter,
};
use tessera_store::{CommandId, CommandKind, CommandPayload, RegionCommand};

/// Voter peers on stores `store_ids`, addressed in a private test subnet.
pub fn voter_peers(store_ids: &[StoreId]) -> Vec<Peer> {
    store_ids
        .iter()
        .map(|store_id| Peer {
            store_id: *store_id,
            host: format!("10.0.0.{store_id}"),
            port: 20160,
            role: PeerRole::Voter,
        })
        .collect()
}

pub fn store_definition(
    name: &str,
    start: &[u8],
    end: &[u8],
    peers: Vec<Peer>,
) -> RegionDefinition {
    RegionDefinition {
        name: name.to_string(),
        region_type: RegionType::Store,
        replicas: peers.len().max(1) as u32,
        range: KeyRange::new(start.to_vec(), end.to_vec()),
        peers,
        schema_id: 1,
        table_id: 10,
        index_id: 0,
        part_id: 0,
        index_parameter: None,
    }
}

pub fn index_definition(
    name: &str,
    start: &[u8],
    end: &[u8],
    peers: Vec<Peer>,
    max_elements: u64,
) -> RegionDefinition {
    RegionDefinition {
        name: name.to_string(),
        region_type: RegionType::Index,
        replicas: peers.len().max(1) as u32,
        range: KeyRange::new(start.to_vec(), end.to_vec()),
        peers,
        schema_id: 1,
        table_id: 10,
        index_id: 7,
        part_id: 0,
        index_parameter: Some(VectorIndexParameter::Hnsw {
            dimension: 128,
            max_elements,
            ef_construction: 200,
            m: 16,
        }),
    }
}

pub fn create_command(
    id: CommandId,
    region_id: RegionId,
    definition: RegionDefinition,
    split_from_region_id: RegionId,
) -> RegionCommand {
    RegionCommand::new(
        id,
        region_id,
        CommandKind::Create,
        CommandPayload::Create {
            definition,
            split_from_region_id,
        },
    )
}

pub fn delete_command(id: CommandId, region_id: RegionId) -> RegionCommand {
    RegionCommand::new(
        id,
        region_id,
        CommandKind::Delete,
        CommandPayload::Delete { region_id },
    )
}

pub fn split_command(
    id: CommandId,
    from: RegionId,
    to: RegionId,
    watershed: &[u8],
) -> RegionCommand {
    RegionCommand::new(
        id,
        from,
        CommandKind::Split,
        CommandPayload::Split {
            split_from_region_id: from,
            split_to_region_id: to,
            split_watershed_key: watershed.to_vec(),
        },
    )
}

pub fn snapshot_command(id: CommandId, region_id: RegionId) -> RegionCommand {
    RegionCommand::new(id, region_id, CommandKind::Snapshot, CommandPayload::Snapshot)
}

pub fn hold_vector_index_command(
    id: CommandId,
    region_id: RegionId,
    is_hold: bool,
) -> RegionCommand {
    RegionCommand::new(
        id,
        region_id,
        CommandKind::HoldVectorIndex,
        CommandPayload::HoldVectorIndex { region_id, is_hold },
    )
}

/// Poll until `condition` holds or panic after five seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if std::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Stand up a controller over an already-opened fixture context.
pub fn start_controller(ctx: &Arc<tessera_store::StoreContext>) -> Arc<RegionController> {
    let controller = RegionController::new(ctx.clone());
    controller.init();
    controller
}
