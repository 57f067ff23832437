//! Split command flow: watershed validation, leadership, the follower
//! vector-index probe, and the committed range handoff.

mod common;

use std::time::Duration;

use common::*;
use tessera_store::command::CommandStatus;
use tessera_store::heartbeat::apply_region_commands;
use tessera_store::testing::{self, wait_for_status};
use tessera_store::{ControlError, RegionState};

#[tokio::test]
async fn an_out_of_range_watershed_key_is_rejected_before_persist() {
    let fixture = testing::raft_fixture("split-invalid-key");
    let controller = start_controller(&fixture.ctx);

    controller
        .dispatch(create_command(
            1,
            100,
            store_definition("t1.p0", b"a", b"z", voter_peers(&[1])),
            0,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 1, CommandStatus::Done).await;
    controller
        .dispatch(create_command(
            2,
            101,
            store_definition("t1.p1", b"m", b"z", voter_peers(&[1])),
            100,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 2, CommandStatus::Done).await;

    // The watershed equals the parent's start key: outside (start, end).
    let outcomes =
        apply_region_commands(&controller, vec![split_command(3, 100, 101, b"a")]).await;
    assert!(matches!(
        outcomes[0].result,
        Err(ControlError::KeyInvalid(_))
    ));
    assert!(!fixture.ctx.command_log.is_exist(3));

    controller.destroy().await;
}

#[tokio::test]
async fn a_committed_split_hands_the_upper_range_to_the_child() {
    let fixture = testing::raft_fixture("split-happy-path");
    let controller = start_controller(&fixture.ctx);

    controller
        .dispatch(create_command(
            1,
            100,
            store_definition("t1.p0", b"a", b"z", voter_peers(&[1])),
            0,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 1, CommandStatus::Done).await;

    // The child is pre-created from the split and waits in STANDBY.
    controller
        .dispatch(create_command(
            2,
            101,
            store_definition("t1.p1", b"m", b"z", voter_peers(&[1])),
            100,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 2, CommandStatus::Done).await;
    assert_eq!(
        fixture.ctx.region_meta.get(101).unwrap().state,
        RegionState::Standby
    );

    let parent_version_before = fixture.ctx.region_meta.get(100).unwrap().epoch.version;
    controller
        .dispatch(split_command(4, 100, 101, b"m"))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 4, CommandStatus::Done).await;

    let parent = fixture.ctx.region_meta.get(100).unwrap();
    let child = fixture.ctx.region_meta.get(101).unwrap();
    assert_eq!(parent.state, RegionState::Normal);
    assert_eq!(child.state, RegionState::Normal);
    assert_eq!(parent.range().start_key, b"a".to_vec());
    assert_eq!(parent.range().end_key, b"m".to_vec());
    assert_eq!(child.range().start_key, b"m".to_vec());
    assert_eq!(child.range().end_key, b"z".to_vec());
    assert_eq!(parent.epoch.version, parent_version_before + 1);
    assert_eq!(child.parent_id, 100);
    assert!(parent.children.contains(&101));
    assert!(parent.last_split_at_ms > 0);

    controller.destroy().await;
}

#[tokio::test]
async fn only_the_leader_may_split() {
    let fixture = testing::raft_fixture("split-not-leader");
    let raft = fixture.raft.clone().unwrap();
    let controller = start_controller(&fixture.ctx);

    controller
        .dispatch(create_command(
            1,
            100,
            store_definition("t1.p0", b"a", b"z", voter_peers(&[1, 2, 3])),
            0,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 1, CommandStatus::Done).await;
    controller
        .dispatch(create_command(
            2,
            101,
            store_definition("t1.p1", b"m", b"z", voter_peers(&[1, 2, 3])),
            100,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 2, CommandStatus::Done).await;

    raft.set_leader(100, false, 2);
    let err = controller
        .pre_validate(&split_command(3, 100, 101, b"m"))
        .await
        .unwrap_err();
    match err {
        ControlError::RaftNotLeader {
            region_id,
            leader_store_id,
        } => {
            assert_eq!(region_id, 100);
            assert_eq!(leader_store_id, 2);
        }
        other => panic!("unexpected error: {other}"),
    }

    controller.destroy().await;
}

#[tokio::test]
async fn index_splits_require_every_follower_to_hold_the_vector_index() {
    let fixture = testing::raft_fixture("split-probe");
    let controller = start_controller(&fixture.ctx);

    controller
        .dispatch(create_command(
            1,
            100,
            index_definition("v1.p0", b"a", b"z", voter_peers(&[1, 2, 3]), 10_000),
            0,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 1, CommandStatus::Done).await;
    controller
        .dispatch(create_command(
            2,
            101,
            index_definition("v1.p1", b"m", b"z", voter_peers(&[1, 2, 3]), 10_000),
            100,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 2, CommandStatus::Done).await;

    // Store 3's replica reports no index: the split must not start.
    fixture.prober.set_response(2, 100, true);
    fixture.prober.set_response(3, 100, false);
    let err = controller
        .pre_validate(&split_command(3, 100, 101, b"m"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::VectorIndexNotFound(100)));

    // Once every follower confirms, validation passes.
    fixture.prober.set_response(3, 100, true);
    controller
        .pre_validate(&split_command(3, 100, 101, b"m"))
        .await
        .unwrap();

    controller.destroy().await;
}

#[tokio::test]
async fn a_probe_timeout_counts_as_a_missing_index() {
    let fixture = testing::raft_fixture("split-probe-timeout");
    let controller = start_controller(&fixture.ctx);

    controller
        .dispatch(create_command(
            1,
            100,
            index_definition("v1.p0", b"a", b"z", voter_peers(&[1, 2]), 10_000),
            0,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 1, CommandStatus::Done).await;
    controller
        .dispatch(create_command(
            2,
            101,
            index_definition("v1.p1", b"m", b"z", voter_peers(&[1, 2]), 10_000),
            100,
        ))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 2, CommandStatus::Done).await;

    // Fixture probe timeout is 200ms.
    fixture.prober.set_delay(Some(Duration::from_secs(2)));
    let err = controller
        .pre_validate(&split_command(3, 100, 101, b"m"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::VectorIndexNotFound(100)));

    controller.destroy().await;
}
