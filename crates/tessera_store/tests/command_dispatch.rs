//! Dispatch-path properties: persistence, deduplication, ordering, and the
//! heartbeat intake.

mod common;

use common::*;
use tessera_store::heartbeat::apply_region_commands;
use tessera_store::testing::{self, wait_for_status};
use tessera_store::{CommandStatus, ControlError};

#[tokio::test]
async fn dispatched_commands_reach_a_terminal_status() {
    let fixture = testing::memory_fixture("dispatch-terminal");
    let controller = start_controller(&fixture.ctx);

    let definition = store_definition("t1.p0", b"a", b"z", voter_peers(&[1]));
    controller
        .dispatch(create_command(1, 100, definition, 0))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 1, CommandStatus::Done).await;

    // The command is on record exactly once.
    let all = fixture.ctx.command_log.all();
    assert_eq!(all.iter().filter(|c| c.id == 1).count(), 1);

    controller.destroy().await;
}

#[tokio::test]
async fn a_resent_command_id_is_rejected_without_touching_the_log() {
    let fixture = testing::memory_fixture("dispatch-dedup");
    let controller = start_controller(&fixture.ctx);

    let definition = store_definition("t1.p0", b"a", b"z", voter_peers(&[1]));
    controller
        .dispatch(create_command(1, 100, definition.clone(), 0))
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 1, CommandStatus::Done).await;

    let before = fixture.ctx.command_log.all().len();
    let err = controller
        .dispatch(create_command(1, 100, definition, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::RegionRepeatCommand(1)));
    assert_eq!(fixture.ctx.command_log.all().len(), before);

    controller.destroy().await;
}

#[tokio::test]
async fn commands_for_one_region_complete_in_dispatch_order() {
    let fixture = testing::memory_fixture("dispatch-fifo");
    let controller = start_controller(&fixture.ctx);

    let definition = store_definition("t1.p0", b"a", b"z", voter_peers(&[1]));
    controller
        .dispatch(create_command(1, 100, definition, 0))
        .await
        .unwrap();

    for id in 2..=20u64 {
        controller
            .dispatch(snapshot_command(id, 100))
            .await
            .unwrap();
    }
    for id in 1..=20u64 {
        wait_for_status(&fixture.ctx, id, CommandStatus::Done).await;
    }

    controller.destroy().await;
}

#[tokio::test]
async fn heartbeat_intake_reports_rejections_without_persisting_them() {
    let fixture = testing::memory_fixture("dispatch-heartbeat");
    let controller = start_controller(&fixture.ctx);

    let definition = store_definition("t1.p0", b"a", b"z", voter_peers(&[1]));
    let good = create_command(1, 100, definition, 0);
    // Delete of a region that does not exist fails pre-validation.
    let bad = delete_command(2, 999);

    let outcomes = apply_region_commands(&controller, vec![good, bad]).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(
        outcomes[1].result,
        Err(ControlError::RegionNotFound(999))
    ));

    wait_for_status(&fixture.ctx, 1, CommandStatus::Done).await;
    assert!(!fixture.ctx.command_log.is_exist(2));

    controller.destroy().await;
}

#[tokio::test]
async fn notify_commands_trigger_an_immediate_heartbeat() {
    let mut fixture = testing::memory_fixture("dispatch-notify");
    let controller = start_controller(&fixture.ctx);

    let definition = store_definition("t1.p0", b"a", b"z", voter_peers(&[1]));
    controller
        .dispatch(create_command(1, 100, definition, 0).with_notify())
        .await
        .unwrap();
    wait_for_status(&fixture.ctx, 1, CommandStatus::Done).await;

    let region_id = fixture
        .heartbeat_rx
        .recv()
        .await
        .expect("heartbeat trigger");
    assert_eq!(region_id, 100);

    controller.destroy().await;
}
