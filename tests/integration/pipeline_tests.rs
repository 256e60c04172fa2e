//! Transmit pipeline scenarios against the scripted transport.

use std::time::Duration;

use futures_lite::future::{block_on, zip};

use wearlog::pipeline::CycleOutcome;
use wearlog::pipeline::state::Phase;
use wearlog::pipeline::trigger::TriggerAction;
use wearlog::sync::sleep;

use crate::mock_hw::{DEVICE, PublishStep, Rig, test_config};

fn run_once(rig: &Rig) -> CycleOutcome {
    block_on(rig.pipeline.run_once()).expect("cycle should start")
}

#[test]
fn happy_cycle_delivers_everything_and_powers_down() {
    let rig = Rig::new(test_config());
    rig.fill(5, 4);

    let CycleOutcome::Completed(session) = run_once(&rig) else {
        panic!("cycle should complete");
    };
    assert_eq!(session.messages_sent, 2);
    assert_eq!(session.samples_sent, 20);
    assert_eq!(rig.pending(), 0);

    let packets = rig.transport.acked_json();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0]["id"], DEVICE);
    assert_eq!(packets[0]["seq"], 1);
    assert_eq!(packets[1]["seq"], 2);
    assert_eq!(packets[0]["n"], 12);
    assert_eq!(packets[1]["n"], 8);

    let link = rig.link.log();
    assert!(!link.radio_on);
    assert_eq!(link.disconnects, 1);
    assert_eq!(rig.transport.log().stops, 1);
    assert_eq!(rig.pipeline.phase(), Some(Phase::Idle));

    let stats = rig.stats.snapshot().unwrap();
    assert_eq!(stats.packets_sent, 2);
    assert_eq!(stats.samples_sent, 20);
    assert_eq!(stats.transmit_successes, 1);
}

#[test]
fn empty_ring_completes_without_publishing() {
    let rig = Rig::new(test_config());
    assert!(matches!(run_once(&rig), CycleOutcome::Completed(_)));
    assert!(rig.transport.log().published.is_empty());
}

#[test]
fn failed_publish_is_retried_with_same_seq() {
    let rig = Rig::new(test_config());
    rig.transport.script(&[PublishStep::Fail]);
    rig.fill(2, 4);

    assert!(matches!(run_once(&rig), CycleOutcome::Completed(_)));
    assert_eq!(rig.pending(), 0);

    let log = rig.transport.log();
    assert_eq!(log.published.len(), 2);
    assert_eq!(log.published[0], log.published[1]);
    assert_eq!(log.starts, 2);
    drop(log);

    // the retry brings the link down and back up as well
    let link = rig.link.log();
    assert_eq!(link.selects, 2);
    assert_eq!(link.disconnects, 2);

    let stats = rig.stats.snapshot().unwrap();
    assert_eq!(stats.retry_attempts, 1);
    assert_eq!(stats.packets_sent, 1);
}

#[test]
fn hung_publish_is_cut_off_by_ack_timeout() {
    let rig = Rig::new(test_config());
    rig.transport.script(&[PublishStep::Hang]);
    rig.fill(2, 4);

    assert!(matches!(run_once(&rig), CycleOutcome::Completed(_)));
    assert_eq!(rig.transport.log().published.len(), 2);
    assert_eq!(rig.transport.log().acked.len(), 1);
}

#[test]
fn exhausted_attempts_keep_data_pending() {
    let rig = Rig::new(test_config());
    rig.transport
        .script(&[PublishStep::Fail, PublishStep::Fail, PublishStep::Fail]);
    rig.fill(2, 4);

    let CycleOutcome::Abandoned(session) = run_once(&rig) else {
        panic!("cycle should be abandoned");
    };
    assert_eq!(session.attempts_remaining, 0);
    assert_eq!(rig.pending(), 2);
    assert_eq!(rig.transport.log().published.len(), 3);
    assert!(!rig.link.log().radio_on);

    // next cycle picks the same data up
    assert!(matches!(run_once(&rig), CycleOutcome::Completed(_)));
    assert_eq!(rig.pending(), 0);
}

#[test]
fn link_that_never_comes_up_fails_the_cycle() {
    let rig = Rig::new(test_config());
    rig.link.never_up();
    rig.fill(2, 4);

    assert!(matches!(run_once(&rig), CycleOutcome::ConnectFailed(_)));
    assert_eq!(rig.pending(), 2);
    assert_eq!(rig.transport.log().starts, 0);
    assert!(!rig.link.log().radio_on);
    assert_eq!(rig.stats.snapshot().unwrap().connect_failures, 1);
}

#[test]
fn broker_that_never_connects_fails_the_cycle() {
    let rig = Rig::new(test_config());
    rig.transport.never_connects();
    rig.fill(1, 4);

    assert!(matches!(run_once(&rig), CycleOutcome::ConnectFailed(_)));
    assert_eq!(rig.transport.log().starts, 1);
    assert_eq!(rig.pending(), 1);
}

#[test]
fn watchdog_tears_down_a_hung_connect() {
    let cfg = wearlog::config::SystemConfig {
        link_timeout_ms: 10_000,
        watchdog_timeout_ms: 30,
        ..test_config()
    };
    let rig = Rig::new(cfg);
    rig.link.never_up();
    rig.fill(1, 4);

    let watchdog = async {
        loop {
            sleep(Duration::from_millis(5)).await;
            if rig.pipeline.watchdog_check().await {
                return;
            }
        }
    };
    let (outcome, ()) = block_on(zip(rig.pipeline.run_once(), watchdog));

    assert_eq!(outcome, Some(CycleOutcome::Aborted));
    assert_eq!(rig.stats.snapshot().unwrap().forced_teardowns, 1);
    assert_eq!(rig.link.log().radio_offs, 1);
    assert_eq!(rig.pipeline.phase(), Some(Phase::Idle));
    assert_eq!(rig.pending(), 1);
}

#[test]
fn watchdog_ignores_idle_pipeline() {
    let rig = Rig::new(test_config());
    rig.clock.advance(60_000);
    assert!(!block_on(rig.pipeline.watchdog_check()));
}

#[test]
fn hung_stop_falls_back_to_force_stop() {
    let rig = Rig::new(test_config());
    rig.transport.stop_hangs();
    rig.fill(1, 4);

    assert!(matches!(run_once(&rig), CycleOutcome::Completed(_)));
    let log = rig.transport.log();
    assert_eq!(log.stops, 0);
    assert_eq!(log.force_stops, 1);
    assert!(!log.connected);
}

#[test]
fn terminate_downlink_requests_shutdown() {
    let rig = Rig::new(test_config());
    rig.transport
        .push_downlink(&format!("{{\"message\": \"terminate {}\"}}", DEVICE));
    rig.fill(2, 4);

    assert!(matches!(run_once(&rig), CycleOutcome::Shutdown(_)));
    assert!(rig.pipeline.shutdown_requested());
    assert!(rig.transport.log().published.is_empty());
}

#[test]
fn terminate_for_another_device_is_ignored() {
    let rig = Rig::new(test_config());
    rig.transport
        .push_downlink("{\"message\": \"terminate WL-000000\"}");
    rig.fill(2, 4);

    assert!(matches!(run_once(&rig), CycleOutcome::Completed(_)));
    assert!(!rig.pipeline.shutdown_requested());
}

#[test]
fn teardown_is_idempotent() {
    let rig = Rig::new(test_config());
    assert!(!block_on(rig.pipeline.teardown()));

    rig.fill(1, 4);
    run_once(&rig);
    assert!(!block_on(rig.pipeline.teardown()));
    assert_eq!(rig.link.log().radio_offs, 1);
}

#[test]
fn time_sync_rides_every_packet() {
    let rig = Rig::new(test_config());
    rig.transport.script(&[PublishStep::Fail]);
    rig.fill(5, 4);
    run_once(&rig);
    rig.fill(2, 4);
    run_once(&rig);

    let packets = rig.transport.acked_json();
    assert_eq!(packets.len(), 3);
    let field = packets[0]["ts_sync"].as_str().expect("ts_sync present");
    assert!(packets.iter().all(|p| p["ts_sync"] == field));
    assert!(rig.pipeline.time_sync().is_some());
}

#[test]
fn time_sync_is_attempted_once_per_boot() {
    let rig = Rig::with_wall_clock(test_config(), None);
    rig.fill(1, 4);
    run_once(&rig);

    rig.clock.set_wall(Some(1_760_000_000_000));
    rig.fill(1, 4);
    run_once(&rig);

    let packets = rig.transport.acked_json();
    assert_eq!(packets.len(), 2);
    assert!(packets.iter().all(|p| p.get("ts_sync").is_none()));
    assert!(rig.pipeline.time_sync().is_none());
}

#[test]
fn meta_counts_cycles_and_write_faults() {
    let rig = Rig::new(test_config());
    rig.fill(1, 4);
    run_once(&rig);

    rig.flash.fail_next_writes(u32::from(rig.cfg.write_max_attempts));
    futures_lite::future::block_on(rig.ring.append(&crate::mock_hw::slot(1, 4)))
        .expect_err("write should exhaust its attempts");
    rig.fill(1, 4);
    run_once(&rig);

    let packets = rig.transport.acked_json();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0]["meta"]["trans"], 1);
    assert_eq!(packets[0]["meta"]["count"], 0);
    assert_eq!(packets[1]["meta"]["trans"], 2);
    assert_eq!(packets[1]["meta"]["count"], 1);
    assert_eq!(packets[1]["meta"]["ver"], env!("CARGO_PKG_VERSION"));
    assert_eq!(packets[1]["meta"]["mins"], 0);
}

#[test]
fn unreadable_slots_are_released_not_sent() {
    let rig = Rig::new(test_config());
    rig.fill(1, 4);
    rig.flash.fail_next_reads(u32::from(rig.cfg.read_max_attempts));

    assert!(matches!(run_once(&rig), CycleOutcome::Completed(_)));
    assert_eq!(rig.pending(), 0);
    assert!(rig.transport.log().published.is_empty());
    assert_eq!(rig.stats.snapshot().unwrap().unreadable_batches, 1);
}

#[test]
fn trigger_starts_first_cycle_after_trigger_first_captures() {
    let rig = Rig::new(test_config());
    assert_eq!(block_on(rig.pipeline.on_capture()), TriggerAction::Wait);
    assert_eq!(block_on(rig.pipeline.on_capture()), TriggerAction::StartCycle);
    assert_eq!(rig.pipeline.attempts_since_success(), 1);
}

#[test]
fn successful_delivery_resets_attempts_since_success() {
    let rig = Rig::new(test_config());
    rig.fill(1, 4);
    block_on(rig.pipeline.on_capture());
    block_on(rig.pipeline.on_capture());
    assert_eq!(rig.pipeline.attempts_since_success(), 1);

    run_once(&rig);
    assert_eq!(rig.pipeline.attempts_since_success(), 0);
}
