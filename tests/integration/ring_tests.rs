//! Capture → ring → batch flow, wrap-around and shutdown erase.

use futures_lite::future::block_on;

use wearlog::adapters::sensor::SimAccelerometer;
use wearlog::batch::BatchAssembler;
use wearlog::capture::{Capture, CaptureOutcome, FifoIrq};
use wearlog::config::SystemConfig;
use wearlog::error::AppendError;

use crate::mock_hw::{Rig, slot, test_config};

static IRQ: FifoIrq = FifoIrq::new();

#[test]
fn captured_blocks_come_back_with_interpolated_timestamps() {
    let rig = Rig::new(SystemConfig {
        max_slots_per_batch: 8,
        ..test_config()
    });
    let mut capture = Capture::new(
        SimAccelerometer::new(4),
        &IRQ,
        &rig.cfg,
        rig.stats.clone(),
    );

    block_on(async {
        assert_eq!(capture.poll(1_000, &rig.ring).await, CaptureOutcome::Idle);
        for k in 1..=3i64 {
            IRQ.on_interrupt(k * 2_000);
            let out = capture.poll(k * 2_000 + 10, &rig.ring).await;
            assert!(matches!(out, CaptureOutcome::Stored(_)), "{:?}", out);
        }
    });
    assert_eq!(capture.next_seq(), 3);

    let batch = block_on(BatchAssembler::new(&rig.cfg).assemble(&rig.ring));
    assert!(batch.done);
    assert_eq!(batch.slots, 3);
    assert_eq!(batch.samples.len(), 12);
    // newest block first, its last sample on the interrupt stamp
    assert_eq!(batch.samples[3].ts_ms, 6_000);
    assert_eq!(batch.samples[0].ts_ms, 4_500);
    // first block after boot assumes one nominal FIFO period
    let first_block = &batch.samples[8..];
    assert_eq!(first_block[3].ts_ms, 2_000);
    assert_eq!(first_block[0].ts_ms, 2_000 - i64::from(rig.cfg.fifo_period_ms) * 3 / 4);
}

#[test]
fn producer_never_laps_undelivered_data() {
    let rig = Rig::new(test_config());
    let slots = rig.cfg.ring_slots as u32;
    let margin = u32::from(rig.cfg.safety_margin);

    let refused = block_on(async {
        let mut refused = 0;
        for seq in 0..slots + 4 {
            if rig.ring.append(&slot(seq, 2)).await == Err(AppendError::Backpressure) {
                refused += 1;
            }
        }
        refused
    });
    assert_eq!(rig.pending() as u32, slots - margin);
    assert_eq!(refused, 4 + margin);
    assert_eq!(rig.stats.snapshot().unwrap().backpressure_refusals, refused);
}

#[test]
fn ring_wraps_after_delivery() {
    let rig = Rig::new(test_config());
    let assembler = BatchAssembler::new(&rig.cfg);

    block_on(async {
        for seq in 0..40u32 {
            rig.ring.append(&slot(seq, 1)).await.unwrap();
            // drain everything deliverable every few captures
            if seq % 5 == 4 {
                loop {
                    let batch = assembler.assemble(&rig.ring).await;
                    rig.ring.release(batch.range()).await.unwrap();
                    if batch.done {
                        break;
                    }
                }
            }
        }
    });
    assert_eq!(block_on(rig.ring.write_location()), Ok(40 % 16));
    assert_eq!(rig.stats.snapshot().unwrap().captures_dropped, 0);
}

#[test]
fn clear_erases_every_sector_and_forgets_pending() {
    let rig = Rig::new(test_config());
    rig.fill(6, 3);
    let sectors = usize::from(rig.cfg.ring_slots / rig.cfg.pages_per_sector);

    let before = rig.flash.erase_log().len();
    assert_eq!(block_on(rig.ring.clear()), Ok(0));
    assert_eq!(rig.flash.erase_log().len() - before, sectors);
    assert_eq!(rig.pending(), 0);
    assert_eq!(block_on(rig.ring.write_location()), Ok(0));

    // idempotent
    assert_eq!(block_on(rig.ring.clear()), Ok(0));
    assert_eq!(rig.pending(), 0);
}

#[test]
fn failed_write_drops_capture_without_advancing() {
    let rig = Rig::new(test_config());
    rig.flash.fail_next_writes(u32::from(rig.cfg.write_max_attempts));

    let out = block_on(rig.ring.append(&slot(0, 2)));
    assert!(matches!(out, Err(AppendError::Flash(_))));
    assert_eq!(block_on(rig.ring.write_location()), Ok(0));
    assert_eq!(rig.pending(), 0);

    let s = rig.stats.snapshot().unwrap();
    assert_eq!(s.captures_dropped, 1);
    assert_eq!(s.writes.faults, 1);
}
