//! Mock network adapters and a steerable clock for integration tests.
//!
//! Each mock hands out a cloneable handle onto shared state, so a test
//! keeps one handle for assertions while the pipeline owns the other.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use wearlog::adapters::flash::SimNorFlash;
use wearlog::app::ports::{ClockPort, Downlink, LinkPort, PublishPort};
use wearlog::config::SystemConfig;
use wearlog::error::{LinkError, PublishError};
use wearlog::flash::FlashPageStore;
use wearlog::pipeline::TransmitPipeline;
use wearlog::ring::RingBuffer;
use wearlog::slot::{Sample, SampleBuf, Slot};
use wearlog::stats::StatsCell;

pub const DEVICE: &str = "WL-A1B2C3";

// ── Publish script ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    Ack,
    Fail,
    /// Never completes; the pipeline's ack timeout must cut it off.
    Hang,
}

#[derive(Default)]
pub struct TransportLog {
    pub connected: bool,
    pub starts: u32,
    pub stops: u32,
    pub force_stops: u32,
    pub published: Vec<Vec<u8>>,
    pub acked: Vec<Vec<u8>>,
    script: VecDeque<PublishStep>,
    downlinks: VecDeque<Downlink>,
    never_connects: bool,
    stop_hangs: bool,
}

/// PublishPort whose publishes follow a script. Unscripted publishes ack.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    log: Rc<RefCell<TransportLog>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, steps: &[PublishStep]) {
        self.log.borrow_mut().script.extend(steps.iter().copied());
    }

    pub fn never_connects(&self) {
        self.log.borrow_mut().never_connects = true;
    }

    pub fn stop_hangs(&self) {
        self.log.borrow_mut().stop_hangs = true;
    }

    pub fn push_downlink(&self, msg: &str) {
        let mut d = Downlink::new();
        let _ = d.extend_from_slice(msg.as_bytes());
        self.log.borrow_mut().downlinks.push_back(d);
    }

    pub fn log(&self) -> std::cell::Ref<'_, TransportLog> {
        self.log.borrow()
    }

    /// Parsed JSON of every acked packet.
    pub fn acked_json(&self) -> Vec<serde_json::Value> {
        self.log
            .borrow()
            .acked
            .iter()
            .map(|b| serde_json::from_slice(b).unwrap())
            .collect()
    }
}

impl PublishPort for ScriptedTransport {
    fn is_connected(&self) -> bool {
        self.log.borrow().connected
    }

    fn start(&mut self) -> Result<(), PublishError> {
        let mut log = self.log.borrow_mut();
        log.starts += 1;
        if !log.never_connects {
            log.connected = true;
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        _topic: &str,
        payload: &[u8],
        _ack_timeout: Duration,
    ) -> Result<(), PublishError> {
        let step = {
            let mut log = self.log.borrow_mut();
            log.published.push(payload.to_vec());
            log.script.pop_front().unwrap_or(PublishStep::Ack)
        };
        match step {
            PublishStep::Ack => {
                self.log.borrow_mut().acked.push(payload.to_vec());
                Ok(())
            }
            PublishStep::Fail => Err(PublishError::Failed),
            PublishStep::Hang => core::future::pending().await,
        }
    }

    async fn stop(&mut self) {
        if self.log.borrow().stop_hangs {
            core::future::pending::<()>().await;
        }
        let mut log = self.log.borrow_mut();
        log.stops += 1;
        log.connected = false;
    }

    fn force_stop(&mut self) {
        let mut log = self.log.borrow_mut();
        log.force_stops += 1;
        log.connected = false;
    }

    fn take_downlink(&mut self) -> Option<Downlink> {
        self.log.borrow_mut().downlinks.pop_front()
    }
}

// ── Link ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct LinkLog {
    pub radio_on: bool,
    pub up: bool,
    pub selects: u32,
    pub disconnects: u32,
    pub radio_offs: u32,
    never_up: bool,
}

#[derive(Clone, Default)]
pub struct RecordingLink {
    log: Rc<RefCell<LinkLog>>,
}

#[allow(dead_code)]
impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn never_up(&self) {
        self.log.borrow_mut().never_up = true;
    }

    pub fn log(&self) -> std::cell::Ref<'_, LinkLog> {
        self.log.borrow()
    }
}

impl LinkPort for RecordingLink {
    fn radio_enable(&mut self, on: bool) {
        let mut log = self.log.borrow_mut();
        log.radio_on = on;
        if !on {
            log.radio_offs += 1;
            log.up = false;
        }
    }

    fn select_network(&mut self) -> Result<(), LinkError> {
        let mut log = self.log.borrow_mut();
        if !log.radio_on {
            return Err(LinkError::SelectFailed);
        }
        log.selects += 1;
        log.up = !log.never_up;
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.log.borrow().up
    }

    fn disconnect(&mut self) {
        let mut log = self.log.borrow_mut();
        log.disconnects += 1;
        log.up = false;
    }
}

// ── Clock ─────────────────────────────────────────────────────

/// Real elapsed time plus a test-controlled offset.
pub struct ManualClock {
    start: Instant,
    offset_ms: Cell<i64>,
    wall_ms: Cell<Option<i64>>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn new(wall_ms: Option<i64>) -> Self {
        Self {
            start: Instant::now(),
            offset_ms: Cell::new(0),
            wall_ms: Cell::new(wall_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.offset_ms.set(self.offset_ms.get() + ms);
    }

    pub fn set_wall(&self, wall_ms: Option<i64>) {
        self.wall_ms.set(wall_ms);
    }
}

impl ClockPort for ManualClock {
    fn uptime_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64 + self.offset_ms.get()
    }

    fn wall_clock_ms(&self) -> Option<i64> {
        self.wall_ms.get()
    }
}

// ── Fixtures ──────────────────────────────────────────────────

pub type TestFlash = SimNorFlash<2>;
pub type TestPipeline = TransmitPipeline<TestFlash, ScriptedTransport, RecordingLink, ManualClock>;

/// A small, fast configuration: 16 slots in 2-page sectors.
pub fn test_config() -> SystemConfig {
    SystemConfig {
        ring_slots: 16,
        pages_per_sector: 2,
        safety_margin: 2,
        write_retry_delay_ms: 0,
        erase_retry_delay_ms: 0,
        max_slots_per_batch: 3,
        trigger_first: 2,
        trigger_fast: 3,
        trigger_slow: 6,
        fast_slow_switch: 2,
        attempts_per_cycle: 3,
        link_timeout_ms: 200,
        connect_timeout_ms: 200,
        ack_timeout_ms: 50,
        stop_timeout_ms: 50,
        retry_delay_ms: 5,
        watchdog_timeout_ms: 100,
        watchdog_poll_ms: 10,
        ..Default::default()
    }
}

pub struct Rig {
    pub cfg: SystemConfig,
    pub flash: TestFlash,
    pub ring: Rc<RingBuffer<TestFlash>>,
    pub stats: Rc<StatsCell>,
    pub transport: ScriptedTransport,
    pub link: RecordingLink,
    pub clock: Rc<ManualClock>,
    pub pipeline: TestPipeline,
}

#[allow(dead_code)]
impl Rig {
    pub fn new(cfg: SystemConfig) -> Self {
        Self::with_wall_clock(cfg, Some(1_760_000_000_000))
    }

    /// A rig whose wall clock reads `wall_ms` (`None`: not synced yet).
    pub fn with_wall_clock(cfg: SystemConfig, wall_ms: Option<i64>) -> Self {
        let stats = Rc::new(StatsCell::new(cfg.lock_timeout()));
        let flash = TestFlash::for_ring(&cfg);
        let store = FlashPageStore::new(flash.clone(), &cfg, stats.clone()).unwrap();
        let ring = Rc::new(RingBuffer::new(store, &cfg, stats.clone()));
        futures_lite::future::block_on(ring.initialize()).unwrap();

        let transport = ScriptedTransport::new();
        let link = RecordingLink::new();
        let clock = Rc::new(ManualClock::new(wall_ms));
        let pipeline = TransmitPipeline::new(
            ring.clone(),
            transport.clone(),
            link.clone(),
            clock.clone(),
            DEVICE,
            &cfg,
            stats.clone(),
        );
        Self {
            cfg,
            flash,
            ring,
            stats,
            transport,
            link,
            clock,
            pipeline,
        }
    }

    /// Append `count` slots of `per_slot` samples, one FIFO period apart.
    pub fn fill(&self, count: u32, per_slot: usize) {
        futures_lite::future::block_on(async {
            for seq in 0..count {
                self.ring.append(&slot(seq, per_slot)).await.unwrap();
            }
        });
    }

    pub fn pending(&self) -> usize {
        futures_lite::future::block_on(self.ring.pending_count()).unwrap()
    }
}

pub fn slot(seq: u32, per_slot: usize) -> Slot {
    let mut samples = SampleBuf::new();
    for i in 0..per_slot {
        samples.push(Sample::new(seq as i16, i as i16, 100)).unwrap();
    }
    let ts_now_ms = 10_000 + i64::from(seq) * 2_000;
    Slot {
        seq,
        samples,
        ts_now_ms,
        ts_prev_ms: ts_now_ms - 2_000,
    }
}
