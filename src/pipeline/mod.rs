//! Transmission Pipeline: connect, publish batches, retry or abort, tear down.
//!
//! Three cooperative tasks share one [`TransmitPipeline`]:
//!
//! ```text
//!  capture task ──on_capture()──▶ trigger ──start──▶ transmit task (run)
//!                                   │                  │  cycle future
//!                                   │ stuck            │  raced against
//!                                   ▼                  ▼  the abort signal
//!                            watchdog task ──teardown()──▶ Closing ──▶ Idle
//! ```
//!
//! A cycle runs Connecting → Connected → (WaitRetry → Connecting)* and is
//! always followed by a teardown. Teardown is guarded by a flag under the
//! pipeline-state lock so the transmit task and the watchdog never run it
//! twice. Every network wait is bounded by [`with_timeout`].

pub mod downlink;
pub mod payload;
pub mod session;
pub mod state;
pub mod trigger;
pub mod watchdog;

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, info, warn};

use crate::app::ports::{ClockPort, FlashDevice, LinkPort, PublishPort};
use crate::batch::{Batch, BatchAssembler};
use crate::config::SystemConfig;
use crate::error::{Error, LinkError, PublishError};
use crate::ring::RingBuffer;
use crate::stats::StatsCell;
use crate::sync::{TimedMutex, sleep, with_timeout};

use downlink::Command;
use payload::Meta;
use session::{Session, TimeSync};
use state::{Phase, PipelineStatus};
use trigger::{TransmitTrigger, TriggerAction};

/// Poll interval while waiting for the link or the broker.
const CONNECT_POLL: Duration = Duration::from_millis(50);

pub type DeviceId = heapless::String<24>;

/// Timeouts and bounds of one pipeline, resolved from [`SystemConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub attempts_per_cycle: u8,
    pub link: Duration,
    pub connect: Duration,
    pub ack: Duration,
    pub stop: Duration,
    pub retry_delay: Duration,
    pub watchdog_timeout_ms: u32,
    pub watchdog_poll: Duration,
}

impl Timing {
    pub fn from_config(cfg: &SystemConfig) -> Self {
        let ms = |v: u32| Duration::from_millis(u64::from(v));
        Self {
            attempts_per_cycle: cfg.attempts_per_cycle,
            link: ms(cfg.link_timeout_ms),
            connect: ms(cfg.connect_timeout_ms),
            ack: ms(cfg.ack_timeout_ms),
            stop: ms(cfg.stop_timeout_ms),
            retry_delay: ms(cfg.retry_delay_ms),
            watchdog_timeout_ms: cfg.watchdog_timeout_ms,
            watchdog_poll: ms(cfg.watchdog_poll_ms),
        }
    }
}

/// How a cycle ended, before teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every pending slot up to the margin was delivered.
    Completed(Session),
    /// Publishing kept failing and the attempts ran out.
    Abandoned(Session),
    /// The link or broker never came up.
    ConnectFailed(Error),
    /// The server asked for an orderly shutdown.
    Shutdown(Session),
    /// The buffer lock stayed busy; undelivered data stays pending.
    BufferBusy(Session),
    /// Cancelled by the watchdog.
    Aborted,
}

/// Uplink progress kept across cycles. Never borrowed across an await.
#[derive(Debug, Default)]
struct Progress {
    attempts_since_success: u32,
    packets_sent: u32,
    /// Cycles started since boot.
    transmissions: u32,
    time_sync: Option<TimeSync>,
    /// The one snapshot attempt per boot has been made.
    time_sync_attempted: bool,
}

enum Delivery {
    Drained,
    BufferBusy,
    ShutdownRequested,
}

pub struct TransmitPipeline<D: FlashDevice, P: PublishPort, L: LinkPort, C: ClockPort> {
    ring: Rc<RingBuffer<D>>,
    assembler: BatchAssembler,
    transport: TimedMutex<P>,
    link: TimedMutex<L>,
    clock: Rc<C>,
    status: TimedMutex<PipelineStatus>,
    start: Signal<NoopRawMutex, ()>,
    abort: Signal<NoopRawMutex, ()>,
    trigger: RefCell<TransmitTrigger>,
    progress: RefCell<Progress>,
    battery: Cell<Option<u16>>,
    shutdown: Cell<bool>,
    stats: Rc<StatsCell>,
    device_id: DeviceId,
    topic: heapless::String<64>,
    timing: Timing,
}

impl<D, P, L, C> TransmitPipeline<D, P, L, C>
where
    D: FlashDevice,
    P: PublishPort,
    L: LinkPort,
    C: ClockPort,
{
    pub fn new(
        ring: Rc<RingBuffer<D>>,
        transport: P,
        link: L,
        clock: Rc<C>,
        device_id: &str,
        cfg: &SystemConfig,
        stats: Rc<StatsCell>,
    ) -> Self {
        let mut id = DeviceId::new();
        let _ = id.push_str(device_id);
        let lock_timeout = cfg.lock_timeout();
        Self {
            ring,
            assembler: BatchAssembler::new(cfg),
            transport: TimedMutex::new(transport, lock_timeout),
            link: TimedMutex::new(link, lock_timeout),
            clock,
            status: TimedMutex::new(PipelineStatus::new(), lock_timeout),
            start: Signal::new(),
            abort: Signal::new(),
            trigger: RefCell::new(TransmitTrigger::new(cfg)),
            progress: RefCell::new(Progress::default()),
            battery: Cell::new(None),
            shutdown: Cell::new(false),
            stats,
            device_id: id,
            topic: cfg.topic.clone(),
            timing: Timing::from_config(cfg),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Current phase, if the status lock is free.
    pub fn phase(&self) -> Option<Phase> {
        self.status.try_lock().map(|s| s.phase)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.get()
    }

    pub fn attempts_since_success(&self) -> u32 {
        self.progress.borrow().attempts_since_success
    }

    pub fn time_sync(&self) -> Option<TimeSync> {
        self.progress.borrow().time_sync.clone()
    }

    /// Latest battery reading in centivolts, reported in every packet.
    pub fn set_battery(&self, centivolts: Option<u16>) {
        self.battery.set(centivolts);
    }

    /// Ask the transmit task to start a cycle.
    pub fn request_cycle(&self) {
        self.start.signal(());
    }

    // ── Trigger (capture task) ────────────────────────────────

    /// Count one capture toward the next transmission.
    pub async fn on_capture(&self) -> TriggerAction {
        let cycle_active = self
            .status
            .lock()
            .await
            .is_ok_and(|s| s.cycle_active);
        let (since, packets) = {
            let p = self.progress.borrow();
            (p.attempts_since_success, p.packets_sent)
        };
        let action = self
            .trigger
            .borrow_mut()
            .on_capture(since, cycle_active, packets);

        if action.fired() {
            let since = {
                let mut p = self.progress.borrow_mut();
                p.attempts_since_success = p.attempts_since_success.saturating_add(1);
                p.attempts_since_success
            };
            self.stats.bump(|s| s.attempts_since_success = since);
        }
        match action {
            TriggerAction::StartCycle => {
                info!("Pipeline: trigger fired, starting cycle");
                self.stats.bump(|s| s.connect_attempts += 1);
                self.request_cycle();
            }
            TriggerAction::TerminateStuck => {
                warn!("Pipeline: cycle active without progress, terminating");
                if let Ok(mut s) = self.status.lock().await {
                    s.request_terminate();
                }
            }
            TriggerAction::CycleProgressing | TriggerAction::Wait => {}
        }
        action
    }

    // ── Transmit task ─────────────────────────────────────────

    /// Transmit task body. Returns after an accepted shutdown request.
    pub async fn run(&self) {
        info!("Pipeline: transmit task started");
        loop {
            self.start.wait().await;
            if let Some(outcome) = self.run_once().await {
                info!("Pipeline: cycle ended: {:?}", outcome);
            }
            if self.shutdown_requested() {
                info!("Pipeline: shutdown requested, transmit task exiting");
                return;
            }
        }
    }

    /// One full cycle plus teardown. `None` if a cycle could not start
    /// because another one is active or still closing.
    pub async fn run_once(&self) -> Option<CycleOutcome> {
        let began = self.status.lock().await.is_ok_and(|mut s| s.begin_cycle());
        if !began {
            debug!("Pipeline: cycle already active, start ignored");
            return None;
        }
        self.abort.reset();

        let outcome = futures_lite::future::or(self.run_cycle(), async {
            self.abort.wait().await;
            CycleOutcome::Aborted
        })
        .await;

        self.teardown().await;
        Some(outcome)
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let mut session = Session::new(self.timing.attempts_per_cycle);
        {
            let mut p = self.progress.borrow_mut();
            p.transmissions = p.transmissions.saturating_add(1);
        }
        loop {
            self.enter(Phase::Connecting, true).await;
            if let Err(e) = self.connect().await {
                warn!("Pipeline: connect failed ({})", e);
                self.stats.bump(|s| s.connect_failures += 1);
                return CycleOutcome::ConnectFailed(e);
            }
            self.enter(Phase::Connected, false).await;
            self.snapshot_time_sync();

            match self.deliver(&mut session).await {
                Ok(Delivery::Drained) => {
                    self.stats.bump(|s| s.transmit_successes += 1);
                    info!(
                        "Pipeline: delivered {} samples in {} packets",
                        session.samples_sent, session.messages_sent
                    );
                    return CycleOutcome::Completed(session);
                }
                Ok(Delivery::BufferBusy) => {
                    warn!(
                        "Pipeline: buffer busy after {} packets, ending cycle",
                        session.messages_sent
                    );
                    return CycleOutcome::BufferBusy(session);
                }
                Ok(Delivery::ShutdownRequested) => return CycleOutcome::Shutdown(session),
                Err(e) => {
                    if !session.spend_attempt() {
                        warn!("Pipeline: publish failed ({}), no attempts left", e);
                        return CycleOutcome::Abandoned(session);
                    }
                    warn!(
                        "Pipeline: publish failed ({}), {} attempts left, retrying",
                        e, session.attempts_remaining
                    );
                    self.stats.bump(|s| s.retry_attempts += 1);
                    self.enter(Phase::WaitRetry, false).await;
                    self.stop_transport().await;
                    match self.link.lock().await {
                        Ok(mut link) => link.disconnect(),
                        Err(_) => warn!("Pipeline: link lock timeout, reconnecting over old link"),
                    }
                    sleep(self.timing.retry_delay).await;
                }
            }
        }
    }

    /// Record the phase; arm the watchdog when entering Connecting,
    /// disarm it otherwise.
    async fn enter(&self, phase: Phase, arm: bool) {
        let now = self.clock.uptime_ms();
        if let Ok(mut s) = self.status.lock().await {
            s.phase = phase;
            if arm {
                s.arm_watchdog(now, self.timing.watchdog_timeout_ms);
            } else {
                s.disarm_watchdog();
            }
        }
        debug!("Pipeline: -> {}", phase.name());
    }

    async fn connect(&self) -> Result<(), Error> {
        {
            let mut link = self.link.lock().await?;
            if !link.is_up() {
                link.radio_enable(true);
                link.select_network()?;
            }
        }
        with_timeout(self.timing.link, async {
            while !self.link.lock().await.is_ok_and(|l| l.is_up()) {
                sleep(CONNECT_POLL).await;
            }
        })
        .await
        .map_err(|_| LinkError::Timeout)?;

        {
            let mut transport = self.transport.lock().await?;
            if !transport.is_connected() {
                transport.start()?;
            }
        }
        with_timeout(self.timing.connect, async {
            while !self.transport.lock().await.is_ok_and(|t| t.is_connected()) {
                sleep(CONNECT_POLL).await;
            }
        })
        .await
        .map_err(|_| PublishError::ConnectTimeout)?;

        info!("Pipeline: connected");
        Ok(())
    }

    fn snapshot_time_sync(&self) {
        let mut p = self.progress.borrow_mut();
        if p.time_sync_attempted {
            return;
        }
        p.time_sync_attempted = true;
        match TimeSync::capture(self.clock.as_ref()) {
            Some(ts) => {
                info!("Pipeline: time sync {}", ts.field());
                p.time_sync = Some(ts);
            }
            None => warn!("Pipeline: wall clock not synced, no time sync this boot"),
        }
    }

    async fn deliver(&self, session: &mut Session) -> Result<Delivery, PublishError> {
        loop {
            if self.poll_downlink().await {
                return Ok(Delivery::ShutdownRequested);
            }

            let batch = self.assembler.assemble(&self.ring).await;
            if batch.is_unreadable() {
                warn!("Pipeline: batch {:?} unreadable, releasing", batch.range());
                self.release(&batch).await;
                self.stats.bump(|s| s.unreadable_batches += 1);
                if batch.done {
                    return Ok(Delivery::Drained);
                }
                continue;
            }
            if batch.is_empty() {
                if batch.lock_error {
                    return Ok(Delivery::BufferBusy);
                }
                return Ok(Delivery::Drained);
            }

            self.publish(&batch).await?;
            self.release(&batch).await;
            session.record_delivery(batch.samples.len());
            let samples = batch.samples.len() as u32;
            self.stats.bump(|s| {
                s.packets_sent += 1;
                s.samples_sent += samples;
                s.attempts_since_success = 0;
            });

            if batch.done {
                if self.poll_downlink().await {
                    return Ok(Delivery::ShutdownRequested);
                }
                return Ok(Delivery::Drained);
            }
        }
    }

    async fn publish(&self, batch: &Batch) -> Result<(), PublishError> {
        let write_faults = self.stats.snapshot().map_or(0, |s| s.writes.faults);
        let (seq, ts_sync, meta) = {
            let p = self.progress.borrow();
            let ts_sync = p.time_sync.as_ref().map(TimeSync::field);
            let meta = Meta::new(p.transmissions, write_faults, self.clock.uptime_ms());
            (p.packets_sent + 1, ts_sync, meta)
        };
        let body = payload::encode(
            &self.device_id,
            seq,
            ts_sync.as_deref(),
            self.battery.get(),
            meta,
            batch,
        )?;

        let result = match self.transport.lock().await {
            Ok(mut t) => with_timeout(
                self.timing.ack,
                t.publish(&self.topic, &body, self.timing.ack),
            )
            .await
            .unwrap_or(Err(PublishError::Timeout)),
            Err(_) => Err(PublishError::Failed),
        };
        result?;

        let mut p = self.progress.borrow_mut();
        p.packets_sent += 1;
        p.attempts_since_success = 0;
        debug!("Pipeline: packet {} acked ({} samples)", seq, batch.samples.len());
        Ok(())
    }

    async fn release(&self, batch: &Batch) {
        if self.ring.release(batch.range()).await.is_err() {
            warn!(
                "Pipeline: release of {:?} timed out, slots will be resent",
                batch.range()
            );
        }
    }

    /// Drain received downlinks. `true` once a terminate for this device arrives.
    async fn poll_downlink(&self) -> bool {
        loop {
            let msg = match self.transport.lock().await {
                Ok(mut t) => t.take_downlink(),
                Err(_) => None,
            };
            let Some(msg) = msg else {
                return self.shutdown_requested();
            };
            if downlink::parse(&msg, &self.device_id) == Some(Command::Terminate) {
                self.shutdown.set(true);
            }
        }
    }

    /// Cooperative stop bounded by the stop timeout, forced if it overruns.
    async fn stop_transport(&self) {
        let Ok(mut t) = self.transport.lock().await else {
            warn!("Pipeline: transport lock timeout, stop skipped");
            return;
        };
        if with_timeout(self.timing.stop, t.stop()).await.is_err() {
            warn!("Pipeline: transport stop timed out, forcing");
            t.force_stop();
        }
    }

    // ── Closing ───────────────────────────────────────────────

    /// Idempotent teardown. Returns `true` if this call performed it.
    pub async fn teardown(&self) -> bool {
        match self.status.lock().await {
            Ok(mut s) => {
                if !s.begin_teardown() {
                    return false;
                }
            }
            Err(_) => {
                warn!("Pipeline: status lock timeout, teardown skipped");
                return false;
            }
        }
        debug!("Pipeline: -> Closing");
        self.abort.signal(());

        self.stop_transport().await;
        match self.link.lock().await {
            Ok(mut link) => {
                link.disconnect();
                link.radio_enable(false);
            }
            Err(_) => warn!("Pipeline: link lock timeout, radio left on"),
        }

        match self.status.lock().await {
            Ok(mut s) => s.finish_teardown(),
            Err(_) => warn!("Pipeline: status lock timeout finishing teardown"),
        }
        info!("Pipeline: closed, radio off");
        true
    }

    /// Watchdog check: tear down an overrunning or stuck cycle.
    /// Returns `true` if a teardown was forced.
    pub async fn watchdog_check(&self) -> bool {
        let now = self.clock.uptime_ms();
        let due = self
            .status
            .lock()
            .await
            .is_ok_and(|s| s.cycle_active && !s.teardown_in_progress && s.watchdog_due(now));
        if !due {
            return false;
        }
        warn!("Watchdog: cycle overran, forcing teardown");
        let forced = self.teardown().await;
        if forced {
            self.stats.bump(|s| s.forced_teardowns += 1);
        }
        forced
    }
}
