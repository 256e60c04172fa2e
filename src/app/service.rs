//! Node service: wires the capture, transmit and watchdog tasks onto one
//! cooperative executor.
//!
//! ```text
//!  ┌────────────────────────────────────────────────────────────┐
//!  │  futures_lite::block_on (drives the async-io-mini timers)  │
//!  │  ┌──────────────────────────────────────────────────────┐  │
//!  │  │  edge_executor::LocalExecutor                        │  │
//!  │  │                                                      │  │
//!  │  │  ┌──────────┐  ┌────────────┐  ┌────────────────┐   │  │
//!  │  │  │ Capture  │  │  Watchdog  │  │ Transmit (run) │   │  │
//!  │  │  │ poll  ⏱  │  │  poll  ⏱   │  │ wake-on-signal │   │  │
//!  │  │  └──────────┘  └────────────┘  └────────────────┘   │  │
//!  │  └──────────────────────────────────────────────────────┘  │
//!  └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The executor runs until the transmit task accepts a terminate
//! downlink. The ring is then erased and the final counters returned.

use core::time::Duration;
use std::rc::Rc;

use log::{info, warn};

use crate::capture::Capture;
use crate::config::SystemConfig;
use crate::drivers::watchdog::Watchdog;
use crate::error::Error;
use crate::pipeline::{self, TransmitPipeline};
use crate::ring::RingBuffer;
use crate::stats::{Stats, StatsCell};
use crate::sync::sleep;

use super::ports::{ClockPort, FlashDevice, LinkPort, PublishPort, SensorPort};

pub struct NodeService<D, P, L, C>
where
    D: FlashDevice,
    P: PublishPort,
    L: LinkPort,
    C: ClockPort,
{
    ring: Rc<RingBuffer<D>>,
    pipeline: TransmitPipeline<D, P, L, C>,
    clock: Rc<C>,
    stats: Rc<StatsCell>,
    watchdog: Watchdog,
    capture_poll: Duration,
}

impl<D, P, L, C> NodeService<D, P, L, C>
where
    D: FlashDevice,
    P: PublishPort,
    L: LinkPort,
    C: ClockPort,
{
    pub fn new(
        ring: Rc<RingBuffer<D>>,
        pipeline: TransmitPipeline<D, P, L, C>,
        clock: Rc<C>,
        stats: Rc<StatsCell>,
        watchdog: Watchdog,
        cfg: &SystemConfig,
    ) -> Self {
        Self {
            ring,
            pipeline,
            clock,
            stats,
            watchdog,
            capture_poll: Duration::from_millis(u64::from(cfg.fifo_poll_interval_ms)),
        }
    }

    pub fn pipeline(&self) -> &TransmitPipeline<D, P, L, C> {
        &self.pipeline
    }

    pub fn ring(&self) -> &RingBuffer<D> {
        &self.ring
    }

    /// Cold boot, then run every task until an orderly shutdown.
    ///
    /// Only a failed ring initialisation is returned as an error.
    pub fn run<S: SensorPort>(&self, capture: Capture<S>) -> Result<Stats, Error> {
        futures_lite::future::block_on(self.ring.initialize())?;

        let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();
        executor.spawn(self.capture_task(capture)).detach();
        executor.spawn(pipeline::watchdog::run(&self.pipeline)).detach();
        info!("Service: tasks started");

        futures_lite::future::block_on(executor.run(async {
            self.pipeline.run().await;
            self.shutdown().await
        }))
    }

    async fn capture_task<S: SensorPort>(&self, mut capture: Capture<S>) {
        info!("Service: capture task started");
        loop {
            if self.pipeline.shutdown_requested() {
                info!("Service: capture stopped");
                return;
            }
            self.watchdog.feed();
            let outcome = capture.poll(self.clock.uptime_ms(), &self.ring).await;
            if outcome.captured() {
                self.pipeline.on_capture().await;
            }
            sleep(self.capture_poll).await;
        }
    }

    /// Erase the ring and report the final counters.
    async fn shutdown(&self) -> Result<Stats, Error> {
        info!("Service: orderly shutdown, erasing ring");
        match self.ring.clear().await {
            Ok(0) => {}
            Ok(failed) => warn!("Service: {} sectors failed to erase", failed),
            Err(e) => warn!("Service: ring clear skipped ({})", e),
        }
        let stats = self.stats.snapshot().unwrap_or_default();
        stats.log_summary();
        Ok(stats)
    }
}
