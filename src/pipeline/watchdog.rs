//! Cycle watchdog task.
//!
//! Polls the pipeline status every `watchdog_poll_ms`. A cycle still in
//! Connecting past its deadline, or one the trigger flagged as stuck, is
//! torn down from here. The transmit task sees the abort signal and drops
//! its cycle future at the next await.

use log::debug;

use crate::app::ports::{ClockPort, FlashDevice, LinkPort, PublishPort};
use crate::sync::sleep;

use super::TransmitPipeline;

/// Watchdog task body. Never returns; the service drops it on shutdown.
pub async fn run<D, P, L, C>(pipeline: &TransmitPipeline<D, P, L, C>)
where
    D: FlashDevice,
    P: PublishPort,
    L: LinkPort,
    C: ClockPort,
{
    let poll = pipeline.timing().watchdog_poll;
    debug!("Watchdog: polling every {:?}", poll);
    loop {
        sleep(poll).await;
        pipeline.watchdog_check().await;
    }
}
