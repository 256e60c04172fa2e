//! Wearlog Node: Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  FifoAccelerometer  PartitionFlash  NvsAdapter   SystemClock   │
//! │  (SensorPort)       (FlashDevice)   (Config)     (ClockPort)   │
//! │  WifiLink           EspMqttTransport                           │
//! │  (LinkPort)         (PublishPort)                              │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              NodeService (pure logic)                  │    │
//! │  │  Capture · RingBuffer · TransmitPipeline · Watchdog    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! On the host the same core runs against the simulation adapters: a
//! RAM-backed NOR chip, a synthetic gait signal, and an in-process broker
//! that sends `terminate` after a fixed number of packets.
#![deny(unused_must_use)]

use std::rc::Rc;

use anyhow::Result;
use log::{info, warn};

use wearlog::adapters::device_id;
use wearlog::adapters::nvs::NvsAdapter;
use wearlog::adapters::time::SystemClock;
use wearlog::app::ports::ConfigPort;
use wearlog::app::service::NodeService;
use wearlog::capture::{Capture, FifoIrq};
use wearlog::config::SystemConfig;
use wearlog::drivers::watchdog::Watchdog;
use wearlog::flash::FlashPageStore;
use wearlog::pipeline::TransmitPipeline;
use wearlog::ring::RingBuffer;
use wearlog::stats::StatsCell;

/// Samples per FIFO watermark interrupt.
const FIFO_WATERMARK: u8 = 28;

/// Task watchdog budget for the capture loop.
const TASK_WDT_TIMEOUT_MS: u32 = 10_000;

/// Latched by the accelerometer INTN interrupt, drained by the capture task.
static FIFO_IRQ: FifoIrq = FifoIrq::new();

/// NVS config, or defaults when NVS is unavailable or holds garbage.
fn load_config() -> SystemConfig {
    let nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults", e);
            return SystemConfig::default();
        }
    };
    match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    }
}

// ── Target ────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod target {
    use esp_idf_hal::gpio::{Input, InterruptType, PinDriver, Pull};
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::units::Hertz;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::wifi::EspWifi;

    use wearlog::adapters::flash::PartitionFlash;
    use wearlog::adapters::mqtt::EspMqttTransport;
    use wearlog::adapters::wifi::WifiLink;
    use wearlog::app::ports::SensorPort;
    use wearlog::drivers::accel::{DEFAULT_ADDRESS, FifoAccelerometer};
    use wearlog::error::SensorError;
    use wearlog::slot::SampleBuf;

    use super::*;

    const WIFI_SSID: &str = match option_env!("WEARLOG_WIFI_SSID") {
        Some(s) => s,
        None => "wearlog",
    };
    const WIFI_PASS: &str = match option_env!("WEARLOG_WIFI_PASS") {
        Some(s) => s,
        None => "",
    };
    const BROKER_URL: &str = match option_env!("WEARLOG_BROKER_URL") {
        Some(s) => s,
        None => "mqtt://192.168.4.1:1883",
    };

    /// Accelerometer plus its INTN pin. The GPIO driver disarms the
    /// interrupt after each edge, so it is re-armed once the FIFO is drained.
    struct IrqAccelerometer {
        accel: FifoAccelerometer<I2cDriver<'static>>,
        intn: PinDriver<'static, esp_idf_hal::gpio::Gpio4, Input>,
    }

    impl SensorPort for IrqAccelerometer {
        fn read_fifo(&mut self, out: &mut SampleBuf) -> Result<usize, SensorError> {
            let result = self.accel.read_fifo(out);
            if let Err(e) = self.intn.enable_interrupt() {
                warn!("Accel: INTN re-arm failed ({})", e);
            }
            result
        }
    }

    fn on_fifo_irq() {
        // SAFETY: the high-resolution timer is ISR-safe.
        let now_ms = unsafe { esp_idf_svc::sys::esp_timer_get_time() } / 1000;
        FIFO_IRQ.on_interrupt(now_ms);
    }

    pub fn run() -> Result<()> {
        esp_idf_svc::sys::link_patches();
        esp_idf_logger::init()?;

        info!("╔══════════════════════════════════════╗");
        info!("║  Wearlog v{}                         ║", env!("CARGO_PKG_VERSION"));
        info!("╚══════════════════════════════════════╝");

        let config = load_config();
        let stats = Rc::new(StatsCell::new(config.lock_timeout()));

        // ── Ring storage ──────────────────────────────────────
        let flash = PartitionFlash::open(c"ringbuf")
            .map_err(|e| anyhow::anyhow!("ring partition: {}", e))?;
        let store = FlashPageStore::new(flash, &config, stats.clone())
            .map_err(|e| anyhow::anyhow!("flash geometry: {}", e))?;
        let ring = Rc::new(RingBuffer::new(store, &config, stats.clone()));

        // ── Accelerometer + FIFO interrupt ────────────────────
        let peripherals = Peripherals::take()?;
        let i2c_cfg = I2cConfig::new().baudrate(Hertz(400_000));
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio21,
            peripherals.pins.gpio22,
            &i2c_cfg,
        )?;
        let mut accel = FifoAccelerometer::new(i2c, DEFAULT_ADDRESS);
        accel
            .init(FIFO_WATERMARK)
            .map_err(|e| anyhow::anyhow!("accelerometer: {}", e))?;

        let mut intn = PinDriver::input(peripherals.pins.gpio4)?;
        intn.set_pull(Pull::Up)?;
        intn.set_interrupt_type(InterruptType::NegEdge)?;
        // SAFETY: the callback only touches atomics in a static.
        unsafe { intn.subscribe(on_fifo_irq)? };
        intn.enable_interrupt()?;
        let sensor = IrqAccelerometer { accel, intn };

        // ── Network ───────────────────────────────────────────
        let sysloop = EspSystemEventLoop::take()?;
        let wifi = EspWifi::new(peripherals.modem, sysloop, None)?;
        let mut link = WifiLink::new(wifi);
        link.set_credentials(WIFI_SSID, WIFI_PASS)
            .map_err(|e| anyhow::anyhow!("wifi credentials: {}", e))?;
        let _sntp = esp_idf_svc::sntp::EspSntp::new_default()?;

        let mac = device_id::read_mac();
        let id = device_id::device_id(&config.device_prefix, &mac);
        info!("Device ID: {}", id);
        let mut command_topic: heapless::String<64> = heapless::String::new();
        {
            use core::fmt::Write;
            let _ = write!(command_topic, "{}/{}/cmd", config.topic, id);
        }
        let transport = EspMqttTransport::new(BROKER_URL, &id, &command_topic);

        // ── Core ──────────────────────────────────────────────
        let clock = Rc::new(SystemClock::new(0));
        let pipeline = TransmitPipeline::new(
            ring.clone(),
            transport,
            link,
            clock.clone(),
            &id,
            &config,
            stats.clone(),
        );
        let capture = Capture::new(sensor, &FIFO_IRQ, &config, stats.clone());
        let watchdog = Watchdog::new(TASK_WDT_TIMEOUT_MS);
        let service = NodeService::new(ring, pipeline, clock, stats, watchdog, &config);

        info!("System ready.");
        let summary = service
            .run(capture)
            .map_err(|e| anyhow::anyhow!("service: {}", e))?;
        info!("Shutdown complete: {} packets delivered", summary.packets_sent);
        Ok(())
    }
}

// ── Host simulation ───────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod target {
    use std::time::Duration;

    use wearlog::adapters::flash::SimNorFlash;
    use wearlog::adapters::mqtt::{SimBroker, SimBrokerConfig};
    use wearlog::adapters::sensor::SimAccelerometer;
    use wearlog::adapters::wifi::WifiLink;
    use wearlog::app::ports::ClockPort;

    use super::*;

    /// Packets the simulated server accepts before it sends `terminate`.
    const SIM_PACKETS: u32 = 12;

    /// Compressed FIFO period so a simulated run finishes in seconds.
    const SIM_FIFO_PERIOD_MS: u32 = 100;

    pub fn run() -> Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        info!("Wearlog v{} (host simulation)", env!("CARGO_PKG_VERSION"));

        let mut config = load_config();
        config.fifo_period_ms = SIM_FIFO_PERIOD_MS;
        config.fifo_poll_interval_ms = SIM_FIFO_PERIOD_MS / 4;
        let stats = Rc::new(StatsCell::new(config.lock_timeout()));

        let flash: SimNorFlash = SimNorFlash::for_ring(&config);
        let store = FlashPageStore::new(flash, &config, stats.clone())
            .map_err(|e| anyhow::anyhow!("flash geometry: {}", e))?;
        let ring = Rc::new(RingBuffer::new(store, &config, stats.clone()));

        let clock = SystemClock::new(0);
        let irq_clock = clock;
        let period = Duration::from_millis(u64::from(config.fifo_period_ms));
        std::thread::spawn(move || {
            loop {
                std::thread::sleep(period);
                FIFO_IRQ.on_interrupt(irq_clock.uptime_ms());
            }
        });
        let clock = Rc::new(clock);

        let id = device_id::device_id(&config.device_prefix, &device_id::read_mac());
        info!("Device ID: {}", id);

        let broker = SimBroker::new(
            &id,
            SimBrokerConfig {
                terminate_after: Some(SIM_PACKETS),
                ..SimBrokerConfig::default()
            },
        );
        let mut link = WifiLink::simulated(Duration::from_millis(200));
        link.set_credentials("sim", "")
            .map_err(|e| anyhow::anyhow!("wifi credentials: {}", e))?;

        let pipeline = TransmitPipeline::new(
            ring.clone(),
            broker.clone(),
            link,
            clock.clone(),
            &id,
            &config,
            stats.clone(),
        );
        let capture = Capture::new(
            SimAccelerometer::new(usize::from(FIFO_WATERMARK)),
            &FIFO_IRQ,
            &config,
            stats.clone(),
        );
        let watchdog = Watchdog::new(TASK_WDT_TIMEOUT_MS);
        let service = NodeService::new(ring, pipeline, clock, stats, watchdog, &config);

        let summary = service
            .run(capture)
            .map_err(|e| anyhow::anyhow!("service: {}", e))?;
        info!(
            "Simulation finished: broker acked {} packets, node sent {}",
            broker.acked(),
            summary.packets_sent
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    target::run()
}
