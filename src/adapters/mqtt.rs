//! MQTT publish transport implementing [`PublishPort`].
//!
//! - **`target_os = "espidf"`**: [`EspMqttTransport`] over `EspMqttClient`.
//!   The client callback runs on the MQTT task, so connection state, acks
//!   and downlinks cross over through a `std::sync::Mutex`.
//! - **all targets**: [`SimBroker`], an in-process broker with ack latency,
//!   periodic publish failures and scripted downlinks.

use core::fmt::Write;
use core::time::Duration;

use log::{info, warn};

use crate::app::ports::{Downlink, PublishPort};
use crate::error::PublishError;
use crate::sync::sleep;

// ───────────────────────────────────────────────────────────────
// Simulated broker
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBrokerConfig {
    pub ack_latency: Duration,
    /// Every `fail_every`-th publish is rejected. 0 disables failures.
    pub fail_every: u32,
    /// Queue a `terminate` downlink for this device after that many acks.
    pub terminate_after: Option<u32>,
}

impl Default for SimBrokerConfig {
    fn default() -> Self {
        Self {
            ack_latency: Duration::from_millis(40),
            fail_every: 0,
            terminate_after: None,
        }
    }
}

#[derive(Default)]
struct SimBrokerState {
    connected: bool,
    publishes: u32,
    acked: u32,
    received: Vec<Vec<u8>>,
    downlinks: std::collections::VecDeque<Downlink>,
}

/// Clones share one broker, so a handle kept outside the pipeline can
/// inspect what was published.
#[derive(Clone)]
pub struct SimBroker {
    cfg: SimBrokerConfig,
    device_id: heapless::String<24>,
    state: std::rc::Rc<std::cell::RefCell<SimBrokerState>>,
}

impl SimBroker {
    pub fn new(device_id: &str, cfg: SimBrokerConfig) -> Self {
        let mut id = heapless::String::new();
        let _ = id.push_str(device_id);
        Self {
            cfg,
            device_id: id,
            state: Default::default(),
        }
    }

    pub fn acked(&self) -> u32 {
        self.state.borrow().acked
    }

    /// Payloads the broker acknowledged, oldest first.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.state.borrow().received.clone()
    }

    pub fn push_downlink(&self, msg: &[u8]) {
        let mut d = Downlink::new();
        if d.extend_from_slice(msg).is_ok() {
            self.state.borrow_mut().downlinks.push_back(d);
        }
    }
}

impl PublishPort for SimBroker {
    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn start(&mut self) -> Result<(), PublishError> {
        self.state.borrow_mut().connected = true;
        info!("MQTT(sim): connected");
        Ok(())
    }

    async fn publish(
        &mut self,
        _topic: &str,
        payload: &[u8],
        ack_timeout: Duration,
    ) -> Result<(), PublishError> {
        let attempt = {
            let mut st = self.state.borrow_mut();
            if !st.connected {
                return Err(PublishError::Failed);
            }
            st.publishes += 1;
            st.publishes
        };
        if self.cfg.fail_every > 0 && attempt % self.cfg.fail_every == 0 {
            warn!("MQTT(sim): simulated publish failure (#{})", attempt);
            return Err(PublishError::Failed);
        }
        if self.cfg.ack_latency > ack_timeout {
            sleep(ack_timeout).await;
            return Err(PublishError::Timeout);
        }
        sleep(self.cfg.ack_latency).await;

        let acked = {
            let mut st = self.state.borrow_mut();
            st.acked += 1;
            st.received.push(payload.to_vec());
            st.acked
        };
        if self.cfg.terminate_after == Some(acked) {
            let mut msg = heapless::String::<64>::new();
            let _ = write!(msg, "{{\"message\": \"terminate {}\"}}", self.device_id);
            self.push_downlink(msg.as_bytes());
        }
        Ok(())
    }

    async fn stop(&mut self) {
        self.state.borrow_mut().connected = false;
        info!("MQTT(sim): stopped");
    }

    fn force_stop(&mut self) {
        self.state.borrow_mut().connected = false;
    }

    fn take_downlink(&mut self) -> Option<Downlink> {
        self.state.borrow_mut().downlinks.pop_front()
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF client
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp_impl::EspMqttTransport;

#[cfg(target_os = "espidf")]
mod esp_impl {
    use std::sync::{Arc, Mutex};

    use esp_idf_svc::mqtt::client::{
        EspMqttClient, EventPayload, MessageId, MqttClientConfiguration, QoS,
    };

    use super::*;

    /// Poll interval while waiting for a broker ack.
    const ACK_POLL: Duration = Duration::from_millis(20);

    #[derive(Default)]
    struct Shared {
        connected: bool,
        acked: heapless::Vec<MessageId, 8>,
        downlinks: heapless::Deque<Downlink, 4>,
    }

    pub struct EspMqttTransport {
        url: heapless::String<96>,
        client_id: heapless::String<24>,
        command_topic: heapless::String<64>,
        client: Option<EspMqttClient<'static>>,
        subscribed: bool,
        shared: Arc<Mutex<Shared>>,
    }

    impl EspMqttTransport {
        pub fn new(url: &str, client_id: &str, command_topic: &str) -> Self {
            let mut u = heapless::String::new();
            let _ = u.push_str(url);
            let mut c = heapless::String::new();
            let _ = c.push_str(client_id);
            let mut t = heapless::String::new();
            let _ = t.push_str(command_topic);
            Self {
                url: u,
                client_id: c,
                command_topic: t,
                client: None,
                subscribed: false,
                shared: Arc::new(Mutex::new(Shared::default())),
            }
        }

        fn with_shared<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> Option<R> {
            self.shared.lock().ok().map(|mut s| f(&mut s))
        }

        fn ensure_subscribed(&mut self) {
            if self.subscribed {
                return;
            }
            if let Some(client) = self.client.as_mut() {
                match client.subscribe(&self.command_topic, QoS::AtMostOnce) {
                    Ok(_) => self.subscribed = true,
                    Err(e) => warn!("MQTT: subscribe to {} failed: {:?}", self.command_topic, e),
                }
            }
        }
    }

    impl PublishPort for EspMqttTransport {
        fn is_connected(&self) -> bool {
            self.client.is_some() && self.with_shared(|s| s.connected).unwrap_or(false)
        }

        fn start(&mut self) -> Result<(), PublishError> {
            if self.client.is_some() {
                return Ok(());
            }
            let conf = MqttClientConfiguration {
                client_id: Some(self.client_id.as_str()),
                ..Default::default()
            };
            let shared = self.shared.clone();
            let client = EspMqttClient::new_cb(self.url.as_str(), &conf, move |event| {
                let Ok(mut s) = shared.lock() else {
                    return;
                };
                match event.payload() {
                    EventPayload::Connected(_) => s.connected = true,
                    EventPayload::Disconnected => s.connected = false,
                    EventPayload::Published(id) => {
                        if s.acked.is_full() {
                            s.acked.remove(0);
                        }
                        let _ = s.acked.push(id);
                    }
                    EventPayload::Received { data, .. } => {
                        let mut d = Downlink::new();
                        if d.extend_from_slice(data).is_ok() {
                            let _ = s.downlinks.push_back(d);
                        }
                    }
                    _ => {}
                }
            })
            .map_err(|e| {
                warn!("MQTT: client start failed: {:?}", e);
                PublishError::StartFailed
            })?;
            self.client = Some(client);
            self.subscribed = false;
            info!("MQTT: client started ({})", self.url);
            Ok(())
        }

        async fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
            ack_timeout: Duration,
        ) -> Result<(), PublishError> {
            self.ensure_subscribed();
            let client = self.client.as_mut().ok_or(PublishError::Failed)?;
            let id = client
                .enqueue(topic, QoS::AtLeastOnce, false, payload)
                .map_err(|_| PublishError::Failed)?;

            let polls = (ack_timeout.as_millis() / ACK_POLL.as_millis()).max(1);
            for _ in 0..polls {
                sleep(ACK_POLL).await;
                let state = self.with_shared(|s| {
                    let acked = s.acked.iter().position(|&a| a == id).map(|i| s.acked.remove(i));
                    (acked.is_some(), s.connected)
                });
                match state {
                    Some((true, _)) => return Ok(()),
                    Some((false, false)) => return Err(PublishError::Failed),
                    _ => {}
                }
            }
            Err(PublishError::Timeout)
        }

        async fn stop(&mut self) {
            // Dropping the client joins the MQTT task.
            self.client = None;
            self.with_shared(|s| s.connected = false);
        }

        fn force_stop(&mut self) {
            self.client = None;
            self.with_shared(|s| s.connected = false);
        }

        fn take_downlink(&mut self) -> Option<Downlink> {
            self.with_shared(|s| s.downlinks.pop_front()).flatten()
        }
    }
}
