//! WiFi station-mode adapter.
//!
//! Implements [`LinkPort`]: the pipeline powers the radio up, selects the
//! provisioned network, polls [`LinkPort::is_up`] under its own timeout and
//! powers the radio down again at teardown.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: non-blocking `EspWifi` driver.
//! - **all other targets**: a simulated station that associates after a
//!   fixed latency, with optional scripted failures.

use core::fmt;
use log::{info, warn};

use crate::app::ports::LinkPort;
use crate::error::LinkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    InvalidSsid,
    InvalidPassword,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    RadioOff,
    Idle,
    Associating,
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), CredentialError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(CredentialError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), CredentialError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(CredentialError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// WiFi link
// ───────────────────────────────────────────────────────────────

pub struct WifiLink {
    state: WifiState,
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    #[cfg(target_os = "espidf")]
    wifi: esp_idf_svc::wifi::EspWifi<'static>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimRadio,
}

#[cfg(not(target_os = "espidf"))]
struct SimRadio {
    latency: std::time::Duration,
    associated_at: Option<std::time::Instant>,
    fail_selects: u32,
}

impl WifiLink {
    #[cfg(target_os = "espidf")]
    pub fn new(wifi: esp_idf_svc::wifi::EspWifi<'static>) -> Self {
        Self {
            state: WifiState::RadioOff,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            wifi,
        }
    }

    /// Simulated station that comes up `latency` after network selection.
    #[cfg(not(target_os = "espidf"))]
    pub fn simulated(latency: std::time::Duration) -> Self {
        Self {
            state: WifiState::RadioOff,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            sim: SimRadio {
                latency,
                associated_at: None,
                fail_selects: 0,
            },
        }
    }

    /// Simulation: reject the next `n` network selections.
    #[cfg(not(target_os = "espidf"))]
    pub fn fail_next_selects(&mut self, n: u32) {
        self.sim.fail_selects = n;
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    pub fn set_credentials(&mut self, ssid: &str, password: &str) -> Result<(), CredentialError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.ssid.clear();
        self.ssid
            .push_str(ssid)
            .map_err(|_| CredentialError::InvalidSsid)?;
        self.password.clear();
        self.password
            .push_str(password)
            .map_err(|_| CredentialError::InvalidPassword)?;
        info!("WiFi: credentials updated (SSID='{}')", self.ssid);
        Ok(())
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_radio(&mut self, on: bool) {
        let result = if on {
            self.wifi.start()
        } else {
            self.wifi.stop()
        };
        if let Err(e) = result {
            warn!("WiFi: radio {} failed: {:?}", if on { "start" } else { "stop" }, e);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_radio(&mut self, on: bool) {
        if !on {
            self.sim.associated_at = None;
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_select(&mut self) -> Result<(), LinkError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        let auth_method = if self.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let client = ClientConfiguration {
            ssid: self
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| LinkError::SelectFailed)?,
            password: self
                .password
                .as_str()
                .try_into()
                .map_err(|_| LinkError::SelectFailed)?,
            auth_method,
            ..Default::default()
        };
        self.wifi
            .set_configuration(&Configuration::Client(client))
            .and_then(|_| self.wifi.connect())
            .map_err(|e| {
                warn!("WiFi: connect request failed: {:?}", e);
                LinkError::SelectFailed
            })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_select(&mut self) -> Result<(), LinkError> {
        if self.sim.fail_selects > 0 {
            self.sim.fail_selects -= 1;
            warn!("WiFi(sim): simulated association failure");
            return Err(LinkError::SelectFailed);
        }
        self.sim.associated_at = Some(std::time::Instant::now());
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_is_up(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_is_up(&self) -> bool {
        self.sim
            .associated_at
            .is_some_and(|t| t.elapsed() >= self.sim.latency)
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi: disconnect failed: {:?}", e);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) {
        self.sim.associated_at = None;
    }
}

// ───────────────────────────────────────────────────────────────
// LinkPort
// ───────────────────────────────────────────────────────────────

impl LinkPort for WifiLink {
    fn radio_enable(&mut self, on: bool) {
        match (on, self.state) {
            (true, WifiState::RadioOff) => {
                self.platform_radio(true);
                self.state = WifiState::Idle;
                info!("WiFi: radio on");
            }
            (false, WifiState::RadioOff) | (true, _) => {}
            (false, _) => {
                self.platform_radio(false);
                self.state = WifiState::RadioOff;
                info!("WiFi: radio off");
            }
        }
    }

    fn select_network(&mut self) -> Result<(), LinkError> {
        if self.ssid.is_empty() || self.state == WifiState::RadioOff {
            return Err(LinkError::SelectFailed);
        }
        info!("WiFi: associating with '{}'", self.ssid);
        self.platform_select()?;
        self.state = WifiState::Associating;
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.state != WifiState::RadioOff && self.platform_is_up()
    }

    fn disconnect(&mut self) {
        if self.state == WifiState::Associating {
            self.platform_disconnect();
            self.state = WifiState::Idle;
            info!("WiFi: disconnected");
        }
    }
}
