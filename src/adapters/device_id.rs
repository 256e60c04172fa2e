//! Node identity derived from the factory MAC address.
//!
//! Format `<prefix>-XXYYZZ`: the configured prefix and the last three MAC
//! bytes in uppercase hex. Stable across reboots; used as the `id` field of
//! every uplink packet and matched against `terminate <id>` downlinks.

use core::fmt::Write;

pub type DeviceIdString = heapless::String<24>;

pub type MacAddress = [u8; 6];

#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: writes exactly six bytes into `mac`.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: a fixed MAC so logs and tests are reproducible.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0x02, 0x57, 0x4C, 0xA1, 0xB2, 0xC3]
}

pub fn device_id(prefix: &str, mac: &MacAddress) -> DeviceIdString {
    let mut id = DeviceIdString::new();
    let _ = write!(id, "{}-{:02X}{:02X}{:02X}", prefix, mac[3], mac[4], mac[5]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_uses_last_three_bytes() {
        let mac = [0x00, 0x11, 0x22, 0xAA, 0xBB, 0x0C];
        assert_eq!(device_id("WL", &mac).as_str(), "WL-AABB0C");
    }

    #[test]
    fn sim_id_is_stable() {
        assert_eq!(read_mac(), read_mac());
        assert_eq!(device_id("WL", &read_mac()).as_str(), "WL-A1B2C3");
    }
}
