//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter     | Implements    | Connects to                     |
//! |-------------|---------------|---------------------------------|
//! | `flash`     | FlashDevice   | Raw data partition / in-memory  |
//! | `mqtt`      | PublishPort   | ESP-MQTT client / sim broker    |
//! | `wifi`      | LinkPort      | ESP-IDF WiFi STA / sim radio    |
//! | `time`      | ClockPort     | ESP32 system timer + SNTP clock |
//! | `nvs`       | ConfigPort    | NVS / in-memory store           |
//! | `sensor`    | SensorPort    | Simulated accelerometer         |
//! | `device_id` | (none)        | Factory MAC                     |
//!
//! The real accelerometer lives in [`crate::drivers::accel`].

pub mod device_id;
pub mod flash;
pub mod mqtt;
pub mod nvs;
pub mod sensor;
pub mod time;
pub mod wifi;
