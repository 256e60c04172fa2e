//! JSON uplink packet.
//!
//! ```json
//! {"id":"WL-A1B2C3","seq":12,"ts_sync":"2026.10.19 08:15:02 (GMT +00:00) 65321",
//!  "meta":{"ver":"0.3.0","trans":4,"count":0,"mins":1088},
//!  "n":3,"accX":[1,2,3],"accY":[0,0,0],"accZ":[-9,-9,-9],
//!  "ts":[1250,1500,1750],"flash_err":false}
//! ```
//!
//! `ts_sync` appears in every packet once the time-sync snapshot exists;
//! `bat` only when a battery reading is available.

use serde::Serialize;

use crate::batch::Batch;
use crate::error::PublishError;

/// Device health carried alongside the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Meta {
    /// Firmware version.
    pub ver: &'static str,
    /// Transmission cycle number since boot.
    pub trans: u32,
    /// Flash writes that exhausted every attempt.
    pub count: u32,
    /// Uptime in whole minutes.
    pub mins: u32,
}

impl Meta {
    pub fn new(trans: u32, write_faults: u32, uptime_ms: i64) -> Self {
        Self {
            ver: env!("CARGO_PKG_VERSION"),
            trans,
            count: write_faults,
            mins: (uptime_ms.max(0) / 60_000) as u32,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Packet<'a> {
    pub id: &'a str,
    pub seq: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts_sync: Option<&'a str>,
    /// Battery in centivolts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bat: Option<u16>,
    pub meta: Meta,
    pub n: usize,
    #[serde(rename = "accX")]
    pub acc_x: Vec<i16>,
    #[serde(rename = "accY")]
    pub acc_y: Vec<i16>,
    #[serde(rename = "accZ")]
    pub acc_z: Vec<i16>,
    pub ts: Vec<i64>,
    pub flash_err: bool,
}

impl<'a> Packet<'a> {
    pub fn from_batch(
        id: &'a str,
        seq: u32,
        ts_sync: Option<&'a str>,
        bat: Option<u16>,
        meta: Meta,
        batch: &Batch,
    ) -> Self {
        let n = batch.samples.len();
        let mut packet = Self {
            id,
            seq,
            ts_sync,
            bat,
            meta,
            n,
            acc_x: Vec::with_capacity(n),
            acc_y: Vec::with_capacity(n),
            acc_z: Vec::with_capacity(n),
            ts: Vec::with_capacity(n),
            flash_err: batch.flash_error,
        };
        for t in &batch.samples {
            packet.acc_x.push(t.sample.x);
            packet.acc_y.push(t.sample.y);
            packet.acc_z.push(t.sample.z);
            packet.ts.push(t.ts_ms);
        }
        packet
    }

    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(self).map_err(|_| PublishError::Encode)
    }
}

/// Encode `batch` as one uplink message.
pub fn encode(
    id: &str,
    seq: u32,
    ts_sync: Option<&str>,
    bat: Option<u16>,
    meta: Meta,
    batch: &Batch,
) -> Result<Vec<u8>, PublishError> {
    Packet::from_batch(id, seq, ts_sync, bat, meta, batch).to_json()
}
