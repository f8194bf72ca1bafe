//! Core domain types for drover
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Data point** | One instrumentation event: a generator id plus an arbitrary JSON payload |
//! | **Generator id** | String naming the instrumentation source of a data point |
//! | **Queued record** | A data point persisted in the durable queue store, keyed by record id |
//! | **Transmitted marker** | Epoch-millis timestamp on a record; 0 means undelivered |
//! | **Status snapshot** | Synthetic record describing device/queue health, appended per batch |
//!
//! The queue store is an append-and-mark ledger: records are created by
//! enqueue, mutated exactly once when their transmitted marker is set, and
//! never deleted by this subsystem.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Generator id attached to every status snapshot.
pub const STATUS_GENERATOR_ID: &str = "pdk-system-status";

/// Current epoch time in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A data point waiting to be persisted; no record id yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    /// Source of the data point
    pub generator_id: String,
    /// Arbitrary JSON payload
    pub data_point: serde_json::Value,
    /// Event time, epoch millis (defaults to enqueue time)
    pub date: i64,
    /// Epoch millis of successful upload; 0 = not yet transmitted
    pub transmitted: i64,
}

impl NewRecord {
    /// Build a record from a generator id and payload.
    ///
    /// The event time comes from the payload's `date` field when present,
    /// otherwise from the clock at enqueue time.
    pub fn new(generator_id: &str, data_point: serde_json::Value) -> Self {
        let date = data_point
            .get("date")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(now_millis);
        Self {
            generator_id: generator_id.to_string(),
            data_point,
            date,
            transmitted: 0,
        }
    }
}

/// A persisted data point, as read back from the durable queue store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRecord {
    /// Store-assigned, unique, monotonic
    pub record_id: i64,
    /// Source of the data point
    pub generator_id: String,
    /// Arbitrary JSON payload
    pub data_point: serde_json::Value,
    /// Event time, epoch millis
    pub date: i64,
    /// Epoch millis of successful upload; 0 = not yet transmitted
    pub transmitted: i64,
}

/// Device/system state captured at drain time.
///
/// A snapshot rides along with every non-empty batch; it is never persisted
/// to the queue. `pending_points` is the operational health signal: a
/// growing value means uploads are falling behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(rename = "generatorId")]
    pub generator_id: String,
    /// Untransmitted record count at snapshot time
    pub pending_points: i64,
    #[serde(rename = "cpu-info")]
    pub cpu_info: serde_json::Value,
    #[serde(rename = "display-info")]
    pub display_info: serde_json::Value,
    #[serde(rename = "memory-info")]
    pub memory_info: serde_json::Value,
    #[serde(rename = "storage-info")]
    pub storage_info: serde_json::Value,
}
