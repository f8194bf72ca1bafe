//! Batch builder
//!
//! Selects a bounded slice of untransmitted records in creation order and
//! pairs it with a status snapshot. The byte ceiling is a soft cap: the
//! check runs per record added, so a batch may overshoot by at most one
//! record's payload.

use crate::error::Result;
use crate::status::StatusProbe;
use crate::store::QueueStore;
use crate::types::{now_millis, QueuedRecord, StatusSnapshot};

/// Maximum records selected per batch
pub const MAX_BATCH_RECORDS: usize = 64;

/// Soft ceiling on the cumulative serialized payload size of a batch
pub const MAX_BATCH_BYTES: usize = 128 * 1024;

/// One outgoing upload unit
#[derive(Debug)]
pub struct Batch {
    /// Untransmitted records in creation order
    pub records: Vec<QueuedRecord>,
    /// Present iff `records` is non-empty; never sent alone
    pub status: Option<StatusSnapshot>,
    /// Intended-send time, epoch millis; stamped into upload metadata
    pub built_at: i64,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Build the next upload batch from the queue store.
///
/// An empty queue yields an empty batch with no status snapshot: status is
/// only piggybacked on real data.
pub fn build_batch(store: &QueueStore, probe: &dyn StatusProbe) -> Result<Batch> {
    let pending = store.pending_count()?;
    let candidates = store.get_batch(0, MAX_BATCH_RECORDS)?;

    let mut records = Vec::new();
    let mut payload_bytes = 0usize;

    for record in candidates {
        if payload_bytes > MAX_BATCH_BYTES {
            break;
        }
        payload_bytes += serde_json::to_vec(&record.data_point)?.len();
        records.push(record);
    }

    let status = if records.is_empty() {
        None
    } else {
        Some(probe.snapshot(pending))
    };

    if !records.is_empty() {
        tracing::debug!(
            records = records.len(),
            payload_bytes,
            pending,
            "Built upload batch"
        );
    }

    Ok(Batch {
        records,
        status,
        built_at: now_millis(),
    })
}
