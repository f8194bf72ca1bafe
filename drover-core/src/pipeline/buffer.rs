//! Debounced write buffer
//!
//! Incoming events accumulate in memory and move to the queue store in one
//! transaction once the debounce window has elapsed. This bounds storage
//! write frequency under event bursts; the worst-case loss window on abrupt
//! termination is one debounce interval of buffered events.

use std::time::{Duration, Instant};

use crate::store::QueueStore;
use crate::types::NewRecord;

/// In-memory accumulator feeding the durable queue store
pub struct WriteBuffer {
    pending: Vec<NewRecord>,
    last_flush: Instant,
    debounce: Duration,
}

impl WriteBuffer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: Vec::new(),
            last_flush: Instant::now(),
            debounce,
        }
    }

    /// Accept an event for eventual persistence.
    ///
    /// Fire-and-forget: inputs too malformed to route (empty generator id or
    /// null payload) are dropped silently, and store failures are logged
    /// rather than surfaced. Instrumentation callers never observe errors.
    pub fn enqueue(&mut self, store: &QueueStore, generator_id: &str, data_point: serde_json::Value) {
        if generator_id.is_empty() || data_point.is_null() {
            tracing::trace!("Dropping unroutable event");
            return;
        }

        self.pending.push(NewRecord::new(generator_id, data_point));

        if self.last_flush.elapsed() >= self.debounce {
            self.flush(store);
        }
    }

    /// Move the entire buffer into the store in one transaction.
    ///
    /// A failed batched write falls back to writing each record on its own,
    /// so one bad record cannot sink the rest. Records the store still
    /// refuses stay buffered for the next flush; nothing is dropped.
    pub fn flush(&mut self, store: &QueueStore) {
        if self.pending.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.pending);
        self.last_flush = Instant::now();

        match store.add_all(&batch) {
            Ok(()) => {
                tracing::debug!(records = batch.len(), "Flushed write buffer");
            }
            Err(e) => {
                tracing::warn!(
                    records = batch.len(),
                    error = %e,
                    "Batched flush failed; retrying records individually"
                );
                for record in batch {
                    if let Err(e) = store.add(&record) {
                        tracing::warn!(
                            generator_id = %record.generator_id,
                            error = %e,
                            "Store write failed; record stays buffered"
                        );
                        self.pending.push(record);
                    }
                }
            }
        }
    }

    /// Number of buffered, not-yet-persisted events
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
