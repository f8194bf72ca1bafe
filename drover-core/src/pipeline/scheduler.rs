//! Drain scheduler
//!
//! The control loop of the pipeline: a periodic tick pulls batches from the
//! queue store, encrypts and encodes them, uploads, commits transmitted
//! markers, and repeats until the queue is empty.
//!
//! State machine:
//!
//! ```text
//! AwaitingConfig --(ready config)--> Idle --(tick, queue non-empty)--> Draining
//!       ^                             ^                                   |
//!       |   (1s retry while waiting)  +----(batch empty / send failed)----+
//! ```
//!
//! Execution is single-threaded and cooperative: interleaving happens only
//! at awaits, which is why the re-entrancy guard is a plain `Cell<bool>`.
//! A tick that lands while a drain is in flight observes the flag and
//! returns; it does not queue up.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigSource, SchedulerConfig};
use crate::error::Result;
use crate::status::StatusProbe;
use crate::store::QueueStore;
use crate::types::now_millis;

use super::batch;
use super::buffer::WriteBuffer;
use super::codec;
use super::session::UploadSession;
use super::transport::Transport;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No usable configuration yet; retrying the config source
    AwaitingConfig,
    /// Configured, waiting for the next periodic tick
    Idle,
    /// A drain cycle is in flight
    Draining,
}

/// Periodic, re-entrancy-guarded drain loop.
///
/// Generic over [`Transport`] and [`ConfigSource`] so the drain path is
/// testable with scripted collaborators. All mutation is interior: the
/// scheduler is driven through `&self`, matching the cooperative
/// single-thread execution model.
pub struct DrainScheduler<T: Transport, C: ConfigSource> {
    store: Arc<QueueStore>,
    transport: T,
    config_source: C,
    probe: Box<dyn StatusProbe>,
    tick_interval: Duration,
    config_retry: Duration,

    buffer: RefCell<WriteBuffer>,
    session: RefCell<Option<UploadSession>>,
    state: Cell<SchedulerState>,
    draining: Cell<bool>,
    armed: Cell<bool>,
}

impl<T: Transport, C: ConfigSource> DrainScheduler<T, C> {
    pub fn new(
        store: Arc<QueueStore>,
        transport: T,
        config_source: C,
        probe: Box<dyn StatusProbe>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config_source,
            probe,
            tick_interval: Duration::from_secs(config.tick_secs),
            config_retry: Duration::from_secs(config.config_retry_secs),
            buffer: RefCell::new(WriteBuffer::new(Duration::from_millis(config.debounce_ms))),
            session: RefCell::new(None),
            state: Cell::new(SchedulerState::AwaitingConfig),
            draining: Cell::new(false),
            armed: Cell::new(false),
        }
    }

    /// Current state (for observability and tests)
    pub fn state(&self) -> SchedulerState {
        self.state.get()
    }

    /// Ingest one event: `name` is the generator id, the event object is
    /// the data point. Nameless events are dropped. Fire-and-forget.
    pub fn log_event(&self, event: &serde_json::Value) {
        let name = event
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        self.enqueue(name, event.clone());
    }

    /// Queue a data point under a generator id. Fire-and-forget.
    pub fn enqueue(&self, generator_id: &str, data_point: serde_json::Value) {
        self.buffer
            .borrow_mut()
            .enqueue(&self.store, generator_id, data_point);
    }

    /// Force-flush the write buffer to the store, ignoring the debounce.
    pub fn flush(&self) {
        self.buffer.borrow_mut().flush(&self.store);
    }

    /// One scheduler tick.
    ///
    /// While awaiting configuration, attempts a refresh. Once configured,
    /// starts a drain unless one is already in flight, in which case the
    /// tick is a no-op.
    pub async fn tick(&self) {
        if self.draining.get() {
            tracing::trace!("Tick ignored: drain already in progress");
            return;
        }

        match self.state.get() {
            SchedulerState::AwaitingConfig => {
                self.refresh_config().await;
            }
            SchedulerState::Idle => {
                self.drain().await;
            }
            // Unreachable while the guard holds, kept for state completeness
            SchedulerState::Draining => {}
        }
    }

    /// Run the scheduler until cancelled: retry configuration every
    /// `config_retry` until ready, then tick every `tick_interval`.
    ///
    /// Arming is idempotent: a second call observes the armed flag and
    /// returns, so repeated configuration refreshes never stack tick loops.
    pub async fn run(&self) {
        while self.state.get() == SchedulerState::AwaitingConfig {
            self.refresh_config().await;
            if self.state.get() == SchedulerState::AwaitingConfig {
                tokio::time::sleep(self.config_retry).await;
            }
        }

        if self.armed.replace(true) {
            tracing::debug!("Drain tick already armed");
            return;
        }

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; drain whatever queued
        // up before configuration arrived.
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// Fetch configuration and transition `AwaitingConfig -> Idle` when a
    /// ready configuration produces a session. Missing configuration is an
    /// expected transient state, not an error.
    pub async fn refresh_config(&self) {
        let fetched = self.config_source.fetch().await;
        match fetched {
            Ok(Some(config)) => match UploadSession::from_config(&config) {
                Ok(Some(session)) => {
                    *self.session.borrow_mut() = Some(session);
                    if self.state.get() == SchedulerState::AwaitingConfig {
                        self.state.set(SchedulerState::Idle);
                    }
                }
                Ok(None) => {
                    tracing::debug!("Pipeline configuration incomplete, will retry");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to build upload session");
                }
            },
            Ok(None) => {
                tracing::debug!("Pipeline configuration not yet available, will retry");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Configuration fetch failed, will retry");
            }
        }
    }

    /// Drain until the queue is exhausted or a cycle fails.
    ///
    /// A transport failure commits nothing: the batch's records stay
    /// untransmitted and the next periodic tick retries them, which is the
    /// at-least-once guarantee (and its natural backoff).
    async fn drain(&self) {
        self.draining.set(true);
        self.state.set(SchedulerState::Draining);

        // Move any buffered events into the store so this drain sees them
        self.buffer.borrow_mut().flush(&self.store);

        loop {
            match self.drain_cycle().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Drain cycle failed; retrying on next tick");
                    break;
                }
            }
        }

        self.draining.set(false);
        self.state.set(SchedulerState::Idle);
    }

    /// One drain cycle: build batch, encrypt, encode, upload, commit.
    ///
    /// Returns `Ok(true)` when a batch was delivered (re-drain), `Ok(false)`
    /// when the queue is empty.
    async fn drain_cycle(&self) -> Result<bool> {
        let mut batch = batch::build_batch(&self.store, self.probe.as_ref())?;
        if batch.is_empty() {
            return Ok(false);
        }

        // Take owned copies of session material before any await; RefCell
        // borrows must not be held across suspension points.
        let (endpoint, source, crypto) = {
            let session = self.session.borrow();
            let Some(session) = session.as_ref() else {
                return Ok(false);
            };
            (
                session.endpoint.clone(),
                session.identifier.clone(),
                session.field_crypto(),
            )
        };

        // Encryption happens on the in-memory wire copies only; the ledger
        // row keeps its plaintext payload for audit and replay.
        if let Some(crypto) = &crypto {
            for record in &mut batch.records {
                record.data_point = crypto.encrypt_fields(&record.data_point)?;
            }
        }

        let stamped = codec::stamp(&batch.records, batch.status.as_ref(), &source, batch.built_at)?;
        let body = codec::encode(&stamped)?;

        self.transport.send(&endpoint, &body).await?;

        // Commit the transmitted marker only, strictly sequentially; a
        // partial commit failure leaves the stragglers for the next drain.
        let send_ts = now_millis();
        let mut committed = 0usize;
        for record in &batch.records {
            match self.store.mark_transmitted(record.record_id, send_ts) {
                Ok(()) => committed += 1,
                Err(e) => {
                    tracing::warn!(
                        record_id = record.record_id,
                        error = %e,
                        "Failed to persist transmitted marker"
                    );
                }
            }
        }

        tracing::debug!(
            records = batch.records.len(),
            committed,
            "Batch uploaded"
        );

        Ok(true)
    }
}
