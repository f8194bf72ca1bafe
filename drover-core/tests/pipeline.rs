//! Integration tests for the drover pipeline
//!
//! These drive the drain scheduler end to end against a real (in-memory)
//! queue store, a scripted transport, and a fixed status probe: enqueue ->
//! buffer -> store -> batch -> encrypt -> encode -> upload -> commit.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;

use drover_core::config::{ConfigSource, PipelineConfig, SchedulerConfig};
use drover_core::pipeline::codec::{self, TransportPayload, METADATA_KEY};
use drover_core::pipeline::crypto::generate_keypair;
use drover_core::pipeline::{DrainScheduler, Transport};
use drover_core::{
    QueueStore, Result, SchedulerState, StatusProbe, StatusSnapshot, STATUS_GENERATOR_ID,
};

// ============================================
// Scripted collaborators
// ============================================

/// Transport that fails the first `failures` sends, then records bodies.
struct ScriptedTransport {
    failures: Cell<usize>,
    delay: Option<Duration>,
    sent: RefCell<Vec<TransportPayload>>,
}

impl ScriptedTransport {
    fn new(failures: usize) -> Self {
        Self {
            failures: Cell::new(failures),
            delay: None,
            sent: RefCell::new(Vec::new()),
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            failures: Cell::new(0),
            delay: Some(delay),
            sent: RefCell::new(Vec::new()),
        }
    }

    fn request_count(&self) -> usize {
        self.sent.borrow().len()
    }

    fn decoded_batches(&self) -> Vec<Vec<serde_json::Value>> {
        self.sent
            .borrow()
            .iter()
            .map(|body| codec::decode(&body.payload).unwrap())
            .collect()
    }
}

impl Transport for &ScriptedTransport {
    async fn send(&self, _endpoint: &str, body: &TransportPayload) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.failures.get();
        if remaining > 0 {
            self.failures.set(remaining - 1);
            return Err(drover_core::Error::Transport(
                "scripted network failure".to_string(),
            ));
        }
        self.sent.borrow_mut().push(body.clone());
        Ok(())
    }
}

/// Config source that serves `None` for the first `unavailable` fetches.
struct ScriptedConfig {
    unavailable: Cell<usize>,
    config: PipelineConfig,
}

impl ScriptedConfig {
    fn ready(field_key: Option<String>) -> Self {
        Self {
            unavailable: Cell::new(0),
            config: PipelineConfig {
                endpoint: Some("https://pdk.example.com/data/".to_string()),
                identifier: Some("device-test".to_string()),
                field_key,
            },
        }
    }

    fn delayed(unavailable: usize) -> Self {
        let mut source = Self::ready(None);
        source.unavailable = Cell::new(unavailable);
        source
    }
}

impl ConfigSource for &ScriptedConfig {
    async fn fetch(&self) -> Result<Option<PipelineConfig>> {
        let remaining = self.unavailable.get();
        if remaining > 0 {
            self.unavailable.set(remaining - 1);
            return Ok(None);
        }
        Ok(Some(self.config.clone()))
    }
}

struct FixedProbe;

impl StatusProbe for FixedProbe {
    fn snapshot(&self, pending_points: i64) -> StatusSnapshot {
        StatusSnapshot {
            generator_id: STATUS_GENERATOR_ID.to_string(),
            pending_points,
            cpu_info: json!({}),
            display_info: json!({}),
            memory_info: json!({}),
            storage_info: json!({}),
        }
    }
}

fn test_store() -> Arc<QueueStore> {
    let store = QueueStore::open_in_memory().unwrap();
    store.migrate().unwrap();
    Arc::new(store)
}

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_secs: 30,
        config_retry_secs: 1,
        // No debounce in tests: events hit the store on enqueue
        debounce_ms: 0,
        timeout_secs: 5,
    }
}

fn scheduler<'a>(
    store: Arc<QueueStore>,
    transport: &'a ScriptedTransport,
    config: &'a ScriptedConfig,
) -> DrainScheduler<&'a ScriptedTransport, &'a ScriptedConfig> {
    DrainScheduler::new(
        store,
        transport,
        config,
        Box::new(FixedProbe),
        &scheduler_config(),
    )
}

// ============================================
// Delivery semantics
// ============================================

#[tokio::test]
async fn test_at_least_once_delivery_across_transport_failures() {
    let store = test_store();
    let transport = ScriptedTransport::new(2);
    let config = ScriptedConfig::ready(None);
    let sched = scheduler(store.clone(), &transport, &config);

    sched.refresh_config().await;
    for n in 0..3 {
        sched.log_event(&json!({"name": "app-event", "n": n}));
    }

    // Two failing ticks: nothing is committed, nothing is lost
    sched.tick().await;
    sched.tick().await;
    assert_eq!(transport.request_count(), 0);
    assert_eq!(store.pending_count().unwrap(), 3);

    // The succeeding tick delivers every record exactly once
    sched.tick().await;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(store.pending_count().unwrap(), 0);
    assert_eq!(store.record_count().unwrap(), 3);

    let batch = &transport.decoded_batches()[0];
    // 3 records + trailing status snapshot
    assert_eq!(batch.len(), 4);
    for item in &batch[..3] {
        assert_eq!(item["name"], "app-event");
    }
}

#[tokio::test]
async fn test_transmitted_markers_survive_as_final_state() {
    let store = test_store();
    let transport = ScriptedTransport::new(0);
    let config = ScriptedConfig::ready(None);
    let sched = scheduler(store.clone(), &transport, &config);

    sched.refresh_config().await;
    sched.log_event(&json!({"name": "app-event"}));
    sched.tick().await;

    let rows = store.get_batch(0, 10).unwrap();
    assert!(rows.is_empty(), "no record should remain untransmitted");
    assert_eq!(store.record_count().unwrap(), 1);
}

#[tokio::test]
async fn test_empty_queue_sends_nothing() {
    let store = test_store();
    let transport = ScriptedTransport::new(0);
    let config = ScriptedConfig::ready(None);
    let sched = scheduler(store, &transport, &config);

    sched.refresh_config().await;
    sched.tick().await;

    // No batch and no standalone status snapshot
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_tight_redrain_empties_backlog_in_one_tick() {
    let store = test_store();
    let transport = ScriptedTransport::new(0);
    let config = ScriptedConfig::ready(None);
    let sched = scheduler(store.clone(), &transport, &config);

    sched.refresh_config().await;
    // More than one batch worth of records
    for n in 0..100 {
        sched.log_event(&json!({"name": "app-event", "n": n}));
    }

    sched.tick().await;

    // 100 records at 64 per batch: two uploads from a single tick
    assert_eq!(transport.request_count(), 2);
    assert_eq!(store.pending_count().unwrap(), 0);
    assert_eq!(sched.state(), SchedulerState::Idle);

    // Per-device chronological order holds across the two batches
    let batches = transport.decoded_batches();
    assert_eq!(batches[0][0]["n"], 0);
    assert_eq!(batches[1][0]["n"], 64);
}

// ============================================
// Re-entrancy
// ============================================

#[tokio::test]
async fn test_concurrent_tick_is_a_no_op() {
    let store = test_store();
    let transport = ScriptedTransport::with_delay(Duration::from_millis(20));
    let config = ScriptedConfig::ready(None);
    let sched = scheduler(store, &transport, &config);

    sched.refresh_config().await;
    sched.log_event(&json!({"name": "app-event"}));

    // Second tick interleaves while the first is suspended in send
    tokio::join!(sched.tick(), sched.tick());

    assert_eq!(transport.request_count(), 1);
}

// ============================================
// Configuration session
// ============================================

#[tokio::test]
async fn test_awaits_config_then_drains() {
    let store = test_store();
    let transport = ScriptedTransport::new(0);
    let config = ScriptedConfig::delayed(2);
    let sched = scheduler(store.clone(), &transport, &config);

    sched.log_event(&json!({"name": "early-event"}));
    assert_eq!(sched.state(), SchedulerState::AwaitingConfig);

    // Ticks while config is unavailable do not upload
    sched.tick().await;
    sched.tick().await;
    assert_eq!(sched.state(), SchedulerState::AwaitingConfig);
    assert_eq!(transport.request_count(), 0);
    // But ingestion kept working the whole time
    assert_eq!(store.pending_count().unwrap(), 1);

    // Config arrives: next tick transitions, the one after drains
    sched.tick().await;
    assert_eq!(sched.state(), SchedulerState::Idle);
    sched.tick().await;
    assert_eq!(transport.request_count(), 1);
}

// ============================================
// Field encryption through the pipeline
// ============================================

#[tokio::test]
async fn test_no_field_key_uploads_plaintext_unchanged() {
    let store = test_store();
    let transport = ScriptedTransport::new(0);
    let config = ScriptedConfig::ready(None);
    let sched = scheduler(store, &transport, &config);

    sched.refresh_config().await;
    sched.log_event(&json!({"name": "app-event", "note!": "kept as-is"}));
    sched.tick().await;

    let batch = &transport.decoded_batches()[0];
    assert_eq!(batch[0]["note!"], "kept as-is");
    assert!(batch[0].get("note~").is_none());
}

#[tokio::test]
async fn test_field_key_encrypts_marked_fields_in_upload() {
    let (_, server_public) = generate_keypair();
    let encoded_key = BASE64.encode(server_public.as_bytes());

    let store = test_store();
    let transport = ScriptedTransport::new(0);
    let config = ScriptedConfig::ready(Some(encoded_key));
    let sched = scheduler(store.clone(), &transport, &config);

    sched.refresh_config().await;
    sched.log_event(&json!({"name": "app-event", "note!": "confidential"}));
    sched.tick().await;

    let batch = &transport.decoded_batches()[0];
    let record = &batch[0];
    assert!(record.get("note!").is_none());
    let sealed = record["note~"].as_str().unwrap();
    assert!(!sealed.contains("confidential"));

    // The store keeps the plaintext; only the wire copy is sealed
    let row = store.get(1).unwrap().unwrap();
    assert_eq!(row.data_point["note!"], "confidential");
    assert!(row.data_point.get("note~").is_none());
    assert!(row.transmitted > 0);
}

// ============================================
// Status snapshot piggybacking
// ============================================

#[tokio::test]
async fn test_status_snapshot_rides_every_batch() {
    let store = test_store();
    let transport = ScriptedTransport::new(0);
    let config = ScriptedConfig::ready(None);
    let sched = scheduler(store, &transport, &config);

    sched.refresh_config().await;
    for n in 0..70 {
        sched.log_event(&json!({"name": "app-event", "n": n}));
    }
    sched.tick().await;

    for batch in transport.decoded_batches() {
        let last = batch.last().unwrap();
        assert_eq!(last["generatorId"], STATUS_GENERATOR_ID);
        assert!(last["pending_points"].as_i64().unwrap() > 0);
        assert_eq!(
            last[METADATA_KEY]["generator-id"],
            STATUS_GENERATOR_ID
        );
        assert_eq!(last[METADATA_KEY]["source"], "device-test");
    }
}
