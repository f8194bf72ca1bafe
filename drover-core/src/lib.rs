//! # drover-core
//!
//! Core library for drover - a store-and-forward telemetry pipeline.
//!
//! Application events ("data points") are captured fire-and-forget, durably
//! queued in SQLite, periodically batched under size/time bounds, optionally
//! field-encrypted, gzip + base64 encoded, and POSTed to a collection
//! endpoint with at-least-once delivery under unreliable connectivity.
//!
//! This library provides:
//! - The durable queue store (append-and-mark ledger over SQLite)
//! - The debounced write buffer and bounded batch builder
//! - Marker-convention field encryption and the gzip/base64 transport codec
//! - The periodic, re-entrancy-guarded drain scheduler
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use drover_core::{Config, QueueStore};
//!
//! let config = Config::load().expect("failed to load config");
//! let store = Arc::new(QueueStore::open(&Config::store_path()).expect("failed to open store"));
//! store.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, ConfigSource, FileConfigSource, PipelineConfig};
pub use error::{Error, Result};
pub use pipeline::{DrainScheduler, HttpTransport, SchedulerState, Transport};
pub use status::{StatusProbe, SystemProbe};
pub use store::QueueStore;
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod status;
pub mod store;
pub mod types;
