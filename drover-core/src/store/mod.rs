//! Durable queue store: SQLite-backed append-and-mark ledger

pub mod repo;
pub mod schema;

pub use repo::QueueStore;
pub use schema::SCHEMA_VERSION;
