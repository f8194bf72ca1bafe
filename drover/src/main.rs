//! drover - store-and-forward telemetry agent
//!
//! Reads JSON events one per line on stdin (`name` is the generator id),
//! queues them durably, and drains the queue to the configured collection
//! endpoint in the background. On EOF the buffer is flushed and a final
//! drain runs before exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use drover_core::pipeline::DrainScheduler;
use drover_core::{Config, FileConfigSource, HttpTransport, QueueStore, SystemProbe};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        drover_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("drover agent starting up");

    // No data path exists without the store: failure here is fatal
    let store_path = Config::store_path();
    tracing::info!(path = %store_path.display(), "Opening queue store");
    let store = Arc::new(QueueStore::open(&store_path).context("failed to open queue store")?);
    store
        .migrate()
        .context("failed to run queue store migrations")?;

    tracing::info!(
        pending = store.pending_count().unwrap_or(0),
        total = store.record_count().unwrap_or(0),
        "Queue store ready"
    );

    let transport = HttpTransport::new(Duration::from_secs(config.scheduler.timeout_secs))
        .context("failed to create transport")?;
    let scheduler = DrainScheduler::new(
        store,
        transport,
        FileConfigSource::default_path(),
        Box::new(SystemProbe),
        &config.scheduler,
    );

    let run = scheduler.run();
    tokio::pin!(run);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            // run() never completes; polled here so draining proceeds
            // while stdin is quiet
            _ = &mut run => break,
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<serde_json::Value>(line) {
                        Ok(event) => scheduler.log_event(&event),
                        Err(e) => tracing::warn!(error = %e, "Dropping unparseable event line"),
                    }
                }
                None => {
                    tracing::info!("stdin closed, flushing and draining before exit");
                    scheduler.flush();
                    scheduler.tick().await;
                    break;
                }
            },
        }
    }

    tracing::info!("drover agent shutting down");
    Ok(())
}
