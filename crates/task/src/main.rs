use std::time::Duration;

use amp_task::{work_fn, Context, KeyedWorkerPool, PoolConfig, WorkContext, WorkError};
use anyhow::{Context as _, Result};
use rand::Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Number of simulated cell updates to push through the pool
const DEMO_UPDATES: u64 = 24;

/// Distinct cells; several updates share each key
const DEMO_CELLS: u64 = 4;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amp_task=debug,amp_task_demo=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("amp-task-demo starting...");

    let config = PoolConfig::from_env();
    tracing::info!(
        label = %config.label,
        workers = config.worker_count,
        max_attempts = config.max_attempts,
        config = %serde_json::to_string(&config)?,
        "Pool configured"
    );

    let host = Context::root("host");
    let session = host.start_scope("session").context("Failed to open session")?;
    let pool = KeyedWorkerPool::<u64>::from_config(&session, config)
        .context("Failed to start keyed worker pool")?;

    let mut handles = Vec::new();
    for update in 0..DEMO_UPDATES {
        let cell = update % DEMO_CELLS;
        let handle = pool.add(work_fn(cell, move |ctx: WorkContext| async move {
            let latency = Duration::from_millis(rand::thread_rng().gen_range(5..50));
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = ctx.cancelled() => return Err(WorkError::fatal("cancelled")),
            }
            // Roughly one push in four hits a busy peer
            if rand::thread_rng().gen_bool(0.25) {
                return Err(WorkError::retryable("peer busy").with_type("BUSY"));
            }
            tracing::debug!(cell, update, attempt = ctx.attempt(), "Cell pushed");
            Ok(())
        }))?;
        handles.push(handle);
    }

    let results = async {
        let mut completed = 0;
        for handle in handles {
            if handle.await.is_completed() {
                completed += 1;
            }
        }
        completed
    };

    tokio::select! {
        completed = results => {
            tracing::info!(
                completed,
                total = DEMO_UPDATES,
                stats = %serde_json::to_string(&pool.stats())?,
                "All updates settled"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    let outcome = pool.shutdown().await;
    host.close_and_wait().await?;

    tracing::info!(%outcome, "Demo shutdown complete");
    Ok(())
}
