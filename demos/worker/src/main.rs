use std::error::Error;

use jobscheduler::{policy::PolicyRegistry, Scheduler};
use jobscheduler_redis::RedisBroker;
use jobscheduler_sqlx::PgJobStore;
use tracing_subscriber::EnvFilter;

mod config;

use config::Settings;

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(?settings, "Starting worker");

    let store = PgJobStore::connect(&settings.database_url, settings.max_connections()).await?;
    store.migrate().await?;
    let broker = RedisBroker::from_url(&settings.redis_url, &settings.redis_namespace).await?;

    let handle = Scheduler::new(store, broker)
        .with_policies(PolicyRegistry::default().with_time_quantum(settings.time_quantum))
        .with_engine_config(settings.engine_config())
        .with_pool_config(settings.pool_config())
        .with_default_max_retries(settings.max_retries)
        .spawn()?;

    let status = handle.control().status().await?;
    tracing::info!(
        policy = %status.current_policy,
        queue_depth = status.queue_depth,
        dead_letters = status.dead_letter_count,
        "Worker running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C, waiting for running jobs to finish");
    handle.graceful_shutdown().await?;
    Ok(())
}
