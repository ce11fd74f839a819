use batch_enrich::{app_state::AppState, config::AppConfig, db};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting batch-enrich scheduler");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let state = AppState::from_config(&config, db_pool).expect("Failed to initialize services");

    let period = Duration::from_secs(config.scheduler_interval_secs.max(1));
    let mut ticker = interval(period);
    // A slow step should not trigger a burst of catch-up runs.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval_secs = period.as_secs(), "Scheduler ready");

    loop {
        ticker.tick().await;
        run_tick(&state).await;
    }
}

/// Fire one single step for every registered job. Job-level errors are
/// logged and retried on the next tick.
async fn run_tick(state: &AppState) {
    for job in state.engine.registry().iter() {
        match state.engine.run_single_step(&job.name).await {
            Ok(summary) if summary.locked_out => {
                tracing::info!(job = %job.name, "Job locked, will retry next tick");
            }
            Ok(summary) => {
                tracing::debug!(
                    job = %job.name,
                    processed = summary.processed,
                    has_more = summary.has_more,
                    "Scheduled step finished"
                );
            }
            Err(e) => {
                tracing::error!(job = %job.name, error = %e, "Scheduled step failed");
            }
        }
    }
}
