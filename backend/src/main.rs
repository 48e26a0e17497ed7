use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use backend::{
    config::AppConfig,
    consumption::ConsumptionReconciler,
    db::Db,
    device::repository_sqlx::SqlxDeviceRepository,
    metrics::counters::Counters,
    reconciler::StatusReconciler,
    relay::{CommandSink, SingleSlotRelay},
    request::repository_sqlx::SqlxRequestRepository,
    time::now_ms,
};
use common::logger::{TraceId, init_logger, job_span, tick_span};

/// Status reconciliation loop. Awaiting the tick inside the loop keeps
/// ticks strictly sequential: an overrun delays the next tick, it never
/// runs concurrently with it.
fn start_status_loop(reconciler: Arc<StatusReconciler>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let trace_id = TraceId::default();
            let span = tick_span("status_reconciler", &trace_id);

            if let Err(e) = reconciler.tick(now_ms()).instrument(span).await {
                tracing::error!(error = ?e, "status reconciliation tick failed");
            }
        }
    });
}

/// Consumption loop; same serialization rule, much coarser cadence.
fn start_consumption_loop(reconciler: Arc<ConsumptionReconciler>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let trace_id = TraceId::default();
            let span = tick_span("consumption_reconciler", &trace_id);

            if let Err(e) = reconciler.tick(now_ms()).instrument(span).await {
                tracing::error!(error = ?e, "consumption tick failed");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let cfg = AppConfig::from_env();
    init_logger("valve-sync", cfg.json_logs);

    tracing::info!("starting valve state synchronization service...");

    let db = Db::connect(&cfg.database_url, cfg.db_max_connections).await?;
    db.migrate().instrument(job_span("db_migrate")).await?;

    let requests = Arc::new(SqlxRequestRepository::new(db.pool.as_ref().clone()));
    let devices = Arc::new(SqlxDeviceRepository::new(db.pool.as_ref().clone()));

    // Injected, never a global: field hardware drains this same slot
    // through the surrounding application's polled endpoint.
    let relay: Arc<dyn CommandSink> = Arc::new(SingleSlotRelay::new());

    let counters = Counters::default();

    let status = Arc::new(StatusReconciler::new(
        requests.clone(),
        devices.clone(),
        relay.clone(),
        counters.clone(),
    ));
    let consumption = Arc::new(ConsumptionReconciler::new(
        requests.clone(),
        devices.clone(),
        counters.clone(),
    ));

    start_status_loop(status, Duration::from_millis(cfg.status_tick_ms));
    start_consumption_loop(consumption, Duration::from_millis(cfg.consumption_tick_ms));

    tracing::info!(
        status_tick_ms = cfg.status_tick_ms,
        consumption_tick_ms = cfg.consumption_tick_ms,
        "reconciliation loops running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    Ok(())
}
