use market_sync::database::InMemoryBarStore;
use market_sync::datasource::{SimulatedSource, SimulatedSourceConfig};
use market_sync::health::{LogAlertSink, MultiAlertSink};
use market_sync::jobs::HealthCheckJob;
use market_sync::logging::init_tracing;
use market_sync::models::SymbolCatalog;
use market_sync::{
    create_router, AppConfig, AppState, HealthMonitor, MarketCalendar, PipelineRunner, Scheduler,
};
use std::sync::Arc;
use tokio_cron_scheduler::JobScheduler;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);

    if let Err(e) = run(config).await {
        tracing::error!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Arc::new(SymbolCatalog::parse(&config.symbols)?);
    let calendar = Arc::new(MarketCalendar::new(&config.calendar)?);

    tracing::info!(
        "📋 Catalog loaded: {} symbols ({})",
        catalog.len(),
        catalog
            .tier_counts()
            .iter()
            .map(|(tier, n)| format!("{} {}", n, tier.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!(
        "🗓️  Session {}-{} {} (pre-open {} min)",
        config.calendar.open_time,
        config.calendar.close_time,
        calendar.timezone(),
        config.calendar.pre_open_minutes
    );

    // Reference collaborators
    let source = Arc::new(SimulatedSource::new(SimulatedSourceConfig::default()));
    let store = Arc::new(InMemoryBarStore::with_env_config());

    let runner = Arc::new(PipelineRunner::new(
        catalog,
        source,
        store.clone(),
        config.pipeline.clone(),
    )?);

    let scheduler = Arc::new(Scheduler::new(
        runner,
        calendar,
        config.scheduler.clone(),
        config.pipeline.interval(),
    ));

    let alert_sink = MultiAlertSink::new().with_sink(Arc::new(LogAlertSink::new()));
    let monitor = Arc::new(HealthMonitor::new(
        scheduler.clone(),
        Arc::new(alert_sink),
        config.health.clone(),
    ));

    let mut jobs = JobScheduler::new().await?;
    let health_job = HealthCheckJob::new(monitor.clone());
    let baseline = health_job.run_now().await;
    tracing::info!("💓 Baseline health score {:.1}", baseline);
    health_job.register(&jobs).await?;
    jobs.start().await?;
    tracing::info!("⏰ Cron scheduler started");

    scheduler.spawn_driver();

    let app = create_router(AppState {
        scheduler: scheduler.clone(),
        monitor,
        control_timeout: config.server.control_timeout(),
    });

    let addr = config.server.bind_addr.as_str();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("🚀 Market Sync API server running on http://{}", addr);
    tracing::info!("📊 Status: http://{}/api/v1/status", addr);
    tracing::info!("💓 Health: http://{}/api/v1/health", addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("🛑 Shutting down");
    scheduler.shutdown().await;
    if let Err(e) = jobs.shutdown().await {
        tracing::warn!("Cron scheduler shutdown failed: {}", e);
    }

    let stats = store.stats();
    tracing::info!(
        "📦 Bar store: {} bars across {} symbols ({} rows written, {} recompute hints)",
        stats.stored_bars,
        stats.symbols,
        stats.total_rows,
        stats.recompute_hints
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
