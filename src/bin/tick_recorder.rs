use ctp_tick_relay::api::{self, RecorderMonitor};
use ctp_tick_relay::config::RecorderConfig;
use ctp_tick_relay::database::{establish_connection_pool, MarketDataRepository, ReferenceRepository};
use ctp_tick_relay::persistence::DeadLetterSpool;
use ctp_tick_relay::subscriber::{
    BatchBuffer, LogOnlySink, RecordSink, RecorderService, SubscriberStats, TickSink,
};
use ctp_tick_relay::transport;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ctp_tick_relay=info,tick_recorder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("❌ Recorder failed: {}", e);
        std::process::exit(1);
    }
}

/// Diesel sinks when a database is configured and reachable, log-only otherwise
fn build_sinks(config: &RecorderConfig) -> (Arc<dyn TickSink>, Arc<dyn RecordSink>) {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("⚠️  TIMESCALEDB_URL not set, batches will only be logged");
        return (Arc::new(LogOnlySink), Arc::new(LogOnlySink));
    };

    let database = match establish_connection_pool(url, config.db_pool_size) {
        Ok(database) => database,
        Err(e) => {
            tracing::error!("❌ Failed to establish database connection: {}", e);
            tracing::warn!("⚠️  Recorder will run without database persistence");
            return (Arc::new(LogOnlySink), Arc::new(LogOnlySink));
        }
    };

    match database.run_migrations() {
        Ok(applied) => tracing::info!(applied, "✅ Database migrations up to date"),
        Err(e) => tracing::error!("❌ Migrations failed: {}", e),
    }

    let ticks_db = database.clone();
    let records_db = database;
    (
        Arc::new(MarketDataRepository::new(move || ticks_db.get_conn())),
        Arc::new(ReferenceRepository::new(move || records_db.get_conn())),
    )
}

async fn run() -> Result<(), BoxError> {
    let config = RecorderConfig::from_env()?;
    let (tick_sink, record_sink) = build_sinks(&config);

    let spool = match &config.batch.dead_letter_dir {
        Some(dir) => Some(DeadLetterSpool::open(dir)?),
        None => {
            tracing::warn!("⚠️  DEAD_LETTER_DIR not set, batches that exhaust retries are dropped");
            None
        }
    };

    let stats = Arc::new(SubscriberStats::new());
    let buffer = Arc::new(BatchBuffer::new(&config.batch, tick_sink, spool, Arc::clone(&stats)));

    let subscriber = transport::connect_subscriber(&config.transport, &config.rabbitmq).await?;
    tracing::info!(kind = ?config.transport.kind, endpoint = %config.transport.subscribe_endpoint, "📡 Subscriber connected");

    let mut service = RecorderService::start(subscriber, buffer, record_sink, Arc::clone(&stats))?;

    let monitor = Arc::new(RecorderMonitor::new(stats));
    let api_addr = config.api_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = api::serve(&api_addr, monitor).await {
            tracing::error!("❌ Monitoring API stopped: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Ctrl-C received, shutting down recorder");

    // Joins threads that block on the runtime, so keep it off the async workers
    let report = tokio::task::spawn_blocking(move || service.stop()).await?;
    tracing::info!(
        flushed = report.batch_size,
        persisted = report.persisted,
        pending = report.pending,
        "📊 Final flush complete"
    );
    Ok(())
}
