use chrono::Local;
use ctp_tick_relay::api::{self, RelayMonitor};
use ctp_tick_relay::config::RelayConfig;
use ctp_tick_relay::pipeline::{DistributionLoop, LoopExit, PipelineContext};
use ctp_tick_relay::source::{MarketDataSource, SimulatedSource, SimulatorConfig};
use ctp_tick_relay::transport;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ctp_tick_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("❌ Relay failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = RelayConfig::from_env()?;

    let cutoff = config.session.cutoff(Local::now());
    let (context, ingress, receiver) = PipelineContext::create(&config.queue, cutoff)?;

    // A transport that cannot start is the one fatal condition
    let publisher = transport::connect_publisher(&config.transport, &config.rabbitmq).await?;
    tracing::info!(kind = ?config.transport.kind, endpoint = %config.transport.publish_endpoint, "📡 Publisher ready");

    let distribution = DistributionLoop::new(
        receiver,
        Arc::clone(&context),
        publisher,
        config.distribution.clone(),
    )
    .spawn()?;

    let mut source = SimulatedSource::new(SimulatorConfig::with_env_config());
    let session = Arc::clone(source.session());
    source.subscribe(ingress.into_handler())?;

    let monitor = Arc::new(RelayMonitor::new(Arc::clone(&context), session));
    let api_addr = config.api_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = api::serve(&api_addr, monitor).await {
            tracing::error!("❌ Monitoring API stopped: {}", e);
        }
    });

    tracing::info!(cutoff = ?cutoff, "🚀 Tick relay running");

    let mut loop_task = tokio::task::spawn_blocking(move || distribution.join());
    let joined = tokio::select! {
        joined = &mut loop_task => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("🛑 Ctrl-C received, stopping distribution loop");
            context.request_stop();
            loop_task.await
        }
    };

    source.stop();

    match joined {
        Ok(Ok(LoopExit::CutoffReached)) => tracing::info!("⏰ Session cutoff reached"),
        Ok(Ok(LoopExit::Stopped)) => tracing::info!("Distribution loop stopped"),
        Ok(Err(_)) => tracing::error!("❌ Distribution loop panicked"),
        Err(e) => tracing::error!("❌ Failed to join distribution loop: {}", e),
    }

    let stats = context.snapshot();
    tracing::info!(
        received = stats.ticks_received,
        published = stats.published,
        dropped = stats.dropped,
        overflow_left = stats.overflow_depth,
        "📊 Final pipeline counters"
    );
    Ok(())
}
