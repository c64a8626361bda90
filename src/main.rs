use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::mpsc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use superflow_indexer::{
    api::{self, AppState},
    config,
    contracts::{CfaFlowTimestamps, RpcContractProvider},
    indexer,
    prices::HttpPriceSource,
    rpc::RpcClient,
    sources::SystemClock,
    HandleCache, Reconciler, Snapshot, TokenRegistry,
};

/// Events buffered between the indexer and the reconciler
const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Superflow Indexer starting...");

    // Load configuration
    let cfg = config::load()?;
    info!("Loaded config:");
    info!("  RPC URL: {}", cfg.rpc_http_url);
    info!("  Agent: {}", cfg.agent_address);
    info!("  CFA: {}", cfg.cfa_address);
    info!("  App: {:?}", cfg.app_address);
    info!("  Port: {}", cfg.port);
    info!("  Confirmations: {}", cfg.confirmations);
    info!("  Liquidation period: {}s", cfg.liquidation_period_seconds);

    let rpc = RpcClient::new(&cfg.rpc_http_url)?;
    let clock = Arc::new(SystemClock);

    let registry = TokenRegistry::new(
        Arc::new(RpcContractProvider::new(rpc.clone())),
        Arc::new(HandleCache::new()),
    );
    let (reconciler, snapshot_rx) = Reconciler::new(
        cfg.agent_address,
        registry,
        Arc::new(CfaFlowTimestamps::new(rpc.clone(), cfg.cfa_address)),
        clock.clone(),
        Snapshot::default(),
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

    // Spawn reconciler task
    let reconciler = reconciler.with_retry_delay(Duration::from_secs(cfg.poll_interval_secs));
    let reconciler_handle = tokio::spawn(reconciler.run(events_rx));

    // Spawn API task
    let api_handle = tokio::spawn({
        let state = AppState {
            cfg: cfg.clone(),
            snapshot: snapshot_rx,
            prices: Arc::new(HttpPriceSource::new(&cfg.price_api_url)?),
            clock,
        };
        async move { api::serve(state).await }
    });

    // Spawn Indexer task
    let indexer_handle = tokio::spawn({
        let cfg = cfg.clone();
        async move { indexer::run(cfg, rpc, events_tx).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        res = indexer_handle => match res {
            Ok(Ok(_)) => info!("Indexer exited cleanly"),
            Ok(Err(e)) => error!("Indexer error: {:?}", e),
            Err(e) => error!("Indexer task panicked: {:?}", e),
        },
        res = reconciler_handle => if let Err(e) = res {
            error!("Reconciler task panicked: {:?}", e);
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("Superflow Indexer stopped.");
    Ok(())
}
