#![forbid(unsafe_code)]

use clap::Parser;
use mip_agent::config::{Config, StoreKind};
use mip_agent::protocol::Protocol;
use mip_agent::worker::{CommandComputation, UnconfiguredComputation};
use mip_agent::{
    Computation, Ed25519Signer, JobController, Signer, SystemClock, UuidIds, WorkerPool, http,
};
use mip_storage::{JobStore, MemoryJobStore, SqliteJobStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Arc<dyn JobStore> = match config.store {
        StoreKind::Memory => Arc::new(MemoryJobStore::new(config.max_jobs)),
        StoreKind::Sqlite => Arc::new(SqliteJobStore::open(&config.storage_dir, config.max_jobs)?),
    };

    let signer = Ed25519Signer::load_or_generate(&config.signing_key_path())?;
    info!(
        algorithm = signer.algorithm(),
        public_key = %signer.public_key_hex(),
        "signing key ready"
    );

    let computation: Arc<dyn Computation> = match &config.compute_command {
        Some(program) => Arc::new(CommandComputation::new(
            program.clone(),
            config.compute_args.clone(),
            config.compute_timeout(),
        )),
        None => {
            warn!("no --compute-command configured; reporting unavailable");
            Arc::new(UnconfiguredComputation)
        }
    };
    let pool = Arc::new(WorkerPool::start(config.workers, computation)?);

    let controller = Arc::new(JobController::new(
        store,
        Arc::new(SystemClock),
        Arc::new(UuidIds),
        Arc::new(signer),
        pool.clone(),
        config.lifecycle(),
    ));
    let protocol = Arc::new(
        Protocol::new(Arc::clone(&controller)).with_payment_hook(config.payment_hook_token.clone()),
    );
    if !protocol.payment_hook_enabled() {
        info!("payment hook disabled; set --payment-hook-token to enable it");
    }

    let reaper = config
        .reap_interval()
        .map(|interval| tokio::spawn(reap_periodically(Arc::clone(&controller), interval)));

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %addr,
        store = ?config.store,
        workers = config.workers,
        "{} {} listening",
        mip_agent::SERVICE_NAME,
        mip_agent::SERVICE_VERSION
    );

    let served = http::serve(listener, protocol, shutdown_signal()).await;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    // Lets in-flight computations settle their jobs before exit.
    tokio::task::spawn_blocking(move || pool.shutdown()).await?;
    info!("shut down");
    served?;
    Ok(())
}

async fn reap_periodically(controller: Arc<JobController>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let controller = Arc::clone(&controller);
        let swept = tokio::task::spawn_blocking(move || {
            let now = controller.now_ms();
            controller.reap_expired(now)
        })
        .await;
        match swept {
            Ok(Ok(reaped)) if !reaped.is_empty() => {
                info!(count = reaped.len(), "expired jobs failed");
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => error!(error = %err, "expiry sweep failed"),
            Err(err) => error!(error = %err, "expiry sweep panicked"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for ctrl-c; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
