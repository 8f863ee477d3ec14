//! musterd: the instance state synchronization daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use muster_core::config::{resolve_config, ConfigOverrides};
use muster_core::{keys, logging};
use muster_daemon::discovery::{Discovery, WorkspaceDiscovery};
use muster_daemon::lock::{self, LockHolder};
use muster_daemon::probes::{LiveProbes, Probes};
use muster_daemon::registry::Engine;
use muster_daemon::store::{CoordStore, RedisStore};
use muster_daemon::worktree::JobOrchestrator;
use muster_daemon::{daemon, error::StoreError};

/// How long to wait for a previous daemon's lock to clear at startup.
const LOCK_WAIT: Duration = Duration::from_secs(120);
const LOCK_RETRY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "musterd",
    version,
    about = "Discovers open workspaces and republishes live status to a shared store"
)]
struct Args {
    /// Config file path (default: ~/.config/muster/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Coordination store URL, overriding the config file.
    #[arg(long = "redis-url")]
    store_url: Option<String>,

    /// Run one reconciliation pass and exit.
    #[arg(long)]
    once: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.verbose {
        0 => logging::init(),
        1 => logging::init_with_level(tracing::Level::DEBUG),
        _ => logging::init_with_level(tracing::Level::TRACE),
    }

    let overrides = ConfigOverrides {
        config_path: args.config,
        store_url: args.store_url,
    };
    let config = Arc::new(resolve_config(&overrides)?);

    let store: Arc<dyn CoordStore> = Arc::new(
        RedisStore::connect(&config.store.url)
            .await
            .with_context(|| format!("failed to connect to store at {}", config.store.url))?,
    );

    // Exactly one daemon per store. A stale lock from a dead process on
    // this host is reclaimed inside acquire; a live holder wins.
    let holder = LockHolder::current();
    let guard = match lock::acquire(
        &store,
        keys::DAEMON_LOCK,
        &holder,
        keys::DAEMON_LOCK_TTL_SECS,
        LOCK_RETRY,
        LOCK_WAIT,
    )
    .await
    {
        Ok(Some(guard)) => guard,
        Ok(None) => bail!("another daemon instance is already running"),
        Err(err @ StoreError::Unavailable { .. }) => {
            return Err(err).context("store became unavailable during lock acquisition");
        }
        Err(err) => return Err(err.into()),
    };

    let cancel = CancellationToken::new();
    let renewal = guard.spawn_renewal(cancel.clone());

    let probes: Arc<dyn Probes> = Arc::new(LiveProbes::new(Arc::clone(&config)));
    let discovery: Arc<dyn Discovery> = Arc::new(WorkspaceDiscovery::new(Arc::clone(&store)));
    let orchestrator = Arc::new(JobOrchestrator::new(
        Arc::clone(&store),
        config.worktree.root.clone(),
    ));

    let mut engine = Engine::new(Arc::clone(&config), Arc::clone(&store), probes, discovery);
    if let Err(err) = engine.restore_from_store().await {
        warn!(error = %err, "could not restore previous snapshot, starting fresh");
    }

    let result = if args.once {
        engine.run_process_scan().await;
        let stats = engine.run_cycle(true).await;
        info!(
            updated = stats.updated,
            removed = stats.removed,
            "single pass complete"
        );
        Ok(())
    } else {
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            signal_cancel.cancel();
        });
        daemon::run(engine, orchestrator, cancel.clone())
            .await
            .map_err(Into::into)
    };

    cancel.cancel();
    renewal.abort();
    guard.release().await;
    result
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
