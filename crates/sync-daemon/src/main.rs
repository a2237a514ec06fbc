//! sync-daemon: headless vault sync agent.
//!
//! Wires the native filesystem, a glob-filtered file watcher, an HTTP+WS
//! transport and a JSON snapshot store into `sync_core::Client`, then drives
//! it from a `tokio::select!` loop exactly the way the plugin's host would.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

use sync_daemon::{FileEventKind, FileSnapshotStore, FileWatcher, HttpTransport, NativeFs};

use sync_core::fs::SafeFsFacade;
use sync_core::{Client, CoreSyncer, FileOps, History, MetadataStore, ResetCoordinator, Scheduler, TextMerge};

#[derive(Parser, Debug)]
#[command(name = "sync-daemon")]
#[command(about = "Vault sync agent")]
struct Args {
    /// Path to the vault directory
    #[arg(short, long)]
    vault: PathBuf,

    /// Base HTTP(S) URI of the remote store, e.g. https://sync.example.com
    #[arg(long)]
    remote_uri: Option<String>,

    /// Bearer token for the remote store
    #[arg(long)]
    token: Option<String>,

    /// WebSocket URI for live update notifications (falls back to polling
    /// `get_all` on `poll_interval_seconds` when omitted)
    #[arg(long)]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting sync-daemon");
    info!(vault = ?args.vault, "vault path");

    let persistence = FileSnapshotStore::new(&args.vault);
    let metadata = Arc::new(MetadataStore::load(persistence).await);
    metadata.spawn_persist_loop();

    let mut settings = metadata.settings().await;
    if let Some(remote_uri) = args.remote_uri {
        settings.remote_uri = remote_uri;
    }
    if let Some(token) = args.token {
        settings.token = token;
    }
    metadata.set_settings(settings.clone()).await;

    if settings.remote_uri.is_empty() {
        anyhow::bail!("no remote URI configured; pass --remote-uri or set it once via the settings API");
    }

    let fs = Arc::new(NativeFs::new(args.vault.clone()));
    let merge = Arc::new(TextMerge::default());
    let transport = Arc::new(HttpTransport::new(
        settings.remote_uri.clone(),
        settings.token.clone(),
        args.listen.clone(),
        Duration::from_secs(settings.poll_interval_seconds),
    ));
    let history = History::new();
    let reset_coordinator = Arc::new(ResetCoordinator::new());

    let syncer_file_ops = FileOps::new(SafeFsFacade::new(Arc::clone(&fs)), Arc::clone(&merge));
    let syncer = Arc::new(CoreSyncer::new(
        syncer_file_ops,
        Arc::clone(&metadata),
        Arc::clone(&transport),
        Arc::clone(&history),
        settings.max_file_size_mb * 1024 * 1024,
    ));

    let scheduler_file_ops = Arc::new(FileOps::new(
        SafeFsFacade::new(Arc::clone(&fs)),
        Arc::clone(&merge),
    ));
    let scheduler = Arc::new(Scheduler::new(
        syncer,
        Arc::clone(&metadata),
        scheduler_file_ops,
        Arc::clone(&fs),
        Arc::clone(&transport),
        Arc::clone(&reset_coordinator),
        settings.sync_concurrency,
        settings.is_sync_enabled,
    ));

    let remote_loop = sync_core::RemoteLoop::new(
        Arc::clone(&scheduler),
        Arc::clone(&metadata),
        Arc::clone(&transport),
        Arc::clone(&reset_coordinator),
    );
    let remote_loop_handle = tokio::spawn(async move {
        remote_loop.run().await;
    });

    let client = Client::new(Arc::clone(&scheduler), Arc::clone(&metadata), Arc::clone(&history));

    let mut watcher = FileWatcher::new(args.vault.clone(), &settings.ignore_patterns)
        .context("failed to start file watcher")?;
    info!("file watcher started");

    client.schedule_offline_reconciliation().await;
    info!("daemon running, press ctrl-c to stop");

    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                match event.kind {
                    FileEventKind::Created => client.local_created(event.path).await,
                    FileEventKind::Modified => client.local_updated(None, event.path).await,
                    FileEventKind::Deleted => client.local_deleted(event.path).await,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    client.stop().await;
    remote_loop_handle.abort();
    debug!("shutting down");
    Ok(())
}
