//! metarelay: local event-relay daemon entry point.
//!
//! Logging setup mirrors `forwarder/src/main.rs`: `tracing_subscriber::fmt()`
//! with an `EnvFilter` that falls back to `info` when `RUST_LOG` is unset.

use clap::Parser;
use metarelay::cli::{Cli, CliCommand};
use metarelay::cloud::http::HttpCloudClient;
use metarelay::cloud::CloudClient;
use metarelay::config::MetarelayConfig;
use metarelay::daemon::{run_repo_worker, DaemonContext};
use metarelay::dispatch::Dispatcher;
use metarelay::error::MetarelayError;
use metarelay::handlers::HandlerRegistry;
use metarelay::store::EventStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli).await;
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

async fn run(cli: Cli) -> Result<(), MetarelayError> {
    let config_path = cli.config.unwrap_or_else(metarelay::cli::default_config_path);
    let config = metarelay::config::load_config_from_path(&config_path)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        repos = config.repos.len(),
        handlers = config.handlers.len(),
        "metarelay starting"
    );

    match cli.command {
        CliCommand::Start => run_start(config).await,
        CliCommand::Sync => run_sync(config).await,
        CliCommand::Status => run_status(config).await,
    }
}

async fn build_context(config: &MetarelayConfig) -> Result<DaemonContext, MetarelayError> {
    let store = Arc::new(EventStore::open(&config.db_path)?);
    let cloud: Arc<dyn CloudClient> =
        Arc::new(HttpCloudClient::new(config.cloud.url.clone(), config.cloud.key.clone()));
    let handlers = Arc::new(HandlerRegistry::new(config.handlers.clone()));
    let dispatcher = Arc::new(Dispatcher::new(config.concurrency));
    let cloud_secret: Arc<str> = Arc::from(config.cloud.key.as_str());
    Ok(DaemonContext { store, cloud, handlers, dispatcher, cloud_secret })
}

async fn run_start(config: MetarelayConfig) -> Result<(), MetarelayError> {
    let ctx = build_context(&config).await?;
    let shutdown = CancellationToken::new();

    let mut workers = Vec::with_capacity(config.repos.len());
    for repo in config.repos.clone() {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        workers.push(tokio::spawn(async move {
            run_repo_worker(ctx, repo, shutdown).await;
        }));
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining repo workers");
    shutdown.cancel();

    for worker in workers {
        let _ = worker.await;
    }

    info!("metarelay shut down cleanly");
    Ok(())
}

async fn run_sync(config: MetarelayConfig) -> Result<(), MetarelayError> {
    let ctx = build_context(&config).await?;

    for repo in &config.repos {
        let mut cursor = ctx.store.get_cursor(&repo.name).await?.unwrap_or(0);
        loop {
            let page = ctx
                .cloud
                .fetch_since(&repo.name, cursor, metarelay::cloud::DEFAULT_FETCH_LIMIT)
                .await?;
            if page.is_empty() {
                break;
            }
            for event in page {
                if ctx.store.try_claim(&event).await? {
                    let matches = ctx.handlers.matching(&event);
                    for handler in matches {
                        let record = ctx.dispatcher.dispatch(handler, &event).await;
                        ctx.store.record_dispatch(&record).await?;
                    }
                    ctx.store.set_cursor(&repo.name, event.remote_id).await?;
                }
                cursor = event.remote_id.max(cursor);
            }
        }
        info!(repo = %repo.name, cursor, "sync complete for repo");
    }
    Ok(())
}

async fn run_status(config: MetarelayConfig) -> Result<(), MetarelayError> {
    let store = EventStore::open(&config.db_path)?;
    let cursors = store.list_cursors().await?;
    for (repo, remote_id) in cursors {
        println!("{repo}\t{remote_id}");
    }
    Ok(())
}
