mod config;
mod error;
mod server;
mod store;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use config::Config;
use server::{Server, admin, redirector};
use store::{DEFAULT_BUCKET, StemStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting stemdirect - stem redirector");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = StemStore::open(&config.db_path, DEFAULT_BUCKET)
        .with_context(|| format!("cannot open stem database {}", config.db_path.display()))?;
    if let Err(e) = store.initialize() {
        warn!(error = %e, "cannot initialize stem database");
    }
    let store = Arc::new(store);

    let redirector = Server::bind(
        "redirector",
        &config.redirector_addr,
        redirector::router(
            Arc::clone(&store),
            config.read_timeout(),
            config.write_timeout(),
        ),
    )
    .await
    .with_context(|| format!("cannot bind redirector to {}", config.redirector_addr))?
    .with_read_timeout(config.read_timeout());
    let admin = Server::bind("admin", &config.admin_addr, admin::router(Arc::clone(&store)))
        .await
        .with_context(|| format!("cannot bind admin interface to {}", config.admin_addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    // Both listeners run until they stop on their own or shutdown is requested
    let (redirector_result, admin_result) = tokio::join!(
        redirector.run(shutdown_rx.clone()),
        admin.run(shutdown_rx)
    );
    if let Err(e) = redirector_result {
        error!(error = %e, "redirector failed");
    }
    if let Err(e) = admin_result {
        error!(error = %e, "admin server failed");
    }

    match Arc::try_unwrap(store) {
        Ok(store) => store.close().context("cannot close stem database")?,
        Err(_) => warn!("stem database still in use at exit, dropping it instead"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
