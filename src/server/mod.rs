//! HTTP listeners sharing one stem store
//!
//! The redirector and the admin interface are two independent listeners.
//! Each request runs its store access on the blocking pool and relies on
//! the store's own transaction isolation.

pub mod admin;
pub mod redirector;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{ServerResult, StoreResult};

/// One bound HTTP listener
pub struct Server {
    name: &'static str,
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    read_timeout: Option<Duration>,
}

impl Server {
    /// Bind `router` to `addr`
    pub async fn bind(name: &'static str, addr: &str, router: Router) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(server = name, addr = %local_addr, "listener bound");

        Ok(Self {
            name,
            listener,
            local_addr,
            router,
            read_timeout: None,
        })
    }

    /// Close connections that have not delivered complete request headers
    /// within `read_timeout`
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }

    /// Get local listening address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve connections until `shutdown` flips to true, then
    /// wait for in-flight connections to finish
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> ServerResult<()> {
        let name = self.name;
        info!(server = name, addr = %self.local_addr, "{} up", name);

        let mut builder = auto::Builder::new(TokioExecutor::new());
        if let Some(read_timeout) = self.read_timeout {
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(read_timeout);
        }

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(server = name, %peer_addr, "connection accepted");
                        connections.spawn(serve_connection(
                            builder.clone(),
                            stream,
                            peer_addr,
                            self.router.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(server = name, error = %e, "failed to accept connection");
                    }
                },
                _ = wait_for_shutdown(shutdown.clone()) => break,
            }

            // Reap finished connections
            while connections.try_join_next().is_some() {}
        }

        drop(self.listener);
        while connections.join_next().await.is_some() {}

        info!(server = name, "{} down", name);
        Ok(())
    }
}

async fn serve_connection(
    builder: auto::Builder<TokioExecutor>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Router,
    shutdown: watch::Receiver<bool>,
) {
    let conn = builder.serve_connection(TokioIo::new(stream), TowerToHyperService::new(router));
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = wait_for_shutdown(shutdown) => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    match result {
        Ok(()) => debug!(%peer_addr, "connection closed"),
        Err(e) => debug!(%peer_addr, error = %e, "connection ended with error"),
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        // Sender gone means nobody can ask for shutdown any more
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Run a store call on the blocking pool
pub(crate) async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}
