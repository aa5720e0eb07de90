use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{self, AppState};

pub struct Server {
    listener: TcpListener,
    state: AppState,
}

impl Server {
    pub fn new(listener: TcpListener, state: AppState) -> Self {
        Self { listener, state }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until `shutdown` resolves, then waits for in-flight
    /// requests and drains the transaction log.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server { listener, state } = self;
        let logger = state.logger.clone();

        axum::serve(listener, api::router(state))
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("server stopped; draining transaction log");
        logger.sync().await?;
        Ok(())
    }

    /// Like [`Server::run_until`], stopping on Ctrl-C, SIGTERM or the first
    /// transaction log failure. A log failure is returned as the error.
    pub async fn run_until_signal(self) -> Result<()> {
        let mut log_errors = self.state.logger.errors();
        let (failed_tx, failed_rx) = tokio::sync::oneshot::channel();

        let shutdown = async move {
            tokio::select! {
                () = shutdown_signal() => {}
                Some(err) = log_errors.next() => {
                    let _ = failed_tx.send(err);
                }
            }
        };

        let served = self.run_until(shutdown).await;
        if let Ok(err) = failed_rx.await {
            return Err(anyhow::Error::new(err).context("transaction log failed while serving"));
        }
        served
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("ctrl-c received; shutting down"),
        () = terminate => info!("SIGTERM received; shutting down"),
    }
}
