//! Process lifecycle: `starting -> serving -> draining -> stopped`.
//!
//! The listener is bound before serving starts; bind failure is fatal. On
//! the shutdown trigger the server stops accepting and in-flight requests
//! get the configured drain budget. Requests still running when it elapses
//! are abandoned: their connections are closed, which is logged but not an
//! error. Dependent resources are torn down afterwards: background session
//! cleanup and the database pool first, log writers last.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum_server::{Handle, tls_rustls::RustlsConfig};
use sqlx::PgPool;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, TlsConfig};
use crate::keys::KeyError;
use crate::logging::{LogGuards, LoggingError};
use crate::pipeline::PipelineError;

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Serving,
    Draining,
    Stopped,
}

/// How draining ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request completed within the budget.
    Drained,
    /// The budget elapsed and the remaining connections were closed.
    Abandoned,
}

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging setup failed: {0}")]
    Logging(#[from] LoggingError),
    #[error("key material error: {0}")]
    Key(#[from] KeyError),
    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("session store migration failed: {0}")]
    SessionStore(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("server failed: {0}")]
    Server(#[source] io::Error),
}

/// Resources owned for the lifetime of the process.
pub struct Resources {
    pub pool: PgPool,
    /// Periodic deletion of expired session rows.
    pub session_cleanup: Option<JoinHandle<()>>,
    pub logs: Option<LogGuards>,
    pub sentry: Option<sentry::ClientInitGuard>,
}

/// Drives the phase machine and owns the drain budget.
pub struct Lifecycle {
    phase: watch::Sender<Phase>,
    shutdown_timeout: Duration,
}

impl Lifecycle {
    #[must_use]
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Starting);
        Self {
            phase,
            shutdown_timeout,
        }
    }

    /// Observe phase transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn transition(&self, next: Phase) {
        let previous = self.phase.send_replace(next);
        tracing::info!(from = ?previous, to = ?next, "Lifecycle transition");
    }

    /// Bind the plain TCP listener.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Bind` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, StartupError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| StartupError::Bind { addr, source })
    }

    /// Serve plain HTTP on a bound listener until `shutdown` resolves, then
    /// drain.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the listener cannot be handed to the server
    /// or the server stops on its own.
    pub async fn serve<F>(
        &self,
        listener: TcpListener,
        app: Router,
        shutdown: F,
    ) -> io::Result<ShutdownOutcome>
    where
        F: Future<Output = ()> + Send,
    {
        let handle = Handle::new();
        let server = axum_server::from_tcp(listener.into_std()?)?
            .handle(handle.clone())
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        let task = tokio::spawn(server);

        self.transition(Phase::Serving);
        let graceful = handle.clone();
        self.run(
            task,
            shutdown,
            move || graceful.graceful_shutdown(None),
            move || handle.shutdown(),
        )
        .await
    }

    /// Serve HTTPS with in-process TLS until `shutdown` resolves, then drain.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Tls` if the certificate cannot be loaded and
    /// `StartupError::Bind` if the listener cannot be bound.
    pub async fn serve_tls<F>(
        &self,
        addr: SocketAddr,
        tls: &TlsConfig,
        app: Router,
        shutdown: F,
    ) -> Result<io::Result<ShutdownOutcome>, StartupError>
    where
        F: Future<Output = ()> + Send,
    {
        let rustls_config = RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
            .await
            .map_err(|e| StartupError::Tls(e.to_string()))?;

        let handle = Handle::new();
        let server = axum_server::bind_rustls(addr, rustls_config)
            .handle(handle.clone())
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        let task = tokio::spawn(server);

        if handle.listening().await.is_none() {
            let source = match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => io::Error::other("server exited before listening"),
                Err(e) => io::Error::other(e),
            };
            return Err(StartupError::Bind { addr, source });
        }

        self.transition(Phase::Serving);
        let graceful = handle.clone();
        Ok(self
            .run(
                task,
                shutdown,
                move || graceful.graceful_shutdown(None),
                move || handle.shutdown(),
            )
            .await)
    }

    async fn run<F>(
        &self,
        mut task: JoinHandle<io::Result<()>>,
        shutdown: F,
        stop_accepting: impl FnOnce(),
        force_close: impl FnOnce(),
    ) -> io::Result<ShutdownOutcome>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            () = shutdown => {}
            finished = &mut task => {
                self.transition(Phase::Stopped);
                return match finished {
                    Ok(Ok(())) => Err(io::Error::other("server exited without a shutdown signal")),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(io::Error::other(e)),
                };
            }
        }

        self.transition(Phase::Draining);
        stop_accepting();

        let outcome = match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => ShutdownOutcome::Drained,
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "Server error while draining");
                ShutdownOutcome::Drained
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Server task failed while draining");
                ShutdownOutcome::Drained
            }
            Err(_) => {
                force_close();
                task.abort();
                tracing::warn!(
                    budget_ms = u64::try_from(self.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Shutdown budget elapsed; abandoning in-flight requests"
                );
                ShutdownOutcome::Abandoned
            }
        };

        self.transition(Phase::Stopped);
        tracing::info!(outcome = ?outcome, "Server stopped");
        Ok(outcome)
    }

    /// Release resources in dependency order. Best effort, never fails.
    ///
    /// Closing the pool waits for checked-out connections, so it gets the
    /// same budget as draining.
    pub async fn teardown(&self, resources: Resources) {
        let Resources {
            pool,
            session_cleanup,
            logs,
            sentry,
        } = resources;

        if let Some(task) = session_cleanup {
            task.abort();
        }

        if tokio::time::timeout(self.shutdown_timeout, pool.close())
            .await
            .is_ok()
        {
            tracing::info!("Database pool closed");
        } else {
            tracing::warn!("Database pool did not close within the shutdown budget");
        }

        if let Some(sentry) = sentry {
            if !sentry.flush(Some(Duration::from_secs(2))) {
                tracing::warn!("Sentry did not flush before shutdown");
            }
            drop(sentry);
        }

        // Log writers go last so everything above is recorded
        tracing::info!("Flushing log writers");
        drop(logs);
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
