//! Shopfront server binary.
//!
//! # Startup
//!
//! 1. Load and validate configuration (fatal in production if unsafe)
//! 2. Sentry, tracing and log files
//! 3. Signing key, pipeline validation, database pool, migrations, session table
//! 4. Expired-session cleanup in the background
//! 5. Bind, serve until Ctrl+C / SIGTERM, drain, tear down
//!
//! Any startup failure exits nonzero before a listener is bound.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use shopfront::{
    AppState, Lifecycle, PipelineBuilder, ServerConfig, SigningKey, StartupError, build_app, db,
    lifecycle::{Resources, shutdown_signal},
    logging,
    middleware::SESSION_CLEANUP_INTERVAL,
};
use tower_sessions::ExpiredDeletion;
use tower_sessions_sqlx_store::PostgresStore;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            // The subscriber may not be installed yet
            eprintln!("shopfront: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let config = ServerConfig::from_env()?;

    // Initialize Sentry (must be done before tracing subscriber)
    let sentry = logging::init_sentry(&config);
    let logs = logging::init_tracing(&config)?;

    tracing::info!(
        mode = ?config.mode,
        addr = %config.addr,
        secure = config.secure,
        tls_offloaded = config.tls_offloaded,
        trusted_proxies = %config.trusted_proxies,
        read_header_timeout = ?config.timeouts.read_header,
        read_timeout = ?config.timeouts.read,
        write_timeout = ?config.timeouts.write,
        idle_timeout = ?config.timeouts.idle,
        request_timeout = ?config.timeouts.request,
        shutdown_timeout = ?config.timeouts.shutdown,
        "Configuration loaded"
    );

    let key = SigningKey::from_config(&config)?;
    let pipeline = PipelineBuilder::canonical().build()?;

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = PostgresStore::new(pool.clone());
    store
        .migrate()
        .await
        .map_err(|e| StartupError::SessionStore(e.to_string()))?;

    let session_cleanup = tokio::spawn({
        let store = store.clone();
        async move {
            if let Err(e) = store
                .continuously_delete_expired(SESSION_CLEANUP_INTERVAL)
                .await
            {
                tracing::error!(error = %e, "Expired session cleanup stopped");
            }
        }
    });

    let state = AppState::new(config.clone(), pool.clone(), key)?;
    let app = build_app(state, store, &pipeline)?;

    let lifecycle = Lifecycle::new(config.timeouts.shutdown);
    let resources = Resources {
        pool,
        session_cleanup: Some(session_cleanup),
        logs: Some(logs),
        sentry,
    };

    let served = match (&config.tls, config.tls_offloaded) {
        (Some(tls), false) => {
            // Install rustls crypto provider (must be done before any TLS operations)
            let _ = rustls::crypto::ring::default_provider().install_default();
            tracing::info!("shopfront listening on https://{}", config.addr);
            lifecycle
                .serve_tls(config.addr, tls, app, shutdown_signal())
                .await
        }
        _ => match Lifecycle::bind(config.addr).await {
            Ok(listener) => {
                tracing::info!("shopfront listening on http://{}", config.addr);
                Ok(lifecycle.serve(listener, app, shutdown_signal()).await)
            }
            Err(e) => Err(e),
        },
    };

    let result = match served {
        Ok(Ok(_outcome)) => Ok(()),
        Ok(Err(e)) => Err(StartupError::Server(e)),
        Err(e) => Err(e),
    };

    lifecycle.teardown(resources).await;
    result
}
