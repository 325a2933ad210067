//! Pulse webhook notification service.
//!
//! Main entry point for the Pulse server. Initializes all subsystems —
//! database pool, dispatch engine, background queue, retry sweeper, HTTP
//! ingress — and coordinates graceful startup and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use pulse_api::{AppState, Config};
use pulse_core::{storage::Storage, Clock, RealClock};
use pulse_dispatch::{
    DispatchQueue, DispatchStorage, Dispatcher, PostgresDispatchStorage, RetrySweeper,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting Pulse webhook notification service");

    let config = Config::load()?;
    let server_addr = config.server_addr()?;
    info!(
        database_url = %config.database_url_masked(),
        server_addr = %server_addr,
        max_connections = config.database_max_connections,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    run_migrations(&db_pool).await?;
    info!("Database migrations completed");

    // Wire the dispatch core: durable storage is the only shared state, so
    // the sweeper and dispatcher stay correct across restarts and replicas.
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let storage = Arc::new(Storage::new(db_pool.clone()));
    let dispatch_storage: Arc<dyn DispatchStorage> =
        Arc::new(PostgresDispatchStorage::new(storage.clone()));

    let dispatcher =
        Arc::new(Dispatcher::new(dispatch_storage.clone(), config.client_config(), clock.clone())?);

    let queue = DispatchQueue::start((*dispatcher).clone(), config.queue_config());

    let sweeper_token = CancellationToken::new();
    let sweeper = RetrySweeper::new(
        dispatch_storage,
        (*dispatcher).clone(),
        clock.clone(),
        config.sweeper_config(),
        sweeper_token.clone(),
    );
    let sweeper_handle = tokio::spawn(async move { sweeper.run().await });

    let state = AppState::new(storage, dispatcher, clock);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = pulse_api::start_server(state, server_addr).await {
            error!(error = %e, "Server failed");
        }
    });

    info!(addr = %server_addr, "Pulse is ready");

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    // Stop accepting retries and drain accepted dispatch work.
    sweeper_token.cancel();
    queue.shutdown().await;

    if let Err(e) = sweeper_handle.await {
        error!(error = %e, "Sweeper task panicked");
    }

    // Give in-flight requests time to complete.
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(30)) => {
            info!("Shutdown grace period expired");
        }
        _ = server_handle => {
            info!("Server stopped");
        }
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("Pulse shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,pulse=debug,tower_http=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                // Verify connection works
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Runs database migrations.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id UUID NOT NULL,
            url TEXT NOT NULL,
            secret TEXT NOT NULL,
            event_types JSONB NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            last_triggered_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create subscriptions table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_attempts (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            subscription_id UUID NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            response_code INTEGER,
            response_body TEXT,
            next_retry_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create delivery_attempts table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_keys (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id UUID NOT NULL,
            key_hash TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            expires_at TIMESTAMPTZ,
            revoked_at TIMESTAMPTZ,
            last_used_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create api_keys table")?;

    // The sweeper's due-row query: status + next_retry_at drive the claim.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_delivery_attempts_due
        ON delivery_attempts(next_retry_at)
        WHERE status IN ('pending', 'failed') AND next_retry_at IS NOT NULL
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create delivery_attempts due index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_delivery_attempts_subscription
        ON delivery_attempts(subscription_id, created_at DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create delivery_attempts subscription index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_subscriptions_org
        ON subscriptions(org_id, active)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create subscriptions org index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
