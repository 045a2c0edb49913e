pub(crate) mod findings;
pub(crate) mod reports;
pub(crate) mod scans;
pub(crate) mod targets;
pub(crate) mod users;

use anyhow::Result;
use hostscan_core::config::DatabaseConfig;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};

pub(crate) async fn initialize_pool(config: &DatabaseConfig) -> Result<Pool<Postgres>> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(false) // Skip pre-acquire health check for lower latency
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Set session-level timeouts to prevent runaway queries and idle transactions
                sqlx::query("SET statement_timeout = '30s'")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("SET idle_in_transaction_session_timeout = '60s'")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await?;
    sqlx::migrate!("src/storage/postgres/migrations")
        .run(&pool)
        .await?;

    Ok(pool)
}
