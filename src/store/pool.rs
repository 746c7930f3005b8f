//! Connection pool construction, mirroring a common `utils::database`
//! module shape (`ArcDbPool`, `get_connection`) usually imported from
//! an SDK dependency — reproduced here directly since this crate has
//! no such SDK dependency.

use std::sync::Arc;
use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::EngineError;

pub type ArcDbPool = Arc<Pool<AsyncPgConnection>>;
pub type DbPoolConnection<'a> = PooledConnection<'a, AsyncPgConnection>;

/// The crate's schema, embedded at compile time. Schema bootstrapping
/// execution is out of scope for this crate (no bootstrap binary is
/// shipped), but the migrations themselves travel with the library so
/// that an embedding application can run them with its own connection,
/// the way `diesel_migrations` is meant to be used outside a CLI.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies any pending migrations using a short-lived synchronous
/// connection (`MigrationHarness` is not `diesel-async`-aware). Exposed
/// for callers that want to bootstrap a fresh database themselves; the
/// engine never calls this on its own.
pub fn run_pending_migrations(database_url: &str) -> Result<(), EngineError> {
    let mut conn = PgConnection::establish(database_url)
        .map_err(|e| EngineError::StoreUnavailable(anyhow::anyhow!(e)))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| EngineError::StoreUnavailable(anyhow::anyhow!(e.to_string())))?;
    Ok(())
}

/// Builds the bb8-backed async connection pool (`diesel-async` +
/// `bb8`). Pool exhaustion surfaces as
/// `EngineError::StoreUnavailable`, safely retriable.
pub async fn new_pool(database_url: &str, max_size: u32) -> Result<ArcDbPool, EngineError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(30))
        .build(manager)
        .await
        .map_err(|e| EngineError::StoreUnavailable(anyhow::anyhow!(e)))?;
    Ok(Arc::new(pool))
}

pub async fn get_connection(pool: &ArcDbPool) -> Result<DbPoolConnection<'_>, EngineError> {
    pool.get()
        .await
        .map_err(|e| EngineError::StoreUnavailable(anyhow::anyhow!(e)))
}
