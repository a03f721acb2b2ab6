//! # derivo-db
//!
//! PostgreSQL database layer for the derivo derivative pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - The durable job queue (`FOR UPDATE SKIP LOCKED` claims, deduplicated
//!   enqueue, exponential backoff, dead-lettering, stale-lock recovery)
//! - Asset inventory lookups
//! - Per-(asset, kind) derivative status records
//!
//! ## Example
//!
//! ```rust,ignore
//! use derivo_db::Database;
//! use derivo_core::{JobPayload, JobRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/derivo").await?;
//!
//!     let queued = db.jobs.enqueue(&JobPayload::ImageThumb { asset_id: 42 }).await?;
//!     if let Some(job_id) = queued {
//!         println!("Queued job {}", job_id);
//!     }
//!     Ok(())
//! }
//! ```
pub mod assets;
pub mod derivatives;
pub mod jobs;
pub mod pool;

#[cfg(test)]
mod tests;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use derivo_core::*;

// Re-export repository implementations
pub use assets::PgAssetRepository;
pub use derivatives::PgDerivativeRepository;
pub use jobs::PgJobRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job queue repository.
    pub jobs: PgJobRepository,
    /// Source asset inventory (read-only from the pipeline's perspective).
    pub assets: PgAssetRepository,
    /// Derivative status repository.
    pub derivatives: PgDerivativeRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobRepository::new(pool.clone()),
            assets: PgAssetRepository::new(pool.clone()),
            derivatives: PgDerivativeRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Connect to test database (for integration tests).
    #[cfg(test)]
    pub async fn connect_test() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| crate::test_fixtures::DEFAULT_TEST_DATABASE_URL.to_string());
        Self::connect(&database_url).await
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
