//! Derivative status repository implementation.
//!
//! One row per `(asset_id, kind)`. Status transitions always go through
//! upserts so a regeneration after an earlier failure needs no special case.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use derivo_core::{
    Derivative, DerivativeKind, DerivativeRepository, DerivativeStatus, Error, Result,
};

use crate::jobs::bound_error_text;

/// PostgreSQL implementation of DerivativeRepository.
#[derive(Clone)]
pub struct PgDerivativeRepository {
    pool: Pool<Postgres>,
}

impl PgDerivativeRepository {
    /// Create a new PgDerivativeRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_derivative_row(row: sqlx::postgres::PgRow) -> Result<Derivative> {
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        Ok(Derivative {
            asset_id: row.get("asset_id"),
            kind: DerivativeKind::parse(&kind)?,
            path: row.get("path"),
            status: DerivativeStatus::parse(&status),
            error_text: row.get("error_text"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl DerivativeRepository for PgDerivativeRepository {
    async fn upsert_pending(
        &self,
        asset_id: i64,
        kind: DerivativeKind,
        path: &str,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO derivative (asset_id, kind, path, status, error_text, updated_at)
             VALUES ($1, $2, $3, 'pending', NULL, $4)
             ON CONFLICT (asset_id, kind)
             DO UPDATE SET path = $3, status = 'pending', error_text = NULL, updated_at = $4",
        )
        .bind(asset_id)
        .bind(kind.as_str())
        .bind(path)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn mark_ready(&self, asset_id: i64, kind: DerivativeKind, path: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO derivative (asset_id, kind, path, status, error_text, updated_at)
             VALUES ($1, $2, $3, 'ready', NULL, $4)
             ON CONFLICT (asset_id, kind)
             DO UPDATE SET path = $3, status = 'ready', error_text = NULL, updated_at = $4",
        )
        .bind(asset_id)
        .bind(kind.as_str())
        .bind(path)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            op = "derivative_ready",
            asset_id,
            derivative_kind = %kind,
            "Derivative marked ready"
        );
        Ok(())
    }

    async fn mark_error(
        &self,
        asset_id: i64,
        kind: DerivativeKind,
        error_text: &str,
    ) -> Result<()> {
        let now = Utc::now();
        // Path is preserved if a row already exists; a fresh error row gets
        // an empty path since no artifact was ever published.
        sqlx::query(
            "INSERT INTO derivative (asset_id, kind, path, status, error_text, updated_at)
             VALUES ($1, $2, '', 'error', $3, $4)
             ON CONFLICT (asset_id, kind)
             DO UPDATE SET status = 'error', error_text = $3, updated_at = $4",
        )
        .bind(asset_id)
        .bind(kind.as_str())
        .bind(bound_error_text(error_text))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, asset_id: i64, kind: DerivativeKind) -> Result<Option<Derivative>> {
        let row = sqlx::query(
            "SELECT asset_id, kind, path, status, error_text, updated_at
             FROM derivative WHERE asset_id = $1 AND kind = $2",
        )
        .bind(asset_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_derivative_row).transpose()
    }
}
