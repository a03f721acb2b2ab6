//! Asset repository implementation.
//!
//! The `asset` table is populated by an external scanner; the pipeline only
//! reads it to resolve job payloads into source paths.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use derivo_core::{Asset, AssetKind, AssetRepository, Error, Result};

/// PostgreSQL implementation of AssetRepository.
#[derive(Clone)]
pub struct PgAssetRepository {
    pool: Pool<Postgres>,
}

impl PgAssetRepository {
    /// Create a new PgAssetRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_asset_row(row: sqlx::postgres::PgRow) -> Asset {
        let kind: String = row.get("kind");
        Asset {
            id: row.get("id"),
            relative_path: row.get("relative_path"),
            extension: row.get("extension"),
            kind: AssetKind::parse(&kind),
            size_bytes: row.get("size_bytes"),
            modified_at: row.get("modified_at"),
        }
    }
}

#[async_trait]
impl AssetRepository for PgAssetRepository {
    async fn get(&self, asset_id: i64) -> Result<Option<Asset>> {
        let row = sqlx::query(
            "SELECT id, relative_path, extension, kind, size_bytes, modified_at
             FROM asset WHERE id = $1",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_asset_row))
    }
}
