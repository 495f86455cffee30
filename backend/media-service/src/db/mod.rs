use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::MediaAsset;

/// Media metadata store.
///
/// Deletes are delete-if-exists so that redelivered cleanup events and
/// partially completed earlier runs converge instead of failing.
#[async_trait]
pub trait MediaRepo: Send + Sync {
    /// Load the metadata rows whose id is in `ids`; unknown ids are simply
    /// absent from the result.
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MediaAsset>>;

    /// Remove one metadata row. Returns `false` when nothing matched.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// All assets uploaded by one user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<MediaAsset>>;
}

/// Postgres-backed metadata store.
#[derive(Clone)]
pub struct PgMediaRepo {
    pool: PgPool,
}

impl PgMediaRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the metadata table when it does not exist yet.
    pub async fn ensure_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS media_assets (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL,
                public_id TEXT NOT NULL,
                original_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_media_assets_user_id ON media_assets (user_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MediaRepo for PgMediaRepo {
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MediaAsset>> {
        let assets = sqlx::query_as::<_, MediaAsset>(
            r#"
            SELECT id, user_id, public_id, original_name, mime_type, url, created_at
            FROM media_assets
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(assets)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM media_assets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<MediaAsset>> {
        let assets = sqlx::query_as::<_, MediaAsset>(
            r#"
            SELECT id, user_id, public_id, original_name, mime_type, url, created_at
            FROM media_assets
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(assets)
    }
}
