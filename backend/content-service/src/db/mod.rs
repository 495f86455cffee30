use sqlx::PgPool;

use crate::error::Result;

pub mod post_repo;

pub use post_repo::PostRepo;

/// Create the canonical post table when it does not exist yet.
pub async fn ensure_content_tables(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            user_id UUID NOT NULL,
            content TEXT NOT NULL,
            media_ids UUID[] NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts (created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
