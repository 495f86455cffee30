use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Post;

/// Repository over the canonical `posts` table.
#[derive(Clone)]
pub struct PostRepo {
    pool: PgPool,
}

impl PostRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, user_id: Uuid, content: &str, media_ids: &[Uuid]) -> Result<Post> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (user_id, content, media_ids)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, content, media_ids, created_at
            "#,
        )
        .bind(user_id)
        .bind(content)
        .bind(media_ids)
        .fetch_one(&self.pool)
        .await?;

        Ok(post)
    }

    pub async fn find_by_id(&self, post_id: Uuid) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, user_id, content, media_ids, created_at
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(post)
    }

    /// Fetch one page of posts plus the total row count for page math.
    pub async fn list(&self, page: u32, limit: u32) -> Result<(Vec<Post>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * limit as i64;

        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, user_id, content, media_ids, created_at
            FROM posts
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;

        Ok((posts, total.0))
    }

    /// Delete a post owned by `user_id`, returning the deleted row so the
    /// caller can publish its media ids. `None` when nothing matched.
    pub async fn delete(&self, post_id: Uuid, user_id: Uuid) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(
            r#"
            DELETE FROM posts
            WHERE id = $1 AND user_id = $2
            RETURNING id, user_id, content, media_ids, created_at
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(post)
    }
}
