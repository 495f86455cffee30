use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// Derived search document, keyed by the canonical post id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SearchDocument {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Full-text index backend.
///
/// Both operations must be idempotent: deliveries are at-least-once and may
/// arrive out of order relative to the originating mutation.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the document for `doc.post_id`.
    async fn upsert(&self, doc: SearchDocument) -> Result<()>;

    /// Remove the document for `post_id`; absence is not an error.
    async fn delete(&self, post_id: Uuid) -> Result<()>;

    /// Relevance-ranked full-text search over document content.
    async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchDocument>>;
}

/// Postgres full-text search implementation.
#[derive(Clone)]
pub struct PgSearchIndex {
    pool: PgPool,
}

impl PgSearchIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the derived document table when it does not exist yet.
    pub async fn ensure_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_documents (
                post_id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_search_documents_content
            ON search_documents
            USING GIN (to_tsvector('english', content))
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SearchIndex for PgSearchIndex {
    async fn upsert(&self, doc: SearchDocument) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO search_documents (post_id, user_id, content, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (post_id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                content = EXCLUDED.content,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(doc.post_id)
        .bind(doc.user_id)
        .bind(&doc.content)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, post_id: Uuid) -> Result<()> {
        // Zero rows affected is fine: the delete may precede the create.
        sqlx::query("DELETE FROM search_documents WHERE post_id = $1")
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchDocument>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let documents = sqlx::query_as::<_, SearchDocument>(
            r#"
            SELECT post_id, user_id, content, created_at
            FROM search_documents
            WHERE to_tsvector('english', content) @@ plainto_tsquery('english', $1)
            ORDER BY ts_rank(to_tsvector('english', content),
                             plainto_tsquery('english', $1)) DESC,
                     created_at DESC
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(documents)
    }
}
