use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical post row. The content service is the source of truth; search
/// documents and media metadata are derived from the events it emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    /// Media assets attached to the post, owned by the media service.
    pub media_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}
