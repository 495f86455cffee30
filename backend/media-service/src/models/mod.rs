use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata record for one stored media object.
///
/// `public_id` is the object-storage key; deleting an asset removes the
/// stored object first, then this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaAsset {
    pub id: Uuid,
    pub user_id: Uuid,
    pub public_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}
