use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::metrics::{POST_CACHE_EVENTS, POST_CACHE_INVALIDATIONS};
use crate::models::Post;

/// TTL for single-post entries.
pub const POST_TTL_SECS: u64 = 3600;

/// TTL for paginated listing entries; listings churn faster than items.
pub const LIST_TTL_SECS: u64 = 300;

/// Sweep pattern covering every cached listing page.
const LIST_KEY_PATTERN: &str = "posts:*";

/// One cached page of the post listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPostPage {
    pub posts: Vec<Post>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total_posts: i64,
}

/// Redis-backed read-through cache in front of the canonical post store.
///
/// The cache and the canonical store are not transactional with each other;
/// staleness between a committed write and invalidation completing is
/// accepted and bounded by the TTLs above.
#[derive(Clone)]
pub struct PostCache {
    redis: ConnectionManager,
}

impl PostCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn post_key(post_id: Uuid) -> String {
        format!("post:{}", post_id)
    }

    fn page_key(page: u32, limit: u32) -> String {
        format!("posts:{}:{}", page, limit)
    }

    pub async fn get_post(&self, post_id: Uuid) -> Result<Option<Post>> {
        let key = Self::post_key(post_id);
        match self.read_json::<Post>(&key).await {
            Ok(Some(post)) => {
                debug!(%post_id, "post cache HIT");
                POST_CACHE_EVENTS.with_label_values(&["post", "hit"]).inc();
                Ok(Some(post))
            }
            Ok(None) => {
                debug!(%post_id, "post cache MISS");
                POST_CACHE_EVENTS.with_label_values(&["post", "miss"]).inc();
                Ok(None)
            }
            Err(err) => {
                POST_CACHE_EVENTS.with_label_values(&["post", "error"]).inc();
                Err(err)
            }
        }
    }

    pub async fn cache_post(&self, post: &Post) -> Result<()> {
        let key = Self::post_key(post.id);
        self.write_json(&key, post, POST_TTL_SECS).await
    }

    pub async fn get_page(&self, page: u32, limit: u32) -> Result<Option<CachedPostPage>> {
        let key = Self::page_key(page, limit);
        match self.read_json::<CachedPostPage>(&key).await {
            Ok(Some(cached)) => {
                debug!(page, limit, "listing cache HIT");
                POST_CACHE_EVENTS.with_label_values(&["posts", "hit"]).inc();
                Ok(Some(cached))
            }
            Ok(None) => {
                debug!(page, limit, "listing cache MISS");
                POST_CACHE_EVENTS.with_label_values(&["posts", "miss"]).inc();
                Ok(None)
            }
            Err(err) => {
                POST_CACHE_EVENTS
                    .with_label_values(&["posts", "error"])
                    .inc();
                Err(err)
            }
        }
    }

    pub async fn cache_page(&self, page: u32, limit: u32, cached: &CachedPostPage) -> Result<()> {
        let key = Self::page_key(page, limit);
        self.write_json(&key, cached, LIST_TTL_SECS).await
    }

    /// Invalidate everything keyed to a mutated post.
    ///
    /// Deletes the single-item key, then sweeps every `posts:*` listing key:
    /// an insert or delete shifts every page boundary, so invalidating only
    /// some pages would leave torn listings. Zero matching keys is success.
    pub async fn invalidate_post(&self, post_id: Uuid) -> Result<()> {
        let result = self.invalidate_inner(post_id).await;
        match &result {
            Ok(swept) => {
                POST_CACHE_INVALIDATIONS
                    .with_label_values(&["success"])
                    .inc();
                debug!(%post_id, swept, "post cache invalidated");
            }
            Err(err) => {
                POST_CACHE_INVALIDATIONS.with_label_values(&["error"]).inc();
                warn!(%post_id, error = %err, "post cache invalidation failed");
            }
        }
        result.map(|_| ())
    }

    async fn invalidate_inner(&self, post_id: Uuid) -> Result<usize> {
        let mut conn = self.redis.clone();

        conn.del::<_, ()>(Self::post_key(post_id)).await?;

        // SCAN instead of KEYS so the sweep does not block the cache store.
        let mut swept = 0usize;
        let mut cursor: i64 = 0;
        loop {
            let (next_cursor, keys): (i64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(LIST_KEY_PATTERN)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                swept += keys.len();
                conn.del::<_, ()>(keys).await?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(swept)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.redis.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => serde_json::from_str::<T>(&data).map(Some).map_err(|err| {
                AppError::Cache(format!("cache entry for {} failed to decode: {}", key, err))
            }),
            Ok(None) => Ok(None),
            Err(err) => Err(AppError::Cache(err.to_string())),
        }
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let data = serde_json::to_string(value)?;
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, data, ttl_secs)
            .await
            .map_err(|err| AppError::Cache(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_key_format() {
        let post_id = Uuid::new_v4();
        assert_eq!(PostCache::post_key(post_id), format!("post:{}", post_id));
    }

    #[test]
    fn test_page_key_format() {
        assert_eq!(PostCache::page_key(1, 10), "posts:1:10");
        assert_eq!(PostCache::page_key(3, 25), "posts:3:25");
    }

    #[test]
    fn test_ttls_match_key_namespace() {
        assert_eq!(POST_TTL_SECS, 3600);
        assert_eq!(LIST_TTL_SECS, 300);
    }
}
