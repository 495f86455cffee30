/// Post service - canonical post mutations and cached reads.
///
/// This is the boundary called by the request layer: mutations write the
/// canonical store first, then fan out a domain event and invalidate the
/// cache. Cache failures never fail the triggering request; reads fall back
/// to the canonical store and mutations leave stale entries to expire by TTL.
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CachedPostPage, PostCache};
use crate::db::PostRepo;
use crate::error::{AppError, Result};
use crate::events::PostEventPublisher;
use crate::models::Post;

pub struct PostService {
    repo: PostRepo,
    cache: PostCache,
    publisher: PostEventPublisher,
}

impl PostService {
    pub fn new(repo: PostRepo, cache: PostCache, publisher: PostEventPublisher) -> Self {
        Self {
            repo,
            cache,
            publisher,
        }
    }

    /// Create a post: canonical write, then event, then cache invalidation.
    ///
    /// The write-then-publish ordering is load-bearing: consumers must never
    /// observe an event for a row that has not committed. There is no
    /// two-phase commit between the two steps.
    pub async fn create_post(
        &self,
        user_id: Uuid,
        content: &str,
        media_ids: &[Uuid],
    ) -> Result<Post> {
        let post = self.repo.insert(user_id, content, media_ids).await?;

        self.publisher.post_created(&post).await;
        self.invalidate_cache(post.id).await;

        debug!(post_id = %post.id, %user_id, "post created");
        Ok(post)
    }

    /// Read-through single post lookup.
    pub async fn get_post(&self, post_id: Uuid) -> Result<Option<Post>> {
        match self.cache.get_post(post_id).await {
            Ok(Some(post)) => return Ok(Some(post)),
            Ok(None) => {}
            Err(err) => {
                warn!(%post_id, error = %err, "cache read failed, serving from canonical store");
            }
        }

        let post = self.repo.find_by_id(post_id).await?;

        if let Some(post) = &post {
            if let Err(err) = self.cache.cache_post(post).await {
                debug!(%post_id, error = %err, "post cache set failed");
            }
        }

        Ok(post)
    }

    /// Read-through paginated listing.
    pub async fn list_posts(&self, page: u32, limit: u32) -> Result<CachedPostPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        match self.cache.get_page(page, limit).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(err) => {
                warn!(page, limit, error = %err, "cache read failed, serving from canonical store");
            }
        }

        let (posts, total_posts) = self.repo.list(page, limit).await?;
        let result = CachedPostPage {
            posts,
            current_page: page,
            total_pages: total_pages(total_posts, limit),
            total_posts,
        };

        if let Err(err) = self.cache.cache_page(page, limit, &result).await {
            debug!(page, limit, error = %err, "listing cache set failed");
        }

        Ok(result)
    }

    /// Delete a post owned by `user_id`: canonical delete, then event
    /// (carrying the media ids for cleanup), then cache invalidation.
    pub async fn delete_post(&self, post_id: Uuid, user_id: Uuid) -> Result<Post> {
        let post = self
            .repo
            .delete(post_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("post {}", post_id)))?;

        self.publisher.post_deleted(&post).await;
        self.invalidate_cache(post_id).await;

        debug!(%post_id, %user_id, "post deleted");
        Ok(post)
    }

    /// Best-effort invalidation. On cache store failure the stale entries
    /// remain until their TTL expires; the request itself still succeeds.
    async fn invalidate_cache(&self, post_id: Uuid) {
        if let Err(err) = self.cache.invalidate_post(post_id).await {
            warn!(%post_id, error = %err, "cache invalidation failed, stale entries expire by TTL");
        }
    }
}

fn total_pages(total_posts: i64, limit: u32) -> u32 {
    if total_posts <= 0 {
        return 0;
    }
    ((total_posts + limit as i64 - 1) / limit as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(95, 10), 10);
    }
}
