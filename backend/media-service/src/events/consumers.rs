use std::sync::Arc;

use event_bus::{EventBus, Subscription};
use event_schema::{PostDeletedEvent, ROUTING_KEY_POST_DELETED};
use tracing::info;

use crate::db::MediaRepo;
use crate::storage::ObjectStorage;

/// Apply a `post.deleted` event: delete every stored object referenced by
/// the post, then remove its metadata record.
///
/// Tolerates ids with no metadata (skipped), partial prior deletion (object
/// deletes are idempotent, metadata deletes are delete-if-exists) and
/// duplicate delivery. A failure part-way through leaves the remaining
/// assets for the redelivered event to finish.
pub async fn handle_post_deleted(
    repo: &dyn MediaRepo,
    storage: &dyn ObjectStorage,
    event: PostDeletedEvent,
) -> anyhow::Result<()> {
    if event.media_ids.is_empty() {
        return Ok(());
    }

    let assets = repo.find_by_ids(&event.media_ids).await?;

    for asset in &assets {
        storage.delete_object(&asset.public_id).await?;
        repo.delete(asset.id).await?;
        info!(media_id = %asset.id, "media asset deleted");
    }

    info!(
        post_id = %event.post_id,
        referenced = event.media_ids.len(),
        deleted = assets.len(),
        "processed media cleanup for deleted post"
    );
    Ok(())
}

/// Bind the cleanup consumer and return its subscription handle.
pub async fn spawn_post_deleted_consumer(
    bus: &EventBus,
    repo: Arc<dyn MediaRepo>,
    storage: Arc<dyn ObjectStorage>,
) -> event_bus::Result<Subscription> {
    bus.subscribe(ROUTING_KEY_POST_DELETED, move |event: PostDeletedEvent| {
        let repo = repo.clone();
        let storage = storage.clone();
        async move { handle_post_deleted(repo.as_ref(), storage.as_ref(), event).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MediaError, Result};
    use crate::models::MediaAsset;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeRepo {
        assets: Mutex<HashMap<Uuid, MediaAsset>>,
    }

    impl FakeRepo {
        async fn insert(&self, asset: MediaAsset) {
            self.assets.lock().await.insert(asset.id, asset);
        }

        async fn len(&self) -> usize {
            self.assets.lock().await.len()
        }
    }

    #[async_trait]
    impl MediaRepo for FakeRepo {
        async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MediaAsset>> {
            let assets = self.assets.lock().await;
            Ok(ids.iter().filter_map(|id| assets.get(id).cloned()).collect())
        }

        async fn delete(&self, id: Uuid) -> Result<bool> {
            Ok(self.assets.lock().await.remove(&id).is_some())
        }

        async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<MediaAsset>> {
            let assets = self.assets.lock().await;
            Ok(assets
                .values()
                .filter(|a| a.user_id == user_id)
                .cloned()
                .collect())
        }
    }

    /// Object store fake; deleting a missing key succeeds like S3 does.
    #[derive(Default)]
    struct FakeStorage {
        objects: Mutex<HashSet<String>>,
        fail_next_delete: AtomicBool,
    }

    impl FakeStorage {
        async fn put(&self, public_id: &str) {
            self.objects.lock().await.insert(public_id.to_string());
        }

        async fn contains(&self, public_id: &str) -> bool {
            self.objects.lock().await.contains(public_id)
        }
    }

    #[async_trait]
    impl ObjectStorage for FakeStorage {
        async fn delete_object(&self, public_id: &str) -> Result<()> {
            if self.fail_next_delete.swap(false, Ordering::SeqCst) {
                return Err(MediaError::Storage("store unreachable".to_string()));
            }
            self.objects.lock().await.remove(public_id);
            Ok(())
        }
    }

    fn asset(public_id: &str) -> MediaAsset {
        MediaAsset {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            public_id: public_id.to_string(),
            original_name: format!("{}.jpg", public_id),
            mime_type: "image/jpeg".to_string(),
            url: format!("https://cdn.example.com/{}", public_id),
            created_at: Utc::now(),
        }
    }

    fn deleted_event(media_ids: Vec<Uuid>) -> PostDeletedEvent {
        PostDeletedEvent {
            post_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            media_ids,
        }
    }

    #[tokio::test]
    async fn test_cleanup_removes_objects_and_metadata() {
        let repo = FakeRepo::default();
        let storage = FakeStorage::default();

        let m1 = asset("m1");
        let m2 = asset("m2");
        storage.put(&m1.public_id).await;
        storage.put(&m2.public_id).await;
        let ids = vec![m1.id, m2.id];
        repo.insert(m1).await;
        repo.insert(m2).await;

        handle_post_deleted(&repo, &storage, deleted_event(ids))
            .await
            .expect("handler");

        assert_eq!(repo.len().await, 0);
        assert!(!storage.contains("m1").await);
        assert!(!storage.contains("m2").await);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_converges() {
        let repo = FakeRepo::default();
        let storage = FakeStorage::default();

        let m1 = asset("m1");
        storage.put(&m1.public_id).await;
        let event = deleted_event(vec![m1.id]);
        repo.insert(m1).await;

        for _ in 0..3 {
            handle_post_deleted(&repo, &storage, event.clone())
                .await
                .expect("handler");
        }

        assert_eq!(repo.len().await, 0);
        assert!(!storage.contains("m1").await);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_skipped() {
        let repo = FakeRepo::default();
        let storage = FakeStorage::default();

        handle_post_deleted(&repo, &storage, deleted_event(vec![Uuid::new_v4()]))
            .await
            .expect("unknown id must not fail the handler");
    }

    #[tokio::test]
    async fn test_partial_prior_deletion_is_tolerated() {
        let repo = FakeRepo::default();
        let storage = FakeStorage::default();

        // Object already gone, metadata still present.
        let m1 = asset("m1");
        let ids = vec![m1.id];
        repo.insert(m1).await;

        handle_post_deleted(&repo, &storage, deleted_event(ids))
            .await
            .expect("handler");

        assert_eq!(repo.len().await, 0);
    }

    #[tokio::test]
    async fn test_redelivery_finishes_after_storage_failure() {
        let repo = FakeRepo::default();
        let storage = FakeStorage::default();

        let m1 = asset("m1");
        storage.put(&m1.public_id).await;
        let event = deleted_event(vec![m1.id]);
        repo.insert(m1).await;

        storage.fail_next_delete.store(true, Ordering::SeqCst);
        assert!(handle_post_deleted(&repo, &storage, event.clone())
            .await
            .is_err());
        // Nothing acked: metadata survives for the redelivery.
        assert_eq!(repo.len().await, 1);

        handle_post_deleted(&repo, &storage, event)
            .await
            .expect("redelivery");
        assert_eq!(repo.len().await, 0);
        assert!(!storage.contains("m1").await);
    }
}
