use std::sync::Arc;

use event_bus::{EventBus, Subscription};
use event_schema::{
    PostCreatedEvent, PostDeletedEvent, ROUTING_KEY_POST_CREATED, ROUTING_KEY_POST_DELETED,
};
use tracing::info;

use crate::index::{SearchDocument, SearchIndex};

/// Apply a `post.created` event to the index.
///
/// Upsert semantics make redelivery safe: N deliveries of the same event
/// leave exactly one document for the post id.
pub async fn handle_post_created(
    index: &dyn SearchIndex,
    event: PostCreatedEvent,
) -> anyhow::Result<()> {
    let post_id = event.post_id;
    index
        .upsert(SearchDocument {
            post_id: event.post_id,
            user_id: event.user_id,
            content: event.content,
            created_at: event.created_at,
        })
        .await?;

    info!(%post_id, "search document indexed");
    Ok(())
}

/// Apply a `post.deleted` event to the index.
///
/// Deletes unconditionally; a delete arriving before its create is a no-op.
/// A delayed create after the delete can briefly resurrect the document —
/// tolerated, since the index is rebuildable from the canonical store.
pub async fn handle_post_deleted(
    index: &dyn SearchIndex,
    event: PostDeletedEvent,
) -> anyhow::Result<()> {
    index.delete(event.post_id).await?;

    info!(post_id = %event.post_id, "search document removed");
    Ok(())
}

/// Bind one consumer per routing key and return the subscription handles.
pub async fn spawn_post_consumers(
    bus: &EventBus,
    index: Arc<dyn SearchIndex>,
) -> event_bus::Result<Vec<Subscription>> {
    let created_index = index.clone();
    let created = bus
        .subscribe(ROUTING_KEY_POST_CREATED, move |event: PostCreatedEvent| {
            let index = created_index.clone();
            async move { handle_post_created(index.as_ref(), event).await }
        })
        .await?;

    let deleted_index = index;
    let deleted = bus
        .subscribe(ROUTING_KEY_POST_DELETED, move |event: PostDeletedEvent| {
            let index = deleted_index.clone();
            async move { handle_post_deleted(index.as_ref(), event).await }
        })
        .await?;

    Ok(vec![created, deleted])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// In-memory stand-in for the Postgres index.
    #[derive(Default)]
    struct MemoryIndex {
        documents: Mutex<HashMap<Uuid, SearchDocument>>,
    }

    impl MemoryIndex {
        async fn len(&self) -> usize {
            self.documents.lock().await.len()
        }

        async fn get(&self, post_id: Uuid) -> Option<SearchDocument> {
            self.documents.lock().await.get(&post_id).cloned()
        }
    }

    #[async_trait]
    impl SearchIndex for MemoryIndex {
        async fn upsert(&self, doc: SearchDocument) -> crate::error::Result<()> {
            self.documents.lock().await.insert(doc.post_id, doc);
            Ok(())
        }

        async fn delete(&self, post_id: Uuid) -> crate::error::Result<()> {
            self.documents.lock().await.remove(&post_id);
            Ok(())
        }

        async fn search(&self, query: &str, limit: i64) -> crate::error::Result<Vec<SearchDocument>> {
            let documents = self.documents.lock().await;
            let mut hits: Vec<SearchDocument> = documents
                .values()
                .filter(|doc| doc.content.contains(query))
                .cloned()
                .collect();
            hits.truncate(limit as usize);
            Ok(hits)
        }
    }

    fn created_event(post_id: Uuid) -> PostCreatedEvent {
        PostCreatedEvent {
            post_id,
            user_id: Uuid::new_v4(),
            content: "rust makes fearless concurrency fun".to_string(),
            created_at: Utc::now(),
        }
    }

    fn deleted_event(post_id: Uuid) -> PostDeletedEvent {
        PostDeletedEvent {
            post_id,
            user_id: Uuid::new_v4(),
            media_ids: vec![],
        }
    }

    #[tokio::test]
    async fn test_redelivered_create_indexes_exactly_one_document() {
        let index = MemoryIndex::default();
        let post_id = Uuid::new_v4();
        let event = created_event(post_id);

        for _ in 0..5 {
            handle_post_created(&index, event.clone())
                .await
                .expect("handler");
        }

        assert_eq!(index.len().await, 1);
        assert_eq!(index.get(post_id).await.expect("document").post_id, post_id);
    }

    #[tokio::test]
    async fn test_delete_removes_document_regardless_of_delivery_count() {
        let index = MemoryIndex::default();
        let post_id = Uuid::new_v4();

        handle_post_created(&index, created_event(post_id))
            .await
            .expect("create");

        for _ in 0..3 {
            handle_post_deleted(&index, deleted_event(post_id))
                .await
                .expect("delete");
        }

        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn test_delete_before_create_is_a_no_op() {
        let index = MemoryIndex::default();
        let post_id = Uuid::new_v4();

        handle_post_deleted(&index, deleted_event(post_id))
            .await
            .expect("early delete must not fail");

        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn test_redelivered_create_replaces_content() {
        let index = MemoryIndex::default();
        let post_id = Uuid::new_v4();

        let mut event = created_event(post_id);
        handle_post_created(&index, event.clone())
            .await
            .expect("first delivery");

        event.content = "edited content".to_string();
        handle_post_created(&index, event).await.expect("redelivery");

        assert_eq!(
            index.get(post_id).await.expect("document").content,
            "edited content"
        );
    }
}
