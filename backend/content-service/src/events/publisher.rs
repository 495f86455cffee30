use event_bus::EventBus;
use event_schema::{PostCreatedEvent, PostDeletedEvent, PostEvent};
use tracing::{debug, error};

use crate::models::Post;

/// Publishes post lifecycle events after the canonical write commits.
///
/// Exactly one event per mutation, never batched. Publishing is
/// fire-and-forget: a failure is logged and the event dropped — there is no
/// durable outbox, so a crash between commit and publish loses the event and
/// derived stores diverge until rebuilt from the canonical store.
#[derive(Clone)]
pub struct PostEventPublisher {
    bus: EventBus,
}

impl PostEventPublisher {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    pub async fn post_created(&self, post: &Post) {
        self.publish(PostEvent::PostCreated(PostCreatedEvent {
            post_id: post.id,
            user_id: post.user_id,
            content: post.content.clone(),
            created_at: post.created_at,
        }))
        .await;
    }

    pub async fn post_deleted(&self, post: &Post) {
        self.publish(PostEvent::PostDeleted(PostDeletedEvent {
            post_id: post.id,
            user_id: post.user_id,
            media_ids: post.media_ids.clone(),
        }))
        .await;
    }

    async fn publish(&self, event: PostEvent) {
        let routing_key = event.routing_key();
        match self.bus.publish(routing_key, &event).await {
            Ok(()) => {
                debug!(routing_key, post_id = %event.post_id(), "domain event published");
            }
            Err(err) => {
                error!(
                    routing_key,
                    post_id = %event.post_id(),
                    error = %err,
                    "failed to publish domain event, event lost"
                );
            }
        }
    }
}
