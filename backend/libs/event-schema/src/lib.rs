//! Domain event schemas shared across the Pulse services.
//!
//! Every event published to the broker is defined here so that producers and
//! consumers agree on one wire format. Events are self-contained: a consumer
//! must be able to apply an event to its derived store without calling back
//! into the content service.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the topic exchange all services publish to and consume from.
///
/// Declared non-durable: a broker restart drops topology and undelivered
/// messages. Derived stores must be rebuildable from the canonical store.
pub const EXCHANGE_NAME: &str = "pulse.events";

/// Routing key emitted when a post is created.
pub const ROUTING_KEY_POST_CREATED: &str = "post.created";

/// Routing key emitted when a post is deleted.
pub const ROUTING_KEY_POST_DELETED: &str = "post.deleted";

/// Emitted by the content service after a post row is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCreatedEvent {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Emitted by the content service after a post row is deleted.
///
/// Carries the media ids referenced by the post so the media service can
/// clean up stored objects without querying the content service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDeletedEvent {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub media_ids: Vec<Uuid>,
}

/// Discriminated union over all post lifecycle events.
///
/// The variant tag rides along on the wire as `eventType`; consumers that
/// subscribe to a single routing key deserialize the concrete payload type
/// directly and ignore the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum PostEvent {
    PostCreated(PostCreatedEvent),
    PostDeleted(PostDeletedEvent),
}

impl PostEvent {
    /// Routing key this event is published under.
    pub fn routing_key(&self) -> &'static str {
        match self {
            PostEvent::PostCreated(_) => ROUTING_KEY_POST_CREATED,
            PostEvent::PostDeleted(_) => ROUTING_KEY_POST_DELETED,
        }
    }

    /// Id of the post the event refers to.
    pub fn post_id(&self) -> Uuid {
        match self {
            PostEvent::PostCreated(e) => e.post_id,
            PostEvent::PostDeleted(e) => e.post_id,
        }
    }
}

impl From<PostCreatedEvent> for PostEvent {
    fn from(event: PostCreatedEvent) -> Self {
        PostEvent::PostCreated(event)
    }
}

impl From<PostDeletedEvent> for PostEvent {
    fn from(event: PostDeletedEvent) -> Self {
        PostEvent::PostDeleted(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created_event() -> PostCreatedEvent {
        PostCreatedEvent {
            post_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            content: "hello world".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_created_event_uses_camel_case_keys() {
        let event = created_event();
        let value = serde_json::to_value(&event).expect("serialize");

        assert!(value.get("postId").is_some());
        assert!(value.get("userId").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("post_id").is_none());
    }

    #[test]
    fn test_deleted_event_round_trip() {
        let event = PostDeletedEvent {
            post_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            media_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        };

        let json = serde_json::to_string(&event).expect("serialize");
        let decoded: PostDeletedEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        // userId is absent; deserialization must fail rather than default it.
        let json = r#"{"postId":"550e8400-e29b-41d4-a716-446655440000","content":"x","createdAt":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<PostCreatedEvent>(json).is_err());
    }

    #[test]
    fn test_tagged_union_round_trip() {
        let event = PostEvent::from(created_event());
        let json = serde_json::to_string(&event).expect("serialize");

        assert!(json.contains(r#""eventType":"postCreated""#));

        let decoded: PostEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_routing_keys() {
        let created = PostEvent::from(created_event());
        assert_eq!(created.routing_key(), ROUTING_KEY_POST_CREATED);

        let deleted = PostEvent::PostDeleted(PostDeletedEvent {
            post_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            media_ids: vec![],
        });
        assert_eq!(deleted.routing_key(), ROUTING_KEY_POST_DELETED);
    }

    #[test]
    fn test_concrete_payload_parses_tagged_wire_form() {
        // A consumer bound to post.created deserializes the concrete type and
        // ignores the union tag.
        let event = PostEvent::from(created_event());
        let json = serde_json::to_string(&event).expect("serialize");

        let decoded: PostCreatedEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(PostEvent::from(decoded), event);
    }
}
