/// Event consumer cleaning up media for deleted posts.
pub mod consumers;

pub use consumers::spawn_post_deleted_consumer;
