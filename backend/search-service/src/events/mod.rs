/// Event consumers keeping the search index in sync with the canonical
/// post store.
pub mod consumers;

pub use consumers::spawn_post_consumers;
