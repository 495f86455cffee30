/// Read-through caching for posts and post listings.
pub mod post_cache;

pub use post_cache::{CachedPostPage, PostCache};
