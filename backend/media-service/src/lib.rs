/// Media Service Library
///
/// Owns media asset metadata and cleans up stored objects when the posts
/// referencing them are deleted. Cleanup is driven entirely by
/// `post.deleted` events; the event payload carries every media id so no
/// call back into the content service is needed.
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod storage;

pub use config::Config;
pub use error::{MediaError, Result};
