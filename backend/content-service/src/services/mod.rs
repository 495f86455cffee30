/// Business logic layer.
pub mod posts;

pub use posts::PostService;
