/// Domain event publishing for post mutations.
pub mod publisher;

pub use publisher::PostEventPublisher;
