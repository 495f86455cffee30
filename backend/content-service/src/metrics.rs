use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Post cache reads segmented by key kind (post/posts) and outcome
    /// (hit/miss/error).
    pub static ref POST_CACHE_EVENTS: IntCounterVec = register_int_counter_vec!(
        "post_cache_events_total",
        "Post cache reads segmented by key kind and outcome",
        &["kind", "event"]
    )
    .expect("failed to register post_cache_events_total");

    /// Cache invalidation sweeps segmented by outcome (success/error).
    pub static ref POST_CACHE_INVALIDATIONS: IntCounterVec = register_int_counter_vec!(
        "post_cache_invalidations_total",
        "Cache invalidation sweeps segmented by outcome",
        &["result"]
    )
    .expect("failed to register post_cache_invalidations_total");
}
