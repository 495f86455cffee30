use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Publish attempts segmented by routing key and outcome (success/error/timeout).
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "event_bus_published_total",
        "Events published segmented by routing key and outcome",
        &["routing_key", "outcome"]
    )
    .expect("failed to register event_bus_published_total");

    /// Deliveries processed segmented by routing key and outcome
    /// (success/retried/malformed/failed).
    pub static ref EVENTS_CONSUMED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "event_bus_consumed_total",
        "Deliveries processed segmented by routing key and outcome",
        &["routing_key", "outcome"]
    )
    .expect("failed to register event_bus_consumed_total");

    /// Deliveries routed to the dead-letter queue after the retry budget.
    pub static ref EVENTS_DEAD_LETTERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "event_bus_dead_lettered_total",
        "Deliveries dead-lettered segmented by routing key",
        &["routing_key"]
    )
    .expect("failed to register event_bus_dead_lettered_total");
}
