use core::fmt::Display;

use bazaar_core::Event;

/// Log events whose state change has been persisted.
pub(crate) fn log_committed<E: Event>(aggregate: &'static str, aggregate_id: impl Display, events: &[E]) {
    for event in events {
        tracing::info!(
            aggregate,
            aggregate_id = %aggregate_id,
            event_type = event.event_type(),
            event_version = event.version(),
            occurred_at = %event.occurred_at(),
            "event committed"
        );
    }
}
