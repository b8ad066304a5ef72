use chrono::{DateTime, Utc};

/// A domain event emitted by an aggregate.
///
/// Events are immutable facts. Services log them once the state they describe
/// has been persisted.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "cart.items_merged").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
