//! Outbound ports: exchange access, persistence, queueing, events.

pub mod events;
pub mod exchange;
pub mod notifier;
pub mod queue;
pub mod rate_limit;
pub mod store;
