//! Outbound adapters.

pub mod events;
pub mod exchange;
pub mod queue;
pub mod rate_limit;
pub mod sqlite;
