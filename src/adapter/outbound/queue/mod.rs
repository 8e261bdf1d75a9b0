//! Queue facade implementations.

pub mod memory;
