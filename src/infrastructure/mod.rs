//! Cross-cutting infrastructure: configuration, vault, resilience
//! primitives, runtime assembly.

pub mod breaker;
pub mod config;
pub mod retry;
pub mod runtime;
pub mod vault;
