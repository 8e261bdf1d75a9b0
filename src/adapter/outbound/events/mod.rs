//! Event publisher implementations.

pub mod broadcast;
