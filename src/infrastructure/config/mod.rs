//! Configuration loading, validation, and logging setup.

pub mod logging;
pub mod settings;
