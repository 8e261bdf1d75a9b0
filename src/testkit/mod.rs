//! Test doubles and fixtures, available under the `testkit` feature.

pub mod exchange;
pub mod fixtures;
