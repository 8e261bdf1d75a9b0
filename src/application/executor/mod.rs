//! Job execution: sizing, routing, submission, persistence.

pub mod sizing;
pub mod worker;
