//! Pure domain types.
//!
//! No framework imports here: everything below `port` depends on this layer,
//! nothing in it depends on tokio, reqwest, or diesel.

pub mod account;
pub mod alert;
pub mod job;
pub mod money;
pub mod order;
pub mod pnl;
pub mod position;
pub mod trade;
pub mod webhook;
