//! SQLite implementations of the persistence ports.

pub mod account_store;
pub mod database;
pub mod job_store;
pub mod order_store;
pub mod pnl_store;
pub mod position_store;
pub mod trade_store;
pub mod webhook_store;
