//! Concrete exchange adapters and the registry that dispatches by tag.

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod coinbase;
pub mod factory;
pub mod okx;
pub mod rest;

pub use factory::AdapterRegistry;
