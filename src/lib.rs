//! tradehook - Trading webhook gateway.
//!
//! Ingests signed alerts from a charting platform, validates and
//! deduplicates them into durable jobs, executes them against cryptocurrency
//! exchanges, and continuously reconciles local state with exchange truth.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── domain/           # Pure domain types
//! ├── port/             # Trait seams (exchange, store, queue, events)
//! ├── application/      # Services: intake, executor, reconciler
//! ├── adapter/
//! │   ├── inbound/      # HTTP ingress + health
//! │   └── outbound/     # SQLite stores, exchange adapters, queue, events
//! └── infrastructure/   # Config, vault, breaker, retry, runtime
//! ```
//!
//! # Features
//!
//! - `testkit` - Scripted exchange adapters and fixtures for tests

pub mod adapter;
pub mod application;
pub mod cli;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
