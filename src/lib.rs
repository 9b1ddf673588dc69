//! tframework - Master/slave test coordination framework
//!
//! tframework runs a catalog of test suites either alone (standalone mode) or
//! as one half of a master/slave pair connected over TCP, where both peers run
//! every case they have in common and the slave merges the two outcomes.
//!
//! # Architecture
//!
//! - **Catalog**: Ordered, name-keyed suites and cases resolved against a registry
//! - **Protocol**: Length-prefixed, checksummed handshake frames
//! - **Supervisor**: Process-isolated, deadline-bounded execution of test code
//! - **Coordinators**: Master, slave and standalone state machines
//! - **Output**: Live status updates plus JSON/text reports

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod demo;
pub mod distributed;
pub mod output;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use catalog::{Catalog, Summary, TestStatus};
pub use config::Config;
pub use worker::Supervisor;

/// Result type used throughout tframework
pub type Result<T> = anyhow::Result<T>;
