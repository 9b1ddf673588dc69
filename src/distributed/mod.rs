//! Master/slave mode implementation
//!
//! Two independently started processes agree, message by message, on which
//! suite and case is being discussed, run each case on both sides and merge the
//! two outcomes.
//!
//! # Architecture
//!
//! - **Master**: Listens for one slave, answers requests, runs cases on demand
//! - **Slave**: Connects to the master, walks its catalog, reconciles verdicts
//! - **Workers**: One per side, executing the test code in isolation
//!
//! # Modules
//!
//! - `protocol`: Frame layout, message types and checksum
//! - `transport`: Reading and writing frames on a byte stream
//! - `master`: Master coordinator
//! - `slave`: Slave coordinator

pub mod master;
pub mod protocol;
pub mod slave;
pub mod transport;

// Re-export key types
pub use protocol::{HandshakeMessage, MessageBody, MessageType, ProtocolError};

pub use master::{MasterCoordinator, MasterState};
pub use slave::{SlaveCoordinator, SlaveState};
