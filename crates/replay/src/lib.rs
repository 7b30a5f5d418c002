//! remu-replay: access logging and verifiable replay for the remu machine.
//!
//! This crate provides:
//! - Typed access records and their byte-exact wire codec
//! - The state-access contract shared by live, logging and replay backends
//! - A recording accessor that executes primitives against real state and
//!   logs them with word-level Merkle proofs
//! - The replay verifier, which re-executes a log against a committed root
//!   and derives the post-execution root
//!
//! Given an initial root hash, a final root hash and an access log, a
//! third party can confirm that a machine step was executed correctly
//! without ever seeing the machine's memory.

pub mod access;
pub mod codec;
pub mod dehash;
pub mod error;
pub mod layout;
pub mod machine;
pub mod pma;
pub mod record;
pub mod replay;
pub mod state_access;

pub use access::{Access, AccessLog, AccessType, LogType};
pub use dehash::{DehashSource, DHD_NOT_FOUND};
pub use error::{CodecError, ReplayError};
pub use layout::{Csr, DhdCsr};
pub use machine::{MachineState, PagedMemory};
pub use pma::{MockPmaPool, PmaDeviceId, PmaEntry, PmaError, PmaFlags, PmaKind};
pub use record::LoggingStateAccess;
pub use replay::ReplayStateAccess;
pub use state_access::StateAccess;
