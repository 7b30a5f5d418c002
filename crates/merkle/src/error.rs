//! Merkle engine errors.

use thiserror::Error;

/// Errors produced by the Merkle commitment engine.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MerkleError {
    #[error("log2 size {log2_size} is outside [{min}, {max}]")]
    SizeOutOfRange { log2_size: u32, min: u32, max: u32 },

    #[error("address {address:#x} is outside the tree")]
    AddressOutOfRange { address: u64 },

    #[error("address {address:#x} is not aligned to 2^{log2_size} bytes")]
    MisalignedAddress { address: u64, log2_size: u32 },

    #[error("too many leaves")]
    TooManyLeaves,

    #[error("tree is being updated")]
    TreeIsDirty,

    #[error("no update in progress")]
    NotUpdating,
}
