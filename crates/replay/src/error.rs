//! Replay, logging and codec errors.
//!
//! Replay errors carry the index of the offending access (1-based when the
//! verifier is configured that way) and name the state field involved.
//! Every error is fatal to the current replay or logging session.

use remu_merkle::MerkleError;
use thiserror::Error;

use crate::pma::PmaError;

/// Errors raised while logging or replaying state accesses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("too few accesses in log: access {index} is past its end")]
    TooFewAccesses { index: usize },

    #[error("too many accesses in log: access {index} was never consumed")]
    TooManyAccesses { index: usize },

    #[error("log has no proofs")]
    LogHasNoProofs,

    #[error("log root hash does not match the replay initial root")]
    InitialRootMismatch,

    #[error("invalid access size 2^{log2_size}")]
    InvalidLog2Size { log2_size: u32 },

    #[error("access address {address:#x} is not aligned to 2^{log2_size} bytes")]
    MisalignedAddress { address: u64, log2_size: u32 },

    #[error("expected access {index} to {expected} {what}")]
    UnexpectedAccessType {
        index: usize,
        expected: &'static str,
        what: &'static str,
    },

    #[error("expected access {index} to cover 2^{expected} bytes of {what}")]
    WrongLog2Size {
        index: usize,
        expected: u32,
        what: &'static str,
    },

    #[error("expected access {index} to target {what} at address {address:#x}")]
    WrongAddress {
        index: usize,
        address: u64,
        what: &'static str,
    },

    #[error("expected read data of access {index} to contain 2^{log2_size} bytes")]
    WrongReadLength { index: usize, log2_size: u32 },

    #[error("expected written data of access {index} to contain 2^{log2_size} bytes")]
    WrongWrittenLength { index: usize, log2_size: u32 },

    #[error("access {index} has no proof")]
    MissingProof { index: usize },

    #[error("mismatch between access {index} address and its proof address")]
    ProofAddressMismatch { index: usize },

    #[error("mismatch in access {index} root hash")]
    RootHashMismatch { index: usize },

    #[error("value of {what} in access {index} does not match its target hash")]
    TargetHashMismatch { index: usize, what: &'static str },

    #[error("value of {what} in access {index} fails its proof")]
    ProofMismatch { index: usize, what: &'static str },

    #[error("value written to {what} in access {index} does not match log")]
    WrittenValueMismatch { index: usize, what: &'static str },

    #[error("invalid flags in access {index} to PMA ({source})")]
    InvalidPmaFlags {
        index: usize,
        #[source]
        source: PmaError,
    },

    #[error("too many PMA accesses in access {index}")]
    TooManyPmas { index: usize },

    #[error("no dehash source")]
    NoDehashSource,

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

/// Errors raised while decoding a serialised access log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input while reading {what}")]
    UnexpectedEof { what: &'static str },

    #[error("invalid access type byte {value:#04x}")]
    InvalidAccessType { value: u8 },

    #[error("invalid access log2 size {value}")]
    InvalidLog2Size { value: u8 },

    #[error("invalid proof geometry: target 2^{log2_target_size}, root 2^{log2_root_size}")]
    InvalidProofGeometry {
        log2_target_size: u8,
        log2_root_size: u8,
    },
}
