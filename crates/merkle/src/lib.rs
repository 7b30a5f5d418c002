//! remu-merkle: Merkle commitment engine for the remu machine emulator.
//!
//! This crate provides:
//! - Keccak-256 hashing primitives and word-level tree hashing
//! - Precomputed pristine (all-zero) subtree hashes
//! - Self-verifying Merkle inclusion proofs
//! - A streaming "back" tree committing to an append-only leaf sequence
//! - A sparse tree over the full physical address space with scoped
//!   update brackets
//!
//! Every tree commits to a power-of-two byte range with a single 32-byte
//! Keccak-256 root hash. Geometry is expressed in log2 terms: a tree covers
//! `2^log2_root_size` bytes, leaves cover `2^log2_leaf_size` bytes, and the
//! atomic hashing unit is a `2^log2_word_size`-byte word.

pub mod back_tree;
pub mod error;
pub mod hash;
pub mod page_tree;
pub mod pristine;
pub mod proof;

pub use back_tree::BackMerkleTree;
pub use error::MerkleError;
pub use hash::{concat_hash, keccak256, tree_hash, Hash, HASH_SIZE, WORD_LOG2_SIZE, WORD_SIZE};
pub use page_tree::PageMerkleTree;
pub use pristine::PristineHashes;
pub use proof::MerkleProof;
