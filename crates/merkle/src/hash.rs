//! Keccak-256 hashing primitives for the machine Merkle trees.
//!
//! All commitments use the pre-standard (Ethereum) Keccak-256 variant:
//! 1600-bit state, 1088-bit rate, 32-byte output.

use tiny_keccak::{Hasher as _, Keccak};

/// A 32-byte Keccak-256 digest. Equality is byte comparison.
pub type Hash = [u8; 32];

/// Size of a hash in bytes.
pub const HASH_SIZE: usize = 32;

/// Log2 of the machine word size, the atomic unit of word-level hashing.
pub const WORD_LOG2_SIZE: u32 = 3;

/// Size of a machine word in bytes.
pub const WORD_SIZE: usize = 1 << WORD_LOG2_SIZE;

/// Hash an arbitrary byte slice.
#[inline]
pub fn keccak256(data: &[u8]) -> Hash {
    let mut keccak = Keccak::v256();
    let mut hash = [0u8; HASH_SIZE];
    keccak.update(data);
    keccak.finalize(&mut hash);
    hash
}

/// Hash the concatenation of two child hashes into their parent hash.
#[inline]
pub fn concat_hash(left: &Hash, right: &Hash) -> Hash {
    let mut keccak = Keccak::v256();
    let mut hash = [0u8; HASH_SIZE];
    keccak.update(left);
    keccak.update(right);
    keccak.finalize(&mut hash);
    hash
}

/// Merkle-hash a power-of-two byte slab down to the 8-byte word level.
///
/// A single word hashes directly; anything larger hashes the concatenation
/// of its two halves' tree hashes.
pub fn tree_hash(data: &[u8]) -> Hash {
    debug_assert!(data.len() >= WORD_SIZE && data.len().is_power_of_two());
    if data.len() == WORD_SIZE {
        keccak256(data)
    } else {
        let (left, right) = data.split_at(data.len() / 2);
        concat_hash(&tree_hash(left), &tree_hash(right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_vectors() {
        let empty = hex::decode("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
            .unwrap();
        assert_eq!(&keccak256(b"")[..], &empty[..]);

        let hello = hex::decode("1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8")
            .unwrap();
        assert_eq!(&keccak256(b"hello")[..], &hello[..]);
    }

    #[test]
    fn test_concat_matches_keccak_of_concatenation() {
        let left = keccak256(b"left");
        let right = keccak256(b"right");
        let mut cat = Vec::with_capacity(2 * HASH_SIZE);
        cat.extend_from_slice(&left);
        cat.extend_from_slice(&right);
        assert_eq!(concat_hash(&left, &right), keccak256(&cat));
    }

    #[test]
    fn test_tree_hash_splits_to_words() {
        let data: Vec<u8> = (0u8..32).collect();
        let w: Vec<Hash> = data.chunks(WORD_SIZE).map(keccak256).collect();
        let expected = concat_hash(&concat_hash(&w[0], &w[1]), &concat_hash(&w[2], &w[3]));
        assert_eq!(tree_hash(&data), expected);
    }

    #[test]
    fn test_tree_hash_single_word() {
        let word = [0xABu8; 8];
        assert_eq!(tree_hash(&word), keccak256(&word));
    }
}
