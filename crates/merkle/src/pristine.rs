//! Precomputed hashes of pristine (all-zero) subtrees.
//!
//! Entry `log2_size` holds the hash of a `2^log2_size`-byte subtree whose
//! payload is entirely zero. The table is materialised once per tree
//! geometry and shared by reference afterwards.

use crate::error::MerkleError;
use crate::hash::{concat_hash, keccak256, Hash};

/// Table of pristine subtree hashes for every size between the word and the
/// root of a tree geometry.
#[derive(Clone, Debug)]
pub struct PristineHashes {
    log2_root_size: u32,
    log2_word_size: u32,
    hashes: Vec<Hash>,
}

impl PristineHashes {
    /// Materialise the table for a geometry.
    ///
    /// The word hash is the Keccak-256 of `2^log2_word_size` zero bytes;
    /// every larger size hashes the concatenation of two copies of the size
    /// below it.
    pub fn new(log2_root_size: u32, log2_word_size: u32) -> Result<Self, MerkleError> {
        if log2_root_size > 64 {
            return Err(MerkleError::SizeOutOfRange {
                log2_size: log2_root_size,
                min: 0,
                max: 64,
            });
        }
        if log2_word_size > log2_root_size || log2_word_size > 63 {
            return Err(MerkleError::SizeOutOfRange {
                log2_size: log2_word_size,
                min: 0,
                max: log2_root_size.min(63),
            });
        }
        let mut hashes = Vec::with_capacity((log2_root_size - log2_word_size + 1) as usize);
        let mut hash = keccak256(&vec![0u8; 1usize << log2_word_size]);
        hashes.push(hash);
        for _ in log2_word_size..log2_root_size {
            hash = concat_hash(&hash, &hash);
            hashes.push(hash);
        }
        Ok(Self {
            log2_root_size,
            log2_word_size,
            hashes,
        })
    }

    /// Hash of a pristine subtree covering `2^log2_size` bytes.
    pub fn hash_of(&self, log2_size: u32) -> Result<Hash, MerkleError> {
        if log2_size < self.log2_word_size || log2_size > self.log2_root_size {
            return Err(MerkleError::SizeOutOfRange {
                log2_size,
                min: self.log2_word_size,
                max: self.log2_root_size,
            });
        }
        Ok(self.get(log2_size))
    }

    /// Unchecked lookup for callers that already hold a valid geometry.
    #[inline]
    pub(crate) fn get(&self, log2_size: u32) -> Hash {
        debug_assert!(log2_size >= self.log2_word_size && log2_size <= self.log2_root_size);
        self.hashes[(log2_size - self.log2_word_size) as usize]
    }

    /// Log2 of the tree size this table was built for.
    pub fn log2_root_size(&self) -> u32 {
        self.log2_root_size
    }

    /// Log2 of the word size this table was built for.
    pub fn log2_word_size(&self) -> u32 {
        self.log2_word_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurrence() {
        let pristine = PristineHashes::new(16, 3).unwrap();
        assert_eq!(pristine.hash_of(3).unwrap(), keccak256(&[0u8; 8]));
        for log2 in 3..16 {
            let below = pristine.hash_of(log2).unwrap();
            assert_eq!(
                pristine.hash_of(log2 + 1).unwrap(),
                concat_hash(&below, &below),
                "recurrence broken at log2 size {}",
                log2 + 1
            );
        }
    }

    #[test]
    fn test_single_byte_word() {
        let pristine = PristineHashes::new(5, 0).unwrap();
        assert_eq!(pristine.hash_of(0).unwrap(), keccak256(&[0u8]));
    }

    #[test]
    fn test_full_address_space_geometry() {
        // The reference machine covers all 2^64 bytes.
        let pristine = PristineHashes::new(64, 3).unwrap();
        assert!(pristine.hash_of(64).is_ok());
        assert!(pristine.hash_of(2).is_err());
        assert!(pristine.hash_of(65).is_err());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(PristineHashes::new(65, 3).is_err());
        assert!(PristineHashes::new(10, 11).is_err());
    }
}
