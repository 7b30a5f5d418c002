//! Self-verifying Merkle inclusion proofs.
//!
//! A proof links a target node to a root hash through the chain of sibling
//! hashes along the path between them. Verification needs nothing but the
//! proof itself: the target hash is combined with each sibling in turn,
//! left or right according to the corresponding bit of the target address,
//! and the result is compared against the claimed root.

use serde::{Deserialize, Serialize};

use crate::error::MerkleError;
use crate::hash::{concat_hash, Hash, HASH_SIZE};

/// Proof that a target node holds a given hash under a given root.
///
/// `sibling_hashes` is ordered from the target level up: the entry for
/// level `k` is the hash of the `2^k`-byte subtree adjacent to the path at
/// that level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    target_address: u64,
    log2_target_size: u32,
    log2_root_size: u32,
    target_hash: Hash,
    root_hash: Hash,
    sibling_hashes: Vec<Hash>,
}

impl MerkleProof {
    /// Create an all-zero proof shell for the given geometry.
    pub fn new(log2_root_size: u32, log2_target_size: u32) -> Result<Self, MerkleError> {
        if log2_root_size > 64 {
            return Err(MerkleError::SizeOutOfRange {
                log2_size: log2_root_size,
                min: 0,
                max: 64,
            });
        }
        if log2_target_size > log2_root_size {
            return Err(MerkleError::SizeOutOfRange {
                log2_size: log2_target_size,
                min: 0,
                max: log2_root_size,
            });
        }
        Ok(Self {
            target_address: 0,
            log2_target_size,
            log2_root_size,
            target_hash: [0; HASH_SIZE],
            root_hash: [0; HASH_SIZE],
            sibling_hashes: vec![[0; HASH_SIZE]; (log2_root_size - log2_target_size) as usize],
        })
    }

    /// Reassemble a proof from its parts, checking the sibling count
    /// against the geometry.
    pub fn from_parts(
        target_address: u64,
        log2_target_size: u32,
        log2_root_size: u32,
        target_hash: Hash,
        root_hash: Hash,
        sibling_hashes: Vec<Hash>,
    ) -> Result<Self, MerkleError> {
        let mut proof = Self::new(log2_root_size, log2_target_size)?;
        if sibling_hashes.len() != (log2_root_size - log2_target_size) as usize {
            return Err(MerkleError::SizeOutOfRange {
                log2_size: log2_target_size + sibling_hashes.len() as u32,
                min: log2_root_size,
                max: log2_root_size,
            });
        }
        proof.target_address = target_address;
        proof.target_hash = target_hash;
        proof.root_hash = root_hash;
        proof.sibling_hashes = sibling_hashes;
        Ok(proof)
    }

    /// Address of the target node.
    pub fn target_address(&self) -> u64 {
        self.target_address
    }

    pub fn set_target_address(&mut self, address: u64) {
        self.target_address = address;
    }

    /// Log2 of the byte range covered by the target node.
    pub fn log2_target_size(&self) -> u32 {
        self.log2_target_size
    }

    /// Log2 of the byte range covered by the root.
    pub fn log2_root_size(&self) -> u32 {
        self.log2_root_size
    }

    /// Hash claimed for the target node.
    pub fn target_hash(&self) -> &Hash {
        &self.target_hash
    }

    pub fn set_target_hash(&mut self, hash: Hash) {
        self.target_hash = hash;
    }

    /// Hash claimed for the root.
    pub fn root_hash(&self) -> &Hash {
        &self.root_hash
    }

    pub fn set_root_hash(&mut self, hash: Hash) {
        self.root_hash = hash;
    }

    /// Sibling hash at the given level on the path from target to root.
    pub fn sibling_hash(&self, log2_size: u32) -> Result<&Hash, MerkleError> {
        Ok(&self.sibling_hashes[self.sibling_index(log2_size)?])
    }

    pub fn set_sibling_hash(&mut self, log2_size: u32, hash: Hash) -> Result<(), MerkleError> {
        let index = self.sibling_index(log2_size)?;
        self.sibling_hashes[index] = hash;
        Ok(())
    }

    /// Sibling hashes ordered from the target level up to the root.
    pub fn sibling_hashes(&self) -> &[Hash] {
        &self.sibling_hashes
    }

    /// Combine a hash claimed for the target node with the sibling chain,
    /// producing the root this proof would commit to.
    ///
    /// At each level the bit of the target address selects whether the
    /// running hash is the left or the right child.
    pub fn roll_up(&self, from: Hash) -> Hash {
        let mut rolling = from;
        for log2_size in self.log2_target_size..self.log2_root_size {
            let sibling = &self.sibling_hashes[(log2_size - self.log2_target_size) as usize];
            rolling = if (self.target_address >> log2_size) & 1 != 0 {
                concat_hash(sibling, &rolling)
            } else {
                concat_hash(&rolling, sibling)
            };
        }
        rolling
    }

    /// Recompute the root from the target hash and compare to the claimed
    /// root hash.
    pub fn verify(&self) -> bool {
        self.roll_up(self.target_hash) == self.root_hash
    }

    /// Rebase the proof to a shallower root, dropping the outer siblings.
    /// The caller asserts the hash of the new root node.
    pub fn slice(
        &self,
        new_log2_root_size: u32,
        new_root_hash: Hash,
    ) -> Result<MerkleProof, MerkleError> {
        if new_log2_root_size < self.log2_target_size || new_log2_root_size > self.log2_root_size {
            return Err(MerkleError::SizeOutOfRange {
                log2_size: new_log2_root_size,
                min: self.log2_target_size,
                max: self.log2_root_size,
            });
        }
        let mut sliced = self.clone();
        sliced.log2_root_size = new_log2_root_size;
        sliced.root_hash = new_root_hash;
        sliced
            .sibling_hashes
            .truncate((new_log2_root_size - self.log2_target_size) as usize);
        Ok(sliced)
    }

    fn sibling_index(&self, log2_size: u32) -> Result<usize, MerkleError> {
        if log2_size < self.log2_target_size || log2_size >= self.log2_root_size {
            return Err(MerkleError::SizeOutOfRange {
                log2_size,
                min: self.log2_target_size,
                max: self.log2_root_size.saturating_sub(1),
            });
        }
        Ok((log2_size - self.log2_target_size) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::keccak256;

    /// Hand-build a proof for word 1 of a 4-word tree.
    fn sample_proof() -> MerkleProof {
        let words: Vec<Hash> = (0u8..4).map(|i| keccak256(&[i; 8])).collect();
        let left = concat_hash(&words[0], &words[1]);
        let right = concat_hash(&words[2], &words[3]);
        let root = concat_hash(&left, &right);

        let mut proof = MerkleProof::new(5, 3).unwrap();
        proof.set_target_address(0x08);
        proof.set_target_hash(words[1]);
        proof.set_sibling_hash(3, words[0]).unwrap();
        proof.set_sibling_hash(4, right).unwrap();
        proof.set_root_hash(root);
        proof
    }

    #[test]
    fn test_verify() {
        assert!(sample_proof().verify());
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let mut proof = sample_proof();
        let mut sibling = *proof.sibling_hash(4).unwrap();
        sibling[0] ^= 1;
        proof.set_sibling_hash(4, sibling).unwrap();
        assert!(!proof.verify());
    }

    #[test]
    fn test_sibling_range() {
        let proof = sample_proof();
        assert!(proof.sibling_hash(2).is_err());
        assert!(proof.sibling_hash(5).is_err());
        assert!(proof.sibling_hash(3).is_ok());
        assert!(proof.sibling_hash(4).is_ok());
    }

    #[test]
    fn test_slice_to_subtree_root() {
        let proof = sample_proof();
        // The 16-byte node containing the target is the left pair.
        let words: Vec<Hash> = (0u8..4).map(|i| keccak256(&[i; 8])).collect();
        let pair = concat_hash(&words[0], &words[1]);
        let sliced = proof.slice(4, pair).unwrap();
        assert_eq!(sliced.log2_root_size(), 4);
        assert_eq!(sliced.sibling_hashes().len(), 1);
        assert!(sliced.verify());
    }

    #[test]
    fn test_slice_rejects_deeper_root() {
        let proof = sample_proof();
        assert!(proof.slice(2, [0; 32]).is_err());
        assert!(proof.slice(6, [0; 32]).is_err());
    }

    #[test]
    fn test_from_parts_checks_sibling_count() {
        assert!(MerkleProof::from_parts(0, 3, 5, [0; 32], [0; 32], vec![[0; 32]; 2]).is_ok());
        assert!(MerkleProof::from_parts(0, 3, 5, [0; 32], [0; 32], vec![[0; 32]; 3]).is_err());
    }
}
