//! Sparse Merkle tree over the machine's physical address space.
//!
//! Page payloads live elsewhere; the tree stores the hash of every
//! non-pristine node from page level up to the root, keyed by
//! `(log2_size, index)`. A node absent from the map is pristine at its
//! level, so an empty map commits to an all-zero address space.
//!
//! Mutation happens inside an update bracket: `begin_update`, any number of
//! `update_page` calls, then `end_update`, which recomputes the ancestors
//! of every touched page and restores the invariant that each stored node
//! hashes its children. Queries while the bracket is open are refused.

use std::collections::{BTreeSet, HashMap};

use crate::error::MerkleError;
use crate::hash::{concat_hash, Hash};
use crate::pristine::PristineHashes;
use crate::proof::MerkleProof;

/// Merkle commitment over a mutable `2^log2_root_size`-byte space with
/// externally hashed pages.
#[derive(Clone, Debug)]
pub struct PageMerkleTree {
    log2_root_size: u32,
    log2_page_size: u32,
    pristine: PristineHashes,
    /// Non-pristine node hashes, keyed by `(log2_size, address >> log2_size)`.
    nodes: HashMap<(u32, u64), Hash>,
    /// Indices of pages touched since `begin_update`; `None` when no
    /// bracket is open.
    dirty: Option<BTreeSet<u64>>,
}

impl PageMerkleTree {
    /// Create a pristine tree for the given geometry.
    pub fn new(
        log2_root_size: u32,
        log2_page_size: u32,
        log2_word_size: u32,
    ) -> Result<Self, MerkleError> {
        if log2_page_size > log2_root_size || log2_word_size > log2_page_size {
            return Err(MerkleError::SizeOutOfRange {
                log2_size: log2_page_size,
                min: log2_word_size,
                max: log2_root_size,
            });
        }
        let pristine = PristineHashes::new(log2_root_size, log2_word_size)?;
        Ok(Self {
            log2_root_size,
            log2_page_size,
            pristine,
            nodes: HashMap::new(),
            dirty: None,
        })
    }

    /// Log2 of the byte range covered by the whole tree.
    pub fn log2_root_size(&self) -> u32 {
        self.log2_root_size
    }

    /// Log2 of the byte range covered by one page.
    pub fn log2_page_size(&self) -> u32 {
        self.log2_page_size
    }

    /// Pristine hash table for this geometry.
    pub fn pristine(&self) -> &PristineHashes {
        &self.pristine
    }

    /// Open an update bracket. Until `end_update`, queries are refused and
    /// page hashes may be replaced in any order.
    pub fn begin_update(&mut self) -> Result<(), MerkleError> {
        if self.dirty.is_some() {
            return Err(MerkleError::TreeIsDirty);
        }
        self.dirty = Some(BTreeSet::new());
        Ok(())
    }

    /// Replace the hash of the page at `address`. Only valid inside an
    /// update bracket.
    pub fn update_page(&mut self, address: u64, page_hash: Hash) -> Result<(), MerkleError> {
        let Some(dirty) = self.dirty.as_mut() else {
            return Err(MerkleError::NotUpdating);
        };
        if !in_range(address, self.log2_root_size) {
            return Err(MerkleError::AddressOutOfRange { address });
        }
        if !aligned(address, self.log2_page_size) {
            return Err(MerkleError::MisalignedAddress {
                address,
                log2_size: self.log2_page_size,
            });
        }
        let index = address >> self.log2_page_size;
        if page_hash == self.pristine.get(self.log2_page_size) {
            self.nodes.remove(&(self.log2_page_size, index));
        } else {
            self.nodes.insert((self.log2_page_size, index), page_hash);
        }
        dirty.insert(index);
        Ok(())
    }

    /// Close the update bracket, recomputing every dirtied ancestor, and
    /// return the new root hash.
    pub fn end_update(&mut self) -> Result<Hash, MerkleError> {
        let Some(dirty) = self.dirty.take() else {
            return Err(MerkleError::NotUpdating);
        };
        let mut indices = dirty;
        for log2_size in self.log2_page_size + 1..=self.log2_root_size {
            let parents: BTreeSet<u64> = indices.iter().map(|i| i >> 1).collect();
            for &index in &parents {
                let left = self.node_hash(log2_size - 1, 2 * index);
                let right = self.node_hash(log2_size - 1, 2 * index + 1);
                let hash = concat_hash(&left, &right);
                if hash == self.pristine.get(log2_size) {
                    self.nodes.remove(&(log2_size, index));
                } else {
                    self.nodes.insert((log2_size, index), hash);
                }
            }
            indices = parents;
        }
        Ok(self.node_hash(self.log2_root_size, 0))
    }

    /// Current root hash. Pristine until the first non-zero page update.
    pub fn root_hash(&self) -> Result<Hash, MerkleError> {
        if self.dirty.is_some() {
            return Err(MerkleError::TreeIsDirty);
        }
        Ok(self.node_hash(self.log2_root_size, 0))
    }

    /// Hash of the page at `address`, pristine if never updated.
    pub fn page_hash(&self, address: u64) -> Result<Hash, MerkleError> {
        if self.dirty.is_some() {
            return Err(MerkleError::TreeIsDirty);
        }
        if !in_range(address, self.log2_root_size) {
            return Err(MerkleError::AddressOutOfRange { address });
        }
        if !aligned(address, self.log2_page_size) {
            return Err(MerkleError::MisalignedAddress {
                address,
                log2_size: self.log2_page_size,
            });
        }
        Ok(self.node_hash(self.log2_page_size, address >> self.log2_page_size))
    }

    /// Proof linking the node of size `2^log2_target_size` at `address` to
    /// the root. Targets below page granularity are not materialised here;
    /// callers holding the page payload extend page-level proofs downward.
    pub fn get_proof(
        &self,
        address: u64,
        log2_target_size: u32,
    ) -> Result<MerkleProof, MerkleError> {
        if self.dirty.is_some() {
            return Err(MerkleError::TreeIsDirty);
        }
        if log2_target_size < self.log2_page_size || log2_target_size > self.log2_root_size {
            return Err(MerkleError::SizeOutOfRange {
                log2_size: log2_target_size,
                min: self.log2_page_size,
                max: self.log2_root_size,
            });
        }
        if !in_range(address, self.log2_root_size) {
            return Err(MerkleError::AddressOutOfRange { address });
        }
        if !aligned(address, log2_target_size) {
            return Err(MerkleError::MisalignedAddress {
                address,
                log2_size: log2_target_size,
            });
        }
        let mut proof = MerkleProof::new(self.log2_root_size, log2_target_size)?;
        proof.set_target_address(address);
        proof.set_target_hash(self.node_hash(log2_target_size, address >> log2_target_size));
        for log2_size in log2_target_size..self.log2_root_size {
            let sibling = self.node_hash(log2_size, (address >> log2_size) ^ 1);
            proof.set_sibling_hash(log2_size, sibling)?;
        }
        proof.set_root_hash(self.node_hash(self.log2_root_size, 0));
        debug_assert!(proof.verify());
        Ok(proof)
    }

    /// Stored hash of a node, or the pristine hash of its level.
    #[inline]
    fn node_hash(&self, log2_size: u32, index: u64) -> Hash {
        self.nodes
            .get(&(log2_size, index))
            .copied()
            .unwrap_or_else(|| self.pristine.get(log2_size))
    }
}

#[inline]
fn in_range(address: u64, log2_root_size: u32) -> bool {
    log2_root_size == 64 || address < 1u64 << log2_root_size
}

#[inline]
fn aligned(address: u64, log2_size: u32) -> bool {
    log2_size == 0 || address.trailing_zeros() >= log2_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{keccak256, tree_hash};

    #[test]
    fn test_initial_root_is_pristine() {
        let tree = PageMerkleTree::new(16, 8, 3).unwrap();
        assert_eq!(
            tree.root_hash().unwrap(),
            tree.pristine().hash_of(16).unwrap()
        );
    }

    #[test]
    fn test_update_requires_bracket() {
        let mut tree = PageMerkleTree::new(16, 8, 3).unwrap();
        assert_eq!(
            tree.update_page(0, keccak256(b"x")),
            Err(MerkleError::NotUpdating)
        );
        assert_eq!(tree.end_update().unwrap_err(), MerkleError::NotUpdating);
    }

    #[test]
    fn test_queries_refused_while_dirty() {
        let mut tree = PageMerkleTree::new(16, 8, 3).unwrap();
        tree.begin_update().unwrap();
        assert_eq!(tree.root_hash(), Err(MerkleError::TreeIsDirty));
        assert_eq!(tree.get_proof(0, 8).unwrap_err(), MerkleError::TreeIsDirty);
        assert_eq!(tree.begin_update(), Err(MerkleError::TreeIsDirty));
        tree.end_update().unwrap();
        assert!(tree.root_hash().is_ok());
    }

    #[test]
    fn test_update_validates_address() {
        let mut tree = PageMerkleTree::new(16, 8, 3).unwrap();
        tree.begin_update().unwrap();
        assert_eq!(
            tree.update_page(1 << 16, keccak256(b"x")),
            Err(MerkleError::AddressOutOfRange { address: 1 << 16 })
        );
        assert!(matches!(
            tree.update_page(0x101, keccak256(b"x")),
            Err(MerkleError::MisalignedAddress { .. })
        ));
        tree.end_update().unwrap();
    }

    #[test]
    fn test_zeroing_a_page_restores_pristine_root() {
        let mut tree = PageMerkleTree::new(16, 8, 3).unwrap();
        let payload = [0x5Au8; 256];
        tree.begin_update().unwrap();
        tree.update_page(0x300, tree_hash(&payload)).unwrap();
        tree.end_update().unwrap();
        assert_ne!(
            tree.root_hash().unwrap(),
            tree.pristine().hash_of(16).unwrap()
        );

        tree.begin_update().unwrap();
        let pristine_page = tree.pristine().hash_of(8).unwrap();
        tree.update_page(0x300, pristine_page).unwrap();
        tree.end_update().unwrap();
        assert_eq!(
            tree.root_hash().unwrap(),
            tree.pristine().hash_of(16).unwrap()
        );
    }

    #[test]
    fn test_proof_validates_arguments() {
        let tree = PageMerkleTree::new(16, 8, 3).unwrap();
        assert!(matches!(
            tree.get_proof(0, 7),
            Err(MerkleError::SizeOutOfRange { .. })
        ));
        assert!(matches!(
            tree.get_proof(0, 17),
            Err(MerkleError::SizeOutOfRange { .. })
        ));
        assert!(matches!(
            tree.get_proof(0x80, 8),
            Err(MerkleError::MisalignedAddress { .. })
        ));
        assert!(matches!(
            tree.get_proof(1 << 16, 8),
            Err(MerkleError::AddressOutOfRange { .. })
        ));
    }
}
