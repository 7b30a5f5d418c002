//! Committed machine state: sparse paged memory plus its Merkle tree.
//!
//! Pages are allocated on first write; a page that was never written is
//! all-zero and its subtree is pristine in the commitment. The tree holds
//! one hash per non-pristine page and is refreshed inside an update
//! bracket whenever a write lands.

use std::collections::HashMap;

use remu_merkle::{tree_hash, Hash, MerkleError, MerkleProof, PageMerkleTree};

use crate::layout::{LOG2_PAGE_SIZE, LOG2_ROOT_SIZE, LOG2_WORD_SIZE, PAGE_SIZE, WORD_SIZE};

/// Sparse byte-addressable memory over the full 64-bit address space.
#[derive(Clone, Debug, Default)]
pub struct PagedMemory {
    /// Page payloads keyed by page index. Absent pages read as zero.
    pages: HashMap<u64, Vec<u8>>,
}

impl PagedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `len` bytes starting at `addr`, zero-filling holes.
    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut done = 0usize;
        while done < len {
            let cur = addr + done as u64;
            let index = cur >> LOG2_PAGE_SIZE;
            let offset = (cur & (PAGE_SIZE as u64 - 1)) as usize;
            let chunk = (PAGE_SIZE - offset).min(len - done);
            if let Some(page) = self.pages.get(&index) {
                out[done..done + chunk].copy_from_slice(&page[offset..offset + chunk]);
            }
            done += chunk;
        }
        out
    }

    /// Write bytes starting at `addr`, allocating pages as needed.
    pub fn write(&mut self, addr: u64, data: &[u8]) {
        let mut done = 0usize;
        while done < data.len() {
            let cur = addr + done as u64;
            let index = cur >> LOG2_PAGE_SIZE;
            let offset = (cur & (PAGE_SIZE as u64 - 1)) as usize;
            let chunk = (PAGE_SIZE - offset).min(data.len() - done);
            let page = self.pages.entry(index).or_insert_with(|| vec![0u8; PAGE_SIZE]);
            page[offset..offset + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
    }

    /// Read the aligned word at `paligned`, little-endian.
    pub fn read_word(&self, paligned: u64) -> u64 {
        debug_assert_eq!(paligned & (WORD_SIZE as u64 - 1), 0);
        let mut bytes = [0u8; WORD_SIZE];
        bytes.copy_from_slice(&self.read(paligned, WORD_SIZE));
        u64::from_le_bytes(bytes)
    }

    /// Write the aligned word at `paligned`, little-endian.
    pub fn write_word(&mut self, paligned: u64, val: u64) {
        debug_assert_eq!(paligned & (WORD_SIZE as u64 - 1), 0);
        self.write(paligned, &val.to_le_bytes());
    }

    /// Payload of the page containing `addr`, or `None` if pristine.
    pub fn page(&self, addr: u64) -> Option<&[u8]> {
        self.pages.get(&(addr >> LOG2_PAGE_SIZE)).map(|p| p.as_slice())
    }
}

/// Machine state with its Merkle commitment kept current.
#[derive(Clone, Debug)]
pub struct MachineState {
    memory: PagedMemory,
    tree: PageMerkleTree,
}

impl MachineState {
    /// Pristine machine state.
    pub fn new() -> Result<Self, MerkleError> {
        Ok(Self {
            memory: PagedMemory::new(),
            tree: PageMerkleTree::new(LOG2_ROOT_SIZE, LOG2_PAGE_SIZE, LOG2_WORD_SIZE)?,
        })
    }

    /// Current root hash of the commitment.
    pub fn root_hash(&self) -> Result<Hash, MerkleError> {
        self.tree.root_hash()
    }

    /// Read `len` bytes starting at `addr`.
    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        self.memory.read(addr, len)
    }

    /// Read the aligned word at `paligned`.
    pub fn read_word(&self, paligned: u64) -> u64 {
        self.memory.read_word(paligned)
    }

    /// Write bytes starting at `addr` and refresh the hashes of every
    /// touched page.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), MerkleError> {
        if data.is_empty() {
            return Ok(());
        }
        self.memory.write(addr, data);
        let first = addr >> LOG2_PAGE_SIZE;
        let last = (addr + data.len() as u64 - 1) >> LOG2_PAGE_SIZE;
        self.tree.begin_update()?;
        for index in first..=last {
            let page_addr = index << LOG2_PAGE_SIZE;
            let hash = match self.memory.page(page_addr) {
                Some(page) => tree_hash(page),
                None => self.tree.pristine().hash_of(LOG2_PAGE_SIZE)?,
            };
            self.tree.update_page(page_addr, hash)?;
        }
        self.tree.end_update()?;
        Ok(())
    }

    /// Write the aligned word at `paligned` and refresh its page hash.
    pub fn write_word(&mut self, paligned: u64, val: u64) -> Result<(), MerkleError> {
        self.write(paligned, &val.to_le_bytes())
    }

    /// Proof for the `2^log2_size`-byte block at `addr` against the
    /// current root.
    ///
    /// Targets at or above page granularity come straight from the tree;
    /// below it, the in-page part of the sibling chain is hashed out of the
    /// page payload and spliced onto the page-level proof.
    pub fn proof(&self, addr: u64, log2_size: u32) -> Result<MerkleProof, MerkleError> {
        if log2_size >= LOG2_PAGE_SIZE {
            return self.tree.get_proof(addr, log2_size);
        }
        if log2_size < LOG2_WORD_SIZE {
            return Err(MerkleError::SizeOutOfRange {
                log2_size,
                min: LOG2_WORD_SIZE,
                max: LOG2_ROOT_SIZE,
            });
        }
        if addr & ((1u64 << log2_size) - 1) != 0 {
            return Err(MerkleError::MisalignedAddress {
                address: addr,
                log2_size,
            });
        }
        let page_addr = addr & !(PAGE_SIZE as u64 - 1);
        let page = self.memory.read(page_addr, PAGE_SIZE);
        let offset = (addr - page_addr) as usize;

        let mut proof = MerkleProof::new(LOG2_ROOT_SIZE, log2_size)?;
        proof.set_target_address(addr);
        proof.set_target_hash(tree_hash(&page[offset..offset + (1usize << log2_size)]));
        for log2 in log2_size..LOG2_PAGE_SIZE {
            let sibling = ((offset >> log2) ^ 1) << log2;
            proof.set_sibling_hash(log2, tree_hash(&page[sibling..sibling + (1usize << log2)]))?;
        }
        let page_proof = self.tree.get_proof(page_addr, LOG2_PAGE_SIZE)?;
        for log2 in LOG2_PAGE_SIZE..LOG2_ROOT_SIZE {
            proof.set_sibling_hash(log2, *page_proof.sibling_hash(log2)?)?;
        }
        proof.set_root_hash(*page_proof.root_hash());
        debug_assert!(proof.verify());
        Ok(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PMA_RAM_START;

    #[test]
    fn test_unwritten_memory_reads_zero() {
        let memory = PagedMemory::new();
        assert_eq!(memory.read_word(PMA_RAM_START), 0);
        assert_eq!(memory.read(0x1234, 4), vec![0; 4]);
    }

    #[test]
    fn test_write_spanning_pages() {
        let mut memory = PagedMemory::new();
        let data: Vec<u8> = (0..=255).collect();
        let addr = PMA_RAM_START + PAGE_SIZE as u64 - 100;
        memory.write(addr, &data);
        assert_eq!(memory.read(addr, data.len()), data);
    }

    #[test]
    fn test_pristine_state_has_pristine_root() {
        let state = MachineState::new().unwrap();
        let pristine = remu_merkle::PristineHashes::new(64, 3).unwrap();
        assert_eq!(state.root_hash().unwrap(), pristine.hash_of(64).unwrap());
    }

    #[test]
    fn test_word_proofs_track_writes() {
        let mut state = MachineState::new().unwrap();
        state.write_word(PMA_RAM_START, 0xDEAD_BEEF).unwrap();
        state.write_word(PMA_RAM_START + 0x1000, 77).unwrap();

        let proof = state.proof(PMA_RAM_START, 3).unwrap();
        assert!(proof.verify());
        assert_eq!(*proof.root_hash(), state.root_hash().unwrap());
        assert_eq!(
            *proof.target_hash(),
            remu_merkle::keccak256(&0xDEAD_BEEFu64.to_le_bytes())
        );
    }

    #[test]
    fn test_block_proofs_at_and_above_page_level() {
        let mut state = MachineState::new().unwrap();
        let payload: Vec<u8> = (0..2 * PAGE_SIZE).map(|i| i as u8).collect();
        state.write(PMA_RAM_START, &payload).unwrap();

        for log2 in [6u32, 12, 13] {
            let proof = state.proof(PMA_RAM_START, log2).unwrap();
            assert!(proof.verify(), "proof at log2 size {} fails", log2);
            assert_eq!(
                *proof.target_hash(),
                tree_hash(&payload[..1usize << log2])
            );
        }
    }

    #[test]
    fn test_zeroing_restores_pristine_root() {
        let mut state = MachineState::new().unwrap();
        state.write_word(PMA_RAM_START + 0x80, 1).unwrap();
        state.write_word(PMA_RAM_START + 0x80, 0).unwrap();
        let pristine = remu_merkle::PristineHashes::new(64, 3).unwrap();
        assert_eq!(state.root_hash().unwrap(), pristine.hash_of(64).unwrap());
    }
}
