//! Replay of a recorded access log.
//!
//! The replay accessor offers the interpreter the same primitives the
//! live machine does, but answers them from the log: each primitive must
//! match the next record in shape (kind, address, size, data length), and
//! when proofs are verified, the record's data must hash to the proof
//! target and its sibling chain must reproduce the current root. Writes
//! roll the written data up the same chain to produce the next root, so a
//! complete replay derives the post-execution root hash from nothing but
//! the log and the initial root.
//!
//! Any mismatch is fatal; the cursor only advances past fully checked
//! accesses, and `finish` rejects logs with unconsumed records.

use tracing::trace;

use remu_merkle::{tree_hash, Hash, MerkleProof};

use crate::access::{Access, AccessLog, AccessType};
use crate::dehash::DehashSource;
use crate::error::ReplayError;
use crate::layout::{
    dhd_h_abs_addr, shadow_pma_ilength_addr, shadow_pma_istart_addr, shadow_x_addr, Csr, DhdCsr,
    CLINT_MTIMECMP_REL, DHD_H_REG_COUNT, HTIF_FROMHOST_REL, HTIF_ICONSOLE_REL, HTIF_IHALT_REL,
    HTIF_IYIELD_REL, HTIF_TOHOST_REL, IFLAGS_H_MASK, IFLAGS_PRV_MASK, IFLAGS_PRV_SHIFT,
    IFLAGS_Y_MASK, PMA_CLINT_START, PMA_HTIF_START, WORD_SIZE,
};
use crate::pma::{istart_start, MockPmaPool, PmaEntry};
use crate::record::merge_word;
use crate::state_access::StateAccess;

/// State accessor that replays a recorded access log.
pub struct ReplayStateAccess<'a> {
    /// The log being consumed.
    accesses: &'a [Access],
    /// Whether each access must carry a verifying proof.
    verify_proofs: bool,
    /// Cursor into `accesses`.
    next_access: usize,
    /// Report access indices 1-based in errors.
    one_based: bool,
    /// Root hash before the access at the cursor.
    root_hash: Hash,
    /// Descriptors synthesised by `find_pma`.
    mock_pmas: MockPmaPool,
    /// Dehash source, if the machine has a dehashing device.
    dehash_source: Option<Box<dyn DehashSource>>,
}

impl<'a> ReplayStateAccess<'a> {
    /// Start a replay of `log` from the asserted pre-state root.
    pub fn new(
        log: &'a AccessLog,
        root_hash_before: Hash,
        verify_proofs: bool,
        one_based: bool,
    ) -> Result<Self, ReplayError> {
        if verify_proofs && !log.log_type.has_proofs {
            return Err(ReplayError::LogHasNoProofs);
        }
        if log.root_hash_before != root_hash_before {
            return Err(ReplayError::InitialRootMismatch);
        }
        Ok(Self {
            accesses: &log.accesses,
            verify_proofs,
            next_access: 0,
            one_based,
            root_hash: root_hash_before,
            mock_pmas: MockPmaPool::new(),
            dehash_source: None,
        })
    }

    /// Attach a dehash source.
    pub fn with_dehash_source(mut self, source: Box<dyn DehashSource>) -> Self {
        self.dehash_source = Some(source);
        self
    }

    /// Root hash after every access consumed so far.
    pub fn root_hash(&self) -> Hash {
        self.root_hash
    }

    /// Number of accesses consumed so far.
    pub fn consumed(&self) -> usize {
        self.next_access
    }

    /// Check that the whole log was consumed.
    pub fn finish(&self) -> Result<(), ReplayError> {
        if self.next_access != self.accesses.len() {
            return Err(ReplayError::TooManyAccesses {
                index: self.report_index(),
            });
        }
        Ok(())
    }

    /// Index of the access at the cursor, as reported in errors.
    fn report_index(&self) -> usize {
        self.next_access + self.one_based as usize
    }

    /// Check the next logged read and advance the cursor.
    fn check_read(
        &mut self,
        paligned: u64,
        log2_size: u32,
        what: &'static str,
    ) -> Result<&'a [u8], ReplayError> {
        if !(3..=63).contains(&log2_size) {
            return Err(ReplayError::InvalidLog2Size { log2_size });
        }
        if paligned & ((1u64 << log2_size) - 1) != 0 {
            return Err(ReplayError::MisalignedAddress {
                address: paligned,
                log2_size,
            });
        }
        let index = self.report_index();
        let Some(access) = self.accesses.get(self.next_access) else {
            return Err(ReplayError::TooFewAccesses { index });
        };
        if access.access_type != AccessType::Read {
            return Err(ReplayError::UnexpectedAccessType {
                index,
                expected: "read",
                what,
            });
        }
        if access.log2_size != log2_size {
            return Err(ReplayError::WrongLog2Size {
                index,
                expected: log2_size,
                what,
            });
        }
        if access.read.len() != 1usize << log2_size {
            return Err(ReplayError::WrongReadLength { index, log2_size });
        }
        if access.address != paligned {
            return Err(ReplayError::WrongAddress {
                index,
                address: paligned,
                what,
            });
        }
        if self.verify_proofs {
            let proof = proof_of(access, index)?;
            check_against_root(proof, access, self.root_hash, index, what)?;
        }
        self.next_access += 1;
        trace!(index, address = paligned, what, "replayed read");
        Ok(&access.read)
    }

    /// Check the next logged write, advance the cursor, and roll the root
    /// forward.
    fn check_write(
        &mut self,
        paligned: u64,
        val: &[u8],
        log2_size: u32,
        what: &'static str,
    ) -> Result<(), ReplayError> {
        if !(3..=63).contains(&log2_size) {
            return Err(ReplayError::InvalidLog2Size { log2_size });
        }
        if paligned & ((1u64 << log2_size) - 1) != 0 {
            return Err(ReplayError::MisalignedAddress {
                address: paligned,
                log2_size,
            });
        }
        let index = self.report_index();
        let Some(access) = self.accesses.get(self.next_access) else {
            return Err(ReplayError::TooFewAccesses { index });
        };
        if access.access_type != AccessType::Write {
            return Err(ReplayError::UnexpectedAccessType {
                index,
                expected: "write",
                what,
            });
        }
        if access.log2_size != log2_size {
            return Err(ReplayError::WrongLog2Size {
                index,
                expected: log2_size,
                what,
            });
        }
        if access.read.len() != 1usize << log2_size {
            return Err(ReplayError::WrongReadLength { index, log2_size });
        }
        let Some(written) = access.written.as_deref() else {
            return Err(ReplayError::WrongWrittenLength { index, log2_size });
        };
        if written.len() != 1usize << log2_size {
            return Err(ReplayError::WrongWrittenLength { index, log2_size });
        }
        if access.address != paligned {
            return Err(ReplayError::WrongAddress {
                index,
                address: paligned,
                what,
            });
        }
        if self.verify_proofs {
            let proof = proof_of(access, index)?;
            check_against_root(proof, access, self.root_hash, index, what)?;
        }
        if written != val {
            return Err(ReplayError::WrittenValueMismatch { index, what });
        }
        if self.verify_proofs {
            // The sibling chain of the pre-image also commits to the
            // post-image: only the target changed.
            let proof = proof_of(access, index)?;
            self.root_hash = proof.roll_up(tree_hash(written));
        }
        self.next_access += 1;
        trace!(index, address = paligned, what, "replayed write");
        Ok(())
    }

    fn check_read_word(&mut self, paligned: u64, what: &'static str) -> Result<u64, ReplayError> {
        let data = self.check_read(paligned, 3, what)?;
        let mut bytes = [0u8; WORD_SIZE];
        bytes.copy_from_slice(data);
        Ok(u64::from_le_bytes(bytes))
    }

    fn check_write_word(
        &mut self,
        paligned: u64,
        val: u64,
        what: &'static str,
    ) -> Result<(), ReplayError> {
        self.check_write(paligned, &val.to_le_bytes(), 3, what)
    }

    fn build_mock_pma(&mut self, istart: u64, ilength: u64) -> Result<PmaEntry, ReplayError> {
        let index = self.report_index();
        let entry = PmaEntry::from_board(istart, ilength)
            .map_err(|source| ReplayError::InvalidPmaFlags { index, source })?;
        self.mock_pmas
            .allocate(entry)
            .ok_or(ReplayError::TooManyPmas { index })
    }
}

/// The proof carried by an access, or the error naming its index.
fn proof_of(access: &Access, index: usize) -> Result<&MerkleProof, ReplayError> {
    access
        .proof
        .as_ref()
        .ok_or(ReplayError::MissingProof { index })
}

/// Check that an access's pre-image data is committed by `root_hash`
/// through its proof.
fn check_against_root(
    proof: &MerkleProof,
    access: &Access,
    root_hash: Hash,
    index: usize,
    what: &'static str,
) -> Result<(), ReplayError> {
    if proof.target_address() != access.address {
        return Err(ReplayError::ProofAddressMismatch { index });
    }
    if *proof.root_hash() != root_hash {
        return Err(ReplayError::RootHashMismatch { index });
    }
    let target = tree_hash(&access.read);
    if target != *proof.target_hash() {
        return Err(ReplayError::TargetHashMismatch { index, what });
    }
    if proof.roll_up(target) != *proof.root_hash() {
        return Err(ReplayError::ProofMismatch { index, what });
    }
    Ok(())
}

impl StateAccess for ReplayStateAccess<'_> {
    type Error = ReplayError;

    fn read_x(&mut self, reg: usize) -> Result<u64, ReplayError> {
        self.check_read_word(shadow_x_addr(reg), "x")
    }

    fn write_x(&mut self, reg: usize, val: u64) -> Result<(), ReplayError> {
        debug_assert!(reg != 0);
        self.check_write_word(shadow_x_addr(reg), val, "x")
    }

    fn read_csr(&mut self, csr: Csr) -> Result<u64, ReplayError> {
        self.check_read_word(csr.abs_addr(), csr.name())
    }

    fn write_csr(&mut self, csr: Csr, val: u64) -> Result<(), ReplayError> {
        self.check_write_word(csr.abs_addr(), val, csr.name())
    }

    fn read_iflags_h(&mut self) -> Result<bool, ReplayError> {
        let iflags = self.check_read_word(Csr::Iflags.abs_addr(), "iflags.H")?;
        Ok(iflags & IFLAGS_H_MASK != 0)
    }

    fn set_iflags_h(&mut self) -> Result<(), ReplayError> {
        let addr = Csr::Iflags.abs_addr();
        let old = self.check_read_word(addr, "iflags.H (superfluous)")?;
        self.check_write_word(addr, old | IFLAGS_H_MASK, "iflags.H")
    }

    fn read_iflags_y(&mut self) -> Result<bool, ReplayError> {
        let iflags = self.check_read_word(Csr::Iflags.abs_addr(), "iflags.Y")?;
        Ok(iflags & IFLAGS_Y_MASK != 0)
    }

    fn set_iflags_y(&mut self) -> Result<(), ReplayError> {
        let addr = Csr::Iflags.abs_addr();
        let old = self.check_read_word(addr, "iflags.Y (superfluous)")?;
        self.check_write_word(addr, old | IFLAGS_Y_MASK, "iflags.Y")
    }

    fn reset_iflags_y(&mut self) -> Result<(), ReplayError> {
        let addr = Csr::Iflags.abs_addr();
        let old = self.check_read_word(addr, "iflags.Y (superfluous)")?;
        self.check_write_word(addr, old & !IFLAGS_Y_MASK, "iflags.Y")
    }

    fn read_iflags_prv(&mut self) -> Result<u8, ReplayError> {
        let iflags = self.check_read_word(Csr::Iflags.abs_addr(), "iflags.PRV")?;
        Ok(((iflags & IFLAGS_PRV_MASK) >> IFLAGS_PRV_SHIFT) as u8)
    }

    fn write_iflags_prv(&mut self, val: u8) -> Result<(), ReplayError> {
        let addr = Csr::Iflags.abs_addr();
        let old = self.check_read_word(addr, "iflags.PRV (superfluous)")?;
        let new = (old & !IFLAGS_PRV_MASK) | (((val as u64) << IFLAGS_PRV_SHIFT) & IFLAGS_PRV_MASK);
        self.check_write_word(addr, new, "iflags.PRV")
    }

    fn read_clint_mtimecmp(&mut self) -> Result<u64, ReplayError> {
        self.check_read_word(PMA_CLINT_START + CLINT_MTIMECMP_REL, "clint.mtimecmp")
    }

    fn write_clint_mtimecmp(&mut self, val: u64) -> Result<(), ReplayError> {
        self.check_write_word(PMA_CLINT_START + CLINT_MTIMECMP_REL, val, "clint.mtimecmp")
    }

    fn read_htif_tohost(&mut self) -> Result<u64, ReplayError> {
        self.check_read_word(PMA_HTIF_START + HTIF_TOHOST_REL, "htif.tohost")
    }

    fn write_htif_tohost(&mut self, val: u64) -> Result<(), ReplayError> {
        self.check_write_word(PMA_HTIF_START + HTIF_TOHOST_REL, val, "htif.tohost")
    }

    fn read_htif_fromhost(&mut self) -> Result<u64, ReplayError> {
        self.check_read_word(PMA_HTIF_START + HTIF_FROMHOST_REL, "htif.fromhost")
    }

    fn write_htif_fromhost(&mut self, val: u64) -> Result<(), ReplayError> {
        self.check_write_word(PMA_HTIF_START + HTIF_FROMHOST_REL, val, "htif.fromhost")
    }

    fn read_htif_ihalt(&mut self) -> Result<u64, ReplayError> {
        self.check_read_word(PMA_HTIF_START + HTIF_IHALT_REL, "htif.ihalt")
    }

    fn read_htif_iconsole(&mut self) -> Result<u64, ReplayError> {
        self.check_read_word(PMA_HTIF_START + HTIF_ICONSOLE_REL, "htif.iconsole")
    }

    fn read_htif_iyield(&mut self) -> Result<u64, ReplayError> {
        self.check_read_word(PMA_HTIF_START + HTIF_IYIELD_REL, "htif.iyield")
    }

    fn read_dhd_csr(&mut self, csr: DhdCsr) -> Result<u64, ReplayError> {
        self.check_read_word(csr.abs_addr(), csr.name())
    }

    fn write_dhd_csr(&mut self, csr: DhdCsr, val: u64) -> Result<(), ReplayError> {
        self.check_write_word(csr.abs_addr(), val, csr.name())
    }

    fn read_dhd_h(&mut self, index: usize) -> Result<u64, ReplayError> {
        debug_assert!(index < DHD_H_REG_COUNT);
        self.check_read_word(dhd_h_abs_addr(index), "dhd.h")
    }

    fn write_dhd_h(&mut self, index: usize, val: u64) -> Result<(), ReplayError> {
        debug_assert!(index < DHD_H_REG_COUNT);
        self.check_write_word(dhd_h_abs_addr(index), val, "dhd.h")
    }

    fn dehash(&mut self, hash: &[u8], max_dlength: u64) -> Result<Option<Vec<u8>>, ReplayError> {
        let source = self
            .dehash_source
            .as_mut()
            .ok_or(ReplayError::NoDehashSource)?;
        Ok(source.dehash(hash, max_dlength))
    }

    fn read_memory_u8(&mut self, paddr: u64) -> Result<u8, ReplayError> {
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let word = self.check_read_word(paligned, "memory")?;
        let offset = (paddr & (WORD_SIZE as u64 - 1)) as u32;
        Ok((word >> (8 * offset)) as u8)
    }

    fn read_memory_u16(&mut self, paddr: u64) -> Result<u16, ReplayError> {
        debug_assert_eq!(paddr & 1, 0);
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let word = self.check_read_word(paligned, "memory")?;
        let offset = (paddr & (WORD_SIZE as u64 - 1)) as u32;
        Ok((word >> (8 * offset)) as u16)
    }

    fn read_memory_u32(&mut self, paddr: u64) -> Result<u32, ReplayError> {
        debug_assert_eq!(paddr & 3, 0);
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let word = self.check_read_word(paligned, "memory")?;
        let offset = (paddr & (WORD_SIZE as u64 - 1)) as u32;
        Ok((word >> (8 * offset)) as u32)
    }

    fn read_memory_u64(&mut self, paddr: u64) -> Result<u64, ReplayError> {
        self.check_read_word(paddr, "memory")
    }

    fn write_memory_u8(&mut self, paddr: u64, val: u8) -> Result<(), ReplayError> {
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let old = self.check_read_word(paligned, "memory (superfluous)")?;
        let merged = merge_word(old, paddr, &[val]);
        self.check_write_word(paligned, merged, "memory")
    }

    fn write_memory_u16(&mut self, paddr: u64, val: u16) -> Result<(), ReplayError> {
        debug_assert_eq!(paddr & 1, 0);
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let old = self.check_read_word(paligned, "memory (superfluous)")?;
        let merged = merge_word(old, paddr, &val.to_le_bytes());
        self.check_write_word(paligned, merged, "memory")
    }

    fn write_memory_u32(&mut self, paddr: u64, val: u32) -> Result<(), ReplayError> {
        debug_assert_eq!(paddr & 3, 0);
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let old = self.check_read_word(paligned, "memory (superfluous)")?;
        let merged = merge_word(old, paddr, &val.to_le_bytes());
        self.check_write_word(paligned, merged, "memory")
    }

    fn write_memory_u64(&mut self, paddr: u64, val: u64) -> Result<(), ReplayError> {
        self.check_write_word(paddr, val, "memory")
    }

    fn write_memory(
        &mut self,
        paddr: u64,
        data: &[u8],
        log2_size: u32,
    ) -> Result<(), ReplayError> {
        self.check_write(paddr, data, log2_size, "block write")
    }

    fn read_pma_istart(&mut self, index: usize) -> Result<u64, ReplayError> {
        self.check_read_word(shadow_pma_istart_addr(index), "pma.istart")
    }

    fn read_pma_ilength(&mut self, index: usize) -> Result<u64, ReplayError> {
        self.check_read_word(shadow_pma_ilength_addr(index), "pma.ilength")
    }

    fn find_pma(&mut self, paddr: u64, len: u64) -> Result<PmaEntry, ReplayError> {
        let mut index = 0;
        loop {
            let istart = self.read_pma_istart(index)?;
            let ilength = self.read_pma_ilength(index)?;
            if ilength == 0 {
                return self.build_mock_pma(istart, ilength);
            }
            let start = istart_start(istart);
            if ilength >= len && paddr >= start && paddr - start <= ilength - len {
                return self.build_mock_pma(istart, ilength);
            }
            index += 1;
        }
    }
}
