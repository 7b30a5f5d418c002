//! Recording state accessor.
//!
//! Executes interpreter primitives against real machine state while
//! logging every access. When the log carries proofs, each record also
//! gets a Merkle proof of the pre-access data against the pre-access
//! root, so a verifier can replay the log with nothing but the initial
//! root hash.

use tracing::trace;

use remu_merkle::Hash;

use crate::access::{Access, AccessLog, AccessType, LogType};
use crate::dehash::DehashSource;
use crate::error::ReplayError;
use crate::layout::{
    dhd_h_abs_addr, shadow_pma_ilength_addr, shadow_pma_istart_addr, shadow_x_addr, Csr, DhdCsr,
    CLINT_MTIMECMP_REL, DHD_H_REG_COUNT, HTIF_FROMHOST_REL, HTIF_ICONSOLE_REL, HTIF_IHALT_REL,
    HTIF_IYIELD_REL, HTIF_TOHOST_REL, IFLAGS_H_MASK, IFLAGS_PRV_MASK, IFLAGS_PRV_SHIFT,
    IFLAGS_Y_MASK, PMA_CLINT_START, PMA_HTIF_START, WORD_SIZE,
};
use crate::machine::MachineState;
use crate::pma::{istart_start, PmaEntry};
use crate::state_access::StateAccess;

/// State accessor that executes primitives and records them.
pub struct LoggingStateAccess {
    state: MachineState,
    log: AccessLog,
    dehash_source: Option<Box<dyn DehashSource>>,
}

impl LoggingStateAccess {
    /// Start logging over the given machine state.
    pub fn new(state: MachineState, log_type: LogType) -> Result<Self, ReplayError> {
        let root = state.root_hash()?;
        Ok(Self {
            state,
            log: AccessLog::new(log_type, root),
            dehash_source: None,
        })
    }

    /// Attach a dehash source.
    pub fn with_dehash_source(mut self, source: Box<dyn DehashSource>) -> Self {
        self.dehash_source = Some(source);
        self
    }

    /// The log recorded so far.
    pub fn log(&self) -> &AccessLog {
        &self.log
    }

    /// Root hash of the machine state after every access so far.
    pub fn root_hash(&self) -> Result<Hash, ReplayError> {
        Ok(self.state.root_hash()?)
    }

    /// Finish logging, returning the log and the machine state.
    pub fn into_parts(self) -> (AccessLog, MachineState) {
        (self.log, self.state)
    }

    /// Execute and record a read of `2^log2_size` bytes.
    fn log_read(
        &mut self,
        paligned: u64,
        log2_size: u32,
        what: &'static str,
    ) -> Result<Vec<u8>, ReplayError> {
        check_shape(paligned, log2_size)?;
        let data = self.state.read(paligned, 1usize << log2_size);
        let proof = if self.log.log_type.has_proofs {
            Some(self.state.proof(paligned, log2_size)?)
        } else {
            None
        };
        let index = self.log.len();
        self.log.push_access(Access {
            access_type: AccessType::Read,
            address: paligned,
            log2_size,
            read: data.clone(),
            written: None,
            proof,
        });
        self.log.push_note(index, what);
        trace!(index, address = paligned, what, "logged read");
        Ok(data)
    }

    /// Execute and record a write of `2^log2_size` bytes.
    fn log_write(
        &mut self,
        paligned: u64,
        data: &[u8],
        log2_size: u32,
        what: &'static str,
    ) -> Result<(), ReplayError> {
        check_shape(paligned, log2_size)?;
        debug_assert_eq!(data.len(), 1usize << log2_size);
        let before = self.state.read(paligned, data.len());
        let proof = if self.log.log_type.has_proofs {
            Some(self.state.proof(paligned, log2_size)?)
        } else {
            None
        };
        self.state.write(paligned, data)?;
        let index = self.log.len();
        self.log.push_access(Access {
            access_type: AccessType::Write,
            address: paligned,
            log2_size,
            read: before,
            written: Some(data.to_vec()),
            proof,
        });
        self.log.push_note(index, what);
        trace!(index, address = paligned, what, "logged write");
        Ok(())
    }

    fn log_read_word(&mut self, paligned: u64, what: &'static str) -> Result<u64, ReplayError> {
        let data = self.log_read(paligned, 3, what)?;
        let mut bytes = [0u8; WORD_SIZE];
        bytes.copy_from_slice(&data);
        Ok(u64::from_le_bytes(bytes))
    }

    fn log_write_word(
        &mut self,
        paligned: u64,
        val: u64,
        what: &'static str,
    ) -> Result<(), ReplayError> {
        self.log_write(paligned, &val.to_le_bytes(), 3, what)
    }
}

fn check_shape(paligned: u64, log2_size: u32) -> Result<(), ReplayError> {
    if !(3..=63).contains(&log2_size) {
        return Err(ReplayError::InvalidLog2Size { log2_size });
    }
    if paligned & ((1u64 << log2_size) - 1) != 0 {
        return Err(ReplayError::MisalignedAddress {
            address: paligned,
            log2_size,
        });
    }
    Ok(())
}

impl StateAccess for LoggingStateAccess {
    type Error = ReplayError;

    fn read_x(&mut self, reg: usize) -> Result<u64, ReplayError> {
        self.log_read_word(shadow_x_addr(reg), "x")
    }

    fn write_x(&mut self, reg: usize, val: u64) -> Result<(), ReplayError> {
        debug_assert!(reg != 0);
        self.log_write_word(shadow_x_addr(reg), val, "x")
    }

    fn read_csr(&mut self, csr: Csr) -> Result<u64, ReplayError> {
        self.log_read_word(csr.abs_addr(), csr.name())
    }

    fn write_csr(&mut self, csr: Csr, val: u64) -> Result<(), ReplayError> {
        self.log_write_word(csr.abs_addr(), val, csr.name())
    }

    fn read_iflags_h(&mut self) -> Result<bool, ReplayError> {
        let iflags = self.log_read_word(Csr::Iflags.abs_addr(), "iflags.H")?;
        Ok(iflags & IFLAGS_H_MASK != 0)
    }

    fn set_iflags_h(&mut self) -> Result<(), ReplayError> {
        let addr = Csr::Iflags.abs_addr();
        let old = self.log_read_word(addr, "iflags.H (superfluous)")?;
        self.log_write_word(addr, old | IFLAGS_H_MASK, "iflags.H")
    }

    fn read_iflags_y(&mut self) -> Result<bool, ReplayError> {
        let iflags = self.log_read_word(Csr::Iflags.abs_addr(), "iflags.Y")?;
        Ok(iflags & IFLAGS_Y_MASK != 0)
    }

    fn set_iflags_y(&mut self) -> Result<(), ReplayError> {
        let addr = Csr::Iflags.abs_addr();
        let old = self.log_read_word(addr, "iflags.Y (superfluous)")?;
        self.log_write_word(addr, old | IFLAGS_Y_MASK, "iflags.Y")
    }

    fn reset_iflags_y(&mut self) -> Result<(), ReplayError> {
        let addr = Csr::Iflags.abs_addr();
        let old = self.log_read_word(addr, "iflags.Y (superfluous)")?;
        self.log_write_word(addr, old & !IFLAGS_Y_MASK, "iflags.Y")
    }

    fn read_iflags_prv(&mut self) -> Result<u8, ReplayError> {
        let iflags = self.log_read_word(Csr::Iflags.abs_addr(), "iflags.PRV")?;
        Ok(((iflags & IFLAGS_PRV_MASK) >> IFLAGS_PRV_SHIFT) as u8)
    }

    fn write_iflags_prv(&mut self, val: u8) -> Result<(), ReplayError> {
        let addr = Csr::Iflags.abs_addr();
        let old = self.log_read_word(addr, "iflags.PRV (superfluous)")?;
        let new = (old & !IFLAGS_PRV_MASK) | (((val as u64) << IFLAGS_PRV_SHIFT) & IFLAGS_PRV_MASK);
        self.log_write_word(addr, new, "iflags.PRV")
    }

    fn read_clint_mtimecmp(&mut self) -> Result<u64, ReplayError> {
        self.log_read_word(PMA_CLINT_START + CLINT_MTIMECMP_REL, "clint.mtimecmp")
    }

    fn write_clint_mtimecmp(&mut self, val: u64) -> Result<(), ReplayError> {
        self.log_write_word(PMA_CLINT_START + CLINT_MTIMECMP_REL, val, "clint.mtimecmp")
    }

    fn read_htif_tohost(&mut self) -> Result<u64, ReplayError> {
        self.log_read_word(PMA_HTIF_START + HTIF_TOHOST_REL, "htif.tohost")
    }

    fn write_htif_tohost(&mut self, val: u64) -> Result<(), ReplayError> {
        self.log_write_word(PMA_HTIF_START + HTIF_TOHOST_REL, val, "htif.tohost")
    }

    fn read_htif_fromhost(&mut self) -> Result<u64, ReplayError> {
        self.log_read_word(PMA_HTIF_START + HTIF_FROMHOST_REL, "htif.fromhost")
    }

    fn write_htif_fromhost(&mut self, val: u64) -> Result<(), ReplayError> {
        self.log_write_word(PMA_HTIF_START + HTIF_FROMHOST_REL, val, "htif.fromhost")
    }

    fn read_htif_ihalt(&mut self) -> Result<u64, ReplayError> {
        self.log_read_word(PMA_HTIF_START + HTIF_IHALT_REL, "htif.ihalt")
    }

    fn read_htif_iconsole(&mut self) -> Result<u64, ReplayError> {
        self.log_read_word(PMA_HTIF_START + HTIF_ICONSOLE_REL, "htif.iconsole")
    }

    fn read_htif_iyield(&mut self) -> Result<u64, ReplayError> {
        self.log_read_word(PMA_HTIF_START + HTIF_IYIELD_REL, "htif.iyield")
    }

    fn read_dhd_csr(&mut self, csr: DhdCsr) -> Result<u64, ReplayError> {
        self.log_read_word(csr.abs_addr(), csr.name())
    }

    fn write_dhd_csr(&mut self, csr: DhdCsr, val: u64) -> Result<(), ReplayError> {
        self.log_write_word(csr.abs_addr(), val, csr.name())
    }

    fn read_dhd_h(&mut self, index: usize) -> Result<u64, ReplayError> {
        debug_assert!(index < DHD_H_REG_COUNT);
        self.log_read_word(dhd_h_abs_addr(index), "dhd.h")
    }

    fn write_dhd_h(&mut self, index: usize, val: u64) -> Result<(), ReplayError> {
        debug_assert!(index < DHD_H_REG_COUNT);
        self.log_write_word(dhd_h_abs_addr(index), val, "dhd.h")
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
        let word = self.log_read_word(paligned, "memory")?;
        let offset = (paddr & (WORD_SIZE as u64 - 1)) as u32;
        Ok((word >> (8 * offset)) as u8)
    }

    fn read_memory_u16(&mut self, paddr: u64) -> Result<u16, ReplayError> {
        debug_assert_eq!(paddr & 1, 0);
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let word = self.log_read_word(paligned, "memory")?;
        let offset = (paddr & (WORD_SIZE as u64 - 1)) as u32;
        Ok((word >> (8 * offset)) as u16)
    }

    fn read_memory_u32(&mut self, paddr: u64) -> Result<u32, ReplayError> {
        debug_assert_eq!(paddr & 3, 0);
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let word = self.log_read_word(paligned, "memory")?;
        let offset = (paddr & (WORD_SIZE as u64 - 1)) as u32;
        Ok((word >> (8 * offset)) as u32)
    }

    fn read_memory_u64(&mut self, paddr: u64) -> Result<u64, ReplayError> {
        self.log_read_word(paddr, "memory")
    }

    fn write_memory_u8(&mut self, paddr: u64, val: u8) -> Result<(), ReplayError> {
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let old = self.log_read_word(paligned, "memory (superfluous)")?;
        let merged = merge_word(old, paddr, &[val]);
        self.log_write_word(paligned, merged, "memory")
    }

    fn write_memory_u16(&mut self, paddr: u64, val: u16) -> Result<(), ReplayError> {
        debug_assert_eq!(paddr & 1, 0);
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let old = self.log_read_word(paligned, "memory (superfluous)")?;
        let merged = merge_word(old, paddr, &val.to_le_bytes());
        self.log_write_word(paligned, merged, "memory")
    }

    fn write_memory_u32(&mut self, paddr: u64, val: u32) -> Result<(), ReplayError> {
        debug_assert_eq!(paddr & 3, 0);
        let paligned = paddr & !(WORD_SIZE as u64 - 1);
        let old = self.log_read_word(paligned, "memory (superfluous)")?;
        let merged = merge_word(old, paddr, &val.to_le_bytes());
        self.log_write_word(paligned, merged, "memory")
    }

    fn write_memory_u64(&mut self, paddr: u64, val: u64) -> Result<(), ReplayError> {
        self.log_write_word(paddr, val, "memory")
    }

    fn write_memory(
        &mut self,
        paddr: u64,
        data: &[u8],
        log2_size: u32,
    ) -> Result<(), ReplayError> {
        self.log_write(paddr, data, log2_size, "block write")
    }

    fn read_pma_istart(&mut self, index: usize) -> Result<u64, ReplayError> {
        self.log_read_word(shadow_pma_istart_addr(index), "pma.istart")
    }

    fn read_pma_ilength(&mut self, index: usize) -> Result<u64, ReplayError> {
        self.log_read_word(shadow_pma_ilength_addr(index), "pma.ilength")
    }

    fn find_pma(&mut self, paddr: u64, len: u64) -> Result<PmaEntry, ReplayError> {
        let mut index = 0;
        loop {
            let istart = self.read_pma_istart(index)?;
            let ilength = self.read_pma_ilength(index)?;
            let report = self.log.len();
            if ilength == 0 {
                return PmaEntry::from_board(istart, ilength)
                    .map_err(|source| ReplayError::InvalidPmaFlags { index: report, source });
            }
            let start = istart_start(istart);
            if ilength >= len && paddr >= start && paddr - start <= ilength - len {
                return PmaEntry::from_board(istart, ilength)
                    .map_err(|source| ReplayError::InvalidPmaFlags { index: report, source });
            }
            index += 1;
        }
    }
}

/// Patch little-endian `bytes` into `word` at the in-word offset of
/// `paddr`.
pub(crate) fn merge_word(word: u64, paddr: u64, bytes: &[u8]) -> u64 {
    let offset = (paddr & (WORD_SIZE as u64 - 1)) as usize;
    debug_assert!(offset + bytes.len() <= WORD_SIZE);
    let mut le = word.to_le_bytes();
    le[offset..offset + bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(le)
}
