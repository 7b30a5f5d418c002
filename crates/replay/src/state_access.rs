//! The state-access contract shared by all machine backends.
//!
//! The interpreter is generic over a provider of these primitives, so the
//! same instruction-execution code runs against live state, against a
//! recording accessor that logs every access, and against the replay
//! verifier that re-executes a log. The contract is the set of
//! capabilities, not any particular dispatch mechanism.
//!
//! Registers are words at fixed shadow addresses, so every primitive here
//! is ultimately a word-level read or write of the committed address
//! space. Sub-word memory writes are read-modify-write of the containing
//! word and surface as two accesses (a superfluous read, then the write of
//! the merged word); so are the bit-set operations on `iflags`.

use crate::layout::{Csr, DhdCsr};
use crate::pma::PmaEntry;

/// Capability set the interpreter requires of a machine state backend.
pub trait StateAccess {
    type Error: std::error::Error;

    /// Read general-purpose register `x<reg>`.
    fn read_x(&mut self, reg: usize) -> Result<u64, Self::Error>;

    /// Write general-purpose register `x<reg>`. `x0` is never written.
    fn write_x(&mut self, reg: usize, val: u64) -> Result<(), Self::Error>;

    /// Read a control and status register.
    fn read_csr(&mut self, csr: Csr) -> Result<u64, Self::Error>;

    /// Write a control and status register.
    fn write_csr(&mut self, csr: Csr, val: u64) -> Result<(), Self::Error>;

    /// Read the halt bit of `iflags`.
    fn read_iflags_h(&mut self) -> Result<bool, Self::Error>;

    /// Set the halt bit of `iflags`.
    fn set_iflags_h(&mut self) -> Result<(), Self::Error>;

    /// Read the yield bit of `iflags`.
    fn read_iflags_y(&mut self) -> Result<bool, Self::Error>;

    /// Set the yield bit of `iflags`.
    fn set_iflags_y(&mut self) -> Result<(), Self::Error>;

    /// Clear the yield bit of `iflags`.
    fn reset_iflags_y(&mut self) -> Result<(), Self::Error>;

    /// Read the privilege field of `iflags`.
    fn read_iflags_prv(&mut self) -> Result<u8, Self::Error>;

    /// Write the privilege field of `iflags`.
    fn write_iflags_prv(&mut self, val: u8) -> Result<(), Self::Error>;

    /// Read the CLINT `mtimecmp` register.
    fn read_clint_mtimecmp(&mut self) -> Result<u64, Self::Error>;

    /// Write the CLINT `mtimecmp` register.
    fn write_clint_mtimecmp(&mut self, val: u64) -> Result<(), Self::Error>;

    /// Read the HTIF `tohost` register.
    fn read_htif_tohost(&mut self) -> Result<u64, Self::Error>;

    /// Write the HTIF `tohost` register.
    fn write_htif_tohost(&mut self, val: u64) -> Result<(), Self::Error>;

    /// Read the HTIF `fromhost` register.
    fn read_htif_fromhost(&mut self) -> Result<u64, Self::Error>;

    /// Write the HTIF `fromhost` register.
    fn write_htif_fromhost(&mut self, val: u64) -> Result<(), Self::Error>;

    /// Read the HTIF `ihalt` register.
    fn read_htif_ihalt(&mut self) -> Result<u64, Self::Error>;

    /// Read the HTIF `iconsole` register.
    fn read_htif_iconsole(&mut self) -> Result<u64, Self::Error>;

    /// Read the HTIF `iyield` register.
    fn read_htif_iyield(&mut self) -> Result<u64, Self::Error>;

    /// Read a dehashing-device control register.
    fn read_dhd_csr(&mut self, csr: DhdCsr) -> Result<u64, Self::Error>;

    /// Write a dehashing-device control register.
    fn write_dhd_csr(&mut self, csr: DhdCsr, val: u64) -> Result<(), Self::Error>;

    /// Read dehashing-device input hash word `index`.
    fn read_dhd_h(&mut self, index: usize) -> Result<u64, Self::Error>;

    /// Write dehashing-device input hash word `index`.
    fn write_dhd_h(&mut self, index: usize, val: u64) -> Result<(), Self::Error>;

    /// Resolve a hash to its pre-image block through the dehash source.
    fn dehash(&mut self, hash: &[u8], max_dlength: u64) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Read a byte of memory.
    fn read_memory_u8(&mut self, paddr: u64) -> Result<u8, Self::Error>;

    /// Read an aligned half-word of memory.
    fn read_memory_u16(&mut self, paddr: u64) -> Result<u16, Self::Error>;

    /// Read an aligned word of memory.
    fn read_memory_u32(&mut self, paddr: u64) -> Result<u32, Self::Error>;

    /// Read an aligned double-word of memory.
    fn read_memory_u64(&mut self, paddr: u64) -> Result<u64, Self::Error>;

    /// Write a byte of memory.
    fn write_memory_u8(&mut self, paddr: u64, val: u8) -> Result<(), Self::Error>;

    /// Write an aligned half-word of memory.
    fn write_memory_u16(&mut self, paddr: u64, val: u16) -> Result<(), Self::Error>;

    /// Write an aligned word of memory.
    fn write_memory_u32(&mut self, paddr: u64, val: u32) -> Result<(), Self::Error>;

    /// Write an aligned double-word of memory.
    fn write_memory_u64(&mut self, paddr: u64, val: u64) -> Result<(), Self::Error>;

    /// Write a power-of-two block of memory aligned to its own size.
    fn write_memory(&mut self, paddr: u64, data: &[u8], log2_size: u32)
        -> Result<(), Self::Error>;

    /// Read the packed `istart` word of PMA board entry `index`.
    fn read_pma_istart(&mut self, index: usize) -> Result<u64, Self::Error>;

    /// Read the `ilength` word of PMA board entry `index`.
    fn read_pma_ilength(&mut self, index: usize) -> Result<u64, Self::Error>;

    /// Find the PMA descriptor covering an access of `len` bytes at
    /// `paddr`.
    ///
    /// Walks the board in ascending index order until a covering entry or
    /// the zero-`ilength` sentinel is found; the sentinel entry itself is
    /// returned for unmapped addresses. The walk order is part of the
    /// logged behaviour: replays of logs produced by any other order fail.
    fn find_pma(&mut self, paddr: u64, len: u64) -> Result<PmaEntry, Self::Error>;
}
