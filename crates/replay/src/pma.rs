//! Physical memory attribute records.
//!
//! Each PMA board entry packs its range and flags into two words. The
//! `istart` word carries the 4 KiB-aligned start address in its high bits
//! and the flags in its low 12 bits; `ilength` is the range length in
//! bytes. A zero `ilength` terminates the board.
//!
//! During replay, descriptors are synthesised from board words read out of
//! the access log and parked in a bounded pool sized to the machine's
//! maximum PMA count; running past it indicates a corrupted log.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::PMA_MAX;

const PMA_ISTART_M_MASK: u64 = 1 << 0;
const PMA_ISTART_IO_MASK: u64 = 1 << 1;
const PMA_ISTART_E_MASK: u64 = 1 << 2;
const PMA_ISTART_R_MASK: u64 = 1 << 3;
const PMA_ISTART_W_MASK: u64 = 1 << 4;
const PMA_ISTART_X_MASK: u64 = 1 << 5;
const PMA_ISTART_IR_MASK: u64 = 1 << 6;
const PMA_ISTART_IW_MASK: u64 = 1 << 7;
const PMA_ISTART_DID_SHIFT: u32 = 8;
const PMA_ISTART_DID_MASK: u64 = 0xF << PMA_ISTART_DID_SHIFT;
const PMA_ISTART_START_MASK: u64 = !0xFFF;

/// Start address packed in an `istart` board word.
#[inline]
pub const fn istart_start(istart: u64) -> u64 {
    istart & PMA_ISTART_START_MASK
}

/// Errors raised while reassembling a PMA descriptor from board words.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PmaError {
    #[error("multiple M/IO/E set")]
    NotOneHot,

    #[error("invalid DID {did} for M")]
    BadMemoryDevice { did: u64 },

    #[error("invalid DID {did} for IO")]
    BadIoDevice { did: u64 },
}

/// What a PMA range maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmaKind {
    /// Plain memory backed by pages.
    Memory,
    /// A memory-mapped device.
    Device,
    /// Unmapped address space.
    Empty,
}

/// Device or backing identifier of a PMA range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmaDeviceId {
    #[default]
    Memory = 0,
    Drive = 1,
    Shadow = 2,
    Clint = 3,
    Plic = 4,
    Htif = 5,
    Dhd = 6,
}

impl PmaDeviceId {
    fn from_bits(did: u64) -> Option<Self> {
        match did {
            0 => Some(PmaDeviceId::Memory),
            1 => Some(PmaDeviceId::Drive),
            2 => Some(PmaDeviceId::Shadow),
            3 => Some(PmaDeviceId::Clint),
            4 => Some(PmaDeviceId::Plic),
            5 => Some(PmaDeviceId::Htif),
            6 => Some(PmaDeviceId::Dhd),
            _ => None,
        }
    }
}

/// Access flags of a PMA range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmaFlags {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub idempotent_read: bool,
    pub idempotent_write: bool,
    pub device_id: PmaDeviceId,
}

/// A physical memory attribute descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmaEntry {
    start: u64,
    length: u64,
    kind: PmaKind,
    flags: PmaFlags,
}

impl PmaEntry {
    /// Assemble a descriptor, validating the kind/device combination.
    pub fn new(start: u64, length: u64, kind: PmaKind, flags: PmaFlags) -> Result<Self, PmaError> {
        match kind {
            PmaKind::Memory => {
                if !matches!(flags.device_id, PmaDeviceId::Memory | PmaDeviceId::Drive) {
                    return Err(PmaError::BadMemoryDevice {
                        did: flags.device_id as u64,
                    });
                }
            }
            PmaKind::Device => {
                if matches!(flags.device_id, PmaDeviceId::Memory | PmaDeviceId::Drive) {
                    return Err(PmaError::BadIoDevice {
                        did: flags.device_id as u64,
                    });
                }
            }
            PmaKind::Empty => {}
        }
        Ok(Self {
            start,
            length,
            kind,
            flags,
        })
    }

    /// Reassemble a descriptor from its packed board words.
    ///
    /// Exactly one of the M/IO/E bits must be set, and the device id must
    /// be consistent with it.
    pub fn from_board(istart: u64, ilength: u64) -> Result<Self, PmaError> {
        let memory = istart & PMA_ISTART_M_MASK != 0;
        let device = istart & PMA_ISTART_IO_MASK != 0;
        let empty = istart & PMA_ISTART_E_MASK != 0;
        if memory as u8 + device as u8 + empty as u8 != 1 {
            return Err(PmaError::NotOneHot);
        }
        let did_bits = (istart & PMA_ISTART_DID_MASK) >> PMA_ISTART_DID_SHIFT;
        let kind = if memory {
            PmaKind::Memory
        } else if device {
            PmaKind::Device
        } else {
            PmaKind::Empty
        };
        let device_id = match PmaDeviceId::from_bits(did_bits) {
            Some(id) => id,
            None if kind == PmaKind::Memory => return Err(PmaError::BadMemoryDevice { did: did_bits }),
            None if kind == PmaKind::Device => return Err(PmaError::BadIoDevice { did: did_bits }),
            None => PmaDeviceId::default(),
        };
        let flags = PmaFlags {
            readable: istart & PMA_ISTART_R_MASK != 0,
            writable: istart & PMA_ISTART_W_MASK != 0,
            executable: istart & PMA_ISTART_X_MASK != 0,
            idempotent_read: istart & PMA_ISTART_IR_MASK != 0,
            idempotent_write: istart & PMA_ISTART_IW_MASK != 0,
            device_id,
        };
        Self::new(istart & PMA_ISTART_START_MASK, ilength, kind, flags)
    }

    /// Pack the descriptor back into its `istart` board word.
    pub fn istart(&self) -> u64 {
        let mut word = self.start & PMA_ISTART_START_MASK;
        word |= match self.kind {
            PmaKind::Memory => PMA_ISTART_M_MASK,
            PmaKind::Device => PMA_ISTART_IO_MASK,
            PmaKind::Empty => PMA_ISTART_E_MASK,
        };
        if self.flags.readable {
            word |= PMA_ISTART_R_MASK;
        }
        if self.flags.writable {
            word |= PMA_ISTART_W_MASK;
        }
        if self.flags.executable {
            word |= PMA_ISTART_X_MASK;
        }
        if self.flags.idempotent_read {
            word |= PMA_ISTART_IR_MASK;
        }
        if self.flags.idempotent_write {
            word |= PMA_ISTART_IW_MASK;
        }
        word |= (self.flags.device_id as u64) << PMA_ISTART_DID_SHIFT;
        word
    }

    /// The `ilength` board word.
    pub fn ilength(&self) -> u64 {
        self.length
    }

    /// Start address of the range.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Length of the range in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// What the range maps to.
    pub fn kind(&self) -> PmaKind {
        self.kind
    }

    /// Access flags.
    pub fn flags(&self) -> &PmaFlags {
        &self.flags
    }

    /// Whether an access of `len` bytes at `paddr` falls inside the range.
    pub fn contains(&self, paddr: u64, len: u64) -> bool {
        self.length >= len && paddr >= self.start && paddr - self.start <= self.length - len
    }
}

/// Bounded pool of descriptors synthesised during replay.
///
/// Capacity equals the machine's maximum PMA count; exhausting it means
/// the log drove more descriptor synthesis than any honest machine could.
#[derive(Clone, Debug)]
pub struct MockPmaPool {
    entries: Vec<PmaEntry>,
    capacity: usize,
}

impl MockPmaPool {
    /// Pool with the machine's PMA capacity.
    pub fn new() -> Self {
        Self::with_capacity(PMA_MAX)
    }

    /// Pool with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Park a descriptor in the pool. `None` means the pool is full.
    pub fn allocate(&mut self, entry: PmaEntry) -> Option<PmaEntry> {
        if self.entries.len() == self.capacity {
            return None;
        }
        self.entries.push(entry);
        Some(entry)
    }

    /// Number of descriptors allocated so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no descriptor has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MockPmaPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ram_flags() -> PmaFlags {
        PmaFlags {
            readable: true,
            writable: true,
            executable: true,
            idempotent_read: true,
            idempotent_write: true,
            device_id: PmaDeviceId::Memory,
        }
    }

    #[test]
    fn test_board_round_trip() {
        let entry = PmaEntry::new(0x8000_0000, 0x10_0000, PmaKind::Memory, ram_flags()).unwrap();
        let back = PmaEntry::from_board(entry.istart(), entry.ilength()).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn test_one_hot_is_enforced() {
        // M and IO both set.
        let istart = 0x8000_0000u64 | 0b011;
        assert_eq!(
            PmaEntry::from_board(istart, 0x1000),
            Err(PmaError::NotOneHot)
        );
        // None set.
        assert_eq!(
            PmaEntry::from_board(0x8000_0000, 0x1000),
            Err(PmaError::NotOneHot)
        );
    }

    #[test]
    fn test_device_id_is_checked_against_kind() {
        // IO range claiming to be plain memory.
        let istart = 0x4000_8000u64 | PMA_ISTART_IO_MASK;
        assert_eq!(
            PmaEntry::from_board(istart, 0x1000),
            Err(PmaError::BadIoDevice { did: 0 })
        );
        // Memory range claiming a device id.
        let istart = 0x8000_0000u64
            | PMA_ISTART_M_MASK
            | ((PmaDeviceId::Htif as u64) << PMA_ISTART_DID_SHIFT);
        assert_eq!(
            PmaEntry::from_board(istart, 0x1000),
            Err(PmaError::BadMemoryDevice { did: 5 })
        );
        // Unknown device id.
        let istart = 0x4000_8000u64 | PMA_ISTART_IO_MASK | (0xF << PMA_ISTART_DID_SHIFT);
        assert_eq!(
            PmaEntry::from_board(istart, 0x1000),
            Err(PmaError::BadIoDevice { did: 0xF })
        );
    }

    #[test]
    fn test_contains() {
        let entry = PmaEntry::new(0x8000_0000, 0x1000, PmaKind::Memory, ram_flags()).unwrap();
        assert!(entry.contains(0x8000_0000, 8));
        assert!(entry.contains(0x8000_0FF8, 8));
        assert!(!entry.contains(0x8000_0FFC, 8));
        assert!(!entry.contains(0x7FFF_FFF8, 8));
    }

    #[test]
    fn test_pool_exhaustion() {
        let entry = PmaEntry::new(0x8000_0000, 0x1000, PmaKind::Memory, ram_flags()).unwrap();
        let mut pool = MockPmaPool::with_capacity(2);
        assert!(pool.allocate(entry).is_some());
        assert!(pool.allocate(entry).is_some());
        assert!(pool.allocate(entry).is_none());
        assert_eq!(pool.len(), 2);
    }
}
