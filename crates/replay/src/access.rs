//! Typed access records and logs.
//!
//! Every interaction between the interpreter and machine state is a word
//! (or larger, power-of-two) read or write at an aligned physical address.
//! A log is the ordered record of those accesses over some number of
//! interpreter steps, optionally carrying one Merkle inclusion proof per
//! access.

use remu_merkle::{Hash, MerkleProof};
use serde::{Deserialize, Serialize};

/// Whether an access read or wrote machine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    Read,
    Write,
}

/// A single access to machine state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    /// Whether the access read or wrote.
    pub access_type: AccessType,
    /// Physical address, aligned to the access size.
    pub address: u64,
    /// Log2 of the access size in bytes, in `[3, 63]`.
    pub log2_size: u32,
    /// Data found at the address before the access.
    pub read: Vec<u8>,
    /// Data in place after the access; `None` for reads.
    pub written: Option<Vec<u8>>,
    /// Proof of the pre-access data against the pre-access root, when the
    /// log carries proofs.
    pub proof: Option<MerkleProof>,
}

/// Which optional payloads a log carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogType {
    pub has_proofs: bool,
    pub has_annotations: bool,
    pub has_large_data: bool,
}

impl LogType {
    const HAS_PROOFS_BIT: u8 = 1 << 0;
    const HAS_ANNOTATIONS_BIT: u8 = 1 << 1;
    const HAS_LARGE_DATA_BIT: u8 = 1 << 2;

    /// Pack into the wire bitfield.
    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.has_proofs {
            byte |= Self::HAS_PROOFS_BIT;
        }
        if self.has_annotations {
            byte |= Self::HAS_ANNOTATIONS_BIT;
        }
        if self.has_large_data {
            byte |= Self::HAS_LARGE_DATA_BIT;
        }
        byte
    }

    /// Unpack from the wire bitfield. Unknown bits are ignored.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            has_proofs: byte & Self::HAS_PROOFS_BIT != 0,
            has_annotations: byte & Self::HAS_ANNOTATIONS_BIT != 0,
            has_large_data: byte & Self::HAS_LARGE_DATA_BIT != 0,
        }
    }
}

/// An ordered record of state accesses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLog {
    /// Which optional payloads the records carry.
    pub log_type: LogType,
    /// Root hash of the machine state before the first access.
    pub root_hash_before: Hash,
    /// The accesses, in execution order.
    pub accesses: Vec<Access>,
    /// Free-form annotations keyed by access index. In-memory only, never
    /// serialised.
    #[serde(skip)]
    pub notes: Vec<(usize, String)>,
}

impl AccessLog {
    /// Empty log over the given pre-state root.
    pub fn new(log_type: LogType, root_hash_before: Hash) -> Self {
        Self {
            log_type,
            root_hash_before,
            accesses: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Number of accesses recorded.
    pub fn len(&self) -> usize {
        self.accesses.len()
    }

    /// Whether the log holds no accesses.
    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }

    /// Append an access record.
    pub fn push_access(&mut self, access: Access) {
        self.accesses.push(access);
    }

    /// Annotate the access at `index`, if the log keeps annotations.
    pub fn push_note(&mut self, index: usize, text: impl Into<String>) {
        if self.log_type.has_annotations {
            self.notes.push((index, text.into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_type_bitfield_round_trip() {
        for bits in 0u8..8 {
            let log_type = LogType::from_byte(bits);
            assert_eq!(log_type.to_byte(), bits);
        }
        assert_eq!(LogType::from_byte(0xF8), LogType::default());
    }

    #[test]
    fn test_notes_respect_log_type() {
        let mut log = AccessLog::new(LogType::default(), [0; 32]);
        log.push_note(0, "pc");
        assert!(log.notes.is_empty());

        let mut log = AccessLog::new(
            LogType {
                has_annotations: true,
                ..LogType::default()
            },
            [0; 32],
        );
        log.push_note(0, "pc");
        assert_eq!(log.notes.len(), 1);
    }
}
