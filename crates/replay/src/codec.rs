//! Byte-exact serialisation of access logs.
//!
//! A log is a 1-byte log-type bitfield and the 32-byte pre-replay root
//! hash, followed by the concatenated access records:
//!
//! - `kind`: 1 byte (0 read, 1 write)
//! - `address`: 8 bytes big-endian
//! - `log2_size`: 1 byte, in `[3, 63]`
//! - `read`: `2^log2_size` bytes
//! - `written`: `2^log2_size` bytes, writes only
//! - proof record, when the log carries proofs: target address (8 bytes
//!   big-endian), target and root log2 sizes (1 byte each), target and
//!   root hashes (32 bytes each), then one 32-byte sibling per level from
//!   the target up to the root
//!
//! There is no record count; decoding consumes the input to its end.
//! Annotations are never serialised.

use remu_merkle::{Hash, MerkleProof, HASH_SIZE};

use crate::access::{Access, AccessLog, AccessType, LogType};
use crate::error::CodecError;

impl AccessLog {
    /// Serialise the log.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.log_type.to_byte());
        out.extend_from_slice(&self.root_hash_before);
        for access in &self.accesses {
            encode_access(&mut out, access, self.log_type.has_proofs);
        }
        out
    }

    /// Decode a serialised log, consuming the entire input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader { buf: bytes, pos: 0 };
        let log_type = LogType::from_byte(reader.u8("log type")?);
        let root_hash_before = reader.hash("root hash")?;
        let mut log = AccessLog::new(log_type, root_hash_before);
        while !reader.is_empty() {
            log.push_access(decode_access(&mut reader, log_type.has_proofs)?);
        }
        Ok(log)
    }
}

fn encode_access(out: &mut Vec<u8>, access: &Access, with_proof: bool) {
    out.push(match access.access_type {
        AccessType::Read => 0,
        AccessType::Write => 1,
    });
    out.extend_from_slice(&access.address.to_be_bytes());
    out.push(access.log2_size as u8);
    out.extend_from_slice(&access.read);
    if let Some(written) = &access.written {
        out.extend_from_slice(written);
    }
    if with_proof {
        if let Some(proof) = &access.proof {
            encode_proof(out, proof);
        }
    }
}

fn encode_proof(out: &mut Vec<u8>, proof: &MerkleProof) {
    out.extend_from_slice(&proof.target_address().to_be_bytes());
    out.push(proof.log2_target_size() as u8);
    out.push(proof.log2_root_size() as u8);
    out.extend_from_slice(proof.target_hash());
    out.extend_from_slice(proof.root_hash());
    for sibling in proof.sibling_hashes() {
        out.extend_from_slice(sibling);
    }
}

fn decode_access(reader: &mut Reader<'_>, with_proof: bool) -> Result<Access, CodecError> {
    let access_type = match reader.u8("access type")? {
        0 => AccessType::Read,
        1 => AccessType::Write,
        value => return Err(CodecError::InvalidAccessType { value }),
    };
    let address = reader.u64("access address")?;
    let log2_size = reader.u8("access log2 size")?;
    if !(3..=63).contains(&log2_size) {
        return Err(CodecError::InvalidLog2Size { value: log2_size });
    }
    let len = 1usize << log2_size;
    let read = reader.take(len, "read data")?.to_vec();
    let written = match access_type {
        AccessType::Read => None,
        AccessType::Write => Some(reader.take(len, "written data")?.to_vec()),
    };
    let proof = if with_proof {
        Some(decode_proof(reader)?)
    } else {
        None
    };
    Ok(Access {
        access_type,
        address,
        log2_size: log2_size as u32,
        read,
        written,
        proof,
    })
}

fn decode_proof(reader: &mut Reader<'_>) -> Result<MerkleProof, CodecError> {
    let target_address = reader.u64("proof target address")?;
    let log2_target_size = reader.u8("proof target log2 size")?;
    let log2_root_size = reader.u8("proof root log2 size")?;
    if log2_root_size > 64 || log2_target_size > log2_root_size {
        return Err(CodecError::InvalidProofGeometry {
            log2_target_size,
            log2_root_size,
        });
    }
    let target_hash = reader.hash("proof target hash")?;
    let root_hash = reader.hash("proof root hash")?;
    let mut sibling_hashes = Vec::with_capacity((log2_root_size - log2_target_size) as usize);
    for _ in log2_target_size..log2_root_size {
        sibling_hashes.push(reader.hash("proof sibling hash")?);
    }
    MerkleProof::from_parts(
        target_address,
        log2_target_size as u32,
        log2_root_size as u32,
        target_hash,
        root_hash,
        sibling_hashes,
    )
    .map_err(|_| CodecError::InvalidProofGeometry {
        log2_target_size,
        log2_root_size,
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if self.buf.len() - self.pos < len {
            return Err(CodecError::UnexpectedEof { what });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, what)?[0])
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, CodecError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_be_bytes(bytes))
    }

    fn hash(&mut self, what: &'static str) -> Result<Hash, CodecError> {
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(self.take(HASH_SIZE, what)?);
        Ok(hash)
    }
}
