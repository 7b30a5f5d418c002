//! Dehash source: resolves a hash back to the data block that produced it.
//!
//! The dehashing device exposes hash-addressed storage to the machine. The
//! device itself lives outside this crate; state accessors only need a way
//! to ask some backing store for the pre-image of a hash.

/// Sentinel length reported by the device when no block with the requested
/// hash exists.
pub const DHD_NOT_FOUND: u64 = u64::MAX;

/// Backing store capable of resolving hashes to data blocks.
pub trait DehashSource {
    /// Obtain the block of data that has the given hash, bounded by
    /// `max_dlength` bytes. Returns `None` when no matching block exists.
    fn dehash(&mut self, hash: &[u8], max_dlength: u64) -> Option<Vec<u8>>;
}
