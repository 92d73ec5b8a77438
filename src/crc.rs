//! Streaming CRC32 used to check firmware images
//!
//! The checksum is the usual IEEE 802.3 CRC32. It is computed in pieces as the
//! image is read: pass the running value back in as `seed` and set `finalize`
//! only on the last piece.

use crc32fast::Hasher;

/// Initial value of a running checksum
pub const CRC_SEED: u32 = 0xFFFF_FFFF;

/// Feed `buf` into a running checksum
///
/// Returns the new running value, or the final checksum if `finalize` is set.
pub fn crc32_chunk(buf: &[u8], seed: u32, finalize: bool) -> u32 {
    // The hasher takes and returns finalized values, the running value is not
    let mut hasher = Hasher::new_with_initial(!seed);
    hasher.update(buf);

    if finalize {
        hasher.finalize()
    } else {
        !hasher.finalize()
    }
}
