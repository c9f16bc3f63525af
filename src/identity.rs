//! Stable 63-bit URL identity.
//!
//! Lookup rows are keyed by this hash rather than an autoincrement id so that
//! the same URL maps to the same row across jobs and across processes. The
//! width is 63 bits (not 64) so the value fits signed integer columns on
//! every supported backend. Changing this function is a schema migration.

use sha3::{Digest, Sha3_256};

/// Reserved id of the null-URL sentinel row (the back lookup of root tasks).
pub const NULL_URL_ID: i64 = 1;

/// Hash a URL (or any string) to its persistent 63-bit identity.
///
/// `None` maps to [`NULL_URL_ID`].
pub fn string_hash_63(string: Option<&str>) -> i64 {
    let Some(string) = string else {
        return NULL_URL_ID;
    };
    let digest = Sha3_256::digest(string.as_bytes());
    let mut top = [0u8; 8];
    top.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(top) >> 1) as i64
}
