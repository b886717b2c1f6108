//! Cache id normalization.

use sha2::{Digest, Sha256};

/// Longest cid stored verbatim in a bin table.
pub const MAX_CID_LEN: usize = 255;

/// Normalize a cid so it fits in a bin table's primary key.
///
/// Short cids pass through unchanged. Longer ones keep a readable prefix
/// followed by the SHA-256 hex digest of the full cid, for a total of
/// [`MAX_CID_LEN`] bytes at most.
pub fn normalize_cid(cid: &str) -> String {
    if cid.len() <= MAX_CID_LEN {
        return cid.to_string();
    }

    let digest = hex::encode(Sha256::digest(cid.as_bytes()));
    let mut cut = MAX_CID_LEN - digest.len();
    while !cid.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &cid[..cut], digest)
}
