//! Content hashing and derived identifiers.
//!
//! Items are deduplicated by a SHA-256 over their canonical content. The
//! short 10-hex-char prefix is what gets stored on the record and compared
//! for change detection; the full digest disambiguates prefix collisions.

use base32::Alphabet;
use sha2::{Digest, Sha256};

/// Length of the short content-hash prefix stored on records.
pub const SHORT_HASH_LEN: usize = 10;

/// Number of base32 characters in an auto-generated id (after the `%`).
const AUTO_ID_LEN: usize = 7;

/// Full SHA-256 of the content, lowercase hex (64 chars).
pub fn content_hash_full(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Short change-detection prefix of a full hash.
pub fn short_hash(full: &str) -> String {
    full.chars().take(SHORT_HASH_LEN).collect()
}

/// Auto-generated item id: `%` + short lowercase base32 of the hash bytes.
pub fn auto_id(content_hash_full: &str) -> String {
    let bytes = hex_decode(content_hash_full);
    let encoded = base32::encode(Alphabet::RFC4648 { padding: false }, &bytes).to_lowercase();
    format!("%{}", &encoded[..AUTO_ID_LEN.min(encoded.len())])
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(hex: &str) -> Vec<u8> {
    hex.as_bytes()
        .chunks(2)
        .filter_map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}
