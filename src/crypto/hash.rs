//! Cryptographic hashing utilities for the ledger
//!
//! Provides SHA-256 based hashing functions used for block hashes,
//! transaction IDs, and address checksums.

use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256(&sha256(data))
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Computes the SHA-256 of the hex digest of the SHA-256 of `data`.
///
/// Address checksums and transaction IDs hash the textual digest a second
/// time, so the intermediate value is the lowercase hex string rather than
/// the raw 32 bytes.
pub fn double_sha256_hex(data: &[u8]) -> String {
    sha256_hex(sha256_hex(data).as_bytes())
}

/// Checks if a hex-encoded hash meets the difficulty target.
/// The hash must start with `difficulty` `'0'` characters.
pub fn meets_difficulty(hash_hex: &str, difficulty: u32) -> bool {
    let required = difficulty as usize;
    hash_hex.len() >= required && hash_hex.bytes().take(required).all(|c| c == b'0')
}
