//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 hashing and the proof-of-work target check
//! - ECDSA key management (secp256k1) used as the signing capability

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, double_sha256_hex, meets_difficulty, sha256, sha256_hex};
pub use keys::{
    hash_public_key, public_key_from_hex, sign_message, verify_signature, KeyError, KeyPair,
};
