//! Checksum-verifiable addresses
//!
//! An address is `tag + hashed_pubkey + checksum`, where the checksum is the
//! first four hex characters of the double hash of `tag + hashed_pubkey`.
//! Each transaction type has its own tag, so one key yields five addresses.

use crate::crypto::double_sha256_hex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of hex characters in an address checksum
pub const CHECKSUM_LEN: usize = 4;

/// Destination type of a transaction; determines the address tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    P2pkh,
    Pk,
    MultiSig,
    P2sh,
    OpReturn,
}

impl TransactionType {
    pub const ALL: [TransactionType; 5] = [
        TransactionType::P2pkh,
        TransactionType::Pk,
        TransactionType::MultiSig,
        TransactionType::P2sh,
        TransactionType::OpReturn,
    ];

    /// Prefix prepended to the hashed public key
    pub fn tag(&self) -> &'static str {
        match self {
            TransactionType::P2pkh => "PayToPublicKeyHash",
            TransactionType::Pk => "PublicKey",
            TransactionType::MultiSig => "MultiSignature",
            TransactionType::P2sh => "PayToScriptHash",
            TransactionType::OpReturn => "DataOutput",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Build the full address and its checksum for a type and hashed public key
pub fn derive_address(tx_type: TransactionType, hashed_pub_key: &str) -> (String, String) {
    let prefixed = format!("{}{}", tx_type.tag(), hashed_pub_key);
    let checksum: String = double_sha256_hex(prefixed.as_bytes())
        .chars()
        .take(CHECKSUM_LEN)
        .collect();
    (format!("{}{}", prefixed, checksum), checksum)
}

/// Split a claimed address into its body and trailing checksum.
/// Returns `None` when the address is too short to carry a checksum.
pub fn split_address(claimed: &str) -> Option<(&str, &str)> {
    if !claimed.is_ascii() || claimed.len() < CHECKSUM_LEN {
        return None;
    }
    Some(claimed.split_at(claimed.len() - CHECKSUM_LEN))
}

/// Check that `claimed` is the address derived from `hashed_pub_key` for `tx_type`.
///
/// Both the trailing checksum and the body (tag + payload) must match, so a
/// change anywhere in the claimed string is rejected.
pub fn verify_address(tx_type: TransactionType, hashed_pub_key: &str, claimed: &str) -> bool {
    let Some((body, checksum)) = split_address(claimed) else {
        return false;
    };
    let (full, expected_checksum) = derive_address(tx_type, hashed_pub_key);
    checksum == expected_checksum && full.len() == claimed.len() && full.starts_with(body)
}

/// All address variants derived from one hashed public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub p2pkh: String,
    pub pk: String,
    pub multi_sig: String,
    pub p2sh: String,
    pub op_return: String,
    /// The bare hashed public key; outputs are paid to this value
    pub pub_address: String,
}

impl Address {
    pub fn new(hashed_pub_key: &str) -> Self {
        let full = |t| derive_address(t, hashed_pub_key).0;
        Self {
            p2pkh: full(TransactionType::P2pkh),
            pk: full(TransactionType::Pk),
            multi_sig: full(TransactionType::MultiSig),
            p2sh: full(TransactionType::P2sh),
            op_return: full(TransactionType::OpReturn),
            pub_address: hashed_pub_key.to_string(),
        }
    }

    /// The full address for a given transaction type
    pub fn variant(&self, tx_type: TransactionType) -> &str {
        match tx_type {
            TransactionType::P2pkh => &self.p2pkh,
            TransactionType::Pk => &self.pk,
            TransactionType::MultiSig => &self.multi_sig,
            TransactionType::P2sh => &self.p2sh,
            TransactionType::OpReturn => &self.op_return,
        }
    }
}
