//! Block implementation for the ledger
//!
//! A block holds a set of transactions keyed by txid, a pointer to the
//! previous block's hash, a timestamp and the proof-of-work nonce.

use crate::core::transaction::Transaction;
use crate::crypto::{meets_difficulty, sha256_hex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Block errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("No nonce satisfied the difficulty after {attempts} attempts")]
    NonceExhausted { attempts: u64 },
}

/// A block in the chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Hash of the previous block, empty for genesis
    pub prev_hash: String,
    /// Transactions keyed by txid
    pub transactions: BTreeMap<String, Transaction>,
    pub timestamp: DateTime<Utc>,
    /// Nonce used for proof of work
    pub nonce: u64,
    /// Block hash (cached; recomputable with `calculate_hash`)
    pub hash: String,
}

impl Block {
    /// Create a new block (unmined)
    pub fn new(prev_hash: &str, transactions: Vec<Transaction>, timestamp: DateTime<Utc>) -> Self {
        let mut block = Self {
            prev_hash: prev_hash.to_string(),
            transactions: transactions
                .into_iter()
                .map(|tx| (tx.txid.clone(), tx))
                .collect(),
            timestamp,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Hash of `(prev_hash, timestamp, transactions, nonce)`
    pub fn calculate_hash(&self) -> String {
        let transactions = serde_json::to_string(&self.transactions)
            .expect("string-keyed transaction map always serializes");
        let data = format!(
            "{} {} {} {}",
            self.prev_hash,
            self.timestamp.timestamp_millis(),
            transactions,
            self.nonce
        );
        sha256_hex(data.as_bytes())
    }

    /// Mine the block: try nonces 0, 1, 2, ... until the hash starts with
    /// `difficulty` zero hex digits. Returns the number of hashes computed.
    ///
    /// Without `max_attempts` the search only ends when a nonce is found.
    pub fn mine(&mut self, difficulty: u32, max_attempts: Option<u64>) -> Result<u64, BlockError> {
        let mut attempts = 0u64;
        self.nonce = 0;

        loop {
            if max_attempts.is_some_and(|limit| attempts >= limit) {
                return Err(BlockError::NonceExhausted { attempts });
            }

            self.hash = self.calculate_hash();
            attempts += 1;

            if self.is_valid_pow(difficulty) {
                return Ok(attempts);
            }

            self.nonce = self
                .nonce
                .checked_add(1)
                .ok_or(BlockError::NonceExhausted { attempts })?;
        }
    }

    /// Check if the stored hash meets the difficulty target
    pub fn is_valid_pow(&self, difficulty: u32) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }

    /// Verify the stored hash against the block contents
    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn transaction(&self, txid: &str) -> Option<&Transaction> {
        self.transactions.get(txid)
    }

    /// Get the coinbase transaction
    pub fn coinbase_tx(&self) -> Option<&Transaction> {
        self.transactions.values().find(|tx| tx.is_coinbase)
    }

    /// Fees paid by the block's non-coinbase transactions
    pub fn total_fees(&self) -> u64 {
        self.transactions
            .values()
            .filter(|tx| !tx.is_coinbase)
            .map(|tx| tx.transaction_fee)
            .sum()
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}
