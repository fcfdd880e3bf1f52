//! Pending-transaction pool
//!
//! Holds signed, not-yet-mined transactions ordered by descending fee.
//! Entries with equal fees keep their arrival order.

use crate::core::Transaction;

/// Entry in the mempool with metadata
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    /// The transaction
    pub tx: Transaction,
    /// Hex public key the miner verifies the signature against
    pub input_pub_key: String,
}

impl MempoolEntry {
    pub fn new(tx: Transaction, input_pub_key: &str) -> Self {
        Self {
            tx,
            input_pub_key: input_pub_key.to_string(),
        }
    }

    pub fn fee(&self) -> u64 {
        self.tx.transaction_fee
    }
}

/// Memory pool for pending transactions, highest fee first
#[derive(Debug, Default)]
pub struct Mempool {
    entries: Vec<MempoolEntry>,
}

impl Mempool {
    /// Create a new mempool
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert by descending fee, scanning from the tail.
    /// The entry lands directly after the last entry whose fee is at least its own.
    pub fn push(&mut self, entry: MempoolEntry) {
        let fee = entry.fee();
        let pos = self
            .entries
            .iter()
            .rposition(|e| e.fee() >= fee)
            .map_or(0, |i| i + 1);
        self.entries.insert(pos, entry);
    }

    /// The first `n` entries, highest fee first, without removing them
    pub fn peek(&self, n: usize) -> &[MempoolEntry] {
        &self.entries[..n.min(self.entries.len())]
    }

    /// Remove and return the first `n` entries
    pub fn drain(&mut self, n: usize) -> Vec<MempoolEntry> {
        let n = n.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, txid: &str) -> Option<&Transaction> {
        self.entries.iter().map(|e| &e.tx).find(|tx| tx.txid == txid)
    }

    /// Check if a transaction is in the pool
    pub fn contains(&self, txid: &str) -> bool {
        self.get_transaction(txid).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.iter()
    }

    /// Get the number of pending transactions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all transactions
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get total fees of all transactions
    pub fn total_fees(&self) -> u64 {
        self.entries.iter().map(|e| e.fee()).sum()
    }

    /// Get mempool statistics
    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            tx_count: self.entries.len(),
            total_fees: self.total_fees(),
            max_fee: self.entries.first().map(|e| e.fee()).unwrap_or(0),
            min_fee: self.entries.last().map(|e| e.fee()).unwrap_or(0),
        }
    }
}

/// Mempool statistics
#[derive(Debug, Clone)]
pub struct MempoolStats {
    pub tx_count: usize,
    pub total_fees: u64,
    pub max_fee: u64,
    pub min_fee: u64,
}

// =============================================================================
// Tests
// =============================================================================
