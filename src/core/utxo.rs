//! Unspent output index
//!
//! The pool is derived entirely from the chain: it is rebuilt from scratch
//! whenever a block is appended. Lookups never mutate the pool. Entries that
//! no longer resolve to an output on the chain are reported as stale and
//! removed only through [`UtxoIndex::purge_stale`].

use crate::core::block::Block;
use crate::core::transaction::Output;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pool key for an output: `txid:output_index`
pub fn utxo_key(txid: &str, output_index: u32) -> String {
    format!("{}:{}", txid, output_index)
}

/// Pointer to one currently unspent output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Utxo {
    pub txid: String,
    pub block_index: u64,
    pub output_index: u32,
}

impl Utxo {
    pub fn key(&self) -> String {
        utxo_key(&self.txid, self.output_index)
    }

    /// Resolve the referenced output on the chain
    pub fn resolve<'b>(&self, blocks: &'b [Block]) -> Option<&'b Output> {
        let block = blocks.get(usize::try_from(self.block_index).ok()?)?;
        block
            .transaction(&self.txid)?
            .outputs
            .get(self.output_index as usize)
    }
}

/// A utxo joined with the value of its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoValue {
    pub utxo: Utxo,
    pub value: u64,
}

/// Result of an address lookup: the matches plus keys that failed to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoLookup<T> {
    pub items: Vec<T>,
    pub stale: Vec<String>,
}

impl<T> Default for UtxoLookup<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            stale: Vec::new(),
        }
    }
}

/// Unspent outputs keyed by `txid:output_index`
#[derive(Debug, Clone, Default)]
pub struct UtxoIndex {
    pool: HashMap<String, Utxo>,
    purged: u64,
}

impl UtxoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chain(blocks: &[Block]) -> Self {
        Self {
            pool: Self::rebuild(blocks),
            purged: 0,
        }
    }

    /// Derive the pool from the chain.
    ///
    /// Within each transaction the outputs it spends are retired before its
    /// own outputs are added, and an existing key is never re-added.
    pub fn rebuild(blocks: &[Block]) -> HashMap<String, Utxo> {
        let mut pool = HashMap::new();

        for (block_index, block) in blocks.iter().enumerate() {
            for (txid, tx) in &block.transactions {
                for input in &tx.inputs {
                    if pool.remove(&input.key()).is_none() {
                        debug!(
                            "Input {} of {} does not reference a live output",
                            input.key(),
                            txid
                        );
                    }
                }

                for output_index in 0..tx.outputs.len() as u32 {
                    pool.entry(utxo_key(txid, output_index))
                        .or_insert_with(|| Utxo {
                            txid: txid.clone(),
                            block_index: block_index as u64,
                            output_index,
                        });
                }
            }
        }

        pool
    }

    /// Re-derive the pool after the chain changed
    pub fn update(&mut self, blocks: &[Block]) {
        self.pool = Self::rebuild(blocks);
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pool.contains_key(key)
    }

    pub fn get(&self, txid: &str, output_index: u32) -> Option<&Utxo> {
        self.pool.get(&utxo_key(txid, output_index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.pool.values()
    }

    /// Number of stale entries removed so far
    pub fn purged_count(&self) -> u64 {
        self.purged
    }

    /// Utxos whose output pays `address`
    pub fn by_address(&self, blocks: &[Block], address: &str) -> UtxoLookup<Utxo> {
        let mut lookup = UtxoLookup::default();
        for (key, utxo) in &self.pool {
            match utxo.resolve(blocks) {
                Some(output) if output.is_owned_by(address) => lookup.items.push(utxo.clone()),
                Some(_) => {}
                None => lookup.stale.push(key.clone()),
            }
        }
        lookup
    }

    /// Utxos of `address` with their values, optionally largest first
    pub fn value_data(
        &self,
        blocks: &[Block],
        address: &str,
        sorted: bool,
    ) -> UtxoLookup<UtxoValue> {
        if address.is_empty() || blocks.is_empty() {
            return UtxoLookup::default();
        }

        let lookup = self.by_address(blocks, address);
        let mut items: Vec<UtxoValue> = lookup
            .items
            .into_iter()
            .filter_map(|utxo| {
                let value = utxo.resolve(blocks)?.value;
                Some(UtxoValue { utxo, value })
            })
            .collect();

        if sorted {
            // Ties fall back to chain position so selection is reproducible
            items.sort_by(|a, b| {
                b.value
                    .cmp(&a.value)
                    .then_with(|| a.utxo.block_index.cmp(&b.utxo.block_index))
                    .then_with(|| a.utxo.txid.cmp(&b.utxo.txid))
                    .then_with(|| a.utxo.output_index.cmp(&b.utxo.output_index))
            });
        }

        UtxoLookup {
            items,
            stale: lookup.stale,
        }
    }

    /// Remove entries a lookup reported as stale. Returns how many were removed.
    pub fn purge_stale(&mut self, keys: &[String]) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.pool.remove(key).is_some() {
                warn!("Invalid UTXO {} encountered, removed from the pool", key);
                removed += 1;
            }
        }
        self.purged += removed as u64;
        removed
    }
}
