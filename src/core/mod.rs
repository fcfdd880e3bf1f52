//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Addresses (checksummed, one variant per transaction type)
//! - Transactions (UTXO model with greedy input selection)
//! - Unspent output index
//! - Blocks (with proof of work)
//! - Blockchain (admission, mining, validation)

pub mod address;
pub mod block;
pub mod blockchain;
pub mod transaction;
pub mod utxo;

pub use address::{derive_address, split_address, verify_address, Address, TransactionType};
pub use block::{Block, BlockError};
pub use blockchain::{
    Blockchain, BlockchainError, ChainFault, ChainStats, DropReason, LedgerConfig, MineOutcome,
    MinedBlock, BLOCK_REWARD, BLOCK_TRANSACTIONS_LIMIT, DEFAULT_DIFFICULTY, HALVING_INTERVAL,
};
pub use transaction::{
    Destination, Input, Output, Transaction, TransactionBuilder, TransactionError,
};
pub use utxo::{utxo_key, Utxo, UtxoIndex, UtxoLookup, UtxoValue};
