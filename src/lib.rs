//! UTXO Ledger: a single-process proof-of-work ledger in Rust
//!
//! This crate provides:
//! - Checksummed addresses derived from hashed public keys
//! - UTXO-based transactions with greedy input selection and change
//! - An unspent output index rebuilt from the chain
//! - A fee-ordered pending pool
//! - Proof-of-work block sealing and chain integrity validation
//!
//! # Example
//!
//! ```rust
//! use utxo_ledger::core::{Address, Blockchain, Destination, LedgerConfig, TransactionType};
//! use utxo_ledger::crypto::KeyPair;
//!
//! let alice = KeyPair::generate();
//! let alice_address = Address::new(&alice.hashed_public_key());
//! let bob = Address::new(&KeyPair::generate().hashed_public_key());
//!
//! // The genesis coinbase pays alice
//! let mut ledger = Blockchain::new(LedgerConfig::with_difficulty(1), &alice_address.pub_address)
//!     .unwrap();
//!
//! let txid = ledger
//!     .admit(
//!         &alice_address.pub_address,
//!         &alice.public_key_hex(),
//!         |msg| alice.sign(msg),
//!         1,
//!         &[Destination::new(5, &bob.pub_address, &bob.p2pkh)],
//!         TransactionType::P2pkh,
//!     )
//!     .unwrap();
//! assert!(ledger.mempool().contains(&txid));
//! assert!(ledger.validate());
//! ```

pub mod core;
pub mod crypto;
pub mod mining;

// Re-export commonly used types
pub use core::{
    Address, Block, Blockchain, BlockchainError, Destination, LedgerConfig, MineOutcome,
    Transaction, TransactionType, UtxoIndex, BLOCK_REWARD, DEFAULT_DIFFICULTY,
};
pub use crypto::KeyPair;
pub use mining::{Mempool, MempoolEntry};
