//! Ledger implementation
//!
//! `Blockchain` owns the chain, the unspent output index and the pending
//! pool. It is the only writer of all three: transactions enter through
//! [`Blockchain::admit`] and leave the pool only through [`Blockchain::mine`].
//!
//! Nothing here is synchronized. Callers sharing a ledger across threads must
//! wrap it in a single lock held for the whole of `mine`.

use crate::core::address::{verify_address, TransactionType};
use crate::core::block::{Block, BlockError};
use crate::core::transaction::{Destination, Transaction, TransactionBuilder, TransactionError};
use crate::core::utxo::{UtxoIndex, UtxoValue};
use crate::crypto::KeyError;
use crate::mining::{Mempool, MempoolEntry};
use chrono::Utc;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use thiserror::Error;

/// Default mining difficulty (number of leading zero hex digits)
pub const DEFAULT_DIFFICULTY: u32 = 3;

/// Initial block reward in coins
pub const BLOCK_REWARD: u64 = 50;

/// Pending transactions consumed per block
pub const BLOCK_TRANSACTIONS_LIMIT: usize = 5;

/// The reward halves whenever the chain length reaches a multiple of this
pub const HALVING_INTERVAL: usize = 5;

// =============================================================================
// Configuration
// =============================================================================

/// Ledger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub difficulty: u32,
    pub initial_block_reward: u64,
    pub block_transactions_limit: usize,
    pub halving_interval: usize,
    /// Second output of the genesis coinbase
    pub genesis_fee_output: u64,
    /// Upper bound on nonce attempts per block; `None` searches until found
    pub max_nonce_attempts: Option<u64>,
    /// Seed for the txid salt source; `None` seeds from entropy
    pub salt_seed: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            initial_block_reward: BLOCK_REWARD,
            block_transactions_limit: BLOCK_TRANSACTIONS_LIMIT,
            halving_interval: HALVING_INTERVAL,
            genesis_fee_output: 1,
            max_nonce_attempts: None,
            salt_seed: None,
        }
    }
}

impl LedgerConfig {
    pub fn with_difficulty(difficulty: u32) -> Self {
        Self {
            difficulty,
            ..Default::default()
        }
    }

    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, BlockchainError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Block reward after `chain_len` blocks have been appended
    pub fn reward_at(&self, chain_len: usize) -> u64 {
        if self.halving_interval == 0 {
            return self.initial_block_reward;
        }
        let halvings = chain_len / self.halving_interval;
        u32::try_from(halvings)
            .ok()
            .and_then(|h| self.initial_block_reward.checked_shr(h))
            .unwrap_or(0)
    }
}

// =============================================================================
// Errors and outcomes
// =============================================================================

/// Integrity faults found by chain validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainFault {
    #[error("block {index}: stored hash does not match its contents")]
    HashMismatch { index: usize },
    #[error("block {index}: previous hash does not match its predecessor")]
    BrokenLink { index: usize },
    #[error("block {index}: hash does not meet difficulty {difficulty}")]
    InsufficientWork { index: usize, difficulty: u32 },
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Destination {index} address {address} failed checksum verification")]
    AddressMismatch { index: usize, address: String },
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),
    #[error("Signing failed: {0}")]
    Signing(#[from] KeyError),
    #[error("Coinbase rejected: {0}")]
    InvalidCoinbase(TransactionError),
    #[error("Block error: {0}")]
    Block(#[from] BlockError),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Chain tampered: {0}")]
    ChainTamper(#[from] ChainFault),
    #[error("Snapshot contains no blocks")]
    EmptyChain,
}

/// Why a pending entry was left out of a block
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    #[error("missing signature")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("spends an output that is gone or already spent in this block")]
    DoubleSpend,
}

/// Report for a sealed block
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub index: u64,
    pub hash: String,
    pub nonce: u64,
    pub attempts: u64,
    pub elapsed_ms: u128,
    /// Non-coinbase transactions included
    pub included: Vec<String>,
    pub dropped: Vec<(String, DropReason)>,
    pub block_reward: u64,
    pub total_fees: u64,
}

/// Result of a mining round
#[derive(Debug, Clone)]
pub enum MineOutcome {
    /// Fewer pending entries than a block takes; nothing changed
    NotEnoughPending { pending: usize, required: usize },
    /// Every consumed entry was dropped; they are gone from the pool and no block was sealed
    AllDropped { dropped: Vec<(String, DropReason)> },
    Sealed(MinedBlock),
}

impl MineOutcome {
    pub fn is_sealed(&self) -> bool {
        matches!(self, MineOutcome::Sealed(_))
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    blocks: &'a [Block],
}

#[derive(Deserialize)]
struct Snapshot {
    blocks: Vec<Block>,
}

// =============================================================================
// Blockchain
// =============================================================================

/// The ledger: chain, unspent output index and pending pool
#[derive(Debug)]
pub struct Blockchain {
    blocks: Vec<Block>,
    config: LedgerConfig,
    block_reward: u64,
    mempool: Mempool,
    utxo_index: UtxoIndex,
    rng: StdRng,
}

impl Blockchain {
    /// Create a ledger whose genesis coinbase pays `genesis_address`
    pub fn new(config: LedgerConfig, genesis_address: &str) -> Result<Self, BlockchainError> {
        let rng = Self::salt_source(&config);
        let mut blockchain = Self {
            blocks: Vec::new(),
            block_reward: config.initial_block_reward,
            config,
            mempool: Mempool::new(),
            utxo_index: UtxoIndex::new(),
            rng,
        };

        let coinbase = Transaction::coinbase(
            genesis_address,
            blockchain.block_reward,
            blockchain.config.genesis_fee_output,
            &mut blockchain.rng,
        );
        let (block, attempts) = blockchain.seal(vec![coinbase])?;
        info!(
            "Genesis block sealed with hash {} after {} attempts",
            block.hash, attempts
        );
        blockchain.append(block);

        Ok(blockchain)
    }

    /// Create a ledger with default settings and a custom difficulty
    pub fn with_difficulty(difficulty: u32, genesis_address: &str) -> Result<Self, BlockchainError> {
        Self::new(LedgerConfig::with_difficulty(difficulty), genesis_address)
    }

    fn salt_source(config: &LedgerConfig) -> StdRng {
        config
            .salt_seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the latest block
    pub fn latest_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Get a block by index
    pub fn get_block(&self, index: u64) -> Option<&Block> {
        self.blocks.get(usize::try_from(index).ok()?)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Index of the latest block (genesis is 0)
    pub fn height(&self) -> u64 {
        self.blocks.len().saturating_sub(1) as u64
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn difficulty(&self) -> u32 {
        self.config.difficulty
    }

    /// Reward the next coinbase will pay
    pub fn block_reward(&self) -> u64 {
        self.block_reward
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn utxo_index(&self) -> &UtxoIndex {
        &self.utxo_index
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Spendable outputs of `address`, largest first
    pub fn utxos_for(&self, address: &str) -> Vec<UtxoValue> {
        self.utxo_index
            .value_data(&self.blocks, address, true)
            .items
    }

    /// Sum of the unspent outputs paying `address`
    pub fn balance_of(&self, address: &str) -> u64 {
        let lookup = self.utxo_index.value_data(&self.blocks, address, false);
        if !lookup.stale.is_empty() {
            debug!(
                "{} stale UTXO entries skipped while reading balance of {}",
                lookup.stale.len(),
                address
            );
        }
        lookup.items.iter().map(|u| u.value).sum()
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Build, sign and queue a payment from `from_address`.
    ///
    /// Every destination's full address must verify for `tx_type`. `sign`
    /// receives the txid bytes and returns the signature. Returns the txid
    /// of the queued transaction; on any error nothing is queued.
    pub fn admit<F>(
        &mut self,
        from_address: &str,
        input_pub_key: &str,
        sign: F,
        transaction_fee: u64,
        destinations: &[Destination],
        tx_type: TransactionType,
    ) -> Result<String, BlockchainError>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>, KeyError>,
    {
        for (index, destination) in destinations.iter().enumerate() {
            if !verify_address(tx_type, &destination.to, &destination.to_full_address) {
                warn!(
                    "Receiver address {} couldn't be verified as {}. Rejecting transaction.",
                    destination.to_full_address, tx_type
                );
                return Err(BlockchainError::AddressMismatch {
                    index,
                    address: destination.to_full_address.clone(),
                });
            }
        }

        if transaction_fee == 0 {
            warn!("Transaction from {} pays no fee. Rejecting transaction.", from_address);
            return Err(TransactionError::ZeroFee.into());
        }

        let lookup = self
            .utxo_index
            .value_data(&self.blocks, from_address, true);
        if !lookup.stale.is_empty() {
            self.utxo_index.purge_stale(&lookup.stale);
        }

        let mut transaction = TransactionBuilder::new(from_address)
            .spend_from(&lookup.items)
            .outputs(destinations.iter().map(Destination::output))
            .fee(transaction_fee)
            .build(&mut self.rng);

        let signature = sign(transaction.signing_data())?;
        transaction.attach_signature(&signature);

        if let Err(reason) = transaction.check_valid() {
            warn!("Invalid transaction from {}: {}", from_address, reason);
            return Err(reason.into());
        }

        let txid = transaction.txid.clone();
        self.mempool
            .push(MempoolEntry::new(transaction, input_pub_key));
        info!("Transaction {} pushed to pending transactions", txid);

        Ok(txid)
    }

    // =========================================================================
    // Mining
    // =========================================================================

    /// Seal the highest-fee pending entries into a new block paying `miner_address`.
    ///
    /// Takes exactly `block_transactions_limit` entries. Entries with a missing
    /// or invalid signature, or spending an output that is no longer available,
    /// are dropped and not re-queued. On error, the chain and pool are unchanged.
    pub fn mine(&mut self, miner_address: &str) -> Result<MineOutcome, BlockchainError> {
        let required = self.config.block_transactions_limit;
        let pending = self.mempool.len();
        if pending < required {
            info!(
                "Pending transactions ({}) below block limit ({}). Wait for it to fill up!",
                pending, required
            );
            return Ok(MineOutcome::NotEnoughPending { pending, required });
        }

        let start = Instant::now();
        let mut claimed = HashSet::new();
        let mut included = Vec::new();
        let mut dropped = Vec::new();

        for entry in self.mempool.peek(required) {
            match self.screen(entry, &mut claimed) {
                Ok(()) => included.push(entry.tx.clone()),
                Err(reason) => {
                    warn!("Transaction {} skipped: {}", entry.tx.txid, reason);
                    dropped.push((entry.tx.txid.clone(), reason));
                }
            }
        }

        if included.is_empty() {
            self.mempool.drain(required);
            warn!("All {} consumed transactions were dropped; no block sealed", required);
            return Ok(MineOutcome::AllDropped { dropped });
        }

        let total_fees = included
            .iter()
            .try_fold(0u64, |total, tx| total.checked_add(tx.transaction_fee))
            .ok_or(BlockchainError::InvalidCoinbase(TransactionError::AmountOverflow))?;
        let block_reward = self.block_reward;
        let coinbase = Transaction::coinbase(miner_address, block_reward, total_fees, &mut self.rng);
        coinbase
            .check_valid()
            .map_err(BlockchainError::InvalidCoinbase)?;

        let included_ids: Vec<String> = included.iter().map(|tx| tx.txid.clone()).collect();
        included.push(coinbase);

        let (block, attempts) = self.seal(included)?;
        let report = MinedBlock {
            index: self.blocks.len() as u64,
            hash: block.hash.clone(),
            nonce: block.nonce,
            attempts,
            elapsed_ms: start.elapsed().as_millis(),
            included: included_ids,
            dropped,
            block_reward,
            total_fees,
        };

        self.append(block);
        self.mempool.drain(required);

        info!(
            "Block {} added with hash {} in {}ms ({} attempts)",
            report.index, report.hash, report.elapsed_ms, report.attempts
        );

        Ok(MineOutcome::Sealed(report))
    }

    fn screen(&self, entry: &MempoolEntry, claimed: &mut HashSet<String>) -> Result<(), DropReason> {
        let tx = &entry.tx;
        if !tx.is_signed() {
            return Err(DropReason::MissingSignature);
        }
        if !matches!(tx.verify_signature(&entry.input_pub_key), Ok(true)) {
            return Err(DropReason::InvalidSignature);
        }

        let keys: Vec<String> = tx.inputs.iter().map(|input| input.key()).collect();
        let unique: HashSet<&String> = keys.iter().collect();
        if unique.len() != keys.len()
            || keys
                .iter()
                .any(|key| claimed.contains(key) || !self.utxo_index.contains_key(key))
        {
            return Err(DropReason::DoubleSpend);
        }

        claimed.extend(keys);
        Ok(())
    }

    /// Build a block on top of the current tip and search for its nonce
    fn seal(&self, transactions: Vec<Transaction>) -> Result<(Block, u64), BlockchainError> {
        let prev_hash = self
            .latest_block()
            .map(|block| block.hash.clone())
            .unwrap_or_default();
        let mut block = Block::new(&prev_hash, transactions, Utc::now());

        debug!("Mining block {} with difficulty {}", self.blocks.len(), self.config.difficulty);
        let attempts = block.mine(self.config.difficulty, self.config.max_nonce_attempts)?;

        Ok((block, attempts))
    }

    fn append(&mut self, block: Block) {
        self.blocks.push(block);
        self.utxo_index.update(&self.blocks);

        let interval = self.config.halving_interval;
        if interval > 0 && self.blocks.len() % interval == 0 {
            self.block_reward /= 2;
            info!("Block reward halved to {}", self.block_reward);
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate the entire chain, reporting the first fault found
    pub fn validate_detailed(&self) -> Result<(), ChainFault> {
        let difficulty = self.config.difficulty;

        for (index, block) in self.blocks.iter().enumerate() {
            if !block.verify_hash() {
                return Err(ChainFault::HashMismatch { index });
            }

            if index > 0 && block.prev_hash != self.blocks[index - 1].hash {
                return Err(ChainFault::BrokenLink { index });
            }

            if !block.is_valid_pow(difficulty) {
                return Err(ChainFault::InsufficientWork { index, difficulty });
            }
        }

        Ok(())
    }

    /// Validate the entire chain
    pub fn validate(&self) -> bool {
        match self.validate_detailed() {
            Ok(()) => true,
            Err(fault) => {
                warn!("Chain validation failed: {}", fault);
                false
            }
        }
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Serialize the chain to JSON
    pub fn snapshot(&self) -> Result<String, BlockchainError> {
        Ok(serde_json::to_string(&SnapshotRef {
            blocks: &self.blocks,
        })?)
    }

    /// Rebuild a ledger from a snapshot. The pending pool starts empty and the
    /// reward is recomputed from the chain length. The chain is not validated.
    pub fn restore(json: &str, config: LedgerConfig) -> Result<Self, BlockchainError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        if snapshot.blocks.is_empty() {
            return Err(BlockchainError::EmptyChain);
        }

        Ok(Self {
            utxo_index: UtxoIndex::from_chain(&snapshot.blocks),
            block_reward: config.reward_at(snapshot.blocks.len()),
            rng: Self::salt_source(&config),
            blocks: snapshot.blocks,
            config,
            mempool: Mempool::new(),
        })
    }

    /// Restore a snapshot and reject it if validation finds a fault
    pub fn restore_verified(json: &str, config: LedgerConfig) -> Result<Self, BlockchainError> {
        let blockchain = Self::restore(json, config)?;
        blockchain.validate_detailed()?;
        Ok(blockchain)
    }

    /// Get chain statistics
    pub fn stats(&self) -> ChainStats {
        ChainStats {
            height: self.height(),
            total_blocks: self.blocks.len() as u64,
            total_transactions: self.blocks.iter().map(|b| b.tx_count() as u64).sum(),
            unspent_outputs: self.utxo_index.len(),
            pending_transactions: self.mempool.len(),
            block_reward: self.block_reward,
            difficulty: self.config.difficulty,
            latest_hash: self
                .latest_block()
                .map(|block| block.hash.clone())
                .unwrap_or_default(),
        }
    }
}

/// Chain statistics
#[derive(Debug, Clone)]
pub struct ChainStats {
    pub height: u64,
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub unspent_outputs: usize,
    pub pending_transactions: usize,
    pub block_reward: u64,
    pub difficulty: u32,
    pub latest_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Address;
    use crate::crypto::KeyPair;

    struct Account {
        keys: KeyPair,
        address: Address,
    }

    impl Account {
        fn new() -> Self {
            let keys = KeyPair::generate();
            let address = Address::new(&keys.hashed_public_key());
            Self { keys, address }
        }

        fn id(&self) -> &str {
            &self.address.pub_address
        }

        fn destination(&self, value: u64) -> Destination {
            Destination::new(value, self.id(), &self.address.p2pkh)
        }

        fn pay(
            &self,
            ledger: &mut Blockchain,
            fee: u64,
            destinations: &[Destination],
        ) -> Result<String, BlockchainError> {
            ledger.admit(
                self.id(),
                &self.keys.public_key_hex(),
                |msg| self.keys.sign(msg),
                fee,
                destinations,
                TransactionType::P2pkh,
            )
        }
    }

    fn test_config() -> LedgerConfig {
        LedgerConfig {
            difficulty: 1,
            max_nonce_attempts: Some(100_000),
            salt_seed: Some(42),
            ..Default::default()
        }
    }

    fn sealed(outcome: MineOutcome) -> MinedBlock {
        match outcome {
            MineOutcome::Sealed(report) => report,
            other => panic!("expected a sealed block, got {:?}", other),
        }
    }

    /// Queue `count` one-coin payments from `sender`, each with fee 1
    fn queue_payments(ledger: &mut Blockchain, sender: &Account, to: &Account, count: usize) {
        for _ in 0..count {
            sender.pay(ledger, 1, &[to.destination(1)]).unwrap();
        }
    }

    /// Genesis pays `amount` to each of `n` fresh accounts in one mined block
    fn funded(n: usize, amount: u64) -> (Blockchain, Account, Vec<Account>) {
        let genesis = Account::new();
        let mut ledger = Blockchain::new(test_config(), genesis.id()).unwrap();
        let accounts: Vec<Account> = (0..n).map(|_| Account::new()).collect();

        let destinations: Vec<Destination> =
            accounts.iter().map(|a| a.destination(amount)).collect();
        genesis.pay(&mut ledger, 2, &destinations).unwrap();
        // Fillers pick the same genesis output and get dropped
        let limit = ledger.config().block_transactions_limit;
        queue_payments(&mut ledger, &genesis, &accounts[0], limit - 1);

        let report = sealed(ledger.mine(genesis.id()).unwrap());
        assert_eq!(report.included.len(), 1);
        (ledger, genesis, accounts)
    }

    fn input_value(ledger: &Blockchain, input: &crate::core::transaction::Input) -> u64 {
        ledger
            .get_block(input.block_index)
            .unwrap()
            .transaction(&input.txid)
            .unwrap()
            .outputs[input.output_index as usize]
            .value
    }

    #[test]
    fn test_new_blockchain() {
        let genesis = Account::new();
        let ledger = Blockchain::new(test_config(), genesis.id()).unwrap();

        assert_eq!(ledger.height(), 0);
        let block = ledger.latest_block().unwrap();
        assert_eq!(block.prev_hash, "");
        assert!(block.hash.starts_with('0'));
        assert_eq!(ledger.balance_of(genesis.id()), 51);
        assert_eq!(ledger.block_reward(), BLOCK_REWARD);
        assert!(ledger.validate());
    }

    #[test]
    fn test_genesis_nonce_bound() {
        let config = LedgerConfig {
            difficulty: 64,
            max_nonce_attempts: Some(5),
            ..test_config()
        };
        assert!(matches!(
            Blockchain::new(config, "genesis"),
            Err(BlockchainError::Block(BlockError::NonceExhausted { attempts: 5 }))
        ));
    }

    #[test]
    fn test_admit_rejects_bad_address() {
        let genesis = Account::new();
        let bob = Account::new();
        let mut ledger = Blockchain::new(test_config(), genesis.id()).unwrap();

        let wrong_type = Destination::new(5, bob.id(), &bob.address.pk);
        let result = genesis.pay(&mut ledger, 1, &[bob.destination(5), wrong_type]);
        assert!(matches!(
            result,
            Err(BlockchainError::AddressMismatch { index: 1, .. })
        ));

        let mut forged = bob.address.p2pkh.clone();
        forged.pop();
        forged.push('x');
        let result = genesis.pay(&mut ledger, 1, &[Destination::new(5, bob.id(), &forged)]);
        assert!(matches!(result, Err(BlockchainError::AddressMismatch { .. })));
        assert!(ledger.mempool().is_empty());
    }

    #[test]
    fn test_admit_rejects_insufficient_funds() {
        let genesis = Account::new();
        let bob = Account::new();
        let mut ledger = Blockchain::new(test_config(), genesis.id()).unwrap();

        let result = genesis.pay(&mut ledger, 2, &[bob.destination(50)]);
        assert!(matches!(
            result,
            Err(BlockchainError::InvalidTransaction(
                TransactionError::InsufficientFunds {
                    available: 51,
                    required: 52
                }
            ))
        ));

        // Nothing to spend at all
        let result = bob.pay(&mut ledger, 1, &[genesis.destination(1)]);
        assert!(result.is_err());
        assert!(ledger.mempool().is_empty());
    }

    #[test]
    fn test_signing_failure_is_propagated() {
        let genesis = Account::new();
        let bob = Account::new();
        let mut ledger = Blockchain::new(test_config(), genesis.id()).unwrap();

        let result = ledger.admit(
            genesis.id(),
            &genesis.keys.public_key_hex(),
            |_| Err(KeyError::InvalidPrivateKey),
            1,
            &[bob.destination(1)],
            TransactionType::P2pkh,
        );
        assert!(matches!(result, Err(BlockchainError::Signing(_))));
        assert!(ledger.mempool().is_empty());
    }

    #[test]
    fn test_mining_threshold() {
        let (mut ledger, _, accounts) = funded(5, 9);
        let limit = ledger.config().block_transactions_limit;
        let miner = Account::new();
        let height = ledger.height();

        for account in &accounts[..limit - 1] {
            account.pay(&mut ledger, 1, &[miner.destination(3)]).unwrap();
        }
        assert!(matches!(
            ledger.mine(miner.id()).unwrap(),
            MineOutcome::NotEnoughPending { pending: 4, required: 5 }
        ));
        assert_eq!(ledger.height(), height);
        assert_eq!(ledger.mempool().len(), limit - 1);

        accounts[limit - 1]
            .pay(&mut ledger, 1, &[miner.destination(3)])
            .unwrap();
        let report = sealed(ledger.mine(miner.id()).unwrap());

        assert_eq!(ledger.height(), height + 1);
        assert!(ledger.mempool().is_empty());
        assert_eq!(report.included.len(), limit);
        assert!(report.dropped.is_empty());
        assert_eq!(report.total_fees, 5);
        // Five payments of 3 plus reward and fees
        assert_eq!(ledger.balance_of(miner.id()), 15 + BLOCK_REWARD + 5);
        for account in &accounts {
            assert_eq!(ledger.balance_of(account.id()), 5);
        }
        assert!(ledger.validate());
    }

    #[test]
    fn test_only_consumed_entries_leave_the_pool() {
        let (mut ledger, _, accounts) = funded(6, 8);
        let miner = Account::new();

        for (fee, account) in [1, 2, 3, 4, 5, 6].into_iter().zip(&accounts) {
            account.pay(&mut ledger, fee, &[miner.destination(1)]).unwrap();
        }
        let report = sealed(ledger.mine(miner.id()).unwrap());

        assert_eq!(report.total_fees, 6 + 5 + 4 + 3 + 2);
        assert_eq!(ledger.mempool().len(), 1);
        assert_eq!(ledger.mempool().peek(1)[0].fee(), 1);
    }

    #[test]
    fn test_fee_ordering_through_admission() {
        let (mut ledger, _, accounts) = funded(3, 10);
        let bob = Account::new();

        for (fee, account) in [1, 5, 3].into_iter().zip(&accounts) {
            account.pay(&mut ledger, fee, &[bob.destination(1)]).unwrap();
        }
        let fees: Vec<u64> = ledger.mempool().iter().map(|e| e.fee()).collect();
        assert_eq!(fees, vec![5, 3, 1]);
    }

    #[test]
    fn test_bad_signatures_dropped() {
        let (mut ledger, _, accounts) = funded(5, 9);
        let miner = Account::new();
        let impostor = KeyPair::generate();

        // Signed by the wrong key
        let forged = ledger
            .admit(
                accounts[0].id(),
                &accounts[0].keys.public_key_hex(),
                |msg| impostor.sign(msg),
                4,
                &[miner.destination(1)],
                TransactionType::P2pkh,
            )
            .unwrap();

        // Never signed
        let available = ledger.utxos_for(accounts[1].id());
        let unsigned = TransactionBuilder::new(accounts[1].id())
            .spend_from(&available)
            .add_output(miner.id(), 1)
            .fee(3)
            .build(&mut ledger.rng);
        let unsigned_id = unsigned.txid.clone();
        ledger
            .mempool
            .push(MempoolEntry::new(unsigned, &accounts[1].keys.public_key_hex()));

        for account in &accounts[2..] {
            account.pay(&mut ledger, 1, &[miner.destination(1)]).unwrap();
        }

        let report = sealed(ledger.mine(miner.id()).unwrap());
        assert_eq!(
            report.dropped,
            vec![
                (forged.clone(), DropReason::InvalidSignature),
                (unsigned_id.clone(), DropReason::MissingSignature),
            ]
        );
        assert_eq!(report.included.len(), 3);
        assert_eq!(report.total_fees, 3);
        // Dropped entries are not re-queued
        assert!(ledger.mempool().is_empty());
        let block = ledger.latest_block().unwrap();
        assert!(block.transaction(&forged).is_none());
        assert!(block.transaction(&unsigned_id).is_none());
        assert_eq!(ledger.balance_of(accounts[0].id()), 9);
    }

    #[test]
    fn test_double_spend_dropped() {
        let (ledger, genesis, accounts) = funded(2, 10);

        let mut seen = HashSet::new();
        for block in ledger.blocks() {
            for tx in block.transactions.values() {
                for input in &tx.inputs {
                    assert!(seen.insert(input.key()), "{} spent twice", input.key());
                }
            }
        }
        // Genesis paid 2 * 10 + fee 2 out of 50; fillers never landed
        assert_eq!(ledger.balance_of(accounts[0].id()), 10);
        assert_eq!(ledger.balance_of(genesis.id()), 1 + 28 + BLOCK_REWARD + 2);
    }

    #[test]
    fn test_all_dropped_round() {
        let genesis = Account::new();
        let bob = Account::new();
        let mut ledger = Blockchain::new(test_config(), genesis.id()).unwrap();
        let stranger = KeyPair::generate();

        for _ in 0..5 {
            ledger
                .admit(
                    genesis.id(),
                    &stranger.public_key_hex(),
                    |msg| genesis.keys.sign(msg),
                    1,
                    &[bob.destination(1)],
                    TransactionType::P2pkh,
                )
                .unwrap();
        }

        match ledger.mine(genesis.id()).unwrap() {
            MineOutcome::AllDropped { dropped } => assert_eq!(dropped.len(), 5),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(ledger.height(), 0);
        assert!(ledger.mempool().is_empty());
    }

    #[test]
    fn test_zero_fee_rejected_at_admission() {
        let (mut ledger, _, accounts) = funded(5, 9);
        let miner = Account::new();
        let height = ledger.height();

        for account in &accounts {
            assert!(matches!(
                account.pay(&mut ledger, 0, &[miner.destination(1)]),
                Err(BlockchainError::InvalidTransaction(TransactionError::ZeroFee))
            ));
        }
        assert!(ledger.mempool().is_empty());

        // The same payments with a fee still fill and seal a block
        for account in &accounts {
            account.pay(&mut ledger, 1, &[miner.destination(1)]).unwrap();
        }
        let report = sealed(ledger.mine(miner.id()).unwrap());
        assert_eq!(report.total_fees, 5);
        assert_eq!(ledger.height(), height + 1);
        assert!(ledger.mempool().is_empty());
    }

    #[test]
    fn test_admit_rejects_overflowing_payment() {
        let genesis = Account::new();
        let bob = Account::new();
        let mut ledger = Blockchain::new(test_config(), genesis.id()).unwrap();

        let result = genesis.pay(
            &mut ledger,
            1,
            &[bob.destination(u64::MAX), bob.destination(2)],
        );
        assert!(matches!(
            result,
            Err(BlockchainError::InvalidTransaction(TransactionError::AmountOverflow))
        ));
        assert!(ledger.mempool().is_empty());
        assert_eq!(ledger.balance_of(genesis.id()), 51);
    }

    #[test]
    fn test_admit_purges_stale_entries() {
        let (mut ledger, _, accounts) = funded(1, 5);
        let payment = ledger.blocks[1]
            .transactions
            .values()
            .find(|tx| !tx.is_coinbase)
            .unwrap()
            .txid
            .clone();
        ledger.blocks[1].transactions.remove(&payment);

        let unspent = ledger.utxo_index().len();
        let height = ledger.height();
        assert_eq!(ledger.utxo_index().purged_count(), 0);

        // Reads skip the stale entries without removing them
        assert_eq!(ledger.balance_of(accounts[0].id()), 0);
        assert_eq!(ledger.utxo_index().len(), unspent);

        let result = accounts[0].pay(&mut ledger, 1, &[accounts[0].destination(1)]);
        assert!(matches!(
            result,
            Err(BlockchainError::InvalidTransaction(
                TransactionError::InsufficientFunds {
                    available: 0,
                    required: 2
                }
            ))
        ));
        // Payment plus change both pointed at the removed transaction
        assert_eq!(ledger.utxo_index().purged_count(), 2);
        assert_eq!(ledger.utxo_index().len(), unspent - 2);
        assert_eq!(ledger.height(), height);
        assert!(ledger.mempool().is_empty());
    }

    #[test]
    fn test_reward_halving() {
        let genesis = Account::new();
        let bob = Account::new();
        let mut ledger = Blockchain::new(test_config(), genesis.id()).unwrap();

        // Genesis plus four mined blocks makes five
        for _ in 0..4 {
            queue_payments(&mut ledger, &genesis, &bob, 5);
            let report = sealed(ledger.mine(genesis.id()).unwrap());
            assert_eq!(report.block_reward, 50);
        }
        assert_eq!(ledger.blocks().len(), 5);
        assert_eq!(ledger.block_reward(), 25);

        queue_payments(&mut ledger, &genesis, &bob, 5);
        let report = sealed(ledger.mine(genesis.id()).unwrap());
        assert_eq!(report.block_reward, 25);

        let coinbase = ledger.latest_block().unwrap().coinbase_tx().unwrap();
        assert_eq!(coinbase.outputs[0].value, 25);
        assert_eq!(coinbase.outputs[1].value, report.total_fees);
    }

    #[test]
    fn test_conservation() {
        let (mut ledger, _, accounts) = funded(5, 9);
        let miner = Account::new();
        for (i, account) in accounts.iter().enumerate() {
            account
                .pay(&mut ledger, 1, &[miner.destination(1 + i as u64)])
                .unwrap();
        }
        sealed(ledger.mine(miner.id()).unwrap());

        for block in ledger.blocks() {
            for tx in block.transactions.values().filter(|tx| !tx.is_coinbase) {
                let inputs: u64 = tx.inputs.iter().map(|i| input_value(&ledger, i)).sum();
                assert_eq!(inputs, tx.total_output() + tx.transaction_fee);
            }
        }
    }

    #[test]
    fn test_idempotent_validation() {
        let (ledger, _, _) = funded(1, 5);
        assert!(ledger.validate());
        assert!(ledger.validate());
        assert_eq!(ledger.validate_detailed(), ledger.validate_detailed());
    }

    fn three_block_ledger() -> Blockchain {
        let (mut ledger, genesis, accounts) = funded(1, 5);
        queue_payments(&mut ledger, &genesis, &accounts[0], 5);
        sealed(ledger.mine(genesis.id()).unwrap());
        assert_eq!(ledger.blocks().len(), 3);
        assert!(ledger.validate());
        ledger
    }

    #[test]
    fn test_tamper_detection() {
        let mut ledger = three_block_ledger();

        let tx = ledger.blocks[1]
            .transactions
            .values_mut()
            .find(|tx| !tx.is_coinbase)
            .unwrap();
        tx.outputs[0].value += 100;
        assert!(!ledger.validate());
        assert_eq!(
            ledger.validate_detailed(),
            Err(ChainFault::HashMismatch { index: 1 })
        );

        // Resealing block 1 leaves block 2 pointing at the old hash
        let difficulty = ledger.difficulty();
        ledger.blocks[1].mine(difficulty, None).unwrap();
        assert!(!ledger.validate());
        assert_eq!(
            ledger.validate_detailed(),
            Err(ChainFault::BrokenLink { index: 2 })
        );
    }

    #[test]
    fn test_insufficient_work_detected() {
        let mut ledger = three_block_ledger();
        let block = &mut ledger.blocks[2];
        while block.hash.starts_with('0') {
            block.nonce += 1;
            block.hash = block.calculate_hash();
        }
        assert_eq!(
            ledger.validate_detailed(),
            Err(ChainFault::InsufficientWork {
                index: 2,
                difficulty: 1
            })
        );
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let ledger = three_block_ledger();
        let json = ledger.snapshot().unwrap();

        let restored = Blockchain::restore(&json, test_config()).unwrap();
        assert!(restored.validate());
        assert_eq!(restored.height(), ledger.height());
        assert_eq!(restored.block_reward(), ledger.block_reward());
        assert_eq!(restored.utxo_index().len(), ledger.utxo_index().len());
        assert_eq!(
            restored.latest_block().unwrap().hash,
            ledger.latest_block().unwrap().hash
        );

        let tampered = json.replacen("\"value\":50", "\"value\":500", 1);
        assert_ne!(tampered, json);
        assert!(Blockchain::restore(&tampered, test_config()).is_ok());
        assert!(matches!(
            Blockchain::restore_verified(&tampered, test_config()),
            Err(BlockchainError::ChainTamper(ChainFault::HashMismatch { .. }))
        ));
        assert!(Blockchain::restore_verified(&json, test_config()).is_ok());

        assert!(matches!(
            Blockchain::restore(r#"{"blocks":[]}"#, test_config()),
            Err(BlockchainError::EmptyChain)
        ));
        assert!(matches!(
            Blockchain::restore("not json", test_config()),
            Err(BlockchainError::Snapshot(_))
        ));
    }

    #[test]
    fn test_config_from_json() {
        let config = LedgerConfig::from_json_str(r#"{"difficulty": 2, "salt_seed": 7}"#).unwrap();
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.salt_seed, Some(7));
        assert_eq!(config.block_transactions_limit, BLOCK_TRANSACTIONS_LIMIT);

        assert_eq!(config.reward_at(4), 50);
        assert_eq!(config.reward_at(5), 25);
        assert_eq!(config.reward_at(10), 12);
        assert_eq!(config.reward_at(5 * 70), 0);
    }

    #[test]
    fn test_stats() {
        let (ledger, _, _) = funded(2, 5);
        let stats = ledger.stats();
        assert_eq!(stats.height, 1);
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.total_transactions, 3);
        assert_eq!(stats.pending_transactions, 0);
        assert_eq!(stats.latest_hash, ledger.latest_block().unwrap().hash);
    }
}
