//! Transaction handling for the ledger
//!
//! Implements a UTXO-based transaction model:
//! - Greedy (largest-first) input selection with a trailing change output
//! - Coinbase transactions paying the block reward and collected fees
//! - Transaction IDs salted with caller-supplied randomness
//!
//! Construction never fails outright. A transaction that cannot be funded or
//! is otherwise malformed comes back with `is_transaction_valid == false` and
//! the reason recorded in `rejection`.

use crate::core::utxo::{utxo_key, Utxo, UtxoValue};
use crate::crypto::{double_sha256_hex, public_key_from_hex, verify_signature, KeyError};
use chrono::{DateTime, Utc};
use log::error;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Reasons a built transaction is marked invalid
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },
    #[error("Overspend anomaly: selected inputs {input_total} below target {target}")]
    OverspendAnomaly { input_total: u64, target: u64 },
    #[error("Transaction fee must be positive")]
    ZeroFee,
    #[error("Payment amounts overflow")]
    AmountOverflow,
    #[error("Transaction has no inputs")]
    NoInputs,
    #[error("Source address is empty")]
    MissingSource,
    #[error("Invalid coinbase: {0}")]
    InvalidCoinbase(String),
    #[error("Transaction is marked invalid")]
    MarkedInvalid,
}

// =============================================================================
// Inputs and Outputs
// =============================================================================

/// Reference to one previously mined output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Input {
    /// Transaction that created the output
    pub txid: String,
    /// Block the creating transaction was mined in
    pub block_index: u64,
    /// Position of the output in the creating transaction
    pub output_index: u32,
}

impl Input {
    /// Pool key of the output this input spends
    pub fn key(&self) -> String {
        utxo_key(&self.txid, self.output_index)
    }
}

impl From<&Utxo> for Input {
    fn from(utxo: &Utxo) -> Self {
        Self {
            txid: utxo.txid.clone(),
            block_index: utxo.block_index,
            output_index: utxo.output_index,
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Output {
    /// Amount of coins
    pub value: u64,
    /// Recipient (hashed public key)
    pub to: String,
}

impl Output {
    pub fn new(value: u64, to: &str) -> Self {
        Self {
            value,
            to: to.to_string(),
        }
    }

    /// Check if this output belongs to the given address
    pub fn is_owned_by(&self, address: &str) -> bool {
        self.to == address
    }
}

/// A requested payment: the output plus the full address it must verify against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub value: u64,
    /// Hashed public key the output will pay
    pub to: String,
    /// Checksummed address the sender was given for the recipient
    pub to_full_address: String,
}

impl Destination {
    pub fn new(value: u64, to: &str, to_full_address: &str) -> Self {
        Self {
            value,
            to: to.to_string(),
            to_full_address: to_full_address.to_string(),
        }
    }

    pub fn output(&self) -> Output {
        Output::new(self.value, &self.to)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Salted double hash over inputs, outputs and timestamp, fixed at construction
    pub txid: String,
    pub timestamp: DateTime<Utc>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub transaction_fee: u64,
    pub is_coinbase: bool,
    /// Hex-encoded signature over the txid, attached after construction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub is_transaction_valid: bool,
    /// Why construction marked the transaction invalid
    #[serde(skip)]
    pub rejection: Option<TransactionError>,
}

impl Transaction {
    /// Create a coinbase transaction paying the block reward and the collected fees.
    pub fn coinbase<R: RngCore + ?Sized>(
        recipient: &str,
        block_reward: u64,
        collected_fees: u64,
        rng: &mut R,
    ) -> Self {
        Self::coinbase_from_outputs(
            vec![
                Output::new(block_reward, recipient),
                Output::new(collected_fees, recipient),
            ],
            block_reward,
            Utc::now(),
            rng,
        )
    }

    /// Coinbase shape: exactly two outputs, the first paying exactly the
    /// block reward and the second strictly positive.
    fn coinbase_from_outputs<R: RngCore + ?Sized>(
        outputs: Vec<Output>,
        block_reward: u64,
        timestamp: DateTime<Utc>,
        rng: &mut R,
    ) -> Self {
        let rejection = match outputs.as_slice() {
            [reward, fees] if reward.value == block_reward && fees.value > 0 => None,
            [reward, _] if reward.value != block_reward => Some(TransactionError::InvalidCoinbase(
                format!("reward output {} != block reward {}", reward.value, block_reward),
            )),
            [_, _] => Some(TransactionError::InvalidCoinbase(
                "fee output must be positive".to_string(),
            )),
            other => Some(TransactionError::InvalidCoinbase(format!(
                "expected 2 outputs, got {}",
                other.len()
            ))),
        };
        Self::assemble(Vec::new(), outputs, 0, true, timestamp, rejection, rng)
    }

    fn assemble<R: RngCore + ?Sized>(
        inputs: Vec<Input>,
        outputs: Vec<Output>,
        transaction_fee: u64,
        is_coinbase: bool,
        timestamp: DateTime<Utc>,
        rejection: Option<TransactionError>,
        rng: &mut R,
    ) -> Self {
        let txid = Self::calculate_txid(&inputs, &outputs, &timestamp, rng.next_u64());
        Self {
            txid,
            timestamp,
            inputs,
            outputs,
            transaction_fee,
            is_coinbase,
            signature: None,
            is_transaction_valid: rejection.is_none(),
            rejection,
        }
    }

    /// Double hash over inputs, outputs, timestamp and a uniqueness salt
    pub fn calculate_txid(
        inputs: &[Input],
        outputs: &[Output],
        timestamp: &DateTime<Utc>,
        salt: u64,
    ) -> String {
        let data = format!(
            "{:?}{:?}{}{}",
            inputs,
            outputs,
            timestamp.timestamp_millis(),
            salt
        );
        double_sha256_hex(data.as_bytes())
    }

    /// Bytes the sender signs
    pub fn signing_data(&self) -> &[u8] {
        self.txid.as_bytes()
    }

    /// Attach a signature produced by the signing capability
    pub fn attach_signature(&mut self, signature: &[u8]) {
        self.signature = Some(hex::encode(signature));
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Verify the attached signature against the sender's public key (hex).
    /// A missing signature verifies as `false`.
    pub fn verify_signature(&self, input_pub_key: &str) -> Result<bool, KeyError> {
        let Some(signature) = &self.signature else {
            return Ok(false);
        };
        let public_key = public_key_from_hex(input_pub_key)?;
        let signature = hex::decode(signature).map_err(|_| KeyError::InvalidSignature)?;
        verify_signature(&public_key, self.signing_data(), &signature)
    }

    /// The validity flag as a `Result`, carrying the rejection reason
    pub fn check_valid(&self) -> Result<(), TransactionError> {
        if self.is_transaction_valid {
            Ok(())
        } else {
            Err(self
                .rejection
                .clone()
                .unwrap_or(TransactionError::MarkedInvalid))
        }
    }

    /// Get total output amount, saturating at `u64::MAX`
    pub fn total_output(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |total, o| total.saturating_add(o.value))
    }
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for spending transactions.
///
/// `spend_from` expects the source's spendable outputs sorted by descending
/// value. Inputs are taken from the front until they cover the payments plus
/// fee. This is first-fit-descending, not a minimal-input-count selection.
pub struct TransactionBuilder<'a> {
    source: String,
    available: &'a [UtxoValue],
    outputs: Vec<Output>,
    fee: u64,
    timestamp: Option<DateTime<Utc>>,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            available: &[],
            outputs: Vec::new(),
            fee: 0,
            timestamp: None,
        }
    }

    /// Set the value-annotated outputs the source may spend
    pub fn spend_from(mut self, available: &'a [UtxoValue]) -> Self {
        self.available = available;
        self
    }

    /// Add an output
    pub fn add_output(mut self, recipient: &str, value: u64) -> Self {
        self.outputs.push(Output::new(value, recipient));
        self
    }

    /// Add several outputs
    pub fn outputs(mut self, outputs: impl IntoIterator<Item = Output>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    /// Fix the creation time instead of using the current clock
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Select inputs, fold change into the outputs and compute the txid
    pub fn build<R: RngCore + ?Sized>(self, rng: &mut R) -> Transaction {
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        let mut outputs = self.outputs;
        let target = outputs
            .iter()
            .try_fold(self.fee, |total, o| total.checked_add(o.value));
        let available_total = self
            .available
            .iter()
            .fold(0u64, |total, u| total.saturating_add(u.value));

        let mut inputs = Vec::new();
        let rejection = match target {
            None => Some(TransactionError::AmountOverflow),
            Some(target) if available_total < target => Some(TransactionError::InsufficientFunds {
                available: available_total,
                required: target,
            }),
            Some(target) => {
                let mut input_total = Some(0u64);
                for candidate in self.available {
                    match input_total {
                        Some(total) if total < target => {
                            input_total = total.checked_add(candidate.value);
                            inputs.push(Input::from(&candidate.utxo));
                        }
                        _ => break,
                    }
                }

                match input_total.map(|total| (total, total.checked_sub(target))) {
                    None => Some(TransactionError::AmountOverflow),
                    Some((input_total, None)) => {
                        error!(
                            "Input selection produced {} for target {}; refusing transaction",
                            input_total, target
                        );
                        Some(TransactionError::OverspendAnomaly { input_total, target })
                    }
                    Some((_, Some(change))) => {
                        if change > 0 {
                            outputs.push(Output::new(change, &self.source));
                        }
                        if self.source.is_empty() {
                            Some(TransactionError::MissingSource)
                        } else if inputs.is_empty() {
                            Some(TransactionError::NoInputs)
                        } else {
                            None
                        }
                    }
                }
            }
        };

        Transaction::assemble(inputs, outputs, self.fee, false, timestamp, rejection, rng)
    }
}

// =============================================================================
// Tests
// =============================================================================
