//! UTXO Ledger demo
//!
//! Replays a small scenario against an in-memory ledger: a genesis account
//! funds two accounts, a block is mined, balances are printed, and the chain
//! is validated before and after tampering with a snapshot.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use utxo_ledger::core::{
    Address, Blockchain, Destination, LedgerConfig, MineOutcome, TransactionType,
};
use utxo_ledger::crypto::KeyPair;

#[derive(Parser)]
#[command(name = "ledger-demo")]
#[command(version = "0.1.0")]
#[command(about = "Single-process UTXO ledger with proof-of-work sealing", long_about = None)]
struct Cli {
    /// JSON ledger config; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mining difficulty (leading zero hex digits)
    #[arg(short, long)]
    difficulty: Option<u32>,

    /// Seed for transaction id salts
    #[arg(short, long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the funding, mining and tamper-detection scenario
    Run,
    /// Print the effective config as JSON
    Config,
}

struct Account {
    name: &'static str,
    keys: KeyPair,
    address: Address,
}

impl Account {
    fn new(name: &'static str) -> Self {
        let keys = KeyPair::generate();
        let address = Address::new(&keys.hashed_public_key());
        Self {
            name,
            keys,
            address,
        }
    }

    fn id(&self) -> &str {
        &self.address.pub_address
    }

    fn destination(&self, value: u64) -> Destination {
        Destination::new(value, self.id(), &self.address.p2pkh)
    }

    fn pay(&self, ledger: &mut Blockchain, fee: u64, destinations: &[Destination]) {
        let result = ledger.admit(
            self.id(),
            &self.keys.public_key_hex(),
            |msg| self.keys.sign(msg),
            fee,
            destinations,
            TransactionType::P2pkh,
        );
        match result {
            Ok(txid) => println!("  {} queued {}", self.name, &txid[..16]),
            Err(e) => println!("  {} rejected: {}", self.name, e),
        }
    }
}

fn load_config(cli: &Cli) -> Result<LedgerConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::from_json_str(&fs::read_to_string(path)?)?,
        None => LedgerConfig::default(),
    };
    if let Some(difficulty) = cli.difficulty {
        config.difficulty = difficulty;
    }
    if cli.seed.is_some() {
        config.salt_seed = cli.seed;
    }
    Ok(config)
}

fn print_balances(ledger: &Blockchain, accounts: &[&Account]) {
    println!("----BALANCES----");
    for account in accounts {
        println!("  {:<8} {}", account.name, ledger.balance_of(account.id()));
    }
}

fn run(config: LedgerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let genesis = Account::new("genesis");
    let alice = Account::new("alice");
    let bob = Account::new("bob");
    let accounts = [&genesis, &alice, &bob];

    let mut ledger = Blockchain::new(config.clone(), genesis.id())?;
    println!("Ledger initialised, genesis hash {}", ledger.stats().latest_hash);
    print_balances(&ledger, &accounts);

    println!("Queueing transactions");
    genesis.pay(&mut ledger, 2, &[alice.destination(10), bob.destination(10)]);
    for _ in 1..config.block_transactions_limit {
        // Same outputs as the first payment; the miner drops these
        genesis.pay(&mut ledger, 1, &[bob.destination(5)]);
    }
    print_balances(&ledger, &accounts);

    println!("Mining with the genesis account");
    match ledger.mine(genesis.id())? {
        MineOutcome::Sealed(report) => {
            println!(
                "  block {} sealed: nonce {}, {} attempts, {}ms",
                report.index, report.nonce, report.attempts, report.elapsed_ms
            );
            for (txid, reason) in &report.dropped {
                println!("  dropped {}: {}", &txid[..16], reason);
            }
        }
        other => println!("  nothing sealed: {:?}", other),
    }
    print_balances(&ledger, &accounts);

    println!("Is the chain valid? {}", ledger.validate());

    let snapshot = ledger.snapshot()?;
    let tampered = snapshot.replacen("\"value\":10", "\"value\":1000", 1);
    let restored = Blockchain::restore(&tampered, config)?;
    println!("Block 1 modified");
    println!("Is the chain valid? {}", restored.validate());

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
