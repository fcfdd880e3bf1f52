//! Pending-transaction pooling for block assembly

pub mod mempool;

pub use mempool::{Mempool, MempoolEntry, MempoolStats};
