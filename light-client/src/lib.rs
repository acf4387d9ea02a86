//! Fork-aware header store and verifier for the Xaya/CHI chain.
//!
//! Headers arrive from the network as chunks of full (AuxPoW-bearing)
//! records, are verified against per-algorithm difficulty targets and their
//! proofs of work, and are persisted as fixed-size disk records. Multiple
//! chains sharing a common prefix coexist, each backed by its own file;
//! when a fork accumulates more chainwork than the chain it branched off,
//! the files swap identities and the registry is reindexed.

pub mod chain;
pub mod config;
pub mod difficulty;
pub mod error;
pub mod file;
pub mod registry;

pub use chain::Blockchain;
pub use config::Config;
pub use difficulty::{DifficultyLookup, TargetEngine, NUM_BLOCKS};
pub use error::{Error, Result};
pub use file::HeaderFile;
pub use registry::{read_blockchains, Registry};
