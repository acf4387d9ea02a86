//! Data model of the Xaya/CHI header chain: hashes, 256-bit arithmetic,
//! pure/disk/full header codecs, the dual-algorithm powdata with AuxPoW,
//! and the network parameters (genesis, checkpoints) that drive them.

pub mod aux;
pub mod error;
pub mod hash;
pub mod header;
pub mod merkle;
pub mod network;
pub mod powdata;
mod u256;

pub use error::Error;
pub use hash::{double_sha256, H256};
pub use header::{ExtendedHeader, Header, DISK_HEADER_SIZE, PURE_HEADER_SIZE};
pub use network::{AlgoHeader, Checkpoint, Params, CHUNK_SIZE};
pub use powdata::{PowAlgo, PowData, PowProof};
pub use u256::U256;

/// A 256-bit difficulty target.
pub type Target = U256;
/// Cumulative (or per-block) expected work.
pub type Work = U256;
