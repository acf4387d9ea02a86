use thiserror::Error;

/// Errors raised by the codecs and proof-of-work checks in this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid header length: {0}")]
    InvalidLength(usize),

    #[error("invalid hash string: {0}")]
    InvalidHash(String),

    #[error("truncated data at offset {0}")]
    Truncated(usize),

    #[error("trailing data after header")]
    TrailingData,

    #[error("invalid compact bits {0:#x}: {1}")]
    InvalidCompact(u32, &'static str),

    #[error("unknown pow algorithm id {0:#x}")]
    UnknownAlgo(u8),

    #[error("invalid powdata: {0}")]
    InvalidPowData(String),

    #[error("proof of work check failed: {0}")]
    BadPow(&'static str),

    #[error("invalid coinbase transaction: {0}")]
    InvalidTx(#[from] bitcoin::consensus::encode::Error),
}
