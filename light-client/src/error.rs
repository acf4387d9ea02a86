use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the header store.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested height is not stored anywhere consultable.
    #[error("missing header at height {0}")]
    MissingHeader(i64),

    #[error("invalid header: {0}")]
    InvalidHeader(#[from] chi_types::Error),

    #[error("invalid hex data: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("header verification failed: {0}")]
    Verification(String),

    /// The headers directory itself is gone; user state was deleted while
    /// running.
    #[error("headers directory does not exist, was it deleted while running?")]
    HeadersDirMissing,

    /// The directory exists but an expected headers file does not: the store
    /// is inconsistent.
    #[error("cannot find headers file at {0}")]
    HeaderFileMissing(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
