use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Errors produced while decoding, materializing or configuring.
///
/// Stream corruption is not an error: the frame scanner drops bytes until
/// it finds the next record. Running out of data is not an error either.
#[derive(Error, Debug)]
pub enum Error {
    #[error("record must be 16 bytes, got {0}")]
    RecordLength(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not allocate output: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("invalid source address {0:?}")]
    Address(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not parse run file: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
