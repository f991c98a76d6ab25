//! Error type shared by the whole crate.
//!
//! Only two situations are errors here: a caller handing in an invalid
//! parameter, and I/O failures of a spillover collaborator. "Not enough data
//! yet" is a normal outcome for every [`Module`](crate::Module) read and every
//! extractor transform and is reported as an empty `Vec`, never as an `Err`.
//! The raw [`RingBuffer`](crate::RingBuffer) is the exception: it is a plain
//! container and reports short reads explicitly.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid parameter passed to a setter or constructor.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `RingBuffer::read` asked for more elements than are stored.
    #[error("Insufficient data: requested {requested}, available {available}")]
    InsufficientData { requested: usize, available: usize },

    /// `RingBuffer::read_one` on an empty buffer.
    #[error("Buffer is empty")]
    Empty,

    /// Spillover persistence failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
