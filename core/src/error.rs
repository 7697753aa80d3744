//! Infrastructure failures. Card faults are values, see [`LoopExit`](crate::LoopExit).

use crate::catalog::ErrorRecord;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Reader `{0}` not found")]
    ReaderNotFound(String),

    #[error("No readers are attached")]
    NoReaders,

    #[error("Could not subscribe to reader `{reader}`: {reason}")]
    Subscribe { reader: String, reason: String },

    #[error("Reader `{reader}` failed: {record}")]
    ReaderFailed { reader: String, record: ErrorRecord },

    #[error("Session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[cfg(feature = "pcsc")]
    #[error("Error occurred while communicating with PC/SC: {0}")]
    Pcsc(#[from] pcsc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
