//! A crate to drive contactless card operations through a PC/SC result-code aware retry loop.
//!
//! The pieces, leaf first:
//!
//! - [`catalog`] maps raw driver result codes to [`ErrorRecord`]s carrying a retry flag.
//! - [`retry`] re-invokes an operation while its failures stay retryable.
//! - [`card`] and [`reader`] are the contracts an external driver fulfils.
//! - [`command`] sequences card operations for a single card presence.
//! - [`session`] binds a reader's presence events to the command loop.

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($t: tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! info {
    ($($t: tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn {
    ($($t: tt)*) => {};
}

#[cfg(feature = "pcsc")]
pub mod pcsc;

pub mod card;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod reader;
pub mod retry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(any(feature = "pcsc", test))]
mod type2;

pub use card::{Card, CardInfo, OperationResult};
pub use catalog::{ErrorRecord, ResultCode};
pub use command::{CommandPlan, LoopExit};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use reader::{CardPresenceEvent, ReaderHandle, ReaderRegistry};
pub use retry::{RetryOutcome, RetryPolicy};
pub use session::{CardSession, SessionEvent, SessionHandle, SessionState};
