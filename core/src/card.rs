use std::fmt::{Display, Formatter};

use crate::catalog::ResultCode;

/// Payload of a successful call, or the code the driver returned instead.
pub type OperationResult<T> = Result<T, ResultCode>;

/// Identity of the card as reported by a status query.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CardInfo {
    pub uid: Vec<u8>,
}

impl Display for CardInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for byte in &self.uid {
            write!(f, "{:02X}", byte)?;
        }

        Ok(())
    }
}

/// A card currently present on a reader, driven by the external driver.
///
/// Every call is a single attempt; re-invocation is the caller's business. Calls may be
/// issued repeatedly for the same logical request, so implementations must tolerate that.
pub trait Card {
    /// Queries the card status.
    fn query(&mut self) -> OperationResult<CardInfo>;

    /// Reads the NDEF message stored on the card.
    fn read(&mut self) -> OperationResult<Vec<u8>>;

    /// Replaces the NDEF message stored on the card.
    fn write(&mut self, message: &[u8]) -> OperationResult<()>;
}

impl<C> Card for Box<C>
where
    C: Card + ?Sized,
{
    fn query(&mut self) -> OperationResult<CardInfo> {
        (**self).query()
    }

    fn read(&mut self) -> OperationResult<Vec<u8>> {
        (**self).read()
    }

    fn write(&mut self, message: &[u8]) -> OperationResult<()> {
        (**self).write(message)
    }
}
