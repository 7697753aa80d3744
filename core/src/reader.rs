//! The reader side of the driver contract: enumeration and card presence notifications.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::card::Card;
use crate::catalog::ResultCode;
use crate::error::{Error, Result};

/// A card entered or left the reader, or the reader itself went away.
///
/// The card handle is only valid until the next `Removed` on the same reader.
#[derive(Debug)]
pub enum CardPresenceEvent<C> {
    Inserted(C),
    Removed,
    /// The reader stopped reporting presence, e.g. because it was unplugged. Nothing is
    /// delivered after it.
    Failed(ResultCode),
}

/// Sending half handed to a reader on subscription.
pub type PresenceSink<C> = mpsc::Sender<CardPresenceEvent<C>>;

/// One physical reader.
pub trait ReaderHandle: Send + 'static {
    type Card: Card + Send + 'static;

    fn name(&self) -> &str;

    /// Starts delivering presence events into the sink, in physical order.
    ///
    /// Past events are not replayed. Delivery stops once the receiving half is dropped,
    /// which is how subscribers unsubscribe.
    fn subscribe(&self, sink: PresenceSink<Self::Card>) -> Result<()>;
}

/// Source of the readers attached to this machine.
pub trait ReaderRegistry {
    type Reader: ReaderHandle;

    /// Takes a snapshot of the attached readers by name.
    fn enumerate(&self) -> Result<BTreeMap<String, Self::Reader>>;

    /// Finds a reader by its exact name.
    fn find(&self, name: &str) -> Result<Self::Reader> {
        self.enumerate()?
            .remove(name)
            .ok_or_else(|| Error::ReaderNotFound(name.to_owned()))
    }

    /// Picks the first reader in name order.
    fn first(&self) -> Result<Self::Reader> {
        self.enumerate()?
            .into_values()
            .next()
            .ok_or(Error::NoReaders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedReader, StaticRegistry};

    fn registry() -> StaticRegistry {
        StaticRegistry::new(["ACS ACR122U PICC Interface", "ACS ACR122 0"])
    }

    #[test]
    fn test_find_by_name() {
        let reader = registry().find("ACS ACR122 0").unwrap();

        assert_eq!("ACS ACR122 0", reader.name());
    }

    #[test]
    fn test_find_missing() {
        let err = registry().find("Nope").unwrap_err();

        assert!(matches!(err, Error::ReaderNotFound(name) if name == "Nope"));
    }

    #[test]
    fn test_first_is_in_name_order() {
        assert_eq!("ACS ACR122 0", registry().first().unwrap().name());
        assert!(matches!(
            StaticRegistry::new(Vec::<&str>::new()).first(),
            Err(Error::NoReaders)
        ));
    }

    #[test]
    fn test_unsubscribe_by_dropping_receiver() {
        let reader = ScriptedReader::new("reader");
        let (sink, events) = mpsc::channel(4);
        reader.subscribe(sink).unwrap();

        assert!(reader.push(CardPresenceEvent::Removed));
        drop(events);
        assert!(!reader.push(CardPresenceEvent::Removed));
    }
}
