//! PC/SC support for cardloop.
//! Can be enabled by turning `pcsc` feature on.
//!
//! ## What is PC/SC?
//! PC/SC (Personal Computer/Smart Card) is an abstraction layer for communicating with Smart Cards
//! from Windows. Using this layer, applications can connect to any devices that supports PC/SC,
//! without depending on their driver implementation. Windows and macOS supports PC/SC by themselves,
//! Linux also supports by installing pcsc-lite shared library.
//!
//! ## Cards
//! Cards are driven with the PC/SC 2.01 contactless pseudo-APDUs (`CLA = 0xFF`), which most
//! CCID readers (ACR122U and friends) translate for the tag. The NDEF message is kept in an
//! NDEF TLV at the start of the data area of an NFC Forum Type 2 tag.
//!
//! Card calls block the calling thread for the duration of one exchange with the reader.
//!
//! ## Usage
//! ```rust,no_run
//! use cardloop::pcsc::Context;
//! use cardloop::session;
//! use cardloop::{CommandPlan, ReaderRegistry, SessionConfig};
//!
//! # async fn run() -> cardloop::Result<()> {
//! let ctx = Context::try_new()?;
//! let reader = ctx.first()?;
//! let (handle, mut events) = session::spawn(reader, CommandPlan::Monitor, SessionConfig::default());
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! handle.join().await
//! # }
//! ```

use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::time::Duration;

use apdu::Command;
use pcsc::{Protocols, ReaderState, Scope, ShareMode, State, MAX_BUFFER_SIZE};

#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

use crate::card::{Card, CardInfo, OperationResult};
use crate::catalog::ResultCode;
use crate::error::{Error, Result};
use crate::reader::{CardPresenceEvent, PresenceSink, ReaderHandle, ReaderRegistry};
use crate::type2::{self, PAGE_SIZE};

const CLA: u8 = 0xFF;
const INS_GET_DATA: u8 = 0xCA;
const INS_READ_BINARY: u8 = 0xB0;
const INS_UPDATE_BINARY: u8 = 0xD6;

/// How often the monitor thread wakes up to notice an unsubscribed sink.
const WAKE_UP: Duration = Duration::from_millis(250);

impl From<pcsc::Error> for ResultCode {
    fn from(e: pcsc::Error) -> Self {
        Self(e as u32)
    }
}

/// PC/SC context.
pub struct Context {
    ctx: pcsc::Context,
}

impl Context {
    /// Creates a PC/SC context in user scope.
    pub fn try_new() -> Result<Self> {
        Ok(Self {
            ctx: pcsc::Context::establish(Scope::User)?,
        })
    }
}

impl ReaderRegistry for Context {
    type Reader = PcscReader;

    fn enumerate(&self) -> Result<BTreeMap<String, PcscReader>> {
        let mut buf = [0u8; 2048];

        let readers = match self.ctx.list_readers(&mut buf) {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Ok(BTreeMap::new()),
            Err(e) => return Err(Error::Pcsc(e)),
        };

        Ok(readers
            .map(|name| {
                let reader = PcscReader::new(self.ctx.clone(), name);
                (reader.display.clone(), reader)
            })
            .collect())
    }
}

/// PC/SC reader handle.
pub struct PcscReader {
    ctx: pcsc::Context,
    name: CString,
    display: String,
}

impl PcscReader {
    fn new(ctx: pcsc::Context, name: &CStr) -> Self {
        Self {
            ctx,
            name: name.to_owned(),
            display: name.to_string_lossy().into_owned(),
        }
    }
}

impl ReaderHandle for PcscReader {
    type Card = PcscCard;

    fn name(&self) -> &str {
        &self.display
    }

    fn subscribe(&self, sink: PresenceSink<PcscCard>) -> Result<()> {
        let ctx = self.ctx.clone();
        let name = self.name.clone();

        std::thread::Builder::new()
            .name(format!("cardloop-{}", self.display))
            .spawn(move || watch(ctx, name, sink))
            .map(|_| ())
            .map_err(|e| Error::Subscribe {
                reader: self.display.clone(),
                reason: e.to_string(),
            })
    }
}

/// Translates status changes of the reader into presence events until the sink closes.
///
/// A failure of the reader is forwarded as the last event.
fn watch(ctx: pcsc::Context, name: CString, sink: PresenceSink<PcscCard>) {
    let mut states = [ReaderState::new(name.clone(), State::UNAWARE)];
    let mut present = false;

    debug!("Watching {:?}", name);

    while !sink.is_closed() {
        match ctx.get_status_change(WAKE_UP, &mut states) {
            Ok(()) => {}
            Err(pcsc::Error::Timeout) => continue,
            Err(e) => {
                warn!("Stopped watching {:?}: {}", name, e);
                sink.blocking_send(CardPresenceEvent::Failed(e.into())).ok();
                return;
            }
        }

        let [state] = &mut states;
        let event_state = state.event_state();
        state.sync_current_state();

        let now_present = event_state.contains(State::PRESENT) && !event_state.contains(State::MUTE);
        if now_present == present {
            continue;
        }

        let event = match now_present {
            true => match ctx.connect(&name, ShareMode::Shared, Protocols::ANY) {
                Ok(card) => CardPresenceEvent::Inserted(PcscCard::new(card)),
                Err(e) => {
                    info!("Could not connect to the card on {:?}: {}", name, e);
                    continue;
                }
            },
            _ => CardPresenceEvent::Removed,
        };

        present = now_present;
        if sink.blocking_send(event).is_err() {
            break;
        }
    }

    debug!("Unsubscribed from {:?}", name);
}

/// A card to be communicated through PC/SC.
pub struct PcscCard {
    card: pcsc::Card,
}

impl PcscCard {
    fn new(card: pcsc::Card) -> Self {
        Self { card }
    }

    /// Transmits an APDU command to the card, then receives the response payload from them.
    fn transmit(&self, command: Command) -> OperationResult<Vec<u8>> {
        let tx = Vec::from(command);
        debug!("TX: {}", hex::encode(&tx));

        let mut rx = [0u8; MAX_BUFFER_SIZE];
        let rx = self.card.transmit(&tx, &mut rx)?;

        debug!("RX: {}", hex::encode(rx));

        type2::payload(rx).map(<[u8]>::to_vec).map_err(|code| {
            warn!("The card rejected the command: {}", hex::encode(rx));
            code
        })
    }
}

impl Card for PcscCard {
    fn query(&mut self) -> OperationResult<CardInfo> {
        self.transmit(Command::new_with_le(CLA, INS_GET_DATA, 0x00, 0x00, 0))
            .map(|uid| CardInfo { uid })
    }

    fn read(&mut self) -> OperationResult<Vec<u8>> {
        type2::decode(|page| self.transmit(Command::new_with_le(CLA, INS_READ_BINARY, 0x00, page, 16)))
    }

    fn write(&mut self, message: &[u8]) -> OperationResult<()> {
        for (i, chunk) in type2::encode(message)?.chunks(PAGE_SIZE).enumerate() {
            let page = type2::page(i)?;
            self.transmit(Command::new_with_payload(CLA, INS_UPDATE_BINARY, 0x00, page, chunk))?;
        }

        Ok(())
    }
}
