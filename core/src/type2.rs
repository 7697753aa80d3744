//! Memory layout of NFC Forum Type 2 tags.
//!
//! The memory is split into 4-octet pages. User data starts at page 4 and holds a sequence
//! of TLV blocks; the NDEF message lives in the value of the first NDEF TLV.

use crate::card::OperationResult;
use crate::catalog::ResultCode;

pub(crate) const PAGE_SIZE: usize = 4;
pub(crate) const FIRST_DATA_PAGE: u8 = 4;

const TLV_NULL: u8 = 0x00;
const TLV_NDEF: u8 = 0x03;
const TLV_TERMINATOR: u8 = 0xFE;

/// Marks a 3-octet length field.
const LONG_LENGTH: u8 = 0xFF;

/// SCARD_W_EOF, returned when a message does not fit the addressable pages.
pub(crate) const END_OF_CARD: ResultCode = ResultCode(0x8010_006D);

/// Address of the `index`-th page of the data area.
pub(crate) fn page(index: usize) -> OperationResult<u8> {
    u8::try_from(FIRST_DATA_PAGE as usize + index).map_err(|_| END_OF_CARD)
}

/// Strips the status word off a response, accepting only 0x9000.
pub(crate) fn payload(rx: &[u8]) -> OperationResult<&[u8]> {
    match rx {
        [payload @ .., 0x90, 0x00] => Ok(payload),
        _ => Err(ResultCode::UNEXPECTED),
    }
}

/// Frames the message as an NDEF TLV and a terminator, zero-padded to whole pages.
pub(crate) fn encode(message: &[u8]) -> OperationResult<Vec<u8>> {
    let mut tlv = vec![TLV_NDEF];

    match u8::try_from(message.len()) {
        Ok(len) if len < LONG_LENGTH => tlv.push(len),
        _ => {
            let len = u16::try_from(message.len()).map_err(|_| END_OF_CARD)?;
            tlv.push(LONG_LENGTH);
            tlv.extend_from_slice(&len.to_be_bytes());
        }
    }

    tlv.extend_from_slice(message);
    tlv.push(TLV_TERMINATOR);
    tlv.resize((tlv.len() + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE, 0x00);

    Ok(tlv)
}

/// The data area, fetched in blocks from its start as far as needed.
struct Area<F> {
    read_block: F,
    bytes: Vec<u8>,
}

impl<F> Area<F>
where
    F: FnMut(u8) -> OperationResult<Vec<u8>>,
{
    fn fill(&mut self, len: usize) -> OperationResult<()> {
        while self.bytes.len() < len {
            let block = (self.read_block)(page(self.bytes.len() / PAGE_SIZE)?)?;
            if block.is_empty() {
                return Err(END_OF_CARD);
            }

            self.bytes.extend_from_slice(&block);
        }

        Ok(())
    }

    fn at(&mut self, pos: usize) -> OperationResult<u8> {
        self.fill(pos + 1)?;
        Ok(self.bytes[pos])
    }
}

/// Extracts the NDEF message, reading blocks starting at a page with `read_block`.
///
/// An area without an NDEF TLV before the terminator holds the empty message.
pub(crate) fn decode<F>(read_block: F) -> OperationResult<Vec<u8>>
where
    F: FnMut(u8) -> OperationResult<Vec<u8>>,
{
    let mut area = Area {
        read_block,
        bytes: Vec::new(),
    };
    let mut pos = 0;

    loop {
        let tag = area.at(pos)?;
        match tag {
            TLV_NULL => {
                pos += 1;
                continue;
            }
            TLV_TERMINATOR => return Ok(Vec::new()),
            _ => {}
        }

        let (len, header) = match area.at(pos + 1)? {
            LONG_LENGTH => {
                let len = u16::from_be_bytes([area.at(pos + 2)?, area.at(pos + 3)?]);
                (len as usize, 4)
            }
            len => (len as usize, 2),
        };

        let start = pos + header;
        if tag == TLV_NDEF {
            area.fill(start + len)?;
            return Ok(area.bytes[start..start + len].to_vec());
        }

        pos = start + len;
    }
}
