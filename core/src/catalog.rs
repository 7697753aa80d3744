//! Catalog of PC/SC result codes and whether a failed call may be re-attempted.
//!
//! The table is a sorted constant; lookups are a binary search and never allocate. Codes
//! missing from the table are not errors of the catalog itself: callers receive `None`
//! and decide, typically through [`classify`], to treat them as terminal.

use std::fmt::{Display, Formatter};

/// A raw status value returned by the driver for every card or reader call.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ResultCode(pub u32);

impl ResultCode {
    /// The distinguished success value.
    pub const SUCCESS: Self = Self(0x0000_0000);

    pub const TIMEOUT: Self = Self(0x8010_000A);
    pub const SHARING_VIOLATION: Self = Self(0x8010_000B);
    pub const NO_SMARTCARD: Self = Self(0x8010_000C);
    pub const NOT_READY: Self = Self(0x8010_0010);
    pub const UNEXPECTED: Self = Self(0x8010_001F);
    pub const REMOVED_CARD: Self = Self(0x8010_0069);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Shortcut for [`lookup`].
    pub fn record(self) -> Option<ErrorRecord> {
        lookup(self)
    }
}

impl From<u32> for ResultCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl From<ResultCode> for u32 {
    fn from(code: ResultCode) -> Self {
        code.0
    }
}

impl Display for ResultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}

/// What a result code means and whether retrying the same call may help.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ErrorRecord {
    pub code: ResultCode,
    pub symbolic_name: &'static str,
    pub message: &'static str,
    pub retryable: bool,
}

impl ErrorRecord {
    const fn new(code: u32, symbolic_name: &'static str, message: &'static str, retryable: bool) -> Self {
        Self {
            code: ResultCode(code),
            symbolic_name,
            message,
            retryable,
        }
    }

    /// Synthesizes the record for a code the catalog does not know.
    /// Unknown codes are never retryable.
    pub const fn unknown(code: ResultCode) -> Self {
        Self {
            code,
            symbolic_name: "UNKNOWN_ERROR",
            message: "The driver returned a result code that is not in the catalog.",
            retryable: false,
        }
    }
}

impl Display for ErrorRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.symbolic_name, self.code, self.message)
    }
}

/// Semantic class of a result code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    Success,
    Retryable(ErrorRecord),
    Terminal(ErrorRecord),
    /// The code is missing from the catalog; handled as terminal.
    Unknown(ErrorRecord),
}

impl Classification {
    /// The record to surface for a failure, if any.
    pub fn record(&self) -> Option<ErrorRecord> {
        match self {
            Self::Success => None,
            Self::Retryable(r) | Self::Terminal(r) | Self::Unknown(r) => Some(*r),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Finds the record of the code.
pub fn lookup(code: ResultCode) -> Option<ErrorRecord> {
    RECORDS
        .binary_search_by_key(&code, |r| r.code)
        .ok()
        .map(|i| RECORDS[i])
}

/// The record of the code, synthesized when the catalog does not know it.
pub fn describe(code: ResultCode) -> ErrorRecord {
    lookup(code).unwrap_or_else(|| ErrorRecord::unknown(code))
}

/// Classifies the code. Success short-circuits without consulting the table.
pub fn classify(code: ResultCode) -> Classification {
    if code.is_success() {
        return Classification::Success;
    }

    match lookup(code) {
        Some(record) if record.retryable => Classification::Retryable(record),
        Some(record) => Classification::Terminal(record),
        None => Classification::Unknown(ErrorRecord::unknown(code)),
    }
}

/// Iterates every known record in code order.
pub fn records() -> impl Iterator<Item = &'static ErrorRecord> {
    RECORDS.iter()
}

// Sorted by code.
static RECORDS: [ErrorRecord; 67] = [
    ErrorRecord::new(0x0000_0000, "SCARD_S_SUCCESS", "No error has occurred.", false),
    ErrorRecord::new(0x8010_0001, "SCARD_F_INTERNAL_ERROR", "An internal consistency check failed.", false),
    ErrorRecord::new(0x8010_0002, "SCARD_E_CANCELLED", "The action was canceled by a Cancel request.", false),
    ErrorRecord::new(0x8010_0003, "SCARD_E_INVALID_HANDLE", "The supplied handle was invalid.", false),
    ErrorRecord::new(0x8010_0004, "SCARD_E_INVALID_PARAMETER", "One or more of the supplied parameters could not be properly interpreted.", false),
    ErrorRecord::new(0x8010_0005, "SCARD_E_INVALID_TARGET", "Registry startup information is missing or invalid.", false),
    ErrorRecord::new(0x8010_0006, "SCARD_E_NO_MEMORY", "Not enough memory available to complete this command.", false),
    ErrorRecord::new(0x8010_0007, "SCARD_F_WAITED_TOO_LONG", "An internal consistency timer has expired.", true),
    ErrorRecord::new(0x8010_0008, "SCARD_E_INSUFFICIENT_BUFFER", "The data buffer to receive returned data is too small for the returned data.", false),
    ErrorRecord::new(0x8010_0009, "SCARD_E_UNKNOWN_READER", "The specified reader name is not recognized.", false),
    ErrorRecord::new(0x8010_000A, "SCARD_E_TIMEOUT", "The user-specified time-out value has expired.", true),
    ErrorRecord::new(0x8010_000B, "SCARD_E_SHARING_VIOLATION", "The smart card cannot be accessed because of other connections outstanding.", true),
    ErrorRecord::new(0x8010_000C, "SCARD_E_NO_SMARTCARD", "The operation requires a smart card, but no smart card is currently in the device.", false),
    ErrorRecord::new(0x8010_000D, "SCARD_E_UNKNOWN_CARD", "The specified smart card name is not recognized.", false),
    ErrorRecord::new(0x8010_000E, "SCARD_E_CANT_DISPOSE", "The system could not dispose of the media in the requested manner.", false),
    ErrorRecord::new(0x8010_000F, "SCARD_E_PROTO_MISMATCH", "The requested protocols are incompatible with the protocol currently in use with the smart card.", false),
    ErrorRecord::new(0x8010_0010, "SCARD_E_NOT_READY", "The reader or smart card is not ready to accept commands.", true),
    ErrorRecord::new(0x8010_0011, "SCARD_E_INVALID_VALUE", "One or more of the supplied parameters values could not be properly interpreted.", false),
    ErrorRecord::new(0x8010_0012, "SCARD_E_SYSTEM_CANCELLED", "The action was canceled by the system, presumably to log off or shut down.", false),
    ErrorRecord::new(0x8010_0013, "SCARD_F_COMM_ERROR", "An internal communications error has been detected.", false),
    ErrorRecord::new(0x8010_0014, "SCARD_F_UNKNOWN_ERROR", "An internal error has been detected, but the source is unknown.", false),
    ErrorRecord::new(0x8010_0015, "SCARD_E_INVALID_ATR", "An ATR obtained from the registry is not a valid ATR string.", false),
    ErrorRecord::new(0x8010_0016, "SCARD_E_NOT_TRANSACTED", "An attempt was made to end a non-existent transaction.", false),
    ErrorRecord::new(0x8010_0017, "SCARD_E_READER_UNAVAILABLE", "The specified reader is not currently available for use.", false),
    ErrorRecord::new(0x8010_0018, "SCARD_P_SHUTDOWN", "The operation has been stopped to allow the server application to exit.", false),
    ErrorRecord::new(0x8010_0019, "SCARD_E_PCI_TOO_SMALL", "The PCI Receive buffer was too small.", false),
    ErrorRecord::new(0x8010_001A, "SCARD_E_READER_UNSUPPORTED", "The reader device driver does not meet minimal requirements for support.", false),
    ErrorRecord::new(0x8010_001B, "SCARD_E_DUPLICATE_READER", "The reader device driver did not produce a unique reader name.", false),
    ErrorRecord::new(0x8010_001C, "SCARD_E_CARD_UNSUPPORTED", "The smart card does not meet minimal requirements for support.", false),
    ErrorRecord::new(0x8010_001D, "SCARD_E_NO_SERVICE", "Smart Cards for Windows is not running.", false),
    ErrorRecord::new(0x8010_001E, "SCARD_E_SERVICE_STOPPED", "Smart Cards for Windows has shut down.", false),
    ErrorRecord::new(0x8010_001F, "SCARD_E_UNEXPECTED", "An unexpected card error has occurred.", false),
    ErrorRecord::new(0x8010_0020, "SCARD_E_ICC_INSTALLATION", "No primary provider can be found for the smart card.", false),
    ErrorRecord::new(0x8010_0021, "SCARD_E_ICC_CREATEORDER", "The requested order of object creation is not supported.", false),
    ErrorRecord::new(0x8010_0022, "SCARD_E_UNSUPPORTED_FEATURE", "This smart card does not support the requested feature.", false),
    ErrorRecord::new(0x8010_0023, "SCARD_E_DIR_NOT_FOUND", "The specified directory does not exist in the smart card.", false),
    ErrorRecord::new(0x8010_0024, "SCARD_E_FILE_NOT_FOUND", "The specified file does not exist in the smart card.", false),
    ErrorRecord::new(0x8010_0025, "SCARD_E_NO_DIR", "The supplied path does not represent a smart card directory.", false),
    ErrorRecord::new(0x8010_0026, "SCARD_E_NO_FILE", "The supplied path does not represent a smart card file.", false),
    ErrorRecord::new(0x8010_0027, "SCARD_E_NO_ACCESS", "Access is denied to this file.", false),
    ErrorRecord::new(0x8010_0028, "SCARD_E_WRITE_TOO_MANY", "The smart card does not have enough memory to store the information.", false),
    ErrorRecord::new(0x8010_0029, "SCARD_E_BAD_SEEK", "There was an error trying to set the smart card file object pointer.", false),
    ErrorRecord::new(0x8010_002A, "SCARD_E_INVALID_CHV", "The supplied PIN is incorrect.", false),
    ErrorRecord::new(0x8010_002B, "SCARD_E_UNKNOWN_RES_MSG", "An unrecognized error code was returned from a layered component.", false),
    ErrorRecord::new(0x8010_002C, "SCARD_E_NO_SUCH_CERTIFICATE", "The requested certificate does not exist.", false),
    ErrorRecord::new(0x8010_002D, "SCARD_E_CERTIFICATE_UNAVAILABLE", "The requested certificate could not be obtained.", false),
    ErrorRecord::new(0x8010_002E, "SCARD_E_NO_READERS_AVAILABLE", "Cannot find a smart card reader.", false),
    ErrorRecord::new(0x8010_002F, "SCARD_E_COMM_DATA_LOST", "A communications error with the smart card has been detected. Retry the operation.", false),
    ErrorRecord::new(0x8010_0030, "SCARD_E_NO_KEY_CONTAINER", "The requested key container does not exist.", false),
    ErrorRecord::new(0x8010_0031, "SCARD_E_SERVER_TOO_BUSY", "Smart Cards for Windows is too busy to complete this operation.", false),
    ErrorRecord::new(0x8010_0032, "SCARD_E_PIN_CACHE_EXPIRED", "The smart card PIN cache has expired.", false),
    ErrorRecord::new(0x8010_0033, "SCARD_E_NO_PIN_CACHE", "The smart card PIN cannot be cached.", false),
    ErrorRecord::new(0x8010_0034, "SCARD_E_READ_ONLY_CARD", "The smart card is read-only and cannot be written to.", false),
    ErrorRecord::new(0x8010_0065, "SCARD_W_UNSUPPORTED_CARD", "The reader cannot communicate with the smart card due to ATR configuration conflicts.", false),
    ErrorRecord::new(0x8010_0066, "SCARD_W_UNRESPONSIVE_CARD", "The smart card is not responding to a reset.", false),
    ErrorRecord::new(0x8010_0067, "SCARD_W_UNPOWERED_CARD", "Power has been removed from the smart card, so that further communication is impossible.", false),
    ErrorRecord::new(0x8010_0068, "SCARD_W_RESET_CARD", "The smart card has been reset, so any shared state information is invalid.", false),
    ErrorRecord::new(0x8010_0069, "SCARD_W_REMOVED_CARD", "The smart card has been removed, so that further communication is impossible.", false),
    ErrorRecord::new(0x8010_006A, "SCARD_W_SECURITY_VIOLATION", "Access was denied because of a security violation.", false),
    ErrorRecord::new(0x8010_006B, "SCARD_W_WRONG_CHV", "The card cannot be accessed because the wrong PIN was presented.", false),
    ErrorRecord::new(0x8010_006C, "SCARD_W_CHV_BLOCKED", "The card cannot be accessed because the maximum number of PIN entry attempts has been reached.", false),
    ErrorRecord::new(0x8010_006D, "SCARD_W_EOF", "The end of the smart card file has been reached.", false),
    ErrorRecord::new(0x8010_006E, "SCARD_W_CANCELLED_BY_USER", "The action was canceled by the user.", false),
    ErrorRecord::new(0x8010_006F, "SCARD_W_CARD_NOT_AUTHENTICATED", "No PIN was presented to the smart card.", false),
    ErrorRecord::new(0x8010_0070, "SCARD_W_CACHE_ITEM_NOT_FOUND", "The requested item could not be found in the cache.", false),
    ErrorRecord::new(0x8010_0071, "SCARD_W_CACHE_ITEM_STALE", "The requested cache item is too old and was deleted from the cache.", false),
    ErrorRecord::new(0x8010_0072, "SCARD_W_CACHE_ITEM_TOO_BIG", "The new cache item exceeds the maximum per-item size defined for the cache.", false),
];
