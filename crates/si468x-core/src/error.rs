//! Error types for the Si468x driver.
//!
//! All fallible operations across the driver return [`Result<T>`], which
//! uses [`Error`] as the error type. Bus failures, protocol decode errors,
//! chip-reported command errors, and state-precondition violations are all
//! captured here.
//!
//! Callers that need to decide *what to do* about a failure (retry, give up,
//! report a usage bug) should match on [`Error::kind()`] rather than on the
//! individual variants.

/// Error category reported by the chip in byte 4 of a reply whose status
/// carries the ERR flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ChipError {
    /// Code 0x01.
    #[error("unspecified")]
    Unspecified,
    /// Code 0x02.
    #[error("reply overflow")]
    ReplyOverflow,
    /// Code 0x03.
    #[error("not available")]
    NotAvailable,
    /// Code 0x04.
    #[error("not supported")]
    NotSupported,
    /// Code 0x05.
    #[error("bad frequency")]
    BadFrequency,
    /// Code 0x10.
    #[error("bad command")]
    CommandNotFound,
    /// Codes 0x11..=0x17; the payload is the 1-based argument number.
    #[error("bad argument #{0}")]
    BadArgument(u8),
    /// Code 0x18. The chip is still working on a previous command.
    #[error("command busy")]
    Busy,
    /// Code 0x19.
    #[error("at band limit or cannot seek further")]
    BandLimit,
    /// Code 0x20.
    #[error("bad NVM")]
    BadNvm,
    /// Code 0x30.
    #[error("bad patch")]
    BadPatch,
    /// Code 0x31.
    #[error("bad boot mode")]
    BadBootMode,
    /// Code 0x40.
    #[error("bad property")]
    BadProperty,
    /// Code 0x50.
    #[error("not acquired")]
    NotAcquired,
    /// Code 0xFF.
    #[error("application not supported")]
    AppNotSupported,
    /// Any code not listed above.
    #[error("unknown error code {0:#04x}")]
    Unknown(u8),
}

impl ChipError {
    /// Decode the numeric error code from a reply.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => ChipError::Unspecified,
            0x02 => ChipError::ReplyOverflow,
            0x03 => ChipError::NotAvailable,
            0x04 => ChipError::NotSupported,
            0x05 => ChipError::BadFrequency,
            0x10 => ChipError::CommandNotFound,
            0x11..=0x17 => ChipError::BadArgument(code - 0x10),
            0x18 => ChipError::Busy,
            0x19 => ChipError::BandLimit,
            0x20 => ChipError::BadNvm,
            0x30 => ChipError::BadPatch,
            0x31 => ChipError::BadBootMode,
            0x40 => ChipError::BadProperty,
            0x50 => ChipError::NotAcquired,
            0xFF => ChipError::AppNotSupported,
            other => ChipError::Unknown(other),
        }
    }

    /// The numeric code this category was decoded from.
    pub fn code(&self) -> u8 {
        match self {
            ChipError::Unspecified => 0x01,
            ChipError::ReplyOverflow => 0x02,
            ChipError::NotAvailable => 0x03,
            ChipError::NotSupported => 0x04,
            ChipError::BadFrequency => 0x05,
            ChipError::CommandNotFound => 0x10,
            ChipError::BadArgument(n) => 0x10 + n,
            ChipError::Busy => 0x18,
            ChipError::BandLimit => 0x19,
            ChipError::BadNvm => 0x20,
            ChipError::BadPatch => 0x30,
            ChipError::BadBootMode => 0x31,
            ChipError::BadProperty => 0x40,
            ChipError::NotAcquired => 0x50,
            ChipError::AppNotSupported => 0xFF,
            ChipError::Unknown(code) => *code,
        }
    }

    /// Semantic classification of this chip error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChipError::Busy => ErrorKind::Busy,
            ChipError::BadNvm
            | ChipError::BadPatch
            | ChipError::Unspecified
            | ChipError::Unknown(_) => ErrorKind::HardwareFault,
            ChipError::NotAvailable | ChipError::NotSupported | ChipError::AppNotSupported => {
                ErrorKind::Unsupported
            }
            _ => ErrorKind::InvalidArgument,
        }
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The chip is busy; the caller may retry the same request later.
    Busy,
    /// The request itself was wrong. Retrying it unchanged will fail again.
    InvalidArgument,
    /// The chip or its firmware is in a bad state.
    HardwareFault,
    /// The loaded firmware cannot do what was asked.
    Unsupported,
    /// No reply arrived in time.
    Timeout,
    /// The bus failed or the device was declared dead.
    Transport,
    /// The device is not in a state that allows the request.
    State,
    /// The caller cancelled the operation.
    Cancelled,
}

/// The error type for all Si468x driver operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A bus-level error reported by the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A malformed or truncated reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the chip.
    #[error("timeout waiting for response")]
    Timeout,

    /// The chip rejected a command and reported an error code.
    #[error("chip error: {0}")]
    Chip(#[from] ChipError),

    /// The requested operation is not supported by this chip or function.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to a driver operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The chip is not in the lifecycle state the operation needs.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A command was issued while the device is powered down.
    #[error("device is powered down")]
    PoweredDown,

    /// The device was declared dead (I/O failure storm or teardown).
    #[error("device is not alive")]
    NotAlive,

    /// The chip did not come up as expected or is not the configured part.
    #[error("no device: {0}")]
    NoDevice(String),

    /// The chip rejected the CRC of an image written to flash.
    #[error("flash CRC check failed")]
    CrcMismatch,

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A non-blocking read found no data.
    #[error("operation would block")]
    WouldBlock,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Chip(chip) => chip.kind(),
            Error::Transport(_) | Error::Io(_) | Error::NotAlive => ErrorKind::Transport,
            Error::Protocol(_) | Error::CrcMismatch => ErrorKind::HardwareFault,
            Error::NoDevice(_) => ErrorKind::HardwareFault,
            Error::Timeout => ErrorKind::Timeout,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::InvalidParameter(_) => ErrorKind::InvalidArgument,
            Error::InvalidState(_) | Error::PoweredDown => ErrorKind::State,
            Error::WouldBlock => ErrorKind::Busy,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns `true` if retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Busy | ErrorKind::Timeout)
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_error_busy_is_retryable() {
        let e = Error::from(ChipError::from_code(0x18));
        assert_eq!(e.kind(), ErrorKind::Busy);
        assert!(e.is_retryable());
    }

    #[test]
    fn chip_error_bad_argument_is_invalid_argument() {
        let chip = ChipError::from_code(0x11);
        assert_eq!(chip, ChipError::BadArgument(1));
        assert_eq!(chip.kind(), ErrorKind::InvalidArgument);
        assert!(!Error::Chip(chip).is_retryable());
    }

    #[test]
    fn chip_error_bad_argument_range() {
        for code in 0x11..=0x17u8 {
            let chip = ChipError::from_code(code);
            assert_eq!(chip, ChipError::BadArgument(code - 0x10));
            assert_eq!(chip.code(), code);
        }
    }

    #[test]
    fn chip_error_hardware_faults() {
        for code in [0x01, 0x20, 0x30, 0x77] {
            assert_eq!(
                ChipError::from_code(code).kind(),
                ErrorKind::HardwareFault,
                "code {code:#04x}"
            );
        }
    }

    #[test]
    fn chip_error_unsupported() {
        for code in [0x03, 0x04, 0xFF] {
            assert_eq!(ChipError::from_code(code).kind(), ErrorKind::Unsupported);
        }
    }

    #[test]
    fn chip_error_invalid_argument_family() {
        for code in [0x02, 0x05, 0x10, 0x19, 0x31, 0x40, 0x50] {
            assert_eq!(
                ChipError::from_code(code).kind(),
                ErrorKind::InvalidArgument,
                "code {code:#04x}"
            );
        }
    }

    #[test]
    fn chip_error_unknown_keeps_code() {
        let chip = ChipError::from_code(0x42);
        assert_eq!(chip, ChipError::Unknown(0x42));
        assert_eq!(chip.code(), 0x42);
        assert_eq!(chip.to_string(), "unknown error code 0x42");
    }

    #[test]
    fn error_display_chip() {
        let e = Error::Chip(ChipError::BadArgument(3));
        assert_eq!(e.to_string(), "chip error: bad argument #3");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_powered_down() {
        assert_eq!(Error::PoweredDown.to_string(), "device is powered down");
    }

    #[test]
    fn state_errors_classify_as_state() {
        assert_eq!(Error::PoweredDown.kind(), ErrorKind::State);
        assert_eq!(
            Error::InvalidState("bootloader not running".into()).kind(),
            ErrorKind::State
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert_eq!(e.kind(), ErrorKind::Transport);
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
