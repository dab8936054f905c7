//! Decoding of the status bytes that lead every reply.
//!
//! Byte 0 carries the interrupt indicators plus ERR and CTS, byte 1 the
//! digital radio indicators, byte 3 the power-up state and the chip's
//! sticky error flags.

use si468x_core::ChipState;
use tracing::error;

/// Seek/tune complete.
pub const STC_INT: u8 = 0x01;
/// Automatically controlled features changed.
pub const ACF_INT: u8 = 0x02;
/// RDS data available.
pub const RDS_INT: u8 = 0x04;
/// Received signal quality threshold crossed.
pub const RSQ_INT: u8 = 0x08;
/// A digital service data component needs attention.
pub const DSRV_INT: u8 = 0x10;
/// Digital radio acquisition state changed.
pub const DACQ_INT: u8 = 0x20;
/// The last command failed.
pub const ERR_CMD: u8 = 0x40;
/// Clear to send.
pub const CTS: u8 = 0x80;

/// HD radio ACF status changed (byte 1).
pub const DACF_INT: u8 = 0x01;
/// Digital radio event changed (byte 1).
pub const DEVNT_INT: u8 = 0x20;

const ERRNR: u8 = 0x01;
const ARBERR: u8 = 0x02;
const CMDOFERR: u8 = 0x04;
const REPOFERR: u8 = 0x08;
const DSPERR: u8 = 0x10;
const RFFE_ERR: u8 = 0x20;

/// The first two status bytes, as read by a bare status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub byte0: u8,
    pub byte1: u8,
}

impl Status {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Status {
            byte0: bytes.first().copied().unwrap_or(0),
            byte1: bytes.get(1).copied().unwrap_or(0),
        }
    }

    pub fn cts(&self) -> bool {
        self.byte0 & CTS != 0
    }

    pub fn err(&self) -> bool {
        self.byte0 & ERR_CMD != 0
    }

    pub fn stc(&self) -> bool {
        self.byte0 & STC_INT != 0
    }

    pub fn rds(&self) -> bool {
        self.byte0 & RDS_INT != 0
    }

    pub fn dsrv(&self) -> bool {
        self.byte0 & DSRV_INT != 0
    }

    pub fn dacq(&self) -> bool {
        self.byte0 & DACQ_INT != 0
    }

    pub fn acf(&self) -> bool {
        self.byte0 & ACF_INT != 0
    }

    pub fn rsq(&self) -> bool {
        self.byte0 & RSQ_INT != 0
    }

    pub fn devnt(&self) -> bool {
        self.byte1 & DEVNT_INT != 0
    }

    pub fn dacf(&self) -> bool {
        self.byte1 & DACF_INT != 0
    }
}

/// Power-up state encoded in reply byte 3.
pub fn chip_state(reply: &[u8]) -> Option<ChipState> {
    reply.get(3).map(|b| ChipState::from_status(*b))
}

/// Log every sticky error flag set in reply byte 3. Returns `true` if any
/// flag was set.
pub fn log_error_flags(byte3: u8) -> bool {
    const FLAGS: [(u8, &str); 6] = [
        (RFFE_ERR, "RF front end in an unexpected state"),
        (DSPERR, "DSP frame overrun"),
        (REPOFERR, "control interface dropped data during a reply read"),
        (CMDOFERR, "control interface dropped data during a command write"),
        (ARBERR, "arbiter error"),
        (ERRNR, "non-recoverable error"),
    ];
    let mut any = false;
    for (mask, what) in FLAGS {
        if byte3 & mask != 0 {
            error!(flags = byte3, "chip error: {what}");
            any = true;
        }
    }
    any
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits() {
        let s = Status::from_bytes(&[0x95, 0x20]);
        assert!(s.cts());
        assert!(s.stc());
        assert!(s.rds());
        assert!(s.dsrv());
        assert!(!s.err());
        assert!(!s.dacq());
        assert!(s.devnt());
        assert!(!s.dacf());
    }

    #[test]
    fn short_status_is_zero_filled() {
        let s = Status::from_bytes(&[0x80]);
        assert!(s.cts());
        assert_eq!(s.byte1, 0);
        assert_eq!(Status::from_bytes(&[]), Status::default());
    }

    #[test]
    fn chip_state_from_reply() {
        assert_eq!(
            chip_state(&[0x80, 0, 0, 0xC0]),
            Some(ChipState::ApplicationRunning)
        );
        assert_eq!(chip_state(&[0x80, 0]), None);
    }

    #[test]
    fn error_flags_detected() {
        assert!(!log_error_flags(0xC0));
        assert!(log_error_flags(0xC1));
        assert!(log_error_flags(0x20));
    }
}
