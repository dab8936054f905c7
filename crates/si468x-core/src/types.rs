//! Core types used throughout the driver.
//!
//! These enums describe the chip's power, firmware and NVM lifecycles and the
//! tuning parameters shared by the AM, FM and DAB receivers.

use std::fmt;
use std::str::FromStr;

/// Power state of the chip as tracked by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerState {
    /// Supplies off, reset asserted.
    #[default]
    PowerDown,
    /// Supplies on, chip started.
    PowerUp,
    /// A supply transition failed. Only a full power cycle clears this.
    Inconsistent,
}

/// Firmware lifecycle state, decoded from bits 7:6 of reply byte 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChipState {
    /// Waiting for the POWER_UP command.
    #[default]
    AwaitingPowerUp,
    /// Reserved encoding.
    Reserved,
    /// The bootloader is running.
    BootloaderRunning,
    /// A receiver application image is running.
    ApplicationRunning,
}

impl ChipState {
    /// Mask of the power-up state field in reply byte 3.
    pub const MASK: u8 = 0xC0;

    /// Decode from reply byte 3.
    pub fn from_status(byte3: u8) -> Self {
        match byte3 & Self::MASK {
            0x00 => ChipState::AwaitingPowerUp,
            0x40 => ChipState::Reserved,
            0x80 => ChipState::BootloaderRunning,
            _ => ChipState::ApplicationRunning,
        }
    }
}

/// Whether the SPI flash parameters have been sent since power-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NvmState {
    #[default]
    Uninitialized,
    Ready,
}

/// Which firmware image the chip runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Function {
    /// Mini patch only. Fast to reach; used for probing.
    MiniBoot,
    /// Full patch, bootloader running, no receiver.
    Bootloader,
    /// AM (and AM HD) receiver.
    Am,
    /// FM (and FM HD) receiver.
    #[default]
    Fm,
    /// DAB receiver.
    Dab,
}

impl Function {
    /// Short image name used for the `firmware-<name>` and `flash-<name>`
    /// configuration keys.
    pub fn image_name(&self) -> &'static str {
        match self {
            Function::MiniBoot => "mini",
            Function::Bootloader => "patch",
            Function::Am => "am",
            Function::Fm => "fm",
            Function::Dab => "dab",
        }
    }

    /// Returns `true` for the AM, FM and DAB receiver functions.
    pub fn is_receiver(&self) -> bool {
        matches!(self, Function::Am | Function::Fm | Function::Dab)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.image_name())
    }
}

/// Error returned when a string cannot be parsed into a [`Function`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFunctionError(String);

impl fmt::Display for ParseFunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown function: '{}'", self.0)
    }
}

impl std::error::Error for ParseFunctionError {}

impl FromStr for Function {
    type Err = ParseFunctionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mini" => Ok(Function::MiniBoot),
            "patch" | "bootloader" => Ok(Function::Bootloader),
            "am" => Ok(Function::Am),
            "fm" => Ok(Function::Fm),
            "dab" => Ok(Function::Dab),
            _ => Err(ParseFunctionError(s.to_string())),
        }
    }
}

/// Reference clock configuration (XMODE field of POWER_UP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClockMode {
    PowerDown = 0,
    #[default]
    Crystal = 1,
    ExternalSingleEnded = 2,
    ExternalDifferential = 3,
}

/// Tune mode for AM/FM tune and seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TuneMode {
    /// Fast tune, no HD acquisition.
    #[default]
    FastNoHd = 0,
    /// Fast tune, then acquire HD.
    FastWithHd = 2,
    /// Validated HD tune.
    Hd = 3,
}

/// Local oscillator injection side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InjectionSide {
    #[default]
    Auto = 0,
    Low = 1,
    High = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_state_from_status() {
        assert_eq!(ChipState::from_status(0x00), ChipState::AwaitingPowerUp);
        assert_eq!(ChipState::from_status(0x40), ChipState::Reserved);
        assert_eq!(ChipState::from_status(0x80), ChipState::BootloaderRunning);
        assert_eq!(ChipState::from_status(0xC0), ChipState::ApplicationRunning);
        // Low bits are error flags and must not affect the state.
        assert_eq!(ChipState::from_status(0xBF), ChipState::BootloaderRunning);
    }

    #[test]
    fn function_image_names() {
        assert_eq!(Function::MiniBoot.image_name(), "mini");
        assert_eq!(Function::Bootloader.image_name(), "patch");
        assert_eq!(Function::Dab.to_string(), "dab");
    }

    #[test]
    fn function_from_str() {
        assert_eq!("FM".parse::<Function>().unwrap(), Function::Fm);
        assert_eq!("bootloader".parse::<Function>().unwrap(), Function::Bootloader);
        assert!("hd".parse::<Function>().is_err());
    }

    #[test]
    fn receivers() {
        assert!(Function::Am.is_receiver());
        assert!(Function::Dab.is_receiver());
        assert!(!Function::MiniBoot.is_receiver());
        assert!(!Function::Bootloader.is_receiver());
    }

    #[test]
    fn defaults() {
        assert_eq!(PowerState::default(), PowerState::PowerDown);
        assert_eq!(ClockMode::default(), ClockMode::Crystal);
        assert_eq!(Function::default(), Function::Fm);
    }
}
