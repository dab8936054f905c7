//! si468x-core: Core traits, types, and error definitions for the Si468x
//! AM/FM/DAB receiver driver.
//!
//! This crate defines the pieces shared between the driver core and the
//! code that plugs it into a system: the bus, board and firmware
//! collaborator traits, lifecycle enums, events, and the error type.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level bus to the chip
//! - [`Platform`] -- reset line, interrupt gating and supplies
//! - [`FirmwareSource`] -- firmware images by name
//! - [`RadioEvent`] -- asynchronous state change notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod band;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use band::{Band, ParseBandError};
pub use error::{ChipError, Error, ErrorKind, Result};
pub use events::RadioEvent;
pub use transport::{FirmwareSource, Platform, Transport};
pub use types::*;
