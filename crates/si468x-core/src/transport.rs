//! Collaborator traits the driver core consumes.
//!
//! The [`Transport`] trait abstracts over the physical bus to the chip (I2C
//! or SPI). The core never frames bytes for a specific bus; it hands whole
//! command frames to [`Transport::write`] and asks for exact reply lengths
//! through [`Transport::read`].
//!
//! [`Platform`] covers the board wiring around the chip: the reset line,
//! gating of the interrupt line, and the supply regulators.
//! [`FirmwareSource`] hands out firmware images by name.
//!
//! Deterministic implementations of all three live in the
//! `si468x-test-harness` crate.

use async_trait::async_trait;

use crate::error::Result;

/// Byte-level, half-duplex bus to the chip.
///
/// Both primitives are byte-exact and perform no retries. Retry and
/// dead-marking policy belongs to the driver core.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write `data` to the chip in one bus transaction.
    ///
    /// Returns the number of bytes the bus accepted. Anything other than
    /// `data.len()` is treated by the core as a failed write.
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read exactly `buf.len()` bytes from the chip in one bus transaction.
    ///
    /// Returns the number of bytes actually read.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Board-level control lines and supplies around the chip.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Drive the reset line. `true` holds the chip in reset.
    async fn set_reset(&self, asserted: bool);

    /// Gate delivery of the chip's interrupt line to the driver.
    fn set_irq_enabled(&self, enabled: bool);

    /// Switch on every supply the chip needs.
    async fn enable_supplies(&self) -> Result<()>;

    /// Switch off every supply the chip needs.
    async fn disable_supplies(&self) -> Result<()>;
}

/// Source of firmware images, looked up by blob name.
#[async_trait]
pub trait FirmwareSource: Send + Sync {
    /// Fetch the full contents of the named image.
    async fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}
