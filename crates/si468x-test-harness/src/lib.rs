//! si468x-test-harness: Test utilities and mock collaborators for the
//! Si468x driver.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of
//! the command engine without a chip on the bus, [`MockPlatform`] to observe
//! reset, interrupt and supply sequencing, [`MemoryFirmware`] to serve
//! firmware images from memory, and the [`replies`] helpers to build chip
//! replies.

pub mod mock_bus;
pub mod mock_platform;
pub mod replies;

pub use mock_bus::MockTransport;
pub use mock_platform::{MemoryFirmware, MockPlatform, PlatformEvent};
