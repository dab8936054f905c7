//! Si468xBuilder -- fluent builder for constructing [`Si468x`] instances.
//!
//! Collects the board description (reference clock, firmware locations,
//! initial function) before the device is attached to its bus, platform
//! and firmware source.
//!
//! # Example
//!
//! ```no_run
//! use si468x::builder::Si468xBuilder;
//! use si468x::models::Model;
//! use si468x_core::{ClockMode, Function};
//!
//! # async fn example() -> si468x_core::Result<()> {
//! let radio = Si468xBuilder::new(Model::Si4689)
//!     .clock_mode(ClockMode::Crystal)
//!     .clk_frequency(19_200_000)
//!     .function(Function::Dab)
//!     .firmware("mini", "rom00_patch_mini.bin")
//!     .firmware("patch", "rom00_patch.016.bin")
//!     .flash_address("dab", 0x0008_6000)
//!     .build_with_transport(todo!(), todo!(), todo!())
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use si468x_core::{ClockMode, Error, FirmwareSource, Function, Platform, Result, Transport};
use tracing::warn;

use crate::commands::{clock_frequency_valid, trim_size, PowerUpArgs, TRIM_UNSET};
use crate::device::{DeviceConfig, Si468x};
use crate::models::Model;

/// Fluent builder for [`Si468x`].
///
/// Defaults: 19.2 MHz crystal, ibias 0, xcload 0, FM, RDS FIFO count 20,
/// 10 s per-frequency DAB scan timeout.
pub struct Si468xBuilder {
    model: Model,
    clock_mode: ClockMode,
    ibias: u8,
    xcload: u8,
    clk_frequency: u32,
    function: Function,
    flash_addresses: HashMap<String, u32>,
    firmware_names: HashMap<String, String>,
    rds_fifo_count: u16,
    scan_timeout: Duration,
}

impl Si468xBuilder {
    /// Create a new builder for the given chip.
    pub fn new(model: Model) -> Self {
        let defaults = DeviceConfig::default();
        Si468xBuilder {
            model,
            clock_mode: defaults.power_up.clock_mode,
            ibias: defaults.power_up.ibias,
            xcload: defaults.power_up.xcload,
            clk_frequency: defaults.power_up.clk_frequency,
            function: defaults.function,
            flash_addresses: HashMap::new(),
            firmware_names: HashMap::new(),
            rds_fifo_count: defaults.rds_fifo_count,
            scan_timeout: defaults.scan_timeout,
        }
    }

    pub fn clock_mode(mut self, mode: ClockMode) -> Self {
        self.clock_mode = mode;
        self
    }

    /// Crystal bias current, 10 uA steps.
    pub fn ibias(mut self, ibias: u8) -> Self {
        self.ibias = ibias;
        self
    }

    /// Crystal load capacitance, 0.38 pF steps.
    pub fn xcload(mut self, xcload: u8) -> Self {
        self.xcload = xcload;
        self
    }

    /// Reference clock frequency in Hz (default: 19.2 MHz).
    pub fn clk_frequency(mut self, hz: u32) -> Self {
        self.clk_frequency = hz;
        self
    }

    /// Function booted on the first power-up (default: FM).
    pub fn function(mut self, function: Function) -> Self {
        self.function = function;
        self
    }

    /// Flash base address of an image (`mini`, `patch`, `am`, `fm`, `dab`).
    pub fn flash_address(mut self, image: &str, base: u32) -> Self {
        self.flash_addresses.insert(image.to_string(), base);
        self
    }

    /// Firmware blob name of an image, as understood by the
    /// [`FirmwareSource`].
    pub fn firmware(mut self, image: &str, blob: &str) -> Self {
        self.firmware_names
            .insert(image.to_string(), blob.to_string());
        self
    }

    /// RDS FIFO fill level that raises the RDS interrupt (default: 20).
    pub fn rds_fifo_count(mut self, count: u16) -> Self {
        self.rds_fifo_count = count;
        self
    }

    /// How long a DAB ensemble scan waits for a service list on one
    /// frequency (default: 10 s).
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    fn config(&self) -> Result<DeviceConfig> {
        if !clock_frequency_valid(self.clk_frequency) {
            return Err(Error::InvalidParameter(format!(
                "reference clock {} Hz out of range",
                self.clk_frequency
            )));
        }
        if !self.model.supports(self.function) {
            return Err(Error::InvalidParameter(format!(
                "{} does not support {}",
                self.model, self.function
            )));
        }
        let tr_size = trim_size(self.clk_frequency).unwrap_or_else(|| {
            warn!(
                clk_frequency = self.clk_frequency,
                "unknown reference clock, trim size not set"
            );
            TRIM_UNSET
        });

        Ok(DeviceConfig {
            power_up: PowerUpArgs {
                clock_mode: self.clock_mode,
                tr_size,
                ibias: self.ibias,
                clk_frequency: self.clk_frequency,
                xcload: self.xcload,
            },
            function: self.function,
            flash_addresses: self.flash_addresses.clone(),
            firmware_names: self.firmware_names.clone(),
            rds_fifo_count: self.rds_fifo_count,
            scan_timeout: self.scan_timeout,
        })
    }

    /// Build an [`Si468x`] attached to caller-provided collaborators.
    ///
    /// The device starts powered down; nothing is sent to the chip until
    /// the first power-up. Must be called inside a Tokio runtime, since the
    /// background workers are spawned here.
    pub async fn build_with_transport(
        self,
        transport: Box<dyn Transport>,
        platform: Arc<dyn Platform>,
        firmware: Arc<dyn FirmwareSource>,
    ) -> Result<Si468x> {
        let config = self.config()?;
        Ok(Si468x::new(self.model, config, transport, platform, firmware))
    }
}

#[cfg(test)]
mod tests {
    use si468x_core::{ErrorKind, PowerState};
    use si468x_test_harness::{MemoryFirmware, MockPlatform, MockTransport};

    use super::*;

    async fn build(builder: Si468xBuilder) -> Result<Si468x> {
        builder
            .build_with_transport(
                Box::new(MockTransport::new()),
                Arc::new(MockPlatform::new()),
                Arc::new(MemoryFirmware::new()),
            )
            .await
    }

    #[tokio::test]
    async fn builder_defaults() {
        let radio = build(Si468xBuilder::new(Model::Si4688)).await.unwrap();
        assert_eq!(radio.model(), Model::Si4688);
        assert!(!radio.is_alive());

        let session = radio.lock().await;
        assert_eq!(session.power_state(), PowerState::PowerDown);
        assert_eq!(session.function(), Function::Fm);
        let config = &session.state.config;
        assert_eq!(config.power_up.clock_mode, ClockMode::Crystal);
        assert_eq!(config.power_up.clk_frequency, 19_200_000);
        assert_eq!(config.power_up.tr_size, 0x07);
        assert_eq!(config.rds_fifo_count, 20);
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn builder_custom_settings() {
        let radio = build(
            Si468xBuilder::new(Model::Si4689)
                .clock_mode(ClockMode::ExternalSingleEnded)
                .clk_frequency(27_000_000)
                .ibias(28)
                .xcload(40)
                .function(Function::Dab)
                .firmware("mini", "mini.bin")
                .flash_address("dab", 0x0008_6000)
                .rds_fifo_count(8)
                .scan_timeout(Duration::from_secs(3)),
        )
        .await
        .unwrap();

        let session = radio.lock().await;
        assert_eq!(session.function(), Function::Dab);
        let config = &session.state.config;
        assert_eq!(config.power_up.tr_size, 0x0a);
        assert_eq!(config.power_up.ibias, 28);
        assert_eq!(config.power_up.xcload, 40);
        assert_eq!(config.firmware_names["mini"], "mini.bin");
        assert_eq!(config.flash_addresses["dab"], 0x0008_6000);
        assert_eq!(config.rds_fifo_count, 8);
        assert_eq!(config.scan_timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn clock_without_trim_code_falls_back() {
        let radio = build(Si468xBuilder::new(Model::Si4689).clk_frequency(24_576_000))
            .await
            .unwrap();
        let session = radio.lock().await;
        assert_eq!(session.state.config.power_up.tr_size, 0x00);
    }

    #[tokio::test]
    async fn clock_out_of_range_is_rejected() {
        for hz in [4_000_000, 15_000_000, 20_000_000, 50_000_000] {
            let err = build(Si468xBuilder::new(Model::Si4689).clk_frequency(hz))
                .await
                .err()
                .unwrap();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{hz} Hz");
        }
    }

    #[tokio::test]
    async fn unsupported_initial_function() {
        let err = build(Si468xBuilder::new(Model::Si4684).function(Function::Am))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
}
