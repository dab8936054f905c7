//! Firmware-command core for Silicon Labs Si468x AM/FM/DAB receivers.
//!
//! This crate drives one Si468x chip through its command interface. It
//! provides:
//!
//! - **Command engine** -- write a command, wait for clear-to-send (by
//!   interrupt, or one status poll when the wait runs out), read the reply,
//!   track the chip's lifecycle state and count bus failures.
//! - **Boot sequencer** -- supplies, reset, POWER_UP, mini patch, full patch,
//!   receiver image and BOOT, plus power-down and function changes.
//! - **Firmware loader** ([`firmware`]) -- host download in 512-byte chunks,
//!   flash-resident boot and flash programming with CRC verification.
//! - **Property cache** ([`properties`]) -- per-block shadows replayed after
//!   every restart.
//! - **Tune and seek** ([`tune`]) -- AM, FM and DAB receivers behind one
//!   operation set, with band selection from an absolute frequency.
//! - **RDS** ([`rds`]) -- FIFO drainer and a host-side block buffer.
//! - **DAB** ([`dab`]) -- the reference frequency table, prescan, ensemble
//!   scan, channel directory, service start/stop and dynamic labels.
//! - **Audio output** ([`audio`]) -- digital audio format and stream
//!   parameters.
//! - **Builder** ([`builder`]) -- fluent construction of [`Si468x`].
//!
//! All chip traffic goes through a [`Session`], the exclusive device lock.
//! The host's interrupt line is fed to [`Si468x::handle_interrupt`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use si468x::{Model, Si468xBuilder};
//! use si468x_core::Function;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(
//! #     transport: Box<dyn si468x_core::Transport>,
//! #     platform: Arc<dyn si468x_core::Platform>,
//! #     firmware: Arc<dyn si468x_core::FirmwareSource>,
//! # ) -> si468x_core::Result<()> {
//! let radio = Si468xBuilder::new(Model::Si4689)
//!     .firmware("mini", "rom00_patch_mini.bin")
//!     .firmware("patch", "rom00_patch.016.bin")
//!     .firmware("fm", "fmhd_radio.bin")
//!     .build_with_transport(transport, platform, firmware)
//!     .await?;
//!
//! let cancel = CancellationToken::new();
//! radio.power_up(&cancel).await?;
//! radio.lock().await.tune(9850, &cancel).await?;
//! radio.select_function(Function::Dab, &cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
mod boot;
pub mod builder;
pub mod commands;
pub mod dab;
pub mod device;
mod dispatch;
mod engine;
pub mod firmware;
pub mod models;
pub mod properties;
pub mod rds;
mod services;
pub mod status;
pub mod tune;

// Re-export the primary types for ergonomic `use si468x::*`.
pub use audio::{AudioFormat, AudioParams};
pub use builder::Si468xBuilder;
pub use dab::{Channel, ReferenceFrequency};
pub use device::{Session, Si468x};
pub use firmware::{FlashOperation, LoadTarget};
pub use models::Model;
pub use tune::{SeekRequest, SignalReport, TunerStatus};
