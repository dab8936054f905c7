//! Firmware loading.
//!
//! Every image is looked up under its short name (`mini`, `patch`, `am`,
//! `fm`, `dab`) in two tables: a firmware blob name for host download and a
//! flash base address for images resident in SPI flash. A blob wins when
//! both are configured; the flash copy is the fallback when the blob cannot
//! be fetched.
//!
//! Writing a blob into flash uses the same lookup, then verifies the whole
//! image with the chip's CRC32 check.

use crc::{Crc, CRC_32_MPEG_2};
use si468x_core::{ChipState, Error, Function, NvmState, PowerState, Result};
use tracing::{debug, error, info, warn};

use crate::commands::{
    cmd_flash_check_crc, cmd_flash_erase_chip, cmd_flash_load_image, cmd_flash_set_nvm_params,
    cmd_flash_write_block, cmd_host_load, cmd_load_init, MAX_HOST_LOAD,
};
use crate::device::{Session, Si468x};

/// CRC the chip's flash verification expects.
const IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// CRC32 (MPEG-2) of a whole firmware image.
pub fn image_crc(data: &[u8]) -> u32 {
    IMAGE_CRC.checksum(data)
}

/// Where a firmware image goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget {
    /// Download into chip RAM and leave it ready to boot.
    Host,
    /// Program into SPI flash at the image's base address.
    Flash,
}

/// A flash maintenance job for [`Si468x::program_flash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOperation {
    /// Erase the whole flash chip.
    Erase,
    /// Write the firmware image of a function to its flash address.
    Image(Function),
}

impl Session<'_> {
    /// Send the SPI flash parameters once per power cycle.
    pub(crate) async fn send_nvm_params(&mut self) -> Result<()> {
        if self.state.nvm_state != NvmState::Uninitialized {
            return Ok(());
        }
        self.send_command(&cmd_flash_set_nvm_params()).await?;
        self.state.nvm_state = NvmState::Ready;
        debug!("flash parameters set");
        Ok(())
    }

    /// Load the image called `name` to `target`.
    pub async fn load_firmware(&mut self, name: &str, target: LoadTarget) -> Result<()> {
        let flash_base = self.state.config.flash_addresses.get(name).copied();
        let blob_name = self.state.config.firmware_names.get(name).cloned();
        if flash_base.is_none() && blob_name.is_none() {
            return Err(Error::InvalidParameter(format!(
                "no firmware or flash address configured for '{name}'"
            )));
        }

        let blob = match blob_name {
            Some(blob_name) => match self.shared.firmware.fetch(&blob_name).await {
                Ok(data) => {
                    debug!(image = name, blob = %blob_name, len = data.len(), "firmware fetched");
                    Some(data)
                }
                Err(e) if flash_base.is_some() => {
                    warn!(image = name, blob = %blob_name, "firmware fetch failed, using flash: {e}");
                    None
                }
                Err(e) => {
                    error!(image = name, blob = %blob_name, "firmware fetch failed: {e}");
                    return Err(e);
                }
            },
            None => None,
        };

        if target == LoadTarget::Host {
            self.send_command(&cmd_load_init()).await?;
        }
        if target == LoadTarget::Flash || blob.is_none() {
            self.send_nvm_params().await?;
        }

        match (blob, flash_base, target) {
            (Some(data), _, LoadTarget::Host) => {
                for chunk in data.chunks(MAX_HOST_LOAD) {
                    self.send_command(&cmd_host_load(chunk)).await?;
                }
                info!(image = name, len = data.len(), "firmware downloaded");
            }
            (Some(data), Some(base), LoadTarget::Flash) => {
                self.write_flash_image(name, base, &data).await?;
            }
            (Some(_), None, LoadTarget::Flash) => {
                return Err(Error::InvalidParameter(format!(
                    "no flash address configured for '{name}'"
                )));
            }
            (None, _, LoadTarget::Flash) => {
                return Err(Error::InvalidParameter(format!(
                    "no firmware image to write for '{name}'"
                )));
            }
            (None, Some(base), LoadTarget::Host) => {
                self.send_command(&cmd_flash_load_image(base)).await?;
                info!(image = name, base = format_args!("{base:#x}"), "firmware loaded from flash");
            }
            (None, None, LoadTarget::Host) => {
                return Err(Error::InvalidParameter(format!(
                    "no firmware available for '{name}'"
                )));
            }
        }
        Ok(())
    }

    async fn write_flash_image(&mut self, name: &str, base: u32, data: &[u8]) -> Result<()> {
        let size = u32::try_from(data.len())
            .map_err(|_| Error::InvalidParameter(format!("image '{name}' is too large")))?;
        if base.checked_add(size).is_none() {
            return Err(Error::InvalidParameter(format!(
                "image '{name}' ({size} bytes) does not fit above {base:#x}"
            )));
        }
        // Every block starts below base + size, which fits.
        for (i, chunk) in data.chunks(MAX_HOST_LOAD).enumerate() {
            let address = base + (i * MAX_HOST_LOAD) as u32;
            self.send_command(&cmd_flash_write_block(address, chunk)).await?;
        }

        let crc = image_crc(data);
        match self.send_command(&cmd_flash_check_crc(crc, base, size)).await {
            Ok(_) => {
                info!(image = name, base = format_args!("{base:#x}"), size, "flash image written");
                Ok(())
            }
            Err(Error::Chip(chip)) => {
                error!(image = name, crc = format_args!("{crc:#010x}"), "flash CRC rejected: {chip}");
                Err(Error::CrcMismatch)
            }
            Err(e) => Err(e),
        }
    }

    /// Write the image of `function` into flash. The flash parameters must
    /// already be set.
    pub async fn flash_nvm(&mut self, function: Function) -> Result<()> {
        if self.state.nvm_state != NvmState::Ready {
            return Err(Error::InvalidState("flash parameters not set".into()));
        }
        self.load_firmware(function.image_name(), LoadTarget::Flash).await
    }

    /// Erase the whole flash chip. The flash parameters must already be set.
    pub async fn erase_flash(&mut self) -> Result<()> {
        if self.state.nvm_state != NvmState::Ready {
            return Err(Error::InvalidState("flash parameters not set".into()));
        }
        if self.state.chip_state != ChipState::BootloaderRunning {
            return Err(Error::InvalidState("bootloader not running".into()));
        }
        info!("erasing flash");
        self.send_command(&cmd_flash_erase_chip()).await?;
        Ok(())
    }

    async fn run_flash_operation(&mut self, op: FlashOperation) -> Result<()> {
        self.send_nvm_params().await?;
        match op {
            FlashOperation::Erase => self.erase_flash().await,
            FlashOperation::Image(function) => self.flash_nvm(function).await,
        }
    }
}

impl Si468x {
    /// Power the chip up in bootloader mode, run one flash job and power
    /// it down again.
    pub async fn program_flash(&self, op: FlashOperation) -> Result<()> {
        let mut session = self.lock().await;
        if session.power_state() != PowerState::PowerDown {
            return Err(Error::InvalidState("power the receiver down first".into()));
        }
        let previous = session.state.function;
        session.state.function = Function::Bootloader;
        session.set_power_state(PowerState::PowerUp).await?;

        let result = session.run_flash_operation(op).await;
        if let Err(e) = session.set_power_state(PowerState::PowerDown).await {
            warn!("power down after flash job failed: {e}");
        }
        session.state.function = previous;
        result
    }
}

#[cfg(test)]
mod tests {
    use si468x_core::ErrorKind;
    use si468x_test_harness::{replies, MemoryFirmware};

    use crate::commands::cmd_power_up;
    use crate::device::testing::*;
    use crate::device::DeviceConfig;
    use crate::models::Model;

    use super::*;

    fn boot_ok() -> Vec<u8> {
        replies::ok(4, replies::BOOTLOADER)
    }

    fn bootloader_radio(config: DeviceConfig, firmware: MemoryFirmware) -> TestRadio {
        make_test_radio_with(Model::Si4689, config, firmware)
    }

    async fn force_bootloader(t: &TestRadio) {
        force_running(&t.radio, Function::Bootloader).await;
    }

    #[test]
    fn crc_is_mpeg2() {
        // Check value of CRC-32/MPEG-2.
        assert_eq!(image_crc(b"123456789"), 0x0376_E6E7);
    }

    #[tokio::test(start_paused = true)]
    async fn host_load_in_chunks() {
        let mut config = DeviceConfig::default();
        config.firmware_names.insert("fm".into(), "fm.bin".into());
        let image: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        let t = bootloader_radio(config, MemoryFirmware::new().with_image("fm.bin", &image));
        force_bootloader(&t).await;

        t.mock.expect_command(&[0x06, 0x00], &boot_ok());
        t.mock
            .expect_command(&cmd_host_load(&image[..512]).frame(), &boot_ok());
        t.mock
            .expect_command(&cmd_host_load(&image[512..]).frame(), &boot_ok());

        let mut session = t.radio.lock().await;
        session.load_firmware("fm", LoadTarget::Host).await.unwrap();
        assert_eq!(t.mock.remaining_expectations(), 0);
        // Host download with a blob never touches the flash interface.
        assert_eq!(session.nvm_state(), NvmState::Uninitialized);
        let first = &t.mock.sent_data()[3];
        assert_eq!(&first[..4], &[0x04, 0, 0, 0]);
        assert_eq!(first.len(), 4 + 512);
    }

    #[tokio::test(start_paused = true)]
    async fn flash_boot_when_blob_missing() {
        let mut config = DeviceConfig::default();
        config.flash_addresses.insert("dab".into(), 0x0008_6000);
        config.firmware_names.insert("dab".into(), "dab.bin".into());
        let t = bootloader_radio(config, MemoryFirmware::new());
        force_bootloader(&t).await;

        t.mock.expect_command(&[0x06, 0x00], &boot_ok());
        t.mock
            .expect_command(&cmd_flash_set_nvm_params().frame(), &boot_ok());
        t.mock.expect_command(
            &[0x05, 0, 0, 0, 0x00, 0x60, 0x08, 0x00, 0, 0, 0, 0],
            &boot_ok(),
        );

        let mut session = t.radio.lock().await;
        session.load_firmware("dab", LoadTarget::Host).await.unwrap();
        assert_eq!(session.nvm_state(), NvmState::Ready);
        assert_eq!(t.mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nvm_params_sent_once_per_power_cycle() {
        let mut config = DeviceConfig::default();
        config.flash_addresses.insert("am".into(), 0x1000);
        config.flash_addresses.insert("fm".into(), 0x2000);
        let t = bootloader_radio(config, MemoryFirmware::new());
        force_bootloader(&t).await;

        t.mock.expect_command(&[0x06, 0x00], &boot_ok());
        t.mock
            .expect_command(&cmd_flash_set_nvm_params().frame(), &boot_ok());
        t.mock
            .expect_command(&cmd_flash_load_image(0x1000).frame(), &boot_ok());
        t.mock.expect_command(&[0x06, 0x00], &boot_ok());
        t.mock
            .expect_command(&cmd_flash_load_image(0x2000).frame(), &boot_ok());

        let mut session = t.radio.lock().await;
        session.load_firmware("am", LoadTarget::Host).await.unwrap();
        session.load_firmware("fm", LoadTarget::Host).await.unwrap();
        assert_eq!(t.mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn unknown_image_is_rejected_without_io() {
        let t = bootloader_radio(DeviceConfig::default(), MemoryFirmware::new());
        force_bootloader(&t).await;
        let mut session = t.radio.lock().await;
        let err = session
            .load_firmware("fm", LoadTarget::Host)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(t.mock.write_count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_without_flash_propagates() {
        let mut config = DeviceConfig::default();
        config.firmware_names.insert("fm".into(), "missing.bin".into());
        let t = bootloader_radio(config, MemoryFirmware::new());
        force_bootloader(&t).await;
        let mut session = t.radio.lock().await;
        assert!(session.load_firmware("fm", LoadTarget::Host).await.is_err());
        assert_eq!(t.mock.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flash_write_then_crc() {
        let mut config = DeviceConfig::default();
        config.flash_addresses.insert("fm".into(), 0x4000);
        config.firmware_names.insert("fm".into(), "fm.bin".into());
        let image = vec![0xA5u8; 700];
        let t = bootloader_radio(config, MemoryFirmware::new().with_image("fm.bin", &image));
        force_bootloader(&t).await;
        t.radio.lock().await.state.nvm_state = NvmState::Ready;

        t.mock.expect_command(
            &cmd_flash_write_block(0x4000, &image[..512]).frame(),
            &boot_ok(),
        );
        t.mock.expect_command(
            &cmd_flash_write_block(0x4200, &image[512..]).frame(),
            &boot_ok(),
        );
        t.mock.expect_command(
            &cmd_flash_check_crc(image_crc(&image), 0x4000, 700).frame(),
            &boot_ok(),
        );

        let mut session = t.radio.lock().await;
        session.flash_nvm(Function::Fm).await.unwrap();
        assert_eq!(t.mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn image_past_end_of_address_space_is_rejected() {
        let mut config = DeviceConfig::default();
        config.flash_addresses.insert("fm".into(), 0xFFFF_FF00);
        config.firmware_names.insert("fm".into(), "fm.bin".into());
        let image = vec![0x5Au8; 700];
        let t = bootloader_radio(config, MemoryFirmware::new().with_image("fm.bin", &image));
        force_bootloader(&t).await;
        t.radio.lock().await.state.nvm_state = NvmState::Ready;

        let mut session = t.radio.lock().await;
        let err = session.flash_nvm(Function::Fm).await.unwrap_err();
        assert_eq!(err.kind(), si468x_core::ErrorKind::InvalidArgument);
        assert_eq!(t.mock.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn crc_rejection_maps_to_mismatch() {
        let mut config = DeviceConfig::default();
        config.flash_addresses.insert("am".into(), 0);
        config.firmware_names.insert("am".into(), "am.bin".into());
        let t = bootloader_radio(config, MemoryFirmware::new().with_image("am.bin", &[1, 2, 3]));
        force_bootloader(&t).await;
        t.radio.lock().await.state.nvm_state = NvmState::Ready;

        t.mock
            .expect_command(&cmd_flash_write_block(0, &[1, 2, 3]).frame(), &boot_ok());
        let rejected = replies::error(0x20, replies::BOOTLOADER);
        t.mock.expect_command(
            &cmd_flash_check_crc(image_crc(&[1, 2, 3]), 0, 3).frame(),
            &rejected,
        );
        t.mock.expect(&[0x00], &rejected);

        let mut session = t.radio.lock().await;
        let err = session.flash_nvm(Function::Am).await.unwrap_err();
        assert!(matches!(err, Error::CrcMismatch));
    }

    #[tokio::test]
    async fn flash_jobs_need_nvm_params() {
        let t = bootloader_radio(DeviceConfig::default(), MemoryFirmware::new());
        force_bootloader(&t).await;
        let mut session = t.radio.lock().await;
        assert_eq!(
            session.flash_nvm(Function::Fm).await.unwrap_err().kind(),
            ErrorKind::State
        );
        assert_eq!(session.erase_flash().await.unwrap_err().kind(), ErrorKind::State);
        assert_eq!(t.mock.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn program_flash_erase_cycles_power() {
        let mut config = DeviceConfig::default();
        config.firmware_names.insert("mini".into(), "mini.bin".into());
        config.firmware_names.insert("patch".into(), "patch.bin".into());
        let power_up = cmd_power_up(&config.power_up).frame();
        let firmware = MemoryFirmware::new()
            .with_image("mini.bin", &[0x11])
            .with_image("patch.bin", &[0x22]);
        let t = make_test_radio_with(Model::Si4689, config, firmware);

        t.mock.expect_command(&power_up, &boot_ok());
        t.mock.expect_command(&[0x06, 0x00], &boot_ok());
        t.mock
            .expect_command(&cmd_host_load(&[0x11]).frame(), &boot_ok());
        t.mock.expect_command(&[0x06, 0x00], &boot_ok());
        t.mock
            .expect_command(&cmd_host_load(&[0x22]).frame(), &boot_ok());
        t.mock
            .expect_command(&cmd_flash_set_nvm_params().frame(), &boot_ok());
        t.mock
            .expect_command(&cmd_flash_erase_chip().frame(), &boot_ok());

        t.radio.program_flash(FlashOperation::Erase).await.unwrap();
        assert_eq!(t.mock.remaining_expectations(), 0);

        let session = t.radio.lock().await;
        assert_eq!(session.power_state(), PowerState::PowerDown);
        assert_eq!(session.function(), Function::Fm);
    }
}
