//! Power sequencing and function selection.
//!
//! Power-up walks the chip from reset to a running image: POWER_UP, the
//! mini patch, the full patch, then the receiver image and BOOT. Power-down
//! freezes the property shadows so settings made while the chip is off are
//! replayed on the next start.

use std::time::Duration;

use si468x_core::{
    ChipState, Error, Function, NvmState, PowerState, RadioEvent, Result,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::{
    cmd_boot, cmd_get_func_info, cmd_get_part_info, cmd_get_sys_state, cmd_power_up,
    parse_func_info, parse_part_info, parse_sys_state, PartInfo,
};
use crate::device::{Session, Si468x};
use crate::firmware::LoadTarget;
use crate::properties::{PropertyGroup, INT_CTL_ENABLE, INT_CTS_STC, INT_DEVNT_DSRV, INT_RDS};
use crate::tune::BandOps;

/// Delay between releasing reset and POWER_UP.
const RESET_SETTLE: Duration = Duration::from_millis(3);
/// Delay after each patch download.
const PATCH_SETTLE: Duration = Duration::from_millis(4);

const ALL_GROUPS: [PropertyGroup; 4] = [
    PropertyGroup::Common,
    PropertyGroup::Fm,
    PropertyGroup::Am,
    PropertyGroup::Dab,
];

fn property_group(ops: BandOps) -> PropertyGroup {
    match ops {
        BandOps::Am => PropertyGroup::Am,
        BandOps::Fm => PropertyGroup::Fm,
        BandOps::Dab => PropertyGroup::Dab,
    }
}

/// Interrupt sources enabled for a running function.
fn interrupt_mask(function: Function) -> u16 {
    match function {
        Function::Fm => INT_CTS_STC | INT_RDS,
        Function::Dab => INT_CTS_STC | INT_DEVNT_DSRV,
        _ => INT_CTS_STC,
    }
}

impl Session<'_> {
    fn set_power(&mut self, state: PowerState) {
        if self.state.power_state != state {
            debug!(from = ?self.state.power_state, to = ?state, "power state");
            self.state.power_state = state;
            self.shared.emit(RadioEvent::PowerStateChanged(state));
        }
    }

    /// Move the chip to `next`.
    ///
    /// Powering up switches on the supplies and boots the current function.
    /// A failed supply transition leaves the device
    /// [`Inconsistent`](PowerState::Inconsistent), after which every further
    /// transition is refused.
    pub async fn set_power_state(&mut self, next: PowerState) -> Result<()> {
        if self.state.power_state == PowerState::Inconsistent {
            return Err(Error::InvalidState("power state is inconsistent".into()));
        }
        if self.state.power_state == next {
            return Ok(());
        }

        match next {
            PowerState::PowerUp => {
                if let Err(e) = self.shared.platform.enable_supplies().await {
                    error!("enabling supplies failed: {e}");
                    self.set_power(PowerState::Inconsistent);
                    return Err(e);
                }
                self.state.nvm_state = NvmState::Uninitialized;
                self.state.chip_state = ChipState::AwaitingPowerUp;
                self.shared.reset_bus_failures().await;
                self.set_power(PowerState::PowerUp);

                if let Err(e) = self.start().await {
                    self.set_power(PowerState::PowerDown);
                    if let Err(supply) = self.shared.platform.disable_supplies().await {
                        error!("disabling supplies failed: {supply}");
                        self.set_power(PowerState::Inconsistent);
                    }
                    return Err(e);
                }
                Ok(())
            }
            PowerState::PowerDown => {
                self.set_power(PowerState::PowerDown);
                self.stop().await;
                if let Err(e) = self.shared.platform.disable_supplies().await {
                    error!("disabling supplies failed: {e}");
                    self.set_power(PowerState::Inconsistent);
                    return Err(e);
                }
                Ok(())
            }
            PowerState::Inconsistent => Err(Error::InvalidParameter(
                "cannot request the inconsistent power state".into(),
            )),
        }
    }

    /// Release reset and boot the current function. On failure the chip is
    /// put back into reset.
    pub(crate) async fn start(&mut self) -> Result<()> {
        if let Err(e) = self.boot_sequence().await {
            error!(function = %self.state.function, "start failed: {e}");
            self.shared.set_alive(false);
            self.shared.set_irq_enabled(false);
            self.shared.platform.set_reset(true).await;
            return Err(e);
        }
        self.shared.set_alive(true);
        Ok(())
    }

    async fn boot_sequence(&mut self) -> Result<()> {
        self.shared.platform.set_reset(false).await;
        sleep(RESET_SETTLE).await;
        self.shared.set_irq_enabled(true);

        let args = self.state.config.power_up;
        self.send_command(&cmd_power_up(&args)).await?;
        if self.state.chip_state != ChipState::BootloaderRunning {
            return Err(Error::NoDevice(format!(
                "chip did not enter the bootloader ({:?})",
                self.state.chip_state
            )));
        }

        self.load_firmware(Function::MiniBoot.image_name(), LoadTarget::Host)
            .await?;
        sleep(PATCH_SETTLE).await;
        let function = self.state.function;
        self.select_function(function).await
    }

    /// Load the full patch and, for receivers, boot the receiver image.
    async fn select_function(&mut self, function: Function) -> Result<()> {
        if function == Function::MiniBoot {
            return Ok(());
        }
        self.load_firmware(Function::Bootloader.image_name(), LoadTarget::Host)
            .await?;
        sleep(PATCH_SETTLE).await;
        if function == Function::Bootloader {
            self.shared.set_alive(true);
            return Ok(());
        }

        self.load_firmware(function.image_name(), LoadTarget::Host)
            .await?;
        self.send_command(&cmd_boot()).await?;
        if self.state.chip_state != ChipState::ApplicationRunning {
            return Err(Error::NoDevice(format!("{function} image did not start")));
        }

        let system = parse_sys_state(&self.send_command(&cmd_get_sys_state()).await?)?;
        let info = parse_func_info(&self.send_command(&cmd_get_func_info()).await?)?;
        info!(
            function = %function,
            system = ?system,
            version = format_args!("{}.{}.{}", info.major, info.minor, info.build),
            svn = info.svn_id,
            "firmware running"
        );
        self.shared.set_alive(true);

        self.set_property(INT_CTL_ENABLE, interrupt_mask(function))
            .await
    }

    /// Put the chip into reset. Property writes are cached from here on.
    pub(crate) async fn stop(&mut self) {
        for group in ALL_GROUPS {
            self.state.props.set_cache_only(group, true);
        }
        self.state.ops = None;
        self.shared.set_alive(false);
        self.shared.set_irq_enabled(false);
        self.shared.platform.set_reset(true).await;
    }

    /// Replay the common and the band property blocks and enable the
    /// receiver operations.
    pub(crate) async fn post_powerup_init(&mut self) -> Result<()> {
        let Some(ops) = BandOps::for_function(self.state.function) else {
            self.state.ops = None;
            return Ok(());
        };
        for group in [PropertyGroup::Common, property_group(ops)] {
            self.state.props.mark_dirty(group);
            self.state.props.set_cache_only(group, false);
            self.sync_properties(group).await?;
        }
        self.state.ops = Some(ops);
        Ok(())
    }

    /// Reboot the chip into `function` and pretune it.
    ///
    /// Selecting the function already running is a no-op.
    pub async fn change_function(
        &mut self,
        function: Function,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if function == self.state.function {
            return Ok(());
        }
        if !self.shared.model.supports(function) {
            return Err(Error::InvalidParameter(format!(
                "{} does not support {function}",
                self.shared.model
            )));
        }
        if self.state.power_state != PowerState::PowerUp {
            return Err(Error::PoweredDown);
        }

        info!(from = %self.state.function, to = %function, "changing function");
        self.stop().await;
        self.state.function = function;
        self.start().await?;

        if function.is_receiver() {
            self.post_powerup_init().await?;
            self.pretune(cancel).await?;
        }
        self.shared.emit(RadioEvent::FunctionSelected(function));
        Ok(())
    }

    /// Power up, bring the receiver online and pretune it. Powers back down
    /// if anything after the supplies fails.
    pub async fn power_up_and_pretune(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.set_power_state(PowerState::PowerUp).await?;
        let result = match self.post_powerup_init().await {
            Ok(()) => self.pretune(cancel).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                let function = self.state.function;
                self.shared.emit(RadioEvent::FunctionSelected(function));
                Ok(())
            }
            Err(e) => {
                if let Err(down) = self.set_power_state(PowerState::PowerDown).await {
                    warn!("power down after failed start: {down}");
                }
                Err(e)
            }
        }
    }

    /// Power down. A device left in mini-boot or bootloader mode returns to
    /// FM for the next power-up.
    pub async fn release(&mut self) -> Result<()> {
        self.set_power_state(PowerState::PowerDown).await?;
        if !self.state.function.is_receiver() {
            self.state.function = Function::Fm;
        }
        Ok(())
    }

    /// Identify the chip: boot the mini patch, read the part info and power
    /// down again. Fails with [`Error::NoDevice`] on a part number mismatch.
    pub async fn get_revision_info(&mut self) -> Result<PartInfo> {
        if self.state.power_state != PowerState::PowerDown {
            return Err(Error::InvalidState("power the receiver down first".into()));
        }
        let previous = self.state.function;
        self.state.function = Function::MiniBoot;

        let result = match self.set_power_state(PowerState::PowerUp).await {
            Ok(()) => {
                let reply = self.send_command(&cmd_get_part_info()).await;
                if let Err(e) = self.set_power_state(PowerState::PowerDown).await {
                    warn!("power down after identification failed: {e}");
                }
                reply.and_then(|reply| parse_part_info(&reply))
            }
            Err(e) => Err(e),
        };
        self.state.function = previous;

        let info = result?;
        let expected = self.shared.model.part_number();
        if info.part != expected {
            return Err(Error::NoDevice(format!(
                "expected Si{expected}, found Si{}",
                info.part
            )));
        }
        info!(
            part = info.part,
            revision = info.chip_revision,
            rom = info.rom_id,
            "chip identified"
        );
        Ok(info)
    }
}

impl Si468x {
    /// Identify the chip. See [`Session::get_revision_info`].
    pub async fn identify(&self) -> Result<PartInfo> {
        self.lock().await.get_revision_info().await
    }

    /// Power up into the configured function and pretune.
    pub async fn power_up(&self, cancel: &CancellationToken) -> Result<()> {
        self.lock().await.power_up_and_pretune(cancel).await
    }

    /// Switch the running receiver to another function.
    pub async fn select_function(
        &self,
        function: Function,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.lock().await.change_function(function, cancel).await
    }

    pub async fn power_down(&self) -> Result<()> {
        self.lock().await.release().await
    }
}
