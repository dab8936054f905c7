//! Chip properties and their host-side shadow.
//!
//! Properties are 16-bit values at 16-bit addresses, grouped by the block
//! their address falls in. Every block keeps a shadow of the values written
//! through it. While the chip is stopped a block is *cache-only*: writes only
//! land in the shadow, and the next resynchronisation replays them.

use std::collections::BTreeMap;

use si468x_core::{ChipState, Error, Result};
use tracing::{debug, trace};

use crate::commands::{cmd_get_property, cmd_set_property, parse_property};
use crate::device::Session;

// ---------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------

pub const INT_CTL_ENABLE: u16 = 0x0000;
pub const INT_CTL_REPEAT: u16 = 0x0001;
pub const DIGITAL_IO_OUTPUT_SELECT: u16 = 0x0200;
pub const DIGITAL_IO_OUTPUT_SAMPLE_RATE: u16 = 0x0201;
pub const DIGITAL_IO_OUTPUT_FORMAT: u16 = 0x0202;
pub const AUDIO_ANALOG_VOLUME: u16 = 0x0300;
pub const AUDIO_MUTE: u16 = 0x0301;
pub const PIN_CONFIG_ENABLE: u16 = 0x0800;
pub const DIGITAL_SERVICE_INT_SOURCE: u16 = 0x8100;

pub const FM_SEEK_BAND_BOTTOM: u16 = 0x3100;
pub const FM_SEEK_BAND_TOP: u16 = 0x3101;
pub const FM_SEEK_FREQUENCY_SPACING: u16 = 0x3102;
pub const FM_VALID_MAX_TUNE_ERROR: u16 = 0x3200;
pub const FM_VALID_RSSI_THRESHOLD: u16 = 0x3202;
pub const FM_VALID_SNR_THRESHOLD: u16 = 0x3204;
pub const FM_AUDIO_DE_EMPHASIS: u16 = 0x3900;
pub const FM_RDS_INTERRUPT_SOURCE: u16 = 0x3C00;
pub const FM_RDS_INTERRUPT_FIFO_COUNT: u16 = 0x3C01;
pub const FM_RDS_CONFIG: u16 = 0x3C02;

pub const AM_SEEK_BAND_BOTTOM: u16 = 0x4100;
pub const AM_SEEK_BAND_TOP: u16 = 0x4101;
pub const AM_SEEK_FREQUENCY_SPACING: u16 = 0x4102;
pub const AM_VALID_MAX_TUNE_ERROR: u16 = 0x4200;
pub const AM_VALID_RSSI_THRESHOLD: u16 = 0x4202;
pub const AM_VALID_SNR_THRESHOLD: u16 = 0x4204;

pub const DAB_VALID_RSSI_THRESHOLD: u16 = 0xB201;
pub const DAB_EVENT_INTERRUPT_SOURCE: u16 = 0xB300;

/// INT_CTL_ENABLE: clear-to-send and seek/tune-complete.
pub const INT_CTS_STC: u16 = 0x0081;
/// INT_CTL_ENABLE: RDS available.
pub const INT_RDS: u16 = 0x0004;
/// INT_CTL_ENABLE: digital event and digital service data.
pub const INT_DEVNT_DSRV: u16 = 0x2010;

/// FM_RDS_INTERRUPT_SOURCE: FIFO count reached.
pub const RDS_RECV: u16 = 0x0001;
/// FM_RDS_CONFIG: RDS processing enable.
pub const RDS_ENABLE: u16 = 0x0001;
/// DAB_EVENT_INTERRUPT_SOURCE: service list interrupt enable.
pub const SRVLIST_INTEN: u16 = 0x0001;
/// DIGITAL_SERVICE_INT_SOURCE: packet and overflow interrupt enable.
pub const DSRV_INTEN: u16 = 0x0003;
/// PIN_CONFIG_ENABLE: analog DAC output.
pub const PIN_DAC_ENABLED: u16 = 0x8001;
/// PIN_CONFIG_ENABLE: I2S output.
pub const PIN_I2S_ENABLED: u16 = 0x8002;

// ---------------------------------------------------------------
// Shadow cache
// ---------------------------------------------------------------

/// Property block, selected by the top nibble of the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyGroup {
    Common,
    Fm,
    Am,
    Dab,
}

impl PropertyGroup {
    pub fn for_address(address: u16) -> Self {
        match address >> 12 {
            0x3 => PropertyGroup::Fm,
            0x4 => PropertyGroup::Am,
            0xB => PropertyGroup::Dab,
            _ => PropertyGroup::Common,
        }
    }

    fn index(self) -> usize {
        match self {
            PropertyGroup::Common => 0,
            PropertyGroup::Fm => 1,
            PropertyGroup::Am => 2,
            PropertyGroup::Dab => 3,
        }
    }
}

#[derive(Debug, Default)]
struct Shadow {
    values: BTreeMap<u16, u16>,
    cache_only: bool,
    dirty: bool,
}

/// Shadow of every property block.
#[derive(Debug, Default)]
pub(crate) struct PropertyCache {
    shadows: [Shadow; 4],
}

impl PropertyCache {
    fn shadow(&self, group: PropertyGroup) -> &Shadow {
        &self.shadows[group.index()]
    }

    fn shadow_mut(&mut self, group: PropertyGroup) -> &mut Shadow {
        &mut self.shadows[group.index()]
    }

    pub(crate) fn cached(&self, address: u16) -> Option<u16> {
        self.shadow(PropertyGroup::for_address(address))
            .values
            .get(&address)
            .copied()
    }

    pub(crate) fn set_cache_only(&mut self, group: PropertyGroup, cache_only: bool) {
        self.shadow_mut(group).cache_only = cache_only;
    }

    pub(crate) fn is_cache_only(&self, group: PropertyGroup) -> bool {
        self.shadow(group).cache_only
    }

    /// Force the next sync to replay the whole block.
    pub(crate) fn mark_dirty(&mut self, group: PropertyGroup) {
        self.shadow_mut(group).dirty = true;
    }
}

// ---------------------------------------------------------------
// Session access
// ---------------------------------------------------------------

impl Session<'_> {
    fn require_application(&self, what: &str) -> Result<()> {
        if self.state.chip_state != ChipState::ApplicationRunning {
            return Err(Error::InvalidState(format!(
                "cannot {what}: application is not running"
            )));
        }
        Ok(())
    }

    async fn write_property(&mut self, address: u16, value: u16) -> Result<()> {
        self.require_application("set property")?;
        trace!(address = format_args!("{address:#06x}"), value, "set property");
        self.send_command(&cmd_set_property(address, value)).await?;
        Ok(())
    }

    /// Write a property. While its block is cache-only the value is only
    /// recorded.
    pub async fn set_property(&mut self, address: u16, value: u16) -> Result<()> {
        let group = PropertyGroup::for_address(address);
        let shadow = self.state.props.shadow_mut(group);
        shadow.values.insert(address, value);
        if shadow.cache_only {
            shadow.dirty = true;
            return Ok(());
        }
        self.write_property(address, value).await
    }

    /// Read a property from the chip and refresh the shadow.
    pub async fn get_property(&mut self, address: u16) -> Result<u16> {
        self.require_application("get property")?;
        let reply = self.send_command(&cmd_get_property(address)).await?;
        let value = parse_property(&reply)?;
        self.state
            .props
            .shadow_mut(PropertyGroup::for_address(address))
            .values
            .insert(address, value);
        Ok(value)
    }

    /// Read a property, preferring the shadow.
    pub async fn read_property(&mut self, address: u16) -> Result<u16> {
        if let Some(value) = self.state.props.cached(address) {
            return Ok(value);
        }
        if self
            .state
            .props
            .is_cache_only(PropertyGroup::for_address(address))
        {
            return Err(Error::InvalidState(format!(
                "property {address:#06x} is not cached and the chip is stopped"
            )));
        }
        self.get_property(address).await
    }

    /// Read-modify-write. Writes only when the value changes.
    pub async fn update_bits(&mut self, address: u16, mask: u16, value: u16) -> Result<()> {
        let old = self.read_property(address).await?;
        let new = (old & !mask) | (value & mask);
        if new == old {
            return Ok(());
        }
        self.set_property(address, new).await
    }

    /// Replay a dirty block to the chip.
    pub(crate) async fn sync_properties(&mut self, group: PropertyGroup) -> Result<()> {
        let shadow = self.state.props.shadow(group);
        if !shadow.dirty || shadow.cache_only {
            return Ok(());
        }
        let values: Vec<(u16, u16)> = shadow.values.iter().map(|(a, v)| (*a, *v)).collect();
        debug!(?group, count = values.len(), "replaying properties");
        for (address, value) in values {
            self.write_property(address, value).await?;
        }
        self.state.props.shadow_mut(group).dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use si468x_core::Function;
    use si468x_test_harness::replies;

    use crate::device::testing::*;
    use crate::models::Model;

    use super::*;

    fn property_reply(value: u16) -> Vec<u8> {
        let mut reply = replies::app_ok(6);
        replies::put_le16(&mut reply, 4, value);
        reply
    }

    #[test]
    fn group_from_address() {
        assert_eq!(PropertyGroup::for_address(AUDIO_MUTE), PropertyGroup::Common);
        assert_eq!(PropertyGroup::for_address(DIGITAL_SERVICE_INT_SOURCE), PropertyGroup::Common);
        assert_eq!(PropertyGroup::for_address(FM_RDS_CONFIG), PropertyGroup::Fm);
        assert_eq!(PropertyGroup::for_address(AM_SEEK_BAND_TOP), PropertyGroup::Am);
        assert_eq!(PropertyGroup::for_address(DAB_EVENT_INTERRUPT_SOURCE), PropertyGroup::Dab);
    }

    #[tokio::test(start_paused = true)]
    async fn set_property_writes_through() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        t.mock.expect_command(&[0x13, 0x00, 0x01, 0x03, 0x03, 0x00], &replies::app_ok(4));

        let mut session = t.radio.lock().await;
        session.set_property(AUDIO_MUTE, 3).await.unwrap();
        assert_eq!(session.state.props.cached(AUDIO_MUTE), Some(3));
        assert_eq!(t.mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_only_defers_until_sync() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;

        let mut session = t.radio.lock().await;
        session.state.props.set_cache_only(PropertyGroup::Common, true);
        session.set_property(AUDIO_MUTE, 3).await.unwrap();
        session.set_property(AUDIO_ANALOG_VOLUME, 40).await.unwrap();
        assert_eq!(t.mock.write_count(), 0);

        // Replayed in address order.
        t.mock.expect_command(&[0x13, 0x00, 0x00, 0x03, 40, 0x00], &replies::app_ok(4));
        t.mock.expect_command(&[0x13, 0x00, 0x01, 0x03, 0x03, 0x00], &replies::app_ok(4));
        session.state.props.set_cache_only(PropertyGroup::Common, false);
        session.sync_properties(PropertyGroup::Common).await.unwrap();
        assert_eq!(t.mock.remaining_expectations(), 0);

        // Nothing left to replay.
        session.sync_properties(PropertyGroup::Common).await.unwrap();
        assert_eq!(t.mock.write_count(), 6);
    }

    #[tokio::test]
    async fn property_access_needs_application() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Bootloader).await;

        let mut session = t.radio.lock().await;
        assert!(matches!(
            session.get_property(AUDIO_MUTE).await.unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            session.set_property(AUDIO_MUTE, 1).await.unwrap_err(),
            Error::InvalidState(_)
        ));
        assert_eq!(t.mock.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn update_bits_reads_chip_once_and_skips_no_change() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        t.mock.expect_command(&[0x14, 0x01, 0x02, 0x3C], &property_reply(0x00F0));
        t.mock.expect_command(&[0x13, 0x00, 0x02, 0x3C, 0xF1, 0x00], &replies::app_ok(4));

        let mut session = t.radio.lock().await;
        session.update_bits(FM_RDS_CONFIG, RDS_ENABLE, RDS_ENABLE).await.unwrap();
        assert_eq!(t.mock.remaining_expectations(), 0);

        // Served from the shadow, unchanged, so no traffic.
        session.update_bits(FM_RDS_CONFIG, RDS_ENABLE, RDS_ENABLE).await.unwrap();
        assert_eq!(t.mock.write_count(), 6);
        assert_eq!(session.read_property(FM_RDS_CONFIG).await.unwrap(), 0x00F1);
    }

    #[tokio::test]
    async fn uncached_read_while_stopped_fails() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let mut session = t.radio.lock().await;
        session.state.props.set_cache_only(PropertyGroup::Fm, true);
        assert!(matches!(
            session.read_property(FM_SEEK_BAND_TOP).await.unwrap_err(),
            Error::InvalidState(_)
        ));
    }
}
