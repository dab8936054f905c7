//! Si468x command builders and reply parsers.
//!
//! This module describes every command the core issues: its opcode, its
//! fixed argument count, the reply length the core reads back and the
//! timeout class used while waiting for CTS. Builders return a [`Command`]
//! ready for the engine; parsers decode the raw reply (status bytes
//! included) into report structs.
//!
//! All functions are pure. Nothing here touches the bus.
//!
//! Multi-byte fields are little-endian on the wire in both directions.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use si468x_core::{ClockMode, Error, InjectionSide, Result, TuneMode};

/// Largest firmware chunk carried by a single load command.
pub const MAX_HOST_LOAD: usize = 512;

/// Largest fixed argument count of any command.
pub const CMD_MAX_ARGS: usize = 15;

/// Largest number of entries in a DAB frequency list.
pub const DAB_MAX_FREQUENCIES: usize = 48;

// ---------------------------------------------------------------
// Timeout classes
// ---------------------------------------------------------------

/// How long the engine waits for CTS before falling back to a status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutClass {
    /// Property access and status queries.
    Default,
    /// Tune and seek submission.
    Tune,
    /// BOOT.
    Boot,
    /// Flash CRC verification.
    Crc,
    /// Firmware transfer. The chip never raises CTS by interrupt here.
    Load,
    /// POWER_UP. Never signalled by interrupt either.
    PowerUp,
    /// GET_PART_INFO and flash-resident image load.
    Long,
}

impl TimeoutClass {
    pub fn duration(self) -> Duration {
        match self {
            TimeoutClass::Default => Duration::from_millis(100),
            TimeoutClass::Tune => Duration::from_millis(700),
            TimeoutClass::Boot => Duration::from_millis(300),
            TimeoutClass::Crc => Duration::from_secs(5),
            TimeoutClass::Load => Duration::ZERO,
            TimeoutClass::PowerUp => Duration::from_micros(20),
            TimeoutClass::Long => Duration::from_millis(400),
        }
    }

    /// Classes whose completion always goes through the poll path.
    pub fn poll_only(self) -> bool {
        matches!(self, TimeoutClass::Load | TimeoutClass::PowerUp)
    }
}

// ---------------------------------------------------------------
// Command catalogue
// ---------------------------------------------------------------

/// Static description of one command opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    pub id: u8,
    pub name: &'static str,
    /// Fixed argument count (the minimum for variable-length commands).
    pub nargs: usize,
    /// Reply length read back by default.
    pub nresp: usize,
    /// Whether a payload may follow the fixed arguments.
    pub variable: bool,
}

const fn fixed(id: u8, name: &'static str, nargs: usize, nresp: usize) -> CommandInfo {
    CommandInfo {
        id,
        name,
        nargs,
        nresp,
        variable: false,
    }
}

const fn variable(id: u8, name: &'static str, nargs: usize, nresp: usize) -> CommandInfo {
    CommandInfo {
        id,
        name,
        nargs,
        nresp,
        variable: true,
    }
}

pub const RD_REPLY: CommandInfo = fixed(0x00, "RD_REPLY", 0, 6);
pub const POWER_UP: CommandInfo = fixed(0x01, "POWER_UP", 15, 4);
pub const HOST_LOAD: CommandInfo = variable(0x04, "HOST_LOAD", 3, 4);
pub const FLASH_LOAD: CommandInfo = variable(0x05, "FLASH_LOAD", 3, 4);
pub const LOAD_INIT: CommandInfo = fixed(0x06, "LOAD_INIT", 1, 4);
pub const BOOT: CommandInfo = fixed(0x07, "BOOT", 1, 4);
pub const GET_PART_INFO: CommandInfo = fixed(0x08, "GET_PART_INFO", 1, 23);
pub const GET_SYS_STATE: CommandInfo = fixed(0x09, "GET_SYS_STATE", 1, 6);
pub const GET_FUNC_INFO: CommandInfo = fixed(0x12, "GET_FUNC_INFO", 1, 12);
pub const SET_PROPERTY: CommandInfo = fixed(0x13, "SET_PROPERTY", 5, 4);
pub const GET_PROPERTY: CommandInfo = fixed(0x14, "GET_PROPERTY", 3, 6);
pub const GET_AGC_STATUS: CommandInfo = fixed(0x17, "GET_AGC_STATUS", 1, 23);
pub const FM_TUNE_FREQ: CommandInfo = fixed(0x30, "FM_TUNE_FREQ", 6, 4);
pub const FM_SEEK_START: CommandInfo = fixed(0x31, "FM_SEEK_START", 5, 4);
pub const FM_RSQ_STATUS: CommandInfo = fixed(0x32, "FM_RSQ_STATUS", 1, 22);
pub const FM_ACF_STATUS: CommandInfo = fixed(0x33, "FM_ACF_STATUS", 1, 11);
pub const FM_RDS_STATUS: CommandInfo = fixed(0x34, "FM_RDS_STATUS", 1, 20);
pub const FM_RDS_BLOCKCOUNT: CommandInfo = fixed(0x35, "FM_RDS_BLOCKCOUNT", 1, 10);
pub const AM_TUNE_FREQ: CommandInfo = fixed(0x40, "AM_TUNE_FREQ", 5, 4);
pub const AM_SEEK_START: CommandInfo = fixed(0x41, "AM_SEEK_START", 5, 4);
pub const AM_RSQ_STATUS: CommandInfo = fixed(0x42, "AM_RSQ_STATUS", 1, 17);
pub const AM_ACF_STATUS: CommandInfo = fixed(0x43, "AM_ACF_STATUS", 1, 9);
pub const GET_DIGITAL_SERVICE_LIST: CommandInfo =
    fixed(0x80, "GET_DIGITAL_SERVICE_LIST", 1, 6);
pub const START_DIGITAL_SERVICE: CommandInfo = fixed(0x81, "START_DIGITAL_SERVICE", 11, 4);
pub const STOP_DIGITAL_SERVICE: CommandInfo = fixed(0x82, "STOP_DIGITAL_SERVICE", 11, 4);
pub const GET_DIGITAL_SERVICE_DATA: CommandInfo =
    fixed(0x84, "GET_DIGITAL_SERVICE_DATA", 1, 24);
pub const DAB_TUNE_FREQ: CommandInfo = fixed(0xB0, "DAB_TUNE_FREQ", 5, 4);
pub const DAB_DIGRAD_STATUS: CommandInfo = fixed(0xB2, "DAB_DIGRAD_STATUS", 1, 23);
pub const DAB_GET_EVENT_STATUS: CommandInfo = fixed(0xB3, "DAB_GET_EVENT_STATUS", 1, 8);
pub const DAB_SET_FREQ_LIST: CommandInfo = variable(0xB8, "DAB_SET_FREQ_LIST", 3, 4);
pub const DAB_GET_FREQ_LIST: CommandInfo = fixed(0xB9, "DAB_GET_FREQ_LIST", 1, 8);
pub const DAB_ACF_STATUS: CommandInfo = fixed(0xC2, "DAB_ACF_STATUS", 1, 12);

/// A command ready to be sent: opcode, encoded arguments, reply length and
/// timeout class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub info: CommandInfo,
    pub args: BytesMut,
    pub reply_len: usize,
    pub timeout: TimeoutClass,
}

impl Command {
    fn new(info: CommandInfo, timeout: TimeoutClass) -> Self {
        Command {
            info,
            args: BytesMut::with_capacity(info.nargs),
            reply_len: info.nresp,
            timeout,
        }
    }

    fn with_args(info: CommandInfo, timeout: TimeoutClass, args: &[u8]) -> Self {
        let mut cmd = Command::new(info, timeout);
        cmd.args.put_slice(args);
        cmd
    }

    /// Read `len` reply bytes instead of the catalogue default.
    pub fn with_reply_len(mut self, len: usize) -> Self {
        self.reply_len = len;
        self
    }

    /// Opcode followed by the arguments, as written to the bus.
    pub fn frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + self.args.len());
        frame.push(self.info.id);
        frame.extend_from_slice(&self.args);
        frame
    }

    /// Check the argument count against the catalogue.
    pub fn validate(&self) -> Result<()> {
        let n = self.args.len();
        let ok = if self.info.variable {
            n >= self.info.nargs && n <= CMD_MAX_ARGS + MAX_HOST_LOAD
        } else {
            n == self.info.nargs
        };
        if !ok {
            return Err(Error::InvalidParameter(format!(
                "{} takes {} argument bytes, got {n}",
                self.info.name, self.info.nargs
            )));
        }
        if self.reply_len < 4 {
            return Err(Error::InvalidParameter(format!(
                "{} reply must cover the 4 status bytes",
                self.info.name
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------
// Boot and firmware
// ---------------------------------------------------------------

/// Reference clock parameters for POWER_UP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerUpArgs {
    pub clock_mode: ClockMode,
    /// Crystal trim size code, see [`trim_size`].
    pub tr_size: u8,
    pub ibias: u8,
    pub clk_frequency: u32,
    pub xcload: u8,
}

/// Trim size sent for reference clocks without a known code.
pub const TRIM_UNSET: u8 = 0x00;

/// Crystal trim size code for a reference clock frequency.
///
/// Returns `None` for frequencies without a known code.
pub fn trim_size(clk_frequency: u32) -> Option<u8> {
    match clk_frequency {
        37_200_000 => Some(0x0f),
        27_000_000 => Some(0x0a),
        19_200_000 => Some(0x07),
        12_288_000 => Some(0x05),
        6_000_000 => Some(0x04),
        _ => None,
    }
}

/// Whether `clk_frequency` falls in one of the ranges the oscillator accepts.
pub fn clock_frequency_valid(clk_frequency: u32) -> bool {
    matches!(
        clk_frequency,
        5_400_000..=6_600_000
            | 10_800_000..=13_200_000
            | 16_800_000..=19_800_000
            | 21_600_000..=26_400_000
            | 27_000_000..=46_200_000
    )
}

/// POWER_UP (cmd 0x01).
pub fn cmd_power_up(args: &PowerUpArgs) -> Command {
    let mut cmd = Command::new(POWER_UP, TimeoutClass::PowerUp);
    cmd.args.put_u8(0x80);
    cmd.args
        .put_u8((((args.clock_mode as u8) << 4) & 0x30) | (args.tr_size & 0x0f));
    cmd.args.put_u8(args.ibias & 0x7f);
    cmd.args.put_u32_le(args.clk_frequency);
    cmd.args.put_u8(args.xcload & 0x7f);
    cmd.args.put_u8(0x10);
    cmd.args.put_bytes(0, 3);
    cmd.args.put_u8((args.ibias / 2) & 0x7f);
    cmd.args.put_bytes(0, 2);
    cmd
}

/// LOAD_INIT (cmd 0x06). Prepares the bootloader for a new image.
pub fn cmd_load_init() -> Command {
    Command::with_args(LOAD_INIT, TimeoutClass::Load, &[0])
}

/// HOST_LOAD (cmd 0x04) carrying one chunk of at most [`MAX_HOST_LOAD`] bytes.
pub fn cmd_host_load(chunk: &[u8]) -> Command {
    let mut cmd = Command::with_args(HOST_LOAD, TimeoutClass::Load, &[0, 0, 0]);
    cmd.args.put_slice(chunk);
    cmd
}

/// BOOT (cmd 0x07). Starts the loaded image.
pub fn cmd_boot() -> Command {
    Command::with_args(BOOT, TimeoutClass::Boot, &[0])
}

/// FLASH_LOAD sub-command 0x10: program the SPI flash interface parameters.
///
/// Sent once per power cycle before the first flash access.
pub fn cmd_flash_set_nvm_params() -> Command {
    const NVM_PARAMS: [(u16, u16); 8] = [
        (0x0001, 25_000), // SPI clock, kHz
        (0x0003, 3),      // SPI mode
        (0x0101, 0x03),   // read command
        (0x0102, 0x0b),   // fast read command
        (0x0103, 80),     // fast read speed, MHz
        (0x0201, 0x02),   // write command
        (0x0202, 0x20),   // sector erase command
        (0x0204, 0xc7),   // chip erase command
    ];
    let mut cmd = Command::with_args(FLASH_LOAD, TimeoutClass::Load, &[0x10, 0, 0]);
    for (id, value) in NVM_PARAMS {
        cmd.args.put_u16_le(id);
        cmd.args.put_u16_le(value);
    }
    cmd
}

/// FLASH_LOAD sub-command 0xFF: erase the whole flash chip.
pub fn cmd_flash_erase_chip() -> Command {
    Command::with_args(FLASH_LOAD, TimeoutClass::Long, &[0xff, 0xde, 0xc0])
}

/// FLASH_LOAD sub-command 0xF0: write one block at `address`.
pub fn cmd_flash_write_block(address: u32, chunk: &[u8]) -> Command {
    let mut cmd = Command::with_args(
        FLASH_LOAD,
        TimeoutClass::Default,
        &[0xf0, 0x0c, 0xed, 0, 0, 0, 0],
    );
    cmd.args.put_u32_le(address);
    cmd.args.put_u32_le(chunk.len() as u32);
    cmd.args.put_slice(chunk);
    cmd
}

/// FLASH_LOAD sub-command 0x02: verify the CRC32 of `size` bytes at `base`.
pub fn cmd_flash_check_crc(crc: u32, base: u32, size: u32) -> Command {
    let mut cmd = Command::with_args(FLASH_LOAD, TimeoutClass::Crc, &[0x02, 0, 0]);
    cmd.args.put_u32_le(crc);
    cmd.args.put_u32_le(base);
    cmd.args.put_u32_le(size);
    cmd
}

/// FLASH_LOAD sub-command 0x00: load an image resident in flash at `base`.
pub fn cmd_flash_load_image(base: u32) -> Command {
    let mut cmd = Command::with_args(FLASH_LOAD, TimeoutClass::Long, &[0, 0, 0]);
    cmd.args.put_u32_le(base);
    cmd.args.put_bytes(0, 4);
    cmd
}

/// GET_PART_INFO (cmd 0x08).
pub fn cmd_get_part_info() -> Command {
    Command::with_args(GET_PART_INFO, TimeoutClass::Long, &[0])
}

/// GET_SYS_STATE (cmd 0x09).
pub fn cmd_get_sys_state() -> Command {
    Command::with_args(GET_SYS_STATE, TimeoutClass::Default, &[0])
}

/// GET_FUNC_INFO (cmd 0x12).
pub fn cmd_get_func_info() -> Command {
    Command::with_args(GET_FUNC_INFO, TimeoutClass::Default, &[0])
}

/// Chip identification from GET_PART_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartInfo {
    pub chip_revision: u8,
    pub rom_id: u8,
    /// Part number, e.g. `4689` for Si4689.
    pub part: u16,
}

pub fn parse_part_info(resp: &[u8]) -> Result<PartInfo> {
    require(resp, 10, "GET_PART_INFO")?;
    Ok(PartInfo {
        chip_revision: resp[4],
        rom_id: resp[5],
        part: le16(resp, 8),
    })
}

/// Running image reported by GET_SYS_STATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Bootloader,
    FmHd,
    Dab,
    /// TDMB or data-only DAB.
    Tdmb,
    FmHdDemod,
    AmHd,
    AmHdDemod,
    DabDemod,
    Reserved,
    Unknown(u8),
}

impl SystemState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => SystemState::Bootloader,
            1 => SystemState::FmHd,
            2 => SystemState::Dab,
            3 => SystemState::Tdmb,
            4 => SystemState::FmHdDemod,
            5 => SystemState::AmHd,
            6 => SystemState::AmHdDemod,
            7 => SystemState::DabDemod,
            16 => SystemState::Reserved,
            other => SystemState::Unknown(other),
        }
    }
}

pub fn parse_sys_state(resp: &[u8]) -> Result<SystemState> {
    require(resp, 5, "GET_SYS_STATE")?;
    Ok(SystemState::from_code(resp[4]))
}

/// Firmware version from GET_FUNC_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncInfo {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
    pub no_svn: bool,
    /// SVN location code (flags bits 5:4).
    pub location: u8,
    pub mixed_revisions: bool,
    pub local_modifications: bool,
    pub svn_id: u32,
}

pub fn parse_func_info(resp: &[u8]) -> Result<FuncInfo> {
    require(resp, 12, "GET_FUNC_INFO")?;
    let flags = resp[7];
    Ok(FuncInfo {
        major: resp[4],
        minor: resp[5],
        build: resp[6],
        no_svn: flags & 0x80 != 0,
        location: (flags & 0x30) >> 4,
        mixed_revisions: flags & 0x02 != 0,
        local_modifications: flags & 0x01 != 0,
        svn_id: le32(resp, 8),
    })
}

// ---------------------------------------------------------------
// Properties
// ---------------------------------------------------------------

/// SET_PROPERTY (cmd 0x13).
pub fn cmd_set_property(address: u16, value: u16) -> Command {
    let mut cmd = Command::with_args(SET_PROPERTY, TimeoutClass::Default, &[0]);
    cmd.args.put_u16_le(address);
    cmd.args.put_u16_le(value);
    cmd
}

/// GET_PROPERTY (cmd 0x14), one property.
pub fn cmd_get_property(address: u16) -> Command {
    let mut cmd = Command::with_args(GET_PROPERTY, TimeoutClass::Default, &[1]);
    cmd.args.put_u16_le(address);
    cmd
}

pub fn parse_property(resp: &[u8]) -> Result<u16> {
    require(resp, 6, "GET_PROPERTY")?;
    Ok(le16(resp, 4))
}

// ---------------------------------------------------------------
// Tune and seek
// ---------------------------------------------------------------

/// Arguments for AM/FM/DAB tune commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TuneArgs {
    pub injection: InjectionSide,
    pub tune_mode: TuneMode,
    /// Frequency in native units (AM 1 kHz, FM 10 kHz).
    pub freq: u16,
    pub antcap: u16,
    /// FM only: tune directly to an HD program.
    pub direct_tune: bool,
    /// FM only: HD program to acquire.
    pub program_id: u8,
}

/// Arguments for AM/FM seek commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekArgs {
    pub injection: InjectionSide,
    pub tune_mode: TuneMode,
    pub upward: bool,
    pub wrap: bool,
    pub antcap: u16,
}

fn mode_byte(tune_mode: TuneMode, injection: InjectionSide) -> u8 {
    ((tune_mode as u8) << 2) | injection as u8
}

/// AM_TUNE_FREQ (cmd 0x40).
pub fn cmd_am_tune(args: &TuneArgs) -> Command {
    let mut cmd = Command::new(AM_TUNE_FREQ, TimeoutClass::Tune);
    cmd.args.put_u8(mode_byte(args.tune_mode, args.injection));
    cmd.args.put_u16_le(args.freq);
    cmd.args.put_u16_le(args.antcap);
    cmd
}

/// FM_TUNE_FREQ (cmd 0x30).
pub fn cmd_fm_tune(args: &TuneArgs) -> Command {
    let mut cmd = Command::new(FM_TUNE_FREQ, TimeoutClass::Tune);
    cmd.args
        .put_u8(((args.direct_tune as u8) << 5) | mode_byte(args.tune_mode, args.injection));
    cmd.args.put_u16_le(args.freq);
    cmd.args.put_u16_le(args.antcap);
    cmd.args.put_u8(args.program_id);
    cmd
}

fn seek(info: CommandInfo, args: &SeekArgs) -> Command {
    let mut cmd = Command::new(info, TimeoutClass::Tune);
    cmd.args.put_u8(mode_byte(args.tune_mode, args.injection));
    cmd.args.put_u8(((args.upward as u8) << 1) | args.wrap as u8);
    cmd.args.put_u8(0);
    cmd.args.put_u16_le(args.antcap);
    cmd
}

/// AM_SEEK_START (cmd 0x41).
pub fn cmd_am_seek(args: &SeekArgs) -> Command {
    seek(AM_SEEK_START, args)
}

/// FM_SEEK_START (cmd 0x31).
pub fn cmd_fm_seek(args: &SeekArgs) -> Command {
    seek(FM_SEEK_START, args)
}

/// DAB_TUNE_FREQ (cmd 0xB0). `index` selects an entry of the frequency list
/// programmed with DAB_SET_FREQ_LIST.
pub fn cmd_dab_tune(injection: InjectionSide, index: u8, antcap: u16) -> Command {
    let mut cmd = Command::new(DAB_TUNE_FREQ, TimeoutClass::Tune);
    cmd.args.put_u8(injection as u8);
    cmd.args.put_u8(index);
    cmd.args.put_u8(0);
    cmd.args.put_u16_le(antcap);
    cmd
}

// ---------------------------------------------------------------
// Signal quality
// ---------------------------------------------------------------

/// Acknowledge and query flags for the RSQ/DIGRAD status commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RsqArgs {
    /// AM/FM: clear RSQ interrupts.
    pub rsqack: bool,
    /// DAB: clear DIGRAD interrupts.
    pub digradack: bool,
    /// Report the tuned frequency rather than the current one.
    pub attune: bool,
    /// AM/FM: abort a seek in progress.
    pub cancel: bool,
    /// DAB: clear the FIB error counter.
    pub fiberrack: bool,
    /// Clear the seek/tune-complete interrupt.
    pub stcack: bool,
}

impl RsqArgs {
    /// Acknowledge seek/tune-complete only.
    pub fn stc_ack() -> Self {
        RsqArgs {
            stcack: true,
            ..Default::default()
        }
    }
}

/// AM_RSQ_STATUS (cmd 0x42).
pub fn cmd_am_rsq_status(args: &RsqArgs) -> Command {
    Command::with_args(AM_RSQ_STATUS, TimeoutClass::Default, &[am_fm_rsq_byte(args)])
}

/// FM_RSQ_STATUS (cmd 0x32).
pub fn cmd_fm_rsq_status(args: &RsqArgs) -> Command {
    Command::with_args(FM_RSQ_STATUS, TimeoutClass::Default, &[am_fm_rsq_byte(args)])
}

/// DAB_DIGRAD_STATUS (cmd 0xB2).
pub fn cmd_dab_digrad_status(args: &RsqArgs) -> Command {
    let byte = ((args.digradack as u8) << 3)
        | ((args.attune as u8) << 2)
        | ((args.fiberrack as u8) << 1)
        | args.stcack as u8;
    Command::with_args(DAB_DIGRAD_STATUS, TimeoutClass::Default, &[byte])
}

fn am_fm_rsq_byte(args: &RsqArgs) -> u8 {
    ((args.rsqack as u8) << 3)
        | ((args.attune as u8) << 2)
        | ((args.cancel as u8) << 1)
        | args.stcack as u8
}

/// AM/FM received signal quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RsqReport {
    pub hdlevelhint: bool,
    pub hdlevellint: bool,
    pub snrhint: bool,
    pub snrlint: bool,
    pub rssihint: bool,
    pub rssilint: bool,
    /// Band limit reached during seek.
    pub bltf: bool,
    pub hddetected: bool,
    pub flt_hddetected: bool,
    pub afcrl: bool,
    pub valid: bool,
    /// Frequency in native units.
    pub readfreq: u16,
    pub freqoff: i8,
    pub rssi: i8,
    pub snr: i8,
    /// FM multipath, AM modulation index.
    pub mult: u8,
    pub readantcap: u16,
    pub hdlevel: u8,
    pub flt_hdlevel: u8,
}

/// Parse an AM_RSQ_STATUS or FM_RSQ_STATUS reply.
pub fn parse_rsq_status(resp: &[u8]) -> Result<RsqReport> {
    require(resp, 17, "RSQ_STATUS")?;
    Ok(RsqReport {
        hdlevelhint: resp[4] & 0x20 != 0,
        hdlevellint: resp[4] & 0x10 != 0,
        snrhint: resp[4] & 0x08 != 0,
        snrlint: resp[4] & 0x04 != 0,
        rssihint: resp[4] & 0x02 != 0,
        rssilint: resp[4] & 0x01 != 0,
        bltf: resp[5] & 0x80 != 0,
        hddetected: resp[5] & 0x20 != 0,
        flt_hddetected: resp[5] & 0x08 != 0,
        afcrl: resp[5] & 0x02 != 0,
        valid: resp[5] & 0x01 != 0,
        readfreq: le16(resp, 6),
        freqoff: resp[8] as i8,
        rssi: resp[9] as i8,
        snr: resp[10] as i8,
        mult: resp[11],
        readantcap: le16(resp, 12),
        hdlevel: resp[15],
        flt_hdlevel: resp[16],
    })
}

/// DAB digital radio link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DigradReport {
    pub ficerrint: bool,
    pub acqint: bool,
    pub rssihint: bool,
    pub rssilint: bool,
    pub ficerr: bool,
    pub acq: bool,
    pub valid: bool,
    pub rssi: i8,
    pub snr: i8,
    pub fic_quality: u8,
    pub cnr: u8,
    pub fib_error_count: u16,
    /// Tuned frequency, kHz.
    pub readfreq: u32,
    /// Index into the programmed frequency list.
    pub tune_index: u8,
    pub fft_offset: i8,
    pub readantcap: u16,
    pub cu_level: u16,
    pub fast_dect: u8,
}

pub fn parse_digrad_status(resp: &[u8]) -> Result<DigradReport> {
    require(resp, 23, "DAB_DIGRAD_STATUS")?;
    Ok(DigradReport {
        ficerrint: resp[4] & 0x08 != 0,
        acqint: resp[4] & 0x04 != 0,
        rssihint: resp[4] & 0x02 != 0,
        rssilint: resp[4] & 0x01 != 0,
        ficerr: resp[5] & 0x08 != 0,
        acq: resp[5] & 0x04 != 0,
        valid: resp[5] & 0x01 != 0,
        rssi: resp[6] as i8,
        snr: resp[7] as i8,
        fic_quality: resp[8],
        cnr: resp[9],
        fib_error_count: le16(resp, 10),
        readfreq: le32(resp, 12),
        tune_index: resp[16],
        fft_offset: resp[17] as i8,
        readantcap: le16(resp, 18),
        cu_level: le16(resp, 20),
        fast_dect: resp[22],
    })
}

// ---------------------------------------------------------------
// ACF and AGC
// ---------------------------------------------------------------

/// AM_ACF_STATUS (cmd 0x43).
pub fn cmd_am_acf_status() -> Command {
    Command::with_args(AM_ACF_STATUS, TimeoutClass::Default, &[1])
}

/// FM_ACF_STATUS (cmd 0x33).
pub fn cmd_fm_acf_status() -> Command {
    Command::with_args(FM_ACF_STATUS, TimeoutClass::Default, &[1])
}

/// DAB_ACF_STATUS (cmd 0xC2).
pub fn cmd_dab_acf_status() -> Command {
    Command::with_args(DAB_ACF_STATUS, TimeoutClass::Default, &[0])
}

/// Automatically controlled feature status. Fields a band does not report
/// stay at their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcfReport {
    pub blend_int: bool,
    pub hicut_int: bool,
    pub softmute_int: bool,
    pub blend_conv: bool,
    pub hicut_conv: bool,
    pub softmute_conv: bool,
    pub blend_state: bool,
    pub hicut_state: bool,
    pub softmute_state: bool,
    /// Soft mute attenuation, dB.
    pub smattn: u8,
    pub hicut: u8,
    pub lowcut: u8,
    pub pilot: bool,
    pub stblend: u8,
    pub rfu1: u8,
    pub rfu2: u8,
    pub audio_level: u16,
    pub cmft_noise_level: u16,
}

const ACF_BLEND: u8 = 0x04;
const ACF_HICUT: u8 = 0x02;
const ACF_SOFTMUTE: u8 = 0x01;

fn parse_acf_common(resp: &[u8], report: &mut AcfReport) {
    report.hicut_int = resp[4] & ACF_HICUT != 0;
    report.softmute_int = resp[4] & ACF_SOFTMUTE != 0;
    report.hicut_conv = resp[5] & (ACF_HICUT << 4) != 0;
    report.softmute_conv = resp[5] & (ACF_SOFTMUTE << 4) != 0;
    report.hicut_state = resp[5] & ACF_HICUT != 0;
    report.softmute_state = resp[5] & ACF_SOFTMUTE != 0;
    report.smattn = resp[6] & 0x1f;
    report.hicut = resp[7];
}

pub fn parse_am_acf_status(resp: &[u8]) -> Result<AcfReport> {
    require(resp, 9, "AM_ACF_STATUS")?;
    let mut report = AcfReport::default();
    parse_acf_common(resp, &mut report);
    report.lowcut = resp[8];
    Ok(report)
}

pub fn parse_fm_acf_status(resp: &[u8]) -> Result<AcfReport> {
    require(resp, 9, "FM_ACF_STATUS")?;
    let mut report = AcfReport::default();
    parse_acf_common(resp, &mut report);
    report.blend_int = resp[4] & ACF_BLEND != 0;
    report.blend_conv = resp[5] & (ACF_BLEND << 4) != 0;
    report.blend_state = resp[5] & ACF_BLEND != 0;
    report.pilot = resp[8] & 0x80 != 0;
    report.stblend = resp[8] & 0x7f;
    Ok(report)
}

pub fn parse_dab_acf_status(resp: &[u8]) -> Result<AcfReport> {
    require(resp, 10, "DAB_ACF_STATUS")?;
    Ok(AcfReport {
        rfu1: resp[4],
        rfu2: resp[5],
        audio_level: le16(resp, 6),
        cmft_noise_level: le16(resp, 8),
        ..Default::default()
    })
}

/// GET_AGC_STATUS (cmd 0x17).
pub fn cmd_agc_status() -> Command {
    Command::with_args(GET_AGC_STATUS, TimeoutClass::Default, &[0])
}

/// Front-end gain control status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgcReport {
    pub vhf_lna: u8,
    pub vhf_cattn: u8,
    pub rf_attn_lo: u8,
    pub rf_attn_hi: u8,
    pub rf_tank_lo: u8,
    pub rf_tank_hi: u8,
    pub rf_index: u8,
    /// Beyond the standard reply; zero when the chip returns fewer bytes.
    pub lmhf_cattn: u8,
}

pub fn parse_agc_status(resp: &[u8]) -> Result<AgcReport> {
    require(resp, 22, "GET_AGC_STATUS")?;
    Ok(AgcReport {
        vhf_lna: resp[14],
        vhf_cattn: resp[15],
        rf_attn_lo: resp[16],
        rf_attn_hi: resp[17],
        rf_tank_lo: resp[18],
        rf_tank_hi: resp[19],
        rf_index: resp[21],
        lmhf_cattn: resp.get(24).copied().unwrap_or(0),
    })
}

// ---------------------------------------------------------------
// RDS
// ---------------------------------------------------------------

/// FM_RDS_STATUS (cmd 0x34).
///
/// `status_only` reports the FIFO state without consuming a group.
/// `mtfifo` empties the FIFO. `intack` clears the RDS interrupt.
pub fn cmd_rds_status(status_only: bool, mtfifo: bool, intack: bool) -> Command {
    let byte = ((status_only as u8) << 2) | ((mtfifo as u8) << 1) | intack as u8;
    Command::with_args(FM_RDS_STATUS, TimeoutClass::Default, &[byte])
}

/// One RDS block: raw bytes plus block position (0 = A .. 3 = D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdsBlock {
    pub lsb: u8,
    pub msb: u8,
    pub block: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdsStatusReport {
    pub tpptyint: bool,
    pub piint: bool,
    pub syncint: bool,
    pub fifoint: bool,
    pub tppty_valid: bool,
    pub pi_valid: bool,
    pub sync: bool,
    pub fifo_lost: bool,
    pub tp: bool,
    pub pty: u8,
    pub pi: u16,
    /// Groups remaining in the chip FIFO.
    pub fifo_used: u8,
    /// Block error level per block, A..D, unshifted.
    pub ble: [u8; 4],
    pub blocks: [RdsBlock; 4],
}

pub fn parse_rds_status(resp: &[u8]) -> Result<RdsStatusReport> {
    require(resp, 20, "FM_RDS_STATUS")?;
    let mut blocks = [RdsBlock::default(); 4];
    for (i, block) in blocks.iter_mut().enumerate() {
        *block = RdsBlock {
            lsb: resp[12 + 2 * i],
            msb: resp[13 + 2 * i],
            block: i as u8,
        };
    }
    Ok(RdsStatusReport {
        tpptyint: resp[4] & 0x10 != 0,
        piint: resp[4] & 0x08 != 0,
        syncint: resp[4] & 0x02 != 0,
        fifoint: resp[4] & 0x01 != 0,
        tppty_valid: resp[5] & 0x10 != 0,
        pi_valid: resp[5] & 0x08 != 0,
        sync: resp[5] & 0x02 != 0,
        fifo_lost: resp[5] & 0x01 != 0,
        tp: resp[6] & 0x20 != 0,
        pty: resp[6] & 0x1f,
        pi: le16(resp, 8),
        fifo_used: resp[10],
        ble: [
            resp[11] & 0xc0,
            resp[11] & 0x30,
            resp[11] & 0x0c,
            resp[11] & 0x03,
        ],
        blocks,
    })
}

/// FM_RDS_BLOCKCOUNT (cmd 0x35).
pub fn cmd_rds_blockcount(clear: bool) -> Command {
    Command::with_args(FM_RDS_BLOCKCOUNT, TimeoutClass::Default, &[clear as u8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdsBlockCount {
    pub expected: u16,
    pub received: u16,
    pub uncorrectable: u16,
}

pub fn parse_rds_blockcount(resp: &[u8]) -> Result<RdsBlockCount> {
    require(resp, 10, "FM_RDS_BLOCKCOUNT")?;
    Ok(RdsBlockCount {
        expected: le16(resp, 4),
        received: le16(resp, 6),
        uncorrectable: le16(resp, 8),
    })
}

// ---------------------------------------------------------------
// DAB frequency list and events
// ---------------------------------------------------------------

/// DAB_SET_FREQ_LIST (cmd 0xB8). Frequencies in kHz.
pub fn cmd_dab_set_freq_list(freqs_khz: &[u32]) -> Result<Command> {
    if freqs_khz.is_empty() || freqs_khz.len() > DAB_MAX_FREQUENCIES {
        return Err(Error::InvalidParameter(format!(
            "DAB frequency list must hold 1..={DAB_MAX_FREQUENCIES} entries, got {}",
            freqs_khz.len()
        )));
    }
    let mut cmd = Command::with_args(
        DAB_SET_FREQ_LIST,
        TimeoutClass::Default,
        &[freqs_khz.len() as u8, 0, 0],
    );
    for &freq in freqs_khz {
        cmd.args.put_u32_le(freq);
    }
    Ok(cmd)
}

/// DAB_GET_FREQ_LIST (cmd 0xB9). The first reply carries the count only.
pub fn cmd_dab_get_freq_list() -> Command {
    Command::with_args(DAB_GET_FREQ_LIST, TimeoutClass::Default, &[0])
}

/// Number of frequencies announced by a short DAB_GET_FREQ_LIST reply.
pub fn parse_freq_list_count(resp: &[u8]) -> Result<usize> {
    require(resp, 5, "DAB_GET_FREQ_LIST")?;
    Ok(resp[4] as usize)
}

/// Frequencies (kHz) from a full DAB_GET_FREQ_LIST reply.
pub fn parse_freq_list(resp: &[u8], count: usize) -> Result<Vec<u32>> {
    require(resp, 8 + 4 * count, "DAB_GET_FREQ_LIST")?;
    Ok((0..count).map(|i| le32(resp, 8 + 4 * i)).collect())
}

/// DAB_GET_EVENT_STATUS (cmd 0xB3).
pub fn cmd_dab_event_status(ack: bool) -> Command {
    Command::with_args(DAB_GET_EVENT_STATUS, TimeoutClass::Default, &[ack as u8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventStatusReport {
    pub recfg_int: bool,
    pub recfg_wrn_int: bool,
    pub anno_int: bool,
    pub oeserv_int: bool,
    pub servlink_int: bool,
    pub freqinfo_int: bool,
    pub svrlist_int: bool,
    pub anno: bool,
    pub oeserv: bool,
    pub servlink: bool,
    pub freq_info: bool,
    pub svrlist: bool,
    pub svrlist_version: u16,
}

pub fn parse_event_status(resp: &[u8]) -> Result<EventStatusReport> {
    require(resp, 8, "DAB_GET_EVENT_STATUS")?;
    Ok(EventStatusReport {
        recfg_int: resp[4] & 0x80 != 0,
        recfg_wrn_int: resp[4] & 0x40 != 0,
        anno_int: resp[4] & 0x10 != 0,
        oeserv_int: resp[4] & 0x08 != 0,
        servlink_int: resp[4] & 0x04 != 0,
        freqinfo_int: resp[4] & 0x02 != 0,
        svrlist_int: resp[4] & 0x01 != 0,
        anno: resp[5] & 0x10 != 0,
        oeserv: resp[5] & 0x08 != 0,
        servlink: resp[5] & 0x04 != 0,
        freq_info: resp[5] & 0x02 != 0,
        svrlist: resp[5] & 0x01 != 0,
        svrlist_version: le16(resp, 6),
    })
}

// ---------------------------------------------------------------
// Digital services
// ---------------------------------------------------------------

/// GET_DIGITAL_SERVICE_LIST (cmd 0x80).
pub fn cmd_get_service_list() -> Command {
    Command::with_args(GET_DIGITAL_SERVICE_LIST, TimeoutClass::Default, &[0])
}

/// Total reply length announced by a short service list reply.
pub fn parse_service_list_len(resp: &[u8]) -> Result<usize> {
    require(resp, 6, "GET_DIGITAL_SERVICE_LIST")?;
    let size = le16(resp, 4) as usize;
    if size < 2 {
        return Err(Error::Protocol(format!(
            "service list size {size} is too small"
        )));
    }
    Ok(GET_DIGITAL_SERVICE_LIST.nresp + size - 2)
}

/// How a component is carried in the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentInfo {
    /// Transport mechanism id: 0 stream audio, 1 stream data, 2 FIDC,
    /// 3 packet data.
    pub tm_id: u8,
    pub subch_id: u8,
    pub fidc_id: u8,
    pub dg_flag: bool,
    pub sc_id: u16,
    /// Audio or data service component type.
    pub service_type: u8,
    pub secondary: bool,
    pub access_control: bool,
    pub mua_valid: bool,
}

/// One service of an ensemble.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceInfo {
    pub service_id: u32,
    pub country_id: u8,
    pub extended_country_code: u8,
    pub data_service: bool,
    pub linking_info: bool,
    pub program_type: u8,
    pub local: bool,
    pub control_access_id: u8,
    pub charset: u8,
    pub label: String,
}

impl ServiceInfo {
    pub fn is_audio(&self) -> bool {
        !self.data_service
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceRecord {
    pub info: ServiceInfo,
    pub components: Vec<ComponentInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceList {
    pub version: u16,
    pub services: Vec<ServiceRecord>,
}

const SERVICE_LABEL_LEN: usize = 16;

/// Parse a full GET_DIGITAL_SERVICE_LIST reply.
pub fn parse_service_list(resp: &[u8]) -> Result<ServiceList> {
    require(resp, 12, "GET_DIGITAL_SERVICE_LIST")?;
    let version = le16(resp, 6);
    let count = resp[8] & 0x1f;
    let mut ptr = 12;
    let mut services = Vec::with_capacity(count as usize);

    for _ in 0..count {
        require(resp, ptr + 8 + SERVICE_LABEL_LEN, "service record")?;
        let sid_word = le32(resp, ptr);
        let data_service = resp[ptr + 4] & 0x01 != 0;
        let (service_id, country_id, extended_country_code) = if data_service {
            (
                sid_word & 0xfffff,
                ((sid_word >> 20) & 0x0f) as u8,
                (sid_word >> 24) as u8,
            )
        } else {
            (sid_word & 0xfff, ((sid_word >> 12) & 0x0f) as u8, 0)
        };
        let ncomp = resp[ptr + 5] & 0x0f;
        let label_bytes = &resp[ptr + 8..ptr + 8 + SERVICE_LABEL_LEN];
        let info = ServiceInfo {
            service_id,
            country_id,
            extended_country_code,
            data_service,
            linking_info: (resp[ptr + 4] >> 6) & 0x01 != 0,
            program_type: (resp[ptr + 4] >> 1) & 0x1f,
            local: (resp[ptr + 5] >> 7) & 0x01 != 0,
            control_access_id: (resp[ptr + 5] >> 4) & 0x07,
            charset: resp[ptr + 6] & 0x0f,
            label: String::from_utf8_lossy(label_bytes)
                .trim_end_matches(['\0', ' '])
                .to_string(),
        };
        ptr += 8 + SERVICE_LABEL_LEN;

        let mut components = Vec::with_capacity(ncomp as usize);
        for _ in 0..ncomp {
            require(resp, ptr + 4, "service component")?;
            let word = le16(resp, ptr);
            let tm_id = (word >> 14) as u8 & 0x03;
            let mut component = ComponentInfo {
                tm_id,
                service_type: (resp[ptr + 2] >> 2) & 0x3f,
                secondary: resp[ptr + 2] & 0x02 != 0,
                access_control: resp[ptr + 2] & 0x01 != 0,
                mua_valid: resp[ptr + 3] & 0x01 != 0,
                ..Default::default()
            };
            match tm_id {
                0 | 1 => component.subch_id = (word & 0x3f) as u8,
                2 => component.fidc_id = (word & 0x3f) as u8,
                _ => {
                    component.dg_flag = (word >> 13) & 0x01 != 0;
                    component.sc_id = word & 0x0fff;
                }
            }
            components.push(component);
            ptr += 4;
        }

        services.push(ServiceRecord { info, components });
    }

    Ok(ServiceList { version, services })
}

fn service_args(info: CommandInfo, service: &ServiceInfo, component: &ComponentInfo) -> Command {
    let mut cmd = Command::with_args(info, TimeoutClass::Default, &[0, 0, 0]);
    let mut sid = service.service_id.to_le_bytes();
    if service.data_service {
        sid[2] |= service.country_id << 4;
        sid[3] = service.extended_country_code;
    } else {
        sid[1] |= service.country_id << 4;
    }
    cmd.args.put_slice(&sid);
    let ids = component.subch_id as u16 | component.fidc_id as u16 | component.sc_id;
    cmd.args.put_u8((ids & 0xff) as u8);
    cmd.args
        .put_u8((component.tm_id << 6) | ((component.dg_flag as u8) << 5) | (component.sc_id >> 8) as u8);
    cmd.args.put_u8(
        (component.service_type << 2)
            | ((component.secondary as u8) << 1)
            | component.access_control as u8,
    );
    cmd.args.put_u8(component.mua_valid as u8);
    cmd
}

/// START_DIGITAL_SERVICE (cmd 0x81).
pub fn cmd_start_service(service: &ServiceInfo, component: &ComponentInfo) -> Command {
    service_args(START_DIGITAL_SERVICE, service, component)
}

/// STOP_DIGITAL_SERVICE (cmd 0x82).
pub fn cmd_stop_service(service: &ServiceInfo, component: &ComponentInfo) -> Command {
    service_args(STOP_DIGITAL_SERVICE, service, component)
}

/// GET_DIGITAL_SERVICE_DATA (cmd 0x84).
pub fn cmd_get_service_data(status_only: bool, intack: bool) -> Command {
    let byte = ((status_only as u8) << 4) | intack as u8;
    Command::with_args(GET_DIGITAL_SERVICE_DATA, TimeoutClass::Default, &[byte])
}

/// Header of a GET_DIGITAL_SERVICE_DATA reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceDataHeader {
    pub overflow_int: bool,
    pub packet_int: bool,
    /// Packets still buffered on the chip.
    pub buff_count: u8,
    pub srv_state: u8,
    /// Payload source: 0 standard, 1 non-DLS PAD, 2 DLS PAD.
    pub data_src: u8,
    pub dscty: u8,
    pub service_id: u32,
    pub component_id: u32,
    pub uatype: u16,
    pub byte_count: u16,
    pub seg_num: u16,
    pub num_segs: u16,
}

/// Length of the GET_DIGITAL_SERVICE_DATA header; the payload follows it.
pub const SERVICE_DATA_HEADER_LEN: usize = 24;

pub fn parse_service_data_header(resp: &[u8]) -> Result<ServiceDataHeader> {
    require(resp, SERVICE_DATA_HEADER_LEN, "GET_DIGITAL_SERVICE_DATA")?;
    Ok(ServiceDataHeader {
        overflow_int: resp[4] & 0x02 != 0,
        packet_int: resp[4] & 0x01 != 0,
        buff_count: resp[5],
        srv_state: resp[6],
        data_src: (resp[7] & 0xc0) >> 6,
        dscty: resp[7] & 0x3f,
        service_id: le32(resp, 8),
        component_id: le32(resp, 12),
        uatype: le16(resp, 16),
        byte_count: le16(resp, 18),
        seg_num: le16(resp, 20),
        num_segs: le16(resp, 22),
    })
}

// ---------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------

fn require(resp: &[u8], len: usize, what: &str) -> Result<()> {
    if resp.len() < len {
        return Err(Error::Protocol(format!(
            "{what} reply too short: expected at least {len} bytes, got {}",
            resp.len()
        )));
    }
    Ok(())
}

fn le16(resp: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([resp[offset], resp[offset + 1]])
}

fn le32(resp: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        resp[offset],
        resp[offset + 1],
        resp[offset + 2],
        resp[offset + 3],
    ])
}
