//! Tuning: the per-receiver operation set, tune and seek, frequency
//! conversion, signal queries and the receiver controls.
//!
//! Frequencies cross the public API in 62.5 Hz ticks (see
//! [`si468x_core::band`]). Inside, every receiver speaks its own native
//! unit: 1 kHz steps for AM, 10 kHz steps for FM, and for DAB an entry of
//! the frequency list programmed into the chip.
//!
//! A tune or seek clears STC, submits the command, waits for the dispatcher
//! to report STC and then acknowledges it with a status query. A cancelled
//! wait returns without the acknowledgement.

use si468x_core::band::{hz_to_ticks, ticks_to_hz};
use si468x_core::{Band, Error, Function, InjectionSide, RadioEvent, Result, TuneMode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::commands::{
    cmd_agc_status, cmd_am_acf_status, cmd_am_rsq_status, cmd_am_seek, cmd_am_tune,
    cmd_dab_acf_status, cmd_dab_digrad_status, cmd_fm_acf_status, cmd_fm_rsq_status, cmd_fm_seek,
    cmd_fm_tune, cmd_rds_status, parse_agc_status, parse_am_acf_status, parse_dab_acf_status,
    parse_digrad_status, parse_fm_acf_status, parse_rds_status, parse_rsq_status, AcfReport,
    AgcReport, Command, DigradReport, RsqArgs, RsqReport, SeekArgs, TuneArgs,
};
use crate::device::{Session, Si468x};
use crate::models::Model;
use crate::properties::*;

/// AM pretune frequency, kHz.
const AM_PRETUNE: u32 = 600;
/// FM pretune frequency, 10 kHz units (92.0 MHz).
const FM_PRETUNE: u32 = 9200;

// ---------------------------------------------------------------
// Operation set
// ---------------------------------------------------------------

/// The command set of the running receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandOps {
    Am,
    Fm,
    Dab,
}

/// Seek band edge and step properties of an analog receiver.
struct SeekProperties {
    bottom: u16,
    top: u16,
    spacing: u16,
}

impl BandOps {
    /// Operation set for `function`; `None` outside the receivers.
    pub fn for_function(function: Function) -> Option<BandOps> {
        match function {
            Function::Am => Some(BandOps::Am),
            Function::Fm => Some(BandOps::Fm),
            Function::Dab => Some(BandOps::Dab),
            Function::MiniBoot | Function::Bootloader => None,
        }
    }

    pub fn function(self) -> Function {
        match self {
            BandOps::Am => Function::Am,
            BandOps::Fm => Function::Fm,
            BandOps::Dab => Function::Dab,
        }
    }

    pub fn band(self) -> Band {
        match self {
            BandOps::Am => Band::Am,
            BandOps::Fm => Band::Fm,
            BandOps::Dab => Band::Dab,
        }
    }

    fn rsq_command(self, args: &RsqArgs) -> Command {
        match self {
            BandOps::Am => cmd_am_rsq_status(args),
            BandOps::Fm => cmd_fm_rsq_status(args),
            BandOps::Dab => cmd_dab_digrad_status(args),
        }
    }

    fn parse_signal(self, reply: &[u8]) -> Result<SignalReport> {
        match self {
            BandOps::Am | BandOps::Fm => parse_rsq_status(reply).map(SignalReport::Analog),
            BandOps::Dab => parse_digrad_status(reply).map(SignalReport::Digital),
        }
    }

    fn acf_command(self) -> Command {
        match self {
            BandOps::Am => cmd_am_acf_status(),
            BandOps::Fm => cmd_fm_acf_status(),
            BandOps::Dab => cmd_dab_acf_status(),
        }
    }

    fn parse_acf(self, reply: &[u8]) -> Result<AcfReport> {
        match self {
            BandOps::Am => parse_am_acf_status(reply),
            BandOps::Fm => parse_fm_acf_status(reply),
            BandOps::Dab => parse_dab_acf_status(reply),
        }
    }

    fn seek_properties(self) -> Option<SeekProperties> {
        match self {
            BandOps::Am => Some(SeekProperties {
                bottom: AM_SEEK_BAND_BOTTOM,
                top: AM_SEEK_BAND_TOP,
                spacing: AM_SEEK_FREQUENCY_SPACING,
            }),
            BandOps::Fm => Some(SeekProperties {
                bottom: FM_SEEK_BAND_BOTTOM,
                top: FM_SEEK_BAND_TOP,
                spacing: FM_SEEK_FREQUENCY_SPACING,
            }),
            BandOps::Dab => None,
        }
    }

    fn rssi_threshold_property(self) -> u16 {
        match self {
            BandOps::Am => AM_VALID_RSSI_THRESHOLD,
            BandOps::Fm => FM_VALID_RSSI_THRESHOLD,
            BandOps::Dab => DAB_VALID_RSSI_THRESHOLD,
        }
    }

    fn snr_threshold_property(self) -> Option<u16> {
        match self {
            BandOps::Am => Some(AM_VALID_SNR_THRESHOLD),
            BandOps::Fm => Some(FM_VALID_SNR_THRESHOLD),
            BandOps::Dab => None,
        }
    }

    fn max_tune_error_property(self) -> Option<u16> {
        match self {
            BandOps::Am => Some(AM_VALID_MAX_TUNE_ERROR),
            BandOps::Fm => Some(FM_VALID_MAX_TUNE_ERROR),
            BandOps::Dab => None,
        }
    }
}

// ---------------------------------------------------------------
// Reports and requests
// ---------------------------------------------------------------

/// Signal quality of the running receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalReport {
    /// AM or FM.
    Analog(RsqReport),
    /// DAB.
    Digital(DigradReport),
}

impl SignalReport {
    pub fn rssi(&self) -> i8 {
        match self {
            SignalReport::Analog(r) => r.rssi,
            SignalReport::Digital(r) => r.rssi,
        }
    }

    pub fn valid(&self) -> bool {
        match self {
            SignalReport::Analog(r) => r.valid,
            SignalReport::Digital(r) => r.valid,
        }
    }

    fn frequency_hz(&self, function: Function) -> u32 {
        match self {
            SignalReport::Analog(r) => native_to_hz(function, r.readfreq as u32),
            SignalReport::Digital(r) => native_to_hz(Function::Dab, r.readfreq),
        }
    }
}

/// Seek parameters. Frequencies and spacing are in ticks; zero means "use
/// the configured value".
///
/// For DAB the fields select a directory entry instead: `range_low` carries
/// the ensemble frequency, `range_high` the service id (scaled by
/// [`TICKS_PER_MHZ`](si468x_core::band::TICKS_PER_MHZ)) and `spacing` the
/// sub-channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekRequest {
    pub range_low: u32,
    pub range_high: u32,
    pub spacing: u32,
    pub upward: bool,
    pub wrap: bool,
}

/// Summary of the receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunerStatus {
    /// RSSI scaled to 0..=0xFFFF; 0 when the query failed.
    pub signal: u16,
    /// FM stereo pilot present.
    pub stereo: bool,
    /// FM RDS decoder synchronised.
    pub rds_sync: bool,
}

/// RSSI (-128..=127 dBuV) scaled to 0..=0xFFFF.
pub fn signal_strength(rssi: i8) -> u16 {
    ((rssi as i32 + 128) * 257) as u16
}

/// Native receiver units to hertz.
///
/// Functions without a receiver use the FM unit.
pub fn native_to_hz(function: Function, native: u32) -> u32 {
    match function {
        Function::Am | Function::Dab => native.saturating_mul(1_000),
        Function::Fm | Function::MiniBoot | Function::Bootloader => native.saturating_mul(10_000),
    }
}

/// The band a frequency (ticks) belongs to, among those `model` supports.
pub fn band_for_frequency(model: Model, ticks: u32) -> Option<Band> {
    [Band::Am, Band::Fm, Band::Dab]
        .into_iter()
        .find(|band| band.contains(ticks) && model.supports(function_for_band(*band)))
}

fn function_for_band(band: Band) -> Function {
    match band {
        Band::Am => Function::Am,
        Band::Fm => Function::Fm,
        Band::Dab => Function::Dab,
    }
}

impl Si468x {
    /// Overall tuning range (ticks) across the bands this part supports.
    pub fn tuning_range(&self) -> (u32, u32) {
        let model = self.model();
        let low = if model.has_am() { Band::Am } else { Band::Fm }.range().0;
        let high = if model.has_dab() { Band::Dab } else { Band::Fm }.range().1;
        (low, high)
    }
}

// ---------------------------------------------------------------
// Session operations
// ---------------------------------------------------------------

impl Session<'_> {
    pub(crate) fn ops(&self) -> Result<BandOps> {
        self.state.ops.ok_or_else(|| {
            Error::InvalidState(format!("no receiver running ({})", self.state.function))
        })
    }

    fn tune_mode(&self) -> TuneMode {
        if self.shared.model.has_hd() {
            TuneMode::FastWithHd
        } else {
            TuneMode::FastNoHd
        }
    }

    /// Submit a tune or seek and wait for seek/tune-complete.
    pub(crate) async fn tune_and_wait(
        &mut self,
        cmd: &Command,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ops = self.ops()?;
        let shared = self.shared;
        shared.stc.clear();
        self.send_command(cmd).await?;

        tokio::select! {
            biased;
            _ = shared.stc.wait() => {}
            _ = cancel.cancelled() => {
                debug!(cmd = cmd.info.name, "tune wait cancelled");
                return Err(Error::Cancelled);
            }
            _ = shared.shutdown.cancelled() => return Err(Error::Cancelled),
        }
        if !shared.is_alive() {
            return Err(Error::NotAlive);
        }

        self.send_command(&ops.rsq_command(&RsqArgs::stc_ack())).await?;
        trace!(cmd = cmd.info.name, "tune complete");
        shared.emit(RadioEvent::TuneComplete);
        Ok(())
    }

    /// Tune the running receiver to `native` (kHz for AM and DAB, 10 kHz
    /// units for FM). DAB frequencies must be in the programmed list.
    pub async fn tune(&mut self, native: u32, cancel: &CancellationToken) -> Result<()> {
        let ops = self.ops()?;
        if ops == BandOps::Dab {
            return self.dab_tune(native, cancel).await;
        }
        let freq = u16::try_from(native).map_err(|_| {
            Error::InvalidParameter(format!("frequency {native} out of range"))
        })?;
        let args = TuneArgs {
            injection: InjectionSide::Auto,
            tune_mode: self.tune_mode(),
            freq,
            antcap: 0,
            direct_tune: false,
            program_id: 0,
        };
        debug!(band = %ops.band(), freq, "tune");
        let cmd = match ops {
            BandOps::Am => cmd_am_tune(&args),
            _ => cmd_fm_tune(&args),
        };
        self.tune_and_wait(&cmd, cancel).await
    }

    /// Start a seek in the running receiver. AM and FM use the chip's own
    /// band scan; DAB moves through the channel directory.
    pub async fn seek_start(&mut self, req: &SeekRequest, cancel: &CancellationToken) -> Result<()> {
        let args = SeekArgs {
            injection: InjectionSide::Auto,
            tune_mode: self.tune_mode(),
            upward: req.upward,
            wrap: req.wrap,
            antcap: 0,
        };
        match self.ops()? {
            BandOps::Am => self.tune_and_wait(&cmd_am_seek(&args), cancel).await,
            BandOps::Fm => self.tune_and_wait(&cmd_fm_seek(&args), cancel).await,
            BandOps::Dab => self.dab_seek(req, cancel).await,
        }
    }

    /// Seek within `req`'s range, switching receiver if the range belongs
    /// to another band. Given band limits and spacing are stored in the
    /// receiver's seek properties first.
    pub async fn seek(&mut self, req: SeekRequest, cancel: &CancellationToken) -> Result<()> {
        let current = self.state.function;
        let low = match req.range_low {
            0 => self.default_seek_edge(current, false).await?,
            low => low,
        };
        let high = match req.range_high {
            0 => self.default_seek_edge(current, true).await?,
            high => high,
        };
        if matches!(current, Function::Am | Function::Fm) && low > high {
            return Err(Error::InvalidParameter(format!(
                "seek range {low}..{high} is inverted"
            )));
        }

        let model = self.shared.model;
        let function = if Band::Fm.contains_range(low, high) {
            Function::Fm
        } else if model.has_am() && Band::Am.contains_range(low, high) {
            Function::Am
        } else if model.has_dab() && Band::Dab.contains(low) {
            Function::Dab
        } else {
            return Err(Error::InvalidParameter(format!(
                "seek range {low}..{high} matches no supported band"
            )));
        };
        self.change_function(function, cancel).await?;

        if let Some(props) = BandOps::for_function(function).and_then(BandOps::seek_properties) {
            if req.range_high != 0 {
                let top = self.ticks_to_property(req.range_high)?;
                self.set_property(props.top, top).await?;
            }
            if req.range_low != 0 {
                let bottom = self.ticks_to_property(req.range_low)?;
                self.set_property(props.bottom, bottom).await?;
            }
            if req.spacing != 0 {
                let spacing = self.ticks_to_property(req.spacing)?;
                self.set_property(props.spacing, spacing).await?;
            }
        }

        self.seek_start(&req, cancel).await
    }

    async fn default_seek_edge(&mut self, function: Function, top: bool) -> Result<u32> {
        let ops = match function {
            Function::Dab => {
                let (low, high) = Band::Dab.range();
                return Ok(if top { high } else { low });
            }
            Function::Am => BandOps::Am,
            _ => BandOps::Fm,
        };
        let Some(props) = ops.seek_properties() else {
            return Err(Error::InvalidState("no seek limits for this band".into()));
        };
        let address = if top { props.top } else { props.bottom };
        let native = self.read_property(address).await?;
        Ok(hz_to_ticks(native_to_hz(function, native as u32)))
    }

    fn ticks_to_property(&self, ticks: u32) -> Result<u16> {
        let native = self.hz_to_native(ticks_to_hz(ticks))?;
        u16::try_from(native)
            .map_err(|_| Error::InvalidParameter(format!("{ticks} ticks out of range")))
    }

    /// Hertz to the running receiver's native unit. DAB resolves to the
    /// nearest frequency (kHz) of the loaded list.
    pub fn hz_to_native(&self, hz: u32) -> Result<u32> {
        match self.state.function {
            Function::Am => Ok(hz / 1_000),
            Function::Dab => {
                let khz = hz / 1_000;
                self.state
                    .dab
                    .loaded
                    .iter()
                    .copied()
                    .min_by_key(|f| f.abs_diff(khz))
                    .ok_or_else(|| Error::InvalidParameter("no DAB frequencies loaded".into()))
            }
            _ => Ok(hz / 10_000),
        }
    }

    /// Tune to a frequency in ticks, changing receiver if needed.
    pub async fn set_frequency(&mut self, ticks: u32, cancel: &CancellationToken) -> Result<()> {
        let band = band_for_frequency(self.shared.model, ticks).ok_or_else(|| {
            Error::InvalidParameter(format!("{ticks} ticks is outside every supported band"))
        })?;
        self.change_function(function_for_band(band), cancel).await?;
        let native = self.hz_to_native(ticks_to_hz(ticks))?;
        self.tune(native, cancel).await
    }

    /// The tuned frequency, in ticks.
    pub async fn frequency(&mut self) -> Result<u32> {
        let report = self
            .signal_status(&RsqArgs {
                attune: true,
                ..Default::default()
            })
            .await?;
        Ok(hz_to_ticks(report.frequency_hz(self.state.function)))
    }

    /// RSQ (AM/FM) or DIGRAD (DAB) status.
    pub async fn signal_status(&mut self, args: &RsqArgs) -> Result<SignalReport> {
        let ops = self.ops()?;
        let reply = self.send_command(&ops.rsq_command(args)).await?;
        ops.parse_signal(&reply)
    }

    pub async fn acf_status(&mut self) -> Result<AcfReport> {
        let ops = self.ops()?;
        let reply = self.send_command(&ops.acf_command()).await?;
        ops.parse_acf(&reply)
    }

    /// Front-end gain status. FM only.
    pub async fn agc_status(&mut self) -> Result<AgcReport> {
        if self.ops()? != BandOps::Fm {
            return Err(Error::Unsupported("AGC status needs the FM receiver".into()));
        }
        let reply = self.send_command(&cmd_agc_status()).await?;
        parse_agc_status(&reply)
    }

    pub async fn tuner_status(&mut self) -> Result<TunerStatus> {
        let ops = self.ops()?;
        let signal = match self.signal_status(&RsqArgs::default()).await {
            Ok(report) => signal_strength(report.rssi()),
            Err(e) => {
                debug!("signal query failed: {e}");
                0
            }
        };
        let stereo = self.acf_status().await?.pilot;
        let rds_sync = if ops == BandOps::Fm {
            let reply = self.send_command(&cmd_rds_status(true, false, false)).await?;
            parse_rds_status(&reply)?.sync
        } else {
            false
        };
        Ok(TunerStatus {
            signal,
            stereo,
            rds_sync,
        })
    }

    /// Pretune after a function change: a fixed AM or FM frequency, or the
    /// DAB frequency prescan followed by an ensemble scan.
    pub(crate) async fn pretune(&mut self, cancel: &CancellationToken) -> Result<()> {
        match self.state.function {
            Function::Am => self.tune(AM_PRETUNE, cancel).await,
            Function::Fm => self.tune(FM_PRETUNE, cancel).await,
            Function::Dab => {
                self.load_valid_frequencies(cancel).await?;
                self.start_ensemble_scan(cancel).await
            }
            Function::MiniBoot | Function::Bootloader => Ok(()),
        }
    }

    // ---------------------------------------------------------------
    // Controls
    // ---------------------------------------------------------------

    pub async fn set_mute(&mut self, mute: bool) -> Result<()> {
        self.ops()?;
        self.set_property(AUDIO_MUTE, if mute { 3 } else { 0 }).await
    }

    /// Analog output volume. A non-zero volume switches the pins to the
    /// analog DAC; zero hands them back to I2S.
    pub async fn set_volume(&mut self, volume: u16) -> Result<()> {
        self.ops()?;
        let pins = if volume != 0 {
            PIN_DAC_ENABLED
        } else {
            PIN_I2S_ENABLED
        };
        self.set_property(PIN_CONFIG_ENABLE, pins).await?;
        self.set_property(AUDIO_ANALOG_VOLUME, volume).await
    }

    /// FM de-emphasis (0: 75 us, 1: 50 us, 2: disabled).
    pub async fn set_deemphasis(&mut self, value: u16) -> Result<()> {
        self.set_property(FM_AUDIO_DE_EMPHASIS, value).await
    }

    pub async fn set_rssi_threshold(&mut self, value: u16) -> Result<()> {
        let ops = self.ops()?;
        self.set_property(ops.rssi_threshold_property(), value).await
    }

    pub async fn set_snr_threshold(&mut self, value: u16) -> Result<()> {
        let address = self
            .ops()?
            .snr_threshold_property()
            .ok_or_else(|| Error::Unsupported("no SNR threshold in DAB".into()))?;
        self.set_property(address, value).await
    }

    pub async fn set_max_tune_error(&mut self, value: u16) -> Result<()> {
        let address = self
            .ops()?
            .max_tune_error_property()
            .ok_or_else(|| Error::Unsupported("no max tune error in DAB".into()))?;
        self.set_property(address, value).await
    }
}
