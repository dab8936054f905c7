//! DAB: the band III frequency table, the frequency list programmed into
//! the chip, the prescan and the channel directory.
//!
//! DAB tuning goes by index into the list last written with
//! DAB_SET_FREQ_LIST. After a function change the full reference table is
//! programmed, every entry is tuned once, and only the frequencies that
//! reported a valid signal are kept. The service list worker then walks the
//! kept frequencies and fills the directory (see [`crate::services`]).

use si468x_core::band::TICKS_PER_MHZ;
use si468x_core::{Error, Function, InjectionSide, RadioEvent, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::commands::{
    cmd_dab_digrad_status, cmd_dab_event_status, cmd_dab_get_freq_list, cmd_dab_set_freq_list,
    cmd_dab_tune, cmd_start_service, cmd_stop_service, parse_digrad_status, parse_event_status,
    parse_freq_list, parse_freq_list_count, ComponentInfo, DigradReport, EventStatusReport,
    RsqArgs, ServiceInfo, DAB_MAX_FREQUENCIES,
};
use crate::device::Session;
use crate::properties::{DAB_EVENT_INTERRUPT_SOURCE, SRVLIST_INTEN};
use crate::tune::SeekRequest;

/// Ticks per kHz.
const TICKS_PER_KHZ: u32 = TICKS_PER_MHZ / 1_000;

/// A band III channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyEntry {
    pub frequency_khz: u32,
    pub name: &'static str,
}

const fn entry(frequency_khz: u32, name: &'static str) -> FrequencyEntry {
    FrequencyEntry {
        frequency_khz,
        name,
    }
}

/// Band III channels 5A to 13F, ascending.
pub const DAB_FREQUENCY_TABLE: [FrequencyEntry; 41] = [
    entry(174_928, "5A"),
    entry(176_640, "5B"),
    entry(178_352, "5C"),
    entry(180_064, "5D"),
    entry(181_936, "6A"),
    entry(183_648, "6B"),
    entry(185_360, "6C"),
    entry(187_072, "6D"),
    entry(188_928, "7A"),
    entry(190_640, "7B"),
    entry(192_352, "7C"),
    entry(194_064, "7D"),
    entry(195_936, "8A"),
    entry(197_648, "8B"),
    entry(199_360, "8C"),
    entry(201_072, "8D"),
    entry(202_928, "9A"),
    entry(204_640, "9B"),
    entry(206_352, "9C"),
    entry(208_064, "9D"),
    entry(209_936, "10A"),
    entry(210_096, "10N"),
    entry(211_648, "10B"),
    entry(213_360, "10C"),
    entry(215_072, "10D"),
    entry(216_928, "11A"),
    entry(217_088, "11N"),
    entry(218_640, "11B"),
    entry(220_352, "11C"),
    entry(222_064, "11D"),
    entry(223_936, "12A"),
    entry(224_096, "12N"),
    entry(225_648, "12B"),
    entry(227_360, "12C"),
    entry(229_072, "12D"),
    entry(230_784, "13A"),
    entry(232_496, "13B"),
    entry(234_208, "13C"),
    entry(235_776, "13D"),
    entry(237_488, "13E"),
    entry(239_200, "13F"),
];

/// A reference table entry plus what this device has learned about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceFrequency {
    pub entry: FrequencyEntry,
    /// Present in the list last read back from the chip.
    pub active: bool,
    /// Reported a valid signal during the last prescan.
    pub valid: bool,
}

/// One audio component of an ensemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Service list version it was read from.
    pub list_version: u16,
    /// Index of its ensemble in the loaded frequency list.
    pub freq_index: u8,
    pub frequency_khz: u32,
    pub fic_quality: u8,
    pub rssi: i8,
    pub service: ServiceInfo,
    pub component: ComponentInfo,
    /// The service is running on the chip.
    pub started: bool,
}

impl Channel {
    /// Component id as reported in service data headers.
    pub fn component_id(&self) -> u32 {
        self.component.subch_id as u32
            | self.component.fidc_id as u32
            | self.component.sc_id as u32
    }
}

/// Per-device DAB bookkeeping.
#[derive(Debug)]
pub(crate) struct DabState {
    pub reference: Vec<ReferenceFrequency>,
    /// The list currently programmed into the chip; tune indices refer to it.
    pub programmed: Vec<u32>,
    /// Frequencies kept by the last prescan.
    pub loaded: Vec<u32>,
    pub channels: Vec<Channel>,
    /// An ensemble scan is walking `loaded`.
    pub full_scan: bool,
}

impl Default for DabState {
    fn default() -> Self {
        DabState {
            reference: DAB_FREQUENCY_TABLE
                .iter()
                .map(|&entry| ReferenceFrequency {
                    entry,
                    active: false,
                    valid: false,
                })
                .collect(),
            programmed: Vec::new(),
            loaded: Vec::new(),
            channels: Vec::new(),
            full_scan: false,
        }
    }
}

impl Session<'_> {
    pub(crate) fn require_dab(&self) -> Result<()> {
        if self.state.function != Function::Dab {
            return Err(Error::InvalidState(format!(
                "{} is running, not the DAB receiver",
                self.state.function
            )));
        }
        Ok(())
    }

    /// The reference table with the active and valid flags.
    pub fn frequency_table(&self) -> &[ReferenceFrequency] {
        &self.state.dab.reference
    }

    /// Frequencies (kHz) kept by the last prescan.
    pub fn loaded_frequencies(&self) -> &[u32] {
        &self.state.dab.loaded
    }

    /// Program the chip's frequency list (kHz, at most 48 entries).
    pub async fn set_freq_list(&mut self, freqs_khz: &[u32]) -> Result<()> {
        self.require_dab()?;
        let cmd = cmd_dab_set_freq_list(freqs_khz)?;
        self.send_command(&cmd).await?;
        self.state.dab.programmed = freqs_khz.to_vec();
        debug!(count = freqs_khz.len(), "DAB frequency list programmed");
        Ok(())
    }

    /// Read the chip's frequency list back and flag the reference entries
    /// it contains as active.
    pub async fn get_freq_list(&mut self) -> Result<Vec<u32>> {
        self.require_dab()?;
        let reply = self.send_command(&cmd_dab_get_freq_list()).await?;
        let count = parse_freq_list_count(&reply)?;
        if count > DAB_MAX_FREQUENCIES {
            return Err(Error::InvalidParameter(format!(
                "chip reports {count} frequencies, at most {DAB_MAX_FREQUENCIES} supported"
            )));
        }

        let reply = self
            .send_command(&cmd_dab_get_freq_list().with_reply_len(8 + 4 * count))
            .await?;
        let recount = parse_freq_list_count(&reply)?;
        if recount != count {
            return Err(Error::Protocol(format!(
                "frequency count changed from {count} to {recount} between reads"
            )));
        }
        let freqs = parse_freq_list(&reply, count)?;

        for reference in &mut self.state.dab.reference {
            reference.active = freqs.contains(&reference.entry.frequency_khz);
        }
        Ok(freqs)
    }

    /// Tune to `khz`, which must be in the programmed list.
    pub(crate) async fn dab_tune(&mut self, khz: u32, cancel: &CancellationToken) -> Result<()> {
        let index = self
            .state
            .dab
            .programmed
            .iter()
            .position(|&f| f == khz)
            .ok_or_else(|| {
                Error::InvalidParameter(format!("{khz} kHz is not in the DAB frequency list"))
            })?;
        debug!(khz, index, "DAB tune");
        self.tune_and_wait(&cmd_dab_tune(InjectionSide::Auto, index as u8, 0), cancel)
            .await
    }

    /// DAB_DIGRAD_STATUS without acknowledgements.
    pub async fn digrad_status(&mut self) -> Result<DigradReport> {
        let reply = self
            .send_command(&cmd_dab_digrad_status(&RsqArgs::default()))
            .await?;
        parse_digrad_status(&reply)
    }

    pub async fn dab_event_status(&mut self, ack: bool) -> Result<EventStatusReport> {
        let reply = self.send_command(&cmd_dab_event_status(ack)).await?;
        parse_event_status(&reply)
    }

    /// Tune every reference frequency once and keep those with a valid
    /// signal as the loaded (and programmed) list. Returns how many were
    /// kept.
    pub async fn load_valid_frequencies(&mut self, cancel: &CancellationToken) -> Result<usize> {
        let reference: Vec<u32> = DAB_FREQUENCY_TABLE.iter().map(|e| e.frequency_khz).collect();
        self.set_freq_list(&reference).await?;

        let mut valid = Vec::new();
        for (index, &khz) in reference.iter().enumerate() {
            self.tune_and_wait(&cmd_dab_tune(InjectionSide::Auto, index as u8, 0), cancel)
                .await?;
            match self.digrad_status().await {
                Ok(report) => {
                    self.state.dab.reference[index].valid = report.valid;
                    if report.valid {
                        valid.push(khz);
                    }
                }
                Err(e) => debug!(khz, "signal query failed during prescan: {e}"),
            }
        }

        if valid.is_empty() {
            self.state.dab.loaded.clear();
            self.state.dab.channels.clear();
            return Err(Error::InvalidParameter("no DAB ensemble found".into()));
        }

        self.update_bits(DAB_EVENT_INTERRUPT_SOURCE, SRVLIST_INTEN, SRVLIST_INTEN)
            .await?;
        self.set_freq_list(&valid).await?;
        let count = valid.len();
        self.state.dab.loaded = valid;
        info!(count, "DAB prescan complete");
        Ok(count)
    }

    /// Start walking the loaded frequencies: tune the first and arm the
    /// per-frequency watchdog. The service list worker does the rest.
    pub async fn start_ensemble_scan(&mut self, cancel: &CancellationToken) -> Result<()> {
        let first = *self
            .state
            .dab
            .loaded
            .first()
            .ok_or_else(|| Error::InvalidState("no DAB frequencies loaded".into()))?;
        self.state.dab.full_scan = true;
        if let Err(e) = self.dab_tune(first, cancel).await {
            self.state.dab.full_scan = false;
            return Err(e);
        }
        let limit = self.state.config.scan_timeout;
        self.shared.arm_scan_deadline(limit);
        Ok(())
    }

    /// Start directory entry `index`, tuning its ensemble first if needed.
    pub async fn start_service(&mut self, index: usize, cancel: &CancellationToken) -> Result<()> {
        let channel = self.state.dab.channels.get(index).cloned().ok_or_else(|| {
            Error::InvalidParameter(format!("no channel {index} in the directory"))
        })?;
        let tuned = self.digrad_status().await?.tune_index;
        if channel.freq_index != tuned {
            self.dab_tune(channel.frequency_khz, cancel).await?;
        }
        self.send_command(&cmd_start_service(&channel.service, &channel.component))
            .await?;

        for (i, entry) in self.state.dab.channels.iter_mut().enumerate() {
            entry.started = i == index;
        }
        info!(
            service_id = channel.service.service_id,
            label = %channel.service.label,
            "DAB service started"
        );
        self.shared.emit(RadioEvent::ServiceStarted {
            service_id: channel.service.service_id,
            component_id: channel.component_id(),
        });
        Ok(())
    }

    /// Stop directory entry `index`.
    pub async fn stop_service(&mut self, index: usize) -> Result<()> {
        let channel = self.state.dab.channels.get(index).ok_or_else(|| {
            Error::InvalidParameter(format!("no channel {index} in the directory"))
        })?;
        let cmd = cmd_stop_service(&channel.service, &channel.component);
        self.send_command(&cmd).await?;
        if let Some(entry) = self.state.dab.channels.get_mut(index) {
            entry.started = false;
        }
        Ok(())
    }

    /// Move through the directory. A zero `range_low` steps to the next
    /// or previous entry; otherwise the entry matching frequency, service
    /// id and sub-channel exactly is started.
    pub(crate) async fn dab_seek(&mut self, req: &SeekRequest, cancel: &CancellationToken) -> Result<()> {
        let count = self.state.dab.channels.len();
        if count == 0 {
            return Err(Error::InvalidParameter("DAB channel directory is empty".into()));
        }
        let started = self.state.dab.channels.iter().position(|c| c.started);
        if let Some(current) = started {
            self.stop_service(current).await?;
        }

        let khz = req.range_low / TICKS_PER_KHZ;
        let target = if khz == 0 {
            match started {
                Some(i) if req.upward => {
                    if i + 1 < count {
                        i + 1
                    } else if req.wrap {
                        0
                    } else {
                        i
                    }
                }
                Some(i) => {
                    if i > 0 {
                        i - 1
                    } else if req.wrap {
                        count - 1
                    } else {
                        i
                    }
                }
                None if req.upward => 0,
                None => count - 1,
            }
        } else {
            let service_id = req.range_high / TICKS_PER_MHZ;
            self.state
                .dab
                .channels
                .iter()
                .position(|c| {
                    c.frequency_khz == khz
                        && c.service.service_id == service_id
                        && c.component.subch_id as u32 == req.spacing
                })
                .ok_or_else(|| {
                    Error::InvalidParameter(format!(
                        "no service {service_id:#x} sub-channel {} at {khz} kHz",
                        req.spacing
                    ))
                })?
        };
        self.start_service(target, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use si468x_test_harness::replies;

    use crate::device::testing::*;
    use crate::models::Model;

    use super::*;

    fn stc_reply() -> Vec<u8> {
        replies::with_status(4, 0x81, replies::APPLICATION)
    }

    fn digrad(valid: bool, tune_index: u8) -> Vec<u8> {
        let mut reply = replies::app_ok(23);
        reply[5] = valid as u8;
        reply[16] = tune_index;
        reply
    }

    fn set_list_frame(freqs: &[u32]) -> Vec<u8> {
        let mut frame = vec![0xB8, freqs.len() as u8, 0, 0];
        for f in freqs {
            frame.extend_from_slice(&f.to_le_bytes());
        }
        frame
    }

    fn channel(freq_index: u8, frequency_khz: u32, service_id: u32, subch_id: u8) -> Channel {
        Channel {
            list_version: 1,
            freq_index,
            frequency_khz,
            fic_quality: 100,
            rssi: 30,
            service: ServiceInfo {
                service_id,
                label: format!("SVC {service_id:X}"),
                ..Default::default()
            },
            component: ComponentInfo {
                subch_id,
                ..Default::default()
            },
            started: false,
        }
    }

    fn start_frame(service_id: u16, subch_id: u8) -> Vec<u8> {
        let sid = service_id.to_le_bytes();
        vec![0x81, 0, 0, 0, sid[0], sid[1], 0, 0, subch_id, 0, 0, 0]
    }

    fn stop_frame(service_id: u16, subch_id: u8) -> Vec<u8> {
        let mut frame = start_frame(service_id, subch_id);
        frame[0] = 0x82;
        frame
    }

    #[test]
    fn reference_table_is_band_three() {
        assert_eq!(DAB_FREQUENCY_TABLE.len(), 41);
        assert_eq!(DAB_FREQUENCY_TABLE[0], entry(174_928, "5A"));
        assert_eq!(DAB_FREQUENCY_TABLE[40], entry(239_200, "13F"));
        assert!(DAB_FREQUENCY_TABLE
            .windows(2)
            .all(|w| w[0].frequency_khz < w[1].frequency_khz));
        assert!(DAB_FREQUENCY_TABLE.len() <= DAB_MAX_FREQUENCIES);
    }

    #[test]
    fn component_id_merges_ids() {
        let mut c = channel(0, 174_928, 0x1234, 7);
        assert_eq!(c.component_id(), 7);
        c.component = ComponentInfo {
            tm_id: 3,
            sc_id: 0x0123,
            ..Default::default()
        };
        assert_eq!(c.component_id(), 0x0123);
    }

    #[tokio::test(start_paused = true)]
    async fn set_freq_list_records_programmed_list() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        let freqs = [174_928, 225_648];
        t.mock.expect_command(&set_list_frame(&freqs), &replies::app_ok(4));

        let mut session = t.radio.lock().await;
        session.set_freq_list(&freqs).await.unwrap();
        assert_eq!(session.state.dab.programmed, freqs);
        assert!(matches!(
            session.set_freq_list(&[]).await.unwrap_err(),
            Error::InvalidParameter(_)
        ));
    }

    #[tokio::test]
    async fn freq_list_needs_dab() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let mut session = t.radio.lock().await;
        assert!(matches!(
            session.set_freq_list(&[174_928]).await.unwrap_err(),
            Error::InvalidState(_)
        ));
        assert_eq!(t.mock.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn get_freq_list_reads_twice_and_marks_active() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        let mut short = replies::app_ok(8);
        short[4] = 2;
        let mut full = replies::app_ok(16);
        full[4] = 2;
        replies::put_le32(&mut full, 8, 174_928);
        replies::put_le32(&mut full, 12, 225_648);
        t.mock.expect_command(&[0xB9, 0x00], &short);
        t.mock.expect_command(&[0xB9, 0x00], &full);

        let mut session = t.radio.lock().await;
        assert_eq!(session.get_freq_list().await.unwrap(), vec![174_928, 225_648]);
        assert_eq!(t.mock.read_lengths().last(), Some(&16));
        let active: Vec<&str> = session
            .frequency_table()
            .iter()
            .filter(|r| r.active)
            .map(|r| r.entry.name)
            .collect();
        assert_eq!(active, vec!["5A", "12B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn get_freq_list_rejects_oversized_count() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        let mut short = replies::app_ok(8);
        short[4] = 49;
        t.mock.expect_command(&[0xB9, 0x00], &short);

        let mut session = t.radio.lock().await;
        assert!(matches!(
            session.get_freq_list().await.unwrap_err(),
            Error::InvalidParameter(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn get_freq_list_detects_changed_count() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        let mut short = replies::app_ok(8);
        short[4] = 2;
        let mut full = replies::app_ok(16);
        full[4] = 1;
        t.mock.expect_command(&[0xB9, 0x00], &short);
        t.mock.expect_command(&[0xB9, 0x00], &full);

        let mut session = t.radio.lock().await;
        assert!(matches!(
            session.get_freq_list().await.unwrap_err(),
            Error::Protocol(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dab_tune_uses_programmed_index() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        t.mock.expect_command(&[0xB0, 0x00, 0x01, 0x00, 0x00, 0x00], &stc_reply());
        t.mock.expect_command(&[0xB2, 0x01], &replies::app_ok(23));

        let mut session = t.radio.lock().await;
        session.state.dab.programmed = vec![174_928, 225_648];
        session.tune(225_648, &CancellationToken::new()).await.unwrap();
        assert!(matches!(
            session.tune(227_360, &CancellationToken::new()).await.unwrap_err(),
            Error::InvalidParameter(_)
        ));
        assert_eq!(t.mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn prescan_keeps_valid_frequencies() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        let reference: Vec<u32> = DAB_FREQUENCY_TABLE.iter().map(|e| e.frequency_khz).collect();
        let good = [4usize, 32];

        t.mock.expect_command(&set_list_frame(&reference), &replies::app_ok(4));
        for index in 0..reference.len() {
            t.mock
                .expect_command(&[0xB0, 0x00, index as u8, 0x00, 0x00, 0x00], &stc_reply());
            t.mock.expect_command(&[0xB2, 0x01], &replies::app_ok(23));
            t.mock
                .expect_command(&[0xB2, 0x00], &digrad(good.contains(&index), index as u8));
        }
        // Service list interrupt: read, then set.
        let mut prop = replies::app_ok(6);
        replies::put_le16(&mut prop, 4, 0);
        t.mock.expect_command(&[0x14, 0x01, 0x00, 0xB3], &prop);
        t.mock.expect_command(&[0x13, 0x00, 0x00, 0xB3, 0x01, 0x00], &replies::app_ok(4));
        let kept = [reference[4], reference[32]];
        t.mock.expect_command(&set_list_frame(&kept), &replies::app_ok(4));

        let mut session = t.radio.lock().await;
        let count = session
            .load_valid_frequencies(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(session.loaded_frequencies(), &kept);
        assert_eq!(session.state.dab.programmed, kept);
        let valid: Vec<&str> = session
            .frequency_table()
            .iter()
            .filter(|r| r.valid)
            .map(|r| r.entry.name)
            .collect();
        assert_eq!(valid, vec!["6A", "12B"]);
        assert_eq!(t.mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn prescan_without_signal_fails() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        let reference: Vec<u32> = DAB_FREQUENCY_TABLE.iter().map(|e| e.frequency_khz).collect();
        t.mock.expect_command(&set_list_frame(&reference), &replies::app_ok(4));
        for index in 0..reference.len() {
            t.mock
                .expect_command(&[0xB0, 0x00, index as u8, 0x00, 0x00, 0x00], &stc_reply());
            t.mock.expect_command(&[0xB2, 0x01], &replies::app_ok(23));
            t.mock.expect_command(&[0xB2, 0x00], &digrad(false, index as u8));
        }

        let mut session = t.radio.lock().await;
        session.state.dab.channels.push(channel(0, 174_928, 1, 1));
        let err = session
            .load_valid_frequencies(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(session.channels().is_empty());
        assert!(session.loaded_frequencies().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ensemble_scan_tunes_first_and_arms_watchdog() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        t.mock.expect_command(&[0xB0, 0x00, 0x00, 0x00, 0x00, 0x00], &stc_reply());
        t.mock.expect_command(&[0xB2, 0x01], &replies::app_ok(23));

        let mut session = t.radio.lock().await;
        session.state.dab.loaded = vec![181_936, 225_648];
        session.state.dab.programmed = vec![181_936, 225_648];
        session
            .start_ensemble_scan(&CancellationToken::new())
            .await
            .unwrap();
        assert!(session.state.dab.full_scan);
        assert!(t.radio.shared.scan_deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn start_service_tunes_other_ensemble() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        let mut events = t.radio.subscribe();

        t.mock.expect_command(&[0xB2, 0x00], &digrad(true, 0));
        t.mock.expect_command(&[0xB0, 0x00, 0x01, 0x00, 0x00, 0x00], &stc_reply());
        t.mock.expect_command(&[0xB2, 0x01], &replies::app_ok(23));
        t.mock.expect_command(&start_frame(0x0C21, 4), &replies::app_ok(4));

        let mut session = t.radio.lock().await;
        session.state.dab.programmed = vec![181_936, 225_648];
        session.state.dab.channels = vec![
            channel(0, 181_936, 0x0C20, 3),
            channel(1, 225_648, 0x0C21, 4),
        ];
        session.start_service(1, &CancellationToken::new()).await.unwrap();

        assert!(session.channels()[1].started);
        assert!(!session.channels()[0].started);
        assert_eq!(events.try_recv().unwrap(), RadioEvent::TuneComplete);
        assert_eq!(
            events.try_recv().unwrap(),
            RadioEvent::ServiceStarted {
                service_id: 0x0C21,
                component_id: 4,
            }
        );
        assert_eq!(t.mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_steps_through_directory() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        // Entry 1 running: stop it, wrap past the end to entry 0.
        t.mock.expect_command(&stop_frame(0x0C21, 4), &replies::app_ok(4));
        t.mock.expect_command(&[0xB2, 0x00], &digrad(true, 0));
        t.mock.expect_command(&start_frame(0x0C20, 3), &replies::app_ok(4));

        let mut session = t.radio.lock().await;
        session.state.dab.channels = vec![
            channel(0, 181_936, 0x0C20, 3),
            channel(0, 181_936, 0x0C21, 4),
        ];
        session.state.dab.channels[1].started = true;
        let req = SeekRequest {
            upward: true,
            wrap: true,
            ..Default::default()
        };
        session.seek_start(&req, &CancellationToken::new()).await.unwrap();
        assert!(session.channels()[0].started);
        assert!(!session.channels()[1].started);
        assert_eq!(t.mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_downward_without_running_service_takes_last() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        t.mock.expect_command(&[0xB2, 0x00], &digrad(true, 0));
        t.mock.expect_command(&start_frame(0x0C22, 5), &replies::app_ok(4));

        let mut session = t.radio.lock().await;
        session.state.dab.channels = vec![
            channel(0, 181_936, 0x0C20, 3),
            channel(0, 181_936, 0x0C21, 4),
            channel(0, 181_936, 0x0C22, 5),
        ];
        let req = SeekRequest::default();
        session.seek_start(&req, &CancellationToken::new()).await.unwrap();
        assert!(session.channels()[2].started);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_selects_exact_entry() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        t.mock.expect_command(&[0xB2, 0x00], &digrad(true, 0));
        t.mock.expect_command(&start_frame(0x0C21, 4), &replies::app_ok(4));

        let mut session = t.radio.lock().await;
        session.state.dab.channels = vec![
            channel(0, 181_936, 0x0C20, 3),
            channel(0, 181_936, 0x0C21, 4),
        ];
        let req = SeekRequest {
            range_low: 181_936 * TICKS_PER_KHZ,
            range_high: 0x0C21 * TICKS_PER_MHZ,
            spacing: 4,
            ..Default::default()
        };
        session.seek_start(&req, &CancellationToken::new()).await.unwrap();
        assert!(session.channels()[1].started);

        let missing = SeekRequest {
            spacing: 9,
            ..req
        };
        // The running entry is stopped before the lookup fails.
        t.mock.expect_command(&stop_frame(0x0C21, 4), &replies::app_ok(4));
        assert!(matches!(
            session
                .seek_start(&missing, &CancellationToken::new())
                .await
                .unwrap_err(),
            Error::InvalidParameter(_)
        ));
    }

    #[tokio::test]
    async fn seek_in_empty_directory_fails() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        let mut session = t.radio.lock().await;
        assert!(matches!(
            session
                .seek_start(&SeekRequest::default(), &CancellationToken::new())
                .await
                .unwrap_err(),
            Error::InvalidParameter(_)
        ));
        assert_eq!(t.mock.write_count(), 0);
    }
}
