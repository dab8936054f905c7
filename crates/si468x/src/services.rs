//! DAB service discovery and service data.
//!
//! Two long-lived workers, both woken by the dispatcher:
//!
//! - [`service_list_worker`] runs on every digital event. It reads the
//!   service list of the tuned ensemble into the channel directory and, while
//!   an ensemble scan is running, moves on to the next loaded frequency. A
//!   watchdog ends the scan when a frequency never produces a list.
//! - [`service_data_worker`] runs when service data is buffered on the chip
//!   and keeps the latest dynamic label.

use std::future::{pending, Future};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use si468x_core::{Error, RadioEvent, Result};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::commands::{
    cmd_get_service_data, cmd_get_service_list, parse_service_data_header,
    parse_service_list, parse_service_list_len, ServiceList, SERVICE_DATA_HEADER_LEN,
};
use crate::dab::Channel;
use crate::device::{ClaimGuard, Session, Shared, Si468x};
use crate::properties::{DIGITAL_SERVICE_INT_SOURCE, DSRV_INTEN};

/// Dynamic label buffer size, terminator included.
const DLS_MAX_LEN: usize = 128;

/// PAD data source carrying dynamic labels.
const DATA_SRC_DLS: u8 = 2;

// ---------------------------------------------------------------
// Service list
// ---------------------------------------------------------------

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Drive `step`, cancelling `cancel` once `limit` has passed. The step sees
/// the cancellation at its next cancellable wait, so a tune whose STC never
/// arrives gives the device lock back.
async fn with_deadline<T>(
    limit: Duration,
    cancel: &CancellationToken,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    let expire = async {
        sleep(limit).await;
        cancel.cancel();
        pending::<()>().await
    };
    tokio::select! {
        result = step => result,
        () = expire => Err(Error::Timeout),
    }
}

pub(crate) async fn service_list_worker(shared: Arc<Shared>) {
    loop {
        let deadline = shared.scan_deadline();
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = shared.service_list_wake.notified() => {
                let mut session = Session::acquire(&shared).await;
                if let Err(e) = session.refresh_service_list().await {
                    warn!("service list update failed: {e}");
                }
            }
            // The deadline moved; go round and pick it up.
            _ = shared.scan_rearm.notified() => {}
            _ = sleep_until_deadline(deadline) => {
                let mut session = Session::acquire(&shared).await;
                // Re-armed while we waited for the lock.
                if shared.scan_deadline().is_some_and(|d| d > Instant::now()) {
                    continue;
                }
                shared.clear_scan_deadline();
                if session.state.dab.full_scan {
                    warn!("no service list before the scan timeout, ending scan");
                    if let Err(e) = session.end_scan().await {
                        warn!("ending ensemble scan failed: {e}");
                    }
                }
            }
        }
    }
    trace!("service list worker stopped");
}

impl Session<'_> {
    /// GET_DIGITAL_SERVICE_LIST, reading the announced size on a second
    /// pass.
    pub async fn service_list(&mut self) -> Result<ServiceList> {
        let reply = self.send_command(&cmd_get_service_list()).await?;
        let len = parse_service_list_len(&reply)?;
        let reply = self
            .send_command(&cmd_get_service_list().with_reply_len(len))
            .await?;
        parse_service_list(&reply)
    }

    /// Replace the directory entries of the tuned ensemble with its current
    /// audio services, then advance a running ensemble scan.
    pub(crate) async fn refresh_service_list(&mut self) -> Result<()> {
        self.require_dab()?;
        self.dab_event_status(true).await?;
        let digrad = self.digrad_status().await?;
        let list = self.service_list().await?;
        let index = digrad.tune_index;

        let channels = &mut self.state.dab.channels;
        channels.retain(|c| c.freq_index != index);
        for record in list.services.iter().filter(|r| r.info.is_audio()) {
            for component in &record.components {
                channels.push(Channel {
                    list_version: list.version,
                    freq_index: index,
                    frequency_khz: digrad.readfreq,
                    fic_quality: digrad.fic_quality,
                    rssi: digrad.rssi,
                    service: record.info.clone(),
                    component: *component,
                    started: false,
                });
            }
        }
        let entries = channels.iter().filter(|c| c.freq_index == index).count();
        debug!(
            index,
            khz = digrad.readfreq,
            version = list.version,
            entries,
            "service list updated"
        );

        if self.state.dab.full_scan {
            self.advance_scan(index).await?;
        }
        self.shared
            .emit(RadioEvent::ServiceListUpdated { index, entries });
        Ok(())
    }

    async fn advance_scan(&mut self, index: u8) -> Result<()> {
        let next = self.state.dab.loaded.get(index as usize + 1).copied();
        let Some(khz) = next else {
            return self.end_scan().await;
        };
        trace!(khz, "ensemble scan moving on");
        let limit = self.state.config.scan_timeout;
        let cancel = self.shared.shutdown.child_token();
        match with_deadline(limit, &cancel, self.dab_tune(khz, &cancel)).await {
            Ok(()) => {
                self.shared.arm_scan_deadline(limit);
                Ok(())
            }
            Err(Error::Cancelled) if !self.shared.shutdown.is_cancelled() => {
                warn!(khz, "no tune complete before the scan timeout, ending scan");
                self.end_scan().await
            }
            Err(e) => Err(e),
        }
    }

    /// Finish an ensemble scan: start the strongest audio service found and
    /// announce the directory size.
    pub(crate) async fn end_scan(&mut self) -> Result<()> {
        self.state.dab.full_scan = false;
        self.shared.clear_scan_deadline();

        let channels = &self.state.dab.channels;
        let strongest = channels.iter().map(|c| c.rssi).max();
        let best = strongest.and_then(|rssi| {
            channels
                .iter()
                .position(|c| c.rssi == rssi && c.service.is_audio())
        });
        let Some(best) = best else {
            warn!("ensemble scan found no services");
            self.shared.emit(RadioEvent::ScanComplete { entries: 0 });
            return Ok(());
        };

        self.update_bits(DIGITAL_SERVICE_INT_SOURCE, DSRV_INTEN, DSRV_INTEN)
            .await?;
        let limit = self.state.config.scan_timeout;
        let cancel = self.shared.shutdown.child_token();
        with_deadline(limit, &cancel, self.start_service(best, &cancel)).await?;
        let entries = self.state.dab.channels.len();
        info!(entries, "ensemble scan complete");
        self.shared.emit(RadioEvent::ScanComplete { entries });
        Ok(())
    }
}

// ---------------------------------------------------------------
// Service data
// ---------------------------------------------------------------

/// Long-lived service data task; one fetch per wakeup, claimed through
/// `service_data_running` like the RDS drainer.
pub(crate) async fn service_data_worker(shared: Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = shared.service_data_wake.notified() => {}
        }
        let _claim = ClaimGuard::new(&shared.service_data_running);
        let mut session = Session::acquire(&shared).await;
        if let Err(e) = session.fetch_service_data().await {
            warn!("service data fetch failed: {e}");
        }
    }
    trace!("service data worker stopped");
}

/// Text of a dynamic label segment, or `None` when the payload is something
/// else.
fn dynamic_label(data_src: u8, payload: &[u8]) -> Option<String> {
    if data_src != DATA_SRC_DLS || payload.first().map_or(true, |b| b & 0x7f != 0) {
        return None;
    }
    let text = payload.get(2..).unwrap_or_default();
    let text = &text[..text.len().min(DLS_MAX_LEN - 1)];
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    Some(String::from_utf8_lossy(&text[..end]).into_owned())
}

impl Session<'_> {
    /// Fetch one buffered service data packet. A dynamic label replaces the
    /// stored one.
    pub(crate) async fn fetch_service_data(&mut self) -> Result<()> {
        let reply = self.send_command(&cmd_get_service_data(true, true)).await?;
        let header = parse_service_data_header(&reply)?;
        if header.overflow_int {
            error!("service data overflow on chip");
        }
        if header.buff_count == 0 {
            return Ok(());
        }

        let reply = self.send_command(&cmd_get_service_data(false, true)).await?;
        let header = parse_service_data_header(&reply)?;
        // The payload follows the header; read the whole reply again.
        let full = self
            .shared
            .read_reply(SERVICE_DATA_HEADER_LEN + header.byte_count as usize)
            .await?;
        let payload = &full[SERVICE_DATA_HEADER_LEN..];
        trace!(
            src = header.data_src,
            bytes = header.byte_count,
            "service data"
        );

        if let Some(label) = dynamic_label(header.data_src, payload) {
            debug!(%label, "dynamic label");
            *self
                .shared
                .label
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = label.clone();
            self.shared.emit(RadioEvent::DynamicLabel(label));
        }
        Ok(())
    }
}

impl Si468x {
    /// The last dynamic label received, empty if none.
    pub fn dynamic_label(&self) -> String {
        self.shared
            .label
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
