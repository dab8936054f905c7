//! Interrupt and status dispatch.
//!
//! A status read decodes two bytes and routes each set bit: CTS and STC wake
//! the engine and tune waiters, the RDS and service-data bits start their
//! workers unless one is already running, and a digital event always
//! schedules a service list refresh. Nothing here blocks on the device lock.

use std::sync::Arc;

use si468x_core::Result;
use tracing::{debug, trace, warn};

use crate::device::{Shared, Si468x};
use crate::status::Status;

impl Shared {
    /// Read the status word and signal whatever it reports.
    pub(crate) async fn get_and_signal_status(&self) -> Result<Status> {
        let reply = self.read_reply(2).await?;
        let status = Status::from_bytes(&reply);
        trace!(byte0 = status.byte0, byte1 = status.byte1, "status");

        if status.cts() {
            self.cts.set();
        }
        if status.rds() {
            self.trigger_rds_drain();
        }
        if status.dacq() {
            debug!("digital radio acquisition changed");
        }
        if status.dsrv() {
            self.trigger_service_data();
        }
        if status.devnt() {
            self.trigger_service_list();
        }
        if status.stc() {
            self.stc.set();
        }
        Ok(status)
    }

    pub(crate) fn trigger_rds_drain(&self) {
        if Shared::try_claim(&self.rds_running) {
            self.rds_wake.notify_one();
        } else {
            trace!("RDS drain already running");
        }
    }

    pub(crate) fn trigger_service_data(&self) {
        if Shared::try_claim(&self.service_data_running) {
            self.service_data_wake.notify_one();
        } else {
            trace!("service data fetch already running");
        }
    }

    pub(crate) fn trigger_service_list(&self) {
        self.service_list_wake.notify_one();
    }
}

impl Si468x {
    /// Entry point for the chip's interrupt line.
    ///
    /// Never blocks: the status read runs on a spawned task. Ignored while
    /// interrupt delivery is disabled.
    pub fn handle_interrupt(&self) {
        if !self.shared.irq_enabled() {
            trace!("interrupt while disabled, ignored");
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = shared.get_and_signal_status().await {
                warn!("status read after interrupt failed: {e}");
            }
        });
    }
}
