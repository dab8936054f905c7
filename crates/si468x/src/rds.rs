//! RDS: the FIFO drainer and the host-side block buffer.
//!
//! The chip raises RDS-available once its FIFO holds the configured number
//! of groups. The dispatcher wakes [`drain_worker`], which empties the chip
//! FIFO into [`RdsBuffer`] under the device lock. Readers take whole blocks
//! out of the buffer with [`Si468x::read_rds`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use si468x_core::{Error, Function, RadioEvent, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::commands::{
    cmd_rds_blockcount, cmd_rds_status, parse_rds_blockcount, parse_rds_status, RdsBlock,
    RdsBlockCount,
};
use crate::device::{ClaimGuard, Session, Shared, Si468x};
use crate::properties::{
    FM_RDS_CONFIG, FM_RDS_INTERRUPT_FIFO_COUNT, FM_RDS_INTERRUPT_SOURCE, RDS_ENABLE, RDS_RECV,
};

/// Blocks held on the host before the oldest are dropped.
pub const RDS_BUFFER_BLOCKS: usize = 128;

impl RdsBlock {
    /// Wire form handed to readers: lsb, msb, block id.
    pub fn to_bytes(&self) -> [u8; 3] {
        [self.lsb, self.msb, self.block]
    }
}

// ---------------------------------------------------------------
// Host buffer
// ---------------------------------------------------------------

/// Bounded ring of RDS blocks. The producer never waits: a full ring drops
/// its oldest block.
#[derive(Debug, Default)]
pub(crate) struct RdsBuffer {
    blocks: StdMutex<VecDeque<RdsBlock>>,
    readers: tokio::sync::Notify,
}

impl RdsBuffer {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<RdsBlock>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, blocks: &[RdsBlock]) {
        let mut ring = self.lock();
        for block in blocks {
            if ring.len() == RDS_BUFFER_BLOCKS {
                ring.pop_front();
            }
            ring.push_back(*block);
        }
    }

    /// Remove up to `max` blocks, oldest first.
    pub(crate) fn take(&self, max: usize) -> Vec<RdsBlock> {
        let mut ring = self.lock();
        let n = max.min(ring.len());
        ring.drain(..n).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Release every blocked reader so it can re-check the buffer and the
    /// device liveness.
    pub(crate) fn wake_readers(&self) {
        self.readers.notify_waiters();
    }
}

// ---------------------------------------------------------------
// Drainer
// ---------------------------------------------------------------

/// Long-lived drain task. One pass per wakeup; the dispatcher only wakes it
/// after claiming `rds_running`, and the pass releases the claim when done.
pub(crate) async fn drain_worker(shared: Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = shared.rds_wake.notified() => {}
        }
        let _claim = ClaimGuard::new(&shared.rds_running);
        let mut session = Session::acquire(&shared).await;
        if let Err(e) = session.drain_rds().await {
            warn!("RDS drain failed: {e}");
        }
    }
    trace!("RDS drainer stopped");
}

impl Session<'_> {
    /// Move every group waiting in the chip FIFO into the host buffer.
    ///
    /// Returns the number of groups moved.
    pub(crate) async fn drain_rds(&mut self) -> Result<usize> {
        let reply = self.send_command(&cmd_rds_status(true, false, false)).await?;
        let used = parse_rds_status(&reply)?.fifo_used;
        debug!(used, "draining RDS FIFO");

        let mut groups = 0;
        for remaining in (1..=used).rev() {
            // Acknowledge the interrupt with the last group only.
            let reply = self
                .send_command(&cmd_rds_status(false, false, remaining == 1))
                .await?;
            let report = parse_rds_status(&reply)?;
            trace!(blocks = ?report.blocks, "RDS group");
            self.shared.rds.push(&report.blocks);
            groups += 1;
        }

        self.shared.rds.wake_readers();
        if groups > 0 {
            self.shared.emit(RadioEvent::RdsReceived { groups });
        }
        Ok(groups)
    }

    fn require_fm(&self, what: &str) -> Result<()> {
        if self.state.function != Function::Fm {
            return Err(Error::InvalidState(format!(
                "{what} needs the FM receiver, running {}",
                self.state.function
            )));
        }
        Ok(())
    }

    /// Switch RDS reception on or off.
    ///
    /// Enabling programs the FIFO interrupt threshold and source and flushes
    /// the chip FIFO before turning processing on.
    pub async fn enable_rds(&mut self, enable: bool) -> Result<()> {
        self.require_fm("RDS")?;
        if !enable {
            return self.update_bits(FM_RDS_CONFIG, RDS_ENABLE, 0).await;
        }
        let fifo_count = self.state.config.rds_fifo_count;
        self.set_property(FM_RDS_INTERRUPT_FIFO_COUNT, fifo_count).await?;
        self.set_property(FM_RDS_INTERRUPT_SOURCE, RDS_RECV).await?;
        self.send_command(&cmd_rds_status(false, true, true)).await?;
        self.update_bits(FM_RDS_CONFIG, RDS_ENABLE, RDS_ENABLE).await
    }

    /// Block statistics since the last clear.
    pub async fn rds_blockcount(&mut self, clear: bool) -> Result<RdsBlockCount> {
        self.require_fm("RDS block count")?;
        let reply = self.send_command(&cmd_rds_blockcount(clear)).await?;
        parse_rds_blockcount(&reply)
    }
}

// ---------------------------------------------------------------
// Readers
// ---------------------------------------------------------------

impl Si468x {
    /// Take up to `max_blocks` RDS blocks from the host buffer.
    ///
    /// With `blocking` false an empty buffer yields [`Error::WouldBlock`].
    /// Otherwise the call waits for the next drain, failing with
    /// [`Error::Cancelled`] when `cancel` fires and [`Error::NotAlive`] when
    /// the device dies or is dropped.
    pub async fn read_rds(
        &self,
        max_blocks: usize,
        blocking: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<RdsBlock>> {
        if max_blocks == 0 {
            return Err(Error::InvalidParameter("RDS read of zero blocks".into()));
        }
        let rds = &self.shared.rds;
        loop {
            let notified = rds.readers.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let blocks = rds.take(max_blocks);
            if !blocks.is_empty() {
                return Ok(blocks);
            }
            if !blocking {
                return Err(Error::WouldBlock);
            }
            if !self.shared.is_alive() {
                return Err(Error::NotAlive);
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.shared.shutdown.cancelled() => return Err(Error::NotAlive),
            }
        }
    }

    /// Blocks waiting in the host buffer.
    pub fn rds_pending(&self) -> usize {
        self.shared.rds.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use si468x_test_harness::replies;

    use crate::device::testing::*;
    use crate::models::Model;

    use super::*;

    fn fifo_status(used: u8) -> Vec<u8> {
        let mut reply = replies::app_ok(20);
        reply[10] = used;
        reply
    }

    fn group(seed: u8) -> Vec<u8> {
        let mut reply = replies::app_ok(20);
        for i in 0..8 {
            reply[12 + i] = seed + i as u8;
        }
        reply
    }

    fn block(lsb: u8, msb: u8, id: u8) -> RdsBlock {
        RdsBlock { lsb, msb, block: id }
    }

    #[tokio::test(start_paused = true)]
    async fn drain_acknowledges_only_the_last_group() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let mut events = t.radio.subscribe();

        t.mock.expect_command(&[0x34, 0x04], &fifo_status(3));
        t.mock.expect_command(&[0x34, 0x00], &group(0x10));
        t.mock.expect_command(&[0x34, 0x00], &group(0x20));
        t.mock.expect_command(&[0x34, 0x01], &group(0x30));

        let mut session = t.radio.lock().await;
        assert_eq!(session.drain_rds().await.unwrap(), 3);
        drop(session);

        assert_eq!(t.mock.remaining_expectations(), 0);
        assert_eq!(t.radio.rds_pending(), 12);
        assert_eq!(events.try_recv().unwrap(), RadioEvent::RdsReceived { groups: 3 });

        let cancel = CancellationToken::new();
        let blocks = t.radio.read_rds(5, false, &cancel).await.unwrap();
        assert_eq!(
            blocks,
            vec![
                block(0x10, 0x11, 0),
                block(0x12, 0x13, 1),
                block(0x14, 0x15, 2),
                block(0x16, 0x17, 3),
                block(0x20, 0x21, 0),
            ]
        );
        assert_eq!(blocks[1].to_bytes(), [0x12, 0x13, 1]);
        assert_eq!(t.radio.rds_pending(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_group_stops_the_drain() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        t.mock.expect_command(&[0x34, 0x04], &fifo_status(2));
        t.mock.expect_command(&[0x34, 0x00], &replies::error(0x01, replies::APPLICATION));

        let mut session = t.radio.lock().await;
        assert!(session.drain_rds().await.is_err());
        assert_eq!(t.radio.shared.rds.len(), 0);
    }

    #[test]
    fn ring_drops_oldest() {
        let ring = RdsBuffer::default();
        for i in 0..(RDS_BUFFER_BLOCKS + 4) {
            ring.push(&[block(i as u8, 0, 0)]);
        }
        assert_eq!(ring.len(), RDS_BUFFER_BLOCKS);
        assert_eq!(ring.take(1), vec![block(4, 0, 0)]);
    }

    #[tokio::test]
    async fn nonblocking_read_of_empty_buffer() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let cancel = CancellationToken::new();
        assert!(matches!(
            t.radio.read_rds(4, false, &cancel).await.unwrap_err(),
            Error::WouldBlock
        ));
        assert!(matches!(
            t.radio.read_rds(0, false, &cancel).await.unwrap_err(),
            Error::InvalidParameter(_)
        ));
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_new_data() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let shared = Arc::clone(&t.radio.shared);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            shared.rds.push(&[block(1, 2, 0)]);
            shared.rds.wake_readers();
        });

        let cancel = CancellationToken::new();
        let blocks = t.radio.read_rds(8, true, &cancel).await.unwrap();
        assert_eq!(blocks, vec![block(1, 2, 0)]);
    }

    #[tokio::test]
    async fn blocking_read_cancelled() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        assert!(matches!(
            t.radio.read_rds(8, true, &cancel).await.unwrap_err(),
            Error::Cancelled
        ));
    }

    #[tokio::test]
    async fn blocking_read_released_when_device_dies() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let shared = Arc::clone(&t.radio.shared);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            shared.pronounce_dead();
        });
        let cancel = CancellationToken::new();
        assert!(matches!(
            t.radio.read_rds(8, true, &cancel).await.unwrap_err(),
            Error::NotAlive
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_read_released_by_power_down() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let cancel = CancellationToken::new();

        let reader = t.radio.read_rds(8, true, &cancel);
        let closer = async {
            tokio::task::yield_now().await;
            t.radio.power_down().await
        };
        let (read, down) = tokio::time::timeout(Duration::from_secs(1), async {
            tokio::join!(reader, closer)
        })
        .await
        .expect("reader still parked after power down");

        down.unwrap();
        assert!(matches!(read.unwrap_err(), Error::NotAlive));
        // Anything parked on CTS or STC is released too.
        assert!(t.radio.shared.cts.is_set());
        assert!(t.radio.shared.stc.is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn enable_rds_programs_fifo_and_flushes() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let mut config_reply = replies::app_ok(6);
        replies::put_le16(&mut config_reply, 4, 0x0000);

        t.mock.expect_command(&[0x13, 0x00, 0x01, 0x3C, 20, 0x00], &replies::app_ok(4));
        t.mock.expect_command(&[0x13, 0x00, 0x00, 0x3C, 0x01, 0x00], &replies::app_ok(4));
        t.mock.expect_command(&[0x34, 0x03], &replies::app_ok(20));
        t.mock.expect_command(&[0x14, 0x01, 0x02, 0x3C], &config_reply);
        t.mock.expect_command(&[0x13, 0x00, 0x02, 0x3C, 0x01, 0x00], &replies::app_ok(4));

        let mut session = t.radio.lock().await;
        session.enable_rds(true).await.unwrap();
        assert_eq!(t.mock.remaining_expectations(), 0);

        // Disabling clears the enable bit from the shadow value.
        t.mock.expect_command(&[0x13, 0x00, 0x02, 0x3C, 0x00, 0x00], &replies::app_ok(4));
        session.enable_rds(false).await.unwrap();
        assert_eq!(t.mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn rds_needs_fm() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Dab).await;
        let mut session = t.radio.lock().await;
        assert!(matches!(
            session.enable_rds(true).await.unwrap_err(),
            Error::InvalidState(_)
        ));
        assert_eq!(t.mock.write_count(), 0);
    }
}
