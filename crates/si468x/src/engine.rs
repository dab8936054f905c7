//! Command/response engine.
//!
//! One exchange is: write the command frame, clear CTS, wait for the
//! dispatcher to raise CTS (or poll the status once when the wait runs out),
//! then issue RD_REPLY and read the reply. Every reply updates the chip
//! lifecycle state, whether the command succeeded or not.
//!
//! Bus failures are counted per primitive. Once either counter passes
//! [`DEAD_THRESHOLD`] the device is declared dead and every waiter is
//! released.

use si468x_core::{ChipError, Error, RadioEvent, Result, Transport};
use tracing::{debug, error, trace, warn};

use crate::commands::{Command, RD_REPLY};
use crate::device::{Session, Shared};
use crate::status::{self, Status};

/// Consecutive failures tolerated per bus primitive.
pub(crate) const DEAD_THRESHOLD: u32 = 10;

/// Bytes needed to read the chip's error code.
const ERROR_REPLY_LEN: usize = 5;

// ---------------------------------------------------------------
// Bus
// ---------------------------------------------------------------

/// The transport plus its failure counters.
pub(crate) struct Bus {
    transport: Box<dyn Transport>,
    write_failures: u32,
    read_failures: u32,
}

impl Bus {
    pub(crate) fn new(transport: Box<dyn Transport>) -> Self {
        Bus {
            transport,
            write_failures: 0,
            read_failures: 0,
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let result = match self.transport.write(data).await {
            Ok(n) if n == data.len() => Ok(()),
            Ok(n) => Err(Error::Transport(format!(
                "short write: {n} of {} bytes",
                data.len()
            ))),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => self.write_failures = 0,
            Err(_) => self.write_failures += 1,
        }
        result
    }

    async fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let result = match self.transport.read(&mut buf).await {
            Ok(n) if n == len => Ok(buf),
            Ok(n) => Err(Error::Transport(format!("short read: {n} of {len} bytes"))),
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => self.read_failures = 0,
            Err(_) => self.read_failures += 1,
        }
        result
    }

    fn exhausted(&self) -> bool {
        self.write_failures > DEAD_THRESHOLD || self.read_failures > DEAD_THRESHOLD
    }

    pub(crate) fn reset_failures(&mut self) {
        self.write_failures = 0;
        self.read_failures = 0;
    }
}

// ---------------------------------------------------------------
// Raw exchanges
// ---------------------------------------------------------------

impl Shared {
    /// Write `request` and, if `reply_len` is given, read that many bytes,
    /// all under one hold of the bus lock.
    pub(crate) async fn exchange(&self, request: &[u8], reply_len: Option<usize>) -> Result<Vec<u8>> {
        let mut bus = self.bus.lock().await;
        if bus.exhausted() {
            return Err(Error::NotAlive);
        }
        let result = match bus.write(request).await {
            Ok(()) => match reply_len {
                Some(len) => bus.read(len).await,
                None => Ok(Vec::new()),
            },
            Err(e) => Err(e),
        };
        let dead = bus.exhausted();
        drop(bus);
        if dead {
            self.pronounce_dead();
        }
        result
    }

    pub(crate) async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        self.exchange(frame, None).await.map(|_| ())
    }

    /// RD_REPLY: read `len` reply bytes without submitting a command.
    pub(crate) async fn read_reply(&self, len: usize) -> Result<Vec<u8>> {
        self.exchange(&[RD_REPLY.id], Some(len)).await
    }

    /// Mark the device dead and release everything waiting on it.
    pub(crate) fn pronounce_dead(&self) {
        if self.mark_not_alive() {
            error!("too many bus failures, device is dead");
            self.emit(RadioEvent::Dead);
        }
    }

    pub(crate) async fn reset_bus_failures(&self) {
        self.bus.lock().await.reset_failures();
    }
}

// ---------------------------------------------------------------
// Commands
// ---------------------------------------------------------------

impl Session<'_> {
    /// Send one command and return its reply, status bytes included.
    ///
    /// Fails with [`Error::PoweredDown`] without touching the bus while the
    /// chip is powered down.
    pub async fn send_command(&mut self, cmd: &Command) -> Result<Vec<u8>> {
        if self.state.power_state == si468x_core::PowerState::PowerDown {
            return Err(Error::PoweredDown);
        }
        cmd.validate()?;

        let shared = self.shared;
        trace!(cmd = cmd.info.name, args = ?&cmd.args[..], "send");
        shared.write_frame(&cmd.frame()).await?;
        shared.cts.clear();

        let mut timed_out = false;
        if !shared.cts.wait_timeout(cmd.timeout.duration()).await {
            if !cmd.timeout.poll_only() {
                warn!(cmd = cmd.info.name, "no CTS interrupt, polling status");
            }
            if let Err(e) = shared.get_and_signal_status().await {
                debug!(cmd = cmd.info.name, "status poll failed: {e}");
            }
            timed_out = !shared.cts.is_set();
        }

        let mut reply = shared.read_reply(cmd.reply_len).await?;
        self.apply_chip_state(&reply);

        let status = Status::from_bytes(&reply);
        if status.err() {
            if reply.len() < ERROR_REPLY_LEN {
                reply = shared.read_reply(ERROR_REPLY_LEN).await?;
            }
            let chip = ChipError::from_code(reply.get(4).copied().unwrap_or(0));
            error!(cmd = cmd.info.name, code = chip.code(), "command failed: {chip}");
            status::log_error_flags(reply[3]);
            return Err(Error::Chip(chip));
        }
        if !status.cts() {
            return Err(if timed_out {
                Error::Timeout
            } else {
                Error::Chip(ChipError::Busy)
            });
        }
        Ok(reply)
    }

    fn apply_chip_state(&mut self, reply: &[u8]) {
        if let Some(state) = status::chip_state(reply) {
            if state != self.state.chip_state {
                debug!(from = ?self.state.chip_state, to = ?state, "chip state changed");
                self.state.chip_state = state;
                self.shared.emit(RadioEvent::ChipStateChanged(state));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use si468x_core::{ChipState, ErrorKind, Function};
    use si468x_test_harness::replies;

    use crate::commands::{cmd_get_part_info, cmd_get_sys_state, cmd_set_property};
    use crate::device::testing::*;
    use crate::models::Model;

    use super::*;

    #[tokio::test]
    async fn powered_down_never_touches_bus() {
        let t = make_test_radio(Model::Si4689);
        let mut session = t.radio.lock().await;
        let err = session.send_command(&cmd_get_sys_state()).await.unwrap_err();
        assert!(matches!(err, Error::PoweredDown));
        assert_eq!(t.mock.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_path_returns_reply_and_state() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Bootloader).await;
        let mut events = t.radio.subscribe();

        let mut reply = replies::app_ok(6);
        reply[4] = 2;
        t.mock.expect_command(&[0x09, 0x00], &reply);

        let mut session = t.radio.lock().await;
        let got = session.send_command(&cmd_get_sys_state()).await.unwrap();
        assert_eq!(got, reply);
        assert_eq!(session.chip_state(), ChipState::ApplicationRunning);
        assert_eq!(t.mock.read_lengths(), vec![2, 6]);
        assert_eq!(
            events.try_recv().unwrap(),
            RadioEvent::ChipStateChanged(ChipState::ApplicationRunning)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cts_does_not_satisfy_the_wait() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        t.radio.shared.cts.set();

        t.mock
            .expect_command(&cmd_set_property(0x0300, 10).frame(), &replies::app_ok(4));
        let mut session = t.radio.lock().await;
        session.send_command(&cmd_set_property(0x0300, 10)).await.unwrap();
        assert_eq!(t.mock.remaining_expectations(), 0);
        assert_eq!(t.mock.read_lengths(), vec![2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_error_is_retryable() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        t.mock.expect_command(&[0x09, 0x00], &replies::error(0x18, replies::APPLICATION));

        let mut session = t.radio.lock().await;
        let err = session.send_command(&cmd_get_sys_state()).await.unwrap_err();
        assert!(matches!(err, Error::Chip(ChipError::Busy)));
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[tokio::test(start_paused = true)]
    async fn short_error_reply_is_read_again() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let cmd = cmd_set_property(0x0300, 10);
        let error = replies::error(0x11, replies::APPLICATION);
        t.mock.expect_command(&cmd.frame(), &error);
        t.mock.expect(&[0x00], &error);

        let mut session = t.radio.lock().await;
        let err = session.send_command(&cmd).await.unwrap_err();
        assert!(matches!(err, Error::Chip(ChipError::BadArgument(1))));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(t.mock.read_lengths(), vec![2, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn error_reply_still_updates_chip_state() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        t.mock.expect_command(&[0x09, 0x00], &replies::error(0x01, replies::BOOTLOADER));

        let mut session = t.radio.lock().await;
        assert!(session.send_command(&cmd_get_sys_state()).await.is_err());
        assert_eq!(session.chip_state(), ChipState::BootloaderRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_cts_after_poll_times_out() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        t.mock
            .expect_command(&[0x08, 0x00], &replies::with_status(23, 0x00, replies::APPLICATION));

        let mut session = t.radio.lock().await;
        let err = session.send_command(&cmd_get_part_info()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_without_cts_after_interrupt_is_busy() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        // Poll says CTS, the reply itself does not.
        t.mock.expect_command_with_status(
            &[0x09, 0x00],
            &[0x80, 0x00],
            &replies::with_status(6, 0x00, replies::APPLICATION),
        );

        let mut session = t.radio.lock().await;
        let err = session.send_command(&cmd_get_sys_state()).await.unwrap_err();
        assert!(matches!(err, Error::Chip(ChipError::Busy)));
    }

    #[tokio::test]
    async fn bad_argument_count_rejected_before_bus() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let mut cmd = cmd_get_sys_state();
        cmd.args.extend_from_slice(&[1, 2]);

        let mut session = t.radio.lock().await;
        assert!(matches!(
            session.send_command(&cmd).await.unwrap_err(),
            Error::InvalidParameter(_)
        ));
        assert_eq!(t.mock.write_count(), 0);
    }

    #[tokio::test]
    async fn failure_storm_marks_device_dead() {
        let t = make_test_radio(Model::Si4689);
        force_running(&t.radio, Function::Fm).await;
        let mut events = t.radio.subscribe();
        t.mock.set_connected(false);

        let mut session = t.radio.lock().await;
        for _ in 0..DEAD_THRESHOLD {
            let err = session.send_command(&cmd_get_sys_state()).await.unwrap_err();
            assert!(matches!(err, Error::Transport(_)));
        }
        assert!(t.radio.is_alive());

        assert!(session.send_command(&cmd_get_sys_state()).await.is_err());
        assert!(!t.radio.is_alive());
        assert_eq!(events.try_recv().unwrap(), RadioEvent::Dead);

        let err = session.send_command(&cmd_get_sys_state()).await.unwrap_err();
        assert!(matches!(err, Error::NotAlive));
    }

    #[tokio::test]
    async fn dead_threshold_is_exclusive() {
        let mut bus = Bus::new(Box::new(si468x_test_harness::MockTransport::new()));
        bus.write_failures = DEAD_THRESHOLD;
        assert!(!bus.exhausted());
        bus.write_failures += 1;
        assert!(bus.exhausted());
        bus.reset_failures();
        assert!(!bus.exhausted());
    }
}
