//! The device handle, its shared state and the exclusive command session.
//!
//! [`Si468x`] owns one chip. Everything that talks to the chip goes through a
//! [`Session`], obtained with [`Si468x::lock`]; holding a session is holding
//! the device lock, so command traffic from callers and from the background
//! workers never interleaves on the bus.
//!
//! The bus itself sits behind its own, shorter-lived lock. The interrupt
//! dispatcher only needs that one, which lets it read the chip status while
//! a session waits for clear-to-send.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use si468x_core::{
    ChipState, ClockMode, FirmwareSource, Function, NvmState, Platform, PowerState, RadioEvent,
    Transport,
};

use crate::commands::{trim_size, PowerUpArgs, TRIM_UNSET};
use crate::dab::{Channel, DabState};
use crate::engine::Bus;
use crate::models::Model;
use crate::properties::PropertyCache;
use crate::rds::RdsBuffer;
use crate::tune::BandOps;
use crate::{rds, services};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------
// Completion flags
// ---------------------------------------------------------------

/// A level-triggered completion flag paired with a wakeup.
///
/// The dispatcher is the only writer of `set`; the engine clears the flag
/// right after submitting a command and then waits on it.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    flag: AtomicBool,
    notify: Notify,
}

impl Completion {
    pub(crate) fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wait until the flag is set.
    pub(crate) async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a set() in between is not lost.
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Wait at most `limit`. Returns `true` if the flag was set.
    pub(crate) async fn wait_timeout(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait()).await.is_ok()
    }
}

// ---------------------------------------------------------------
// Configuration and per-device state
// ---------------------------------------------------------------

/// Board and firmware configuration, fixed at build time.
#[derive(Debug, Clone)]
pub(crate) struct DeviceConfig {
    pub power_up: PowerUpArgs,
    /// Function booted by the next power-up.
    pub function: Function,
    /// Flash base address per image name (`flash-<name>`).
    pub flash_addresses: HashMap<String, u32>,
    /// Firmware blob name per image name (`firmware-<name>`).
    pub firmware_names: HashMap<String, String>,
    pub rds_fifo_count: u16,
    /// How long a DAB ensemble scan waits on one frequency.
    pub scan_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let clk_frequency = 19_200_000;
        DeviceConfig {
            power_up: PowerUpArgs {
                clock_mode: ClockMode::Crystal,
                tr_size: trim_size(clk_frequency).unwrap_or(TRIM_UNSET),
                ibias: 0,
                clk_frequency,
                xcload: 0,
            },
            function: Function::Fm,
            flash_addresses: HashMap::new(),
            firmware_names: HashMap::new(),
            rds_fifo_count: 20,
            scan_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything guarded by the device lock.
pub(crate) struct DeviceState {
    pub power_state: PowerState,
    pub chip_state: ChipState,
    pub nvm_state: NvmState,
    pub function: Function,
    pub config: DeviceConfig,
    pub props: PropertyCache,
    /// Operation set of the running receiver; `None` outside receiver mode.
    pub ops: Option<BandOps>,
    pub dab: DabState,
}

impl DeviceState {
    fn new(config: DeviceConfig) -> Self {
        DeviceState {
            power_state: PowerState::PowerDown,
            chip_state: ChipState::AwaitingPowerUp,
            nvm_state: NvmState::Uninitialized,
            function: config.function,
            config,
            props: PropertyCache::default(),
            ops: None,
            dab: DabState::default(),
        }
    }
}

// ---------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------

/// State shared between the handle, sessions, the dispatcher and the
/// background workers.
pub(crate) struct Shared {
    pub(crate) model: Model,
    pub(crate) bus: Mutex<Bus>,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) firmware: Arc<dyn FirmwareSource>,
    alive: AtomicBool,
    irq_enabled: AtomicBool,
    /// Clear-to-send.
    pub(crate) cts: Completion,
    /// Seek/tune complete.
    pub(crate) stc: Completion,
    pub(crate) rds: RdsBuffer,
    pub(crate) rds_running: StdMutex<bool>,
    pub(crate) service_data_running: StdMutex<bool>,
    pub(crate) rds_wake: Notify,
    pub(crate) service_list_wake: Notify,
    pub(crate) service_data_wake: Notify,
    scan_deadline: StdMutex<Option<Instant>>,
    pub(crate) scan_rearm: Notify,
    pub(crate) label: StdMutex<String>,
    event_tx: broadcast::Sender<RadioEvent>,
    pub(crate) shutdown: CancellationToken,
}

impl Shared {
    fn new(
        model: Model,
        config: DeviceConfig,
        transport: Box<dyn Transport>,
        platform: Arc<dyn Platform>,
        firmware: Arc<dyn FirmwareSource>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Shared {
            model,
            bus: Mutex::new(Bus::new(transport)),
            state: Mutex::new(DeviceState::new(config)),
            platform,
            firmware,
            alive: AtomicBool::new(false),
            irq_enabled: AtomicBool::new(false),
            cts: Completion::default(),
            stc: Completion::default(),
            rds: RdsBuffer::default(),
            rds_running: StdMutex::new(false),
            service_data_running: StdMutex::new(false),
            rds_wake: Notify::new(),
            service_list_wake: Notify::new(),
            service_data_wake: Notify::new(),
            scan_deadline: StdMutex::new(None),
            scan_rearm: Notify::new(),
            label: StdMutex::new(String::new()),
            event_tx,
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn emit(&self, event: RadioEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn set_alive(&self, alive: bool) {
        if alive {
            self.alive.store(true, Ordering::SeqCst);
        } else {
            self.mark_not_alive();
        }
    }

    /// Clear the alive flag and release every waiter: blocked RDS readers
    /// and anything parked on CTS or STC. Returns the previous value.
    pub(crate) fn mark_not_alive(&self) -> bool {
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        self.rds.wake_readers();
        self.cts.set();
        self.stc.set();
        was_alive
    }

    pub(crate) fn irq_enabled(&self) -> bool {
        self.irq_enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_irq_enabled(&self, enabled: bool) {
        self.irq_enabled.store(enabled, Ordering::SeqCst);
        self.platform.set_irq_enabled(enabled);
    }

    /// Test-and-set a worker's running flag.
    pub(crate) fn try_claim(flag: &StdMutex<bool>) -> bool {
        let mut running = flag.lock().unwrap_or_else(PoisonError::into_inner);
        if *running {
            return false;
        }
        *running = true;
        true
    }

    pub(crate) fn scan_deadline(&self) -> Option<Instant> {
        *self
            .scan_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start (or restart) the per-frequency scan watchdog.
    pub(crate) fn arm_scan_deadline(&self, limit: Duration) {
        *self
            .scan_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now() + limit);
        self.scan_rearm.notify_one();
    }

    pub(crate) fn clear_scan_deadline(&self) {
        *self
            .scan_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Clears a worker's running flag when the run ends, however it ends.
pub(crate) struct ClaimGuard<'a>(&'a StdMutex<bool>);

impl<'a> ClaimGuard<'a> {
    pub(crate) fn new(flag: &'a StdMutex<bool>) -> Self {
        ClaimGuard(flag)
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

// ---------------------------------------------------------------
// Device handle
// ---------------------------------------------------------------

/// One Si468x chip.
///
/// Created by [`Si468xBuilder`](crate::builder::Si468xBuilder). Dropping the
/// handle stops the background workers.
pub struct Si468x {
    pub(crate) shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Si468x {
    pub(crate) fn new(
        model: Model,
        config: DeviceConfig,
        transport: Box<dyn Transport>,
        platform: Arc<dyn Platform>,
        firmware: Arc<dyn FirmwareSource>,
    ) -> Self {
        let shared = Arc::new(Shared::new(model, config, transport, platform, firmware));
        let workers = vec![
            tokio::spawn(rds::drain_worker(Arc::clone(&shared))),
            tokio::spawn(services::service_list_worker(Arc::clone(&shared))),
            tokio::spawn(services::service_data_worker(Arc::clone(&shared))),
        ];
        debug!(model = %model, "device attached");
        Si468x { shared, workers }
    }

    /// Take the device lock.
    pub async fn lock(&self) -> Session<'_> {
        Session::acquire(&self.shared).await
    }

    pub fn model(&self) -> Model {
        self.shared.model
    }

    /// Whether this part can run `function`.
    pub fn supports(&self, function: Function) -> bool {
        self.shared.model.supports(function)
    }

    pub fn has_am(&self) -> bool {
        self.shared.model.has_am()
    }

    pub fn has_hd(&self) -> bool {
        self.shared.model.has_hd()
    }

    pub fn has_dab(&self) -> bool {
        self.shared.model.has_dab()
    }

    /// `false` after an I/O failure storm or while the chip is stopped.
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Subscribe to driver events.
    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Snapshot of the DAB channel directory.
    pub async fn channels(&self) -> Vec<Channel> {
        self.lock().await.channels().to_vec()
    }
}

impl Drop for Si468x {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.mark_not_alive();
        for worker in &self.workers {
            worker.abort();
        }
    }
}

// ---------------------------------------------------------------
// Session
// ---------------------------------------------------------------

/// Exclusive access to the chip. All command traffic goes through here.
pub struct Session<'a> {
    pub(crate) shared: &'a Shared,
    pub(crate) state: MutexGuard<'a, DeviceState>,
}

impl<'a> Session<'a> {
    pub(crate) async fn acquire(shared: &'a Shared) -> Session<'a> {
        let state = shared.state.lock().await;
        Session { shared, state }
    }

    pub fn power_state(&self) -> PowerState {
        self.state.power_state
    }

    pub fn chip_state(&self) -> ChipState {
        self.state.chip_state
    }

    pub fn nvm_state(&self) -> NvmState {
        self.state.nvm_state
    }

    /// The function the chip runs, or boots on the next power-up.
    pub fn function(&self) -> Function {
        self.state.function
    }

    pub fn model(&self) -> Model {
        self.shared.model
    }

    /// The DAB channel directory.
    pub fn channels(&self) -> &[Channel] {
        &self.state.dab.channels
    }
}
