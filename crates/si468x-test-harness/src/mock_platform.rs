//! Recording [`Platform`] and in-memory [`FirmwareSource`] implementations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use si468x_core::error::{Error, Result};
use si468x_core::transport::{FirmwareSource, Platform};

/// One observable action taken on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Reset line driven; `true` holds the chip in reset.
    Reset(bool),
    /// Interrupt delivery gated on or off.
    Irq(bool),
    SuppliesOn,
    SuppliesOff,
}

#[derive(Debug, Default)]
struct PlatformInner {
    events: Vec<PlatformEvent>,
    fail_enable: bool,
    fail_disable: bool,
}

/// A [`Platform`] that records every transition in order.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    inner: Arc<Mutex<PlatformInner>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PlatformInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything that happened, oldest first.
    pub fn events(&self) -> Vec<PlatformEvent> {
        self.lock().events.clone()
    }

    /// Make `enable_supplies()` fail.
    pub fn fail_enable_supplies(&self, fail: bool) {
        self.lock().fail_enable = fail;
    }

    /// Make `disable_supplies()` fail.
    pub fn fail_disable_supplies(&self, fail: bool) {
        self.lock().fail_disable = fail;
    }

    /// The most recent interrupt gating, if any.
    pub fn irq_enabled(&self) -> Option<bool> {
        self.lock().events.iter().rev().find_map(|e| match e {
            PlatformEvent::Irq(on) => Some(*on),
            _ => None,
        })
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn set_reset(&self, asserted: bool) {
        self.lock().events.push(PlatformEvent::Reset(asserted));
    }

    fn set_irq_enabled(&self, enabled: bool) {
        self.lock().events.push(PlatformEvent::Irq(enabled));
    }

    async fn enable_supplies(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_enable {
            return Err(Error::Transport("regulator enable failed".into()));
        }
        inner.events.push(PlatformEvent::SuppliesOn);
        Ok(())
    }

    async fn disable_supplies(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_disable {
            return Err(Error::Transport("regulator disable failed".into()));
        }
        inner.events.push(PlatformEvent::SuppliesOff);
        Ok(())
    }
}

/// Firmware images held in memory, keyed by blob name.
#[derive(Debug, Clone, Default)]
pub struct MemoryFirmware {
    images: HashMap<String, Vec<u8>>,
}

impl MemoryFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image under `name`.
    pub fn with_image(mut self, name: &str, data: &[u8]) -> Self {
        self.images.insert(name.to_string(), data.to_vec());
        self
    }
}

#[async_trait]
impl FirmwareSource for MemoryFirmware {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        self.images
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InvalidParameter(format!("firmware '{name}' not found")))
    }
}
