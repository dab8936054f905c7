//! Asynchronous radio event types.
//!
//! Events are emitted by the driver through a `tokio::sync::broadcast`
//! channel whenever chip or receiver state changes. Delivery is best-effort:
//! a slow subscriber may miss events.

use crate::types::{ChipState, Function, PowerState};

/// An event emitted by the driver core.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// Host-side power state changed.
    PowerStateChanged(PowerState),

    /// A reply reported a different firmware lifecycle state.
    ChipStateChanged(ChipState),

    /// A receiver function finished booting.
    FunctionSelected(Function),

    /// A tune or seek completed.
    TuneComplete,

    /// New RDS blocks were appended to the host buffer.
    RdsReceived {
        /// Number of RDS groups drained in this pass.
        groups: usize,
    },

    /// A DAB service list was parsed for one frequency index.
    ServiceListUpdated {
        /// Index into the loaded frequency list.
        index: u8,
        /// Audio components now recorded for that index.
        entries: usize,
    },

    /// A full DAB ensemble scan ended.
    ScanComplete {
        /// Directory entries found across all frequencies.
        entries: usize,
    },

    /// A DAB service was started.
    ServiceStarted {
        service_id: u32,
        component_id: u32,
    },

    /// New DAB dynamic label text.
    DynamicLabel(String),

    /// The device was declared dead.
    Dead,
}
