//! Message types exchanged between the trigger monitor and its collaborators.
//!
//! # Channel Types
//!
//! - **broadcast** ([`EventBus`]): core → observers. Carries the two outbound
//!   notifications: connection status changes and temperature log updates.
//!   Observers that lag simply miss old events; the core never blocks on them.
//! - **mpsc** ([`MonitorCommand`]): application → monitor task. Commands are
//!   processed between ticks, so they never interleave with a tick's PLC traffic.
//! - **oneshot**: per-command response, embedded in each command variant.
//!
//! ```rust
//! use fins_daq::messages::{MonitorCommand, TableSlot};
//! use fins_daq::data::{Area, ParamTable};
//!
//! let (cmd, rx) = MonitorCommand::restore_table(TableSlot::previous(Area::Normal), ParamTable::zeros());
//! // cmd_tx.send(cmd).await?;
//! // let written = rx.await?;
//! ```

use crate::data::{Area, ParamTable, RowSet};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};

/// Default capacity of the event bus ring buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Notifications published by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DaqEvent {
    /// The connector's connectivity flag after a connect attempt or disconnect.
    ConnectionStatusChanged(bool),
    /// Raw CSV rows (header included) of the most recent normal and high
    /// sessions for the released job. A missing area is an empty row set.
    TemperatureLogUpdated {
        /// Normal-area session rows
        normal: RowSet,
        /// High-area session rows
        high: RowSet,
    },
}

/// Broadcast fan-out for [`DaqEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DaqEvent>,
}

impl EventBus {
    /// Create a bus holding up to `capacity` undelivered events per observer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<DaqEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no observers is not an error.
    pub fn publish(&self, event: DaqEvent) {
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(receivers, "Event published"),
            Err(_) => tracing::trace!("Event dropped: no subscribers"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Which cached table a restore targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableGeneration {
    /// Snapshot read from the controller when the parameter trigger armed
    Previous,
    /// Table computed at the last release
    New,
}

/// One of the four parameter-table slots held by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSlot {
    /// Previous or new table
    pub generation: TableGeneration,
    /// Temperature area the table belongs to
    pub area: Area,
}

impl TableSlot {
    /// Slot of the table captured when the trigger armed.
    pub fn previous(area: Area) -> Self {
        Self {
            generation: TableGeneration::Previous,
            area,
        }
    }

    /// Slot of the table computed at the last release.
    pub fn new_table(area: Area) -> Self {
        Self {
            generation: TableGeneration::New,
            area,
        }
    }
}

/// Commands accepted by the running monitor task.
#[derive(Debug)]
pub enum MonitorCommand {
    /// Store `table` in `slot` and write it to that area's controller addresses.
    ///
    /// # Response
    ///
    /// `true` if every cell write received a reply.
    RestoreTable {
        /// Cached slot to overwrite
        slot: TableSlot,
        /// Values to store and write
        table: ParamTable,
        /// Completion channel
        response: oneshot::Sender<bool>,
    },
}

impl MonitorCommand {
    /// Build a restore command and the receiver for its result.
    pub fn restore_table(slot: TableSlot, table: ParamTable) -> (Self, oneshot::Receiver<bool>) {
        let (response, rx) = oneshot::channel();
        (
            Self::RestoreTable {
                slot,
                table,
                response,
            },
            rx,
        )
    }
}
