//! Scheduler for the trigger monitor.
//!
//! One tokio task owns the [`TriggerMonitor`] and multiplexes three inputs in
//! a `select!` loop:
//!
//! - the tick interval (missed ticks are skipped, never queued)
//! - [`MonitorCommand`]s from the application
//! - a shutdown signal
//!
//! Because a tick is awaited to completion inside the loop, ticks never
//! overlap each other or a command. Stopping does not abort an in-flight
//! request; the current tick finishes (or times out) first.

use super::{MonitorSnapshot, TriggerMonitor};
use crate::data::ParamTable;
use crate::error::{AppResult, DaqError};
use crate::messages::{MonitorCommand, TableSlot};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Command channel capacity.
const COMMAND_CAPACITY: usize = 32;

/// Handle to a running monitor task.
pub struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
    snapshots: watch::Receiver<MonitorSnapshot>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<TriggerMonitor>,
}

impl MonitorHandle {
    /// Start polling `monitor` every `tick`.
    pub fn spawn(monitor: TriggerMonitor, tick: Duration) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot_tx, snapshots) = watch::channel(monitor.snapshot());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(monitor, tick, command_rx, snapshot_tx, shutdown_rx));

        Self {
            commands,
            snapshots,
            shutdown,
            task,
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified after every tick and command.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshots.clone()
    }

    /// Restore a parameter table through the monitor task.
    ///
    /// Returns whether every cell write got a reply.
    pub async fn restore(&self, slot: TableSlot, table: ParamTable) -> AppResult<bool> {
        let (cmd, rx) = MonitorCommand::restore_table(slot, table);
        self.commands
            .send(cmd)
            .await
            .map_err(|_| DaqError::MonitorStopped)?;
        rx.await.map_err(|_| DaqError::MonitorStopped)
    }

    /// Stop scheduling ticks and wait for the task to finish.
    ///
    /// Returns the monitor so callers can inspect its final state.
    pub async fn stop(self) -> AppResult<TriggerMonitor> {
        // A send error means the task already exited; join it anyway.
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "Monitor task failed");
            DaqError::MonitorStopped
        })
    }
}

async fn run(
    mut monitor: TriggerMonitor,
    tick: Duration,
    mut commands: mpsc::Receiver<MonitorCommand>,
    snapshots: watch::Sender<MonitorSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) -> TriggerMonitor {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(tick_ms = tick.as_millis() as u64, "Trigger monitoring started");

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(command) = commands.recv() => {
                monitor.handle_command(command).await;
                snapshots.send_replace(monitor.snapshot());
            }
            _ = ticker.tick() => {
                monitor.tick().await;
                snapshots.send_replace(monitor.snapshot());
            }
        }
    }

    monitor.shutdown();
    snapshots.send_replace(monitor.snapshot());
    tracing::info!("Trigger monitoring stopped");
    monitor
}
