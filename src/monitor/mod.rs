//! Trigger monitor: the polling state machine.
//!
//! Each [`tick`](TriggerMonitor::tick) reads the heartbeat bit, then evaluates
//! two independent trigger lines:
//!
//! ```text
//! Parameter trigger            Temperature trigger (trigger, normal, high)
//! -----------------            -------------------------------------------
//! IDLE --rise--> ARMED         IDLE --(1,1,x)--> LOGGING_NORMAL   open + row
//!   snapshot both tables       IDLE --(1,0,1)--> LOGGING_HIGH     open + row
//! ARMED --fall--> IDLE         LOGGING_A --same area--> LOGGING_A  row
//!   tune, merge, write back    LOGGING_A --other area--> LOGGING_B close, open + row
//!   publish latest row sets    LOGGING_* --otherwise--> IDLE       close
//! ```
//!
//! Only edges cause side effects. A failed trigger read leaves that line's
//! state unchanged for the tick. Failed data reads degrade to zeros, and
//! storage faults force the temperature line back to IDLE, so a tick always
//! completes.
//!
//! The monitor owns all mutable state (open session, cached tables) and is
//! driven by a single task (see [`runner`]), which is what makes the
//! connector's read-modify-write bit operations safe.

pub mod runner;

pub use runner::MonitorHandle;

use crate::config::AddressMap;
use crate::data::temperature_log::{self, LogSession, RowSet, TemperatureRow};
use crate::data::tuning::{self, ParamTable, TuningResult, ZONES};
use crate::data::Area;
use crate::hardware::fins::frame::{decode_signed, encode_signed};
use crate::hardware::PlcConnector;
use crate::messages::{DaqEvent, MonitorCommand, TableGeneration, TableSlot};
use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Parameter trigger line state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ParamTriggerState {
    /// Waiting for a rising edge
    #[default]
    Idle,
    /// Tables captured, waiting for the falling edge
    Armed,
}

/// Temperature trigger line state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum TemperatureState {
    /// No session open
    #[default]
    Idle,
    /// Appending rows to a session for this area
    Logging(Area),
}

/// One value per temperature area.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AreaPair<T> {
    /// Normal area value
    pub normal: T,
    /// High area value
    pub high: T,
}

impl<T> AreaPair<T> {
    /// Value for `area`.
    pub fn get(&self, area: Area) -> &T {
        match area {
            Area::Normal => &self.normal,
            Area::High => &self.high,
        }
    }

    /// Mutable value for `area`.
    pub fn get_mut(&mut self, area: Area) -> &mut T {
        match area {
            Area::Normal => &mut self.normal,
            Area::High => &mut self.high,
        }
    }
}

/// Read-only view of the monitor published after every tick and command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    /// Parameter trigger rising edges seen
    pub trigger_count: u64,
    /// Successful heartbeat reads
    pub heartbeat_count: u64,
    /// Parameter trigger line state
    pub param_state: ParamTriggerState,
    /// Temperature trigger line state
    pub temperature_state: TemperatureState,
    /// File of the open session, if any
    pub session_path: Option<PathBuf>,
    /// Data rows in the open session
    pub session_rows: usize,
    /// Tables read when the trigger last armed
    pub previous_tables: AreaPair<ParamTable>,
    /// Tables computed at the last release
    pub new_tables: AreaPair<ParamTable>,
    /// Tuning output behind `new_tables`
    pub last_results: AreaPair<Option<TuningResult>>,
}

/// Select the logging area from the three temperature bits.
///
/// Normal wins when both area bits are set. A raised trigger with no area bit
/// selects nothing.
pub fn select_area(trigger: bool, normal: bool, high: bool) -> Option<Area> {
    match (trigger, normal, high) {
        (true, true, _) => Some(Area::Normal),
        (true, false, true) => Some(Area::High),
        _ => None,
    }
}

/// The acquisition state machine.
pub struct TriggerMonitor {
    connector: Arc<PlcConnector>,
    addresses: AddressMap,
    log_dir: PathBuf,
    param_state: ParamTriggerState,
    temperature_state: TemperatureState,
    session: Option<LogSession>,
    trigger_count: u64,
    heartbeat_count: u64,
    previous_tables: AreaPair<ParamTable>,
    new_tables: AreaPair<ParamTable>,
    last_results: AreaPair<Option<TuningResult>>,
    latest_rows: AreaPair<RowSet>,
}

impl TriggerMonitor {
    /// Monitor writing sessions under `log_dir`, both lines idle.
    pub fn new(connector: Arc<PlcConnector>, addresses: AddressMap, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            connector,
            addresses,
            log_dir: log_dir.into(),
            param_state: ParamTriggerState::Idle,
            temperature_state: TemperatureState::Idle,
            session: None,
            trigger_count: 0,
            heartbeat_count: 0,
            previous_tables: AreaPair::default(),
            new_tables: AreaPair::default(),
            last_results: AreaPair::default(),
            latest_rows: AreaPair::default(),
        }
    }

    /// Parameter trigger line state.
    pub fn param_state(&self) -> ParamTriggerState {
        self.param_state
    }

    /// Temperature trigger line state.
    pub fn temperature_state(&self) -> TemperatureState {
        self.temperature_state
    }

    /// Parameter trigger rising edges seen.
    pub fn trigger_count(&self) -> u64 {
        self.trigger_count
    }

    /// Current read-only view.
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            trigger_count: self.trigger_count,
            heartbeat_count: self.heartbeat_count,
            param_state: self.param_state,
            temperature_state: self.temperature_state,
            session_path: self.session.as_ref().map(|s| s.path().to_path_buf()),
            session_rows: self.session.as_ref().map_or(0, LogSession::rows_written),
            previous_tables: self.previous_tables.clone(),
            new_tables: self.new_tables.clone(),
            last_results: self.last_results.clone(),
        }
    }

    /// Run one polling cycle.
    pub async fn tick(&mut self) {
        self.check_heartbeat().await;
        self.check_param_trigger().await;
        self.check_temperature_trigger().await;
    }

    /// Process one command from the application.
    pub async fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::RestoreTable {
                slot,
                table,
                response,
            } => {
                let written = self.restore_table(slot, table).await;
                if response.send(written).is_err() {
                    tracing::debug!("Restore requester went away before the reply");
                }
            }
        }
    }

    /// Close any open session. Called when monitoring stops.
    pub fn shutdown(&mut self) {
        if self.session.is_some() {
            self.close_session();
        }
    }

    async fn check_heartbeat(&mut self) {
        match self.connector.read_heartbeat_bit().await {
            Some(_) => {
                self.heartbeat_count += 1;
                tracing::trace!(count = self.heartbeat_count, "Heartbeat");
            }
            None => tracing::warn!("Heartbeat read failed"),
        }
    }

    // ---- parameter trigger -------------------------------------------------

    async fn check_param_trigger(&mut self) {
        let addr = self.addresses.param_trigger;
        let Some(on) = self
            .connector
            .read_trigger_bit(addr.area, addr.word, addr.bit)
            .await
        else {
            tracing::warn!(address = %addr, "Parameter trigger unreadable, state unchanged");
            return;
        };

        match (self.param_state, on) {
            (ParamTriggerState::Idle, true) => {
                self.param_state = ParamTriggerState::Armed;
                self.on_param_armed().await;
            }
            (ParamTriggerState::Armed, false) => {
                self.param_state = ParamTriggerState::Idle;
                self.on_param_released().await;
            }
            _ => {}
        }
    }

    async fn on_param_armed(&mut self) {
        self.trigger_count += 1;
        tracing::info!(count = self.trigger_count, "Parameter trigger detected");

        for area in Area::ALL {
            let table = self.read_table(area).await;
            tracing::debug!(%area, table = ?table.flatten(), "Previous parameter table");
            *self.previous_tables.get_mut(area) = table;
        }
    }

    async fn on_param_released(&mut self) {
        let job = self.addresses.job_info;
        let Some(info) = self.connector.read_word(job.area, job.word, 2).await else {
            tracing::warn!("Job info unreadable at release, tuning skipped");
            return;
        };
        let tube = info.first().copied().unwrap_or(0);
        let job_id = info.get(1).copied().unwrap_or(0);
        tracing::info!(tube, job = job_id, "Parameter trigger released");

        let mut found_any = false;
        for area in Area::ALL {
            let latest = match temperature_log::load_latest(&self.log_dir, tube, job_id, area) {
                Ok(latest) => latest,
                Err(e) => {
                    tracing::error!(%area, error = %e, "Failed to load temperature log");
                    None
                }
            };

            let Some((path, rows)) = latest else {
                tracing::info!(tube, job = job_id, %area, "No temperature log for this job");
                self.latest_rows.get_mut(area).clear();
                continue;
            };
            found_any = true;
            tracing::info!(%area, path = %path.display(), rows = rows.len(), "Tuning from latest log");

            let result = tuning::calculate(&rows);
            let merged = ParamTable::merge(self.previous_tables.get(area), &result);
            tracing::info!(
                %area,
                replaced = self.previous_tables.get(area).is_all_zero(),
                table = ?merged.flatten(),
                "New parameter table"
            );

            *self.new_tables.get_mut(area) = merged;
            *self.last_results.get_mut(area) = Some(result);
            *self.latest_rows.get_mut(area) = rows;
            self.write_table(area, &merged).await;
        }

        if found_any {
            self.connector.events().publish(DaqEvent::TemperatureLogUpdated {
                normal: self.latest_rows.normal.clone(),
                high: self.latest_rows.high.clone(),
            });
        }
    }

    async fn read_table(&self, area: Area) -> ParamTable {
        let grid = *self.addresses.table(area);
        let mut table = ParamTable::zeros();
        for row in 0..2 {
            for zone in 0..ZONES {
                let Some(word) = grid.word(row, zone) else {
                    tracing::warn!(%area, row, zone, "Parameter cell address out of range, using 0");
                    continue;
                };
                table.0[row][zone] = match self.connector.read_signed_word(grid.area, word).await {
                    Some(v) => v,
                    None => {
                        tracing::warn!(%area, row, zone, word, "Parameter cell unreadable, using 0");
                        0
                    }
                };
            }
        }
        table
    }

    /// Write a table cell by cell in row-major, zone-ascending order.
    ///
    /// Every cell is attempted; returns `true` only if all writes got a reply.
    async fn write_table(&self, area: Area, table: &ParamTable) -> bool {
        let grid = *self.addresses.table(area);
        let mut failed = 0usize;
        for (row, zone, value) in table.cells() {
            let Some(word) = grid.word(row, zone) else {
                tracing::error!(%area, row, zone, "Parameter cell address out of range, not written");
                failed += 1;
                continue;
            };
            if !self
                .connector
                .write_word(grid.area, word, encode_signed(value))
                .await
            {
                failed += 1;
            }
        }
        if failed == 0 {
            tracing::info!(%area, "Parameter table written");
        } else {
            tracing::warn!(%area, failed, "Parameter table partially written");
        }
        failed == 0
    }

    async fn restore_table(&mut self, slot: TableSlot, table: ParamTable) -> bool {
        tracing::info!(?slot, table = ?table.flatten(), "Restoring parameter table");
        match slot.generation {
            TableGeneration::Previous => *self.previous_tables.get_mut(slot.area) = table,
            TableGeneration::New => *self.new_tables.get_mut(slot.area) = table,
        }
        self.write_table(slot.area, &table).await
    }

    // ---- temperature trigger -----------------------------------------------

    async fn check_temperature_trigger(&mut self) {
        let (t, n, h) = (
            self.addresses.temp_trigger,
            self.addresses.area_normal,
            self.addresses.area_high,
        );
        let trigger = self.connector.read_trigger_bit(t.area, t.word, t.bit).await;
        let normal = self.connector.read_trigger_bit(n.area, n.word, n.bit).await;
        let high = self.connector.read_trigger_bit(h.area, h.word, h.bit).await;

        let (Some(trigger), Some(normal), Some(high)) = (trigger, normal, high) else {
            tracing::warn!("Temperature trigger unreadable, state unchanged");
            return;
        };

        match (self.temperature_state, select_area(trigger, normal, high)) {
            (TemperatureState::Idle, None) => {}
            (TemperatureState::Idle, Some(area)) => {
                if self.open_session(area).await {
                    self.append_row().await;
                }
            }
            (TemperatureState::Logging(current), Some(area)) if current == area => {
                self.append_row().await;
            }
            (TemperatureState::Logging(current), Some(area)) => {
                tracing::info!(from = %current, to = %area, "Temperature area changed");
                self.close_session();
                if self.open_session(area).await {
                    self.append_row().await;
                }
            }
            (TemperatureState::Logging(_), None) => self.close_session(),
        }
    }

    async fn open_session(&mut self, area: Area) -> bool {
        let (tube, job) = self.read_job_info().await;
        match LogSession::create(&self.log_dir, tube, job, area, Local::now()) {
            Ok(session) => {
                self.session = Some(session);
                self.temperature_state = TemperatureState::Logging(area);
                true
            }
            Err(e) => {
                tracing::error!(%area, error = %e, "Failed to open temperature log");
                self.session = None;
                self.temperature_state = TemperatureState::Idle;
                false
            }
        }
    }

    async fn append_row(&mut self) {
        let row = self.sample_row().await;
        let Some(session) = self.session.as_mut() else {
            tracing::warn!("No open temperature log, row dropped");
            self.temperature_state = TemperatureState::Idle;
            return;
        };
        if let Err(e) = session.append(&row) {
            tracing::error!(error = %e, "Temperature row append failed, ending session");
            self.close_session();
        }
    }

    /// Close the open session exactly once and return to IDLE.
    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close() {
                tracing::error!(path = %session.path().display(), error = %e, "Failed to close temperature log");
            }
        }
        self.temperature_state = TemperatureState::Idle;
    }

    async fn read_job_info(&self) -> (u16, u16) {
        let job = self.addresses.job_info;
        let info = self.connector.read_block(job.area, job.word, 2).await;
        (info[0], info[1])
    }

    async fn read_channel(&self, tube: u16, channel: u16) -> [i32; ZONES] {
        let block = self.addresses.process;
        let mut values = [0; ZONES];
        let Some(word) = block.channel_word(tube, channel) else {
            tracing::warn!(tube, channel, "Process block address out of range, using zeros");
            return values;
        };
        let raw = self.connector.read_block(block.area, word, ZONES as u16).await;
        for (slot, w) in values.iter_mut().zip(raw) {
            *slot = decode_signed(w);
        }
        values
    }

    async fn sample_row(&self) -> TemperatureRow {
        let (tube, job) = self.read_job_info().await;
        let ptc = self.read_channel(tube, 0).await;
        let ctc = self.read_channel(tube, 1).await;
        let sp = self.read_channel(tube, 2).await;
        let mv = self.read_channel(tube, 3).await;
        TemperatureRow::from_signed(Local::now().naive_local(), tube, job, ptc, ctc, sp, mv)
    }
}
