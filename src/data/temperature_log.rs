//! Per-session temperature CSV logs.
//!
//! One file per logging session, named
//! `temperature_T{tube}_{job}_{area}_{YYYYmmdd_HHMMSS}.csv`, with a fixed
//! header followed by one row per monitor tick. Rows are flushed as soon as
//! they are written so a crash loses at most the row in flight.
//!
//! The tuning step later looks up the most recent session for a
//! (tube, job, area) triple and loads its raw rows.

use crate::data::tuning::ZONES;
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Raw CSV rows, header included.
pub type RowSet = Vec<Vec<String>>;

/// Column names of every session file.
pub const HEADER: [&str; 3 + 4 * ZONES] = [
    "time", "tube", "job",
    "PTC1", "PTC2", "PTC3", "PTC4", "PTC5", "PTC6", "PTC7", "PTC8",
    "CTC1", "CTC2", "CTC3", "CTC4", "CTC5", "CTC6", "CTC7", "CTC8",
    "SP1", "SP2", "SP3", "SP4", "SP5", "SP6", "SP7", "SP8",
    "MV1", "MV2", "MV3", "MV4", "MV5", "MV6", "MV7", "MV8",
];

const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Temperature area selected by the controller while logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    /// Normal temperature range
    Normal,
    /// High temperature range
    High,
}

impl Area {
    /// Both areas, normal first.
    pub const ALL: [Area; 2] = [Area::Normal, Area::High];

    /// Lowercase name used in file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Area::Normal => "normal",
            Area::High => "high",
        }
    }
}

impl std::fmt::Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sampled row: job identity plus 8 zones of four channels.
///
/// PTC, CTC and SP are stored in engineering units (raw / 10); MV is raw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureRow {
    /// Local sample time
    pub timestamp: NaiveDateTime,
    /// Tube id from the job info words
    pub tube: u16,
    /// Job id from the job info words
    pub job: u16,
    /// Process temperature per zone
    pub ptc: [f64; ZONES],
    /// Controller temperature per zone
    pub ctc: [f64; ZONES],
    /// Setpoint per zone
    pub sp: [f64; ZONES],
    /// Manipulated value per zone
    pub mv: [i32; ZONES],
}

impl TemperatureRow {
    /// Build a row from signed controller words.
    pub fn from_signed(
        timestamp: NaiveDateTime,
        tube: u16,
        job: u16,
        ptc: [i32; ZONES],
        ctc: [i32; ZONES],
        sp: [i32; ZONES],
        mv: [i32; ZONES],
    ) -> Self {
        let scale = |raw: [i32; ZONES]| raw.map(|v| f64::from(v) / 10.0);
        Self {
            timestamp,
            tube,
            job,
            ptc: scale(ptc),
            ctc: scale(ctc),
            sp: scale(sp),
            mv,
        }
    }

    /// CSV fields in header order.
    pub fn to_record(&self) -> Vec<String> {
        let mut record = Vec::with_capacity(HEADER.len());
        record.push(self.timestamp.format(ROW_TIME_FORMAT).to_string());
        record.push(self.tube.to_string());
        record.push(self.job.to_string());
        for family in [&self.ptc, &self.ctc, &self.sp] {
            record.extend(family.iter().map(|v| format!("{v:.1}")));
        }
        record.extend(self.mv.iter().map(|v| v.to_string()));
        record
    }
}

/// File name for a session created at `created`.
pub fn session_file_name(tube: u16, job: u16, area: Area, created: NaiveDateTime) -> String {
    format!(
        "temperature_T{tube}_{job}_{area}_{}.csv",
        created.format(FILE_TIME_FORMAT)
    )
}

fn session_prefix(tube: u16, job: u16, area: Area) -> String {
    format!("temperature_T{tube}_{job}_{area}_")
}

/// An open logging session.
///
/// Closing is idempotent: only the first [`close`](Self::close) flushes and
/// releases the file.
#[derive(Debug)]
pub struct LogSession {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    rows: usize,
}

impl LogSession {
    /// Create the session file in `dir` (created if missing) and write the header.
    ///
    /// A name collision within the same second gets a numeric suffix rather
    /// than truncating the earlier session.
    pub fn create(
        dir: &Path,
        tube: u16,
        job: u16,
        area: Area,
        created: DateTime<Local>,
    ) -> AppResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            DaqError::Storage(format!("Failed to create log dir {}: {e}", dir.display()))
        })?;

        let base = session_file_name(tube, job, area, created.naive_local());
        let (path, file) = create_unique(dir, &base)?;

        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(HEADER)
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|e| DaqError::Storage(format!("Failed to write header: {e}")))?;

        tracing::info!(path = %path.display(), tube, job, %area, "Temperature log started");
        Ok(Self {
            path,
            writer: Some(writer),
            rows: 0,
        })
    }

    /// Append one row and flush it to disk.
    pub fn append(&mut self, row: &TemperatureRow) -> AppResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            DaqError::Storage(format!("Session already closed: {}", self.path.display()))
        })?;
        writer
            .write_record(row.to_record())
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|e| DaqError::Storage(format!("Failed to append row: {e}")))?;
        self.rows += 1;
        tracing::debug!(path = %self.path.display(), rows = self.rows, "Temperature row appended");
        Ok(())
    }

    /// Flush and release the file. Returns `false` if already closed.
    pub fn close(&mut self) -> AppResult<bool> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(false);
        };
        writer
            .flush()
            .map_err(|e| DaqError::Storage(format!("Failed to close {}: {e}", self.path.display())))?;
        tracing::info!(path = %self.path.display(), rows = self.rows, "Temperature log closed");
        Ok(true)
    }

    /// Whether rows can still be appended.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Location of the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far (header excluded).
    pub fn rows_written(&self) -> usize {
        self.rows
    }
}

fn create_unique(dir: &Path, file_name: &str) -> AppResult<(PathBuf, File)> {
    let stem = file_name.trim_end_matches(".csv");
    for attempt in 0..100u32 {
        let name = if attempt == 0 {
            file_name.to_string()
        } else {
            format!("{stem}_{attempt}.csv")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(DaqError::Storage(format!(
                    "Failed to create {}: {e}",
                    path.display()
                )))
            }
        }
    }
    Err(DaqError::Storage(format!(
        "No free file name for {file_name} in {}",
        dir.display()
    )))
}

/// Most recently modified session file for (tube, job, area).
///
/// A missing directory is not an error; it simply holds no sessions.
/// Ties on modification time are broken by file name.
pub fn find_latest_log(dir: &Path, tube: u16, job: u16, area: Area) -> AppResult<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(dir = %dir.display(), "Temperature log directory does not exist");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let prefix = session_prefix(tube, job, area);
    let mut latest: Option<(SystemTime, String, PathBuf)> = None;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&prefix) || !name.ends_with(".csv") {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let candidate = (modified, name, entry.path());
        if latest
            .as_ref()
            .map_or(true, |best| (&candidate.0, &candidate.1) > (&best.0, &best.1))
        {
            latest = Some(candidate);
        }
    }

    if latest.is_none() {
        tracing::info!(dir = %dir.display(), pattern = %format!("{prefix}*.csv"), "No matching temperature log");
    }
    Ok(latest.map(|(_, _, path)| path))
}

/// Load every row of a CSV file (header included) as raw strings.
pub fn read_rows(path: &Path) -> AppResult<RowSet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    tracing::debug!(path = %path.display(), rows = rows.len(), "Temperature log loaded");
    Ok(rows)
}

/// Latest session for (tube, job, area) together with its rows.
pub fn load_latest(
    dir: &Path,
    tube: u16,
    job: u16,
    area: Area,
) -> AppResult<Option<(PathBuf, RowSet)>> {
    match find_latest_log(dir, tube, job, area)? {
        Some(path) => {
            let rows = read_rows(&path)?;
            Ok(Some((path, rows)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    fn sample_row() -> TemperatureRow {
        TemperatureRow::from_signed(
            at(9, 0, 1).naive_local(),
            2,
            41,
            [253; ZONES],
            [-15; ZONES],
            [250; ZONES],
            [-7; ZONES],
        )
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER.len(), 35);
        assert_eq!(HEADER[3], "PTC1");
        assert_eq!(HEADER[11], "CTC1");
        assert_eq!(HEADER[19], "SP1");
        assert_eq!(HEADER[27], "MV1");
        assert_eq!(HEADER[34], "MV8");
    }

    #[test]
    fn test_file_name_pattern() {
        let name = session_file_name(3, 12, Area::High, at(8, 5, 9).naive_local());
        assert_eq!(name, "temperature_T3_12_high_20260314_080509.csv");
    }

    #[test]
    fn test_row_scaling() {
        let record = sample_row().to_record();
        assert_eq!(record.len(), HEADER.len());
        assert_eq!(record[0], "2026-03-14 09:00:01");
        assert_eq!(&record[1..3], &["2", "41"]);
        assert_eq!(record[3], "25.3");
        assert_eq!(record[11], "-1.5");
        assert_eq!(record[19], "25.0");
        assert_eq!(record[27], "-7");
    }

    #[test]
    fn test_session_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = LogSession::create(dir.path(), 2, 41, Area::Normal, at(9, 0, 0)).unwrap();
        session.append(&sample_row()).unwrap();
        session.append(&sample_row()).unwrap();

        assert!(session.close().unwrap());
        assert!(!session.close().unwrap());
        assert!(!session.is_open());
        assert!(session.append(&sample_row()).is_err());

        let rows = read_rows(session.path()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], HEADER.map(String::from).to_vec());
        assert_eq!(session.rows_written(), 2);
    }

    #[test]
    fn test_same_second_sessions_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = LogSession::create(dir.path(), 1, 1, Area::Normal, at(9, 0, 0)).unwrap();
        let b = LogSession::create(dir.path(), 1, 1, Area::Normal, at(9, 0, 0)).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(b
            .path()
            .to_string_lossy()
            .ends_with("temperature_T1_1_normal_20260314_090000_1.csv"));
    }

    #[test]
    fn test_find_latest_filters_by_identity() {
        let dir = tempfile::tempdir().unwrap();
        for (tube, job, area, t) in [
            (1, 5, Area::Normal, at(9, 0, 0)),
            (1, 5, Area::Normal, at(9, 30, 0)),
            (1, 5, Area::High, at(10, 0, 0)),
            (11, 5, Area::Normal, at(11, 0, 0)),
        ] {
            LogSession::create(dir.path(), tube, job, area, t).unwrap();
        }

        let latest = find_latest_log(dir.path(), 1, 5, Area::Normal).unwrap().unwrap();
        // Files created back to back may share an mtime; the name breaks the tie.
        assert!(latest.to_string_lossy().ends_with("temperature_T1_5_normal_20260314_093000.csv"));

        let high = find_latest_log(dir.path(), 1, 5, Area::High).unwrap().unwrap();
        assert!(high.to_string_lossy().contains("_high_"));

        assert!(find_latest_log(dir.path(), 2, 5, Area::Normal).unwrap().is_none());
        assert!(find_latest_log(&dir.path().join("missing"), 1, 5, Area::Normal)
            .unwrap()
            .is_none());
    }
}
