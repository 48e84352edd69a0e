//! Tuning calculation over a logged temperature session.
//!
//! Everything here is pure: the input is the raw CSV row set (header first)
//! and the output is a [`TuningResult`] of integer corrections. No I/O.
//!
//! # Algorithm
//!
//! 1. Find the retain point on zone 1's set-point series: the sample just
//!    before a run of [`PLATEAU_LEN`] consecutive samples equal to the running
//!    maximum. The last such run wins; no run means index 0.
//! 2. Per zone, with the shared retain point:
//!    - `P1 = 0` if `max(PTC) − SP[retain] ≤ 1`, else `trunc(max(PTC) − SP[retain])`
//!    - `initialP2 = trunc(SP[retain] − CTC[retain] + 3)`
//!    - `P2adj = trunc(mean(PTC[retain+1 ..= retain+60]) − SP[retain])`
//!
//! Column lookup assumes each channel family is contiguous from its zone-1
//! column (`SP1`, `PTC1`, ...). Other layouts give meaningless results.

use serde::{Deserialize, Serialize};

/// Heater zones per tube.
pub const ZONES: usize = 8;

/// Consecutive samples at the running maximum that qualify as a plateau.
pub const PLATEAU_LEN: usize = 100;

/// Samples averaged after the retain point.
pub const AVERAGE_WINDOW: usize = 60;

/// Process channel families recorded per zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Process temperature
    Ptc,
    /// Controller temperature
    Ctc,
    /// Setpoint
    Sp,
    /// Manipulated value
    Mv,
}

impl Channel {
    /// Column name prefix; zone `z` lives in column `{prefix}{z}`.
    pub fn prefix(self) -> &'static str {
        match self {
            Channel::Ptc => "PTC",
            Channel::Ctc => "CTC",
            Channel::Sp => "SP",
            Channel::Mv => "MV",
        }
    }
}

/// Extract one zone's series (zone is 1-based).
///
/// Rows too short for the column and cells that do not parse read as 0.0.
/// A header without the family's zone-1 column yields an empty series.
pub fn channel_series(rows: &[Vec<String>], channel: Channel, zone: usize) -> Vec<f64> {
    let Some((header, data)) = rows.split_first() else {
        return Vec::new();
    };
    let first = format!("{}1", channel.prefix());
    let Some(base) = header.iter().position(|name| name.trim() == first) else {
        tracing::error!(column = %first, "Column missing from temperature log header");
        return Vec::new();
    };
    let idx = base + zone.saturating_sub(1);

    data.iter()
        .map(|row| {
            row.get(idx)
                .and_then(|cell| cell.trim().parse::<f64>().ok())
                .unwrap_or(0.0)
        })
        .collect()
}

/// Retain point of a set-point series.
///
/// Returns `index − PLATEAU_LEN` for the last index at which the plateau
/// counter reaches [`PLATEAU_LEN`]. A plateau sitting at the initial level
/// (0.0) from the very first sample yields −1: no retain sample exists, and
/// the averaging window then starts at index 0.
pub fn find_retain_point(series: &[f64]) -> isize {
    let mut running_max = 0.0_f64;
    let mut counter = 0usize;
    let mut retain = 0isize;

    for (index, &value) in series.iter().enumerate() {
        if value > running_max {
            running_max = value;
            counter = 0;
        } else if value == running_max {
            counter += 1;
        } else {
            counter = 0;
        }

        if counter == PLATEAU_LEN {
            retain = index as isize - PLATEAU_LEN as isize;
        }
    }
    retain
}

fn value_at(series: &[f64], index: isize) -> f64 {
    usize::try_from(index)
        .ok()
        .and_then(|i| series.get(i).copied())
        .unwrap_or(0.0)
}

fn series_max(series: &[f64]) -> f64 {
    series.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

fn window_mean(series: &[f64], retain: isize) -> f64 {
    let start = (retain + 1).max(0) as usize;
    let end = ((retain + 1 + AVERAGE_WINDOW as isize).max(0) as usize).min(series.len());
    if end <= start {
        return 0.0;
    }
    series[start..end].iter().sum::<f64>() / (end - start) as f64
}

/// Truncate toward zero and saturate into controller-word range.
fn to_word(value: f64) -> i32 {
    value
        .trunc()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i32
}

/// Per-zone corrections computed from one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningResult {
    /// Index the calculation was anchored on
    pub retain_point: isize,
    /// Overshoot above the retained setpoint
    pub p1: [i32; ZONES],
    /// P2 used when the previous table was all zero
    pub initial_p2: [i32; ZONES],
    /// Correction added to an existing P2
    pub p2_adjust: [i32; ZONES],
}

/// Run the full tuning calculation over a row set (header row first).
pub fn calculate(rows: &[Vec<String>]) -> TuningResult {
    let retain = find_retain_point(&channel_series(rows, Channel::Sp, 1));

    let mut result = TuningResult {
        retain_point: retain,
        p1: [0; ZONES],
        initial_p2: [0; ZONES],
        p2_adjust: [0; ZONES],
    };

    for z in 0..ZONES {
        let ptc = channel_series(rows, Channel::Ptc, z + 1);
        let ctc = channel_series(rows, Channel::Ctc, z + 1);
        let sp = channel_series(rows, Channel::Sp, z + 1);

        let sp_retain = value_at(&sp, retain);
        let ctc_retain = value_at(&ctc, retain);

        let overshoot = series_max(&ptc) - sp_retain;
        result.p1[z] = if overshoot <= 1.0 { 0 } else { to_word(overshoot) };
        result.initial_p2[z] = to_word(sp_retain - ctc_retain + 3.0);
        result.p2_adjust[z] = to_word(window_mean(&ptc, retain) - sp_retain);
    }

    tracing::debug!(
        retain_point = retain,
        p1 = ?result.p1,
        initial_p2 = ?result.initial_p2,
        p2_adjust = ?result.p2_adjust,
        "Tuning calculated"
    );
    result
}

/// True when every element is zero (vacuously true for an empty slice).
pub fn is_all_zero(values: &[i32]) -> bool {
    values.iter().all(|v| *v == 0)
}

/// Element-wise `(p1 ++ p2)[i] + previous[i]`, truncated to the shorter input.
pub fn merge_accumulate(p1: &[i32], p2: &[i32], previous: &[i32]) -> Vec<i32> {
    p1.iter()
        .chain(p2)
        .zip(previous)
        .map(|(a, b)| a.saturating_add(*b))
        .collect()
}

/// 2×8 parameter table: row 0 = P1, row 1 = P2, columns = zones 1..8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParamTable(pub [[i32; ZONES]; 2]);

impl ParamTable {
    /// All-zero table.
    pub fn zeros() -> Self {
        Self::default()
    }

    /// Build from the P1 and P2 rows.
    pub fn from_rows(p1: [i32; ZONES], p2: [i32; ZONES]) -> Self {
        Self([p1, p2])
    }

    /// Build from 16 row-major values. Returns `None` for any other length.
    pub fn from_flat(values: &[i32]) -> Option<Self> {
        if values.len() != 2 * ZONES {
            return None;
        }
        let mut table = Self::zeros();
        for (i, v) in values.iter().enumerate() {
            table.0[i / ZONES][i % ZONES] = *v;
        }
        Some(table)
    }

    /// Row-major values.
    pub fn flatten(&self) -> Vec<i32> {
        self.0.iter().flatten().copied().collect()
    }

    /// True when no cell has been set.
    pub fn is_all_zero(&self) -> bool {
        is_all_zero(&self.flatten())
    }

    /// `(row, zone_index, value)` in row-major, zone-ascending order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, i32)> + '_ {
        self.0
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().enumerate().map(move |(z, v)| (r, z, *v)))
    }

    /// Combine a fresh tuning result with the table cached at arm time.
    ///
    /// An all-zero previous table is replaced by `P1 ++ initialP2`; otherwise
    /// `P1 ++ P2adj` is accumulated onto it.
    pub fn merge(previous: &ParamTable, result: &TuningResult) -> ParamTable {
        if previous.is_all_zero() {
            return Self::from_rows(result.p1, result.initial_p2);
        }
        let merged = merge_accumulate(&result.p1, &result.p2_adjust, &previous.flatten());
        Self::from_flat(&merged).unwrap_or(*previous)
    }
}
