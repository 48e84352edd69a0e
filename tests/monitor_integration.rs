//! End-to-end trigger monitor scenarios against the in-memory controller.
//!
//! Each test drives `TriggerMonitor::tick` by hand so edges land on exact
//! ticks, then inspects controller memory and the log directory.

use chrono::{Local, NaiveDate};
use fins_daq::config::AddressMap;
use fins_daq::data::temperature_log::{self, LogSession, TemperatureRow};
use fins_daq::data::{Area, ParamTable};
use fins_daq::hardware::{MockPlc, PlcConnector};
use fins_daq::messages::{DaqEvent, EventBus};
use fins_daq::monitor::{ParamTriggerState, TemperatureState, TriggerMonitor};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

const AF: u8 = 0xAF;
const DM: u8 = 0xA0;

struct Harness {
    plc: Arc<MockPlc>,
    monitor: TriggerMonitor,
    events: broadcast::Receiver<DaqEvent>,
    dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let plc = Arc::new(MockPlc::new());
    plc.set_words(AF, 500, &[1, 7]).await;

    let bus = EventBus::default();
    let connector = Arc::new(PlcConnector::new(bus.clone()));
    assert!(connector.connect_with(plc.clone(), 1, 3).await);

    let dir = tempfile::tempdir().unwrap();
    let monitor = TriggerMonitor::new(connector, AddressMap::default(), dir.path());
    Harness {
        plc,
        monitor,
        events: bus.subscribe(),
        dir,
    }
}

/// Write a finished session for tube 1 / job 7: SP 20.0, CTC 18.0,
/// PTC 22.5 in zone 1 and 21.0 elsewhere.
fn write_session(dir: &Path, area: Area, rows: usize) {
    let mut session = LogSession::create(dir, 1, 7, area, Local::now()).unwrap();
    let timestamp = NaiveDate::from_ymd_opt(2026, 3, 14)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let mut ptc = [210; 8];
    ptc[0] = 225;
    for _ in 0..rows {
        let row = TemperatureRow::from_signed(timestamp, 1, 7, ptc, [180; 8], [200; 8], [40; 8]);
        session.append(&row).unwrap();
    }
    assert!(session.close().unwrap());
}

async fn pulse_param_trigger(h: &mut Harness) {
    h.plc.set_bit(AF, 1, 1, true).await;
    h.monitor.tick().await;
    assert_eq!(h.monitor.param_state(), ParamTriggerState::Armed);
    h.plc.set_bit(AF, 1, 1, false).await;
    h.monitor.tick().await;
    assert_eq!(h.monitor.param_state(), ParamTriggerState::Idle);
}

fn csv_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn zero_table_is_replaced_by_first_tuning() {
    let mut h = harness().await;
    write_session(h.dir.path(), Area::Normal, 5);

    pulse_param_trigger(&mut h).await;

    for zone in 0..8u16 {
        let p1 = h.plc.word(DM, 840 + 5 * zone).await;
        let p2 = h.plc.word(DM, 841 + 5 * zone).await;
        assert_eq!(p1, if zone == 0 { 2 } else { 0 }, "P1 zone {}", zone + 1);
        assert_eq!(p2, 5, "P2 zone {}", zone + 1);
    }

    // Only the normal table is written; high has no log for this job.
    let writes = h.plc.writes().await;
    assert_eq!(writes.len(), 16);
    assert!(writes.iter().all(|(addr, _)| addr.word >= 840 && addr.word <= 876));

    match h.events.try_recv().unwrap() {
        DaqEvent::TemperatureLogUpdated { normal, high } => {
            assert_eq!(normal.len(), 6);
            assert_eq!(normal[0][0], "time");
            assert!(high.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let snap = h.monitor.snapshot();
    assert_eq!(snap.trigger_count, 1);
    assert_eq!(
        snap.new_tables.normal,
        ParamTable::from_rows([2, 0, 0, 0, 0, 0, 0, 0], [5; 8])
    );
    let result = snap.last_results.normal.unwrap();
    assert_eq!(result.retain_point, 0);
    assert!(snap.last_results.high.is_none());
}

#[tokio::test]
async fn existing_table_accumulates_adjustment() {
    let mut h = harness().await;
    for zone in 0..8u16 {
        h.plc.set_word(DM, 840 + 5 * zone, 10).await;
        h.plc.set_word(DM, 841 + 5 * zone, 0xFFFF).await; // -1
    }
    write_session(h.dir.path(), Area::Normal, 5);

    pulse_param_trigger(&mut h).await;

    // P1: 10 + [2, 0, ...]; P2: -1 + mean(PTC) - SP = -1 + [2, 1, ...]
    assert_eq!(h.plc.word(DM, 840).await, 12);
    assert_eq!(h.plc.word(DM, 845).await, 10);
    assert_eq!(h.plc.word(DM, 841).await, 1);
    assert_eq!(h.plc.word(DM, 846).await, 0);
    assert_eq!(h.plc.word(DM, 876).await, 0);

    let snap = h.monitor.snapshot();
    assert_eq!(snap.previous_tables.normal.0[1][0], -1);
    assert_eq!(snap.new_tables.normal.0[0][0], 12);
}

#[tokio::test]
async fn latest_session_of_the_job_is_used() {
    let mut h = harness().await;
    write_session(h.dir.path(), Area::High, 5);
    // A newer session for another job must be ignored.
    let mut other = LogSession::create(h.dir.path(), 1, 8, Area::High, Local::now()).unwrap();
    other.close().unwrap();

    pulse_param_trigger(&mut h).await;

    assert_eq!(h.plc.word(DM, 842).await, 2);
    assert_eq!(h.plc.word(DM, 843).await, 5);
    assert!(h.plc.writes().await.iter().all(|(addr, _)| (addr.word - 842) % 5 <= 1));

    match h.events.try_recv().unwrap() {
        DaqEvent::TemperatureLogUpdated { normal, high } => {
            assert!(normal.is_empty());
            assert_eq!(high.len(), 6);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn release_with_unreadable_job_info_skips_tuning() {
    let mut h = harness().await;
    write_session(h.dir.path(), Area::Normal, 5);

    h.plc.set_bit(AF, 1, 1, true).await;
    h.monitor.tick().await;
    h.plc.set_unreachable(AF, 500, true).await;
    h.plc.set_bit(AF, 1, 1, false).await;
    h.monitor.tick().await;

    assert_eq!(h.monitor.param_state(), ParamTriggerState::Idle);
    assert!(h.plc.writes().await.is_empty());
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn temperature_session_records_one_row_per_tick() {
    let mut h = harness().await;
    h.plc.set_bit(AF, 1, 2, true).await;
    h.plc.set_bit(AF, 1, 3, true).await;

    for expected in 1..=3 {
        h.monitor.tick().await;
        assert_eq!(h.monitor.snapshot().session_rows, expected);
    }
    assert_eq!(
        h.monitor.temperature_state(),
        TemperatureState::Logging(Area::Normal)
    );

    h.plc.set_bit(AF, 1, 2, false).await;
    h.monitor.tick().await;
    h.monitor.tick().await;
    assert_eq!(h.monitor.temperature_state(), TemperatureState::Idle);
    assert!(h.monitor.snapshot().session_path.is_none());

    let files = csv_files(h.dir.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("temperature_T1_7_normal_"));
    assert!(files[0].ends_with(".csv"));

    let rows = temperature_log::read_rows(&h.dir.path().join(&files[0])).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].len(), temperature_log::HEADER.len());
    assert!(rows[1..].iter().all(|r| r[1] == "1" && r[2] == "7"));
}

#[tokio::test]
async fn normal_wins_when_both_area_bits_are_set() {
    let mut h = harness().await;
    h.plc.set_bit(AF, 1, 2, true).await;
    h.plc.set_bit(AF, 1, 3, true).await;
    h.plc.set_bit(AF, 1, 4, true).await;

    h.monitor.tick().await;
    h.monitor.shutdown();

    let files = csv_files(h.dir.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].contains("_normal_"));
}

#[tokio::test]
async fn lost_controller_keeps_both_states() {
    let mut h = harness().await;
    h.plc.set_bit(AF, 1, 1, true).await;
    h.plc.set_bit(AF, 1, 2, true).await;
    h.plc.set_bit(AF, 1, 4, true).await;
    h.monitor.tick().await;
    let path = h.monitor.snapshot().session_path.unwrap();

    h.plc.set_online(false);
    h.monitor.tick().await;
    h.monitor.tick().await;

    let snap = h.monitor.snapshot();
    assert_eq!(snap.param_state, ParamTriggerState::Armed);
    assert_eq!(snap.temperature_state, TemperatureState::Logging(Area::High));
    assert_eq!(snap.session_path.as_deref(), Some(path.as_path()));
    assert_eq!(snap.session_rows, 1);
    assert_eq!(snap.heartbeat_count, 1);

    h.plc.set_online(true);
    h.monitor.tick().await;
    assert_eq!(h.monitor.snapshot().session_rows, 2);
}
