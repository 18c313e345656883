//! End-to-end behaviour of the dose engine against a real data directory.
//!
//! Covers:
//! - Registration, strict vs. boot upsert
//! - Slot/medication cross-checks on recorded events
//! - Atomic rejection of invalid cartridge batches
//! - Weekly compliance aggregation
//! - Concurrent appends from many threads

use chrono::{DateTime, Duration, TimeZone, Utc};
use medimate_core::*;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 8, 18, 0, 0).unwrap()
}

fn setup() -> (TempDir, Arc<FixedClock>, DoseEngine) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let clock = Arc::new(FixedClock::new(now()));
    let mut config = Config::default();
    config.data.data_dir = temp_dir.path().to_path_buf();
    let engine = DoseEngine::with_clock(config, clock.clone()).expect("engine opens");
    (temp_dir, clock, engine)
}

fn aspirin_device(engine: &DoseEngine) -> Device {
    engine
        .register_device("ESP1", "Asha", vec![SlotAssignment::new(0, "Aspirin")])
        .expect("register ESP1")
}

#[test]
fn test_record_requires_matching_assignment() {
    let (_dir, _clock, engine) = setup();
    aspirin_device(&engine);

    let event = engine
        .record_event(NewDoseEvent::new("ESP1", 0, "Aspirin", DoseStatus::Dispensed))
        .unwrap();
    assert_eq!(event.medication_name, "Aspirin");
    assert_eq!(event.status, DoseStatus::Dispensed);

    let err = engine
        .record_event(NewDoseEvent::new("ESP1", 0, "Ibuprofen", DoseStatus::Dispensed))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unassigned);
}

#[test]
fn test_status_outside_taxonomy() {
    let err = "chewed".parse::<DoseStatus>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStatus);
}

#[test]
fn test_out_of_range_slot_rejects_whole_update() {
    let (_dir, _clock, engine) = setup();
    let before = aspirin_device(&engine);

    let err = engine
        .update_slot_assignments("ESP1", vec![SlotAssignment::new(99, "X")])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let after = engine.get_device("ESP1").unwrap();
    assert_eq!(after.cartridges, before.cartridges);
}

#[test]
fn test_weekly_report_compliance() {
    let (_dir, _clock, engine) = setup();
    aspirin_device(&engine);

    // Two events per day over seven days: 10 confirmed, 4 missed
    let mut statuses = vec![DoseStatus::Confirmed; 10];
    statuses.extend(vec![DoseStatus::Missed; 4]);
    for (i, status) in statuses.into_iter().enumerate() {
        let day = (i / 2) as i64;
        let at = now() - Duration::days(day) - Duration::hours(1 + (i % 2) as i64 * 6);
        engine
            .record_event(NewDoseEvent::new("ESP1", 0, "Aspirin", status).occurred_at(at))
            .unwrap();
    }

    // Outside the window, must not count
    engine
        .record_event(
            NewDoseEvent::new("ESP1", 0, "Aspirin", DoseStatus::Missed)
                .occurred_at(now() - Duration::days(9)),
        )
        .unwrap();

    let report = engine.generate_report("ESP1", Some(7)).unwrap();
    assert_eq!(report.summary.counts.total, 14);
    assert_eq!(report.summary.counts.confirmed, 10);
    assert_eq!(report.summary.counts.missed, 4);
    assert_eq!(report.summary.compliance, "71.4%");
    assert_eq!(report.patient_name, "Asha");
    assert_eq!(report.period.to.to_string(), "2024-06-08");

    let total: u32 = report.daily_stats.values().map(|d| d.total).sum();
    let missed: u32 = report.daily_stats.values().map(|d| d.missed).sum();
    assert_eq!(total, 14);
    assert_eq!(missed, 4);
}

#[test]
fn test_report_with_no_events() {
    let (_dir, _clock, engine) = setup();
    aspirin_device(&engine);

    let report = engine.generate_report("ESP1", None).unwrap();
    assert_eq!(report.summary.compliance, "0.0%");
    assert_eq!(report.summary.counts.total, 0);
    assert_eq!(report.window_days, 7);
}

#[test]
fn test_confirm_on_unassigned_slot() {
    let (_dir, _clock, engine) = setup();
    engine
        .register_device("ESP1", "Asha", vec![SlotAssignment::new(3, "Zinc")])
        .unwrap();

    let err = engine.confirm_dose("ESP1", 0).unwrap_err();
    assert!(matches!(err, Error::Unassigned { slot: 0, .. }));
    assert!(engine.list_events("ESP1", None, None).unwrap().is_empty());
}

#[test]
fn test_concurrent_records_are_all_kept() {
    let (_dir, _clock, engine) = setup();
    aspirin_device(&engine);

    std::thread::scope(|scope| {
        for i in 0..8 {
            let engine = &engine;
            scope.spawn(move || {
                let status = if i % 2 == 0 {
                    DoseStatus::Dispensed
                } else {
                    DoseStatus::Confirmed
                };
                engine
                    .record_event(NewDoseEvent::new("ESP1", 0, "Aspirin", status))
                    .expect("concurrent record succeeds");
            });
        }
    });

    let events = engine.list_events("ESP1", None, None).unwrap();
    assert_eq!(events.len(), 8);
    let ids: HashSet<_> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), 8, "every event gets its own id");
}

#[test]
fn test_records_racing_slot_updates() {
    let (_dir, _clock, engine) = setup();
    aspirin_device(&engine);

    std::thread::scope(|scope| {
        let writer = &engine;
        scope.spawn(move || {
            for i in 0..10 {
                let name = if i % 2 == 0 { "Ibuprofen" } else { "Aspirin" };
                writer
                    .update_slot_assignments("ESP1", vec![SlotAssignment::new(0, name)])
                    .unwrap();
            }
        });
        for _ in 0..4 {
            let engine = &engine;
            scope.spawn(move || {
                for _ in 0..10 {
                    let _ = engine.confirm_dose("ESP1", 0);
                }
            });
        }
    });

    // Whatever interleaving happened, every stored event names a medication
    // that was loaded in slot 0 at some point
    for event in engine.list_events("ESP1", None, None).unwrap() {
        assert!(
            event.medication_name == "Aspirin" || event.medication_name == "Ibuprofen",
            "unexpected medication {}",
            event.medication_name
        );
    }
}

#[test]
fn test_strict_register_vs_upsert() {
    let (_dir, _clock, engine) = setup();
    aspirin_device(&engine);

    let err = engine
        .register_device("ESP1", "Someone Else", vec![])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let device = engine
        .upsert_device_schedule(
            "ESP1",
            Some("Asha Rao"),
            Some(vec![SlotAssignment::new(1, "Metformin").with_times(["09:00"])]),
        )
        .unwrap();
    assert_eq!(device.patient_name, "Asha Rao");
    assert_eq!(device.cartridges.len(), 1);
    assert_eq!(device.cartridges[0].slot, 1);
}

#[test]
fn test_unknown_device() {
    let (_dir, _clock, engine) = setup();
    for err in [
        engine.get_device("ghost").unwrap_err(),
        engine.touch_last_sync("ghost").unwrap_err(),
        engine.miss_dose("ghost", 0).unwrap_err(),
        engine.generate_report("ghost", None).unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[test]
fn test_heartbeat_updates_last_sync() {
    let (_dir, clock, engine) = setup();
    aspirin_device(&engine);

    clock.advance(Duration::minutes(5));
    let at = engine.heartbeat("ESP1").unwrap();
    assert_eq!(at, now() + Duration::minutes(5));
    assert_eq!(engine.get_device("ESP1").unwrap().last_sync_at, Some(at));
}

#[test]
fn test_engine_reopens_existing_data() {
    let (dir, clock, engine) = setup();
    aspirin_device(&engine);
    engine.confirm_dose("ESP1", 0).unwrap();
    drop(engine);

    let mut config = Config::default();
    config.data.data_dir = dir.path().to_path_buf();
    let reopened = DoseEngine::with_clock(config, clock).unwrap();
    assert_eq!(reopened.list_devices().unwrap().len(), 1);
    assert_eq!(reopened.list_events("ESP1", None, None).unwrap().len(), 1);
}
