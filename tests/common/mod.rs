#![allow(dead_code)]

use std::collections::BTreeMap;

use tomasulo::{
    config::Timing, reservation_station::Status, schedule::Schedule, scheduler::Scheduler,
};

/// Ordering and width properties every finished schedule must have.
pub fn check_schedule(schedule: &Schedule, timing: Timing) {
    let rows = &schedule.rows;

    for row in rows {
        assert!(row.issue <= row.issue_end, "{row}");
        assert_eq!(row.issue_end - row.issue + 1, timing.issue_duration, "{row}");
        assert!(row.issue_end < row.execute, "{row}");
        assert!(row.execute < row.write_back, "{row}");
        assert!(row.write_back < row.commit, "{row}");
    }

    for pair in rows.windows(2) {
        assert!(pair[0].issue <= pair[1].issue, "issue out of order: {} / {}", pair[0], pair[1]);
        assert!(pair[0].commit <= pair[1].commit, "commit out of order: {} / {}", pair[0], pair[1]);
        if timing.commit_width == 1 {
            assert!(pair[0].commit < pair[1].commit, "{} / {}", pair[0], pair[1]);
        }
    }

    let mut issued = BTreeMap::<u64, usize>::new();
    let mut committed = BTreeMap::<u64, usize>::new();
    for row in rows {
        *issued.entry(row.issue).or_default() += 1;
        *committed.entry(row.commit).or_default() += 1;
    }
    assert!(issued.values().all(|&n| n <= timing.issue_width), "{issued:?}");
    assert!(committed.values().all(|&n| n <= timing.commit_width), "{committed:?}");

    match rows.iter().map(|row| row.commit).max() {
        Some(last) => assert_eq!(schedule.cycles_taken, last),
        None => assert_eq!(schedule.cycles_taken, 0),
    }
}

/// Every reserved unit belongs to a station that is executing.
pub fn check_units(sched: &Scheduler) {
    for unit in sched.units().iter() {
        assert!(unit.available <= unit.capacity, "{unit:?}");

        let executing = sched
            .stations()
            .iter()
            .filter(|rs| {
                rs.status() == Status::ExecutionStarted && rs.functional_unit() == Some(unit.name.as_str())
            })
            .count();
        assert_eq!(executing, unit.in_use(), "cycle {}: {unit:?}", sched.cycle());
    }
}
