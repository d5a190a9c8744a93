use crate::{
    error::{Error, Result},
    inst::Inst,
    trace::CycleTrace,
};
use serde::Serialize;
use std::fmt;

/// Cycles at which one instruction passed each stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleRow {
    pub command: String,
    pub issue: u64,
    pub issue_end: u64,
    pub execute: u64,
    pub write_back: u64,
    pub commit: u64,
}

/// Result of a complete run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub rows: Vec<ScheduleRow>,
    pub cycles_taken: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<CycleTrace>>,
}

impl ScheduleRow {
    fn new(inst: &Inst) -> Result<Self> {
        let missing = |stage: &str| Error::Internal(format!("'{inst}' finished without a {stage} cycle"));
        let times = &inst.times;

        Ok(Self {
            command: inst.to_string(),
            issue: times.issue.ok_or_else(|| missing("issue"))?,
            issue_end: times.issue_end.ok_or_else(|| missing("issue end"))?,
            execute: times.execute.ok_or_else(|| missing("execute"))?,
            write_back: times.write_back.ok_or_else(|| missing("writeback"))?,
            commit: times.commit.ok_or_else(|| missing("commit"))?,
        })
    }

    /// (issue, issue end, execute, writeback, commit)
    pub fn cycles(&self) -> (u64, u64, u64, u64, u64) {
        (self.issue, self.issue_end, self.execute, self.write_back, self.commit)
    }
}

impl Schedule {
    pub fn new(insts: &[Inst], cycles_taken: u64, trace: Option<Vec<CycleTrace>>) -> Result<Self> {
        Ok(Self {
            rows: insts.iter().map(ScheduleRow::new).collect::<Result<_>>()?,
            cycles_taken,
            trace,
        })
    }

    /// Instructions committed per cycle.
    pub fn ipc(&self) -> f64 {
        if self.cycles_taken == 0 {
            0.0
        } else {
            self.rows.len() as f64 / self.cycles_taken as f64
        }
    }
}

impl fmt::Display for ScheduleRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | IS: {}-{}, EX: {}-{}, WB: {}, CO: {}",
            self.command,
            self.issue,
            self.issue_end,
            self.execute,
            self.write_back - 1,
            self.write_back,
            self.commit
        )
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.rows.iter().enumerate() {
            writeln!(f, "{:>3}. {row}", i + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Timestamps;
    use std::str::FromStr;

    fn finished(s: &str, cycles: [u64; 5]) -> Inst {
        let mut inst = Inst::from_str(s).unwrap();
        inst.times = Timestamps {
            issue: Some(cycles[0]),
            issue_end: Some(cycles[1]),
            execute: Some(cycles[2]),
            write_back: Some(cycles[3]),
            commit: Some(cycles[4]),
        };
        inst
    }

    #[test]
    fn renders_rows() {
        let schedule = Schedule::new(&[finished("LD R1,0(R2)", [1, 1, 2, 7, 8])], 8, None).unwrap();
        assert_eq!(
            schedule.rows[0].to_string(),
            "LD R1, 0(R2) | IS: 1-1, EX: 2-6, WB: 7, CO: 8"
        );
        assert_eq!(
            schedule.to_string(),
            "  1. LD R1, 0(R2) | IS: 1-1, EX: 2-6, WB: 7, CO: 8\n"
        );
        assert!((schedule.ipc() - 0.125).abs() < f64::EPSILON);
    }

    #[test]
    fn unfinished_instruction_is_an_internal_error() {
        let mut inst = finished("ADD R1,R2,R3", [1, 1, 2, 4, 5]);
        inst.times.commit = None;
        assert!(matches!(Schedule::new(&[inst], 5, None), Err(Error::Internal(_))));
    }

    #[test]
    fn json_omits_missing_trace() {
        let schedule = Schedule::new(&[finished("ADD R1,R2,R3", [1, 1, 2, 4, 5])], 5, None).unwrap();
        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json["cycles_taken"], 5);
        assert_eq!(json["rows"][0]["commit"], 5);
        assert!(json.get("trace").is_none());
    }
}
