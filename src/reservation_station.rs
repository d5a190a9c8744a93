use crate::{
    config::LOAD_CATEGORY,
    error::{Error, Result},
    functional_unit::FunctionalUnits,
    inst::{Inst, MemRef},
    rat::{RegisterAliasTable, Token, Value},
    trace::Event,
};
use serde::Serialize;
use std::fmt::Write;

/// Stable identifier of a reservation station: its slot in the scheduler's
/// station table. Stations hold tags of each other, never references.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Tag(pub usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, strum::Display)]
pub enum Status {
    #[strum(serialize = "NOT BUSY")]
    NotBusy,
    #[strum(serialize = "ISSUE")]
    IssueStarted,
    #[strum(serialize = "WAIT FOR DEPENDENCIES")]
    WaitForDependencies,
    #[strum(serialize = "WAIT FOR FU")]
    WaitForFunctionalUnit,
    #[strum(serialize = "EXECUTE")]
    ExecutionStarted,
    #[strum(serialize = "WRITEBACK")]
    WriteBackStarted,
}

/// A source operand: Vj/Vk once known, Qj/Qk while a producer is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Source {
    Value(Value),
    Tag(Tag),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Load { address: Option<MemRef> },
    Calc { j: Option<Source>, k: Option<Source> },
}

/// What a call to [`ReservationStation::advance`] did.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    Stay,
    Started,
    WroteBack,
}

/// Per-cycle context handed to every station transition.
#[derive(Debug, Default)]
pub struct Cycle {
    pub now: u64,
    /// Functional units given back by a writeback this cycle. Only the
    /// arbitration pass may hand these out again.
    pub released: Vec<String>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct ReservationStation {
    name: String,
    category: String,
    index: usize,
    kind: Kind,
    functional_unit: Option<String>,
    status: Status,
    inst: Option<usize>,
    target: Option<String>,
    issue_start: u64,
    issue_duration: u64,
    exec_duration: u64,
    exec_start: Option<u64>,
    ready_at: Option<u64>,
    holds_unit: bool,
}

impl Source {
    pub fn tag(&self) -> Option<Tag> {
        match self {
            Source::Tag(tag) => Some(*tag),
            Source::Value(_) => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Source::Value(value) => Some(value),
            Source::Tag(_) => None,
        }
    }

    fn capture(&mut self, tag: Tag, token: Token) -> bool {
        if *self == Source::Tag(tag) {
            *self = Source::Value(Value::Result(token));
            true
        } else {
            false
        }
    }
}

impl Cycle {
    pub fn new(now: u64) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    pub fn record(&mut self, event: Event) {
        tracing::debug!(cycle = self.now, "{event}");
        self.events.push(event);
    }

    fn is_released(&self, unit: &str) -> bool {
        self.released.iter().any(|u| u == unit)
    }
}

impl ReservationStation {
    pub fn load(index: usize) -> Self {
        Self::new(LOAD_CATEGORY, index, Kind::Load { address: None }, None)
    }

    pub fn calc(category: &str, index: usize, functional_unit: Option<String>) -> Self {
        Self::new(category, index, Kind::Calc { j: None, k: None }, functional_unit)
    }

    fn new(category: &str, index: usize, kind: Kind, functional_unit: Option<String>) -> Self {
        debug_assert!(index >= 1);
        Self {
            name: format!("{category}{index}"),
            category: category.to_owned(),
            index,
            kind,
            functional_unit,
            status: Status::NotBusy,
            inst: None,
            target: None,
            issue_start: 0,
            issue_duration: 0,
            exec_duration: 0,
            exec_start: None,
            ready_at: None,
            holds_unit: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_busy(&self) -> bool {
        debug_assert_eq!(self.status != Status::NotBusy, self.inst.is_some());
        self.status != Status::NotBusy
    }

    /// Index of the owning instruction in program order.
    pub fn instruction(&self) -> Option<usize> {
        self.inst
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn functional_unit(&self) -> Option<&str> {
        self.functional_unit.as_deref()
    }

    pub fn issue_end(&self) -> u64 {
        self.issue_start + self.issue_duration - 1
    }

    pub fn exec_start(&self) -> Option<u64> {
        self.exec_start
    }

    pub fn write_back_at(&self) -> Option<u64> {
        self.exec_start.map(|start| start + self.exec_duration)
    }

    /// Qj and Qk that are still unresolved.
    pub fn pending(&self) -> impl Iterator<Item = Tag> + '_ {
        let (j, k) = match &self.kind {
            Kind::Calc { j, k } => (j.as_ref(), k.as_ref()),
            Kind::Load { .. } => (None, None),
        };
        j.into_iter().chain(k).filter_map(Source::tag)
    }

    pub fn waits_for_dependencies(&self) -> bool {
        self.pending().next().is_some()
    }

    /// Whether the operands were completed by the CDB broadcast of `cycle`.
    pub fn became_ready_at(&self, cycle: u64) -> bool {
        self.ready_at == Some(cycle)
    }

    /// Takes `inst` into the station. Calculation stations resolve their
    /// sources against `rat` before the destination is renamed.
    pub fn issue(
        &mut self,
        idx: usize,
        inst: &mut Inst,
        cycle: u64,
        issue_duration: u64,
        exec_duration: u64,
        rat: &RegisterAliasTable,
    ) {
        debug_assert!(!self.is_busy(), "issued into busy station {}", self.name);

        self.inst = Some(idx);
        self.status = Status::IssueStarted;
        self.issue_start = cycle;
        self.issue_duration = issue_duration;
        self.exec_duration = exec_duration;
        self.exec_start = None;
        self.ready_at = None;
        self.holds_unit = false;
        self.target = inst.dst().map(|dst| dst.register().to_owned());

        inst.times.issue = Some(cycle);
        inst.times.issue_end = Some(self.issue_end());

        self.kind = match self.kind {
            Kind::Load { .. } => Kind::Load {
                address: inst.src1().and_then(|op| op.as_mem()).cloned(),
            },
            Kind::Calc { .. } => {
                let resolve = |reg: &str| match rat.read(reg) {
                    Ok(value) => Source::Value(value),
                    Err(tag) => Source::Tag(tag),
                };
                Kind::Calc {
                    j: inst.src1().map(|op| resolve(op.register())),
                    k: inst.src2().map(|op| resolve(op.register())),
                }
            }
        };
    }

    /// Runs this station's transition for `cycle.now`.
    pub fn advance(
        &mut self,
        cycle: &mut Cycle,
        units: &mut FunctionalUnits,
        inst: &mut Inst,
    ) -> Result<Step> {
        match self.status {
            Status::NotBusy | Status::WriteBackStarted => Err(Error::Internal(format!(
                "{} advanced in state {}",
                self.name, self.status
            ))),
            Status::IssueStarted if cycle.now <= self.issue_end() => Ok(Step::Stay),
            Status::IssueStarted if self.waits_for_dependencies() => {
                self.status = Status::WaitForDependencies;
                Ok(Step::Stay)
            }
            Status::IssueStarted => self.try_start(cycle, units, inst),
            Status::WaitForDependencies | Status::WaitForFunctionalUnit => {
                self.try_start(cycle, units, inst)
            }
            Status::ExecutionStarted => {
                let write_back = self.write_back_at().ok_or_else(|| {
                    Error::Internal(format!("{} executing without a start cycle", self.name))
                })?;

                if cycle.now < write_back {
                    return Ok(Step::Stay);
                }
                if cycle.now > write_back {
                    return Err(Error::Internal(format!(
                        "{} missed its writeback at cycle {write_back}",
                        self.name
                    )));
                }

                self.status = Status::WriteBackStarted;
                if self.holds_unit {
                    if let Some(unit) = &self.functional_unit {
                        units.release(unit)?;
                        cycle.released.push(unit.clone());
                    }
                }
                self.reset();
                Ok(Step::WroteBack)
            }
        }
    }

    fn try_start(
        &mut self,
        cycle: &mut Cycle,
        units: &mut FunctionalUnits,
        inst: &mut Inst,
    ) -> Result<Step> {
        if self.waits_for_dependencies() {
            return Ok(Step::Stay);
        }

        // One cycle from the CDB to the execution unit.
        if self.became_ready_at(cycle.now) {
            self.status = Status::WaitForFunctionalUnit;
            return Ok(Step::Stay);
        }

        if let Some(unit) = self.functional_unit.clone() {
            if cycle.is_released(&unit) || !units.try_acquire(&unit)? {
                if self.status != Status::WaitForFunctionalUnit {
                    cycle.record(Event::WaitingForUnit {
                        station: self.name.clone(),
                        unit,
                    });
                }
                self.status = Status::WaitForFunctionalUnit;
                return Ok(Step::Stay);
            }
            self.holds_unit = true;
        }

        self.start_execution(cycle, inst);
        Ok(Step::Started)
    }

    /// Hands this station a unit of its pool without the usual checks. Used
    /// by arbitration after another station released the unit.
    pub fn force_assign_unit(
        &mut self,
        cycle: &mut Cycle,
        units: &mut FunctionalUnits,
        inst: &mut Inst,
    ) -> Result<()> {
        let unit = self.functional_unit.as_deref().ok_or_else(|| {
            Error::Internal(format!("{} has no functional unit to assign", self.name))
        })?;
        if self.status != Status::WaitForFunctionalUnit {
            return Err(Error::Internal(format!(
                "{} assigned a unit in state {}",
                self.name, self.status
            )));
        }
        if !units.try_acquire(unit)? {
            return Err(Error::Internal(format!("no {unit} left to assign to {}", self.name)));
        }

        self.holds_unit = true;
        self.start_execution(cycle, inst);
        Ok(())
    }

    fn start_execution(&mut self, cycle: &mut Cycle, inst: &mut Inst) {
        self.status = Status::ExecutionStarted;
        self.exec_start = Some(cycle.now);

        inst.times.execute = self.exec_start;
        inst.times.write_back = self.write_back_at();

        cycle.record(Event::ExecutionStarted {
            station: self.name.clone(),
            instruction: self.inst.unwrap_or_default(),
        });
    }

    /// Picks `token` off the CDB if this station is waiting on `tag`.
    pub fn capture(&mut self, tag: Tag, token: Token, cycle: u64) {
        if let Kind::Calc { j, k } = &mut self.kind {
            let j = j.as_mut().map_or(false, |s| s.capture(tag, token));
            let k = k.as_mut().map_or(false, |s| s.capture(tag, token));
            if (j || k) && !self.waits_for_dependencies() {
                self.ready_at = Some(cycle);
            }
        }
    }

    pub fn reset(&mut self) {
        self.status = Status::NotBusy;
        self.inst = None;
        self.target = None;
        self.exec_start = None;
        self.ready_at = None;
        self.holds_unit = false;
        self.kind = match self.kind {
            Kind::Load { .. } => Kind::Load { address: None },
            Kind::Calc { .. } => Kind::Calc { j: None, k: None },
        };
    }

    /// One-line summary of the station at `cycle`. `name_of` turns Qj/Qk
    /// tags back into station names.
    pub fn describe(&self, cycle: u64, inst: Option<&Inst>, name_of: impl Fn(Tag) -> String) -> String {
        if !self.is_busy() {
            return format!("{}, Busy: No", self.name);
        }

        let mut out = format!("{}, Busy: Yes", self.name);
        let op = inst.map_or("?", |inst| inst.op.as_str());

        match &self.kind {
            Kind::Load { address } => {
                write!(out, ", Op: {op}").ok();
                if let Some(mem) = address {
                    write!(out, ", Address: M[{}+{}]", mem.offset, mem.base).ok();
                }
            }
            Kind::Calc { j, k } => {
                let v = |s: &Option<Source>| match s.as_ref().and_then(Source::value) {
                    Some(value) => value.to_string(),
                    None => "-".to_owned(),
                };
                let q = |s: &Option<Source>| match s.as_ref().and_then(Source::tag) {
                    Some(tag) => name_of(tag),
                    None => "-".to_owned(),
                };
                write!(
                    out,
                    ", Op: {op}, Vj: {}, Vk: {}, Qj: {}, Qk: {}",
                    v(j),
                    v(k),
                    q(j),
                    q(k)
                )
                .ok();
            }
        }

        write!(out, ", State: {}", self.status).ok();

        let remaining = match self.status {
            Status::IssueStarted => Some(self.issue_end().saturating_sub(cycle)),
            Status::ExecutionStarted => self
                .write_back_at()
                .map(|wb| wb.saturating_sub(cycle + 1)),
            _ => None,
        };
        if let Some(remaining) = remaining {
            write!(out, ", Remaining Time: {remaining}").ok();
        }

        out
    }
}
