use std::{
    collections::{BTreeMap, VecDeque},
    ops::Range,
};

use hashbrown::HashMap;

use crate::{
    config::{MachineConfig, Timing, LOAD_CATEGORY},
    error::{ConfigError, Error, Result},
    functional_unit::FunctionalUnits,
    inst::{Inst, Operand},
    program::Program,
    rat::{RegisterAliasTable, Token, ValueOrTag},
    reservation_station::{Cycle, Kind, ReservationStation, Status, Step, Tag},
    schedule::Schedule,
    trace::{CycleTrace, Event, StationSnapshot, UnitSnapshot},
};

/// A pool of reservation stations sharing a name, opcodes and functional unit.
#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    pub slots: Range<usize>,
    pub functional_unit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    stations: Vec<ReservationStation>,
    categories: Vec<Category>,
    routing: HashMap<String, usize>,
    units: FunctionalUnits,
    rat: RegisterAliasTable,
    durations: HashMap<String, u64>,
    insts: Vec<Inst>,
    timing: Timing,
    pending: VecDeque<usize>,
    stalled: Option<usize>,
    next_commit: usize,
    cycle: u64,
    last_broadcast: Option<u64>,
    next_token: u64,
    trace: Option<Vec<CycleTrace>>,
    loaded: bool,
}

impl Scheduler {
    /// Builds the station pools and the opcode routing table.
    pub fn configure(machine: &MachineConfig) -> Result<Self> {
        machine.validate()?;

        let mut stations = Vec::new();
        let mut categories = Vec::new();
        let mut routing: HashMap<String, usize> = HashMap::new();

        let mut route = |opcodes: &[String], cat: usize, categories: &[Category]| {
            for op in opcodes {
                match routing.get(op.as_str()) {
                    Some(&prev) if prev != cat => {
                        return Err(ConfigError::DuplicateOpcode {
                            opcode: op.clone(),
                            first: categories[prev].name.clone(),
                            second: categories[cat].name.clone(),
                        })
                    }
                    _ => {
                        routing.insert(op.clone(), cat);
                    }
                }
            }
            Ok(())
        };

        stations.extend((1..=machine.load.stations).map(ReservationStation::load));
        categories.push(Category {
            name: LOAD_CATEGORY.to_owned(),
            slots: 0..stations.len(),
            functional_unit: None,
        });
        route(&machine.load.opcodes, 0, &categories)?;

        for cfg in &machine.categories {
            let start = stations.len();
            stations.extend(
                (1..=cfg.stations)
                    .map(|i| ReservationStation::calc(&cfg.name, i, cfg.functional_unit.clone())),
            );
            categories.push(Category {
                name: cfg.name.clone(),
                slots: start..stations.len(),
                functional_unit: cfg.functional_unit.clone(),
            });
            route(&cfg.opcodes, categories.len() - 1, &categories)?;
        }

        tracing::debug!(
            stations = stations.len(),
            categories = categories.len(),
            opcodes = routing.len(),
            "configured scheduler"
        );

        Ok(Self {
            stations,
            categories,
            routing,
            units: FunctionalUnits::new(&machine.functional_units),
            rat: RegisterAliasTable::default(),
            durations: HashMap::new(),
            insts: Vec::new(),
            timing: Timing::default(),
            pending: VecDeque::new(),
            stalled: None,
            next_commit: 0,
            cycle: 0,
            last_broadcast: None,
            next_token: 1,
            trace: None,
            loaded: false,
        })
    }

    /// Validates `program` against the machine and resets every piece of
    /// cycle-dependent state.
    pub fn load<S: AsRef<str>>(
        &mut self,
        program: Program,
        registers: &[S],
        durations: &BTreeMap<String, u64>,
        timing: Timing,
    ) -> Result<()> {
        timing.validate()?;
        program.check_registers(registers)?;

        for op in program.opcodes() {
            if !self.routing.contains_key(op) {
                return Err(ConfigError::UnroutedOpcode(op.to_owned()).into());
            }
            match durations.get(op) {
                None => return Err(ConfigError::MissingDuration(op.to_owned()).into()),
                Some(0) => return Err(ConfigError::ZeroDuration(op.to_owned()).into()),
                Some(_) => {}
            }
        }

        for inst in &program.insts {
            self.check_operands(inst)?;
        }

        self.durations = durations
            .iter()
            .map(|(op, &dur)| (op.clone(), dur))
            .collect();
        self.rat = RegisterAliasTable::new(registers);
        self.insts = program.insts;
        self.timing = timing;
        self.loaded = true;
        self.reset();

        tracing::debug!(
            instructions = self.insts.len(),
            registers = registers.len(),
            ?timing,
            "loaded program"
        );
        Ok(())
    }

    fn check_operands(&self, inst: &Inst) -> Result<()> {
        let invalid = |msg: &str| Error::InvalidOperands {
            instruction: inst.to_string(),
            msg: msg.to_owned(),
        };

        if let Some(Operand::Mem(_)) = inst.dst() {
            return Err(invalid("the destination must be a register"));
        }

        if self.routing.get(&inst.op) == Some(&0) {
            if inst.dst().is_none() {
                return Err(invalid("a load needs a destination register"));
            }
            if inst.src1().and_then(Operand::as_mem).is_none() {
                return Err(invalid("a load needs an address of the form offset(base)"));
            }
        }

        Ok(())
    }

    /// Records a [`CycleTrace`] per cycle from the next run on.
    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled.then(Vec::new);
    }

    fn reset(&mut self) {
        for rs in &mut self.stations {
            rs.reset();
        }
        for inst in &mut self.insts {
            inst.times = Default::default();
        }
        self.units.reset();
        self.rat.reset();
        self.pending = (0..self.insts.len()).collect();
        self.stalled = None;
        self.next_commit = 0;
        self.cycle = 0;
        self.last_broadcast = None;
        self.next_token = 1;
        if let Some(trace) = &mut self.trace {
            trace.clear();
        }
    }

    /// Runs the loaded program from its first cycle to the last commit.
    pub fn run(&mut self) -> Result<Schedule> {
        if !self.loaded {
            return Err(ConfigError::NotLoaded.into());
        }

        self.reset();
        while !self.is_finished() {
            self.step()?;
        }

        tracing::debug!(cycles = self.cycle, "run finished");
        Schedule::new(&self.insts, self.cycle, self.trace.clone())
    }

    /// Simulates exactly one cycle.
    pub fn step(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(ConfigError::NotLoaded.into());
        }

        self.cycle += 1;
        let mut cycle = Cycle::new(self.cycle);

        self.stage_writeback(&mut cycle)?;
        self.stage_execute(&mut cycle)?;
        self.stage_arbitrate(&mut cycle)?;
        self.stage_commit(&mut cycle);
        self.stage_issue(&mut cycle)?;

        self.snapshot(cycle);
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
            && self.next_commit == self.insts.len()
            && !self.stations.iter().any(ReservationStation::is_busy)
    }

    /// Busy stations in program order of their instructions.
    fn by_age(&self, filter: impl Fn(&ReservationStation) -> bool) -> Vec<usize> {
        let mut slots = self
            .stations
            .iter()
            .enumerate()
            .filter(|(_, rs)| rs.is_busy() && filter(rs))
            .map(|(slot, _)| slot)
            .collect::<Vec<_>>();
        slots.sort_by_key(|&slot| self.stations[slot].instruction());
        slots
    }

    fn advance(&mut self, slot: usize, cycle: &mut Cycle) -> Result<Step> {
        let rs = &mut self.stations[slot];
        let idx = rs
            .instruction()
            .ok_or_else(|| Error::Internal(format!("{} is busy without an instruction", rs.name())))?;
        rs.advance(cycle, &mut self.units, &mut self.insts[idx])
    }

    /// Stations reaching their writeback cycle free themselves and publish
    /// a result on the CDB.
    fn stage_writeback(&mut self, cycle: &mut Cycle) -> Result<()> {
        let now = cycle.now;
        let writers = self.by_age(|rs| {
            rs.status() == Status::ExecutionStarted && rs.write_back_at() == Some(now)
        });

        for slot in writers {
            match self.advance(slot, cycle)? {
                Step::WroteBack => self.broadcast(Tag(slot), cycle),
                step => {
                    return Err(Error::Internal(format!(
                        "{} did not write back at cycle {now} ({step:?})",
                        self.stations[slot].name()
                    )))
                }
            }
        }
        Ok(())
    }

    fn broadcast(&mut self, tag: Tag, cycle: &mut Cycle) {
        let token = Token(self.next_token);
        self.next_token += 1;

        let aliases = self.rat.broadcast(tag, token);
        for rs in &mut self.stations {
            rs.capture(tag, token, cycle.now);
        }
        self.last_broadcast = Some(cycle.now);

        tracing::trace!(cycle = cycle.now, %token, aliases, "cdb broadcast");
        cycle.record(Event::Broadcast {
            station: self.stations[tag.0].name().to_owned(),
            token,
        });
    }

    fn stage_execute(&mut self, cycle: &mut Cycle) -> Result<()> {
        for slot in self.by_age(|_| true) {
            self.advance(slot, cycle)?;
        }
        Ok(())
    }

    /// Hands every unit released this cycle to the oldest station waiting
    /// for its pool.
    fn stage_arbitrate(&mut self, cycle: &mut Cycle) -> Result<()> {
        let mut released = std::mem::take(&mut cycle.released);
        released.sort();
        released.dedup();

        for unit in &released {
            while self.units.available(unit).unwrap_or(0) > 0 {
                let now = cycle.now;
                let contenders = self.by_age(|rs| {
                    rs.status() == Status::WaitForFunctionalUnit
                        && rs.functional_unit() == Some(unit.as_str())
                        && !rs.became_ready_at(now)
                });
                let winner = match contenders.first() {
                    Some(&slot) => slot,
                    None => break,
                };

                cycle.record(Event::UnitAssigned {
                    unit: unit.clone(),
                    station: self.stations[winner].name().to_owned(),
                    contenders: contenders
                        .iter()
                        .map(|&slot| self.stations[slot].name().to_owned())
                        .collect(),
                });

                let rs = &mut self.stations[winner];
                let idx = rs.instruction().ok_or_else(|| {
                    Error::Internal(format!("{} is busy without an instruction", rs.name()))
                })?;
                rs.force_assign_unit(cycle, &mut self.units, &mut self.insts[idx])?;
            }
        }

        cycle.released = released;
        Ok(())
    }

    /// In-order commit of results written back in an earlier cycle.
    fn stage_commit(&mut self, cycle: &mut Cycle) {
        let mut committed = 0;
        while committed < self.timing.commit_width
            && self.next_commit < self.insts.len()
            && self.insts[self.next_commit].written_back_before(cycle.now)
        {
            self.insts[self.next_commit].times.commit = Some(cycle.now);
            cycle.record(Event::Committed {
                instruction: self.next_commit,
            });
            self.next_commit += 1;
            committed += 1;
        }
    }

    /// Issues in program order. An instruction without a free station
    /// stays at the head of the queue and blocks everything behind it.
    fn stage_issue(&mut self, cycle: &mut Cycle) -> Result<()> {
        let mut issued = 0;

        while issued < self.timing.issue_width {
            let idx = match self.pending.front() {
                Some(&idx) => idx,
                None => break,
            };

            let op = &self.insts[idx].op;
            let cat = *self
                .routing
                .get(op)
                .ok_or_else(|| ConfigError::UnroutedOpcode(op.clone()))?;
            let free = self.categories[cat]
                .slots
                .clone()
                .find(|&slot| !self.stations[slot].is_busy());

            match free {
                Some(slot) => {
                    self.pending.pop_front();
                    self.stalled = None;
                    self.issue(idx, slot, cycle)?;
                    issued += 1;
                }
                None => {
                    self.stalled = Some(idx);
                    cycle.record(Event::Stalled {
                        instruction: idx,
                        category: self.categories[cat].name.clone(),
                    });
                    break;
                }
            }
        }
        Ok(())
    }

    fn issue(&mut self, idx: usize, slot: usize, cycle: &mut Cycle) -> Result<()> {
        let inst = &mut self.insts[idx];
        let exec_duration = *self
            .durations
            .get(&inst.op)
            .ok_or_else(|| ConfigError::MissingDuration(inst.op.clone()))?;

        let rs = &mut self.stations[slot];
        rs.issue(
            idx,
            inst,
            cycle.now,
            self.timing.issue_duration,
            exec_duration,
            &self.rat,
        );
        if let Some(target) = rs.target() {
            self.rat.rename(target, Tag(slot));
        }

        cycle.record(Event::Issued {
            instruction: idx,
            station: rs.name().to_owned(),
        });
        Ok(())
    }

    fn snapshot(&mut self, cycle: Cycle) {
        if self.trace.is_none() {
            return;
        }

        let name_of = |tag: Tag| {
            self.stations
                .get(tag.0)
                .map_or_else(|| format!("#{}", tag.0), |rs| rs.name().to_owned())
        };

        let stations = self
            .stations
            .iter()
            .filter_map(|rs| {
                let idx = rs.instruction()?;
                Some(StationSnapshot {
                    name: rs.name().to_owned(),
                    status: rs.status(),
                    instruction: idx,
                    summary: rs.describe(cycle.now, self.insts.get(idx), name_of),
                })
            })
            .collect();

        let registers = self
            .rat
            .bindings()
            .map(|(reg, entry)| {
                let value = match entry {
                    ValueOrTag::Value(token) => token.to_string(),
                    ValueOrTag::Tag(tag) => name_of(*tag),
                    ValueOrTag::Initial => String::new(),
                };
                (reg.to_owned(), value)
            })
            .collect();

        let units = self
            .units
            .iter()
            .map(|unit| UnitSnapshot {
                name: unit.name.clone(),
                available: unit.available,
                capacity: unit.capacity,
            })
            .collect();

        let entry = CycleTrace {
            cycle: cycle.now,
            events: cycle.events,
            stations,
            registers,
            units,
        };
        if let Some(trace) = &mut self.trace {
            trace.push(entry);
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn rat(&self) -> &RegisterAliasTable {
        &self.rat
    }

    pub fn stations(&self) -> &[ReservationStation] {
        &self.stations
    }

    pub fn station(&self, tag: Tag) -> Option<&ReservationStation> {
        self.stations.get(tag.0)
    }

    /// Tag of the station named `name`, e.g. `Add2`.
    pub fn tag_of(&self, name: &str) -> Option<Tag> {
        self.stations.iter().position(|rs| rs.name() == name).map(Tag)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn units(&self) -> &FunctionalUnits {
        &self.units
    }

    pub fn instructions(&self) -> &[Inst] {
        &self.insts
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn last_broadcast(&self) -> Option<u64> {
        self.last_broadcast
    }

    /// Instruction waiting at the head of the queue for a free station.
    pub fn stalled(&self) -> Option<usize> {
        self.stalled
    }

    pub fn trace(&self) -> Option<&[CycleTrace]> {
        self.trace.as_deref()
    }

    /// Source operands of a calculation station, for inspection.
    pub fn operands_of(&self, tag: Tag) -> Option<&Kind> {
        self.station(tag).map(ReservationStation::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{CategoryConfig, FunctionalUnitConfig, LoadConfig},
        rat::Value,
        reservation_station::Source,
    };

    fn machine() -> MachineConfig {
        MachineConfig {
            functional_units: vec![FunctionalUnitConfig::new("Adder", 1)],
            load: LoadConfig::new(2, &["LD"]),
            categories: vec![
                CategoryConfig::new("Add", 2, Some("Adder"), &["ADD", "SUB"]),
                CategoryConfig::new("Mult", 2, None, &["MUL", "DIV"]),
            ],
        }
    }

    fn durations() -> BTreeMap<String, u64> {
        [("LD", 5), ("ADD", 5), ("SUB", 5), ("MUL", 7)]
            .into_iter()
            .map(|(op, d)| (op.to_owned(), d))
            .collect()
    }

    fn registers() -> Vec<String> {
        (1..=8).map(|i| format!("R{i}")).collect()
    }

    fn loaded(code: &str) -> Scheduler {
        loaded_with(code, &durations())
    }

    fn loaded_with(code: &str, durations: &BTreeMap<String, u64>) -> Scheduler {
        let mut sched = Scheduler::configure(&machine()).unwrap();
        sched
            .load(code.parse().unwrap(), &registers(), durations, Timing::default())
            .unwrap();
        sched
    }

    #[test]
    fn station_layout() {
        let sched = Scheduler::configure(&machine()).unwrap();
        let names = sched.stations().iter().map(|rs| rs.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Load1", "Load2", "Add1", "Add2", "Mult1", "Mult2"]);
        assert_eq!(sched.tag_of("Add2"), Some(Tag(3)));
        assert_eq!(sched.categories()[1].slots, 2..4);
    }

    #[test]
    fn duplicate_opcode_is_rejected() {
        let mut cfg = machine();
        cfg.categories[1].opcodes.push("SUB".into());
        match Scheduler::configure(&cfg) {
            Err(Error::Config(ConfigError::DuplicateOpcode {
                opcode,
                first,
                second,
            })) => {
                assert_eq!(opcode, "SUB");
                assert_eq!(first, "Add");
                assert_eq!(second, "Mult");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn load_validates_program() {
        let mut sched = Scheduler::configure(&machine()).unwrap();
        let load = |sched: &mut Scheduler, code: &str| {
            sched.load(code.parse().unwrap(), &registers(), &durations(), Timing::default())
        };

        assert!(matches!(
            load(&mut sched, "NOP R1"),
            Err(Error::Config(ConfigError::UnroutedOpcode(op))) if op == "NOP"
        ));
        assert!(matches!(
            load(&mut sched, "DIV R1,R2,R3"),
            Err(Error::Config(ConfigError::MissingDuration(op))) if op == "DIV"
        ));
        assert!(matches!(
            load(&mut sched, "LD R1,R2"),
            Err(Error::InvalidOperands { .. })
        ));
        assert!(matches!(
            load(&mut sched, "ADD R1,R2,R9"),
            Err(Error::UndeclaredRegisters(regs)) if regs == vec!["R9".to_owned()]
        ));
        assert!(matches!(
            sched.run(),
            Err(Error::Config(ConfigError::NotLoaded))
        ));
    }

    #[test]
    fn issue_renames_destination() {
        let mut sched = loaded("LD R1,0(R2)\nADD R3,R4,R1");

        sched.step().unwrap();
        assert_eq!(sched.rat().get("R1"), Some(&ValueOrTag::Tag(Tag(0))));

        sched.step().unwrap();
        assert_eq!(sched.rat().get("R3"), Some(&ValueOrTag::Tag(Tag(2))));
        assert_eq!(
            sched.operands_of(Tag(2)),
            Some(&Kind::Calc {
                j: Some(Source::Value(Value::Reg("R4".into()))),
                k: Some(Source::Tag(Tag(0))),
            })
        );
    }

    #[test]
    fn broadcast_resolves_aliases() {
        let mut sched = loaded("LD R1,0(R2)\nADD R3,R4,R1");
        for _ in 0..7 {
            sched.step().unwrap();
        }

        assert_eq!(sched.last_broadcast(), Some(7));
        assert_eq!(sched.rat().get("R1"), Some(&ValueOrTag::Value(Token(1))));
        let add = sched.station(Tag(2)).unwrap();
        assert_eq!(add.status(), Status::WaitForFunctionalUnit);
        assert!(!add.waits_for_dependencies());

        sched.step().unwrap();
        assert_eq!(sched.station(Tag(2)).unwrap().status(), Status::ExecutionStarted);
        assert_eq!(sched.units().available("Adder"), Some(0));
    }

    #[test]
    fn trace_records_every_cycle() {
        let mut sched = loaded("LD R1,0(R2)");
        sched.set_trace(true);
        let schedule = sched.run().unwrap();

        let trace = sched.trace().unwrap();
        assert_eq!(trace.len() as u64, schedule.cycles_taken);
        assert!(matches!(trace[0].events[..], [Event::Issued { instruction: 0, .. }]));
        assert_eq!(trace[0].registers, vec![("R1".to_owned(), "Load1".to_owned())]);
        assert_eq!(trace[6].registers, vec![("R1".to_owned(), "v1".to_owned())]);
    }

    #[test]
    fn sources_bind_to_the_newest_writer() {
        // Add1 and Mult1 both write R1; Mult1 sits in the later slot range
        // but Add1 holds the older instruction.
        let mut sched = loaded("ADD R1,R2,R3\nMUL R1,R4,R5\nSUB R4,R1,R6");
        for _ in 0..3 {
            sched.step().unwrap();
        }

        assert_eq!(sched.station(Tag(2)).unwrap().target(), Some("R1"));
        assert_eq!(
            sched.operands_of(Tag(3)),
            Some(&Kind::Calc {
                j: Some(Source::Tag(Tag(4))),
                k: Some(Source::Value(Value::Reg("R6".into()))),
            })
        );

        let schedule = sched.run().unwrap();
        let (_, _, _, add_wb, _) = schedule.rows[0].cycles();
        let (_, _, _, mul_wb, _) = schedule.rows[1].cycles();
        let (_, _, sub_ex, _, _) = schedule.rows[2].cycles();
        assert!(add_wb < mul_wb);
        assert_eq!(sub_ex, mul_wb + 1);
    }

    #[test]
    fn unit_released_as_operands_arrive_is_not_taken() {
        let mut durations = durations();
        durations.insert("LD".into(), 6);
        let mut sched = loaded_with("LD R1,0(R2)\nADD R3,R4,R5\nADD R6,R1,R7", &durations);
        sched.set_trace(true);

        // Cycle 8: Load1 broadcasts R1 while Add1 frees the only adder.
        for _ in 0..8 {
            sched.step().unwrap();
        }
        let add2 = sched.station(Tag(3)).unwrap();
        assert_eq!(add2.status(), Status::WaitForFunctionalUnit);
        assert!(add2.became_ready_at(8));
        assert_eq!(sched.units().available("Adder"), Some(1));
        let events = &sched.trace().unwrap()[7].events;
        assert!(!events.iter().any(|e| matches!(e, Event::UnitAssigned { .. })));

        sched.step().unwrap();
        assert_eq!(sched.station(Tag(3)).unwrap().status(), Status::ExecutionStarted);

        let schedule = sched.run().unwrap();
        let rows = schedule.rows.iter().map(|row| row.cycles()).collect::<Vec<_>>();
        assert_eq!(rows, vec![(1, 1, 2, 8, 9), (2, 2, 3, 8, 10), (3, 3, 9, 14, 15)]);
    }

    #[test]
    fn long_latency_runs_to_completion() {
        let mut durations = durations();
        durations.insert("LD".into(), 1_000_000);
        let mut sched = loaded_with("LD R1,0(R2)", &durations);

        let schedule = sched.run().unwrap();
        assert_eq!(schedule.rows[0].cycles(), (1, 1, 2, 1_000_002, 1_000_003));
        assert_eq!(schedule.cycles_taken, 1_000_003);
    }

    #[test]
    fn empty_program_takes_no_cycles() {
        let mut sched = loaded("");
        let schedule = sched.run().unwrap();
        assert_eq!(schedule.cycles_taken, 0);
        assert!(schedule.rows.is_empty());
    }
}
