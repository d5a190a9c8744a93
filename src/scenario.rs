//! Scenario files: a machine, its timing knobs, execution durations, the
//! declared registers and a program.
//!
//! The text format is a sequence of blocks separated by blank lines. The first
//! `#` comment of a block names it; any further comments are ignored.
//!
//! ```text
//! #main
//! issuesPerCycle=1
//! commitsPerCycle=1
//!
//! #functional units
//! #<name>,<count>
//! Adder,1
//!
//! #reservation stations
//! #<name>,<count>[,<functional unit>]
//! Load,2
//! Add,2,Adder
//! Mult,2
//!
//! #commands
//! #<command>,<duration>,<reservation station>
//! LD,5,Load
//! ADD,5,Add
//!
//! #registers
//! R1-R5,R8
//!
//! #code
//! LD R1,0(R2)
//! ADD R3,R4,R1
//! ```
//!
//! The same data can be given as JSON, see [`Scenario::from_json`].

use crate::{
    config::{CategoryConfig, FunctionalUnitConfig, LoadConfig, MachineConfig, Timing, LOAD_CATEGORY},
    error::{ConfigError, Error, Result},
    program::Program,
    scheduler::Scheduler,
    util::{expand_register_list, tokens},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub machine: MachineConfig,
    #[serde(default)]
    pub timing: Timing,
    /// Execution cycles per opcode.
    pub durations: BTreeMap<String, u64>,
    /// Register names, possibly in range notation.
    pub registers: Vec<String>,
    pub program: String,
}

struct Block<'a> {
    name: String,
    line: usize,
    lines: Vec<(usize, &'a str)>,
}

fn blocks(s: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    let mut name = None;
    let mut lines = Vec::new();

    for (i, line) in s.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            if !lines.is_empty() {
                end_block(&mut blocks, &mut name, &mut lines);
            }
        } else if let Some(comment) = line.strip_prefix('#') {
            if name.is_none() && lines.is_empty() {
                name = Some((i + 1, comment.trim().to_ascii_lowercase()));
            }
        } else {
            lines.push((i + 1, line));
        }
    }
    end_block(&mut blocks, &mut name, &mut lines);

    blocks
}

fn end_block<'a>(
    blocks: &mut Vec<Block<'a>>,
    name: &mut Option<(usize, String)>,
    lines: &mut Vec<(usize, &'a str)>,
) {
    match name.take() {
        Some((line, name)) if !lines.is_empty() => blocks.push(Block {
            name,
            line,
            lines: std::mem::take(lines),
        }),
        Some((_, name)) => tracing::debug!(section = %name, "skipping empty section"),
        None if !lines.is_empty() => {
            tracing::debug!(lines = lines.len(), "skipping unnamed section")
        }
        None => {}
    }
    lines.clear();
}

fn scenario_err(line: usize, msg: impl Into<String>) -> Error {
    Error::Scenario {
        line,
        msg: msg.into(),
    }
}

fn number<T: FromStr>(line: usize, what: &str, s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| scenario_err(line, format!("invalid {what}: '{s}'")))
}

/// Splits a `name,count[,...]` line, checking the number of fields.
fn fields(line: usize, s: &str, min: usize, max: usize) -> Result<Vec<&str>> {
    let fields = tokens(s);
    if fields.len() < min || fields.len() > max || fields.iter().any(|f| f.is_empty()) {
        return Err(scenario_err(line, format!("malformed line: '{s}'")));
    }
    Ok(fields)
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut timing = Timing::default();
        let mut functional_units = Vec::new();
        let mut stations: Vec<(String, usize, Option<String>)> = Vec::new();
        let mut commands: Vec<(usize, String, String)> = Vec::new();
        let mut durations = BTreeMap::new();
        let mut registers = Vec::new();
        let mut program = None;
        let mut seen = Vec::new();

        for block in blocks(s) {
            if seen.contains(&block.name) {
                return Err(scenario_err(block.line, format!("duplicate section '{}'", block.name)));
            }
            seen.push(block.name.clone());

            match block.name.as_str() {
                "main" => {
                    for &(line, text) in &block.lines {
                        let (key, value) = text
                            .split_once('=')
                            .ok_or_else(|| scenario_err(line, format!("expected key=value: '{text}'")))?;
                        let (key, value) = (key.trim(), value.trim());
                        match key {
                            "issuesPerCycle" => timing.issue_width = number(line, key, value)?,
                            "issueDuration" => timing.issue_duration = number(line, key, value)?,
                            "commitsPerCycle" => timing.commit_width = number(line, key, value)?,
                            "writeBacksPerCycle" => {
                                number::<usize>(line, key, value)?;
                                tracing::warn!(line, "writeBacksPerCycle is not modelled and is ignored")
                            }
                            _ => tracing::warn!(line, key, "ignoring unknown setting"),
                        }
                    }
                }
                "functional units" => {
                    for &(line, text) in &block.lines {
                        let f = fields(line, text, 2, 2)?;
                        functional_units.push(FunctionalUnitConfig::new(f[0], number(line, "count", f[1])?));
                    }
                }
                "reservation stations" => {
                    for &(line, text) in &block.lines {
                        let f = fields(line, text, 2, 3)?;
                        if stations.iter().any(|(name, ..)| name == f[0]) {
                            return Err(ConfigError::DuplicateCategory(f[0].to_owned()).into());
                        }
                        if f[0] == LOAD_CATEGORY && f.len() == 3 {
                            return Err(scenario_err(
                                line,
                                format!("'{LOAD_CATEGORY}' stations take no functional unit"),
                            ));
                        }
                        stations.push((
                            f[0].to_owned(),
                            number(line, "count", f[1])?,
                            f.get(2).map(|&unit| unit.to_owned()),
                        ));
                    }
                }
                "commands" => {
                    for &(line, text) in &block.lines {
                        let f = fields(line, text, 3, 3)?;
                        if durations
                            .insert(f[0].to_owned(), number(line, "duration", f[1])?)
                            .is_some()
                        {
                            return Err(scenario_err(line, format!("command '{}' listed twice", f[0])));
                        }
                        commands.push((line, f[0].to_owned(), f[2].to_owned()));
                    }
                }
                "registers" => {
                    for &(line, text) in &block.lines {
                        registers.extend(expand_register_list(text).map_err(|e| scenario_err(line, e))?);
                    }
                }
                "code" => {
                    let code = block.lines.iter().map(|&(_, text)| text).collect::<Vec<_>>();
                    program = Some(code.join("\n"));
                }
                other => tracing::warn!(section = other, "ignoring unknown section"),
            }
        }

        let program = program.ok_or_else(|| scenario_err(0, "missing section 'code'"))?;

        let load = match stations.iter().position(|(name, ..)| name == LOAD_CATEGORY) {
            Some(i) => stations.remove(i),
            None => return Err(ConfigError::MissingLoadCategory.into()),
        };

        let mut load = LoadConfig::new(load.1, &[]);
        let mut categories = stations
            .into_iter()
            .map(|(name, count, unit)| CategoryConfig {
                name,
                stations: count,
                functional_unit: unit,
                opcodes: Vec::new(),
            })
            .collect::<Vec<_>>();

        for (_, op, category) in commands {
            if category == LOAD_CATEGORY {
                load.opcodes.push(op);
                continue;
            }
            match categories.iter_mut().find(|cat| cat.name == category) {
                Some(cat) => cat.opcodes.push(op),
                None => return Err(ConfigError::UnknownCategory(category).into()),
            }
        }

        Ok(Self {
            machine: MachineConfig {
                functional_units,
                load,
                categories,
            },
            timing,
            durations,
            registers,
            program,
        })
    }
}

impl Scenario {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Register names with ranges expanded, duplicates dropped.
    pub fn declared_registers(&self) -> Result<Vec<String>> {
        let mut regs = Vec::new();
        for entry in &self.registers {
            for reg in expand_register_list(entry).map_err(Error::Registers)? {
                if !regs.contains(&reg) {
                    regs.push(reg);
                }
            }
        }
        Ok(regs)
    }

    /// A scheduler configured for the machine with the program loaded.
    pub fn build(&self) -> Result<Scheduler> {
        let mut scheduler = Scheduler::configure(&self.machine)?;
        let program = self.program.parse::<Program>()?;
        scheduler.load(program, &self.declared_registers()?, &self.durations, self.timing)?;
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEXTBOOK: &str = "
#main
issuesPerCycle=1
commitsPerCycle=1
writeBacksPerCycle=1

#functional units
#<name>,<count>
Adder,1

#reservation stations
#('Load' must be always included)
#<name>,<count>[,<functional unit>]
Load,2
Add,2,Adder
Mult,2


#commands
#<command>,<duration>,<reservation station>
LD,5,Load
ADD,5,Add
SUB,5,Add
MUL,7,Mult

#registers
R1-R5,R8

#code
LD R1,0(R2)
ADD R3,R4,R1
SUB R5,R4,R1
MUL R5,R4,R8
";

    #[test]
    fn reads_textbook_scenario() {
        let scenario = TEXTBOOK.parse::<Scenario>().unwrap();

        assert_eq!(
            scenario.machine,
            MachineConfig {
                functional_units: vec![FunctionalUnitConfig::new("Adder", 1)],
                load: LoadConfig::new(2, &["LD"]),
                categories: vec![
                    CategoryConfig::new("Add", 2, Some("Adder"), &["ADD", "SUB"]),
                    CategoryConfig::new("Mult", 2, None, &["MUL"]),
                ],
            }
        );
        assert_eq!(scenario.timing, Timing::default());
        assert_eq!(scenario.durations["MUL"], 7);
        assert_eq!(scenario.registers, vec!["R1", "R2", "R3", "R4", "R5", "R8"]);
        assert_eq!(scenario.program.lines().count(), 4);
    }

    #[test]
    fn later_comments_do_not_rename_a_block() {
        let scenario = "#registers\n# ignored\nR1,R2\n\n#reservation stations\nLoad,1\n\n#code\n"
            .parse::<Scenario>();
        // The code block is empty and therefore skipped.
        assert!(matches!(scenario, Err(Error::Scenario { line: 0, .. })));

        let scenario = "#registers\n# ignored\nR1,R2\n\n#reservation stations\nLoad,1\n\n#code\nLD R1,0(R2)\n"
            .parse::<Scenario>()
            .unwrap();
        assert_eq!(scenario.registers, vec!["R1", "R2"]);
    }

    #[test]
    fn reports_bad_lines() {
        let err = "#reservation stations\nLoad,two\n\n#code\nLD R1,0(R2)"
            .parse::<Scenario>()
            .unwrap_err();
        assert!(matches!(err, Error::Scenario { line: 2, .. }), "{err}");

        let err = "#reservation stations\nLoad,1\n\n#commands\nLD,5,Load\nADD,1,Add\n\n#code\nLD R1,0(R2)"
            .parse::<Scenario>()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::UnknownCategory(c)) if c == "Add"));

        let err = "#reservation stations\nAdd,1\n\n#code\nADD R1,R2,R3"
            .parse::<Scenario>()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingLoadCategory)));

        let err = "#functional units\nMem,1\n\n#reservation stations\nLoad,2,Mem\n\n#code\nLD R1,0(R2)"
            .parse::<Scenario>()
            .unwrap_err();
        assert!(matches!(err, Error::Scenario { line: 5, .. }), "{err}");
    }

    #[test]
    fn json_scenario_expands_ranges() {
        let json = r#"{
            "machine": {
                "load": { "stations": 1, "opcodes": ["LD"] },
                "categories": [{ "name": "Add", "stations": 1, "opcodes": ["ADD"] }]
            },
            "durations": { "LD": 2, "ADD": 1 },
            "registers": ["R1-3", "R2"],
            "program": "LD R1,0(R2)\nADD R3,R1,R1"
        }"#;
        let scenario = Scenario::from_json(json).unwrap();
        assert_eq!(scenario.timing, Timing::default());
        assert_eq!(scenario.declared_registers().unwrap(), vec!["R1", "R2", "R3"]);

        let schedule = scenario.build().unwrap().run().unwrap();
        assert_eq!(schedule.rows.len(), 2);
    }
}
