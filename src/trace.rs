use crate::{rat::Token, reservation_station::Status};
use serde::Serialize;
use std::fmt;

/// Something the scheduler did during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Event {
    Issued {
        instruction: usize,
        station: String,
    },
    /// No station of the category was free.
    Stalled {
        instruction: usize,
        category: String,
    },
    WaitingForUnit {
        station: String,
        unit: String,
    },
    ExecutionStarted {
        station: String,
        instruction: usize,
    },
    /// A released unit handed to the oldest of `contenders`.
    UnitAssigned {
        unit: String,
        station: String,
        contenders: Vec<String>,
    },
    Broadcast {
        station: String,
        token: Token,
    },
    Committed {
        instruction: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationSnapshot {
    pub name: String,
    pub status: Status,
    pub instruction: usize,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSnapshot {
    pub name: String,
    pub available: usize,
    pub capacity: usize,
}

/// Machine state at the end of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleTrace {
    pub cycle: u64,
    pub events: Vec<Event>,
    /// Busy stations only.
    pub stations: Vec<StationSnapshot>,
    /// Alias-table entries that no longer hold their initial marker.
    pub registers: Vec<(String, String)>,
    pub units: Vec<UnitSnapshot>,
}

impl Event {
    pub fn station(&self) -> Option<&str> {
        match self {
            Event::Issued { station, .. }
            | Event::WaitingForUnit { station, .. }
            | Event::ExecutionStarted { station, .. }
            | Event::UnitAssigned { station, .. }
            | Event::Broadcast { station, .. } => Some(station),
            Event::Stalled { .. } | Event::Committed { .. } => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Issued {
                instruction,
                station,
            } => write!(f, "Adding instruction {} to {station}", instruction + 1),
            Event::Stalled {
                instruction,
                category,
            } => write!(
                f,
                "Instruction {} stalled: no free {category} station",
                instruction + 1
            ),
            Event::WaitingForUnit { station, unit } => {
                write!(f, "{station} waiting for functional unit {unit}")
            }
            Event::ExecutionStarted {
                station,
                instruction,
            } => write!(f, "{station} executing instruction {}", instruction + 1),
            Event::UnitAssigned {
                unit,
                station,
                contenders,
            } => write!(
                f,
                "{unit} assigned to {station} (contenders: {})",
                contenders.join(", ")
            ),
            Event::Broadcast { station, token } => {
                write!(f, "Writing value to CDB: {station}->{token}")
            }
            Event::Committed { instruction } => write!(f, "Committing instruction {}", instruction + 1),
        }
    }
}

impl fmt::Display for CycleTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CYCLE: {}", self.cycle)?;

        writeln!(f, "EVENTS:")?;
        for event in &self.events {
            writeln!(f, "  {event}")?;
        }

        writeln!(f, "RESERVATION STATIONS:")?;
        for station in &self.stations {
            writeln!(f, "  {}", station.summary)?;
        }

        writeln!(f, "REGISTERS:")?;
        for (reg, value) in &self.registers {
            writeln!(f, "  {reg}: {value}")?;
        }

        if !self.units.is_empty() {
            writeln!(f, "FUNCTIONAL UNITS:")?;
            for unit in &self.units {
                writeln!(f, "  {}: {}/{} free", unit.name, unit.available, unit.capacity)?;
            }
        }

        Ok(())
    }
}
