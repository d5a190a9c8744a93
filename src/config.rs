//! Machine configuration for the scheduler.
//!
//! [`MachineConfig`] describes the hardware: functional-unit pools, the load
//! reservation stations and the calculation categories with the opcodes each
//! one accepts. [`Timing`] holds the superscalar knobs applied when a program
//! is loaded. Both deserialize from JSON scenarios.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Name of the mandatory load reservation-station category.
pub const LOAD_CATEGORY: &str = "Load";

mod defaults {
    /// Instructions that may begin issue in one cycle.
    pub const ISSUE_WIDTH: usize = 1;

    /// Cycles an instruction spends in its issue window.
    pub const ISSUE_DURATION: u64 = 1;

    /// Instructions that may commit in one cycle.
    pub const COMMIT_WIDTH: usize = 1;

    pub fn issue_width() -> usize {
        ISSUE_WIDTH
    }

    pub fn issue_duration() -> u64 {
        ISSUE_DURATION
    }

    pub fn commit_width() -> usize {
        COMMIT_WIDTH
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalUnitConfig {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    pub stations: usize,
    #[serde(default)]
    pub opcodes: Vec<String>,
}

/// A pool of calculation reservation stations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    pub stations: usize,
    /// Functional unit a station must reserve before it can execute.
    #[serde(default)]
    pub functional_unit: Option<String>,
    #[serde(default)]
    pub opcodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub functional_units: Vec<FunctionalUnitConfig>,
    pub load: LoadConfig,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    #[serde(default = "defaults::issue_width")]
    pub issue_width: usize,
    #[serde(default = "defaults::issue_duration")]
    pub issue_duration: u64,
    #[serde(default = "defaults::commit_width")]
    pub commit_width: usize,
}

impl FunctionalUnitConfig {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

impl LoadConfig {
    pub fn new(stations: usize, opcodes: &[&str]) -> Self {
        Self {
            stations,
            opcodes: opcodes.iter().map(|&op| op.to_owned()).collect(),
        }
    }
}

impl CategoryConfig {
    pub fn new(name: impl Into<String>, stations: usize, functional_unit: Option<&str>, opcodes: &[&str]) -> Self {
        Self {
            name: name.into(),
            stations,
            functional_unit: functional_unit.map(str::to_owned),
            opcodes: opcodes.iter().map(|&op| op.to_owned()).collect(),
        }
    }
}

impl MachineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut unit_names = HashSet::new();
        for unit in &self.functional_units {
            if !unit_names.insert(unit.name.as_str()) {
                return Err(ConfigError::DuplicateFunctionalUnit(unit.name.clone()));
            }
            if unit.count == 0 {
                return Err(ConfigError::ZeroCapacity(unit.name.clone()));
            }
        }

        if self.load.stations == 0 {
            return Err(ConfigError::EmptyCategory(LOAD_CATEGORY.to_owned()));
        }

        let mut category_names = HashSet::from([LOAD_CATEGORY]);
        for cat in &self.categories {
            if !category_names.insert(cat.name.as_str()) {
                return Err(ConfigError::DuplicateCategory(cat.name.clone()));
            }
            if cat.stations == 0 {
                return Err(ConfigError::EmptyCategory(cat.name.clone()));
            }
            if let Some(unit) = &cat.functional_unit {
                if !unit_names.contains(unit.as_str()) {
                    return Err(ConfigError::UnknownFunctionalUnit(unit.clone()));
                }
            }
        }

        Ok(())
    }
}

impl Timing {
    pub fn new(issue_width: usize, issue_duration: u64, commit_width: usize) -> Self {
        Self {
            issue_width,
            issue_duration,
            commit_width,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issue_width == 0 {
            return Err(ConfigError::ZeroKnob("issue width"));
        }
        if self.issue_duration == 0 {
            return Err(ConfigError::ZeroKnob("issue duration"));
        }
        if self.commit_width == 0 {
            return Err(ConfigError::ZeroKnob("commit width"));
        }
        Ok(())
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new(
            defaults::ISSUE_WIDTH,
            defaults::ISSUE_DURATION,
            defaults::COMMIT_WIDTH,
        )
    }
}
