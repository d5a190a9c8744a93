use crate::{
    config::FunctionalUnitConfig,
    error::{Error, Result},
};
use hashbrown::HashMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionalUnit {
    pub name: String,
    pub capacity: usize,
    pub available: usize,
    /// Number of times a unit of this pool was reserved during the run.
    pub utilisation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionalUnits {
    units: Vec<FunctionalUnit>,
    index: HashMap<String, usize>,
}

impl FunctionalUnit {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            available: capacity,
            utilisation: 0,
        }
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available
    }
}

impl FunctionalUnits {
    pub fn new(configs: &[FunctionalUnitConfig]) -> Self {
        let mut units = Self::default();
        for cfg in configs {
            units.index.insert(cfg.name.clone(), units.units.len());
            units.units.push(FunctionalUnit::new(&cfg.name, cfg.count));
        }
        units
    }

    pub fn reset(&mut self) {
        for unit in &mut self.units {
            unit.available = unit.capacity;
            unit.utilisation = 0;
        }
    }

    pub fn get(&self, name: &str) -> Option<&FunctionalUnit> {
        self.index.get(name).map(|&i| &self.units[i])
    }

    pub fn available(&self, name: &str) -> Option<usize> {
        self.get(name).map(|unit| unit.available)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionalUnit> {
        self.units.iter()
    }

    /// Reserves one unit of `name`, returning false when none is free.
    pub fn try_acquire(&mut self, name: &str) -> Result<bool> {
        let unit = self.get_mut(name)?;
        if unit.available == 0 {
            return Ok(false);
        }

        unit.available -= 1;
        unit.utilisation += 1;
        Ok(true)
    }

    pub fn release(&mut self, name: &str) -> Result<()> {
        let unit = self.get_mut(name)?;
        if unit.available == unit.capacity {
            return Err(Error::Internal(format!(
                "functional unit {name} released more often than reserved"
            )));
        }

        unit.available += 1;
        Ok(())
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut FunctionalUnit> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.units[i]),
            None => Err(Error::Internal(format!("unknown functional unit {name}"))),
        }
    }
}
