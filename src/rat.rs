use crate::reservation_station::Tag;
use hashbrown::HashMap;
use serde::Serialize;
use std::fmt;

/// A result published on the common data bus. Results are symbolic; the
/// simulator schedules, it does not compute.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Token(pub u64);

/// An operand value that is available to a reservation station.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Value {
    /// The architectural contents of a register nobody is about to overwrite.
    Reg(String),
    Result(Token),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValueOrTag {
    /// No value has been produced for the register during this run.
    Initial,
    Value(Token),
    Tag(Tag),
}

#[derive(Debug, Clone, Default)]
pub struct RegisterAliasTable {
    regs: Vec<(String, ValueOrTag)>,
    index: HashMap<String, usize>,
}

impl RegisterAliasTable {
    pub fn new<S: AsRef<str>>(registers: &[S]) -> Self {
        let mut rat = Self::default();
        for reg in registers {
            let reg = reg.as_ref();
            if !rat.index.contains_key(reg) {
                rat.index.insert(reg.to_owned(), rat.regs.len());
                rat.regs.push((reg.to_owned(), ValueOrTag::Initial));
            }
        }
        rat
    }

    pub fn reset(&mut self) {
        for (_, entry) in &mut self.regs {
            *entry = ValueOrTag::Initial;
        }
    }

    pub fn contains(&self, reg: &str) -> bool {
        self.index.contains_key(reg)
    }

    pub fn get(&self, reg: &str) -> Option<&ValueOrTag> {
        self.index.get(reg).map(|&i| &self.regs[i].1)
    }

    /// Resolves a source register: either a value available now, or the tag of
    /// the station that will produce it.
    pub fn read(&self, reg: &str) -> Result<Value, Tag> {
        match self.get(reg) {
            Some(ValueOrTag::Tag(tag)) => Err(*tag),
            Some(ValueOrTag::Value(token)) => Ok(Value::Result(*token)),
            Some(ValueOrTag::Initial) | None => Ok(Value::Reg(reg.to_owned())),
        }
    }

    /// Makes `tag` the producer of `reg`. Earlier readers keep whatever they
    /// already captured.
    pub fn rename(&mut self, reg: &str, tag: Tag) {
        match self.index.get(reg) {
            Some(&i) => self.regs[i].1 = ValueOrTag::Tag(tag),
            None => debug_assert!(false, "renamed undeclared register {reg}"),
        }
    }

    /// Replaces every alias of `tag` with the broadcast result.
    pub fn broadcast(&mut self, tag: Tag, token: Token) -> usize {
        let mut updated = 0;
        for (_, entry) in &mut self.regs {
            if *entry == ValueOrTag::Tag(tag) {
                *entry = ValueOrTag::Value(token);
                updated += 1;
            }
        }
        updated
    }

    /// All registers in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueOrTag)> {
        self.regs.iter().map(|(reg, entry)| (reg.as_str(), entry))
    }

    /// Registers that no longer hold their initial marker.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &ValueOrTag)> {
        self.iter().filter(|(_, entry)| **entry != ValueOrTag::Initial)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Reg(reg) => f.write_str(reg),
            Value::Result(token) => token.fmt(f),
        }
    }
}
