use serde::Serialize;
use std::{fmt, str::FromStr};

/// A memory operand of the form `offset(base)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MemRef {
    pub offset: i64,
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Operand {
    Reg(String),
    Mem(MemRef),
}

/// Cycle stamps written as the instruction moves through the machine.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    pub issue: Option<u64>,
    pub issue_end: Option<u64>,
    pub execute: Option<u64>,
    pub write_back: Option<u64>,
    pub commit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub op: String,
    operands: Vec<Operand>,
    pub times: Timestamps,
}

impl Operand {
    /// The register this operand reads or writes. For a memory operand this
    /// is the base register.
    pub fn register(&self) -> &str {
        match self {
            Operand::Reg(reg) => reg,
            Operand::Mem(mem) => &mem.base,
        }
    }

    pub fn as_reg(&self) -> Option<&str> {
        match self {
            Operand::Reg(reg) => Some(reg),
            Operand::Mem(_) => None,
        }
    }

    pub fn as_mem(&self) -> Option<&MemRef> {
        match self {
            Operand::Mem(mem) => Some(mem),
            Operand::Reg(_) => None,
        }
    }
}

impl Inst {
    pub fn new(op: impl Into<String>, operands: Vec<Operand>) -> Self {
        debug_assert!(operands.len() <= 3);
        Self {
            op: op.into(),
            operands,
            times: Timestamps::default(),
        }
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn dst(&self) -> Option<&Operand> {
        self.operands.first()
    }

    pub fn src1(&self) -> Option<&Operand> {
        self.operands.get(1)
    }

    pub fn src2(&self) -> Option<&Operand> {
        self.operands.get(2)
    }

    pub fn used_registers(&self) -> impl Iterator<Item = &str> {
        self.operands.iter().map(Operand::register)
    }

    pub fn is_committed(&self) -> bool {
        self.times.commit.is_some()
    }

    /// Whether the result was written back strictly before `cycle`.
    pub fn written_back_before(&self, cycle: u64) -> bool {
        self.times.write_back.map_or(false, |wb| wb < cycle)
    }
}

impl FromStr for Inst {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, args) = s.split_once(char::is_whitespace).unwrap_or((s, ""));

        if op.is_empty() {
            return Err("missing opcode".to_owned());
        }

        let args = args.trim();
        let operands = if args.is_empty() {
            Vec::new()
        } else {
            args.split(',')
                .enumerate()
                .map(|(n, arg)| {
                    Operand::from_str(arg.trim()).map_err(|e| format!("operand {}: {e}", n + 1))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        if operands.len() > 3 {
            return Err(format!("too many operands ({}), at most 3", operands.len()));
        }

        Ok(Inst::new(op, operands))
    }
}

impl FromStr for Operand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.ends_with(')') {
            return MemRef::from_str(s).map(Operand::Mem);
        }

        if is_register_name(s) {
            Ok(Operand::Reg(s.to_owned()))
        } else {
            Err(format!("invalid register: '{s}'"))
        }
    }
}

impl FromStr for MemRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (offset, base) = s
            .strip_suffix(')')
            .and_then(|s| s.split_once('('))
            .ok_or_else(|| format!("invalid memory reference: '{s}'"))?;
        let (offset, base) = (offset.trim(), base.trim());

        let offset = offset
            .strip_prefix('+')
            .unwrap_or(offset)
            .parse::<i64>()
            .map_err(|_| format!("invalid offset in memory reference: '{s}'"))?;

        if !is_register_name(base) {
            return Err(format!("invalid base register in memory reference: '{s}'"));
        }

        Ok(MemRef {
            offset,
            base: base.to_owned(),
        })
    }
}

fn is_register_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

impl fmt::Display for MemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.offset, self.base)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => f.write_str(reg),
            Operand::Mem(mem) => mem.fmt(f),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.op)?;
        for (i, operand) in self.operands.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            operand.fmt(f)?;
        }
        Ok(())
    }
}
