use crate::{
    error::{Error, Result},
    inst::Inst,
};
use std::{collections::BTreeSet, str::FromStr};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub insts: Vec<Inst>,
}

impl FromStr for Program {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut insts = Vec::default();

        for (i, line) in s.lines().enumerate() {
            // Strip comments and empty lines
            let line = line.trim();
            let line = &line[..line.find(&[';', '#']).unwrap_or(line.len())];
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Line numbers start at 1
            let i = i + 1;

            match Inst::from_str(line) {
                Ok(inst) => insts.push(inst),
                Err(e) => {
                    return Err(Error::Parse {
                        line: i,
                        msg: format!("error parsing instruction '{line}': {e}"),
                    })
                }
            }
        }

        Ok(Program { insts })
    }
}

impl Program {
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn used_registers(&self) -> BTreeSet<&str> {
        self.insts.iter().flat_map(Inst::used_registers).collect()
    }

    /// Fails with every register the program references but `declared` lacks.
    pub fn check_registers<S: AsRef<str>>(&self, declared: &[S]) -> Result<()> {
        let undeclared = self
            .used_registers()
            .into_iter()
            .filter(|reg| !declared.iter().any(|d| d.as_ref() == *reg))
            .map(str::to_owned)
            .collect::<Vec<_>>();

        if undeclared.is_empty() {
            Ok(())
        } else {
            Err(Error::UndeclaredRegisters(undeclared))
        }
    }

    pub fn opcodes(&self) -> BTreeSet<&str> {
        self.insts.iter().map(|inst| inst.op.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXTBOOK: &str = "
        LD R1,0(R2)
        ADD R3,R4,R1
        SUB R5,R4,R1
        MUL R5,R4,R8
    ";

    #[test]
    fn parses_lines_in_order() {
        let prog = TEXTBOOK.parse::<Program>().unwrap();
        let ops = prog.insts.iter().map(|i| i.op.as_str()).collect::<Vec<_>>();
        assert_eq!(ops, vec!["LD", "ADD", "SUB", "MUL"]);
    }

    #[test]
    fn skips_comments_and_crlf() {
        let prog = "; header\r\nLD R1,0(R2) ; load\r\n\r\n# note\r\nADD R3,R1,R1\r\n"
            .parse::<Program>()
            .unwrap();
        assert_eq!(prog.len(), 2);
        assert_eq!(prog.insts[1].to_string(), "ADD R3, R1, R1");
    }

    #[test]
    fn reports_line_of_bad_instruction() {
        let err = "LD R1,0(R2)\n\nADD R1,,R2".parse::<Program>().unwrap_err();
        assert!(matches!(err, Error::Parse { line: 3, .. }), "{err}");
    }

    #[test]
    fn undeclared_registers_are_all_reported() {
        let prog = TEXTBOOK.parse::<Program>().unwrap();
        let declared = ["R1", "R2", "R3", "R4"];

        match prog.check_registers(&declared) {
            Err(Error::UndeclaredRegisters(regs)) => assert_eq!(regs, vec!["R5", "R8"]),
            other => panic!("unexpected result: {other:?}"),
        }

        let all = (1..=8).map(|i| format!("R{i}")).collect::<Vec<_>>();
        assert!(prog.check_registers(&all).is_ok());
    }

    #[test]
    fn opcodes_are_distinct() {
        let prog = "ADD R1,R2,R3\nADD R4,R5,R6\nLD R1,0(R2)".parse::<Program>().unwrap();
        assert_eq!(prog.opcodes().into_iter().collect::<Vec<_>>(), vec!["ADD", "LD"]);
    }
}
