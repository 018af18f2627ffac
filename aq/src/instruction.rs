use std::fmt;

use crate::op::Op;

/// Set on an operand that addresses the global arena.
pub const GLOBAL_BIT: u64 = 1 << 63;

/// Decoded slot operand: an index into the current frame arena or into the
/// global arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Frame(usize),
    Global(usize),
}

impl Slot {
    pub fn encode(self) -> u64 {
        match self {
            Slot::Frame(index) => index as u64,
            Slot::Global(index) => index as u64 | GLOBAL_BIT,
        }
    }

    pub fn decode(raw: u64) -> Self {
        if raw & GLOBAL_BIT != 0 {
            Slot::Global((raw & !GLOBAL_BIT) as usize)
        } else {
            Slot::Frame(raw as usize)
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Frame(index) => write!(f, "r{index}"),
            Slot::Global(index) => write!(f, "g{index}"),
        }
    }
}

impl From<Slot> for u64 {
    fn from(slot: Slot) -> u64 {
        slot.encode()
    }
}

/// One operator plus its operand list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub operands: Vec<u64>,
}

impl Instruction {
    pub fn new(op: Op, operands: Vec<u64>) -> Self {
        Self { op, operands }
    }

    pub fn nop() -> Self {
        Self::new(Op::Nop, Vec::new())
    }

    pub fn goto(target: usize) -> Self {
        Self::new(Op::Goto, vec![target as u64])
    }

    pub fn branch(condition: Slot, then: usize, otherwise: usize) -> Self {
        Self::new(
            Op::If,
            vec![condition.encode(), then as u64, otherwise as u64],
        )
    }

    pub fn unary(op: Op, dst: Slot, src: Slot) -> Self {
        Self::new(op, vec![dst.encode(), src.encode()])
    }

    pub fn binary(op: Op, dst: Slot, lhs: Slot, rhs: Slot) -> Self {
        Self::new(op, vec![dst.encode(), lhs.encode(), rhs.encode()])
    }

    pub fn load_const(dst: Slot, constant: usize) -> Self {
        Self::new(Op::LoadConst, vec![dst.encode(), constant as u64])
    }

    /// Operand positions that hold instruction offsets rather than slots.
    pub fn target_positions(&self) -> &'static [usize] {
        match self.op {
            Op::Goto => &[0],
            Op::If => &[1, 2],
            _ => &[],
        }
    }

    fn is_raw(&self, position: usize) -> bool {
        match self.op {
            Op::LoadConst | Op::Cmp => position == 1,
            _ => false,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        let targets = self.target_positions();
        for (position, raw) in self.operands.iter().enumerate() {
            if targets.contains(&position) {
                write!(f, " @{raw}")?;
            } else if self.is_raw(position) {
                write!(f, " #{raw}")?;
            } else {
                write!(f, " {}", Slot::decode(*raw))?;
            }
        }
        Ok(())
    }
}
