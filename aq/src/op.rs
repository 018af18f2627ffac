use std::cmp::Ordering;
use std::fmt;

/// Operators.
///
/// Operands are slot addresses (see [`crate::instruction::Slot`]) unless
/// noted. When an operator produces a value the first operand is the
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    Nop = 0x00,

    /// Deprecated direct load. Dispatches as a no-op with a warning.
    Load = 0x01,

    /// Deprecated direct store. Dispatches as a no-op with a warning.
    Store = 0x02,

    /// Allocate a value.
    /// Operands: `dst`, `type`, optional `size`
    ///
    /// A `type` slot holding an assigned string names a class. Any other
    /// `type` slot is a prototype whose declared tag is allocated. A
    /// positive `size` allocates an aggregate of that many elements.
    New = 0x03,

    /// Make `dst` a reference to element `index` of the aggregate in `array`.
    /// Operands: `dst`, `array`, `index`
    Array = 0x04,

    /// Deprecated pointer materialization. Superseded by [`Refer`](Op::Refer).
    Ptr = 0x05,

    /// Operands: `dst`, `lhs`, `rhs`
    Add = 0x06,
    Sub = 0x07,
    Mul = 0x08,
    Div = 0x09,
    Rem = 0x0A,

    /// Operands: `dst`, `src`
    Neg = 0x0B,

    /// Operands: `dst`, `lhs`, `rhs`
    Shl = 0x0C,
    Shr = 0x0D,

    /// Make `dst` a reference to the object named by `src`.
    /// Operands: `dst`, `src`
    Refer = 0x0E,

    /// Conditional branch.
    /// Operands: `cond`, `then:offset`, `else:offset`
    If = 0x0F,

    /// Operands: `dst`, `lhs`, `rhs`
    And = 0x10,
    Or = 0x11,
    Xor = 0x12,

    /// Ordered comparison writing a byte 0/1.
    /// Operands: `dst`, `relation:raw`, `lhs`, `rhs`
    Cmp = 0x13,

    /// Call a user function or builtin by name.
    /// Operands: `name`, `ret`, `args...`
    Invoke = 0x14,

    /// Value assignment through references, across arenas.
    /// Operands: `dst`, `src`
    Equal = 0x15,

    /// Unconditional jump.
    /// Operands: `target:offset`
    Goto = 0x16,

    /// Operands: `dst`, `constant:raw`
    LoadConst = 0x17,

    /// Copy `src` into `dst` converting to `dst`'s declared type.
    /// Operands: `dst`, `src`
    Convert = 0x18,

    /// Write `dst` once from `src` and mark it const.
    /// Operands: `dst`, `src`
    Const = 0x19,

    /// Call a method on a class instance, binding `this`.
    /// Operands: `object`, `name`, `ret`, `args...`
    InvokeMethod = 0x1A,

    /// Make `dst` a reference to a member slot of an instance.
    /// Operands: `dst`, `object`, `name`
    LoadMember = 0x1B,

    /// Prefix reserved for widening the operand encoding.
    Wide = 0xFF,
}

impl Op {
    pub const ALL: [Op; 29] = [
        Op::Nop,
        Op::Load,
        Op::Store,
        Op::New,
        Op::Array,
        Op::Ptr,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Rem,
        Op::Neg,
        Op::Shl,
        Op::Shr,
        Op::Refer,
        Op::If,
        Op::And,
        Op::Or,
        Op::Xor,
        Op::Cmp,
        Op::Invoke,
        Op::Equal,
        Op::Goto,
        Op::LoadConst,
        Op::Convert,
        Op::Const,
        Op::InvokeMethod,
        Op::LoadMember,
        Op::Wide,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Nop => "NOP",
            Op::Load => "LOAD",
            Op::Store => "STORE",
            Op::New => "NEW",
            Op::Array => "ARRAY",
            Op::Ptr => "PTR",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Rem => "REM",
            Op::Neg => "NEG",
            Op::Shl => "SHL",
            Op::Shr => "SHR",
            Op::Refer => "REFER",
            Op::If => "IF",
            Op::And => "AND",
            Op::Or => "OR",
            Op::Xor => "XOR",
            Op::Cmp => "CMP",
            Op::Invoke => "INVOKE",
            Op::Equal => "EQUAL",
            Op::Goto => "GOTO",
            Op::LoadConst => "LOAD_CONST",
            Op::Convert => "CONVERT",
            Op::Const => "CONST",
            Op::InvokeMethod => "INVOKE_METHOD",
            Op::LoadMember => "LOAD_MEMBER",
            Op::Wide => "WIDE",
        }
    }

    /// Exact operand count, or `None` for operators with variable arity.
    pub fn arity(self) -> Option<usize> {
        match self {
            Op::Nop | Op::Wide => Some(0),
            Op::Goto => Some(1),
            Op::Neg | Op::Refer | Op::Equal | Op::LoadConst | Op::Convert | Op::Const => {
                Some(2)
            }
            Op::Array
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Rem
            | Op::Shl
            | Op::Shr
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::If
            | Op::LoadMember => Some(3),
            Op::Cmp => Some(4),
            Op::Load | Op::Store | Op::Ptr | Op::New | Op::Invoke | Op::InvokeMethod => None,
        }
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Op::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == byte)
            .ok_or(byte)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Relation embedded as the last operand of [`Op::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Relation {
    Eq = 0,
    Ne = 1,
    Gt = 2,
    Ge = 3,
    Lt = 4,
    Le = 5,
}

impl Relation {
    /// `None` stands for unordered operands, which only satisfy `Ne`.
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        let Some(ordering) = ordering else {
            return self == Relation::Ne;
        };
        match self {
            Relation::Eq => ordering == Ordering::Equal,
            Relation::Ne => ordering != Ordering::Equal,
            Relation::Gt => ordering == Ordering::Greater,
            Relation::Ge => ordering != Ordering::Less,
            Relation::Lt => ordering == Ordering::Less,
            Relation::Le => ordering != Ordering::Greater,
        }
    }
}

impl TryFrom<u64> for Relation {
    type Error = u64;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Relation::Eq,
            1 => Relation::Ne,
            2 => Relation::Gt,
            3 => Relation::Ge,
            4 => Relation::Lt,
            5 => Relation::Le,
            other => return Err(other),
        })
    }
}
