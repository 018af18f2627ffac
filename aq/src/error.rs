//! Generation-time and execution-time errors.
//!
//! Generation errors abort compilation of the offending function and name
//! the construct that failed. Execution errors are fatal to the running
//! program: there is no guest-level recovery.

use thiserror::Error;

use crate::memory::ArenaId;
use crate::object::TypeTag;
use crate::op::Op;

/// Errors raised while lowering a syntax tree to bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    /// A goto whose label was never declared in a reachable scope of the
    /// same function.
    #[error("undefined label `{label}` in function `{function}`")]
    UndefinedLabel { label: String, function: String },

    #[error("unknown class `{0}`")]
    UnknownClass(String),

    #[error("class `{class}` has no member `{member}`")]
    UnknownMember { class: String, member: String },

    /// Neither a declared function nor a registered builtin.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("function `{0}` is declared twice")]
    DuplicateFunction(String),

    #[error("`break` outside of a loop in function `{0}`")]
    BreakOutsideLoop(String),

    #[error("`continue` outside of a loop in function `{0}`")]
    ContinueOutsideLoop(String),

    #[error("expression cannot be assigned to")]
    NotAssignable,

    /// An array declaration is sized or initialized, never both.
    #[error("array `{0}` has both a size and an initializer")]
    SizedInitializer(String),
}

/// Faults raised by the object store and the dispatch loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("index {index} out of bounds for arena {arena} of length {len}")]
    IndexOutOfBounds {
        arena: ArenaId,
        index: usize,
        len: usize,
    },

    /// The arena behind a handle was already torn down.
    #[error("dangling reference into released arena {0}")]
    DanglingReference(ArenaId),

    #[error("write to const slot {index} of arena {arena}")]
    ConstWrite { arena: ArenaId, index: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: TypeTag, found: TypeTag },

    #[error("operator {op} cannot be applied to {lhs} and {rhs}")]
    UnsupportedOperands { op: Op, lhs: TypeTag, rhs: TypeTag },

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("unknown class `{0}`")]
    UnknownClass(String),

    #[error("class `{class}` has no member `{member}`")]
    UnknownMember { class: String, member: String },

    #[error("class `{class}` has no method `{method}`")]
    UnknownMethod { class: String, method: String },

    #[error("constant {0} does not exist")]
    UnknownConstant(usize),

    #[error("{op} expects {expected} operands, got {found}")]
    BadOperands {
        op: Op,
        expected: usize,
        found: usize,
    },

    #[error("branch target {target} outside of function `{function}`")]
    BadBranchTarget { function: String, target: u64 },

    #[error("unknown comparison code {0}")]
    BadComparison(u64),

    #[error("invalid size or index {0}")]
    InvalidIndex(i64),

    #[error("aggregate of {requested} elements exceeds the limit of {limit}")]
    ElementLimit { requested: usize, limit: usize },

    #[error("function `{function}` takes {expected} arguments, got {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("integer division by zero")]
    DivisionByZero,

    #[error("integer overflow in {0}")]
    Overflow(Op),

    #[error("builtin `{name}` failed with status {status}")]
    BuiltinFailed { name: String, status: i64 },

    #[error("call depth exceeded {0}")]
    CallDepthExceeded(usize),
}

/// Errors raised while reading a binary artifact.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("not an aq bytecode file")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown byte-order marker {0:#018x}")]
    BadByteOrder(u64),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),

    #[error("invalid type tag {0:#04x}")]
    InvalidTypeTag(u8),

    #[error("invalid utf-8 in string constant")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type GenerateResult<T> = Result<T, GenerateError>;
pub type VmResult<T> = Result<T, VmError>;
pub type CodecResult<T> = Result<T, CodecError>;
