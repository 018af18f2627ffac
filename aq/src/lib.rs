mod builtin;
mod class;
pub mod codec;
mod error;
mod function;
pub mod generator;
mod instruction;
mod memory;
mod object;
mod op;
mod program;
pub mod vm;

pub use builtin::*;
pub use class::*;
pub use error::*;
pub use function::*;
pub use instruction::*;
pub use memory::*;
pub use object::*;
pub use op::*;
pub use program::*;
pub use vm::{VMCreateInfo, Vm};
