use std::fmt;

use crate::instruction::Instruction;
use crate::object::{Object, Type};

/// Declared shape of one slot: its type tag sequence and const flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotDecl {
    pub ty: Type,
    pub constant: bool,
}

impl SlotDecl {
    pub fn new(ty: Type, constant: bool) -> Self {
        Self { ty, constant }
    }

    /// Fresh, unassigned object of this shape.
    pub fn instantiate(&self) -> Object {
        Object {
            constant: self.constant,
            ..Object::typed(self.ty.clone())
        }
    }
}

/// Unit exchanged between the generator and the VM loader.
///
/// `parameters[0]` is the return slot. Methods receive `this` in
/// `parameters[1]`. All indices address the function's own frame, whose
/// layout is `frame`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<usize>,
    pub variadic: bool,
    pub frame: Vec<SlotDecl>,
    pub code: Vec<Instruction>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Mnemonic listing: a header line followed by one instruction per line.
impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Function Name: {}, Size: {}", self.name, self.code.len())?;
        for (offset, instruction) in self.code.iter().enumerate() {
            writeln!(f, "{offset:>5}  {instruction}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Slot;
    use crate::object::TypeTag;
    use crate::op::Op;

    #[test]
    fn const_decl_instantiates_unassigned_const_slot() {
        let object = SlotDecl::new(Type::scalar(TypeTag::Double), true).instantiate();
        assert!(object.constant);
        assert!(!object.assigned);
    }

    #[test]
    fn mnemonic_listing() {
        let mut function = Function::new("f");
        function.code = vec![
            Instruction::unary(Op::Equal, Slot::Frame(0), Slot::Global(1)),
            Instruction::goto(2),
            Instruction::nop(),
        ];
        let listing = function.to_string();
        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines[0], "Function Name: f, Size: 3");
        assert_eq!(lines[1].trim(), "0  EQUAL r0 g1");
        assert_eq!(lines[2].trim(), "1  GOTO @2");
    }
}
