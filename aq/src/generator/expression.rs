use crate::error::{GenerateError, GenerateResult};
use crate::instruction::{Instruction, Slot};
use crate::object::Payload;
use crate::op::{Op, Relation};

use super::{BinaryOp, Expr, Generator, TypeName, UnaryOp};

enum Lowered {
    Arithmetic(Op),
    Compare(Relation),
}

fn lower_binary(op: BinaryOp) -> Lowered {
    match op {
        BinaryOp::Add => Lowered::Arithmetic(Op::Add),
        BinaryOp::Sub => Lowered::Arithmetic(Op::Sub),
        BinaryOp::Mul => Lowered::Arithmetic(Op::Mul),
        BinaryOp::Div => Lowered::Arithmetic(Op::Div),
        BinaryOp::Rem => Lowered::Arithmetic(Op::Rem),
        BinaryOp::Shl => Lowered::Arithmetic(Op::Shl),
        BinaryOp::Shr => Lowered::Arithmetic(Op::Shr),
        BinaryOp::And => Lowered::Arithmetic(Op::And),
        BinaryOp::Or => Lowered::Arithmetic(Op::Or),
        BinaryOp::Xor => Lowered::Arithmetic(Op::Xor),
        BinaryOp::Eq => Lowered::Compare(Relation::Eq),
        BinaryOp::Ne => Lowered::Compare(Relation::Ne),
        BinaryOp::Gt => Lowered::Compare(Relation::Gt),
        BinaryOp::Ge => Lowered::Compare(Relation::Ge),
        BinaryOp::Lt => Lowered::Compare(Relation::Lt),
        BinaryOp::Le => Lowered::Compare(Relation::Le),
    }
}

impl Generator<'_> {
    /// Lowers `expr` and returns the slot holding its value.
    pub(super) fn expression(&mut self, expr: &Expr) -> GenerateResult<Slot> {
        match expr {
            Expr::Literal(literal) => Ok(self.globals.constant(literal.payload())),
            Expr::Ident(name) => self.identifier(name),
            Expr::Unary { op, operand } => {
                let src = self.expression(operand)?;
                let dst = self.temp();
                let op = match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Ref => Op::Refer,
                };
                self.emit(Instruction::unary(op, dst, src));
                Ok(dst)
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.expression(lhs)?;
                let rhs = self.expression(rhs)?;
                let dst = self.temp();
                let instruction = match lower_binary(*op) {
                    Lowered::Arithmetic(op) => Instruction::binary(op, dst, lhs, rhs),
                    Lowered::Compare(relation) => Instruction::new(
                        Op::Cmp,
                        vec![dst.encode(), relation as u64, lhs.encode(), rhs.encode()],
                    ),
                };
                self.emit(instruction);
                Ok(dst)
            }
            Expr::Assign { target, value } => {
                let target = self.place(target)?;
                let value = self.expression(value)?;
                self.emit(Instruction::unary(Op::Equal, target, value));
                Ok(target)
            }
            Expr::Call { name, args } => self.call(name, args),
            Expr::MethodCall {
                object,
                method,
                args,
            } => {
                let object = self.expression(object)?;
                let name = self.globals.constant(Payload::String(method.clone()));
                let ret = self.temp();
                let mut operands = vec![object.encode(), name.encode(), ret.encode()];
                for arg in args {
                    operands.push(self.expression(arg)?.encode());
                }
                self.emit(Instruction::new(Op::InvokeMethod, operands));
                Ok(ret)
            }
            Expr::Member { object, name } => {
                self.check_member(object, name)?;
                let object = self.expression(object)?;
                self.load_member(object, name)
            }
            Expr::Index { array, index } => {
                let array = self.expression(array)?;
                let index = self.expression(index)?;
                let dst = self.temp();
                self.emit(Instruction::binary(Op::Array, dst, array, index));
                Ok(dst)
            }
            Expr::New { ty, size } => {
                let ty = self.type_operand(ty)?;
                let size = size.as_ref().map(|size| self.expression(size)).transpose()?;
                let dst = self.temp();
                let mut operands = vec![dst.encode(), ty.encode()];
                operands.extend(size.map(Slot::encode));
                self.emit(Instruction::new(Op::New, operands));
                Ok(dst)
            }
        }
    }

    /// Slot an assignment may write through.
    fn place(&mut self, target: &Expr) -> GenerateResult<Slot> {
        match target {
            Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. } => self.expression(target),
            _ => Err(GenerateError::NotAssignable),
        }
    }

    fn identifier(&mut self, name: &str) -> GenerateResult<Slot> {
        if let Some(variable) = self.lookup(name) {
            return Ok(variable.slot);
        }
        // Inside a method, bare member names read through `this`.
        let this_class = self.context.this_class.clone();
        if let Some(class) = this_class {
            let is_member = self
                .classes
                .get(&class)
                .is_some_and(|class| class.member_slot(name).is_some());
            if is_member {
                return self.load_member(Slot::Frame(1), name);
            }
        }
        Err(GenerateError::UnknownVariable(name.to_owned()))
    }

    fn load_member(&mut self, object: Slot, name: &str) -> GenerateResult<Slot> {
        let name = self.globals.constant(Payload::String(name.to_owned()));
        let dst = self.temp();
        self.emit(Instruction::binary(Op::LoadMember, dst, object, name));
        Ok(dst)
    }

    /// Rejects member names the static class of a variable does not declare.
    fn check_member(&self, object: &Expr, member: &str) -> GenerateResult<()> {
        let Expr::Ident(name) = object else {
            return Ok(());
        };
        let Some(TypeName::Class(class)) = self.lookup(name).map(|v| &v.ty) else {
            return Ok(());
        };
        match self.classes.get(class) {
            Some(template) if template.member_slot(member).is_none() => {
                Err(GenerateError::UnknownMember {
                    class: class.clone(),
                    member: member.to_owned(),
                })
            }
            _ => Ok(()),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> GenerateResult<Slot> {
        if !self.known_functions.contains(name) && !self.builtins.contains(name) {
            return Err(GenerateError::UnknownFunction(name.to_owned()));
        }
        let callee = self.globals.constant(Payload::String(name.to_owned()));
        let ret = self.temp();
        let mut operands = vec![callee.encode(), ret.encode()];
        for arg in args {
            operands.push(self.expression(arg)?.encode());
        }
        self.emit(Instruction::new(Op::Invoke, operands));
        Ok(ret)
    }
}
