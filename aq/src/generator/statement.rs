use crate::class::CONSTRUCTOR;
use crate::error::{GenerateError, GenerateResult};
use crate::function::SlotDecl;
use crate::instruction::{Instruction, Slot};
use crate::object::{Type, TypeTag};
use crate::op::Op;

use super::{
    ClassDecl, Expr, FunctionContext, FunctionDecl, Generator, PatchSite, Stmt, TypeName,
    UNRESOLVED, VarDecl, declared_slot, emit_jump, is_convertible_scalar,
};

impl Generator<'_> {
    pub(super) fn statement(&mut self, statement: &Stmt) -> GenerateResult<()> {
        match statement {
            Stmt::Block(body) => {
                self.scopes.push_block();
                for statement in body {
                    self.statement(statement)?;
                }
                self.scopes.pop();
            }
            Stmt::Expr(expr) => {
                self.expression(expr)?;
            }
            Stmt::Var(decl) => self.var_decl(decl)?,
            Stmt::If {
                cond,
                then,
                otherwise,
            } => self.if_statement(cond, then, otherwise.as_deref())?,
            Stmt::While { cond, body } => self.while_loop(cond, body)?,
            Stmt::DoWhile { body, cond } => self.do_while_loop(body, cond)?,
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.for_loop(init.as_deref(), cond.as_ref(), step.as_ref(), body)?,
            Stmt::Break => {
                let context = &mut self.context;
                context.resolver.break_loop(&mut context.code)?;
            }
            Stmt::Continue => {
                let context = &mut self.context;
                context.resolver.continue_loop(&mut context.code)?;
            }
            Stmt::Label(name) => {
                let context = &mut self.context;
                context.resolver.label(&self.scopes, name, &mut context.code);
            }
            Stmt::Goto(name) => {
                let context = &mut self.context;
                context.resolver.goto(&self.scopes, name, &mut context.code);
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    let value = self.expression(value)?;
                    self.emit(Instruction::unary(Op::Equal, Slot::Frame(0), value));
                }
                let context = &mut self.context;
                context.resolver.return_jump(&mut context.code);
            }
            Stmt::Function(decl) => {
                let hoisted = self.context.top_level && self.scopes.depth() == 1;
                if !hoisted && !self.known_functions.insert(decl.name.clone()) {
                    return Err(GenerateError::DuplicateFunction(decl.name.clone()));
                }
                self.function_decl(decl, None)?;
            }
            Stmt::Class(decl) => self.class_decl(decl)?,
        }
        Ok(())
    }

    fn var_decl(&mut self, decl: &VarDecl) -> GenerateResult<()> {
        if decl.size.is_some() && decl.init.is_some() {
            return Err(GenerateError::SizedInitializer(decl.name.clone()));
        }
        if let TypeName::Class(name) = &decl.ty {
            if self.classes.get(name).is_none() {
                return Err(GenerateError::UnknownClass(name.clone()));
            }
        }
        // The initializer sees the enclosing binding of a shadowed name.
        let value = decl
            .init
            .as_ref()
            .map(|init| self.expression(init))
            .transpose()?;

        let shape = declared_slot(decl);
        let slot = if self.context.top_level {
            self.globals.declare(shape)
        } else {
            Slot::Frame(self.context.local(shape))
        };
        self.declare_variable(&decl.name, slot, decl.ty.clone());

        if let Some(size) = &decl.size {
            let size = self.expression(size)?;
            let ty = self.type_operand(&decl.ty)?;
            self.emit(Instruction::new(
                Op::New,
                vec![slot.encode(), ty.encode(), size.encode()],
            ));
            return Ok(());
        }

        match value {
            Some(value) => {
                let op = if decl.reference {
                    Op::Refer
                } else if decl.constant {
                    Op::Const
                } else if is_convertible_scalar(&decl.ty) {
                    Op::Convert
                } else {
                    Op::Equal
                };
                self.emit(Instruction::unary(op, slot, value));
            }
            None if decl.ty.class_name().is_some() && !decl.reference => {
                let ty = self.type_operand(&decl.ty)?;
                self.emit(Instruction::new(Op::New, vec![slot.encode(), ty.encode()]));
            }
            None => {}
        }
        Ok(())
    }

    // ── control flow ───────────────────────────────────────────────

    /// `IF cond, then, else` with both targets patched once known.
    fn branch(&mut self, cond: &Expr) -> GenerateResult<usize> {
        let cond = self.expression(cond)?;
        Ok(self.emit(Instruction::new(
            Op::If,
            vec![cond.encode(), UNRESOLVED, UNRESOLVED],
        )))
    }

    fn if_statement(
        &mut self,
        cond: &Expr,
        then: &Stmt,
        otherwise: Option<&Stmt>,
    ) -> GenerateResult<()> {
        let branch = self.branch(cond)?;
        let then_start = self.offset();
        self.patch(PatchSite::new(branch, 1), then_start);
        self.statement(then)?;

        let skip = emit_jump(&mut self.context.code);
        let else_start = self.offset();
        self.patch(PatchSite::new(branch, 2), else_start);
        if let Some(otherwise) = otherwise {
            self.statement(otherwise)?;
        }
        let exit = self.emit(Instruction::nop());
        self.patch(skip, exit);
        Ok(())
    }

    fn while_loop(&mut self, cond: &Expr, body: &Stmt) -> GenerateResult<()> {
        let start = self.emit(Instruction::nop());
        self.context.resolver.enter_loop();

        let branch = self.branch(cond)?;
        let body_start = self.offset();
        self.patch(PatchSite::new(branch, 1), body_start);
        self.statement(body)?;
        self.emit(Instruction::goto(start));

        let exit = self.emit(Instruction::nop());
        self.patch(PatchSite::new(branch, 2), exit);
        let context = &mut self.context;
        context.resolver.exit_loop(&mut context.code, start, exit);
        Ok(())
    }

    fn do_while_loop(&mut self, body: &Stmt, cond: &Expr) -> GenerateResult<()> {
        self.emit(Instruction::nop());
        let body_start = self.offset();
        self.context.resolver.enter_loop();
        self.statement(body)?;

        let recheck = self.offset();
        let branch = self.branch(cond)?;
        self.patch(PatchSite::new(branch, 1), body_start);

        let exit = self.emit(Instruction::nop());
        self.patch(PatchSite::new(branch, 2), exit);
        let context = &mut self.context;
        context.resolver.exit_loop(&mut context.code, recheck, exit);
        Ok(())
    }

    fn for_loop(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> GenerateResult<()> {
        self.scopes.push_block();
        if let Some(init) = init {
            self.statement(init)?;
        }
        let start = self.emit(Instruction::nop());
        self.context.resolver.enter_loop();

        let branch = match cond {
            Some(cond) => {
                let branch = self.branch(cond)?;
                let body_start = self.offset();
                self.patch(PatchSite::new(branch, 1), body_start);
                Some(branch)
            }
            None => None,
        };
        self.statement(body)?;

        let recheck = self.offset();
        if let Some(step) = step {
            self.expression(step)?;
        }
        self.emit(Instruction::goto(start));

        let exit = self.emit(Instruction::nop());
        if let Some(branch) = branch {
            self.patch(PatchSite::new(branch, 2), exit);
        }
        let context = &mut self.context;
        context.resolver.exit_loop(&mut context.code, recheck, exit);
        self.scopes.pop();
        Ok(())
    }

    // ── declarations ───────────────────────────────────────────────

    pub(super) fn function_decl(
        &mut self,
        decl: &FunctionDecl,
        class: Option<&str>,
    ) -> GenerateResult<()> {
        let name = match class {
            Some(class) => format!("{class}::{}", decl.name),
            None => decl.name.clone(),
        };
        self.scopes.push_named(&name);
        let floor = self.scopes.depth() - 1;
        let context = FunctionContext::new(
            &decl.name,
            decl.return_type.to_type(),
            floor,
            class.map(str::to_owned),
        );
        let outer = std::mem::replace(&mut self.context, context);

        let mut parameters = vec![0];
        if let Some(class) = class {
            let this = self
                .context
                .local(SlotDecl::new(Type::reference_to(TypeTag::Class), false));
            self.declare_variable("this", Slot::Frame(this), TypeName::Class(class.to_owned()));
            parameters.push(this);
        }
        for (position, param) in decl.params.iter().enumerate() {
            let ty = if param.reference {
                Type::reference_to(param.ty.tag())
            } else if decl.variadic && position + 1 == decl.params.len() {
                Type::array_of(param.ty.tag())
            } else {
                param.ty.to_type()
            };
            let slot = self.context.local(SlotDecl::new(ty, false));
            self.declare_variable(&param.name, Slot::Frame(slot), param.ty.clone());
            parameters.push(slot);
        }

        let body = decl.body.iter().try_for_each(|statement| self.statement(statement));
        let context = std::mem::replace(&mut self.context, outer);
        self.scopes.pop();
        body?;

        let function = context.finish(parameters, decl.variadic)?;
        match class.and_then(|class| self.classes.get_mut(class)) {
            Some(class) => class.add_method(function),
            None => self.functions.push(function),
        }
        Ok(())
    }

    fn class_decl(&mut self, decl: &ClassDecl) -> GenerateResult<()> {
        if self.classes.get(&decl.name).is_none() {
            self.register_class(decl);
        }

        let mut init = Vec::new();
        for member in &decl.members {
            let value = match (&member.init, &member.size) {
                (Some(init), _) => init.clone(),
                (None, Some(size)) => Expr::New {
                    ty: member.ty.clone(),
                    size: Some(Box::new(size.clone())),
                },
                (None, None) if member.ty.class_name().is_some() && !member.reference => {
                    Expr::New {
                        ty: member.ty.clone(),
                        size: None,
                    }
                }
                (None, None) => continue,
            };
            let target = Expr::member(Expr::ident("this"), &member.name);
            init.push(Stmt::Expr(Expr::assign(target, value)));
        }
        if !init.is_empty() {
            let constructor = FunctionDecl::new(CONSTRUCTOR, Vec::new(), init);
            self.function_decl(&constructor, Some(&decl.name))?;
        }

        for method in &decl.methods {
            self.function_decl(method, Some(&decl.name))?;
        }
        Ok(())
    }
}
