//! Lowering of statement/expression trees to flat instruction sequences.
//!
//! Variables of the entry function live in the global arena; every other
//! function gets its own frame layout. Literals become const global slots
//! loaded by code prepended to the entry function.

mod ast;
mod control;
mod expression;
mod globals;
mod statement;

use std::collections::{HashMap, HashSet};

use log::debug;

pub use ast::*;
pub use control::{PatchList, PatchSite, Resolver, Scopes, UNRESOLVED, emit_jump};
pub use globals::GlobalMemory;

use crate::builtin::BuiltinRegistry;
use crate::class::{Class, ClassRegistry};
use crate::error::{GenerateError, GenerateResult};
use crate::function::{Function, SlotDecl};
use crate::instruction::{Instruction, Slot};
use crate::object::{Type, TypeTag};
use crate::program::{ENTRY, Program};

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Name given to the function holding top-level statements.
    pub entry: String,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            entry: ENTRY.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
struct Variable {
    slot: Slot,
    ty: TypeName,
}

/// Function under construction.
struct FunctionContext {
    name: String,
    frame: Vec<SlotDecl>,
    code: Vec<Instruction>,
    resolver: Resolver,
    this_class: Option<String>,
    top_level: bool,
}

impl FunctionContext {
    fn new(name: &str, return_type: Type, floor: usize, this_class: Option<String>) -> Self {
        Self {
            name: name.to_owned(),
            // Slot 0 receives the return value.
            frame: vec![SlotDecl::new(return_type, false)],
            code: Vec::new(),
            resolver: Resolver::new(name, floor),
            this_class,
            top_level: false,
        }
    }

    fn local(&mut self, decl: SlotDecl) -> usize {
        self.frame.push(decl);
        self.frame.len() - 1
    }

    fn finish(mut self, parameters: Vec<usize>, variadic: bool) -> GenerateResult<Function> {
        self.resolver.finish(&mut self.code)?;
        debug!(
            "generated `{}`: {} instructions, {} frame slots",
            self.name,
            self.code.len(),
            self.frame.len()
        );
        Ok(Function {
            name: self.name,
            parameters,
            variadic,
            frame: self.frame,
            code: self.code,
        })
    }
}

/// Generates a program with the default options.
pub fn generate(statements: &[Stmt], builtins: &BuiltinRegistry) -> GenerateResult<Program> {
    Generator::new(builtins, GeneratorOptions::default()).generate(statements)
}

pub struct Generator<'a> {
    builtins: &'a BuiltinRegistry,
    entry: String,
    globals: GlobalMemory,
    classes: ClassRegistry,
    functions: Vec<Function>,
    known_functions: HashSet<String>,
    variables: HashMap<String, Variable>,
    scopes: Scopes,
    context: FunctionContext,
}

fn variable_key(scope: &str, name: &str) -> String {
    format!("{scope}#{name}")
}

impl<'a> Generator<'a> {
    pub fn new(builtins: &'a BuiltinRegistry, options: GeneratorOptions) -> Self {
        let mut context = FunctionContext::new(&options.entry, Type::auto(), 0, None);
        context.top_level = true;
        Self {
            builtins,
            entry: options.entry,
            globals: GlobalMemory::new(),
            classes: ClassRegistry::new(),
            functions: Vec::new(),
            known_functions: HashSet::new(),
            variables: HashMap::new(),
            scopes: Scopes::new(),
            context,
        }
    }

    pub fn generate(mut self, statements: &[Stmt]) -> GenerateResult<Program> {
        self.hoist(statements)?;
        for statement in statements {
            self.statement(statement)?;
        }

        let context = std::mem::replace(
            &mut self.context,
            FunctionContext::new("", Type::auto(), 0, None),
        );
        let mut entry = context.finish(vec![0], false)?;
        let (constants, globals, mut init) = self.globals.into_parts();
        relocate(&mut entry.code, init.len());
        init.append(&mut entry.code);
        entry.code = init;

        let mut functions = vec![entry];
        functions.append(&mut self.functions);
        Ok(Program {
            constants,
            globals,
            functions,
            classes: self.classes,
            entry: self.entry,
        })
    }

    /// Makes top-level functions and classes visible before their
    /// declaration is reached.
    fn hoist(&mut self, statements: &[Stmt]) -> GenerateResult<()> {
        for statement in statements {
            match statement {
                Stmt::Function(decl) => {
                    if !self.known_functions.insert(decl.name.clone()) {
                        return Err(GenerateError::DuplicateFunction(decl.name.clone()));
                    }
                }
                Stmt::Class(decl) => self.register_class(decl),
                _ => {}
            }
        }
        Ok(())
    }

    fn register_class(&mut self, decl: &ClassDecl) {
        let mut class = Class::new(&decl.name);
        for member in &decl.members {
            class.add_member(&member.name, declared_slot(member));
        }
        self.classes.register(class);
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit(&mut self, instruction: Instruction) -> usize {
        self.context.code.push(instruction);
        self.context.code.len() - 1
    }

    fn offset(&self) -> usize {
        self.context.code.len()
    }

    fn patch(&mut self, site: PatchSite, target: usize) {
        site.patch(&mut self.context.code, target);
    }

    fn temp(&mut self) -> Slot {
        Slot::Frame(self.context.local(SlotDecl::default()))
    }

    // ── names ──────────────────────────────────────────────────────

    fn declare_variable(&mut self, name: &str, slot: Slot, ty: TypeName) {
        let key = variable_key(self.scopes.current(), name);
        self.variables.insert(key, Variable { slot, ty });
    }

    /// Innermost visible variable: the current function's scopes first,
    /// then the global scope.
    fn lookup(&self, name: &str) -> Option<&Variable> {
        self.scopes
            .chain(self.context.resolver.floor())
            .iter()
            .find_map(|scope| self.variables.get(&variable_key(scope, name)))
            .or_else(|| {
                self.variables
                    .get(&variable_key(self.scopes.global(), name))
                    .filter(|variable| matches!(variable.slot, Slot::Global(_)))
            })
    }

    /// Global slot naming `ty` for NEW.
    fn type_operand(&mut self, ty: &TypeName) -> GenerateResult<Slot> {
        match ty {
            TypeName::Class(name) => {
                if self.classes.get(name).is_none() {
                    return Err(GenerateError::UnknownClass(name.clone()));
                }
                Ok(self.globals.constant(crate::object::Payload::String(name.clone())))
            }
            other => Ok(self.globals.prototype(other.to_type())),
        }
    }
}

/// Declared slot shape for a variable or member declaration.
fn declared_slot(decl: &VarDecl) -> SlotDecl {
    let tag = decl.ty.tag();
    let ty = if decl.reference {
        Type::reference_to(tag)
    } else if decl.size.is_some() {
        Type::array_of(tag)
    } else {
        Type::scalar(tag)
    };
    SlotDecl::new(ty, decl.constant)
}

/// Shifts every jump target by `shift` after code is inserted in front.
fn relocate(code: &mut [Instruction], shift: usize) {
    for instruction in code {
        for &position in instruction.target_positions() {
            instruction.operands[position] += shift as u64;
        }
    }
}

fn is_convertible_scalar(ty: &TypeName) -> bool {
    ty.tag().is_numeric() || ty.tag() == TypeTag::String
}
