//! Control-flow resolution: scopes, labels, pending jumps and loop exits.
//!
//! Jump targets are absolute instruction offsets. Every jump whose target is
//! not yet known is emitted with a placeholder operand and recorded as a
//! [`PatchSite`]; the site is rewritten once the target offset exists.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::{GenerateError, GenerateResult};
use crate::instruction::Instruction;
use crate::op::Op;

/// Placeholder operand value. Never a valid target once patched.
pub const UNRESOLVED: u64 = u64::MAX;

/// Operand of an already emitted instruction awaiting its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    pub instruction: usize,
    pub operand: usize,
}

impl PatchSite {
    pub fn new(instruction: usize, operand: usize) -> Self {
        Self {
            instruction,
            operand,
        }
    }

    pub fn patch(self, code: &mut [Instruction], target: usize) {
        code[self.instruction].operands[self.operand] = target as u64;
    }
}

/// Sites that all resolve to one target.
#[derive(Debug, Default)]
pub struct PatchList(Vec<PatchSite>);

impl PatchList {
    pub fn push(&mut self, site: PatchSite) {
        self.0.push(site);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn resolve(self, code: &mut [Instruction], target: usize) {
        for site in self.0 {
            site.patch(code, target);
        }
    }
}

/// Stack of uniquely named scopes. Index 0 is the global scope.
#[derive(Debug)]
pub struct Scopes {
    names: Vec<String>,
    counter: usize,
}

impl Scopes {
    pub fn new() -> Self {
        Self {
            names: vec![String::new()],
            counter: 0,
        }
    }

    /// Anonymous block scope, `parent@@N`.
    pub fn push_block(&mut self) {
        self.counter += 1;
        let name = format!("{}@@{}", self.current(), self.counter);
        self.names.push(name);
    }

    /// Scope of a named construct such as a function body.
    pub fn push_named(&mut self, name: &str) {
        let name = format!("{}.{}", self.current(), name);
        self.names.push(name);
    }

    pub fn pop(&mut self) {
        debug_assert!(self.names.len() > 1, "global scope popped");
        self.names.pop();
    }

    pub fn current(&self) -> &str {
        // The global scope is never popped.
        self.names.last().map(String::as_str).unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.names.len()
    }

    /// Active scope names from the innermost one down to `floor`.
    pub fn chain(&self, floor: usize) -> Vec<String> {
        self.names[floor..].iter().rev().cloned().collect()
    }

    pub fn global(&self) -> &str {
        &self.names[0]
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct PendingGoto {
    label: String,
    site: PatchSite,
    /// Scopes visible where the goto was written, innermost first.
    chain: Vec<String>,
}

#[derive(Debug, Default)]
struct LoopExits {
    breaks: PatchList,
    continues: PatchList,
}

/// Per-function jump bookkeeping.
#[derive(Debug)]
pub struct Resolver {
    function: String,
    floor: usize,
    labels: HashMap<String, usize>,
    pending: Vec<PendingGoto>,
    loops: Vec<LoopExits>,
    exits: PatchList,
}

fn qualify(scope: &str, label: &str) -> String {
    format!("{scope}${label}")
}

impl Resolver {
    /// `floor` is the depth of the function's own scope; gotos never look
    /// below it.
    pub fn new(function: impl Into<String>, floor: usize) -> Self {
        Self {
            function: function.into(),
            floor,
            labels: HashMap::new(),
            pending: Vec::new(),
            loops: Vec::new(),
            exits: PatchList::default(),
        }
    }

    pub fn floor(&self) -> usize {
        self.floor
    }

    /// Emits the label's marker no-op and records the offset right after it.
    pub fn label(&mut self, scopes: &Scopes, name: &str, code: &mut Vec<Instruction>) {
        code.push(Instruction::nop());
        let key = qualify(scopes.current(), name);
        if self.labels.insert(key, code.len()).is_some() {
            warn!("label `{name}` redefined in `{}`", self.function);
        }
    }

    fn lookup(&self, chain: &[String], name: &str) -> Option<usize> {
        chain
            .iter()
            .find_map(|scope| self.labels.get(&qualify(scope, name)).copied())
    }

    pub fn goto(&mut self, scopes: &Scopes, name: &str, code: &mut Vec<Instruction>) {
        let chain = scopes.chain(self.floor);
        match self.lookup(&chain, name) {
            Some(target) => code.push(Instruction::goto(target)),
            None => {
                let site = emit_jump(code);
                debug!("forward goto `{name}` pending at {}", site.instruction);
                self.pending.push(PendingGoto {
                    label: name.to_owned(),
                    site,
                    chain,
                });
            }
        }
    }

    pub fn enter_loop(&mut self) {
        self.loops.push(LoopExits::default());
    }

    /// Patches the innermost loop's breaks to `exit` and continues to
    /// `recheck`.
    pub fn exit_loop(&mut self, code: &mut [Instruction], recheck: usize, exit: usize) {
        if let Some(exits) = self.loops.pop() {
            exits.breaks.resolve(code, exit);
            exits.continues.resolve(code, recheck);
        }
    }

    pub fn break_loop(&mut self, code: &mut Vec<Instruction>) -> GenerateResult<()> {
        let Some(exits) = self.loops.last_mut() else {
            return Err(GenerateError::BreakOutsideLoop(self.function.clone()));
        };
        exits.breaks.push(emit_jump(code));
        Ok(())
    }

    pub fn continue_loop(&mut self, code: &mut Vec<Instruction>) -> GenerateResult<()> {
        let Some(exits) = self.loops.last_mut() else {
            return Err(GenerateError::ContinueOutsideLoop(self.function.clone()));
        };
        exits.continues.push(emit_jump(code));
        Ok(())
    }

    /// Jump to the function exit.
    pub fn return_jump(&mut self, code: &mut Vec<Instruction>) {
        self.exits.push(emit_jump(code));
    }

    /// Emits the exit marker and resolves every outstanding jump.
    pub fn finish(mut self, code: &mut Vec<Instruction>) -> GenerateResult<()> {
        let exit = code.len();
        code.push(Instruction::nop());
        std::mem::take(&mut self.exits).resolve(code, exit);

        for pending in &self.pending {
            let target = self.lookup(&pending.chain, &pending.label).ok_or_else(|| {
                GenerateError::UndefinedLabel {
                    label: pending.label.clone(),
                    function: self.function.clone(),
                }
            })?;
            pending.site.patch(code, target);
        }
        Ok(())
    }
}

/// Emits `GOTO <placeholder>` and returns its patch site.
pub fn emit_jump(code: &mut Vec<Instruction>) -> PatchSite {
    code.push(Instruction::new(Op::Goto, vec![UNRESOLVED]));
    PatchSite::new(code.len() - 1, 0)
}
