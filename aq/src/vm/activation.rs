use std::rc::Rc;

use crate::function::Function;
use crate::memory::ArenaId;
use crate::object::ObjectReference;

/// One running call: its code, its frame arena and where the return value
/// goes once the frame is popped.
pub struct Activation {
    pub function: Rc<Function>,
    pub arena: ArenaId,
    pub pc: usize,
    /// Caller slot receiving the callee's return slot, if any.
    pub result: Option<ObjectReference>,
}

impl Activation {
    pub fn is_finished(&self) -> bool {
        self.pc >= self.function.code.len()
    }
}

pub struct ActivationStack(Vec<Activation>);

impl ActivationStack {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, activation: Activation) {
        self.0.push(activation);
    }

    pub fn pop(&mut self) -> Option<Activation> {
        self.0.pop()
    }

    pub fn current(&self) -> Option<&Activation> {
        self.0.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut Activation> {
        self.0.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ActivationStack {
    fn default() -> Self {
        Self::new()
    }
}
