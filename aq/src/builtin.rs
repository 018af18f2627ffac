use std::collections::HashMap;
use std::io::Write;

use crate::memory::ObjectStore;
use crate::object::ObjectReference;

/// Native callable. Returns 0 on success, any other value is a failure
/// status that aborts the program.
pub type BuiltinFunction = fn(&mut BuiltinContext) -> i64;

/// What a builtin sees: the object store and the resolved slot list of the
/// call, return slot first.
pub struct BuiltinContext<'a> {
    pub store: &'a mut ObjectStore,
    pub slots: &'a [ObjectReference],
    pub out: &'a mut dyn Write,
}

impl BuiltinContext<'_> {
    pub fn result(&self) -> ObjectReference {
        self.slots[0]
    }

    pub fn arguments(&self) -> &[ObjectReference] {
        &self.slots[1..]
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Builtin<'a> {
    pub name: &'a str,
    pub ptr: BuiltinFunction,
}

impl<'a> Builtin<'a> {
    pub const fn new(name: &'a str, ptr: BuiltinFunction) -> Self {
        Self { name, ptr }
    }
}

pub const DEFAULT_BUILTINS: &[Builtin] = &[Builtin::new("print", print)];

/// Name to native callable table, queried by the generator to validate
/// calls and by the VM to dispatch them.
#[derive(Debug, Clone, Default)]
pub struct BuiltinRegistry {
    functions: HashMap<String, BuiltinFunction>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for builtin in DEFAULT_BUILTINS {
            registry.register(builtin.name, builtin.ptr);
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, function: BuiltinFunction) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<BuiltinFunction> {
        self.functions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

fn print(ctx: &mut BuiltinContext) -> i64 {
    let slots = ctx.slots;
    for &argument in &slots[1..] {
        let Ok(payload) = ctx.store.payload(argument) else {
            return -1;
        };
        if write!(ctx.out, "{payload}").is_err() {
            return -1;
        }
    }
    match ctx.out.flush() {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ArenaKind;
    use crate::object::Payload;

    #[test]
    fn print_writes_arguments() {
        let mut store = ObjectStore::new();
        let arena = store.create(ArenaKind::Frame);
        let ret = store.allocate(arena, 1).unwrap();
        let text = store
            .allocate_typed(arena, Payload::String("x = ".into()))
            .unwrap();
        let number = store.allocate_typed(arena, Payload::Long(42)).unwrap();
        let slots = [ret, text, number].map(|index| ObjectReference::new(arena, index));

        let registry = BuiltinRegistry::with_defaults();
        let print = registry.get("print").unwrap();
        let mut out = Vec::new();
        let status = print(&mut BuiltinContext {
            store: &mut store,
            slots: &slots,
            out: &mut out,
        });

        assert_eq!(status, 0);
        assert_eq!(String::from_utf8(out).unwrap(), "x = 42");
    }

    #[test]
    fn unknown_names_are_absent() {
        let registry = BuiltinRegistry::with_defaults();
        assert!(registry.contains("print"));
        assert!(!registry.contains("__builtin_sqrt"));
    }
}
