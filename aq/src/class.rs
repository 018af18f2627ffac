//! Class templates and the registry the generator and VM share.

use std::collections::HashMap;

use log::warn;

use crate::function::{Function, SlotDecl};
use crate::object::Object;

/// Method run on every instance NEW creates, when the class declares one.
pub const CONSTRUCTOR: &str = "@constructor";

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub decl: SlotDecl,
}

/// One declared class: ordered members, their slot map and methods.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Class {
    pub name: String,
    members: Vec<Member>,
    slots: HashMap<String, usize>,
    methods: Vec<Function>,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Appends a member and returns its slot. Redeclaring a member keeps its
    /// slot and replaces the declaration.
    pub fn add_member(&mut self, name: impl Into<String>, decl: SlotDecl) -> usize {
        let name = name.into();
        if let Some(&slot) = self.slots.get(&name) {
            warn!("member `{name}` of class `{}` redeclared", self.name);
            self.members[slot].decl = decl;
            return slot;
        }
        let slot = self.members.len();
        self.slots.insert(name.clone(), slot);
        self.members.push(Member { name, decl });
        slot
    }

    pub fn member_slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn add_method(&mut self, method: Function) {
        match self.methods.iter_mut().find(|m| m.name == method.name) {
            Some(existing) => *existing = method,
            None => self.methods.push(method),
        }
    }

    pub fn method(&self, name: &str) -> Option<&Function> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn methods(&self) -> &[Function] {
        &self.methods
    }

    /// Default member objects, cloned into each new instance.
    pub fn template(&self) -> Vec<Object> {
        self.members.iter().map(|m| m.decl.instantiate()).collect()
    }
}

/// Classes by exact name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassRegistry {
    classes: Vec<Class>,
    by_name: HashMap<String, usize>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: Class) {
        match self.by_name.get(&class.name) {
            Some(&index) => {
                warn!("class `{}` redeclared", class.name);
                self.classes[index] = class;
            }
            None => {
                self.by_name.insert(class.name.clone(), self.classes.len());
                self.classes.push(class);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Class> {
        self.by_name.get(name).map(|&index| &self.classes[index])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Class> {
        self.by_name.get(name).map(|&index| &mut self.classes[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
