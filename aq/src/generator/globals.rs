use std::collections::HashMap;

use crate::function::SlotDecl;
use crate::instruction::{Instruction, Slot};
use crate::object::{Payload, Type};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LiteralKey {
    Byte(i8),
    Long(i64),
    Double(u64),
    Uint64(u64),
    String(String),
}

impl LiteralKey {
    fn of(payload: &Payload) -> Option<Self> {
        Some(match payload {
            Payload::Byte(v) => LiteralKey::Byte(*v),
            Payload::Long(v) => LiteralKey::Long(*v),
            Payload::Double(v) => LiteralKey::Double(v.to_bits()),
            Payload::Uint64(v) => LiteralKey::Uint64(*v),
            Payload::String(s) => LiteralKey::String(s.clone()),
            _ => return None,
        })
    }
}

/// Global arena layout under construction: declared slots, the constant
/// pool, and the code that loads constants into their slots at startup.
#[derive(Debug, Default)]
pub struct GlobalMemory {
    constants: Vec<Payload>,
    slots: Vec<SlotDecl>,
    init: Vec<Instruction>,
    literals: HashMap<LiteralKey, Slot>,
    prototypes: HashMap<Type, Slot>,
}

impl GlobalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, decl: SlotDecl) -> Slot {
        self.slots.push(decl);
        Slot::Global(self.slots.len() - 1)
    }

    /// Const global slot holding `payload`, shared by equal literals.
    pub fn constant(&mut self, payload: Payload) -> Slot {
        let key = LiteralKey::of(&payload);
        if let Some(slot) = key.as_ref().and_then(|key| self.literals.get(key)) {
            return *slot;
        }
        let slot = self.declare(SlotDecl::new(Type::scalar(payload.tag()), true));
        self.constants.push(payload);
        self.init
            .push(Instruction::load_const(slot, self.constants.len() - 1));
        if let Some(key) = key {
            self.literals.insert(key, slot);
        }
        slot
    }

    /// Never-written slot whose declared type tells NEW what to allocate.
    pub fn prototype(&mut self, ty: Type) -> Slot {
        if let Some(slot) = self.prototypes.get(&ty) {
            return *slot;
        }
        let slot = self.declare(SlotDecl::new(ty.clone(), false));
        self.prototypes.insert(ty, slot);
        slot
    }

    pub fn into_parts(self) -> (Vec<Payload>, Vec<SlotDecl>, Vec<Instruction>) {
        (self.constants, self.slots, self.init)
    }
}
