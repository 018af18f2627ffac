use std::fmt;

use log::{debug, warn};

use crate::error::{VmError, VmResult};
use crate::object::{Object, ObjectReference, Payload, Type, TypeTag};

/// Largest aggregate a store allocates unless configured otherwise.
pub const DEFAULT_MAX_ELEMENTS: usize = 1 << 24;

/// Handle to an arena in an [`ObjectStore`].
///
/// The generation detects handles that outlive their arena: once an arena is
/// released its slot may be reused, but old handles no longer match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaKind {
    Global,
    Frame,
    Instance,
    Array,
}

/// Index-addressed sequence of objects plus a parallel constant pool.
/// Indices stay valid for the arena's lifetime.
#[derive(Debug, Clone)]
pub struct Arena {
    kind: ArenaKind,
    objects: Vec<Object>,
    constants: Vec<Object>,
}

impl Arena {
    fn new(kind: ArenaKind) -> Self {
        Self {
            kind,
            objects: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn kind(&self) -> ArenaKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn constants(&self) -> &[Object] {
        &self.constants
    }
}

struct Entry {
    generation: u32,
    arena: Option<Arena>,
}

/// Owner of every live arena.
///
/// Aggregates and class instances own their child arenas: releasing an
/// arena releases everything it owns. References are plain
/// [`ObjectReference`] values and never keep their target alive.
pub struct ObjectStore {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
    max_elements: usize,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_ELEMENTS)
    }

    /// Store whose aggregates never hold more than `max_elements` slots.
    pub fn with_limit(max_elements: usize) -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_elements,
        }
    }

    /// Faults before an aggregate would grow to `requested` slots past the
    /// configured limit.
    pub fn check_elements(&self, requested: usize) -> VmResult<()> {
        if requested > self.max_elements {
            return Err(VmError::ElementLimit {
                requested,
                limit: self.max_elements,
            });
        }
        Ok(())
    }

    pub fn live_arenas(&self) -> usize {
        self.live
    }

    pub fn create(&mut self, kind: ArenaKind) -> ArenaId {
        self.live += 1;
        let id = if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.arena = Some(Arena::new(kind));
            ArenaId {
                index,
                generation: entry.generation,
            }
        } else {
            self.entries.push(Entry {
                generation: 0,
                arena: Some(Arena::new(kind)),
            });
            ArenaId {
                index: (self.entries.len() - 1) as u32,
                generation: 0,
            }
        };
        debug!("created {kind:?} arena {id}");
        id
    }

    /// Tears down an arena and every arena its objects own.
    pub fn release(&mut self, id: ArenaId) -> VmResult<()> {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let entry = self.entry_mut(id)?;
            let arena = entry.arena.take().ok_or(VmError::DanglingReference(id))?;
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(id.index);
            self.live -= 1;
            debug!("released {:?} arena {id}", arena.kind);

            pending.extend(
                arena
                    .objects
                    .iter()
                    .chain(arena.constants.iter())
                    .filter_map(|object| object.payload.owned_arena()),
            );
        }
        Ok(())
    }

    fn entry_mut(&mut self, id: ArenaId) -> VmResult<&mut Entry> {
        match self.entries.get_mut(id.index as usize) {
            Some(entry) if entry.generation == id.generation => Ok(entry),
            _ => Err(VmError::DanglingReference(id)),
        }
    }

    pub fn arena(&self, id: ArenaId) -> VmResult<&Arena> {
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.arena.as_ref())
            .ok_or(VmError::DanglingReference(id))
    }

    fn arena_mut(&mut self, id: ArenaId) -> VmResult<&mut Arena> {
        self.entry_mut(id)?
            .arena
            .as_mut()
            .ok_or(VmError::DanglingReference(id))
    }

    // ── allocation ────────────────────────────────────────────────

    /// Appends `count` dynamic slots and returns the index of the first.
    pub fn allocate(&mut self, id: ArenaId, count: usize) -> VmResult<usize> {
        let arena = self.arena_mut(id)?;
        let first = arena.objects.len();
        arena.objects.resize_with(first + count, Object::auto);
        Ok(first)
    }

    /// Appends one slot typed by `payload` and holding it.
    pub fn allocate_typed(&mut self, id: ArenaId, payload: Payload) -> VmResult<usize> {
        self.push(id, Object::with_payload(payload))
    }

    pub fn push(&mut self, id: ArenaId, object: Object) -> VmResult<usize> {
        let arena = self.arena_mut(id)?;
        arena.objects.push(object);
        Ok(arena.objects.len() - 1)
    }

    pub fn add_constant(&mut self, id: ArenaId, object: Object) -> VmResult<usize> {
        let arena = self.arena_mut(id)?;
        arena.constants.push(object);
        Ok(arena.constants.len() - 1)
    }

    pub fn constant(&self, id: ArenaId, index: usize) -> VmResult<&Object> {
        self.arena(id)?
            .constants
            .get(index)
            .ok_or(VmError::UnknownConstant(index))
    }

    /// Fresh aggregate of `count` slots shaped like `element`.
    pub fn new_array(&mut self, element: &Object, count: usize) -> VmResult<Payload> {
        self.check_elements(count)?;
        let id = self.create(ArenaKind::Array);
        for _ in 0..count {
            let payload = self.duplicate(&element.payload)?;
            self.push(
                id,
                Object {
                    payload,
                    ..element.clone()
                },
            )?;
        }
        Ok(Payload::Array(id))
    }

    /// Aggregate taking ownership of already built elements.
    pub fn array_of(&mut self, elements: Vec<Object>) -> VmResult<Payload> {
        self.check_elements(elements.len())?;
        let id = self.create(ArenaKind::Array);
        self.arena_mut(id)?.objects = elements;
        Ok(Payload::Array(id))
    }

    /// Fresh instance arena cloned from a template member table.
    pub fn new_instance(&mut self, class: &str, template: &[Object]) -> VmResult<Payload> {
        let id = self.create(ArenaKind::Instance);
        for member in template {
            let payload = self.duplicate(&member.payload)?;
            self.push(
                id,
                Object {
                    payload,
                    ..member.clone()
                },
            )?;
        }
        Ok(Payload::Instance {
            class: class.to_owned(),
            members: id,
        })
    }

    // ── access ────────────────────────────────────────────────────

    /// The slot itself, without following references.
    pub fn get(&self, at: ObjectReference) -> VmResult<&Object> {
        let arena = self.arena(at.arena)?;
        arena.objects.get(at.index).ok_or(VmError::IndexOutOfBounds {
            arena: at.arena,
            index: at.index,
            len: arena.objects.len(),
        })
    }

    fn get_mut(&mut self, at: ObjectReference) -> VmResult<&mut Object> {
        let arena = self.arena_mut(at.arena)?;
        let len = arena.objects.len();
        arena
            .objects
            .get_mut(at.index)
            .ok_or(VmError::IndexOutOfBounds {
                arena: at.arena,
                index: at.index,
                len,
            })
    }

    /// Follows exactly one reference. A reference to a reference resolves
    /// to the inner reference cell, not to what that one names.
    pub fn resolve(&self, at: ObjectReference) -> VmResult<ObjectReference> {
        match self.get(at)?.payload {
            Payload::Reference(target) => {
                self.get(target)?;
                Ok(target)
            }
            _ => Ok(at),
        }
    }

    /// The referent of `at`, after one hop.
    pub fn read(&self, at: ObjectReference) -> VmResult<&Object> {
        self.get(self.resolve(at)?)
    }

    pub fn payload(&self, at: ObjectReference) -> VmResult<&Payload> {
        Ok(&self.read(at)?.payload)
    }

    // ── mutation ──────────────────────────────────────────────────

    /// Stores `payload` into the referent of `at`.
    ///
    /// `payload` must not share an owned arena with any other slot; use
    /// [`duplicate`](Self::duplicate) first. An owned arena previously held by
    /// the slot is released.
    pub fn write(&mut self, at: ObjectReference, payload: Payload) -> VmResult<()> {
        let at = self.resolve(at)?;
        self.store(at, payload)
    }

    /// Stores into the slot itself, even when it holds a reference.
    pub fn store(&mut self, at: ObjectReference, payload: Payload) -> VmResult<()> {
        let slot = self.get_mut(at)?;
        if slot.constant && slot.assigned {
            return Err(VmError::ConstWrite {
                arena: at.arena,
                index: at.index,
            });
        }
        let payload = coerce(&slot.ty, payload)?;
        let old = std::mem::replace(&mut slot.payload, payload);
        slot.assigned = true;
        if let Some(owned) = old.owned_arena() {
            self.release(owned)?;
        }
        Ok(())
    }

    /// Makes the slot at `at` a reference to `target`.
    pub fn bind_reference(
        &mut self,
        at: ObjectReference,
        target: ObjectReference,
    ) -> VmResult<()> {
        self.get(target)?;
        self.store(at, Payload::Reference(target))
    }

    /// Marks a slot write-once. An already assigned slot is sealed at once.
    pub fn seal(&mut self, at: ObjectReference) -> VmResult<()> {
        self.get_mut(at)?.constant = true;
        Ok(())
    }

    /// Lifts the write-once mark so a declaration can bind the slot again.
    pub fn unseal(&mut self, at: ObjectReference) -> VmResult<()> {
        self.get_mut(at)?.constant = false;
        Ok(())
    }

    /// Deep copy: aggregates and instances get fresh arenas, everything else
    /// (references included) is copied by value.
    pub fn duplicate(&mut self, payload: &Payload) -> VmResult<Payload> {
        Ok(match payload {
            Payload::Array(id) => {
                let objects = self.arena(*id)?.objects.clone();
                let copy = self.create(ArenaKind::Array);
                self.adopt(copy, objects)?;
                Payload::Array(copy)
            }
            Payload::Instance { class, members } => {
                let objects = self.arena(*members)?.objects.clone();
                let copy = self.create(ArenaKind::Instance);
                self.adopt(copy, objects)?;
                Payload::Instance {
                    class: class.clone(),
                    members: copy,
                }
            }
            other => other.clone(),
        })
    }

    fn adopt(&mut self, id: ArenaId, objects: Vec<Object>) -> VmResult<()> {
        for mut object in objects {
            object.payload = self.duplicate(&object.payload)?;
            self.push(id, object)?;
        }
        Ok(())
    }

    /// Value assignment: copies the referent of `src` into the referent of
    /// `dst`. Both may live in different arenas.
    pub fn assign(&mut self, dst: ObjectReference, src: ObjectReference) -> VmResult<()> {
        let source = self.read(src)?.payload.clone();
        if matches!(source, Payload::Absent) {
            warn!("assignment from unassigned slot {src} ignored");
            return Ok(());
        }
        let copy = self.duplicate(&source)?;
        self.write(dst, copy)
    }

    /// Slot `index` of the aggregate held by `at`, growing it with slots of
    /// the element type when `index` is past the end.
    pub fn element(&mut self, at: ObjectReference, index: usize) -> VmResult<ObjectReference> {
        let array = self.read(at)?;
        let element_tag = array.ty.element();
        let id = match array.payload {
            Payload::Array(id) => id,
            ref other => {
                return Err(VmError::TypeMismatch {
                    expected: TypeTag::Array,
                    found: other.tag(),
                });
            }
        };
        self.check_elements(index.saturating_add(1))?;
        let arena = self.arena_mut(id)?;
        if index >= arena.objects.len() {
            arena
                .objects
                .resize_with(index + 1, || Object::typed(Type::scalar(element_tag)));
        }
        Ok(ObjectReference::new(id, index))
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Fits `payload` into a slot declared as `ty`.
fn coerce(ty: &Type, payload: Payload) -> VmResult<Payload> {
    let expected = ty.primary();
    let found = payload.tag();
    if expected == TypeTag::Auto || expected == found {
        return Ok(payload);
    }
    if expected.is_numeric() {
        if let Some(number) = payload.as_number() {
            if let Some((converted, lossy)) = number.convert(expected) {
                if lossy {
                    warn!("implicit conversion from {found} to {expected} changed the value");
                }
                return Ok(converted.into());
            }
        }
    }
    Err(VmError::TypeMismatch { expected, found })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_slot(store: &mut ObjectStore, arena: ArenaId, value: i64) -> ObjectReference {
        let index = store.allocate_typed(arena, Payload::Long(value)).unwrap();
        ObjectReference::new(arena, index)
    }

    #[test]
    fn allocate_returns_contiguous_default_slots() {
        let mut store = ObjectStore::new();
        let arena = store.create(ArenaKind::Global);
        assert_eq!(store.allocate(arena, 3).unwrap(), 0);
        assert_eq!(store.allocate(arena, 2).unwrap(), 3);
        assert_eq!(store.arena(arena).unwrap().len(), 5);
        assert_eq!(
            store.get(ObjectReference::new(arena, 4)).unwrap().payload,
            Payload::Absent
        );
    }

    #[test]
    fn index_past_bound_faults() {
        let mut store = ObjectStore::new();
        let arena = store.create(ArenaKind::Frame);
        store.allocate(arena, 2).unwrap();
        let err = store.get(ObjectReference::new(arena, 2)).unwrap_err();
        assert_eq!(
            err,
            VmError::IndexOutOfBounds {
                arena,
                index: 2,
                len: 2
            }
        );
    }

    #[test]
    fn const_slot_rejects_second_write_for_every_tag() {
        let samples = [
            Payload::Byte(1),
            Payload::Long(2),
            Payload::Double(3.0),
            Payload::Uint64(4),
            Payload::String("five".into()),
        ];
        for sample in samples {
            let mut store = ObjectStore::new();
            let arena = store.create(ArenaKind::Global);
            let tag = sample.tag();
            let index = store
                .push(arena, Object::typed(Type::scalar(tag)).constant())
                .unwrap();
            let at = ObjectReference::new(arena, index);

            store.write(at, sample.clone()).unwrap();
            let err = store.write(at, sample.clone()).unwrap_err();
            assert_eq!(err, VmError::ConstWrite { arena, index }, "tag {tag}");
            assert_eq!(store.get(at).unwrap().payload, sample);
        }
    }

    #[test]
    fn typed_slot_coerces_numbers_and_rejects_text() {
        let mut store = ObjectStore::new();
        let arena = store.create(ArenaKind::Global);
        let at = long_slot(&mut store, arena, 0);

        store.write(at, Payload::Double(7.9)).unwrap();
        assert_eq!(store.get(at).unwrap().payload, Payload::Long(7));

        let err = store.write(at, Payload::String("x".into())).unwrap_err();
        assert_eq!(
            err,
            VmError::TypeMismatch {
                expected: TypeTag::Long,
                found: TypeTag::String
            }
        );
    }

    #[test]
    fn dynamic_slot_adopts_written_kind() {
        let mut store = ObjectStore::new();
        let arena = store.create(ArenaKind::Frame);
        let index = store.allocate(arena, 1).unwrap();
        let at = ObjectReference::new(arena, index);
        store.write(at, Payload::String("hi".into())).unwrap();
        assert_eq!(store.get(at).unwrap().tag(), TypeTag::String);
        store.write(at, Payload::Byte(3)).unwrap();
        assert_eq!(store.get(at).unwrap().tag(), TypeTag::Byte);
    }

    #[test]
    fn write_through_reference_mutates_foreign_arena() {
        let mut store = ObjectStore::new();
        let first = store.create(ArenaKind::Global);
        let second = store.create(ArenaKind::Frame);
        let a = long_slot(&mut store, first, 10);
        let r = ObjectReference::new(second, store.allocate(second, 1).unwrap());
        store.bind_reference(r, a).unwrap();

        assert_eq!(store.payload(r).unwrap(), &Payload::Long(10));
        store.write(r, Payload::Long(42)).unwrap();

        assert_eq!(store.get(a).unwrap().payload, Payload::Long(42));
        assert_eq!(store.arena(second).unwrap().len(), 1);
        assert_eq!(store.get(r).unwrap().payload, Payload::Reference(a));
    }

    #[test]
    fn reference_to_reference_resolves_one_hop() {
        let mut store = ObjectStore::new();
        let arena = store.create(ArenaKind::Global);
        let a = long_slot(&mut store, arena, 1);
        let r1 = ObjectReference::new(arena, store.allocate(arena, 1).unwrap());
        let r2 = ObjectReference::new(arena, store.allocate(arena, 1).unwrap());
        store.bind_reference(r1, a).unwrap();
        store.bind_reference(r2, r1).unwrap();

        assert_eq!(store.resolve(r2).unwrap(), r1);
        assert_eq!(store.payload(r2).unwrap(), &Payload::Reference(a));
    }

    #[test]
    fn assign_copies_across_arenas() {
        let mut store = ObjectStore::new();
        let first = store.create(ArenaKind::Global);
        let second = store.create(ArenaKind::Frame);
        let a = long_slot(&mut store, first, 5);
        let b = ObjectReference::new(second, store.allocate(second, 1).unwrap());

        store.assign(b, a).unwrap();
        store.write(a, Payload::Long(6)).unwrap();

        assert_eq!(store.payload(b).unwrap(), &Payload::Long(5));
    }

    #[test]
    fn assigning_an_aggregate_deep_copies_it() {
        let mut store = ObjectStore::new();
        let arena = store.create(ArenaKind::Global);
        let element = Object::typed(Type::scalar(TypeTag::Long));
        let array = store.new_array(&element, 3).unwrap();
        let index = store
            .push(arena, Object::typed(Type::array_of(TypeTag::Long)))
            .unwrap();
        let a = ObjectReference::new(arena, index);
        store.write(a, array).unwrap();
        let b = ObjectReference::new(arena, store.allocate(arena, 1).unwrap());
        store.assign(b, a).unwrap();

        let a1 = store.element(a, 1).unwrap();
        store.write(a1, Payload::Long(9)).unwrap();
        let b1 = store.element(b, 1).unwrap();

        assert_eq!(store.payload(b1).unwrap(), &Payload::Long(0));
        assert_ne!(a1.arena, b1.arena);
    }

    #[test]
    fn element_access_grows_the_aggregate() {
        let mut store = ObjectStore::new();
        let arena = store.create(ArenaKind::Global);
        let array = store
            .new_array(&Object::typed(Type::scalar(TypeTag::Byte)), 1)
            .unwrap();
        let index = store
            .push(arena, Object::typed(Type::array_of(TypeTag::Byte)))
            .unwrap();
        let a = ObjectReference::new(arena, index);
        store.write(a, array).unwrap();

        let slot = store.element(a, 4).unwrap();
        assert_eq!(store.arena(slot.arena).unwrap().len(), 5);
        assert_eq!(store.payload(slot).unwrap(), &Payload::Byte(0));
    }

    #[test]
    fn aggregates_stop_growing_at_the_element_limit() {
        let mut store = ObjectStore::with_limit(8);
        let arena = store.create(ArenaKind::Global);
        let element = Object::typed(Type::scalar(TypeTag::Long));
        let index = store
            .push(arena, Object::typed(Type::array_of(TypeTag::Long)))
            .unwrap();
        let a = ObjectReference::new(arena, index);
        let array = store.new_array(&element, 2).unwrap();
        store.write(a, array).unwrap();

        assert_eq!(
            store.element(a, 1 << 62),
            Err(VmError::ElementLimit {
                requested: (1 << 62) + 1,
                limit: 8
            })
        );
        assert_eq!(
            store.element(a, usize::MAX),
            Err(VmError::ElementLimit {
                requested: usize::MAX,
                limit: 8
            })
        );
        assert_eq!(
            store.new_array(&element, 1 << 62),
            Err(VmError::ElementLimit {
                requested: 1 << 62,
                limit: 8
            })
        );
        // The failed growth left the aggregate alone.
        let slot = store.element(a, 7).unwrap();
        assert_eq!(store.arena(slot.arena).unwrap().len(), 8);
    }

    #[test]
    fn release_tears_down_owned_children_and_invalidates_handles() {
        let mut store = ObjectStore::new();
        let frame = store.create(ArenaKind::Frame);
        let array = store.new_array(&Object::auto(), 2).unwrap();
        let child = array.owned_arena().unwrap();
        store.allocate_typed(frame, array).unwrap();
        assert_eq!(store.live_arenas(), 2);

        store.release(frame).unwrap();

        assert_eq!(store.live_arenas(), 0);
        assert_eq!(store.arena(child).unwrap_err(), VmError::DanglingReference(child));

        // The slot is recycled under a new generation.
        let reused = store.create(ArenaKind::Frame);
        assert!(store.arena(reused).is_ok());
        assert_ne!(reused, frame);
        assert!(store.arena(frame).is_err());
    }

    #[test]
    fn overwriting_an_aggregate_releases_the_old_one() {
        let mut store = ObjectStore::new();
        let arena = store.create(ArenaKind::Global);
        let array = store.new_array(&Object::auto(), 1).unwrap();
        let old = array.owned_arena().unwrap();
        let at = ObjectReference::new(arena, store.allocate(arena, 1).unwrap());
        store.write(at, array).unwrap();

        store.write(at, Payload::Long(1)).unwrap();

        assert!(store.arena(old).is_err());
        assert_eq!(store.live_arenas(), 1);
    }

    #[test]
    fn dangling_reference_is_reported() {
        let mut store = ObjectStore::new();
        let global = store.create(ArenaKind::Global);
        let frame = store.create(ArenaKind::Frame);
        let local = long_slot(&mut store, frame, 3);
        let r = ObjectReference::new(global, store.allocate(global, 1).unwrap());
        store.bind_reference(r, local).unwrap();

        store.release(frame).unwrap();

        assert_eq!(store.read(r).unwrap_err(), VmError::DanglingReference(frame));
    }
}
