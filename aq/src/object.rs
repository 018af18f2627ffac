//! Tagged value cells.
//!
//! Every runtime value lives in an [`Object`]: a declared [`Type`], a const
//! flag and a [`Payload`]. Aggregates and class instances own their children
//! through an arena handle; references never own what they point at.

use std::fmt;

use crate::memory::ArenaId;

/// Primitive kind selected by the first byte of a type tag sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    /// Absent or dynamic. A slot declared with this tag adopts whatever is
    /// written into it.
    Auto = 0x00,
    Byte = 0x01,
    Long = 0x02,
    Double = 0x03,
    /// 64-bit unsigned integer, also used for addresses.
    Uint64 = 0x04,
    String = 0x05,
    Array = 0x06,
    Reference = 0x07,
    Class = 0x09,
    Native = 0x0A,
}

impl TypeTag {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeTag::Byte | TypeTag::Long | TypeTag::Double | TypeTag::Uint64
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Auto => "auto",
            TypeTag::Byte => "byte",
            TypeTag::Long => "long",
            TypeTag::Double => "double",
            TypeTag::Uint64 => "uint64",
            TypeTag::String => "string",
            TypeTag::Array => "array",
            TypeTag::Reference => "reference",
            TypeTag::Class => "class",
            TypeTag::Native => "native",
        }
    }
}

impl TryFrom<u8> for TypeTag {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0x00 => TypeTag::Auto,
            0x01 => TypeTag::Byte,
            0x02 => TypeTag::Long,
            0x03 => TypeTag::Double,
            0x04 => TypeTag::Uint64,
            0x05 => TypeTag::String,
            0x06 => TypeTag::Array,
            0x07 => TypeTag::Reference,
            0x09 => TypeTag::Class,
            0x0A => TypeTag::Native,
            other => return Err(other),
        })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type tag sequence. The first tag selects the kind, trailing tags name
/// the element type of aggregates and the referent type of references.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type(Vec<TypeTag>);

impl Type {
    pub fn new(tags: Vec<TypeTag>) -> Self {
        if tags.is_empty() {
            return Self::auto();
        }
        Self(tags)
    }

    pub fn scalar(tag: TypeTag) -> Self {
        Self(vec![tag])
    }

    pub fn auto() -> Self {
        Self::scalar(TypeTag::Auto)
    }

    pub fn class() -> Self {
        Self::scalar(TypeTag::Class)
    }

    pub fn array_of(element: TypeTag) -> Self {
        Self(vec![TypeTag::Array, element])
    }

    pub fn reference_to(referent: TypeTag) -> Self {
        Self(vec![TypeTag::Reference, referent])
    }

    pub fn primary(&self) -> TypeTag {
        self.0[0]
    }

    /// Element tag of an aggregate (or referent tag of a reference).
    pub fn element(&self) -> TypeTag {
        self.0.get(1).copied().unwrap_or(TypeTag::Auto)
    }

    pub fn tags(&self) -> &[TypeTag] {
        &self.0
    }
}

impl Default for Type {
    fn default() -> Self {
        Self::auto()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tag in &self.0 {
            if !first {
                f.write_str(":")?;
            }
            write!(f, "{tag}")?;
            first = false;
        }
        Ok(())
    }
}

/// Opaque handle handed across the builtin boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// Non-owning capability naming a slot in some arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectReference {
    pub arena: ArenaId,
    pub index: usize,
}

impl ObjectReference {
    pub fn new(arena: ArenaId, index: usize) -> Self {
        Self { arena, index }
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{}[{}]", self.arena, self.index)
    }
}

/// The value held by an [`Object`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Absent,
    Byte(i8),
    Long(i64),
    Double(f64),
    Uint64(u64),
    String(String),
    /// Owned aggregate; the arena is released with this payload.
    Array(ArenaId),
    /// Owned member table of a class instance.
    Instance { class: String, members: ArenaId },
    Native(NativeHandle),
    Reference(ObjectReference),
}

impl Payload {
    pub fn tag(&self) -> TypeTag {
        match self {
            Payload::Absent => TypeTag::Auto,
            Payload::Byte(_) => TypeTag::Byte,
            Payload::Long(_) => TypeTag::Long,
            Payload::Double(_) => TypeTag::Double,
            Payload::Uint64(_) => TypeTag::Uint64,
            Payload::String(_) => TypeTag::String,
            Payload::Array(_) => TypeTag::Array,
            Payload::Instance { .. } => TypeTag::Class,
            Payload::Native(_) => TypeTag::Native,
            Payload::Reference(_) => TypeTag::Reference,
        }
    }

    /// Default payload for a freshly allocated slot of the given kind.
    /// Aggregates and instances have no default; they come from NEW.
    pub fn default_for(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Byte => Payload::Byte(0),
            TypeTag::Long => Payload::Long(0),
            TypeTag::Double => Payload::Double(0.0),
            TypeTag::Uint64 => Payload::Uint64(0),
            TypeTag::String => Payload::String(String::new()),
            TypeTag::Native => Payload::Native(NativeHandle(0)),
            TypeTag::Auto
            | TypeTag::Array
            | TypeTag::Reference
            | TypeTag::Class => Payload::Absent,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match *self {
            Payload::Byte(v) => Some(Number::Byte(v)),
            Payload::Long(v) => Some(Number::Long(v)),
            Payload::Double(v) => Some(Number::Double(v)),
            Payload::Uint64(v) => Some(Number::Uint64(v)),
            _ => None,
        }
    }

    /// Arena owned by this payload, if any.
    pub fn owned_arena(&self) -> Option<ArenaId> {
        match self {
            Payload::Array(id) => Some(*id),
            Payload::Instance { members, .. } => Some(*members),
            _ => None,
        }
    }
}

impl From<Number> for Payload {
    fn from(number: Number) -> Self {
        match number {
            Number::Byte(v) => Payload::Byte(v),
            Number::Long(v) => Payload::Long(v),
            Number::Double(v) => Payload::Double(v),
            Number::Uint64(v) => Payload::Uint64(v),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Absent => f.write_str("<absent>"),
            Payload::Byte(v) => write!(f, "{v}"),
            Payload::Long(v) => write!(f, "{v}"),
            Payload::Double(v) => write!(f, "{v}"),
            Payload::Uint64(v) => write!(f, "{v}"),
            Payload::String(s) => f.write_str(s),
            Payload::Array(id) => write!(f, "<array {id}>"),
            Payload::Instance { class, .. } => write!(f, "<{class} instance>"),
            Payload::Native(handle) => write!(f, "<native {:#x}>", handle.0),
            Payload::Reference(target) => write!(f, "{target}"),
        }
    }
}

/// Numeric view of a payload, ordered by promotion rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Byte(i8),
    Long(i64),
    Uint64(u64),
    Double(f64),
}

impl Number {
    /// byte < long < uint64 < double
    pub fn rank(self) -> u8 {
        match self {
            Number::Byte(_) => 0,
            Number::Long(_) => 1,
            Number::Uint64(_) => 2,
            Number::Double(_) => 3,
        }
    }

    pub fn tag(self) -> TypeTag {
        match self {
            Number::Byte(_) => TypeTag::Byte,
            Number::Long(_) => TypeTag::Long,
            Number::Uint64(_) => TypeTag::Uint64,
            Number::Double(_) => TypeTag::Double,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Number::Byte(v) => v as i64,
            Number::Long(v) => v,
            Number::Uint64(v) => v as i64,
            Number::Double(v) => v as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Number::Byte(v) => v as u64,
            Number::Long(v) => v as u64,
            Number::Uint64(v) => v,
            Number::Double(v) => v as u64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Byte(v) => v as f64,
            Number::Long(v) => v as f64,
            Number::Uint64(v) => v as f64,
            Number::Double(v) => v,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Byte(v) => v == 0,
            Number::Long(v) => v == 0,
            Number::Uint64(v) => v == 0,
            Number::Double(v) => v == 0.0,
        }
    }

    /// Converts to `tag`. The flag reports whether the value changed.
    /// Returns `None` when `tag` is not numeric.
    pub fn convert(self, tag: TypeTag) -> Option<(Number, bool)> {
        let converted = match tag {
            TypeTag::Byte => Number::Byte(self.as_i64() as i8),
            TypeTag::Long => Number::Long(self.as_i64()),
            TypeTag::Uint64 => Number::Uint64(self.as_u64()),
            TypeTag::Double => Number::Double(self.as_f64()),
            _ => return None,
        };
        let lossy = match (self, converted) {
            (Number::Double(a), Number::Double(b)) => a.to_bits() != b.to_bits(),
            (Number::Double(a), _) => converted.as_f64() != a,
            (_, Number::Double(b)) => b as i128 != self.as_i128(),
            _ => converted.as_i128() != self.as_i128(),
        };
        Some((converted, lossy))
    }

    pub fn as_i128(self) -> i128 {
        match self {
            Number::Byte(v) => v as i128,
            Number::Long(v) => v as i128,
            Number::Uint64(v) => v as i128,
            Number::Double(v) => v as i128,
        }
    }
}

/// A tagged value cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub ty: Type,
    pub constant: bool,
    /// Set by the first write. A const slot rejects every later write.
    pub assigned: bool,
    pub payload: Payload,
}

impl Object {
    /// Unassigned slot of the given declared type.
    pub fn typed(ty: Type) -> Self {
        let payload = Payload::default_for(ty.primary());
        Self {
            ty,
            constant: false,
            assigned: false,
            payload,
        }
    }

    pub fn auto() -> Self {
        Self::typed(Type::auto())
    }

    /// Assigned slot whose declared type is the payload's own tag.
    pub fn with_payload(payload: Payload) -> Self {
        Self {
            ty: Type::scalar(payload.tag()),
            constant: false,
            assigned: true,
            payload,
        }
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn tag(&self) -> TypeTag {
        self.payload.tag()
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::auto()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_round_trips_through_byte() {
        for tag in [
            TypeTag::Auto,
            TypeTag::Byte,
            TypeTag::Long,
            TypeTag::Double,
            TypeTag::Uint64,
            TypeTag::String,
            TypeTag::Array,
            TypeTag::Reference,
            TypeTag::Class,
            TypeTag::Native,
        ] {
            assert_eq!(TypeTag::try_from(tag as u8), Ok(tag));
        }
        assert_eq!(TypeTag::try_from(0x08), Err(0x08));
    }

    #[test]
    fn array_type_carries_element_tag() {
        let ty = Type::array_of(TypeTag::Double);
        assert_eq!(ty.primary(), TypeTag::Array);
        assert_eq!(ty.element(), TypeTag::Double);
        assert_eq!(ty.to_string(), "array:double");
        assert_eq!(Type::scalar(TypeTag::Long).element(), TypeTag::Auto);
    }

    #[test]
    fn typed_slot_starts_unassigned_with_default_payload() {
        let object = Object::typed(Type::scalar(TypeTag::Long));
        assert!(!object.assigned);
        assert_eq!(object.payload, Payload::Long(0));
        assert_eq!(Object::auto().payload, Payload::Absent);
    }

    #[test]
    fn conversion_reports_lossy_values() {
        let (n, lossy) = Number::Long(300).convert(TypeTag::Byte).unwrap();
        assert_eq!(n, Number::Byte(44));
        assert!(lossy);

        let (n, lossy) = Number::Byte(-3).convert(TypeTag::Long).unwrap();
        assert_eq!(n, Number::Long(-3));
        assert!(!lossy);

        let (n, lossy) = Number::Double(2.5).convert(TypeTag::Long).unwrap();
        assert_eq!(n, Number::Long(2));
        assert!(lossy);

        let (_, lossy) = Number::Long(7).convert(TypeTag::Double).unwrap();
        assert!(!lossy);

        assert!(Number::Long(1).convert(TypeTag::String).is_none());
    }

    #[test]
    fn promotion_rank_orders_double_highest() {
        assert!(Number::Byte(0).rank() < Number::Long(0).rank());
        assert!(Number::Long(0).rank() < Number::Uint64(0).rank());
        assert!(Number::Uint64(0).rank() < Number::Double(0.0).rank());
    }
}
