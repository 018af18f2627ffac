//! Operator semantics over payloads.
//!
//! Mixed numeric operands promote to the higher rank (byte < long < uint64 <
//! double). Byte results that overflow widen to long; long and uint64
//! overflow is a fault, and so is an integer that does not fit the kind it
//! is promoted to. Mixed integer comparisons are exact.

use std::cmp::Ordering;

use crate::error::{VmError, VmResult};
use crate::object::{Number, Payload, Type, TypeTag};
use crate::op::Op;

fn unsupported(op: Op, lhs: &Payload, rhs: &Payload) -> VmError {
    VmError::UnsupportedOperands {
        op,
        lhs: lhs.tag(),
        rhs: rhs.tag(),
    }
}

/// Promotes both operands to the higher of their ranks. `None` when an
/// integer operand changes value on the way to another integer kind.
fn promote(lhs: Number, rhs: Number) -> Option<(Number, Number)> {
    let tag = if lhs.rank() >= rhs.rank() {
        lhs.tag()
    } else {
        rhs.tag()
    };
    let convert = |n: Number| match n.convert(tag) {
        Some((_, true)) if tag != TypeTag::Double => None,
        Some((converted, _)) => Some(converted),
        None => Some(n),
    };
    Some((convert(lhs)?, convert(rhs)?))
}

pub fn binary(op: Op, lhs: &Payload, rhs: &Payload) -> VmResult<Payload> {
    if let (Payload::String(a), Payload::String(b)) = (lhs, rhs) {
        return match op {
            Op::Add => Ok(Payload::String(format!("{a}{b}"))),
            _ => Err(unsupported(op, lhs, rhs)),
        };
    }
    let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
        return Err(unsupported(op, lhs, rhs));
    };
    let Some(promoted) = promote(a, b) else {
        return Err(VmError::Overflow(op));
    };
    match promoted {
        (Number::Byte(a), Number::Byte(b)) => byte_op(op, a, b),
        (Number::Long(a), Number::Long(b)) => long_op(op, a, b).map(Payload::Long),
        (Number::Uint64(a), Number::Uint64(b)) => uint_op(op, a, b).map(Payload::Uint64),
        (Number::Double(a), Number::Double(b)) => {
            double_op(op, a, b).ok_or_else(|| unsupported(op, lhs, rhs))
        }
        _ => Err(unsupported(op, lhs, rhs)),
    }
}

/// Bytes stay bytes while the result fits, otherwise widen to long.
fn byte_op(op: Op, a: i8, b: i8) -> VmResult<Payload> {
    let wide = long_op(op, a as i64, b as i64)?;
    Ok(match i8::try_from(wide) {
        Ok(narrow) => Payload::Byte(narrow),
        Err(_) => Payload::Long(wide),
    })
}

fn shift_amount(op: Op, amount: i64) -> VmResult<u32> {
    u32::try_from(amount)
        .ok()
        .filter(|&n| n < 64)
        .ok_or(VmError::Overflow(op))
}

fn long_op(op: Op, a: i64, b: i64) -> VmResult<i64> {
    let result = match op {
        Op::Add => a.checked_add(b),
        Op::Sub => a.checked_sub(b),
        Op::Mul => a.checked_mul(b),
        Op::Div | Op::Rem if b == 0 => return Err(VmError::DivisionByZero),
        Op::Div => a.checked_div(b),
        Op::Rem => a.checked_rem(b),
        Op::Shl => a.checked_shl(shift_amount(op, b)?),
        Op::Shr => a.checked_shr(shift_amount(op, b)?),
        Op::And => Some(a & b),
        Op::Or => Some(a | b),
        Op::Xor => Some(a ^ b),
        _ => {
            return Err(VmError::UnsupportedOperands {
                op,
                lhs: TypeTag::Long,
                rhs: TypeTag::Long,
            });
        }
    };
    result.ok_or(VmError::Overflow(op))
}

fn uint_op(op: Op, a: u64, b: u64) -> VmResult<u64> {
    let result = match op {
        Op::Add => a.checked_add(b),
        Op::Sub => a.checked_sub(b),
        Op::Mul => a.checked_mul(b),
        Op::Div | Op::Rem if b == 0 => return Err(VmError::DivisionByZero),
        Op::Div => a.checked_div(b),
        Op::Rem => a.checked_rem(b),
        Op::Shl => a.checked_shl(shift_amount(op, b as i64)?),
        Op::Shr => a.checked_shr(shift_amount(op, b as i64)?),
        Op::And => Some(a & b),
        Op::Or => Some(a | b),
        Op::Xor => Some(a ^ b),
        _ => {
            return Err(VmError::UnsupportedOperands {
                op,
                lhs: TypeTag::Uint64,
                rhs: TypeTag::Uint64,
            });
        }
    };
    result.ok_or(VmError::Overflow(op))
}

fn double_op(op: Op, a: f64, b: f64) -> Option<Payload> {
    let result = match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div => a / b,
        Op::Rem => a % b,
        _ => return None,
    };
    Some(Payload::Double(result))
}

pub fn negate(value: &Payload) -> VmResult<Payload> {
    match *value {
        Payload::Byte(v) => Ok(match v.checked_neg() {
            Some(v) => Payload::Byte(v),
            None => Payload::Long(-(v as i64)),
        }),
        Payload::Long(v) => v.checked_neg().map(Payload::Long).ok_or(VmError::Overflow(Op::Neg)),
        Payload::Uint64(v) => i64::try_from(v)
            .map(|v| Payload::Long(-v))
            .map_err(|_| VmError::Overflow(Op::Neg)),
        Payload::Double(v) => Ok(Payload::Double(-v)),
        ref other => Err(VmError::UnsupportedOperands {
            op: Op::Neg,
            lhs: other.tag(),
            rhs: TypeTag::Auto,
        }),
    }
}

/// `None` when the operands are unordered (NaN).
pub fn compare(lhs: &Payload, rhs: &Payload) -> VmResult<Option<Ordering>> {
    if let (Payload::String(a), Payload::String(b)) = (lhs, rhs) {
        return Ok(Some(a.cmp(b)));
    }
    let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
        return Err(unsupported(Op::Cmp, lhs, rhs));
    };
    Ok(match (a, b) {
        (Number::Double(_), _) | (_, Number::Double(_)) => a.as_f64().partial_cmp(&b.as_f64()),
        _ => Some(a.as_i128().cmp(&b.as_i128())),
    })
}

/// Branch condition: any non-zero number.
pub fn truthy(value: &Payload) -> VmResult<bool> {
    value
        .as_number()
        .map(|n| !n.is_zero())
        .ok_or(VmError::TypeMismatch {
            expected: TypeTag::Byte,
            found: value.tag(),
        })
}

/// Explicit conversion of `value` to the declared type `ty`.
pub fn convert(value: &Payload, ty: &Type) -> VmResult<Payload> {
    let target = ty.primary();
    let mismatch = || VmError::TypeMismatch {
        expected: target,
        found: value.tag(),
    };
    match (target, value) {
        (TypeTag::Auto, _) => Ok(value.clone()),
        (TypeTag::String, Payload::String(_)) => Ok(value.clone()),
        (TypeTag::String, _) if value.tag().is_numeric() => Ok(Payload::String(value.to_string())),
        (tag, Payload::String(text)) if tag.is_numeric() => parse_number(text.trim(), tag)
            .map(Payload::from)
            .ok_or_else(mismatch),
        (tag, _) if tag.is_numeric() => value
            .as_number()
            .and_then(|n| n.convert(tag))
            .map(|(n, _)| n.into())
            .ok_or_else(mismatch),
        (tag, _) if tag == value.tag() => Ok(value.clone()),
        _ => Err(mismatch()),
    }
}

fn parse_number(text: &str, tag: TypeTag) -> Option<Number> {
    match tag {
        TypeTag::Byte => text.parse().ok().map(Number::Byte),
        TypeTag::Long => text.parse().ok().map(Number::Long),
        TypeTag::Uint64 => text.parse().ok().map(Number::Uint64),
        TypeTag::Double => text.parse().ok().map(Number::Double),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_kind_arithmetic() {
        assert_eq!(binary(Op::Add, &Payload::Long(2), &Payload::Long(3)), Ok(Payload::Long(5)));
        assert_eq!(binary(Op::Rem, &Payload::Long(7), &Payload::Long(4)), Ok(Payload::Long(3)));
        assert_eq!(
            binary(Op::Div, &Payload::Double(1.0), &Payload::Double(4.0)),
            Ok(Payload::Double(0.25))
        );
        assert_eq!(binary(Op::Shl, &Payload::Uint64(1), &Payload::Uint64(8)), Ok(Payload::Uint64(256)));
        assert_eq!(binary(Op::Xor, &Payload::Byte(6), &Payload::Byte(3)), Ok(Payload::Byte(5)));
    }

    #[test]
    fn byte_overflow_widens_to_long() {
        assert_eq!(binary(Op::Add, &Payload::Byte(100), &Payload::Byte(100)), Ok(Payload::Long(200)));
        assert_eq!(binary(Op::Add, &Payload::Byte(1), &Payload::Byte(2)), Ok(Payload::Byte(3)));
        assert_eq!(negate(&Payload::Byte(i8::MIN)), Ok(Payload::Long(128)));
    }

    #[test]
    fn mixed_operands_promote_by_rank() {
        assert_eq!(binary(Op::Add, &Payload::Byte(1), &Payload::Long(2)), Ok(Payload::Long(3)));
        assert_eq!(binary(Op::Mul, &Payload::Long(3), &Payload::Double(0.5)), Ok(Payload::Double(1.5)));
        assert_eq!(binary(Op::Add, &Payload::Long(2), &Payload::Uint64(3)), Ok(Payload::Uint64(5)));
        assert_eq!(binary(Op::Sub, &Payload::Uint64(3), &Payload::Double(0.5)), Ok(Payload::Double(2.5)));
    }

    #[test]
    fn integer_faults() {
        assert_eq!(binary(Op::Div, &Payload::Long(1), &Payload::Long(0)), Err(VmError::DivisionByZero));
        assert_eq!(binary(Op::Rem, &Payload::Uint64(1), &Payload::Uint64(0)), Err(VmError::DivisionByZero));
        assert_eq!(
            binary(Op::Add, &Payload::Long(i64::MAX), &Payload::Long(1)),
            Err(VmError::Overflow(Op::Add))
        );
        assert_eq!(
            binary(Op::Sub, &Payload::Uint64(0), &Payload::Uint64(1)),
            Err(VmError::Overflow(Op::Sub))
        );
        assert_eq!(binary(Op::Shl, &Payload::Long(1), &Payload::Long(64)), Err(VmError::Overflow(Op::Shl)));
    }

    #[test]
    fn negative_values_do_not_wrap_into_uint64() {
        assert_eq!(
            binary(Op::Add, &Payload::Long(-1), &Payload::Uint64(0)),
            Err(VmError::Overflow(Op::Add))
        );
        assert_eq!(
            binary(Op::Mul, &Payload::Uint64(2), &Payload::Byte(-3)),
            Err(VmError::Overflow(Op::Mul))
        );
        assert_eq!(binary(Op::Sub, &Payload::Long(7), &Payload::Uint64(2)), Ok(Payload::Uint64(5)));
    }

    #[test]
    fn mixed_sign_comparisons_are_exact() {
        assert_eq!(compare(&Payload::Long(-1), &Payload::Uint64(0)), Ok(Some(Ordering::Less)));
        assert_eq!(
            compare(&Payload::Uint64(u64::MAX), &Payload::Long(i64::MAX)),
            Ok(Some(Ordering::Greater))
        );
        assert_eq!(compare(&Payload::Byte(-1), &Payload::Uint64(u64::MAX)), Ok(Some(Ordering::Less)));
        assert_eq!(compare(&Payload::Uint64(3), &Payload::Long(3)), Ok(Some(Ordering::Equal)));
    }

    #[test]
    fn text_only_concatenates() {
        let a = Payload::String("ab".into());
        let b = Payload::String("cd".into());
        assert_eq!(binary(Op::Add, &a, &b), Ok(Payload::String("abcd".into())));
        assert_eq!(
            binary(Op::Sub, &a, &b),
            Err(VmError::UnsupportedOperands {
                op: Op::Sub,
                lhs: TypeTag::String,
                rhs: TypeTag::String
            })
        );
        assert!(binary(Op::Add, &a, &Payload::Long(1)).is_err());
        assert!(binary(Op::And, &Payload::Double(1.0), &Payload::Double(1.0)).is_err());
    }

    #[test]
    fn comparisons() {
        assert_eq!(compare(&Payload::Long(1), &Payload::Double(1.5)), Ok(Some(Ordering::Less)));
        assert_eq!(compare(&Payload::Byte(-1), &Payload::Long(-1)), Ok(Some(Ordering::Equal)));
        assert_eq!(
            compare(&Payload::String("b".into()), &Payload::String("a".into())),
            Ok(Some(Ordering::Greater))
        );
        assert_eq!(compare(&Payload::Double(f64::NAN), &Payload::Double(0.0)), Ok(None));
        assert!(compare(&Payload::String("a".into()), &Payload::Long(0)).is_err());
    }

    #[test]
    fn truthiness() {
        assert_eq!(truthy(&Payload::Byte(1)), Ok(true));
        assert_eq!(truthy(&Payload::Double(0.0)), Ok(false));
        assert!(truthy(&Payload::String("1".into())).is_err());
    }

    #[test]
    fn explicit_conversions() {
        let long = Type::scalar(TypeTag::Long);
        let text = Type::scalar(TypeTag::String);
        assert_eq!(convert(&Payload::String(" 42 ".into()), &long), Ok(Payload::Long(42)));
        assert_eq!(convert(&Payload::Double(2.9), &long), Ok(Payload::Long(2)));
        assert_eq!(convert(&Payload::Long(7), &text), Ok(Payload::String("7".into())));
        assert!(convert(&Payload::String("x".into()), &long).is_err());
        assert_eq!(convert(&Payload::Byte(1), &Type::auto()), Ok(Payload::Byte(1)));
    }
}
