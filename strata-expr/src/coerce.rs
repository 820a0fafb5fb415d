//! Cross-type equality, ordering and arithmetic on values.

use std::cmp::Ordering;
use std::net::IpAddr;

use strata_value::primitive::{decode_net, encode_int};
use strata_value::{PrimitiveType, Type, TypeKind, Value};

/// A numeric view of a value.
#[derive(Clone, Copy, Debug)]
pub enum Number {
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl Number {
    pub fn of(v: &Value) -> Option<Number> {
        let p = v.typ().as_primitive()?;
        if v.is_null() {
            return None;
        }
        match p {
            PrimitiveType::Float64 => v.as_float().map(Number::Float),
            PrimitiveType::Time | PrimitiveType::Duration => None,
            p if p.is_unsigned() => v.as_uint().map(Number::Uint),
            p if p.is_signed() => v.as_int().map(Number::Int),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Uint(u) => u as f64,
            Number::Float(f) => f,
        }
    }

    pub fn total_cmp(self, other: Number) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (Number::Uint(a), Number::Uint(b)) => a.cmp(&b),
            (Number::Int(a), Number::Uint(b)) => {
                u64::try_from(a).map_or(Ordering::Less, |a| a.cmp(&b))
            }
            (Number::Uint(a), Number::Int(b)) => {
                u64::try_from(b).map_or(Ordering::Greater, |b| a.cmp(&b))
            }
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }
}

/// Equality with numeric promotion. Non-numeric values are equal when their types match and
/// their encodings are identical.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (Number::of(a), Number::of(b)) {
        return x.total_cmp(y) == Ordering::Equal;
    }
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    match (a.typ().kind(), b.typ().kind()) {
        (TypeKind::Union(_), _) => a.union_inner().is_ok_and(|inner| values_equal(&inner, b)),
        (_, TypeKind::Union(_)) => b.union_inner().is_ok_and(|inner| values_equal(a, &inner)),
        _ => a.typ() == b.typ() && a.body() == b.body(),
    }
}

/// Ordering between two comparable non-null values, `None` when the types cannot be compared.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (Number::of(a), Number::of(b)) {
        return Some(x.total_cmp(y));
    }
    if a.is_null() || b.is_null() {
        return None;
    }
    let (pa, pb) = (a.typ().as_primitive()?, b.typ().as_primitive()?);
    if pa != pb {
        return None;
    }
    match pa {
        PrimitiveType::Time | PrimitiveType::Duration => Some(a.as_int()?.cmp(&b.as_int()?)),
        PrimitiveType::Bool => Some(a.as_bool()?.cmp(&b.as_bool()?)),
        PrimitiveType::Ip => Some(a.as_ip()?.cmp(&b.as_ip()?)),
        PrimitiveType::String | PrimitiveType::Bytes | PrimitiveType::Error => {
            Some(a.body()?.cmp(b.body()?))
        }
        _ => None,
    }
}

/// Whether `ip` lies inside the network `net`.
pub fn net_contains(net: &Value, ip: &Value) -> bool {
    let (Some(body), Some(addr)) = (net.body(), ip.as_ip()) else {
        return false;
    };
    if !net.typ().is_primitive(PrimitiveType::Net) {
        return false;
    }
    let Ok((base, prefix)) = decode_net(body) else {
        return false;
    };
    match (base, addr) {
        (IpAddr::V4(base), IpAddr::V4(addr)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix.min(32))).unwrap_or(0);
            u32::from(base) & mask == u32::from(addr) & mask
        }
        (IpAddr::V6(base), IpAddr::V6(addr)) => {
            let mask = u128::MAX
                .checked_shl(128 - u32::from(prefix.min(128)))
                .unwrap_or(0);
            u128::from(base) & mask == u128::from(addr) & mask
        }
        _ => false,
    }
}

/// The rank used to order values of different types in a total order: nulls are handled by
/// the caller, numbers sort together, then everything else by type id.
pub(crate) fn type_rank(t: &Type) -> u32 {
    match t.as_primitive() {
        Some(p) if p.is_number() && p != PrimitiveType::Time && p != PrimitiveType::Duration => 0,
        _ => t.id() + 1,
    }
}

/// Arithmetic over two values. Errors are in-band values.
pub fn arith(op: crate::Operator, a: &Value, b: &Value) -> Value {
    use crate::Operator;
    if a.is_error() {
        return a.clone();
    }
    if b.is_error() {
        return b.clone();
    }
    if a.is_null() || b.is_null() {
        return Value::null();
    }
    let (pa, pb) = (a.typ().as_primitive(), b.typ().as_primitive());
    match (op, pa, pb) {
        (Operator::Add, Some(PrimitiveType::String), Some(PrimitiveType::String)) => {
            return Value::string(&format!(
                "{}{}",
                a.as_str().unwrap_or_default(),
                b.as_str().unwrap_or_default()
            ));
        }
        (Operator::Add, Some(PrimitiveType::Time), Some(PrimitiveType::Duration))
        | (Operator::Add, Some(PrimitiveType::Duration), Some(PrimitiveType::Duration))
        | (Operator::Sub, Some(PrimitiveType::Time), Some(PrimitiveType::Duration))
        | (Operator::Sub, Some(PrimitiveType::Duration), Some(PrimitiveType::Duration)) => {
            let (x, y) = (a.as_int().unwrap_or(0), b.as_int().unwrap_or(0));
            let r = if op == Operator::Add {
                x.checked_add(y)
            } else {
                x.checked_sub(y)
            };
            return match r {
                Some(r) => Value::new(a.typ().clone(), Some(encode_int(r).into())),
                None => Value::error("overflow"),
            };
        }
        (Operator::Sub, Some(PrimitiveType::Time), Some(PrimitiveType::Time)) => {
            let (x, y) = (a.as_int().unwrap_or(0), b.as_int().unwrap_or(0));
            return x
                .checked_sub(y)
                .map_or_else(|| Value::error("overflow"), Value::duration);
        }
        _ => {}
    }
    let (Some(x), Some(y)) = (Number::of(a), Number::of(b)) else {
        return Value::error(&format!("type mismatch: {} {op} {}", a.typ(), b.typ()));
    };
    match (x, y) {
        (Number::Float(_), _) | (_, Number::Float(_)) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            Value::float64(match op {
                Operator::Add => x + y,
                Operator::Sub => x - y,
                Operator::Mul => x * y,
                Operator::Div => x / y,
                _ => x % y,
            })
        }
        (Number::Uint(x), Number::Uint(y)) => {
            let r = match op {
                Operator::Add => x.checked_add(y),
                Operator::Sub => x.checked_sub(y),
                Operator::Mul => x.checked_mul(y),
                Operator::Div => x.checked_div(y),
                _ => x.checked_rem(y),
            };
            r.map_or_else(|| int_error(op), Value::uint64)
        }
        _ => {
            let (Some(x), Some(y)) = (to_i64(x), to_i64(y)) else {
                return Value::error("overflow");
            };
            let r = match op {
                Operator::Add => x.checked_add(y),
                Operator::Sub => x.checked_sub(y),
                Operator::Mul => x.checked_mul(y),
                Operator::Div => x.checked_div(y),
                _ => x.checked_rem(y),
            };
            r.map_or_else(|| int_error(op), Value::int64)
        }
    }
}

fn int_error(op: crate::Operator) -> Value {
    match op {
        crate::Operator::Div | crate::Operator::Mod => Value::error("divide by zero"),
        _ => Value::error("overflow"),
    }
}

fn to_i64(n: Number) -> Option<i64> {
    match n {
        Number::Int(i) => Some(i),
        Number::Uint(u) => i64::try_from(u).ok(),
        Number::Float(f) => Some(f as i64),
    }
}
