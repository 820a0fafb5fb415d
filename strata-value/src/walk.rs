//! Depth-first traversal over the type tree of a value.

use strata_error::StrataResult;

use crate::{Type, TypeKind, zcode};

/// What the walker does after visiting a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    /// Descend into the children of a container.
    Continue,
    /// Do not descend into this node's children.
    SkipContainer,
    /// End the walk.
    Stop,
}

/// Visit `(typ, body)` and, unless told otherwise, every nested value of records, arrays,
/// sets, maps and unions. Returns `false` when a visitor stopped the walk.
pub fn walk<F>(typ: &Type, body: Option<&[u8]>, visit: &mut F) -> StrataResult<bool>
where
    F: FnMut(&Type, Option<&[u8]>) -> StrataResult<Visit>,
{
    match visit(typ, body)? {
        Visit::Stop => return Ok(false),
        Visit::SkipContainer => return Ok(true),
        Visit::Continue => {}
    }
    let Some(body) = body else {
        return Ok(true);
    };
    match typ.kind() {
        TypeKind::Primitive(_) => Ok(true),
        TypeKind::Record(cols) => {
            let mut it = zcode::Iter::new(body);
            for col in cols {
                if !walk(&col.typ, it.next_elem()?, visit)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        TypeKind::Array(inner) | TypeKind::Set(inner) => {
            for elem in zcode::Iter::new(body) {
                if !walk(inner, elem?, visit)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        TypeKind::Map(kt, vt) => {
            let mut it = zcode::Iter::new(body);
            while !it.done() {
                if !walk(kt, it.next_elem()?, visit)? || !walk(vt, it.next_elem()?, visit)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        TypeKind::Union(types) => {
            let (selector, n) = zcode::read_uvarint(body)?;
            let Some(inner) = usize::try_from(selector).ok().and_then(|s| types.get(s)) else {
                return Ok(true);
            };
            let mut it = zcode::Iter::new(&body[n..]);
            walk(inner, it.next_elem()?, visit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TypeContext, Value};

    #[test]
    fn finds_nested_values_of_a_type() {
        let ctx = TypeContext::new();
        let arr = Value::array(&ctx, &Type::INT64, &[Value::int64(1), Value::int64(2)]).unwrap();
        let rec = Value::record(&ctx, [("a", Value::int64(0)), ("b", arr), ("c", Value::string("s"))])
            .unwrap();
        let mut seen = Vec::new();
        walk(rec.typ(), rec.body(), &mut |t, b| {
            if *t == Type::INT64 {
                seen.push(Value::new(t.clone(), b.map(bytes::Bytes::copy_from_slice)).as_int());
                return Ok(Visit::SkipContainer);
            }
            Ok(Visit::Continue)
        })
        .unwrap();
        assert_eq!(seen, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn stop_ends_the_walk() {
        let ctx = TypeContext::new();
        let rec = Value::record(&ctx, [("a", Value::int64(0)), ("b", Value::int64(1))]).unwrap();
        let mut count = 0;
        let finished = walk(rec.typ(), rec.body(), &mut |t, _| {
            if *t == Type::INT64 {
                count += 1;
                return Ok(Visit::Stop);
            }
            Ok(Visit::Continue)
        })
        .unwrap();
        assert!(!finished);
        assert_eq!(count, 1);
    }
}
