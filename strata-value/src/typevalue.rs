//! Self-contained structural encoding of a type, used as the body of `type` values.

use strata_error::{StrataResult, strata_bail};

use crate::zcode::{append_uvarint, read_uvarint};
use crate::{Column, PrimitiveType, Type, TypeContext, TypeKind};

const TAG_RECORD: u8 = 0xf0;
const TAG_ARRAY: u8 = 0xf1;
const TAG_SET: u8 = 0xf2;
const TAG_MAP: u8 = 0xf3;
const TAG_UNION: u8 = 0xf4;

pub fn encode_type(t: &Type, out: &mut Vec<u8>) {
    match t.kind() {
        TypeKind::Primitive(p) => out.push(p as u8),
        TypeKind::Record(cols) => {
            out.push(TAG_RECORD);
            append_uvarint(out, cols.len() as u64);
            for col in cols {
                append_uvarint(out, col.name.len() as u64);
                out.extend_from_slice(col.name.as_bytes());
                encode_type(&col.typ, out);
            }
        }
        TypeKind::Array(inner) => {
            out.push(TAG_ARRAY);
            encode_type(inner, out);
        }
        TypeKind::Set(inner) => {
            out.push(TAG_SET);
            encode_type(inner, out);
        }
        TypeKind::Map(k, v) => {
            out.push(TAG_MAP);
            encode_type(k, out);
            encode_type(v, out);
        }
        TypeKind::Union(types) => {
            out.push(TAG_UNION);
            append_uvarint(out, types.len() as u64);
            for t in types {
                encode_type(t, out);
            }
        }
    }
}

/// Decode a type from the front of `buf`, advancing it.
pub fn decode_type(ctx: &TypeContext, buf: &mut &[u8]) -> StrataResult<Type> {
    let cur = *buf;
    let Some((&tag, rest)) = cur.split_first() else {
        strata_bail!(Corruption: "truncated type value");
    };
    *buf = rest;
    match tag {
        TAG_RECORD => {
            let n = uvarint(buf)?;
            let mut cols = Vec::new();
            for _ in 0..n {
                let len = usize::try_from(uvarint(buf)?).unwrap_or(usize::MAX);
                if len > buf.len() {
                    strata_bail!(Corruption: "truncated field name in type value");
                }
                let cur = *buf;
                let (name, rest) = cur.split_at(len);
                *buf = rest;
                let name = String::from_utf8_lossy(name).into_owned();
                let typ = decode_type(ctx, buf)?;
                cols.push(Column::new(name, typ));
            }
            ctx.lookup_record(cols)
        }
        TAG_ARRAY => {
            let inner = decode_type(ctx, buf)?;
            ctx.lookup_array(&inner)
        }
        TAG_SET => {
            let inner = decode_type(ctx, buf)?;
            ctx.lookup_set(&inner)
        }
        TAG_MAP => {
            let k = decode_type(ctx, buf)?;
            let v = decode_type(ctx, buf)?;
            ctx.lookup_map(&k, &v)
        }
        TAG_UNION => {
            let n = uvarint(buf)?;
            let mut types = Vec::new();
            for _ in 0..n {
                types.push(decode_type(ctx, buf)?);
            }
            ctx.lookup_union(types)
        }
        id => match PrimitiveType::from_id(u32::from(id)) {
            Some(p) => Ok(Type::primitive(p)),
            None => strata_bail!(Corruption: "unknown type tag {id}"),
        },
    }
}

fn uvarint(buf: &mut &[u8]) -> StrataResult<u64> {
    let cur = *buf;
    let (v, n) = read_uvarint(cur)?;
    *buf = &cur[n..];
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_type_survives_new_context() {
        let ctx = TypeContext::new();
        let inner = ctx.lookup_set(&Type::IP).unwrap();
        let union = ctx.lookup_union(vec![Type::INT64, Type::STRING]).unwrap();
        let rec = ctx
            .lookup_record(vec![Column::new("hosts", inner), Column::new("u", union)])
            .unwrap();
        let mut body = Vec::new();
        encode_type(&rec, &mut body);

        let other = TypeContext::new();
        let mut buf = body.as_slice();
        let decoded = decode_type(&other, &mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(decoded.to_string(), "{hosts:|[ip]|,u:(int64,string)}");
    }
}
