//! Conversion between JSON documents and values.
//!
//! Objects become records with fields in document order, numbers become `int64` when they
//! are integral and `float64` otherwise, and a string field named `ts` holding an RFC 3339
//! timestamp becomes a `time`.

use serde_json::{Map, Number};
use strata_error::{StrataResult, strata_bail, strata_err};

use crate::primitive::*;
use crate::{PrimitiveType, Ts, TypeContext, TypeKind, Value};

pub fn from_json(ctx: &TypeContext, json: &serde_json::Value) -> StrataResult<Value> {
    convert(ctx, None, json)
}

/// Parse a JSON document into a value.
pub fn parse(ctx: &TypeContext, s: &str) -> StrataResult<Value> {
    let json: serde_json::Value = serde_json::from_str(s)?;
    from_json(ctx, &json)
}

fn convert(ctx: &TypeContext, key: Option<&str>, json: &serde_json::Value) -> StrataResult<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::null(),
        serde_json::Value::Bool(b) => Value::bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::int64(i)
            } else if let Some(u) = n.as_u64() {
                Value::uint64(u)
            } else {
                Value::float64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => match key {
            Some("ts") => Ts::parse(s).map_or_else(|_| Value::string(s), Value::time),
            _ => Value::string(s),
        },
        serde_json::Value::Array(elems) => {
            let values = elems
                .iter()
                .map(|e| convert(ctx, None, e))
                .collect::<StrataResult<Vec<_>>>()?;
            Value::array_of(ctx, &values)?
        }
        serde_json::Value::Object(obj) => {
            let fields = obj
                .iter()
                .map(|(k, v)| Ok((k.clone(), convert(ctx, Some(k), v)?)))
                .collect::<StrataResult<Vec<_>>>()?;
            Value::record(ctx, fields)?
        }
    })
}

/// Render a value as JSON. Times become RFC 3339 strings, ips and nets their text form, and
/// maps arrays of `{key, value}` objects.
pub fn to_json(value: &Value) -> StrataResult<serde_json::Value> {
    let Some(body) = value.body() else {
        return Ok(serde_json::Value::Null);
    };
    Ok(match value.typ().kind() {
        TypeKind::Primitive(p) => match p {
            p if p.is_unsigned() => serde_json::Value::from(decode_uint(body)?),
            PrimitiveType::Time => serde_json::Value::from(decode_time(body)?.to_string()),
            p if p.is_signed() => serde_json::Value::from(decode_int(body)?),
            PrimitiveType::Float64 => Number::from_f64(decode_float64(body)?)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            PrimitiveType::Bool => serde_json::Value::from(decode_bool(body)?),
            PrimitiveType::String | PrimitiveType::Error => {
                serde_json::Value::from(String::from_utf8_lossy(body).into_owned())
            }
            PrimitiveType::Null => serde_json::Value::Null,
            _ => serde_json::Value::from(value.to_string()),
        },
        TypeKind::Record(_) => {
            let mut obj = Map::new();
            for (col, v) in value.columns()? {
                obj.insert(col.name.clone(), to_json(&v)?);
            }
            serde_json::Value::Object(obj)
        }
        TypeKind::Array(_) | TypeKind::Set(_) => serde_json::Value::Array(
            value
                .elements()?
                .iter()
                .map(to_json)
                .collect::<StrataResult<_>>()?,
        ),
        TypeKind::Map(..) => serde_json::Value::Array(
            value
                .entries()?
                .iter()
                .map(|(k, v)| {
                    let mut obj = Map::new();
                    obj.insert("key".to_string(), to_json(k)?);
                    obj.insert("value".to_string(), to_json(v)?);
                    Ok(serde_json::Value::Object(obj))
                })
                .collect::<StrataResult<_>>()?,
        ),
        TypeKind::Union(_) => to_json(&value.union_inner()?)?,
    })
}

/// Decode a JSON record into a serde type, the bridge used for metadata records.
pub fn to_struct<T: serde::de::DeserializeOwned>(value: &Value) -> StrataResult<T> {
    if !value.typ().is_record() {
        strata_bail!(Invalid: "expected a record, got {}", value.typ());
    }
    serde_json::from_value(to_json(value)?)
        .map_err(|e| strata_err!(Corruption: "decoding {}: {e}", value.typ()))
}
