use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use bytes::Bytes;
use strata_error::{StrataResult, strata_bail, strata_err};

use crate::primitive::*;
use crate::typevalue::encode_type;
use crate::{Column, FieldPath, PrimitiveType, Ts, Type, TypeContext, TypeKind, zcode};

/// The error message of the `missing` value produced by a reference to an absent field.
pub const MISSING: &str = "missing";
/// The error message of the `quiet` value, which operators drop silently.
pub const QUIET: &str = "quiet";

/// A typed value: a type plus the body bytes of its canonical encoding.
///
/// A `None` body is the null value of the type. Bodies are reference counted, so cloning a
/// value is cheap and a value may outlive the batch it came from only after [`Value::keep`].
#[derive(Clone, Debug)]
pub struct Value {
    typ: Type,
    bytes: Option<Bytes>,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ && self.bytes == other.bytes
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.typ.hash(state);
        self.bytes.hash(state);
    }
}

impl Value {
    pub fn new(typ: Type, bytes: Option<Bytes>) -> Self {
        Self { typ, bytes }
    }

    fn prim(typ: Type, body: Vec<u8>) -> Self {
        Self::new(typ, Some(Bytes::from(body)))
    }

    pub fn null() -> Self {
        Self::new(Type::NULL, None)
    }

    /// The null value of a given type.
    pub fn null_of(typ: Type) -> Self {
        Self::new(typ, None)
    }

    pub fn int64(v: i64) -> Self {
        Self::prim(Type::INT64, encode_int(v))
    }

    pub fn int_of(typ: Type, v: i64) -> Self {
        Self::prim(typ, encode_int(v))
    }

    pub fn uint64(v: u64) -> Self {
        Self::prim(Type::UINT64, encode_uint(v))
    }

    pub fn uint_of(typ: Type, v: u64) -> Self {
        Self::prim(typ, encode_uint(v))
    }

    pub fn float64(v: f64) -> Self {
        Self::prim(Type::FLOAT64, encode_float64(v))
    }

    pub fn bool(v: bool) -> Self {
        Self::prim(Type::BOOL, encode_bool(v))
    }

    pub fn string(s: &str) -> Self {
        Self::prim(Type::STRING, s.as_bytes().to_vec())
    }

    pub fn bytes_value(b: &[u8]) -> Self {
        Self::prim(Type::BYTES, b.to_vec())
    }

    pub fn time(ts: Ts) -> Self {
        Self::prim(Type::TIME, encode_time(ts))
    }

    pub fn duration(nanos: i64) -> Self {
        Self::prim(Type::DURATION, encode_int(nanos))
    }

    pub fn ip(ip: IpAddr) -> Self {
        Self::prim(Type::IP, encode_ip(ip))
    }

    pub fn net(ip: IpAddr, prefix: u8) -> Self {
        Self::prim(Type::NET, encode_net(ip, prefix))
    }

    pub fn type_value(t: &Type) -> Self {
        let mut body = Vec::new();
        encode_type(t, &mut body);
        Self::prim(Type::TYPE, body)
    }

    pub fn error(msg: &str) -> Self {
        Self::prim(Type::ERROR, msg.as_bytes().to_vec())
    }

    pub fn missing() -> Self {
        Self::error(MISSING)
    }

    pub fn quiet() -> Self {
        Self::error(QUIET)
    }

    pub fn typ(&self) -> &Type {
        &self.typ
    }

    pub fn bytes(&self) -> Option<&Bytes> {
        self.bytes.as_ref()
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    /// The encoded size of the body, used for memory accounting.
    pub fn size(&self) -> usize {
        self.bytes.as_ref().map_or(0, Bytes::len)
    }

    /// A copy whose body no longer shares memory with its source.
    pub fn keep(&self) -> Value {
        Value::new(
            self.typ.clone(),
            self.bytes.as_ref().map(|b| Bytes::copy_from_slice(b)),
        )
    }

    pub fn is_null(&self) -> bool {
        self.bytes.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.typ.is_primitive(PrimitiveType::Error)
    }

    pub fn is_missing(&self) -> bool {
        self.is_error() && self.body() == Some(MISSING.as_bytes())
    }

    pub fn is_quiet(&self) -> bool {
        self.is_error() && self.body() == Some(QUIET.as_bytes())
    }

    /// True only for the boolean `true`.
    pub fn is_true(&self) -> bool {
        self.typ.is_primitive(PrimitiveType::Bool) && self.body() == Some(&[1])
    }

    pub fn as_int(&self) -> Option<i64> {
        let p = self.typ.as_primitive()?;
        let b = self.body()?;
        if p.is_signed() {
            decode_int(b).ok()
        } else if p.is_unsigned() {
            decode_uint(b).ok().and_then(|u| i64::try_from(u).ok())
        } else {
            None
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        let p = self.typ.as_primitive()?;
        let b = self.body()?;
        if p.is_unsigned() {
            decode_uint(b).ok()
        } else if p.is_signed() {
            decode_int(b).ok().and_then(|i| u64::try_from(i).ok())
        } else {
            None
        }
    }

    /// Any number as a float.
    pub fn as_float(&self) -> Option<f64> {
        let p = self.typ.as_primitive()?;
        let b = self.body()?;
        match p {
            PrimitiveType::Float64 => decode_float64(b).ok(),
            p if p.is_unsigned() => decode_uint(b).ok().map(|u| u as f64),
            p if p.is_signed() => decode_int(b).ok().map(|i| i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if !self.typ.is_primitive(PrimitiveType::Bool) {
            return None;
        }
        decode_bool(self.body()?).ok()
    }

    /// The text of a string or error value.
    pub fn as_str(&self) -> Option<&str> {
        match self.typ.as_primitive()? {
            PrimitiveType::String | PrimitiveType::Error => std::str::from_utf8(self.body()?).ok(),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<Ts> {
        match self.typ.as_primitive()? {
            PrimitiveType::Time => decode_time(self.body()?).ok(),
            _ => None,
        }
    }

    pub fn as_ip(&self) -> Option<IpAddr> {
        match self.typ.as_primitive()? {
            PrimitiveType::Ip => decode_ip(self.body()?).ok(),
            _ => None,
        }
    }

    /// The value of the named field of a record. Absent fields and non-records yield `None`.
    pub fn field(&self, name: &str) -> Option<Value> {
        let idx = self.typ.column_index(name)?;
        self.column(idx).ok()
    }

    /// The value of column `idx` of a record.
    pub fn column(&self, idx: usize) -> StrataResult<Value> {
        let cols = self
            .typ
            .columns()
            .ok_or_else(|| strata_err!(Invalid: "not a record: {}", self.typ))?;
        let col = cols
            .get(idx)
            .ok_or_else(|| strata_err!(Invalid: "no column {idx}"))?;
        let Some(body) = self.bytes.as_ref() else {
            return Ok(Value::null_of(col.typ.clone()));
        };
        let mut it = zcode::Iter::new(body);
        for _ in 0..idx {
            it.next_elem()?;
        }
        let elem = it.next_elem()?;
        Ok(Value::new(col.typ.clone(), elem.map(|e| body.slice_ref(e))))
    }

    /// All columns of a record, in order.
    pub fn columns(&self) -> StrataResult<Vec<(&Column, Value)>> {
        let cols = self
            .typ
            .columns()
            .ok_or_else(|| strata_err!(Invalid: "not a record: {}", self.typ))?;
        let Some(body) = self.bytes.as_ref() else {
            return Ok(cols
                .iter()
                .map(|c| (c, Value::null_of(c.typ.clone())))
                .collect());
        };
        let mut it = zcode::Iter::new(body);
        cols.iter()
            .map(|c| {
                let elem = it.next_elem()?;
                Ok((c, Value::new(c.typ.clone(), elem.map(|e| body.slice_ref(e)))))
            })
            .collect()
    }

    /// Follow a field path from this value. The empty path is the value itself.
    pub fn deref(&self, path: &FieldPath) -> Option<Value> {
        let mut v = self.clone();
        for name in path.parts() {
            v = v.field(name)?;
        }
        Some(v)
    }

    /// The elements of an array or set.
    pub fn elements(&self) -> StrataResult<Vec<Value>> {
        let inner = self
            .typ
            .inner()
            .ok_or_else(|| strata_err!(Invalid: "not an array or set: {}", self.typ))?
            .clone();
        let Some(body) = self.bytes.as_ref() else {
            return Ok(Vec::new());
        };
        zcode::Iter::new(body)
            .map(|e| Ok(Value::new(inner.clone(), e?.map(|e| body.slice_ref(e)))))
            .collect()
    }

    /// The key/value pairs of a map.
    pub fn entries(&self) -> StrataResult<Vec<(Value, Value)>> {
        let TypeKind::Map(kt, vt) = self.typ.kind() else {
            strata_bail!(Invalid: "not a map: {}", self.typ);
        };
        let Some(body) = self.bytes.as_ref() else {
            return Ok(Vec::new());
        };
        let mut it = zcode::Iter::new(body);
        let mut out = Vec::new();
        while !it.done() {
            let k = it.next_elem()?.map(|e| body.slice_ref(e));
            let v = it.next_elem()?.map(|e| body.slice_ref(e));
            out.push((Value::new(kt.clone(), k), Value::new(vt.clone(), v)));
        }
        Ok(out)
    }

    /// The selected member of a union value.
    pub fn union_inner(&self) -> StrataResult<Value> {
        let TypeKind::Union(types) = self.typ.kind() else {
            strata_bail!(Invalid: "not a union: {}", self.typ);
        };
        let Some(body) = self.bytes.as_ref() else {
            return Ok(Value::null());
        };
        let (selector, n) = zcode::read_uvarint(body)?;
        let typ = usize::try_from(selector)
            .ok()
            .and_then(|s| types.get(s))
            .ok_or_else(|| strata_err!(Corruption: "union selector {selector} out of range"))?
            .clone();
        let mut it = zcode::Iter::new(&body[n..]);
        let elem = it.next_elem()?;
        Ok(Value::new(typ, elem.map(|e| body.slice_ref(e))))
    }

    /// Build a record from named values, interning its type in `ctx`.
    pub fn record<S: Into<String>>(
        ctx: &TypeContext,
        fields: impl IntoIterator<Item = (S, Value)>,
    ) -> StrataResult<Value> {
        let mut cols = Vec::new();
        let mut body = Vec::new();
        for (name, value) in fields {
            zcode::append(&mut body, value.body());
            cols.push(Column::new(name, value.typ));
        }
        let typ = ctx.lookup_record(cols)?;
        Ok(Value::new(typ, Some(Bytes::from(body))))
    }

    /// Build a record of a known type from its column values.
    pub fn record_of(typ: Type, values: &[Value]) -> StrataResult<Value> {
        let cols = typ
            .columns()
            .ok_or_else(|| strata_err!(Invalid: "not a record type: {typ}"))?;
        if cols.len() != values.len() {
            strata_bail!(Invalid: "record type {typ} has {} columns, got {}", cols.len(), values.len());
        }
        let mut body = Vec::new();
        for v in values {
            zcode::append(&mut body, v.body());
        }
        Ok(Value::new(typ, Some(Bytes::from(body))))
    }

    /// Build an array. Elements must share one type; use [`Value::array_of`] otherwise.
    pub fn array(ctx: &TypeContext, elem: &Type, values: &[Value]) -> StrataResult<Value> {
        let typ = ctx.lookup_array(elem)?;
        let mut body = Vec::new();
        for v in values {
            zcode::append(&mut body, v.body());
        }
        Ok(Value::new(typ, Some(Bytes::from(body))))
    }

    /// Build an array from values of possibly different types, using a union element type when
    /// they disagree.
    pub fn array_of(ctx: &TypeContext, values: &[Value]) -> StrataResult<Value> {
        let mut types: Vec<Type> = Vec::new();
        for v in values {
            if !types.contains(v.typ()) {
                types.push(v.typ().clone());
            }
        }
        match types.len() {
            0 => Value::array(ctx, &Type::NULL, &[]),
            1 => Value::array(ctx, &types[0], values),
            _ => {
                let union = ctx.lookup_union(types)?;
                let wrapped = values
                    .iter()
                    .map(|v| Value::union_of(&union, v))
                    .collect::<StrataResult<Vec<_>>>()?;
                Value::array(ctx, &union, &wrapped)
            }
        }
    }

    /// Build a set: elements are sorted by their encoding and deduplicated.
    pub fn set(ctx: &TypeContext, elem: &Type, values: &[Value]) -> StrataResult<Value> {
        let typ = ctx.lookup_set(elem)?;
        let mut elems: Vec<Vec<u8>> = values.iter().map(|v| zcode::tagged(v.body())).collect();
        elems.sort();
        elems.dedup();
        Ok(Value::new(typ, Some(Bytes::from(elems.concat()))))
    }

    /// Build a map from key/value pairs.
    pub fn map(
        ctx: &TypeContext,
        key: &Type,
        val: &Type,
        entries: &[(Value, Value)],
    ) -> StrataResult<Value> {
        let typ = ctx.lookup_map(key, val)?;
        let mut body = Vec::new();
        for (k, v) in entries {
            zcode::append(&mut body, k.body());
            zcode::append(&mut body, v.body());
        }
        Ok(Value::new(typ, Some(Bytes::from(body))))
    }

    /// Wrap `value` as a member of `union`.
    pub fn union_of(union: &Type, value: &Value) -> StrataResult<Value> {
        let TypeKind::Union(types) = union.kind() else {
            strata_bail!(Invalid: "not a union: {union}");
        };
        let selector = types
            .iter()
            .position(|t| t == value.typ())
            .ok_or_else(|| strata_err!(Invalid: "{} is not a member of {union}", value.typ()))?;
        let mut body = Vec::new();
        zcode::append_uvarint(&mut body, selector as u64);
        zcode::append(&mut body, value.body());
        Ok(Value::new(union.clone(), Some(Bytes::from(body))))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::uint64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<Ts> for Value {
    fn from(v: Ts) -> Self {
        Value::time(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_access() {
        let ctx = TypeContext::new();
        let inner = Value::record(&ctx, [("orig_h", Value::string("10.0.0.1"))]).unwrap();
        let rec = Value::record(
            &ctx,
            [
                ("ts", Value::time(Ts(100))),
                ("id", inner),
                ("n", Value::null_of(Type::INT64)),
            ],
        )
        .unwrap();
        assert_eq!(rec.field("ts").unwrap().as_time(), Some(Ts(100)));
        assert_eq!(
            rec.deref(&FieldPath::dotted("id.orig_h"))
                .unwrap()
                .as_str(),
            Some("10.0.0.1")
        );
        assert!(rec.field("n").unwrap().is_null());
        assert!(rec.field("nope").is_none());
        assert_eq!(rec.columns().unwrap().len(), 3);
    }

    #[test]
    fn mixed_array_uses_union() {
        let ctx = TypeContext::new();
        let arr = Value::array_of(&ctx, &[Value::int64(1), Value::string("a")]).unwrap();
        assert_eq!(arr.typ().to_string(), "[(int64,string)]");
        let elems = arr.elements().unwrap();
        assert_eq!(elems[1].union_inner().unwrap(), Value::string("a"));
    }

    #[test]
    fn sets_are_canonical() {
        let ctx = TypeContext::new();
        let a = Value::set(&ctx, &Type::INT64, &[Value::int64(2), Value::int64(1)]).unwrap();
        let b = Value::set(
            &ctx,
            &Type::INT64,
            &[Value::int64(1), Value::int64(2), Value::int64(1)],
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_and_quiet() {
        assert!(Value::missing().is_missing());
        assert!(Value::quiet().is_quiet());
        assert!(!Value::error("boom").is_missing());
        assert!(Value::bool(true).is_true());
        assert!(!Value::int64(1).is_true());
    }
}
