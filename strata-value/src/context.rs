use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use itertools::Itertools;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use strata_error::{StrataResult, strata_bail, strata_err};

use crate::types::{Complex, ComplexType, FIRST_COMPLEX_ID};
use crate::{Column, PrimitiveType, Type, TypeKind, Value};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Structural identity of a complex type, in terms of child type ids within one context.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TypeKey {
    Record(Vec<(String, u32)>),
    Array(u32),
    Set(u32),
    Map(u32, u32),
    Union(Vec<u32>),
}

#[derive(Debug, Default)]
struct State {
    by_key: FxHashMap<TypeKey, Type>,
    by_id: Vec<Type>,
}

/// An interner mapping structural type definitions to small integer ids.
///
/// Cloning a context yields a handle onto the same table. Interning takes a write lock, lookups
/// by id take a read lock, so a context may be shared by the threads of one query.
#[derive(Clone, Debug)]
pub struct TypeContext {
    serial: u64,
    state: Arc<RwLock<State>>,
}

impl Default for TypeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeContext {
    pub fn new() -> Self {
        Self {
            serial: NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Whether `typ` was interned here (primitives belong to every context).
    pub fn owns(&self, typ: &Type) -> bool {
        typ.context() == 0 || typ.context() == self.serial
    }

    /// Look up a type by id.
    pub fn lookup(&self, id: u32) -> Option<Type> {
        if id < FIRST_COMPLEX_ID {
            return PrimitiveType::from_id(id).map(Type::primitive);
        }
        let idx = usize::try_from(id - FIRST_COMPLEX_ID).ok()?;
        self.state.read().by_id.get(idx).cloned()
    }

    fn intern(&self, key: TypeKey, complex: impl FnOnce() -> Complex) -> Type {
        if let Some(t) = self.state.read().by_key.get(&key) {
            return t.clone();
        }
        let mut state = self.state.write();
        if let Some(t) = state.by_key.get(&key) {
            return t.clone();
        }
        let id = FIRST_COMPLEX_ID + state.by_id.len() as u32;
        let typ = Type::complex(Arc::new(ComplexType {
            id,
            context: self.serial,
            complex: complex(),
        }));
        state.by_id.push(typ.clone());
        state.by_key.insert(key, typ.clone());
        typ
    }

    fn local(&self, typ: &Type) -> StrataResult<Type> {
        if self.owns(typ) {
            Ok(typ.clone())
        } else {
            self.translate_type(typ)
        }
    }

    pub fn lookup_record(&self, columns: Vec<Column>) -> StrataResult<Type> {
        if let Some(dup) = columns.iter().map(|c| c.name.as_str()).duplicates().next() {
            strata_bail!(Invalid: "duplicate field: {dup}");
        }
        let columns: Vec<Column> = columns
            .into_iter()
            .map(|c| Ok(Column::new(c.name, self.local(&c.typ)?)))
            .collect::<StrataResult<_>>()?;
        let key = TypeKey::Record(
            columns
                .iter()
                .map(|c| (c.name.clone(), c.typ.id()))
                .collect(),
        );
        Ok(self.intern(key, || Complex::Record(columns)))
    }

    pub fn lookup_array(&self, inner: &Type) -> StrataResult<Type> {
        let inner = self.local(inner)?;
        Ok(self.intern(TypeKey::Array(inner.id()), || Complex::Array(inner)))
    }

    pub fn lookup_set(&self, inner: &Type) -> StrataResult<Type> {
        let inner = self.local(inner)?;
        Ok(self.intern(TypeKey::Set(inner.id()), || Complex::Set(inner)))
    }

    pub fn lookup_map(&self, key: &Type, val: &Type) -> StrataResult<Type> {
        let key = self.local(key)?;
        let val = self.local(val)?;
        Ok(self.intern(TypeKey::Map(key.id(), val.id()), || {
            Complex::Map(key, val)
        }))
    }

    pub fn lookup_union(&self, types: Vec<Type>) -> StrataResult<Type> {
        if types.len() < 2 {
            strata_bail!(Invalid: "a union needs at least two types");
        }
        let types: Vec<Type> = types
            .iter()
            .map(|t| self.local(t))
            .collect::<StrataResult<_>>()?;
        if types.iter().duplicates().next().is_some() {
            strata_bail!(Invalid: "duplicate type in union");
        }
        let key = TypeKey::Union(types.iter().map(Type::id).collect());
        Ok(self.intern(key, || Complex::Union(types)))
    }

    /// Re-intern a type from any context into this one.
    pub fn translate_type(&self, typ: &Type) -> StrataResult<Type> {
        if typ.context() == self.serial {
            return Ok(typ.clone());
        }
        match typ.kind() {
            TypeKind::Primitive(p) => Ok(Type::primitive(p)),
            TypeKind::Record(cols) => self.lookup_record(
                cols.iter()
                    .map(|c| Ok(Column::new(c.name.clone(), self.translate_type(&c.typ)?)))
                    .collect::<StrataResult<_>>()?,
            ),
            TypeKind::Array(t) => self.lookup_array(&self.translate_type(t)?),
            TypeKind::Set(t) => self.lookup_set(&self.translate_type(t)?),
            TypeKind::Map(k, v) => {
                self.lookup_map(&self.translate_type(k)?, &self.translate_type(v)?)
            }
            TypeKind::Union(ts) => self.lookup_union(
                ts.iter()
                    .map(|t| self.translate_type(t))
                    .collect::<StrataResult<_>>()?,
            ),
        }
    }

    /// Move a value into this context. The body bytes are shared; only the type is re-interned.
    pub fn translate(&self, value: &Value) -> StrataResult<Value> {
        Ok(Value::new(
            self.translate_type(value.typ())?,
            value.bytes().cloned(),
        ))
    }

    /// Resolve a primitive type name such as `int64` or `ip`.
    pub fn lookup_by_name(&self, name: &str) -> StrataResult<Type> {
        name.parse::<PrimitiveType>()
            .map(Type::primitive)
            .map_err(|_| strata_err!(Invalid: "no such type: {name}"))
    }

    /// Number of complex types interned so far.
    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_structural() {
        let ctx = TypeContext::new();
        let a = ctx
            .lookup_record(vec![Column::new("a", Type::INT64)])
            .unwrap();
        let b = ctx
            .lookup_record(vec![Column::new("a", Type::INT64)])
            .unwrap();
        let c = ctx
            .lookup_record(vec![Column::new("a", Type::STRING)])
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.id(), FIRST_COMPLEX_ID);
        assert_eq!(ctx.lookup(a.id()).unwrap(), a);
    }

    #[test]
    fn contexts_assign_independent_ids() {
        let zctx = TypeContext::new();
        let mctx = TypeContext::new();
        zctx.lookup_array(&Type::STRING).unwrap();
        let rec = zctx
            .lookup_record(vec![Column::new("x", Type::IP)])
            .unwrap();
        let translated = mctx.translate_type(&rec).unwrap();
        assert_ne!(rec, translated);
        assert_eq!(translated.to_string(), "{x:ip}");
        assert_eq!(translated.id(), FIRST_COMPLEX_ID);
        assert_eq!(rec.id(), FIRST_COMPLEX_ID + 1);
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let ctx = TypeContext::new();
        let err = ctx
            .lookup_record(vec![Column::new("a", Type::INT64), Column::new("a", Type::IP)])
            .unwrap_err();
        assert_eq!(err.kind(), strata_error::ErrorKind::Invalid);
    }
}
