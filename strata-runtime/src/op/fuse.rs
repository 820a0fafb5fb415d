use strata_error::{StrataResult, strata_bail};
use strata_value::{Column, Type, TypeContext, TypeKind, Value};

use crate::{Batch, BoxPuller, Puller};

/// The narrowest type both `a` and `b` can be upcast to. Records merge column by column,
/// null takes the other type and anything else becomes a union.
fn fuse_types(ctx: &TypeContext, a: &Type, b: &Type) -> StrataResult<Type> {
    if a == b || *b == Type::NULL {
        return Ok(a.clone());
    }
    if *a == Type::NULL {
        return Ok(b.clone());
    }
    match (a.kind(), b.kind()) {
        (TypeKind::Record(ac), TypeKind::Record(bc)) => {
            let mut cols: Vec<Column> = ac.to_vec();
            for col in bc {
                match cols.iter_mut().find(|c| c.name == col.name) {
                    Some(c) => c.typ = fuse_types(ctx, &c.typ, &col.typ)?,
                    None => cols.push(col.clone()),
                }
            }
            ctx.lookup_record(cols)
        }
        (TypeKind::Union(members), _) => {
            if members.contains(b) {
                return Ok(a.clone());
            }
            let mut members = members.to_vec();
            members.push(b.clone());
            ctx.lookup_union(members)
        }
        _ => ctx.lookup_union(vec![a.clone(), b.clone()]),
    }
}

/// Rewrite `val` as a value of `target`, which it was fused into.
fn upcast(ctx: &TypeContext, val: &Value, target: &Type) -> StrataResult<Value> {
    if val.typ() == target {
        return Ok(val.clone());
    }
    if val.is_null() {
        return Ok(Value::null_of(target.clone()));
    }
    match target.kind() {
        TypeKind::Record(cols) => {
            let mut vals = Vec::with_capacity(cols.len());
            for col in cols {
                let v = match val.field(&col.name) {
                    Some(v) => upcast(ctx, &v, &col.typ)?,
                    None => Value::null_of(col.typ.clone()),
                };
                vals.push(v);
            }
            Value::record_of(target.clone(), &vals)
        }
        TypeKind::Union(members) => {
            // A record member may itself have been widened.
            let member = members
                .iter()
                .find(|m| *m == val.typ())
                .or_else(|| members.iter().find(|m| m.is_record() && val.typ().is_record()));
            match member {
                Some(m) => Value::union_of(target, &upcast(ctx, val, m)?),
                None => strata_bail!(Invalid: "cannot fuse {} into {target}", val.typ()),
            }
        }
        _ => strata_bail!(Invalid: "cannot fuse {} into {target}", val.typ()),
    }
}

/// Reads its whole input, then emits every value upcast to one fused type.
pub struct Fuse {
    parent: BoxPuller,
    ctx: TypeContext,
    vals: Vec<Value>,
    fused: Option<Type>,
    pos: usize,
    batch_size: usize,
    consumed: bool,
    eos: bool,
}

impl Fuse {
    pub fn new(parent: BoxPuller, ctx: &TypeContext, batch_size: usize) -> Self {
        Self {
            parent,
            ctx: ctx.clone(),
            vals: Vec::new(),
            fused: None,
            pos: 0,
            batch_size: batch_size.max(1),
            consumed: false,
            eos: false,
        }
    }

    fn consume(&mut self) -> StrataResult<()> {
        while let Some(batch) = self.parent.pull(false)? {
            for val in batch.iter() {
                self.fused = Some(match &self.fused {
                    None => val.typ().clone(),
                    Some(t) => fuse_types(&self.ctx, t, val.typ())?,
                });
                self.vals.push(val.keep());
            }
        }
        self.consumed = true;
        Ok(())
    }
}

impl Puller for Fuse {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        if done {
            self.eos = true;
            self.vals.clear();
            return self.parent.pull(true).map(|_| None);
        }
        if !self.consumed {
            self.consume()?;
        }
        let (Some(target), true) = (&self.fused, self.pos < self.vals.len()) else {
            self.eos = true;
            self.vals.clear();
            return Ok(None);
        };
        let end = (self.pos + self.batch_size).min(self.vals.len());
        let out = self.vals[self.pos..end]
            .iter()
            .map(|v| upcast(&self.ctx, v, target))
            .collect::<StrataResult<Vec<_>>>()?;
        self.pos = end;
        Ok(Some(Batch::new(out)))
    }
}

#[cfg(test)]
mod tests {
    use strata_value::json;

    use super::*;
    use crate::{ValuesPuller, collect};

    fn fuse(rows: &[&str]) -> Vec<Value> {
        let ctx = TypeContext::new();
        let vals = rows.iter().map(|r| json::parse(&ctx, r).unwrap()).collect();
        let mut f = Fuse::new(Box::new(ValuesPuller::new(vals, 2)), &ctx, 2);
        collect(&mut f).unwrap()
    }

    #[test]
    fn fills_absent_columns_with_null() {
        let out = fuse(&[r#"{"a":1}"#, r#"{"b":"x"}"#, r#"{"a":2,"c":{"d":true}}"#]);
        assert!(out.iter().all(|v| v.typ() == out[0].typ()));
        let json: Vec<String> = out.iter().map(|v| json::to_json(v).unwrap().to_string()).collect();
        assert_eq!(
            json,
            vec![
                r#"{"a":1,"b":null,"c":null}"#,
                r#"{"a":null,"b":"x","c":null}"#,
                r#"{"a":2,"b":null,"c":{"d":true}}"#,
            ]
        );
    }

    #[test]
    fn conflicting_columns_become_unions() {
        let out = fuse(&[r#"{"a":1}"#, r#"{"a":"one"}"#, r#"{"a":null}"#]);
        let a = out[1].typ().columns().unwrap()[0].typ.clone();
        assert!(matches!(a.kind(), TypeKind::Union(m) if m.len() == 2));
        assert_eq!(out[0].field("a").unwrap().union_inner().unwrap().as_int(), Some(1));
        assert_eq!(out[1].field("a").unwrap().union_inner().unwrap().as_str(), Some("one"));
        assert!(out[2].field("a").unwrap().is_null());
    }
}
