//! Record reshaping: cut, pick, put, drop and rename.

use rustc_hash::FxHashMap;
use strata_error::{StrataResult, strata_bail, strata_err};
use strata_expr::{Assignment, ExprEvaluator};
use strata_value::{Column, FieldPath, Type, TypeContext, Value, zcode};

use super::Applier;

/// A tree of field names whose leaves index a list of values.
#[derive(Debug)]
enum Field {
    Leaf(usize),
    Record(Vec<(String, Field)>),
}

fn insert(fields: &mut Vec<(String, Field)>, path: &[String], leaf: usize) -> bool {
    let Some((name, rest)) = path.split_first() else {
        return false;
    };
    match fields.iter_mut().find(|(n, _)| n == name) {
        Some((_, Field::Leaf(_))) => false,
        Some((_, Field::Record(sub))) => !rest.is_empty() && insert(sub, rest, leaf),
        None => {
            if rest.is_empty() {
                fields.push((name.clone(), Field::Leaf(leaf)));
                true
            } else {
                let mut sub = Vec::new();
                let ok = insert(&mut sub, rest, leaf);
                fields.push((name.clone(), Field::Record(sub)));
                ok
            }
        }
    }
}

fn field_tree(paths: &[FieldPath]) -> StrataResult<Vec<(String, Field)>> {
    let mut fields = Vec::new();
    for (i, path) in paths.iter().enumerate() {
        if path.is_this() {
            strata_bail!(Invalid: "cannot assign to 'this' alongside other fields");
        }
        if !insert(&mut fields, path.parts(), i) {
            strata_bail!(Invalid: "conflicting assignments to field {path}");
        }
    }
    Ok(fields)
}

/// Builds records from a fixed list of field paths, caching the output type for each
/// combination of leaf types.
#[derive(Debug)]
pub(crate) struct RecordBuilder {
    ctx: TypeContext,
    fields: Vec<(String, Field)>,
    types: FxHashMap<Vec<Option<Type>>, Option<Type>>,
}

impl RecordBuilder {
    pub(crate) fn new(ctx: &TypeContext, paths: &[FieldPath]) -> StrataResult<Self> {
        Ok(Self {
            ctx: ctx.clone(),
            fields: field_tree(paths)?,
            types: FxHashMap::default(),
        })
    }

    /// The record of the present values, or `None` when every value is absent.
    pub(crate) fn build(&mut self, vals: &[Option<Value>]) -> StrataResult<Option<Value>> {
        let key: Vec<Option<Type>> = vals.iter().map(|v| v.as_ref().map(|v| v.typ().clone())).collect();
        let typ = match self.types.get(&key) {
            Some(typ) => typ.clone(),
            None => {
                let typ = record_type(&self.ctx, &self.fields, vals)?;
                self.types.insert(key, typ.clone());
                typ
            }
        };
        let Some(typ) = typ else {
            return Ok(None);
        };
        let mut body = Vec::new();
        record_body(&self.fields, vals, &mut body);
        Ok(Some(Value::new(typ, Some(body.into()))))
    }
}

fn record_type(
    ctx: &TypeContext,
    fields: &[(String, Field)],
    vals: &[Option<Value>],
) -> StrataResult<Option<Type>> {
    let mut cols = Vec::new();
    for (name, field) in fields {
        let typ = match field {
            Field::Leaf(i) => vals[*i].as_ref().map(|v| v.typ().clone()),
            Field::Record(sub) => record_type(ctx, sub, vals)?,
        };
        if let Some(typ) = typ {
            cols.push(Column::new(name.clone(), typ));
        }
    }
    if cols.is_empty() {
        return Ok(None);
    }
    ctx.lookup_record(cols).map(Some)
}

/// Appends the tagged bodies of the present columns; returns whether any was present.
fn record_body(fields: &[(String, Field)], vals: &[Option<Value>], out: &mut Vec<u8>) -> bool {
    let mut any = false;
    for (_, field) in fields {
        match field {
            Field::Leaf(i) => {
                if let Some(v) = &vals[*i] {
                    zcode::append(out, v.body());
                    any = true;
                }
            }
            Field::Record(sub) => {
                let mut inner = Vec::new();
                if record_body(sub, vals, &mut inner) {
                    zcode::append(out, Some(&inner));
                    any = true;
                }
            }
        }
    }
    any
}

/// `cut` and `pick`: project each value onto the assigned fields. Cut emits whatever fields
/// are present; pick drops values that lack any of them.
#[derive(Debug)]
pub struct Cutter {
    exprs: Vec<ExprEvaluator>,
    builder: RecordBuilder,
    complete_only: bool,
}

impl Cutter {
    pub fn new(
        ctx: &TypeContext,
        lhs: &[FieldPath],
        exprs: Vec<ExprEvaluator>,
        complete_only: bool,
    ) -> StrataResult<Self> {
        Ok(Self {
            builder: RecordBuilder::new(ctx, lhs)?,
            exprs,
            complete_only,
        })
    }

    /// Project one value, `None` when nothing of it is kept.
    pub fn cut(&mut self, val: &Value) -> StrataResult<Option<Value>> {
        let mut vals = Vec::with_capacity(self.exprs.len());
        for e in &self.exprs {
            let v = e.eval(val);
            if v.is_missing() || v.is_quiet() {
                if self.complete_only {
                    return Ok(None);
                }
                vals.push(None);
            } else {
                vals.push(Some(v));
            }
        }
        self.builder.build(&vals)
    }
}

impl Applier for Cutter {
    fn apply(&mut self, val: &Value, out: &mut Vec<Value>) -> StrataResult<()> {
        if let Some(v) = self.cut(val)? {
            out.push(v);
        }
        Ok(())
    }
}

/// `put`: overwrite each assigned field in place or append it.
#[derive(Debug)]
pub struct Putter {
    ctx: TypeContext,
    fields: Vec<(String, Field)>,
    exprs: Vec<ExprEvaluator>,
}

impl Putter {
    pub fn new(ctx: &TypeContext, lhs: &[FieldPath], exprs: Vec<ExprEvaluator>) -> StrataResult<Self> {
        Ok(Self {
            ctx: ctx.clone(),
            fields: field_tree(lhs)?,
            exprs,
        })
    }

    fn overlay(&self, base: &Value, fields: &[(String, Field)], vals: &[Option<Value>]) -> StrataResult<Value> {
        let mut cols: Vec<(String, Value)> = base
            .columns()?
            .into_iter()
            .map(|(c, v)| (c.name.clone(), v))
            .collect();
        for (name, field) in fields {
            let pos = cols.iter().position(|(n, _)| n == name);
            let new = match field {
                Field::Leaf(i) => match &vals[*i] {
                    Some(v) => v.clone(),
                    None => continue,
                },
                Field::Record(sub) => {
                    let inner = match pos.map(|p| &cols[p].1) {
                        Some(v) if v.typ().is_record() => v.clone(),
                        _ => Value::record(&self.ctx, Vec::<(String, Value)>::new())?,
                    };
                    self.overlay(&inner, sub, vals)?
                }
            };
            match pos {
                Some(p) => cols[p].1 = new,
                None => cols.push((name.clone(), new)),
            }
        }
        Value::record(&self.ctx, cols)
    }
}

impl Applier for Putter {
    fn apply(&mut self, val: &Value, out: &mut Vec<Value>) -> StrataResult<()> {
        if !val.typ().is_record() {
            out.push(Value::error(&format!("put: not a record: {}", val.typ())));
            return Ok(());
        }
        let vals: Vec<Option<Value>> = self
            .exprs
            .iter()
            .map(|e| {
                let v = e.eval(val);
                (!v.is_missing()).then_some(v)
            })
            .collect();
        out.push(self.overlay(val, &self.fields, &vals)?);
        Ok(())
    }
}

/// `drop`: remove fields. A value left with no fields is dropped.
#[derive(Debug)]
pub struct Dropper {
    ctx: TypeContext,
    fields: Vec<(String, Field)>,
}

impl Dropper {
    pub fn new(ctx: &TypeContext, fields: &[FieldPath]) -> StrataResult<Self> {
        Ok(Self {
            ctx: ctx.clone(),
            fields: field_tree(fields)?,
        })
    }

    fn drop_fields(&self, val: &Value, fields: &[(String, Field)]) -> StrataResult<Option<Value>> {
        let mut cols = Vec::new();
        for (col, v) in val.columns()? {
            match fields.iter().find(|(n, _)| *n == col.name) {
                Some((_, Field::Leaf(_))) => {}
                Some((_, Field::Record(sub))) if v.typ().is_record() => {
                    if let Some(v) = self.drop_fields(&v, sub)? {
                        cols.push((col.name.clone(), v));
                    }
                }
                _ => cols.push((col.name.clone(), v)),
            }
        }
        if cols.is_empty() {
            return Ok(None);
        }
        Value::record(&self.ctx, cols).map(Some)
    }
}

impl Applier for Dropper {
    fn apply(&mut self, val: &Value, out: &mut Vec<Value>) -> StrataResult<()> {
        if !val.typ().is_record() {
            out.push(val.clone());
        } else if let Some(v) = self.drop_fields(val, &self.fields)? {
            out.push(v);
        }
        Ok(())
    }
}

/// `rename`: change field names without touching value bodies.
#[derive(Debug)]
pub struct Renamer {
    ctx: TypeContext,
    /// `(src, dst leaf)` pairs applied in order.
    renames: Vec<(FieldPath, String)>,
    types: FxHashMap<Type, Option<Type>>,
}

impl Renamer {
    /// Each assignment is `dst = src`; both must name fields of the same parent record.
    pub fn new(ctx: &TypeContext, args: &[Assignment]) -> StrataResult<Self> {
        let mut renames = Vec::with_capacity(args.len());
        for arg in args {
            let dst = &arg.lhs;
            let Some(src) = arg.rhs.as_path().filter(|p| !p.is_this()) else {
                strata_bail!(Invalid: "rename: source of {dst} must be a field");
            };
            if dst.is_this() || src.len() != dst.len() {
                strata_bail!(Invalid: "cannot rename {src} to {dst}");
            }
            let n = src.len();
            for (s, d) in src.parts()[..n - 1].iter().zip(&dst.parts()[..n - 1]) {
                if s != d {
                    strata_bail!(Invalid: "cannot rename {src} to {dst} (differ in {s} vs {d})");
                }
            }
            let leaf = dst
                .leaf()
                .ok_or_else(|| strata_err!(Invalid: "cannot rename {src} to {dst}"))?
                .to_string();
            renames.push((src, leaf));
        }
        Ok(Self {
            ctx: ctx.clone(),
            renames,
            types: FxHashMap::default(),
        })
    }

    fn renamed_type(&self, typ: &Type) -> StrataResult<Option<Type>> {
        let mut out = typ.clone();
        let mut changed = false;
        for (src, leaf) in &self.renames {
            if let Some(t) = rename_in(&self.ctx, &out, src.parts(), leaf)? {
                out = t;
                changed = true;
            }
        }
        Ok(changed.then_some(out))
    }
}

fn rename_in(ctx: &TypeContext, typ: &Type, src: &[String], leaf: &str) -> StrataResult<Option<Type>> {
    let (Some(cols), Some((first, rest))) = (typ.columns(), src.split_first()) else {
        return Ok(None);
    };
    let Some(idx) = cols.iter().position(|c| &c.name == first) else {
        return Ok(None);
    };
    let mut cols = cols.to_vec();
    if rest.is_empty() {
        cols[idx].name = leaf.to_string();
    } else {
        match rename_in(ctx, &cols[idx].typ, rest, leaf)? {
            Some(t) => cols[idx].typ = t,
            None => return Ok(None),
        }
    }
    ctx.lookup_record(cols).map(Some)
}

impl Applier for Renamer {
    fn apply(&mut self, val: &Value, out: &mut Vec<Value>) -> StrataResult<()> {
        let typ = match self.types.get(val.typ()) {
            Some(t) => t.clone(),
            None => {
                let t = match self.renamed_type(val.typ()) {
                    Ok(t) => t,
                    Err(e) => {
                        out.push(Value::error(&format!("rename: {e}")));
                        return Ok(());
                    }
                };
                self.types.insert(val.typ().clone(), t.clone());
                t
            }
        };
        out.push(match typ {
            Some(t) => Value::new(t, val.bytes().cloned()),
            None => val.clone(),
        });
        Ok(())
    }
}

/// The destination paths of a list of assignments.
pub(crate) fn lhs_paths(args: &[Assignment]) -> Vec<FieldPath> {
    args.iter().map(|a| a.lhs.clone()).collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use strata_error::ErrorKind;
    use strata_expr::{compile, lit, path};
    use strata_value::json;

    use super::*;

    fn exprs(ctx: &TypeContext, args: &[Assignment]) -> Vec<ExprEvaluator> {
        args.iter().map(|a| compile(ctx, &a.rhs).unwrap()).collect()
    }

    fn apply(a: &mut dyn Applier, ctx: &TypeContext, input: &str) -> Vec<String> {
        let mut out = Vec::new();
        a.apply(&json::parse(ctx, input).unwrap(), &mut out).unwrap();
        out.iter()
            .map(|v| json::to_json(v).unwrap().to_string())
            .collect()
    }

    #[test]
    fn cut_keeps_requested_fields_in_order() {
        let ctx = TypeContext::new();
        let args = vec![Assignment::field("c"), Assignment::field("a.b"), Assignment::field("z")];
        let mut cut = Cutter::new(&ctx, &lhs_paths(&args), exprs(&ctx, &args), false).unwrap();
        let input = r#"{"a":{"b":1,"x":2},"c":"s"}"#;
        assert_eq!(apply(&mut cut, &ctx, input), vec![r#"{"c":"s","a":{"b":1}}"#]);

        let mut pick = Cutter::new(&ctx, &lhs_paths(&args), exprs(&ctx, &args), true).unwrap();
        assert!(apply(&mut pick, &ctx, input).is_empty());
    }

    #[test]
    fn cut_rejects_conflicting_paths() {
        let ctx = TypeContext::new();
        let args = vec![Assignment::field("a"), Assignment::field("a.b")];
        let err = Cutter::new(&ctx, &lhs_paths(&args), exprs(&ctx, &args), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn put_overwrites_and_appends() {
        let ctx = TypeContext::new();
        let args = vec![
            Assignment::new("a", lit(5i64)),
            Assignment::new("r.y", path("a")),
            Assignment::new("n", lit("new")),
        ];
        let mut put = Putter::new(&ctx, &lhs_paths(&args), exprs(&ctx, &args)).unwrap();
        assert_eq!(
            apply(&mut put, &ctx, r#"{"a":1,"r":{"x":1}}"#),
            vec![r#"{"a":5,"r":{"x":1,"y":1},"n":"new"}"#]
        );
    }

    #[test]
    fn drop_removes_nested_fields_and_empty_records() {
        let ctx = TypeContext::new();
        let mut d = Dropper::new(&ctx, &[FieldPath::dotted("a.b"), FieldPath::dotted("c")]).unwrap();
        assert_eq!(apply(&mut d, &ctx, r#"{"a":{"b":1,"x":2},"c":3}"#), vec![r#"{"a":{"x":2}}"#]);
        assert!(apply(&mut d, &ctx, r#"{"c":3}"#).is_empty());
    }

    #[test]
    fn rename_changes_names_only() {
        let ctx = TypeContext::new();
        let mut r = Renamer::new(&ctx, &[Assignment::new("id.src", path("id.orig_h"))]).unwrap();
        assert_eq!(
            apply(&mut r, &ctx, r#"{"id":{"orig_h":"10.0.0.1","p":1}}"#),
            vec![r#"{"id":{"src":"10.0.0.1","p":1}}"#]
        );
        assert_eq!(apply(&mut r, &ctx, r#"{"x":1}"#), vec![r#"{"x":1}"#]);
    }

    #[rstest]
    #[case("a.b", "c", "cannot rename c to a.b")]
    #[case("a.b", "x.b", "cannot rename x.b to a.b (differ in x vs a)")]
    fn rename_requires_a_shared_parent(#[case] dst: &str, #[case] src: &str, #[case] msg: &str) {
        let err = Renamer::new(&TypeContext::new(), &[Assignment::new(dst, path(src))]).unwrap_err();
        assert_eq!(err.to_string(), msg);
    }
}
