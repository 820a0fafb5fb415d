use std::fmt::Debug;
use std::sync::Arc;

use itertools::Itertools;
use strata_error::{StrataResult, strata_bail};
use strata_value::walk::{Visit, walk};
use strata_value::{FieldPath, PrimitiveType, Type, TypeContext, TypeKind, Value};

use crate::functions::compile_call;
use crate::{Expr, Literal, Operator, UnaryOp, arith, compare_values, net_contains, values_equal};

/// A compiled expression.
///
/// Evaluation never fails: per-record problems come back as `error` values, and a reference to
/// an absent field yields the `missing` error.
pub trait Evaluator: Debug + Send + Sync {
    /// Evaluate against `this` with the variables bound by enclosing scopes.
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value;

    fn eval(&self, this: &Value) -> Value {
        self.eval_with(&[], this)
    }
}

pub type ExprEvaluator = Arc<dyn Evaluator>;

/// Compile an expression. Records and arrays built by the expression are interned in `ctx`.
pub fn compile(ctx: &TypeContext, expr: &Expr) -> StrataResult<ExprEvaluator> {
    Ok(match expr {
        Expr::This => Arc::new(This),
        Expr::Path { path } => Arc::new(Dot(path.clone())),
        Expr::Literal { value } => Arc::new(Const(value.to_value())),
        Expr::Var { slot, .. } => Arc::new(Var(*slot)),
        Expr::Unary { op, operand } => Arc::new(Unary {
            op: *op,
            operand: compile(ctx, operand)?,
        }),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = compile(ctx, lhs)?;
            let rhs = compile(ctx, rhs)?;
            match op {
                Operator::And | Operator::Or => Arc::new(Logical { op: *op, lhs, rhs }),
                Operator::In => Arc::new(In { elem: lhs, container: rhs }),
                op if op.is_comparison() => Arc::new(Compare { op: *op, lhs, rhs }),
                op => Arc::new(Arith { op: *op, lhs, rhs }),
            }
        }
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => Arc::new(Conditional {
            cond: compile(ctx, cond)?,
            then: compile(ctx, then)?,
            otherwise: compile(ctx, otherwise)?,
        }),
        Expr::Call { name, args } => {
            let args = args
                .iter()
                .map(|a| compile(ctx, a))
                .collect::<StrataResult<Vec<_>>>()?;
            compile_call(ctx, name, args)?
        }
        Expr::Search { text } => Arc::new(Search::new(text)),
        Expr::TypeEquals { typ, value } => Arc::new(TypeEquals {
            typ: Type::primitive(*typ),
            value: value.to_value(),
        }),
        Expr::Record { fields } => {
            if let Some(dup) = fields.iter().map(|(name, _)| name).duplicates().next() {
                strata_bail!(Invalid: "duplicate field in record expression: {dup}");
            }
            Arc::new(RecordExpr {
                ctx: ctx.clone(),
                fields: fields
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), compile(ctx, e)?)))
                    .collect::<StrataResult<_>>()?,
            })
        }
        Expr::Array { elems } => Arc::new(ArrayExpr {
            ctx: ctx.clone(),
            elems: elems
                .iter()
                .map(|e| compile(ctx, e))
                .collect::<StrataResult<_>>()?,
        }),
        Expr::Index { container, index } => Arc::new(Index {
            container: compile(ctx, container)?,
            index: compile(ctx, index)?,
        }),
    })
}

/// An evaluator for a field path, `this` for the empty path.
pub fn dot_evaluator(path: FieldPath) -> ExprEvaluator {
    if path.is_this() {
        Arc::new(This)
    } else {
        Arc::new(Dot(path))
    }
}

/// The outcome of evaluating an expression with no input.
#[derive(Clone, Debug, PartialEq)]
pub enum Folded {
    /// The expression is constant and evaluates to this value.
    Value(Value),
    /// The expression depends on the input or on a variable, so it has no value yet.
    Missing,
}

/// Evaluate `expr` at compile time if it does not depend on its input.
pub fn evaluate_or_missing(ctx: &TypeContext, expr: &Expr) -> StrataResult<Folded> {
    if references_input(expr) {
        return Ok(Folded::Missing);
    }
    let value = compile(ctx, expr)?.eval(&Value::null());
    Ok(if value.is_missing() {
        Folded::Missing
    } else {
        Folded::Value(value)
    })
}

fn references_input(expr: &Expr) -> bool {
    match expr {
        Expr::This | Expr::Path { .. } | Expr::Var { .. } => true,
        Expr::Search { .. } | Expr::TypeEquals { .. } => true,
        Expr::Literal { .. } => false,
        Expr::Unary { operand, .. } => references_input(operand),
        Expr::Binary { lhs, rhs, .. } => references_input(lhs) || references_input(rhs),
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => references_input(cond) || references_input(then) || references_input(otherwise),
        Expr::Call { args, .. } | Expr::Array { elems: args } => args.iter().any(references_input),
        Expr::Record { fields } => fields.iter().any(|(_, e)| references_input(e)),
        Expr::Index { container, index } => references_input(container) || references_input(index),
    }
}

/// Evaluate a predicate the way filters do: only the boolean `true` matches.
pub fn matches(eval: &dyn Evaluator, this: &Value) -> bool {
    eval.eval(this).is_true()
}

#[derive(Debug)]
struct This;

impl Evaluator for This {
    fn eval_with(&self, _vars: &[Value], this: &Value) -> Value {
        this.clone()
    }
}

#[derive(Debug)]
struct Dot(FieldPath);

impl Evaluator for Dot {
    fn eval_with(&self, _vars: &[Value], this: &Value) -> Value {
        this.deref(&self.0).unwrap_or_else(Value::missing)
    }
}

#[derive(Debug)]
struct Const(Value);

impl Evaluator for Const {
    fn eval_with(&self, _vars: &[Value], _this: &Value) -> Value {
        self.0.clone()
    }
}

#[derive(Debug)]
struct Var(usize);

impl Evaluator for Var {
    fn eval_with(&self, vars: &[Value], _this: &Value) -> Value {
        vars.get(self.0).cloned().unwrap_or_else(Value::missing)
    }
}

#[derive(Debug)]
struct Unary {
    op: UnaryOp,
    operand: ExprEvaluator,
}

impl Evaluator for Unary {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        let v = self.operand.eval_with(vars, this);
        if v.is_error() {
            return v;
        }
        match self.op {
            UnaryOp::Not => match v.as_bool() {
                Some(b) => Value::bool(!b),
                None => Value::error(&format!("not type bool: {v}")),
            },
            UnaryOp::Neg => {
                if v.is_null() {
                    return v;
                }
                if v.typ().is_primitive(PrimitiveType::Float64) {
                    return Value::float64(-v.as_float().unwrap_or_default());
                }
                match v.as_int().and_then(i64::checked_neg) {
                    Some(i) if v.typ().as_primitive().is_some_and(PrimitiveType::is_signed) => {
                        Value::int_of(v.typ().clone(), i)
                    }
                    Some(i) => Value::int64(i),
                    None => Value::error(&format!("cannot negate {v}")),
                }
            }
        }
    }
}

#[derive(Debug)]
struct Compare {
    op: Operator,
    lhs: ExprEvaluator,
    rhs: ExprEvaluator,
}

impl Evaluator for Compare {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        let a = self.lhs.eval_with(vars, this);
        if a.is_error() {
            return a;
        }
        let b = self.rhs.eval_with(vars, this);
        if b.is_error() {
            return b;
        }
        let result = match self.op {
            Operator::Eq => values_equal(&a, &b),
            Operator::NotEq => !values_equal(&a, &b),
            op => compare_values(&a, &b).is_some_and(|ord| match op {
                Operator::Lt => ord.is_lt(),
                Operator::Lte => ord.is_le(),
                Operator::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }),
        };
        Value::bool(result)
    }
}

#[derive(Debug)]
struct Logical {
    op: Operator,
    lhs: ExprEvaluator,
    rhs: ExprEvaluator,
}

fn as_logical(v: &Value) -> Result<bool, Value> {
    if v.is_error() {
        return Err(v.clone());
    }
    if v.typ().is_primitive(PrimitiveType::Bool) || v.typ().is_primitive(PrimitiveType::Null) {
        return Ok(v.as_bool().unwrap_or(false));
    }
    Err(Value::error(&format!("not type bool: {v}")))
}

impl Evaluator for Logical {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        let lhs = match as_logical(&self.lhs.eval_with(vars, this)) {
            Ok(b) => b,
            Err(err) => return err,
        };
        match (self.op, lhs) {
            (Operator::And, false) => return Value::bool(false),
            (Operator::Or, true) => return Value::bool(true),
            _ => {}
        }
        match as_logical(&self.rhs.eval_with(vars, this)) {
            Ok(b) => Value::bool(b),
            Err(err) => err,
        }
    }
}

#[derive(Debug)]
struct In {
    elem: ExprEvaluator,
    container: ExprEvaluator,
}

/// Whether `elem` is inside `container`: an address in a network, an element of an array or
/// set, a key of a map, or a field value of a record.
pub fn contains(elem: &Value, container: &Value) -> bool {
    if container.typ().is_primitive(PrimitiveType::Net) {
        return net_contains(container, elem);
    }
    match container.typ().kind() {
        TypeKind::Array(_) | TypeKind::Set(_) => container
            .elements()
            .is_ok_and(|elems| elems.iter().any(|e| values_equal(elem, e))),
        TypeKind::Map(..) => container
            .entries()
            .is_ok_and(|entries| entries.iter().any(|(k, _)| values_equal(elem, k))),
        TypeKind::Record(_) => container
            .columns()
            .is_ok_and(|cols| cols.iter().any(|(_, v)| values_equal(elem, v))),
        TypeKind::Union(_) => container
            .union_inner()
            .is_ok_and(|inner| contains(elem, &inner)),
        TypeKind::Primitive(_) => values_equal(elem, container),
    }
}

impl Evaluator for In {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        let elem = self.elem.eval_with(vars, this);
        if elem.is_error() {
            return elem;
        }
        let container = self.container.eval_with(vars, this);
        if container.is_error() {
            return container;
        }
        Value::bool(contains(&elem, &container))
    }
}

#[derive(Debug)]
struct Arith {
    op: Operator,
    lhs: ExprEvaluator,
    rhs: ExprEvaluator,
}

impl Evaluator for Arith {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        arith(
            self.op,
            &self.lhs.eval_with(vars, this),
            &self.rhs.eval_with(vars, this),
        )
    }
}

#[derive(Debug)]
struct Conditional {
    cond: ExprEvaluator,
    then: ExprEvaluator,
    otherwise: ExprEvaluator,
}

impl Evaluator for Conditional {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        let cond = self.cond.eval_with(vars, this);
        if cond.is_error() {
            return cond;
        }
        if cond.is_true() {
            self.then.eval_with(vars, this)
        } else {
            self.otherwise.eval_with(vars, this)
        }
    }
}

/// Case-insensitive search for a string in every string-like value and field name, plus an
/// exact match against values when the text reads as a literal of another type.
#[derive(Debug)]
struct Search {
    needle: Vec<u8>,
    typed: Option<Value>,
}

impl Search {
    fn new(text: &str) -> Self {
        let typed = match Literal::infer(text) {
            Literal::String(_) => None,
            lit => Some(lit.to_value()),
        };
        Self {
            needle: text.to_ascii_lowercase().into_bytes(),
            typed,
        }
    }

    fn hit(&self, haystack: &[u8]) -> bool {
        contains_fold(haystack, &self.needle)
    }
}

/// ASCII case-insensitive substring test. `needle` must already be lowercase.
pub fn contains_fold(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|w| w.iter().zip(needle).all(|(h, n)| h.to_ascii_lowercase() == *n))
}

impl Evaluator for Search {
    fn eval_with(&self, _vars: &[Value], this: &Value) -> Value {
        let mut found = false;
        let result = walk(this.typ(), this.body(), &mut |typ, body| {
            if let Some(cols) = typ.columns() {
                if cols.iter().any(|c| self.hit(c.name.as_bytes())) {
                    found = true;
                    return Ok(Visit::Stop);
                }
                return Ok(Visit::Continue);
            }
            if let Some(p) = typ.as_primitive() {
                let hit = match (p, body) {
                    (PrimitiveType::String | PrimitiveType::Bytes | PrimitiveType::Error, Some(b)) => {
                        self.hit(b)
                    }
                    (_, Some(b)) => self.typed.as_ref().is_some_and(|lit| {
                        values_equal(lit, &Value::new(typ.clone(), Some(bytes::Bytes::copy_from_slice(b))))
                    }),
                    _ => false,
                };
                if hit {
                    found = true;
                    return Ok(Visit::Stop);
                }
            }
            Ok(Visit::Continue)
        });
        match result {
            Ok(_) => Value::bool(found),
            Err(err) => Value::error(&err.to_string()),
        }
    }
}

#[derive(Debug)]
struct TypeEquals {
    typ: Type,
    value: Value,
}

impl Evaluator for TypeEquals {
    fn eval_with(&self, _vars: &[Value], this: &Value) -> Value {
        let mut found = false;
        let result = walk(this.typ(), this.body(), &mut |typ, body| {
            if *typ == self.typ {
                let v = Value::new(typ.clone(), body.map(bytes::Bytes::copy_from_slice));
                if values_equal(&v, &self.value) {
                    found = true;
                    return Ok(Visit::Stop);
                }
                return Ok(Visit::SkipContainer);
            }
            Ok(Visit::Continue)
        });
        match result {
            Ok(_) => Value::bool(found),
            Err(err) => Value::error(&err.to_string()),
        }
    }
}

#[derive(Debug)]
struct RecordExpr {
    ctx: TypeContext,
    fields: Vec<(String, ExprEvaluator)>,
}

impl Evaluator for RecordExpr {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        let fields = self
            .fields
            .iter()
            .map(|(name, e)| (name.as_str(), e.eval_with(vars, this)))
            .filter(|(_, v)| !v.is_missing());
        Value::record(&self.ctx, fields).unwrap_or_else(|err| Value::error(&err.to_string()))
    }
}

#[derive(Debug)]
struct ArrayExpr {
    ctx: TypeContext,
    elems: Vec<ExprEvaluator>,
}

impl Evaluator for ArrayExpr {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        let elems: Vec<Value> = self
            .elems
            .iter()
            .map(|e| e.eval_with(vars, this))
            .filter(|v| !v.is_missing())
            .collect();
        Value::array_of(&self.ctx, &elems).unwrap_or_else(|err| Value::error(&err.to_string()))
    }
}

#[derive(Debug)]
struct Index {
    container: ExprEvaluator,
    index: ExprEvaluator,
}

impl Evaluator for Index {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        let container = self.container.eval_with(vars, this);
        if container.is_error() {
            return container;
        }
        let index = self.index.eval_with(vars, this);
        if index.is_error() {
            return index;
        }
        match container.typ().kind() {
            TypeKind::Array(_) | TypeKind::Set(_) => {
                let Some(i) = index.as_int() else {
                    return Value::error("index is not an integer");
                };
                let Ok(elems) = container.elements() else {
                    return Value::missing();
                };
                let len = i64::try_from(elems.len()).unwrap_or(i64::MAX);
                let i = if i < 0 { len + i } else { i };
                usize::try_from(i)
                    .ok()
                    .and_then(|i| elems.get(i).cloned())
                    .unwrap_or_else(Value::missing)
            }
            TypeKind::Record(_) => index
                .as_str()
                .and_then(|name| container.field(name))
                .unwrap_or_else(Value::missing),
            TypeKind::Map(..) => container
                .entries()
                .ok()
                .and_then(|entries| {
                    entries
                        .into_iter()
                        .find(|(k, _)| values_equal(k, &index))
                        .map(|(_, v)| v)
                })
                .unwrap_or_else(Value::missing),
            _ => Value::missing(),
        }
    }
}
