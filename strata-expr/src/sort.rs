use std::cmp::Ordering;

use strata_error::StrataResult;
use strata_value::{FieldPath, Order, PrimitiveType, Type, TypeContext, Value};

use crate::{Expr, ExprEvaluator, Number, compare_values, compile, dot_evaluator, type_rank};

/// Orders values by a list of key expressions.
///
/// Missing keys compare as null. `nulls_max` decides whether nulls sort after (true) or before
/// every other value, and it is applied after the `reverse` flip, so the caller picks it to put
/// nulls where it wants them in the final output.
#[derive(Clone, Debug)]
pub struct Comparator {
    exprs: Vec<ExprEvaluator>,
    nulls_max: bool,
    reverse: bool,
}

impl Comparator {
    pub fn new(exprs: Vec<ExprEvaluator>, nulls_max: bool, reverse: bool) -> Self {
        Self {
            exprs,
            nulls_max,
            reverse,
        }
    }

    /// The comparator of a sort: nulls go last unless `nulls_first`, whatever the order.
    pub fn for_sort(exprs: Vec<ExprEvaluator>, order: Order, nulls_first: bool) -> Self {
        let reverse = order.is_desc();
        let mut nulls_max = !nulls_first;
        if reverse {
            nulls_max = !nulls_max;
        }
        Self::new(exprs, nulls_max, reverse)
    }

    /// Compile `keys` into a sort comparator.
    pub fn compile(
        ctx: &TypeContext,
        keys: &[Expr],
        order: Order,
        nulls_first: bool,
    ) -> StrataResult<Self> {
        let exprs = keys
            .iter()
            .map(|k| compile(ctx, k))
            .collect::<StrataResult<Vec<_>>>()?;
        Ok(Self::for_sort(exprs, order, nulls_first))
    }

    /// The comparator used to merge streams sorted by a single key in `order`, with nulls
    /// tied to the order as the merge operator expects.
    pub fn for_merge(key: ExprEvaluator, order: Order) -> Self {
        Self::new(vec![key], order == Order::Asc, order.is_desc())
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn keys(&self) -> &[ExprEvaluator] {
        &self.exprs
    }

    fn key(&self, idx: usize, v: &Value) -> Value {
        let k = self.exprs[idx].eval(v);
        if k.is_missing() { Value::null() } else { k }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let (a, b) = if self.reverse { (b, a) } else { (a, b) };
        for idx in 0..self.exprs.len() {
            let ord = compare_total(&self.key(idx, a), &self.key(idx, b), self.nulls_max);
            if ord.is_ne() {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compare precomputed key tuples.
    fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        let (a, b) = if self.reverse { (b, a) } else { (a, b) };
        a.iter()
            .zip(b)
            .map(|(x, y)| compare_total(x, y, self.nulls_max))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Sort `vals` in place, keeping equal values in their input order. Keys are evaluated
    /// once per value.
    pub fn sort_stable(&self, vals: &mut Vec<Value>) {
        if self.exprs.is_empty() || vals.len() < 2 {
            return;
        }
        let mut keyed: Vec<(Vec<Value>, Value)> = vals
            .drain(..)
            .map(|v| {
                let keys = (0..self.exprs.len()).map(|i| self.key(i, &v)).collect();
                (keys, v)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| self.compare_keys(a, b));
        vals.extend(keyed.into_iter().map(|(_, v)| v));
    }
}

/// A total order over values: nulls at one end, then numbers, then other types by type id,
/// values of one type by their natural order or, failing that, their encoding.
pub fn compare_total(a: &Value, b: &Value, nulls_max: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return if nulls_max { Ordering::Greater } else { Ordering::Less },
        (false, true) => return if nulls_max { Ordering::Less } else { Ordering::Greater },
        (false, false) => {}
    }
    if let Some(ord) = compare_values(a, b) {
        return ord;
    }
    if let (Some(x), Some(y)) = (Number::of(a), Number::of(b)) {
        return x.total_cmp(y);
    }
    type_rank(a.typ())
        .cmp(&type_rank(b.typ()))
        .then_with(|| a.body().cmp(&b.body()))
}

/// Pick a sort key for records of type `typ`: the first integer field anywhere in the record,
/// else the first float field, else the first field that is not a time, else `ts`.
pub fn guess_sort_key(typ: &Type) -> FieldPath {
    if !typ.is_record() {
        return FieldPath::this();
    }
    let is_integer = |t: &Type| {
        t.as_primitive()
            .is_some_and(|p| p.is_integer() && p != PrimitiveType::Time && p != PrimitiveType::Duration)
    };
    let is_float = |t: &Type| t.is_primitive(PrimitiveType::Float64);
    let not_time = |t: &Type| !t.is_primitive(PrimitiveType::Time);
    first_matching(typ, &is_integer)
        .or_else(|| first_matching(typ, &is_float))
        .or_else(|| first_matching(typ, &not_time))
        .unwrap_or_else(|| FieldPath::dotted("ts"))
}

fn first_matching(typ: &Type, pred: &dyn Fn(&Type) -> bool) -> Option<FieldPath> {
    for col in typ.columns()? {
        if pred(&col.typ) {
            return Some(FieldPath::new(vec![col.name.clone()]));
        }
        if col.typ.is_record() {
            if let Some(inner) = first_matching(&col.typ, pred) {
                let mut parts = vec![col.name.clone()];
                parts.extend(inner.parts().iter().cloned());
                return Some(FieldPath::new(parts));
            }
        }
    }
    None
}

/// A comparator over a single field path.
pub fn path_comparator(path: &FieldPath, order: Order, nulls_first: bool) -> Comparator {
    Comparator::for_sort(vec![dot_evaluator(path.clone())], order, nulls_first)
}
