use std::cmp::Ordering;

use rustc_hash::{FxHashMap, FxHashSet};
use strata_error::StrataResult;
use strata_expr::{ExprEvaluator, compare_total};
use strata_value::{Column, Type, TypeContext, Value};

use super::project::Cutter;
use crate::batch::ValueStream;
use crate::plan::JoinStyle;
use crate::{Batch, BoxPuller, Puller};

/// The combined type of a left and right record type, with right columns renamed apart.
fn joined_type(ctx: &TypeContext, left: &[Column], right: &[Column]) -> StrataResult<Type> {
    let taken: FxHashSet<&str> = left.iter().map(|c| c.name.as_str()).collect();
    let mut renamed = Vec::with_capacity(right.len());
    for col in right {
        let mut name = col.name.clone();
        let mut n = 2;
        while taken.contains(name.as_str()) || renamed.iter().any(|c: &Column| c.name == name) {
            name = format!("{}_{n}", col.name);
            n += 1;
        }
        renamed.push(Column::new(name, col.typ.clone()));
    }
    let mut cols = left.to_vec();
    cols.extend(renamed);
    ctx.lookup_record(cols)
}

/// Merge join of two inputs sorted ascending by their keys.
///
/// A right join runs as a left join with the inputs swapped. Assignments, when given, cut
/// each matching right record before it is appended to the left one.
pub struct Join {
    ctx: TypeContext,
    style: JoinStyle,
    left: ValueStream,
    right: ValueStream,
    left_key: ExprEvaluator,
    right_key: ExprEvaluator,
    cutter: Option<Cutter>,
    join_key: Option<Value>,
    join_set: Vec<Value>,
    types: FxHashMap<(Type, Type), Type>,
    batch_size: usize,
    eos: bool,
}

impl Join {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &TypeContext,
        style: JoinStyle,
        left: BoxPuller,
        right: BoxPuller,
        left_key: ExprEvaluator,
        right_key: ExprEvaluator,
        cutter: Option<Cutter>,
        batch_size: usize,
    ) -> Self {
        let (style, left, right, left_key, right_key) = match style {
            JoinStyle::Right => (JoinStyle::Left, right, left, right_key, left_key),
            style => (style, left, right, left_key, right_key),
        };
        Self {
            ctx: ctx.clone(),
            style,
            left: ValueStream::new(left),
            right: ValueStream::new(right),
            left_key,
            right_key,
            cutter,
            join_key: None,
            join_set: Vec::new(),
            types: FxHashMap::default(),
            batch_size: batch_size.max(1),
            eos: false,
        }
    }

    /// Gather the right records whose key equals `key`, skipping smaller ones.
    fn advance_right(&mut self, key: &Value) -> StrataResult<()> {
        self.join_set.clear();
        while let Some(rec) = self.right.peek()? {
            let rkey = self.right_key.eval(rec);
            if rkey.is_missing() {
                self.right.next()?;
                continue;
            }
            match compare_total(&rkey, key, true) {
                Ordering::Less => {
                    self.right.next()?;
                }
                Ordering::Equal => {
                    if let Some(rec) = self.right.next()? {
                        self.join_set.push(rec.keep());
                    }
                }
                Ordering::Greater => break,
            }
        }
        self.join_key = Some(key.keep());
        Ok(())
    }

    fn combine(&mut self, left: &Value, right: &Value) -> StrataResult<Option<Value>> {
        let right = match &mut self.cutter {
            Some(cutter) => match cutter.cut(right)? {
                Some(r) => r,
                None => return Ok(Some(left.clone())),
            },
            None => right.clone(),
        };
        let (Some(lcols), Some(rcols)) = (left.typ().columns(), right.typ().columns()) else {
            return Ok(Some(left.clone()));
        };
        let key = (left.typ().clone(), right.typ().clone());
        let typ = match self.types.get(&key) {
            Some(t) => t.clone(),
            None => {
                let t = joined_type(&self.ctx, lcols, rcols)?;
                self.types.insert(key, t.clone());
                t
            }
        };
        let mut vals: Vec<Value> = left.columns()?.into_iter().map(|(_, v)| v).collect();
        vals.extend(right.columns()?.into_iter().map(|(_, v)| v));
        Value::record_of(typ, &vals).map(Some)
    }

    fn step(&mut self, out: &mut Vec<Value>) -> StrataResult<bool> {
        let Some(left) = self.left.next()? else {
            return Ok(false);
        };
        let key = self.left_key.eval(&left);
        if key.is_missing() || key.is_null() {
            if matches!(self.style, JoinStyle::Left | JoinStyle::Anti) {
                out.push(left);
            }
            return Ok(true);
        }
        let cached = self
            .join_key
            .as_ref()
            .is_some_and(|k| compare_total(k, &key, true).is_eq());
        if !cached {
            self.advance_right(&key)?;
        }
        if self.join_set.is_empty() {
            if matches!(self.style, JoinStyle::Left | JoinStyle::Anti) {
                out.push(left);
            }
            return Ok(true);
        }
        if matches!(self.style, JoinStyle::Anti) {
            return Ok(true);
        }
        let matches = std::mem::take(&mut self.join_set);
        for right in &matches {
            if let Some(v) = self.combine(&left, right)? {
                out.push(v);
            }
        }
        self.join_set = matches;
        Ok(true)
    }

    fn finish(&mut self) -> StrataResult<()> {
        self.eos = true;
        self.join_set.clear();
        let left = self.left.done();
        let right = self.right.done();
        left.and(right)
    }
}

impl Puller for Join {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        if done {
            self.finish()?;
            return Ok(None);
        }
        let mut out = Vec::new();
        while out.len() < self.batch_size {
            if !self.step(&mut out)? {
                self.finish()?;
                break;
            }
        }
        Ok((!out.is_empty()).then(|| Batch::new(out)))
    }
}
