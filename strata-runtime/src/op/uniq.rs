use strata_error::StrataResult;
use strata_value::{TypeContext, Value};

use crate::{Batch, BoxPuller, Puller};

/// Collapses runs of identical adjacent values. With `cflag` each value is emitted as
/// `{value, count}`.
pub struct Uniq {
    parent: BoxPuller,
    ctx: TypeContext,
    cflag: bool,
    last: Option<Value>,
    count: u64,
    eos: bool,
}

impl Uniq {
    pub fn new(parent: BoxPuller, ctx: &TypeContext, cflag: bool) -> Self {
        Self {
            parent,
            ctx: ctx.clone(),
            cflag,
            last: None,
            count: 0,
            eos: false,
        }
    }

    fn wrap(&self, val: Value) -> StrataResult<Value> {
        if !self.cflag {
            return Ok(val);
        }
        Value::record(
            &self.ctx,
            [("value", val), ("count", Value::uint64(self.count))],
        )
    }
}

impl Puller for Uniq {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        if done {
            self.eos = true;
            self.last = None;
            return self.parent.pull(true).map(|_| None);
        }
        while let Some(batch) = self.parent.pull(false)? {
            let mut out = Vec::new();
            for val in batch.iter() {
                if self.last.as_ref() == Some(val) {
                    self.count += 1;
                    continue;
                }
                if let Some(prev) = self.last.replace(val.keep()) {
                    out.push(self.wrap(prev)?);
                }
                self.count = 1;
            }
            if !out.is_empty() {
                return Ok(Some(Batch::new(out)));
            }
        }
        self.eos = true;
        match self.last.take() {
            Some(last) => Ok(Some(Batch::new(vec![self.wrap(last)?]))),
            None => Ok(None),
        }
    }
}
