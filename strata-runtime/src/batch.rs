use std::ops::Deref;
use std::sync::Arc;

use strata_error::StrataResult;
use strata_value::Value;

/// An ordered, shared, immutable run of values passed between pullers.
///
/// Cloning is cheap. A consumer that keeps a value past the batch should call
/// [`Value::keep`] so it no longer shares the producer's buffers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    vals: Arc<[Value]>,
}

impl Batch {
    pub fn new(vals: Vec<Value>) -> Self {
        Self { vals: vals.into() }
    }

    pub fn values(&self) -> &[Value] {
        &self.vals
    }

    /// The values, copied out unless this is the last handle.
    pub fn into_values(self) -> Vec<Value> {
        self.vals.to_vec()
    }
}

impl Deref for Batch {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.vals
    }
}

impl From<Vec<Value>> for Batch {
    fn from(vals: Vec<Value>) -> Self {
        Self::new(vals)
    }
}

/// A node of a running query.
///
/// `pull(false)` asks for the next batch and yields `None` at end of stream. `pull(true)`
/// tells the puller its consumer is done with it: it must release what it holds, tell its own
/// parents, and return `None`. After reporting end of stream or an error a puller keeps
/// returning `None`.
pub trait Puller: Send {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>>;
}

pub type BoxPuller = Box<dyn Puller>;

impl<P: Puller + ?Sized> Puller for Box<P> {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        (**self).pull(done)
    }
}

/// Emits a fixed list of values, `batch_size` at a time.
pub struct ValuesPuller {
    vals: std::vec::IntoIter<Value>,
    batch_size: usize,
}

impl ValuesPuller {
    pub fn new(vals: Vec<Value>, batch_size: usize) -> Self {
        Self {
            vals: vals.into_iter(),
            batch_size: batch_size.max(1),
        }
    }
}

impl Puller for ValuesPuller {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if done {
            self.vals = Vec::new().into_iter();
            return Ok(None);
        }
        let vals: Vec<Value> = self.vals.by_ref().take(self.batch_size).collect();
        Ok((!vals.is_empty()).then(|| Batch::new(vals)))
    }
}

/// Replays a shared run of batches. Each replay shares the batches' values rather than
/// copying them.
pub struct BatchesPuller {
    batches: Arc<[Batch]>,
    next: usize,
}

impl BatchesPuller {
    pub fn new(batches: Arc<[Batch]>) -> Self {
        Self { batches, next: 0 }
    }
}

impl Puller for BatchesPuller {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if done {
            self.next = self.batches.len();
            return Ok(None);
        }
        let batch = self.batches.get(self.next).cloned();
        self.next = (self.next + 1).min(self.batches.len());
        Ok(batch)
    }
}

/// Pull `puller` to end of stream and gather its values.
pub fn collect(puller: &mut dyn Puller) -> StrataResult<Vec<Value>> {
    let mut out = Vec::new();
    while let Some(batch) = puller.pull(false)? {
        out.extend(batch.iter().cloned());
    }
    Ok(out)
}

/// Reads values one at a time from a puller.
pub(crate) struct ValueStream {
    puller: BoxPuller,
    batch: Option<Batch>,
    pos: usize,
    eos: bool,
}

impl ValueStream {
    pub(crate) fn new(puller: BoxPuller) -> Self {
        Self {
            puller,
            batch: None,
            pos: 0,
            eos: false,
        }
    }

    pub(crate) fn peek(&mut self) -> StrataResult<Option<&Value>> {
        loop {
            if self.eos {
                return Ok(None);
            }
            let have = self.batch.as_ref().is_some_and(|b| self.pos < b.len());
            if have {
                break;
            }
            self.pos = 0;
            self.batch = self.puller.pull(false)?;
            if self.batch.is_none() {
                self.eos = true;
            }
        }
        Ok(self.batch.as_ref().and_then(|b| b.get(self.pos)))
    }

    pub(crate) fn next(&mut self) -> StrataResult<Option<Value>> {
        let val = self.peek()?.cloned();
        if val.is_some() {
            self.pos += 1;
        }
        Ok(val)
    }

    pub(crate) fn done(&mut self) -> StrataResult<()> {
        self.batch = None;
        if !self.eos {
            self.eos = true;
            self.puller.pull(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_puller_batches_and_stops() {
        let vals: Vec<Value> = (0..5).map(Value::int64).collect();
        let mut p = ValuesPuller::new(vals, 2);
        let sizes: Vec<usize> = std::iter::from_fn(|| p.pull(false).unwrap().map(|b| b.len())).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(p.pull(false).unwrap().is_none());
    }

    #[test]
    fn batches_puller_replays_without_copying() {
        let batches: Arc<[Batch]> = vec![Batch::new((0..3).map(Value::int64).collect()), Batch::new(vec![Value::int64(3)])].into();
        let mut first = BatchesPuller::new(batches.clone());
        let mut second = BatchesPuller::new(batches.clone());
        let a = first.pull(false).unwrap().unwrap();
        let b = second.pull(false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a.vals, &b.vals));
        assert_eq!(collect(&mut first).unwrap().len(), 1);
        assert!(first.pull(false).unwrap().is_none());
        assert!(second.pull(true).unwrap().is_none());
        assert!(second.pull(false).unwrap().is_none());
    }

    #[test]
    fn value_stream_spans_batches() {
        let vals: Vec<Value> = (0..5).map(Value::int64).collect();
        let mut s = ValueStream::new(Box::new(ValuesPuller::new(vals, 2)));
        assert_eq!(s.peek().unwrap().and_then(Value::as_int), Some(0));
        let mut got = Vec::new();
        while let Some(v) = s.next().unwrap() {
            got.push(v.as_int().unwrap());
        }
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }
}
