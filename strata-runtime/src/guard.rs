use strata_error::StrataResult;
use strata_io::CancelToken;

use crate::{Batch, BoxPuller, Puller};

/// Wraps every compiled operator: checks cancellation before each pull and latches end of
/// stream, so an operator that failed or finished is never pulled again.
pub(crate) struct Guard {
    inner: BoxPuller,
    cancel: CancelToken,
    name: &'static str,
    finished: bool,
}

impl Guard {
    pub(crate) fn wrap(inner: BoxPuller, cancel: CancelToken, name: &'static str) -> BoxPuller {
        Box::new(Self {
            inner,
            cancel,
            name,
            finished: false,
        })
    }
}

impl Puller for Guard {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }
        if !done {
            if let Err(err) = self.cancel.check() {
                self.finished = true;
                // Release what the operator holds; the cancellation is the error to report.
                if let Err(e) = self.inner.pull(true) {
                    log::debug!("{} failed to release after cancellation: {e}", self.name);
                }
                return Err(err);
            }
        }
        match self.inner.pull(done) {
            Ok(Some(batch)) if !done => Ok(Some(batch)),
            Ok(_) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                log::debug!("{} failed: {e}", self.name);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_value::Value;

    use super::*;
    use crate::ValuesPuller;

    struct Failing;

    impl Puller for Failing {
        fn pull(&mut self, _done: bool) -> StrataResult<Option<Batch>> {
            Err(strata_error::strata_err!("boom"))
        }
    }

    #[test]
    fn first_error_is_reported_once() {
        let mut g = Guard::wrap(Box::new(Failing), CancelToken::new(), "failing");
        assert!(g.pull(false).is_err());
        assert!(g.pull(false).unwrap().is_none());
    }

    #[test]
    fn cancellation_stops_pulling() {
        let cancel = CancelToken::new();
        let vals = (0..10).map(Value::int64).collect();
        let mut g = Guard::wrap(Box::new(ValuesPuller::new(vals, 2)), cancel.clone(), "values");
        assert!(g.pull(false).unwrap().is_some());
        cancel.cancel();
        assert!(g.pull(false).unwrap_err().is_cancelled());
        assert!(g.pull(false).unwrap().is_none());
    }
}
