use std::sync::Arc;

use strata_error::StrataResult;
use strata_lake::Writer;
use strata_value::Value;

use crate::lake::MAIN_BRANCH;
use crate::{Batch, BoxPuller, Context, Puller};

/// Writes its whole input into a pool branch, then emits one summary record
/// `{pool, branch, records_written, chunks_written}`.
pub struct Load {
    parent: BoxPuller,
    ctx: Arc<Context>,
    pool: String,
    branch: String,
    done: bool,
}

impl Load {
    pub fn new(parent: BoxPuller, ctx: &Arc<Context>, pool: &str, branch: Option<&str>) -> StrataResult<Self> {
        let branch = branch.unwrap_or(MAIN_BRANCH);
        // Fail before reading any input if the target is missing.
        ctx.lake()?.open_branch(pool, branch)?;
        Ok(Self {
            parent,
            ctx: ctx.clone(),
            pool: pool.to_string(),
            branch: branch.to_string(),
            done: false,
        })
    }

    fn drain(&mut self, w: &Writer) -> StrataResult<()> {
        while let Some(batch) = self.parent.pull(false)? {
            for rec in batch.iter() {
                w.write(rec)?;
            }
        }
        Ok(())
    }

    fn load(&mut self) -> StrataResult<Value> {
        let ark = self.ctx.lake()?.open_branch(&self.pool, &self.branch)?;
        let w = Writer::new(&ark, self.ctx.config.import.clone())?;
        if let Err(err) = self.drain(&w) {
            let stats = w.abort();
            log::warn!(
                "load into {}@{} failed after {} records: {err}",
                self.pool,
                self.branch,
                stats.records_written
            );
            return Err(err);
        }
        let stats = w.close()?;
        log::info!(
            "loaded {} records into {}@{} as {} chunks",
            stats.records_written,
            self.pool,
            self.branch,
            stats.data_chunks_written
        );
        Value::record(
            &self.ctx.zctx,
            [
                ("pool", Value::string(&self.pool)),
                ("branch", Value::string(&self.branch)),
                ("records_written", Value::uint64(stats.records_written)),
                ("chunks_written", Value::uint64(stats.data_chunks_written)),
            ],
        )
    }
}

impl Puller for Load {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        if done {
            return self.parent.pull(true).map(|_| None);
        }
        Ok(Some(Batch::new(vec![self.load()?])))
    }
}

#[cfg(test)]
mod tests {
    use strata_error::{ErrorKind, strata_bail};
    use strata_io::{Mux, Uri};
    use strata_lake::{CreateOptions, OpenOptions};
    use strata_value::json;

    use super::*;
    use crate::{Lake, QueryConfig, ValuesPuller, collect};

    fn context() -> (tempfile::TempDir, Arc<Context>) {
        let dir = tempfile::tempdir().unwrap();
        let lake = Lake::open(&Mux::default(), &Uri::from_path(dir.path()).unwrap(), OpenOptions::default()).unwrap();
        lake.create_pool("logs", &CreateOptions::default()).unwrap();
        (dir, Arc::new(Context::new(QueryConfig::default()).with_lake(lake)))
    }

    #[test]
    fn loads_input_into_main() {
        let (_dir, ctx) = context();
        let vals = [r#"{"ts":"2017-08-03T14:00:00Z","a":1}"#, r#"{"ts":"2017-08-04T14:00:00Z","a":2}"#]
            .iter()
            .map(|r| json::parse(&ctx.zctx, r).unwrap())
            .collect();
        let mut load = Load::new(Box::new(ValuesPuller::new(vals, 1)), &ctx, "logs", None).unwrap();
        let out = collect(&mut load).unwrap();
        assert_eq!(
            json::to_json(&out[0]).unwrap().to_string(),
            r#"{"pool":"logs","branch":"main","records_written":2,"chunks_written":2}"#
        );
        let ark = ctx.lake().unwrap().open_pool("logs").unwrap();
        assert_eq!(ark.record_count().unwrap(), 2);
    }

    #[test]
    fn unknown_targets_fail_up_front() {
        let (_dir, ctx) = context();
        let empty = || -> BoxPuller { Box::new(ValuesPuller::new(Vec::new(), 1)) };
        let err = Load::new(empty(), &ctx, "nope", None).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = Load::new(empty(), &ctx, "logs", Some("dev")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    /// Yields its values, then fails.
    struct Failing {
        vals: Option<Vec<Value>>,
    }

    impl Puller for Failing {
        fn pull(&mut self, _done: bool) -> StrataResult<Option<Batch>> {
            match self.vals.take() {
                Some(vals) => Ok(Some(Batch::new(vals))),
                None => strata_bail!(Invalid: "input went bad"),
            }
        }
    }

    #[test]
    fn failed_input_leaves_no_chunks() {
        let (_dir, ctx) = context();
        let vals = [r#"{"ts":"2017-08-03T14:00:00Z","a":1}"#, r#"{"ts":"2017-08-04T14:00:00Z","a":2}"#]
            .iter()
            .map(|r| json::parse(&ctx.zctx, r).unwrap())
            .collect();
        let mut load = Load::new(Box::new(Failing { vals: Some(vals) }), &ctx, "logs", None).unwrap();
        let err = collect(&mut load).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        let ark = ctx.lake().unwrap().open_pool("logs").unwrap();
        assert_eq!(ark.record_count().unwrap(), 0);
        let mut chunks = 0;
        ark.walk(|_| {
            chunks += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(chunks, 0);
    }
}
