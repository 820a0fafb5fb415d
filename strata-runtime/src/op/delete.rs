use std::sync::Arc;

use strata_error::StrataResult;
use strata_expr::{Expr, ExprEvaluator, compile, matches};
use strata_lake::{Archive, Chunk, ChunkReader, ChunkWriter};
use strata_value::{Span, Value};
use strata_zng::Reader;

use crate::{Batch, Context, Puller};

/// Removes the records of a pool for which a predicate is true.
///
/// Each chunk holding such records is rewritten without them: the replacement masks the old
/// chunk, which is then deleted. Emits `{chunk_id, records_deleted}` per rewritten chunk.
pub struct Deleter {
    ctx: Arc<Context>,
    ark: Archive,
    pred: ExprEvaluator,
    done: bool,
}

impl Deleter {
    pub fn new(ctx: &Arc<Context>, pool: &str, filter: &Expr) -> StrataResult<Self> {
        let ark = ctx.lake()?.open_pool(pool)?;
        let pred = compile(&ctx.zctx, filter)?;
        Ok(Self {
            ctx: ctx.clone(),
            ark,
            pred,
            done: false,
        })
    }

    /// Rewrite `chunk` without the matching records, returning how many went.
    fn delete_from(&self, chunk: &Chunk) -> StrataResult<u64> {
        let mut reader = Reader::new(self.ctx.zctx.clone(), ChunkReader::open(&self.ark, chunk, chunk.span())?);
        let mut kept = Vec::new();
        let mut deleted = 0;
        while let Some(rec) = reader.read()? {
            // Errors and missing values never delete.
            if matches(self.pred.as_ref(), &rec) {
                deleted += 1;
            } else {
                kept.push(rec);
            }
        }
        if deleted == 0 {
            return Ok(0);
        }
        if !kept.is_empty() {
            let mut w = ChunkWriter::create(&self.ark, chunk.first, vec![chunk.id], &self.ctx.config.import)?;
            for rec in &kept {
                if let Err(e) = w.write(rec) {
                    w.abort();
                    return Err(e);
                }
            }
            if let Some(replacement) = w.close()? {
                log::debug!("chunk {} replaces {}", replacement.id, chunk.id);
            }
        }
        chunk.delete(&self.ark)?;
        Ok(deleted)
    }

    fn run(&self) -> StrataResult<Vec<Value>> {
        let mut out = Vec::new();
        for (_, dir) in self.ark.buckets(Span::all())? {
            for chunk in self.ark.bucket_chunks(&dir)? {
                self.ctx.cancel.check()?;
                let deleted = self.delete_from(&chunk)?;
                if deleted > 0 {
                    out.push(Value::record(
                        &self.ctx.zctx,
                        [
                            ("chunk_id", Value::string(&chunk.id.to_string())),
                            ("records_deleted", Value::uint64(deleted)),
                        ],
                    )?);
                }
            }
        }
        Ok(out)
    }
}

impl Puller for Deleter {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.done || done {
            self.done = true;
            return Ok(None);
        }
        self.done = true;
        let out = self.run()?;
        Ok((!out.is_empty()).then(|| Batch::new(out)))
    }
}

#[cfg(test)]
mod tests {
    use strata_expr::{eq, lit, path};
    use strata_io::{Mux, Uri};
    use strata_lake::{CreateOptions, ImportConfig, OpenOptions, import};
    use strata_value::json;

    use super::*;
    use crate::op::pool_scan;
    use crate::{Lake, QueryConfig, collect};

    #[test]
    fn deletes_matching_records_and_replaces_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let lake = Lake::open(&Mux::default(), &Uri::from_path(dir.path()).unwrap(), OpenOptions::default()).unwrap();
        let ark = lake.create_pool("logs", &CreateOptions::default()).unwrap();
        let ctx = Arc::new(Context::new(QueryConfig::default()).with_lake(lake));
        let rows = [
            r#"{"ts":"2017-08-03T14:00:00Z","uid":"a"}"#,
            r#"{"ts":"2017-08-03T15:00:00Z","uid":"b"}"#,
            r#"{"ts":"2017-08-04T01:00:00Z","uid":"c"}"#,
            r#"{"ts":"2017-08-05T01:00:00Z","x":1}"#,
        ];
        import(&ark, ImportConfig::default(), rows.iter().map(|r| json::parse(&ctx.zctx, r))).unwrap();
        let before: Vec<_> = ark.spans(Span::all()).unwrap().iter().flat_map(|s| s.chunks.clone()).collect();

        let mut del = Deleter::new(&ctx, "logs", &eq(path("uid"), lit("b"))).unwrap();
        let report = collect(&mut del).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].field("records_deleted").unwrap().as_uint(), Some(1));
        let replaced = report[0].field("chunk_id").unwrap();
        assert!(before.iter().any(|c| Some(c.id.to_string().as_str()) == replaced.as_str()));

        let left: Vec<String> = collect(&mut pool_scan(&ctx, "logs", None, None).unwrap())
            .unwrap()
            .iter()
            .map(|v| json::to_json(v).unwrap()["ts"].to_string())
            .collect();
        assert_eq!(left.len(), 3);
        assert!(!left.iter().any(|t| t.contains("15:00")));

        // Nothing left to delete.
        let mut again = Deleter::new(&ctx, "logs", &eq(path("uid"), lit("b"))).unwrap();
        assert!(collect(&mut again).unwrap().is_empty());
    }
}
