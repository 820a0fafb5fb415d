use std::sync::Arc;

use simplelog::{Config, LevelFilter, TestLogger};
use strata_expr::{Assignment, eq, lit, path, type_equals};
use strata_io::{CancelToken, Mux, Uri};
use strata_lake::{Archive, CreateOptions, ImportConfig, MultiSource, OpenOptions, SourceFilter, SpanMultiSource, import};
use strata_value::{Order, PrimitiveType, Span, Ts, json};
use strata_zng::record_ts;

use crate::index::{DefinitionStore, IndexFilter, Query, Rule, build_chunk_indexes, find_across_chunks};
use crate::{Context, Lake, Op, Plan, QueryConfig, run};

struct Fixture {
    _dir: tempfile::TempDir,
    ctx: Arc<Context>,
}

impl Fixture {
    fn new() -> Self {
        // Only the first test to get here installs the logger.
        let _ = TestLogger::init(LevelFilter::Debug, Config::default());
        let dir = tempfile::tempdir().unwrap();
        let lake = Lake::open(&Mux::default(), &Uri::from_path(dir.path()).unwrap(), OpenOptions::default()).unwrap();
        Self {
            _dir: dir,
            ctx: Arc::new(Context::new(QueryConfig::default()).with_lake(lake)),
        }
    }

    fn pool(&self, name: &str, order: Order) -> Archive {
        let opts = CreateOptions {
            data_order: Some(order),
            ..Default::default()
        };
        self.ctx.lake().unwrap().create_pool(name, &opts).unwrap()
    }

    /// One import per call, so each call lands in its own chunks.
    fn import(&self, ark: &Archive, rows: &[&str]) {
        import(
            ark,
            ImportConfig::default(),
            rows.iter().map(|r| json::parse(&self.ctx.zctx, r)),
        )
        .unwrap();
    }
}

fn ts(s: &str) -> Ts {
    Ts::parse(s).unwrap()
}

#[test]
fn descending_pool_scan_merges_chunks() {
    let fx = Fixture::new();
    let ark = fx.pool("logs", Order::Desc);
    fx.import(
        &ark,
        &[
            r#"{"ts":"2017-08-03T14:34:40.988247Z","uid":"x"}"#,
            r#"{"ts":"2017-08-03T14:34:37.501001Z","uid":"y"}"#,
        ],
    );
    fx.import(
        &ark,
        &[
            r#"{"ts":"2017-08-03T14:34:40.988247Z","uid":"z"}"#,
            r#"{"ts":"2017-08-03T14:34:37.471635Z","uid":"w"}"#,
        ],
    );
    assert_eq!(ark.spans(Span::all()).unwrap()[0].chunks.len(), 2);

    let plan = Plan::sequential([
        Op::PoolScan {
            pool: "logs".into(),
            span: None,
            filter: None,
        },
        Op::Pick {
            args: vec![Assignment::new("ts", path("ts"))],
        },
    ]);
    let out = run(&fx.ctx, plan).unwrap();
    assert!(out.iter().all(|v| v.columns().unwrap().len() == 1));
    assert_eq!(
        out.iter().map(record_ts).collect::<Vec<_>>(),
        vec![
            ts("2017-08-03T14:34:40.988247Z"),
            ts("2017-08-03T14:34:40.988247Z"),
            ts("2017-08-03T14:34:37.501001Z"),
            ts("2017-08-03T14:34:37.471635Z"),
        ]
    );
}

#[test]
fn prefilter_rejects_chunks_without_the_literal() {
    let fx = Fixture::new();
    let ark = fx.pool("logs", Order::Asc);
    fx.import(
        &ark,
        &[
            r#"{"ts":"2017-08-03T01:00:00Z","field":{"name":"world"}}"#,
            r#"{"ts":"2017-08-03T02:00:00Z","field":{"name":"planet"}}"#,
        ],
    );
    let plan = Plan::sequential([Op::PoolScan {
        pool: "logs".into(),
        span: None,
        filter: Some(eq(path("field.name"), lit("hello"))),
    }]);
    assert!(run(&fx.ctx, plan).unwrap().is_empty());
    let progress = fx.ctx.progress();
    assert!(progress.bytes_read > 0);
    assert_eq!(progress.records_read, 0);
}

#[test]
fn type_index_prunes_chunks_without_the_key() {
    let fx = Fixture::new();
    let ark = fx.pool("logs", Order::Asc);
    fx.import(
        &ark,
        &[
            r#"{"ts":"2017-08-03T01:00:00Z","n":336}"#,
            r#"{"ts":"2017-08-03T02:00:00Z","n":1}"#,
        ],
    );
    fx.import(
        &ark,
        &[
            r#"{"ts":"2017-08-05T01:00:00Z","n":2}"#,
            r#"{"ts":"2017-08-05T02:00:00Z","n":3}"#,
        ],
    );
    let store = DefinitionStore::new(&ark);
    store.add(Rule::new_type(PrimitiveType::Int64)).unwrap();
    let defs = store.list().unwrap();
    assert_eq!(build_chunk_indexes(&fx.ctx, &ark, &defs).unwrap(), 2);
    // Already built.
    assert_eq!(build_chunk_indexes(&fx.ctx, &ark, &defs).unwrap(), 0);

    let filter = type_equals(PrimitiveType::Int64, 336i64);
    let pushdown = IndexFilter::new(&defs, &filter).unwrap();
    let ms = SpanMultiSource::new(ark.clone()).with_chunk_filter(Arc::new(pushdown));
    let sf = SourceFilter {
        filter: Some(filter.clone()),
        span: Span::all(),
    };
    let mut hits = Vec::new();
    let mut kept_bytes = 0;
    for si in ms.sources(Span::all()).unwrap() {
        let hit_day = si.span.contains(ts("2017-08-03T01:00:00Z"));
        let mut reader = ms.open(&fx.ctx.zctx, &si, &sf, &CancelToken::new()).unwrap();
        while let Some(rec) = reader.read().unwrap() {
            hits.push(rec.field("n").unwrap().as_int().unwrap());
        }
        if hit_day {
            kept_bytes = si.chunks.iter().map(|c| u64::try_from(c.size).unwrap()).sum();
        }
    }
    assert_eq!(hits, vec![336]);
    // Only the chunk holding the key was opened.
    assert_eq!(ms.stats().chunks_opened_bytes(), kept_bytes);

    let plan = Plan::sequential([Op::PoolScan {
        pool: "logs".into(),
        span: None,
        filter: Some(filter),
    }]);
    let out = run(&fx.ctx, plan).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(fx.ctx.progress().records_read, 2);
}

#[test]
fn index_lookups_span_chunks_and_skip_unindexed_ones() {
    let fx = Fixture::new();
    let ark = fx.pool("logs", Order::Asc);
    fx.import(
        &ark,
        &[
            r#"{"ts":"2017-08-03T01:00:00Z","n":7,"uid":"a"}"#,
            r#"{"ts":"2017-08-03T02:00:00Z","n":7,"uid":"b"}"#,
        ],
    );
    fx.import(
        &ark,
        &[
            r#"{"ts":"2017-08-05T01:00:00Z","n":7,"uid":"a"}"#,
            r#"{"ts":"2017-08-05T02:00:00Z","n":8,"uid":"c"}"#,
        ],
    );
    let store = DefinitionStore::new(&ark);
    store.add(Rule::new_type(PrimitiveType::Int64)).unwrap();
    store.add(Rule::new_field("uid")).unwrap();
    assert_eq!(build_chunk_indexes(&fx.ctx, &ark, &store.list().unwrap()).unwrap(), 4);
    let mut indexed = Vec::new();
    ark.walk(|chunk| {
        indexed.push(chunk.id.to_string());
        Ok(())
    })
    .unwrap();
    // A later chunk holding the same keys but no indexes yet.
    fx.import(&ark, &[r#"{"ts":"2017-08-07T01:00:00Z","n":7,"uid":"a"}"#]);

    let lookup = |pattern: &str| {
        let q = Query::parse(None, &[pattern]).unwrap();
        find_across_chunks(&ark, &fx.ctx.zctx, &q).unwrap()
    };
    let chunk_ids = |hits: &[strata_value::Value]| -> Vec<String> {
        hits.iter()
            .map(|h| h.field("chunk_id").unwrap().as_str().unwrap().to_string())
            .collect()
    };

    let hits = lookup(":int64=7");
    assert_eq!(chunk_ids(&hits), indexed);
    let counts: Vec<u64> = hits.iter().map(|h| h.field("count").unwrap().as_uint().unwrap()).collect();
    assert_eq!(counts, vec![2, 1]);
    assert!(hits.iter().all(|h| h.field("key").unwrap().as_int() == Some(7)));

    let hits = lookup("uid=a");
    assert_eq!(chunk_ids(&hits), indexed);
    assert!(hits.iter().all(|h| h.field("key").unwrap().as_str() == Some("a")));

    assert!(lookup(":int64=999").is_empty());
    assert!(lookup("uid=zzz").is_empty());
}

#[test]
fn json_plan_loads_then_summarizes() {
    let fx = Fixture::new();
    fx.pool("logs", Order::Desc);
    let input = tempfile::NamedTempFile::new().unwrap();
    let rows: Vec<_> = [
        r#"{"ts":"2017-08-03T01:00:00Z","uid":"a","bytes":10}"#,
        r#"{"ts":"2017-08-03T02:00:00Z","uid":"b","bytes":5}"#,
        r#"{"ts":"2017-08-04T03:00:00Z","uid":"a","bytes":7}"#,
    ]
    .iter()
    .map(|r| json::parse(&fx.ctx.zctx, r).unwrap())
    .collect();
    std::fs::write(input.path(), strata_zng::write_all(&rows).unwrap()).unwrap();

    let load: Plan = serde_json::from_value(serde_json::json!({
        "nodes": [
            {"kind": "FileScan", "uri": input.path().to_str().unwrap()},
            {"kind": "Load", "pool": "logs"},
            {"kind": "Sequential", "ops": [0, 1]},
        ],
        "root": 2,
    }))
    .unwrap();
    let report = run(&fx.ctx, load).unwrap();
    assert_eq!(report[0].field("records_written").unwrap().as_uint(), Some(3));

    let query: Plan = serde_json::from_value(serde_json::json!({
        "nodes": [
            {"kind": "PoolScan", "pool": "logs"},
            {"kind": "Summarize",
             "keys": [{"lhs": ["uid"], "rhs": {"kind": "Path", "path": ["uid"]}}],
             "aggs": [{"lhs": ["total"], "func": "sum", "expr": {"kind": "Path", "path": ["bytes"]}}]},
            {"kind": "Sort", "keys": [{"kind": "Path", "path": ["uid"]}], "order": "asc"},
            {"kind": "Sequential", "ops": [0, 1, 2]},
        ],
        "root": 3,
    }))
    .unwrap();
    let out: Vec<String> = run(&fx.ctx, query)
        .unwrap()
        .iter()
        .map(|v| json::to_json(v).unwrap().to_string())
        .collect();
    assert_eq!(out, vec![r#"{"uid":"a","total":17}"#, r#"{"uid":"b","total":5}"#]);
}

#[test]
fn deleter_plan_removes_matching_records() {
    let fx = Fixture::new();
    let ark = fx.pool("logs", Order::Asc);
    fx.import(
        &ark,
        &[
            r#"{"ts":"2017-08-03T01:00:00Z","uid":"a"}"#,
            r#"{"ts":"2017-08-03T02:00:00Z","uid":"b"}"#,
        ],
    );
    let delete = Plan::sequential([Op::Deleter {
        pool: "logs".into(),
        filter: eq(path("uid"), lit("a")),
    }]);
    assert_eq!(run(&fx.ctx, delete).unwrap().len(), 1);
    let scan = Plan::sequential([Op::PoolScan {
        pool: "logs".into(),
        span: None,
        filter: None,
    }]);
    let left = run(&fx.ctx, scan).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].field("uid").unwrap().as_str(), Some("b"));
    assert_eq!(ark.record_count().unwrap(), 1);
}

#[test]
fn cancelled_queries_stop() {
    let fx = Fixture::new();
    fx.pool("logs", Order::Asc);
    fx.ctx.cancel.cancel();
    let plan = Plan::sequential([Op::PoolScan {
        pool: "logs".into(),
        span: None,
        filter: None,
    }]);
    let err = run(&fx.ctx, plan).unwrap_err();
    assert_eq!(err.kind(), strata_error::ErrorKind::Cancelled);
}
