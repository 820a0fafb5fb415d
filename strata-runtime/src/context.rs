use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use strata_error::StrataResult;
use strata_io::{CancelToken, Mux};
use strata_lake::ImportConfig;
use strata_metrics::StrataMetrics;
use strata_value::TypeContext;
use strata_zng::ScannerStats;

use crate::{BoxPuller, Lake};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Settings of the external sort.
#[derive(Clone, Debug)]
pub struct SortConfig {
    /// Bytes of values held in memory before a sorted run is spilled.
    pub mem_max_bytes: usize,
    /// Parent of spill directories, the system temp directory if unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            mem_max_bytes: 128 * 1024 * 1024,
            temp_dir: None,
        }
    }
}

/// Operators provided by the embedding program.
pub trait Hook: Send + Sync {
    /// Build the `shape` operator over `parent`.
    fn shape(&self, ctx: &Arc<Context>, parent: BoxPuller) -> StrataResult<BoxPuller>;
}

#[derive(Clone)]
pub struct QueryConfig {
    pub batch_size: usize,
    pub sort: SortConfig,
    pub import: ImportConfig,
    pub hook: Option<Arc<dyn Hook>>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sort: SortConfig::default(),
            import: ImportConfig::default(),
            hook: None,
        }
    }
}

/// State shared by every operator of one query.
pub struct Context {
    /// Types of the values flowing through the query.
    pub zctx: TypeContext,
    /// Types of records produced by metadata scans.
    pub mctx: TypeContext,
    pub cancel: CancelToken,
    pub config: QueryConfig,
    pub metrics: StrataMetrics,
    pub mux: Mux,
    pub lake: Option<Lake>,
    progress: Mutex<ScannerStats>,
}

impl Context {
    pub fn new(config: QueryConfig) -> Self {
        Self {
            zctx: TypeContext::new(),
            mctx: TypeContext::new(),
            cancel: CancelToken::new(),
            config,
            metrics: StrataMetrics::default(),
            mux: Mux::default(),
            lake: None,
            progress: Mutex::default(),
        }
    }

    pub fn with_lake(mut self, lake: Lake) -> Self {
        self.mux = lake.mux().clone();
        self.lake = Some(lake);
        self
    }

    pub fn with_mux(mut self, mux: Mux) -> Self {
        self.mux = mux;
        self
    }

    pub fn lake(&self) -> StrataResult<&Lake> {
        self.lake
            .as_ref()
            .ok_or_else(|| strata_error::strata_err!(Invalid: "query has no lake"))
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    /// Fold a scanner's counters into the query's progress.
    pub fn add_progress(&self, stats: ScannerStats) {
        *self.progress.lock() += stats;
    }

    pub fn progress(&self) -> ScannerStats {
        *self.progress.lock()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}
