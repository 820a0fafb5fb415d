use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_error::{StrataResult, strata_bail};
use strata_io::{DirMaker, Mux, Source, Uri};
use strata_metrics::StrataMetrics;
use strata_value::Order;

use crate::{CacheKind, ImmutableCache, Ksuid};

pub const METADATA_FILENAME: &str = "zar.json";
pub const DATA_DIRNAME: &str = "zd";
pub const INDEX_DEFS_DIRNAME: &str = "indexdefs";
pub const CURRENT_VERSION: i32 = 2;
pub const DEFAULT_LOG_SIZE_THRESHOLD: i64 = 500 * 1024 * 1024;
pub const DEFAULT_DATA_ORDER: Order = Order::Desc;

pub(crate) const DIR_MODE: u32 = 0o755;

/// The persisted description of an archive, `zar.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: i32,
    /// Root of the data directories: `.` for the archive root, a path relative to it, or a
    /// URI.
    pub data_path: String,
    pub data_order: Order,
    pub log_size_threshold: i64,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            data_path: ".".to_string(),
            data_order: DEFAULT_DATA_ORDER,
            log_size_threshold: DEFAULT_LOG_SIZE_THRESHOLD,
        }
    }
}

impl Metadata {
    pub fn read(mux: &Mux, uri: &Uri) -> StrataResult<Self> {
        let bytes = mux.read_all(uri)?;
        let md: Metadata = serde_json::from_slice(&bytes)?;
        if md.version > CURRENT_VERSION {
            strata_bail!(
                Invalid: "archive {uri} has version {}, newer than supported version {CURRENT_VERSION}",
                md.version
            );
        }
        if md.log_size_threshold <= 0 {
            strata_bail!(Corruption: "archive {uri} has log_size_threshold {}", md.log_size_threshold);
        }
        Ok(md)
    }

    /// Atomically replace the metadata file.
    pub fn write(&self, mux: &Mux, uri: &Uri) -> StrataResult<()> {
        mux.replace_all(uri, &serde_json::to_vec_pretty(self)?)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub data_path: Option<String>,
    pub log_size_threshold: Option<i64>,
    pub data_order: Option<Order>,
}

impl CreateOptions {
    fn metadata(&self) -> StrataResult<Metadata> {
        let mut md = Metadata::default();
        if let Some(path) = &self.data_path {
            md.data_path.clone_from(path);
        }
        if let Some(thresh) = self.log_size_threshold {
            if thresh <= 0 {
                strata_bail!(Invalid: "log size threshold must be positive, got {thresh}");
            }
            md.log_size_threshold = thresh;
        }
        if let Some(order) = self.data_order {
            md.data_order = order;
        }
        Ok(md)
    }
}

#[derive(Clone, Default)]
pub struct OpenOptions {
    /// Cache chunk metadata and index files, holding at most this many.
    pub immutable_cache_entries: Option<u64>,
    /// Restrict reads to these chunks.
    pub log_filter: Option<Vec<Ksuid>>,
    pub metrics: StrataMetrics,
}

/// An opened archive: its layout, order and the shared handles used to reach it.
#[derive(Clone)]
pub struct Archive {
    root: Uri,
    data_path: Uri,
    order: Order,
    log_size_threshold: i64,
    log_filter: Option<Arc<[Ksuid]>>,
    mux: Mux,
    cache: Option<ImmutableCache>,
    metrics: StrataMetrics,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("root", &self.root)
            .field("data_path", &self.data_path)
            .field("order", &self.order)
            .field("log_size_threshold", &self.log_size_threshold)
            .field("log_filter", &self.log_filter)
            .finish_non_exhaustive()
    }
}

fn resolve_data_path(root: &Uri, data_path: &str) -> StrataResult<Uri> {
    if data_path.is_empty() || data_path == "." {
        Ok(root.clone())
    } else if data_path.contains("://") || data_path.starts_with('/') {
        Uri::parse(data_path)
    } else {
        Ok(root.join(data_path))
    }
}

impl Archive {
    /// Create a new archive at `root`. Fails with `exists` if one is already there.
    pub fn create(mux: &Mux, root: &Uri, opts: &CreateOptions) -> StrataResult<()> {
        let md_uri = root.join(METADATA_FILENAME);
        if mux.exists(&md_uri)? {
            strata_bail!(Exists: "archive already exists at {root}");
        }
        let md = opts.metadata()?;
        let data_path = resolve_data_path(root, &md.data_path)?;
        mux.mkdir_all(root, DIR_MODE)?;
        mux.mkdir_all(&data_path.join(DATA_DIRNAME), DIR_MODE)?;
        md.write(mux, &md_uri)?;
        log::debug!("created archive at {root}");
        Ok(())
    }

    pub fn open(mux: &Mux, root: &Uri, opts: &OpenOptions) -> StrataResult<Self> {
        let md = Metadata::read(mux, &root.join(METADATA_FILENAME))
            .map_err(|e| e.with_context(format!("opening archive {root}")))?;
        Ok(Self {
            root: root.clone(),
            data_path: resolve_data_path(root, &md.data_path)?,
            order: md.data_order,
            log_size_threshold: md.log_size_threshold,
            log_filter: opts.log_filter.as_deref().map(Arc::from),
            mux: mux.clone(),
            cache: opts
                .immutable_cache_entries
                .map(|n| ImmutableCache::new(n, &opts.metrics)),
            metrics: opts.metrics.clone(),
        })
    }

    pub fn create_or_open(
        mux: &Mux,
        root: &Uri,
        create: &CreateOptions,
        open: &OpenOptions,
    ) -> StrataResult<Self> {
        if !mux.exists(&root.join(METADATA_FILENAME))? {
            Self::create(mux, root, create)?;
        }
        Self::open(mux, root, open)
    }

    pub fn root(&self) -> &Uri {
        &self.root
    }

    pub fn data_path(&self) -> &Uri {
        &self.data_path
    }

    pub fn data_order(&self) -> Order {
        self.order
    }

    pub fn log_size_threshold(&self) -> i64 {
        self.log_size_threshold
    }

    pub fn mux(&self) -> &Mux {
        &self.mux
    }

    pub fn metrics(&self) -> &StrataMetrics {
        &self.metrics
    }

    pub fn metadata(&self) -> Metadata {
        let data_path = if self.data_path == self.root {
            ".".to_string()
        } else {
            self.root.rel_path(&self.data_path)
        };
        Metadata {
            version: CURRENT_VERSION,
            data_path,
            data_order: self.order,
            log_size_threshold: self.log_size_threshold,
        }
    }

    pub fn metadata_uri(&self) -> Uri {
        self.root.join(METADATA_FILENAME)
    }

    /// Directory holding the per-day buckets.
    pub fn data_dir(&self) -> Uri {
        self.data_path.join(DATA_DIRNAME)
    }

    pub fn index_defs_dir(&self) -> Uri {
        self.root.join(INDEX_DEFS_DIRNAME)
    }

    /// Whether the log filter, if any, admits chunk `id`.
    pub fn is_allowed(&self, id: &Ksuid) -> bool {
        self.log_filter
            .as_ref()
            .is_none_or(|allowed| allowed.contains(id))
    }

    /// Read a small immutable file, through the cache when one is configured.
    pub fn read_immutable(&self, uri: &Uri, kind: CacheKind) -> StrataResult<Bytes> {
        match &self.cache {
            Some(cache) => cache.read(&self.mux, uri, kind),
            None => self.mux.read_all(uri),
        }
    }

    pub(crate) fn invalidate(&self, uri: &Uri) {
        if let Some(cache) = &self.cache {
            cache.invalidate(uri);
        }
    }
}
