//! Spill-to-disk runs for external merge sort.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_error::StrataResult;
use strata_expr::Comparator;
use strata_value::{TypeContext, Value};
use tempfile::TempDir;

use crate::{Reader, Writer, WriterOptions};

pub const TEMP_PREFIX: &str = "strata-sort-";

/// Owns a temporary directory of sorted runs. Dropping it removes the directory and every
/// run in it.
pub struct MergeSort {
    dir: TempDir,
    cmp: Arc<Comparator>,
    ctx: TypeContext,
    runs: Vec<PathBuf>,
}

impl MergeSort {
    /// Create the spill directory under `temp_dir`, or the system temp directory. Runs are
    /// decoded back into `ctx`.
    pub fn new(cmp: Comparator, ctx: TypeContext, temp_dir: Option<&Path>) -> StrataResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);
        let dir = match temp_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        log::debug!("created spill directory {}", dir.path().display());
        Ok(Self {
            dir,
            cmp: Arc::new(cmp),
            ctx,
            runs: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Sort `vals` stably and write them as a new run.
    pub fn spill(&mut self, mut vals: Vec<Value>) -> StrataResult<()> {
        if vals.is_empty() {
            return Ok(());
        }
        self.cmp.sort_stable(&mut vals);
        let path = self.dir.path().join(format!("run-{}.zng", self.runs.len()));
        let mut w = Writer::new(
            BufWriter::new(File::create(&path)?),
            WriterOptions {
                compress: false,
                ..Default::default()
            },
        );
        for val in &vals {
            w.write(val)?;
        }
        w.close()?;
        log::debug!("spilled {} values to {}", vals.len(), path.display());
        self.runs.push(path);
        Ok(())
    }

    /// Merge every run into a single sorted reader.
    pub fn merge(self) -> StrataResult<MergeReader> {
        let mut runs = Vec::with_capacity(self.runs.len());
        let mut heap = BinaryHeap::with_capacity(self.runs.len());
        for (ordinal, path) in self.runs.iter().enumerate() {
            let mut reader = Reader::new(self.ctx.clone(), File::open(path)?);
            if let Some(val) = reader.read()? {
                heap.push(RunHead {
                    val,
                    ordinal,
                    cmp: self.cmp.clone(),
                });
            }
            runs.push(Some((reader, path.clone())));
        }
        Ok(MergeReader {
            _dir: self.dir,
            runs,
            heap,
        })
    }
}

struct RunHead {
    val: Value,
    ordinal: usize,
    cmp: Arc<Comparator>,
}

impl Ord for RunHead {
    // BinaryHeap is a max-heap: the smallest value, then the earliest run, must compare
    // greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp
            .compare(&self.val, &other.val)
            .then(self.ordinal.cmp(&other.ordinal))
            .reverse()
    }
}

impl PartialOrd for RunHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RunHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for RunHead {}

/// K-way merge over the runs of a [`MergeSort`].
pub struct MergeReader {
    _dir: TempDir,
    runs: Vec<Option<(Reader<File>, PathBuf)>>,
    heap: BinaryHeap<RunHead>,
}

impl MergeReader {
    pub fn read(&mut self) -> StrataResult<Option<Value>> {
        let Some(head) = self.heap.pop() else {
            return Ok(None);
        };
        let ordinal = head.ordinal;
        if let Some((reader, path)) = &mut self.runs[ordinal] {
            match reader.read()? {
                Some(val) => self.heap.push(RunHead {
                    val,
                    ordinal,
                    cmp: head.cmp.clone(),
                }),
                None => {
                    std::fs::remove_file(&*path)?;
                    self.runs[ordinal] = None;
                }
            }
        }
        Ok(Some(head.val))
    }

    /// Up to `n` merged values.
    pub fn read_batch(&mut self, n: usize) -> StrataResult<Vec<Value>> {
        let mut out = Vec::with_capacity(n.min(1024));
        while out.len() < n {
            match self.read()? {
                Some(val) => out.push(val),
                None => break,
            }
        }
        Ok(out)
    }
}

impl Iterator for MergeReader {
    type Item = StrataResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}
