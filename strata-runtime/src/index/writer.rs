use std::mem;
use std::sync::Arc;

use strata_error::{StrataResult, strata_bail};
use strata_io::{Source, Uri};
use strata_lake::{Archive, Chunk, ChunkReader, Ksuid, index_file_name};
use strata_value::{FieldPath, Type, Value};
use strata_zng::microindex::{IndexOptions, IndexWriter};
use strata_zng::Reader;

use super::Definition;
use crate::builder::Builder;
use crate::{Batch, BatchesPuller, BoxPuller, Context, Puller};

/// Writes one index file from the entries of one definition.
///
/// Entries must arrive sorted by the definition's keys, and each key keeps the type it had
/// in the first entry.
pub struct Writer {
    def_id: Ksuid,
    keys: Vec<FieldPath>,
    key_types: Option<Vec<Type>>,
    index: IndexWriter,
}

impl Writer {
    pub fn create(ark: &Archive, uri: Uri, def: &Definition) -> StrataResult<Self> {
        let keys = def.rule.keys();
        let index = IndexWriter::create(
            ark.mux(),
            uri,
            IndexOptions {
                keys: keys.clone(),
                frame_thresh: def.frame_thresh,
                descending: false,
            },
        )?;
        Ok(Self {
            def_id: def.id,
            keys,
            key_types: None,
            index,
        })
    }

    pub fn uri(&self) -> &Uri {
        self.index.uri()
    }

    pub fn write(&mut self, entry: &Value) -> StrataResult<()> {
        let types: Vec<Type> = self
            .keys
            .iter()
            .map(|k| entry.deref(k).map_or(Type::NULL, |v| v.typ().clone()))
            .collect();
        match &self.key_types {
            None => self.key_types = Some(types),
            Some(expected) => {
                for ((key, want), got) in self.keys.iter().zip(expected).zip(&types) {
                    // A null key fits any column.
                    if want != got && *got != Type::NULL && *want != Type::NULL {
                        strata_bail!(
                            Invalid: "index {}: key {key} changed type from {want} to {got}",
                            self.def_id
                        );
                    }
                }
            }
        }
        self.index.write(entry)
    }

    /// Finish the index file. A failure leaves no file behind.
    pub fn close(self) -> StrataResult<()> {
        self.index.close()
    }

    pub fn abort(self) -> StrataResult<()> {
        self.index.abort()
    }
}

/// The index entries a definition derives from a chunk's records.
pub fn entries(ctx: &Arc<Context>, def: &Definition, input: BoxPuller) -> StrataResult<BoxPuller> {
    let plan = Arc::new(def.rule.plan());
    let builder = Builder::new(ctx.clone(), plan.clone());
    builder.build_one(plan.root, vec![input])
}

/// Builds the indexes of several definitions from one pass over a chunk.
///
/// The chunk's records are held once and every definition's plan replays the same batches.
/// If any index fails, every index of the pass is removed.
pub struct MultiWriter {
    ctx: Arc<Context>,
    targets: Vec<(Definition, Uri)>,
    batches: Vec<Batch>,
    pending: Vec<Value>,
}

impl MultiWriter {
    pub fn new(ctx: Arc<Context>, chunk: &Chunk, defs: &[Definition]) -> Self {
        let targets = defs
            .iter()
            .map(|d| (d.clone(), chunk.localize(&index_file_name(&d.id))))
            .collect();
        Self {
            ctx,
            targets,
            batches: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn write(&mut self, rec: &Value) {
        self.pending.push(rec.keep());
        if self.pending.len() >= self.ctx.batch_size() {
            self.batches.push(Batch::new(mem::take(&mut self.pending)));
        }
    }

    pub fn close(self, ark: &Archive) -> StrataResult<()> {
        let Self {
            ctx,
            targets,
            mut batches,
            pending,
        } = self;
        if !pending.is_empty() {
            batches.push(Batch::new(pending));
        }
        let batches: Arc<[Batch]> = batches.into();
        let mut written: Vec<&Uri> = Vec::with_capacity(targets.len());
        for (def, uri) in &targets {
            let input = Box::new(BatchesPuller::new(batches.clone()));
            if let Err(err) = write_index(&ctx, ark, def, uri.clone(), input) {
                for uri in written {
                    if let Err(e) = ark.mux().remove(uri) {
                        log::warn!("removing index {uri}: {e}");
                    }
                }
                return Err(err);
            }
            written.push(uri);
        }
        Ok(())
    }
}

/// Stream the entries `def` derives from `input` into a new index file at `uri`. On failure
/// the partial file is discarded and the failure that stopped the write is returned.
fn write_index(ctx: &Arc<Context>, ark: &Archive, def: &Definition, uri: Uri, input: BoxPuller) -> StrataResult<()> {
    let mut w = Writer::create(ark, uri, def)?;
    match write_entries(ctx, def, input, &mut w) {
        Ok(()) => w.close(),
        Err(err) => {
            let uri = w.uri().clone();
            if let Err(e) = w.abort() {
                log::warn!("discarding index {uri}: {e}");
            }
            Err(err)
        }
    }
}

fn write_entries(ctx: &Arc<Context>, def: &Definition, input: BoxPuller, w: &mut Writer) -> StrataResult<()> {
    let mut out = entries(ctx, def, input)?;
    while let Some(batch) = out.pull(false)? {
        for entry in batch.iter() {
            w.write(entry)?;
        }
    }
    Ok(())
}

/// Build every missing index of `defs` on every chunk of `ark`. Returns the number of index
/// files written.
pub fn build_chunk_indexes(ctx: &Arc<Context>, ark: &Archive, defs: &[Definition]) -> StrataResult<usize> {
    let mut built = 0;
    ark.walk(|chunk| {
        ctx.cancel.check()?;
        let mut missing = Vec::new();
        for def in defs {
            if !ark.mux().exists(&chunk.localize(&index_file_name(&def.id)))? {
                missing.push(def.clone());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        let mut w = MultiWriter::new(ctx.clone(), chunk, &missing);
        let mut reader = Reader::new(ctx.zctx.clone(), ChunkReader::open(ark, chunk, chunk.span())?);
        while let Some(rec) = reader.read()? {
            w.write(&rec);
        }
        w.close(ark)?;
        log::debug!("built {} indexes for chunk {}", missing.len(), chunk.id);
        built += missing.len();
        Ok(())
    })?;
    Ok(built)
}
