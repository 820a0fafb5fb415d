use strata_error::StrataResult;
use strata_io::Source;
use strata_value::{Type, TypeContext, Value};
use strata_zng::microindex::Finder;

use crate::{Archive, Chunk, Ksuid};

pub const INDEX_FILE_PREFIX: &str = "idx-";

/// Name of the sidecar file holding the index built from definition `def_id`.
pub fn index_file_name(def_id: &Ksuid) -> String {
    format!("{INDEX_FILE_PREFIX}{def_id}.zng")
}

/// The definition id of an index sidecar file name.
pub fn index_file_match(name: &str) -> Option<Ksuid> {
    name.strip_prefix(INDEX_FILE_PREFIX)?
        .strip_suffix(".zng")?
        .parse()
        .ok()
}

fn chunk_stat(ctx: &TypeContext, chunk: &Chunk) -> StrataResult<Value> {
    Value::record(
        ctx,
        [
            ("type", Value::string("chunk")),
            ("log_id", Value::string(&chunk.id.to_string())),
            ("first", Value::time(chunk.first)),
            ("last", Value::time(chunk.last)),
            ("size", Value::int64(chunk.size)),
            ("record_count", Value::uint64(chunk.record_count)),
        ],
    )
}

fn index_stat(ctx: &TypeContext, chunk: &Chunk, def_id: &Ksuid, finder: &Finder) -> StrataResult<Value> {
    let stat = finder.stat();
    let keys: Vec<Value> = stat
        .keys
        .iter()
        .map(|k| Value::string(&k.to_string()))
        .collect();
    Value::record(
        ctx,
        [
            ("type", Value::string("index")),
            ("log_id", Value::string(&chunk.id.to_string())),
            ("first", Value::time(chunk.first)),
            ("last", Value::time(chunk.last)),
            ("index_id", Value::string(&def_id.to_string())),
            ("size", Value::uint64(stat.size)),
            ("record_count", Value::uint64(finder.entries()?.len() as u64)),
            ("keys", Value::array(ctx, &Type::STRING, &keys)?),
        ],
    )
}

impl Archive {
    /// One record per chunk followed by one per index in its sidecar, in archive order.
    pub fn stat(&self, ctx: &TypeContext) -> StrataResult<Vec<Value>> {
        let mut out = Vec::new();
        self.walk(|chunk| {
            out.push(chunk_stat(ctx, chunk)?);
            let mut entries = self.mux().read_dir(&chunk.zar_dir())?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in entries {
                let Some(def_id) = index_file_match(&entry.name) else {
                    continue;
                };
                let finder = Finder::open(self.mux(), &chunk.localize(&entry.name), ctx)?;
                out.push(index_stat(ctx, chunk, &def_id, &finder)?);
            }
            Ok(())
        })?;
        Ok(out)
    }

    /// Records across every chunk.
    pub fn record_count(&self) -> StrataResult<u64> {
        let mut count = 0;
        self.walk(|chunk| {
            count += chunk.record_count;
            Ok(())
        })?;
        Ok(count)
    }
}
