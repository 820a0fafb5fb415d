use std::iter;

use strata_error::{StrataResult, strata_bail, strata_err};
use strata_expr::Literal;
use strata_lake::{Archive, CacheKind, Chunk, index_file_name};
use strata_value::{PrimitiveType, TypeContext, Value};
use strata_zng::microindex::Finder;

use super::{Definition, DefinitionStore, Rule};

/// A lookup against one index: the rule it targets and the key tuple to find.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    target: Target,
    pub keys: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
enum Target {
    Rule(Rule),
    Named(String),
}

impl Query {
    /// Without a name, one pattern `:type=value` or `field=value`. With a name, the patterns
    /// are the key values of the named query index, in key order.
    pub fn parse(name: Option<&str>, patterns: &[&str]) -> StrataResult<Self> {
        if let Some(name) = name {
            if patterns.is_empty() {
                strata_bail!(Invalid: "index query {name} needs at least one key");
            }
            return Ok(Self {
                target: Target::Named(name.to_string()),
                keys: patterns.iter().map(|p| Literal::infer(p).to_value()).collect(),
            });
        }
        let [pattern] = patterns else {
            strata_bail!(Invalid: "index query needs exactly one pattern, got {}", patterns.len());
        };
        let (lhs, rhs) = pattern
            .split_once('=')
            .ok_or_else(|| strata_err!(Invalid: "index query '{pattern}' is not of the form key=value"))?;
        let (rule, key) = match lhs.strip_prefix(':') {
            Some(typ) => {
                let typ: PrimitiveType = typ.parse()?;
                (Rule::new_type(typ), Literal::parse_as(typ, rhs)?.to_value())
            }
            None if lhs.is_empty() => strata_bail!(Invalid: "index query '{pattern}' has no field"),
            None => (Rule::new_field(lhs), Literal::infer(rhs).to_value()),
        };
        Ok(Self {
            target: Target::Rule(rule),
            keys: vec![key],
        })
    }

    pub fn matches(&self, def: &Definition) -> bool {
        match (&self.target, &def.rule) {
            (Target::Named(name), Rule::Query { name: n, .. }) => name == n,
            (Target::Rule(rule), other) => rule.equivalent(other),
            _ => false,
        }
    }

    /// The stored definition this query runs against.
    pub fn definition(&self, store: &DefinitionStore) -> StrataResult<Definition> {
        store
            .list()?
            .into_iter()
            .find(|d| self.matches(d))
            .ok_or_else(|| strata_err!(NotFound: "no index for {}", self.describe()))
    }

    fn describe(&self) -> String {
        match &self.target {
            Target::Rule(rule) => rule.to_string(),
            Target::Named(name) => format!("query-{name}"),
        }
    }
}

/// Look `keys` up in the index `def` built on `chunk`. A chunk without that index yields a
/// not-found error.
pub fn find(ark: &Archive, ctx: &TypeContext, def: &Definition, chunk: &Chunk, keys: &[Value]) -> StrataResult<Vec<Value>> {
    let uri = chunk.localize(&index_file_name(&def.id));
    let finder = Finder::from_bytes(ctx, ark.read_immutable(&uri, CacheKind::Index)?)?;
    finder.lookup(keys)
}

/// Run `query` against every chunk of the pool, in pool order. Each hit is returned with a
/// `chunk_id` field naming the chunk it came from. Chunks not yet indexed are skipped.
pub fn find_across_chunks(ark: &Archive, ctx: &TypeContext, query: &Query) -> StrataResult<Vec<Value>> {
    let def = query.definition(&DefinitionStore::new(ark))?;
    let mut out = Vec::new();
    ark.walk(|chunk| {
        let hits = match find(ark, ctx, &def, chunk, &query.keys) {
            Ok(hits) => hits,
            Err(e) if e.is_not_found() => {
                log::debug!("chunk {} has no index {}", chunk.id, def.id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let chunk_id = Value::string(&chunk.id.to_string());
        for hit in hits {
            let fields = hit
                .columns()?
                .into_iter()
                .map(|(col, v)| (col.name.clone(), v))
                .chain(iter::once(("chunk_id".to_string(), chunk_id.clone())));
            out.push(Value::record(ctx, fields)?);
        }
        Ok(())
    })?;
    Ok(out)
}
