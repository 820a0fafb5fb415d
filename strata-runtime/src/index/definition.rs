use strata_error::{StrataResult, strata_bail, strata_err};
use strata_io::{DirMaker, Mux, Source, Uri};
use strata_lake::{Archive, Ksuid};
use strata_value::{TypeContext, Value};
use strata_zng::microindex::DEFAULT_FRAME_THRESH;

use super::Rule;

const DEF_FILE_PREFIX: &str = "idxdef-";

fn def_file_name(id: &Ksuid) -> String {
    format!("{DEF_FILE_PREFIX}{id}.zng")
}

fn def_file_match(name: &str) -> Option<Ksuid> {
    name.strip_prefix(DEF_FILE_PREFIX)?
        .strip_suffix(".zng")?
        .parse()
        .ok()
}

/// A rule with the id its index files are named by.
#[derive(Clone, Debug, PartialEq)]
pub struct Definition {
    pub id: Ksuid,
    pub rule: Rule,
    pub frame_thresh: usize,
}

impl Definition {
    pub fn new(rule: Rule) -> Self {
        Self {
            id: Ksuid::new(),
            rule,
            frame_thresh: DEFAULT_FRAME_THRESH,
        }
    }

    /// The stored form, `{id, name, frame_thresh, rule}` with the rule as JSON text.
    pub fn to_value(&self, ctx: &TypeContext) -> StrataResult<Value> {
        Value::record(
            ctx,
            [
                ("id", Value::string(&self.id.to_string())),
                ("name", Value::string(&self.rule.to_string())),
                (
                    "frame_thresh",
                    Value::int64(i64::try_from(self.frame_thresh).unwrap_or(i64::MAX)),
                ),
                ("rule", Value::string(&serde_json::to_string(&self.rule)?)),
            ],
        )
    }

    pub fn from_value(val: &Value) -> StrataResult<Self> {
        let field = |name: &str| {
            val.field(name)
                .ok_or_else(|| strata_err!(Corruption: "index definition has no {name}: {val}"))
        };
        let id = field("id")?;
        let id = id
            .as_str()
            .ok_or_else(|| strata_err!(Corruption: "bad index definition id: {val}"))?
            .parse()?;
        let rule = field("rule")?;
        let rule = rule
            .as_str()
            .ok_or_else(|| strata_err!(Corruption: "bad index definition rule: {val}"))?;
        let rule = serde_json::from_str(rule)
            .map_err(|e| strata_err!(Corruption: "decoding index rule: {e}"))?;
        let frame_thresh = field("frame_thresh")?
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(DEFAULT_FRAME_THRESH);
        Ok(Self {
            id,
            rule,
            frame_thresh,
        })
    }
}

/// The index definitions of one pool, one file each under `indexdefs/`.
pub struct DefinitionStore {
    mux: Mux,
    dir: Uri,
}

impl DefinitionStore {
    pub fn new(ark: &Archive) -> Self {
        Self {
            mux: ark.mux().clone(),
            dir: ark.index_defs_dir(),
        }
    }

    /// Persist a new definition. A rule equivalent to a stored one is refused.
    pub fn add(&self, rule: Rule) -> StrataResult<Definition> {
        if let Some(existing) = self.list()?.iter().find(|d| d.rule.equivalent(&rule)) {
            strata_bail!(Exists: "index {rule} already defined as {}", existing.id);
        }
        let def = Definition::new(rule);
        self.mux.mkdir_all(&self.dir, 0o755)?;
        let bytes = strata_zng::write_all(&[def.to_value(&TypeContext::new())?])?;
        self.mux.write_all(&self.dir.join(&def_file_name(&def.id)), &bytes)?;
        log::debug!("added index definition {} ({})", def.id, def.rule);
        Ok(def)
    }

    pub fn lookup(&self, id: &Ksuid) -> StrataResult<Definition> {
        let bytes = self
            .mux
            .read_all(&self.dir.join(&def_file_name(id)))
            .map_err(|e| {
                if e.is_not_found() {
                    strata_err!(NotFound: "no index definition {id}")
                } else {
                    e
                }
            })?;
        let vals = strata_zng::read_all(&TypeContext::new(), &bytes)?;
        match vals.first() {
            Some(val) => Definition::from_value(val),
            None => strata_bail!(Corruption: "empty index definition file for {id}"),
        }
    }

    /// Remove a definition, returning it. Index files already built are left in place.
    pub fn delete(&self, id: &Ksuid) -> StrataResult<Definition> {
        let def = self.lookup(id)?;
        self.mux.remove(&self.dir.join(&def_file_name(id)))?;
        Ok(def)
    }

    /// Every definition, oldest first.
    pub fn list(&self) -> StrataResult<Vec<Definition>> {
        let entries = match self.mux.read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut ids: Vec<Ksuid> = entries
            .iter()
            .filter(|e| !e.is_dir)
            .filter_map(|e| def_file_match(&e.name))
            .collect();
        ids.sort();
        ids.iter().map(|id| self.lookup(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use strata_error::ErrorKind;
    use strata_lake::CreateOptions;
    use strata_value::PrimitiveType;

    use super::*;

    fn archive() -> (tempfile::TempDir, Archive) {
        let dir = tempfile::tempdir().unwrap();
        let root = Uri::from_path(dir.path()).unwrap();
        let ark = Archive::create_or_open(&Mux::default(), &root, &CreateOptions::default(), &Default::default()).unwrap();
        (dir, ark)
    }

    #[test]
    fn add_lookup_list_delete() {
        let (_dir, ark) = archive();
        let store = DefinitionStore::new(&ark);
        assert!(store.list().unwrap().is_empty());

        let a = store.add(Rule::new_type(PrimitiveType::Int64)).unwrap();
        let b = store.add(Rule::new_field("uid")).unwrap();
        assert_eq!(store.lookup(&a.id).unwrap(), a);
        let ids: Vec<Ksuid> = store.list().unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.id) && ids.contains(&b.id));

        let err = store.add(Rule::new_field("uid")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exists);

        assert_eq!(store.delete(&b.id).unwrap().rule, Rule::new_field("uid"));
        assert_eq!(store.lookup(&b.id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.list().unwrap(), vec![a]);
    }
}
