use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use strata_error::{ErrorKind, StrataResult, strata_bail, strata_err};
use strata_io::{DirMaker, Mux, Source, Uri};
use strata_lake::{Archive, CreateOptions, METADATA_FILENAME, OpenOptions};

pub const MAIN_BRANCH: &str = "main";

/// A directory of named pools. Each pool is an archive at `<root>/<pool>` whose `main` branch
/// is the archive itself.
#[derive(Clone)]
pub struct Lake {
    root: Uri,
    mux: Mux,
    open_options: OpenOptions,
    pools: Arc<Mutex<FxHashMap<String, Archive>>>,
}

fn check_pool_name(name: &str) -> StrataResult<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        strata_bail!(Invalid: "invalid pool name '{name}'");
    }
    Ok(())
}

impl Lake {
    /// Open the lake at `root`, creating the directory if needed.
    pub fn open(mux: &Mux, root: &Uri, open_options: OpenOptions) -> StrataResult<Self> {
        mux.mkdir_all(root, 0o755)?;
        Ok(Self {
            root: root.clone(),
            mux: mux.clone(),
            open_options,
            pools: Arc::default(),
        })
    }

    pub fn root(&self) -> &Uri {
        &self.root
    }

    pub fn mux(&self) -> &Mux {
        &self.mux
    }

    fn pool_root(&self, name: &str) -> StrataResult<Uri> {
        check_pool_name(name)?;
        Ok(self.root.join(name))
    }

    pub fn create_pool(&self, name: &str, opts: &CreateOptions) -> StrataResult<Archive> {
        let root = self.pool_root(name)?;
        Archive::create(&self.mux, &root, opts).map_err(|e| {
            if e.kind() == ErrorKind::Exists {
                strata_err!(Exists: "pool {name} already exists")
            } else {
                e
            }
        })?;
        log::debug!("created pool {name}");
        self.open_pool(name)
    }

    /// Open a pool. Handles are shared so the pool's file cache is too.
    pub fn open_pool(&self, name: &str) -> StrataResult<Archive> {
        if let Some(ark) = self.pools.lock().get(name) {
            return Ok(ark.clone());
        }
        let root = self.pool_root(name)?;
        let ark = Archive::open(&self.mux, &root, &self.open_options).map_err(|e| {
            if e.is_not_found() {
                strata_err!(NotFound: "pool {name} not found")
            } else {
                e
            }
        })?;
        self.pools.lock().insert(name.to_string(), ark.clone());
        Ok(ark)
    }

    /// The archive behind `pool@branch`. Pools have a single `main` branch.
    pub fn open_branch(&self, pool: &str, branch: &str) -> StrataResult<Archive> {
        if branch != MAIN_BRANCH {
            strata_bail!(NotFound: "branch {branch} not found in pool {pool}");
        }
        self.open_pool(pool)
    }

    /// Names of the pools, sorted.
    pub fn pools(&self) -> StrataResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.mux.read_dir(&self.root)? {
            if entry.is_dir && self.mux.exists(&self.root.join(&entry.name).join(METADATA_FILENAME))? {
                names.push(entry.name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn remove_pool(&self, name: &str) -> StrataResult<()> {
        let root = self.pool_root(name)?;
        if !self.mux.exists(&root.join(METADATA_FILENAME))? {
            strata_bail!(NotFound: "pool {name} not found");
        }
        self.pools.lock().remove(name);
        self.mux.remove_all(&root)?;
        log::debug!("removed pool {name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_are_created_listed_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let lake = Lake::open(
            &Mux::default(),
            &Uri::from_path(dir.path()).unwrap(),
            OpenOptions::default(),
        )
        .unwrap();
        lake.create_pool("logs", &CreateOptions::default()).unwrap();
        lake.create_pool("alerts", &CreateOptions::default()).unwrap();
        assert_eq!(lake.pools().unwrap(), vec!["alerts", "logs"]);

        let err = lake.create_pool("logs", &CreateOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exists);
        assert_eq!(
            lake.open_branch("logs", "dev").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            lake.create_pool("a/b", &CreateOptions::default()).unwrap_err().kind(),
            ErrorKind::Invalid
        );

        lake.remove_pool("logs").unwrap();
        assert_eq!(lake.pools().unwrap(), vec!["alerts"]);
        assert!(lake.open_pool("logs").unwrap_err().is_not_found());
    }
}
