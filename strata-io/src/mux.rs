use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use strata_error::{StrataResult, strata_err};

use crate::file::FileSource;
use crate::object_store::ObjectStoreSource;
use crate::stdio::StdioSource;
use crate::{
    DirEntry, DirMaker, FILE_SCHEME, Info, Reader, Replacement, Replacer, STDIO_SCHEME, Source,
    Uri, Writer,
};

/// Routes each [`Uri`] to the [`Source`] registered for its scheme.
///
/// The default mux serves `file` and `stdio`. Object stores are added with
/// [`Mux::with_object_store`].
#[derive(Clone)]
pub struct Mux {
    sources: HashMap<String, Arc<dyn Source>>,
}

impl Default for Mux {
    fn default() -> Self {
        let mut sources: HashMap<String, Arc<dyn Source>> = HashMap::new();
        sources.insert(FILE_SCHEME.to_string(), Arc::new(FileSource));
        sources.insert(STDIO_SCHEME.to_string(), Arc::new(StdioSource));
        Self { sources }
    }
}

impl Mux {
    pub fn with_source(mut self, scheme: &str, source: Arc<dyn Source>) -> Self {
        self.sources.insert(scheme.to_string(), source);
        self
    }

    /// Serve `s3`, `http` and `https` from one shared object-store source.
    pub fn with_object_store(self, source: Arc<ObjectStoreSource>) -> Self {
        let mut mux = self;
        for scheme in ["s3", "http", "https"] {
            mux = mux.with_source(scheme, source.clone());
        }
        mux
    }

    fn lookup(&self, uri: &Uri) -> StrataResult<&Arc<dyn Source>> {
        self.sources
            .get(uri.scheme())
            .ok_or_else(|| strata_err!(NotFound: "unknown scheme: {}", uri.scheme()))
    }

    /// Read a whole object into memory.
    pub fn read_all(&self, uri: &Uri) -> StrataResult<Bytes> {
        let mut buf = Vec::new();
        self.open_reader(uri)?.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Write a whole object.
    pub fn write_all(&self, uri: &Uri, bytes: &[u8]) -> StrataResult<()> {
        let mut w = self.open_writer(uri)?;
        w.write_all(bytes)?;
        w.close()
    }

    /// Atomically replace the object at `uri` with `bytes`.
    pub fn replace_all(&self, uri: &Uri, bytes: &[u8]) -> StrataResult<()> {
        let mut r = self.open_replacer(uri)?;
        if let Err(err) = r.write_all(bytes) {
            r.abort()?;
            return Err(err.into());
        }
        r.commit()
    }
}

impl Source for Mux {
    fn open_reader(&self, uri: &Uri) -> StrataResult<Box<dyn Reader>> {
        self.lookup(uri)?.open_reader(uri)
    }

    fn open_writer(&self, uri: &Uri) -> StrataResult<Box<dyn Writer>> {
        self.lookup(uri)?.open_writer(uri)
    }

    fn remove(&self, uri: &Uri) -> StrataResult<()> {
        self.lookup(uri)?.remove(uri)
    }

    fn remove_all(&self, uri: &Uri) -> StrataResult<()> {
        self.lookup(uri)?.remove_all(uri)
    }

    fn exists(&self, uri: &Uri) -> StrataResult<bool> {
        self.lookup(uri)?.exists(uri)
    }

    fn stat(&self, uri: &Uri) -> StrataResult<Info> {
        self.lookup(uri)?.stat(uri)
    }

    fn read_dir(&self, uri: &Uri) -> StrataResult<Vec<DirEntry>> {
        self.lookup(uri)?.read_dir(uri)
    }

    fn as_dir_maker(&self) -> Option<&dyn DirMaker> {
        Some(self)
    }

    fn as_replacer(&self) -> Option<&dyn Replacer> {
        Some(self)
    }
}

impl DirMaker for Mux {
    /// Object stores have no directories, so this is a no-op for them.
    fn mkdir_all(&self, uri: &Uri, mode: u32) -> StrataResult<()> {
        match self.lookup(uri)?.as_dir_maker() {
            Some(maker) => maker.mkdir_all(uri, mode),
            None => Ok(()),
        }
    }
}

impl Replacer for Mux {
    /// Sources without atomic replace get a plain writer that commits on close.
    fn open_replacer(&self, uri: &Uri) -> StrataResult<Box<dyn Replacement>> {
        let source = self.lookup(uri)?;
        match source.as_replacer() {
            Some(replacer) => replacer.open_replacer(uri),
            None => Ok(Box::new(WriterReplacement(source.open_writer(uri)?))),
        }
    }
}

struct WriterReplacement(Box<dyn Writer>);

impl Write for WriterReplacement {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl Replacement for WriterReplacement {
    fn commit(self: Box<Self>) -> StrataResult<()> {
        self.0.close()
    }

    fn abort(self: Box<Self>) -> StrataResult<()> {
        self.0.close()
    }
}
