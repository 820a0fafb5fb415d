use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use jiff::Timestamp;
use object_store::aws::AmazonS3Builder;
use object_store::http::HttpBuilder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use parking_lot::Mutex;
use strata_error::{StrataResult, strata_bail};

use crate::dispatcher::IoDispatcher;
use crate::{DirEntry, Info, Reader, Replacement, Replacer, Source, Uri, Writer};

const READ_AHEAD: u64 = 4 * 1024 * 1024;

/// A [`Source`] backed by `object_store`, serving `s3`, `http` and `https` URIs.
///
/// Object stores are created per `(scheme, host)` on first use. A put is atomic, so a
/// replacement is a buffered write.
pub struct ObjectStoreSource {
    dispatcher: Arc<IoDispatcher>,
    stores: Mutex<HashMap<(String, String), Arc<dyn ObjectStore>>>,
}

impl ObjectStoreSource {
    pub fn new() -> StrataResult<Self> {
        Ok(Self {
            dispatcher: Arc::new(IoDispatcher::new()?),
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// Serve `scheme://host/...` from an existing store.
    pub fn register(&self, scheme: &str, host: &str, store: Arc<dyn ObjectStore>) {
        self.stores
            .lock()
            .insert((scheme.to_string(), host.to_string()), store);
    }

    fn store(&self, uri: &Uri) -> StrataResult<Arc<dyn ObjectStore>> {
        let key = (uri.scheme().to_string(), uri.host().to_string());
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }
        let store: Arc<dyn ObjectStore> = match uri.scheme() {
            "s3" => Arc::new(
                AmazonS3Builder::from_env()
                    .with_bucket_name(uri.host())
                    .build()?,
            ),
            "http" | "https" => Arc::new(
                HttpBuilder::new()
                    .with_url(format!("{}://{}", uri.scheme(), uri.host()))
                    .build()?,
            ),
            other => strata_bail!(NotFound: "unknown scheme: {other}"),
        };
        log::debug!("created object store for {}://{}", uri.scheme(), uri.host());
        stores.insert(key, store.clone());
        Ok(store)
    }

    fn location(uri: &Uri) -> Path {
        Path::from(uri.path().trim_start_matches('/'))
    }

    fn head(&self, uri: &Uri) -> StrataResult<object_store::ObjectMeta> {
        let store = self.store(uri)?;
        let location = Self::location(uri);
        Ok(self
            .dispatcher
            .block_on(move || async move { store.head(&location).await })??)
    }

    fn list(&self, uri: &Uri) -> StrataResult<object_store::ListResult> {
        let store = self.store(uri)?;
        let prefix = Self::location(uri);
        Ok(self.dispatcher.block_on(move || async move {
            store.list_with_delimiter(Some(&prefix)).await
        })??)
    }

    fn delete(&self, uri: &Uri, location: Path) -> StrataResult<()> {
        let store = self.store(uri)?;
        self.dispatcher
            .block_on(move || async move { store.delete(&location).await })??;
        Ok(())
    }
}

impl Source for ObjectStoreSource {
    fn open_reader(&self, uri: &Uri) -> StrataResult<Box<dyn Reader>> {
        let size = self.head(uri)?.size;
        Ok(Box::new(ObjectReader {
            store: self.store(uri)?,
            dispatcher: self.dispatcher.clone(),
            location: Self::location(uri),
            size,
            pos: 0,
            buf: Bytes::new(),
            buf_start: 0,
        }))
    }

    fn open_writer(&self, uri: &Uri) -> StrataResult<Box<dyn Writer>> {
        Ok(self.writer(uri)?)
    }

    fn remove(&self, uri: &Uri) -> StrataResult<()> {
        self.delete(uri, Self::location(uri))
    }

    fn remove_all(&self, uri: &Uri) -> StrataResult<()> {
        let listing = self.list(uri)?;
        for object in listing.objects {
            self.delete(uri, object.location)?;
        }
        for prefix in listing.common_prefixes {
            self.remove_all(&uri.join(prefix.filename().unwrap_or("")))?;
        }
        match self.remove(uri) {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    fn exists(&self, uri: &Uri) -> StrataResult<bool> {
        match self.head(uri) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn stat(&self, uri: &Uri) -> StrataResult<Info> {
        let meta = self.head(uri)?;
        Ok(Info {
            size: meta.size,
            mtime: Timestamp::from_second(meta.last_modified.timestamp()).ok(),
            is_dir: false,
        })
    }

    fn read_dir(&self, uri: &Uri) -> StrataResult<Vec<DirEntry>> {
        let listing = self.list(uri)?;
        let mut entries: Vec<DirEntry> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename())
            .map(|name| DirEntry {
                name: name.to_string(),
                is_dir: true,
                size: 0,
            })
            .chain(listing.objects.iter().filter_map(|o| {
                o.location.filename().map(|name| DirEntry {
                    name: name.to_string(),
                    is_dir: false,
                    size: o.size,
                })
            }))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn as_replacer(&self) -> Option<&dyn Replacer> {
        Some(self)
    }
}

impl Replacer for ObjectStoreSource {
    fn open_replacer(&self, uri: &Uri) -> StrataResult<Box<dyn Replacement>> {
        Ok(self.writer(uri)?)
    }
}

impl ObjectStoreSource {
    fn writer(&self, uri: &Uri) -> StrataResult<Box<ObjectWriter>> {
        Ok(Box::new(ObjectWriter {
            store: self.store(uri)?,
            dispatcher: self.dispatcher.clone(),
            location: Self::location(uri),
            buf: Vec::new(),
        }))
    }
}

struct ObjectReader {
    store: Arc<dyn ObjectStore>,
    dispatcher: Arc<IoDispatcher>,
    location: Path,
    size: u64,
    pos: u64,
    buf: Bytes,
    buf_start: u64,
}

impl ObjectReader {
    fn fill(&mut self) -> StrataResult<()> {
        let range: Range<u64> = self.pos..(self.pos + READ_AHEAD).min(self.size);
        let store = self.store.clone();
        let location = self.location.clone();
        self.buf = self
            .dispatcher
            .block_on(move || async move { store.get_range(&location, range).await })??;
        self.buf_start = self.pos;
        Ok(())
    }
}

impl Read for ObjectReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || out.is_empty() {
            return Ok(0);
        }
        let buf_end = self.buf_start + self.buf.len() as u64;
        if self.pos < self.buf_start || self.pos >= buf_end {
            self.fill().map_err(io::Error::other)?;
        }
        let offset = usize::try_from(self.pos - self.buf_start).map_err(io::Error::other)?;
        let available = &self.buf[offset..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ObjectReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of object")
        })?;
        Ok(self.pos)
    }
}

struct ObjectWriter {
    store: Arc<dyn ObjectStore>,
    dispatcher: Arc<IoDispatcher>,
    location: Path,
    buf: Vec<u8>,
}

impl ObjectWriter {
    fn finish(self) -> StrataResult<()> {
        let ObjectWriter {
            store,
            dispatcher,
            location,
            buf,
        } = self;
        dispatcher.block_on(move || async move {
            store.put(&location, PutPayload::from(buf)).await
        })??;
        Ok(())
    }
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Writer for ObjectWriter {
    fn close(self: Box<Self>) -> StrataResult<()> {
        self.finish()
    }
}

impl Replacement for ObjectWriter {
    fn commit(self: Box<Self>) -> StrataResult<()> {
        self.finish()
    }

    fn abort(self: Box<Self>) -> StrataResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    fn source() -> ObjectStoreSource {
        let source = ObjectStoreSource::new().unwrap();
        source.register("s3", "bucket", Arc::new(InMemory::new()));
        source
    }

    #[test]
    fn put_get_list_delete() {
        let source = source();
        let uri = Uri::parse("s3://bucket/lake/zd/20170803/d-a.zng").unwrap();
        let mut w = source.open_writer(&uri).unwrap();
        w.write_all(b"0123456789").unwrap();
        w.close().unwrap();

        let mut r = source.open_reader(&uri).unwrap();
        r.seek(SeekFrom::Start(4)).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"456789");

        let dir = Uri::parse("s3://bucket/lake/zd").unwrap();
        let entries = source.read_dir(&dir).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].name, "20170803");

        source
            .remove_all(&Uri::parse("s3://bucket/lake").unwrap())
            .unwrap();
        assert!(!source.exists(&uri).unwrap());
        assert!(source.open_reader(&uri).err().unwrap().is_not_found());
    }

    #[test]
    fn unknown_scheme_is_not_found() {
        let source = source();
        let uri = Uri::parse("gopher://host/x").unwrap();
        assert!(source.stat(&uri).unwrap_err().is_not_found());
    }
}
