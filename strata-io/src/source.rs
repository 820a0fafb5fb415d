use std::io::{Read, Seek, Write};

use jiff::Timestamp;
use strata_error::StrataResult;

use crate::Uri;

/// A readable, seekable byte stream.
pub trait Reader: Read + Seek + Send {}

impl<T: Read + Seek + Send> Reader for T {}

/// A writable byte stream that must be closed to make its contents durable.
pub trait Writer: Write + Send {
    /// Flush and close the stream, surfacing any deferred error.
    fn close(self: Box<Self>) -> StrataResult<()>;
}

/// The size and modification time of a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Info {
    pub size: u64,
    pub mtime: Option<Timestamp>,
    pub is_dir: bool,
}

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// A storage backend addressed by [`Uri`].
///
/// Implementations report missing objects with a not-found error so callers can use
/// [`strata_error::StrataError::is_not_found`] uniformly across schemes.
pub trait Source: Send + Sync {
    fn open_reader(&self, uri: &Uri) -> StrataResult<Box<dyn Reader>>;

    fn open_writer(&self, uri: &Uri) -> StrataResult<Box<dyn Writer>>;

    fn remove(&self, uri: &Uri) -> StrataResult<()>;

    fn remove_all(&self, uri: &Uri) -> StrataResult<()>;

    fn exists(&self, uri: &Uri) -> StrataResult<bool>;

    fn stat(&self, uri: &Uri) -> StrataResult<Info>;

    fn read_dir(&self, uri: &Uri) -> StrataResult<Vec<DirEntry>>;

    /// The directory-creation capability, if this source has directories.
    fn as_dir_maker(&self) -> Option<&dyn DirMaker> {
        None
    }

    /// The atomic-replace capability, if this source supports it.
    fn as_replacer(&self) -> Option<&dyn Replacer> {
        None
    }
}

/// Sources with real directories.
pub trait DirMaker {
    fn mkdir_all(&self, uri: &Uri, mode: u32) -> StrataResult<()>;
}

/// Sources that can replace an object so concurrent readers see either the old or the new
/// bytes, never a mix.
pub trait Replacer {
    fn open_replacer(&self, uri: &Uri) -> StrataResult<Box<dyn Replacement>>;
}

/// An in-flight replacement: write the new contents, then commit or abort.
pub trait Replacement: Write + Send {
    fn commit(self: Box<Self>) -> StrataResult<()>;

    fn abort(self: Box<Self>) -> StrataResult<()>;
}
