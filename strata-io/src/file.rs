use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use jiff::Timestamp;
use strata_error::{StrataResult, strata_err};
use tempfile::NamedTempFile;

use crate::{DirEntry, DirMaker, Info, Reader, Replacement, Replacer, Source, Uri, Writer};

/// The local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSource;

fn not_found(uri: &Uri, err: io::Error) -> strata_error::StrataError {
    if err.kind() == io::ErrorKind::NotFound {
        strata_err!(NotFound: "{uri}: file does not exist")
    } else {
        err.into()
    }
}

impl Source for FileSource {
    fn open_reader(&self, uri: &Uri) -> StrataResult<Box<dyn Reader>> {
        let file = File::open(uri.filepath()).map_err(|e| not_found(uri, e))?;
        Ok(Box::new(file))
    }

    fn open_writer(&self, uri: &Uri) -> StrataResult<Box<dyn Writer>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(uri.filepath())
            .map_err(|e| not_found(uri, e))?;
        Ok(Box::new(FileWriter(BufWriter::new(file))))
    }

    fn remove(&self, uri: &Uri) -> StrataResult<()> {
        fs::remove_file(uri.filepath()).map_err(|e| not_found(uri, e))
    }

    fn remove_all(&self, uri: &Uri) -> StrataResult<()> {
        let path = uri.filepath();
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path)?,
            Ok(_) => fs::remove_file(&path)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn exists(&self, uri: &Uri) -> StrataResult<bool> {
        Ok(fs::exists(uri.filepath())?)
    }

    fn stat(&self, uri: &Uri) -> StrataResult<Info> {
        let meta = fs::metadata(uri.filepath()).map_err(|e| not_found(uri, e))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| Timestamp::try_from(t).ok());
        Ok(Info {
            size: meta.len(),
            mtime,
            is_dir: meta.is_dir(),
        })
    }

    fn read_dir(&self, uri: &Uri) -> StrataResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(uri.filepath()).map_err(|e| not_found(uri, e))? {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn as_dir_maker(&self) -> Option<&dyn DirMaker> {
        Some(self)
    }

    fn as_replacer(&self) -> Option<&dyn Replacer> {
        Some(self)
    }
}

impl DirMaker for FileSource {
    #[allow(unused_variables)]
    fn mkdir_all(&self, uri: &Uri, mode: u32) -> StrataResult<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        Ok(builder.create(uri.filepath())?)
    }
}

impl Replacer for FileSource {
    fn open_replacer(&self, uri: &Uri) -> StrataResult<Box<dyn Replacement>> {
        let path = uri.filepath();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir).map_err(|e| not_found(uri, e))?;
        Ok(Box::new(FileReplacement {
            temp: BufWriter::new(temp),
            target: uri.clone(),
        }))
    }
}

struct FileWriter(BufWriter<File>);

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Writer for FileWriter {
    fn close(self: Box<Self>) -> StrataResult<()> {
        let file = self.0.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

/// A temp file next to the target, renamed over it on commit.
struct FileReplacement {
    temp: BufWriter<NamedTempFile>,
    target: Uri,
}

impl Write for FileReplacement {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

impl Replacement for FileReplacement {
    fn commit(self: Box<Self>) -> StrataResult<()> {
        let temp = self.temp.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(self.target.filepath())
            .map_err(|e| e.error)?;
        Ok(())
    }

    fn abort(self: Box<Self>) -> StrataResult<()> {
        let temp = self.temp.into_inner().map_err(|e| e.into_error())?;
        Ok(temp.close()?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn uri(dir: &tempfile::TempDir, name: &str) -> Uri {
        Uri::from_path(&dir.path().join(name)).unwrap()
    }

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let target = uri(&dir, "a.txt");
        let mut w = FileSource.open_writer(&target).unwrap();
        w.write_all(b"hello").unwrap();
        w.close().unwrap();

        let mut out = String::new();
        FileSource
            .open_reader(&target)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "hello");
        assert_eq!(FileSource.stat(&target).unwrap().size, 5);

        FileSource.remove(&target).unwrap();
        assert!(FileSource.remove(&target).unwrap_err().is_not_found());
        assert!(!FileSource.exists(&target).unwrap());
    }

    #[test]
    fn replace_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let target = uri(&dir, "zar.json");
        fs::write(target.filepath(), b"old").unwrap();

        let mut r = FileSource.open_replacer(&target).unwrap();
        r.write_all(b"new contents").unwrap();
        assert_eq!(fs::read(target.filepath()).unwrap(), b"old");
        r.commit().unwrap();
        assert_eq!(fs::read(target.filepath()).unwrap(), b"new contents");

        let mut r = FileSource.open_replacer(&target).unwrap();
        r.write_all(b"discarded").unwrap();
        r.abort().unwrap();
        assert_eq!(fs::read(target.filepath()).unwrap(), b"new contents");
        assert_eq!(FileSource.read_dir(&uri(&dir, "")).unwrap().len(), 1);
    }

    #[test]
    fn mkdir_and_remove_all() {
        let dir = tempfile::tempdir().unwrap();
        let nested = uri(&dir, "zd/20170803");
        FileSource.mkdir_all(&nested, 0o755).unwrap();
        assert!(FileSource.stat(&nested).unwrap().is_dir);
        FileSource.remove_all(&uri(&dir, "zd")).unwrap();
        FileSource.remove_all(&uri(&dir, "zd")).unwrap();
        assert!(!FileSource.exists(&nested).unwrap());
    }
}
