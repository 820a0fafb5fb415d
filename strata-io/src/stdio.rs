use std::io::{self, Read, Seek, SeekFrom, Write};

use strata_error::{StrataResult, strata_bail};

use crate::{DirEntry, Info, Reader, Source, Uri, Writer};

/// The process's standard streams, addressed as `stdio:///stdin`, `stdio:///stdout` and
/// `stdio:///stderr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioSource;

impl Source for StdioSource {
    fn open_reader(&self, uri: &Uri) -> StrataResult<Box<dyn Reader>> {
        match uri.path() {
            "/stdin" => Ok(Box::new(Stdin(io::stdin()))),
            _ => strata_bail!(NotSupported: "{uri}: cannot read"),
        }
    }

    fn open_writer(&self, uri: &Uri) -> StrataResult<Box<dyn Writer>> {
        match uri.path() {
            "/stdout" => Ok(Box::new(Stdout(io::stdout()))),
            "/stderr" => Ok(Box::new(Stderr(io::stderr()))),
            _ => strata_bail!(NotSupported: "{uri}: cannot write"),
        }
    }

    fn remove(&self, uri: &Uri) -> StrataResult<()> {
        strata_bail!(NotSupported: "{uri}: method not supported")
    }

    fn remove_all(&self, uri: &Uri) -> StrataResult<()> {
        strata_bail!(NotSupported: "{uri}: method not supported")
    }

    fn exists(&self, uri: &Uri) -> StrataResult<bool> {
        strata_bail!(NotSupported: "{uri}: method not supported")
    }

    fn stat(&self, uri: &Uri) -> StrataResult<Info> {
        strata_bail!(NotSupported: "{uri}: method not supported")
    }

    fn read_dir(&self, uri: &Uri) -> StrataResult<Vec<DirEntry>> {
        strata_bail!(NotSupported: "{uri}: method not supported")
    }
}

struct Stdin(io::Stdin);

impl Read for Stdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Seek for Stdin {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(0),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stdin is not seekable",
            )),
        }
    }
}

macro_rules! std_writer {
    ($name:ident, $inner:ty) => {
        struct $name($inner);

        impl Write for $name {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.write(buf)
            }

            fn flush(&mut self) -> io::Result<()> {
                self.0.flush()
            }
        }

        impl Writer for $name {
            fn close(mut self: Box<Self>) -> StrataResult<()> {
                Ok(self.0.flush()?)
            }
        }
    };
}

std_writer!(Stdout, io::Stdout);
std_writer!(Stderr, io::Stderr);

#[cfg(test)]
mod tests {
    use strata_error::ErrorKind;

    use super::*;

    #[test]
    fn unsupported_methods() {
        let stdin = Uri::parse("stdin").unwrap();
        let stdout = Uri::parse("stdout").unwrap();
        assert_eq!(
            StdioSource.remove(&stdin).unwrap_err().kind(),
            ErrorKind::NotSupported
        );
        assert_eq!(
            StdioSource.open_writer(&stdin).err().unwrap().kind(),
            ErrorKind::NotSupported
        );
        assert_eq!(
            StdioSource.open_reader(&stdout).err().unwrap().kind(),
            ErrorKind::NotSupported
        );
        assert!(StdioSource.open_writer(&stdout).is_ok());
    }
}
