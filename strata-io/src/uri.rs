use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::{env, fmt};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strata_error::{StrataResult, strata_bail, strata_err};

static SCHEMED: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z][A-Za-z0-9+\-.]*://").unwrap()
});

static WINDOWS_DRIVE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z]:[\\/]").unwrap()
});

/// Bytes escaped when a path is written out as part of a URI.
const PATH_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// The scheme of local files.
pub const FILE_SCHEME: &str = "file";
/// The scheme of the process's standard streams.
pub const STDIO_SCHEME: &str = "stdio";

/// A resource location: `scheme://host/path`.
///
/// Bare paths parse as `file` URIs made absolute against the working directory, and the names
/// `stdin`, `stdout` and `stderr` parse as `stdio:///stdin` and friends.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri {
    scheme: String,
    host: String,
    path: String,
}

impl Uri {
    /// Parse a URI, a local path, a UNC path or one of the standard stream names.
    pub fn parse(s: &str) -> StrataResult<Self> {
        if s.is_empty() {
            strata_bail!(Invalid: "empty URI");
        }
        if matches!(s, "stdin" | "stdout" | "stderr") {
            return Ok(Self::new(STDIO_SCHEME, "", format!("/{s}")));
        }
        if SCHEMED.is_match(s) {
            let url = url::Url::parse(s)
                .map_err(|e| strata_err!(Invalid: "invalid URI {s}: {e}"))?;
            // Paths are held decoded and escaped again on display.
            let path = match percent_decode_str(url.path()).decode_utf8() {
                Ok(p) if p.is_empty() => "/".to_string(),
                Ok(p) => p.into_owned(),
                Err(e) => strata_bail!(Invalid: "invalid URI path in {s}: {e}"),
            };
            return Ok(Self::new(url.scheme(), url.host_str().unwrap_or(""), path));
        }
        if let Some(rest) = s.strip_prefix(r"\\") {
            // UNC path: \\server\share\dir
            let rest = rest.replace('\\', "/");
            let (host, path) = rest.split_once('/').unwrap_or((rest.as_str(), ""));
            return Ok(Self::new(FILE_SCHEME, host, format!("/{path}")));
        }
        if WINDOWS_DRIVE.is_match(s) {
            return Ok(Self::new(FILE_SCHEME, "", format!("/{}", s.replace('\\', "/"))));
        }
        Self::from_path(Path::new(s))
    }

    /// Build a `file` URI from a local path, made absolute against the working directory.
    pub fn from_path(path: &Path) -> StrataResult<Self> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir()?.join(path)
        };
        let path = path
            .to_str()
            .ok_or_else(|| strata_err!(Invalid: "path is not valid UTF-8"))?
            .replace('\\', "/");
        let path = if WINDOWS_DRIVE.is_match(&path) {
            format!("/{path}")
        } else {
            path
        };
        Ok(Self::new(FILE_SCHEME, "", path))
    }

    fn new(scheme: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            path: path.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The last element of the path.
    pub fn base(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// The local file path of a `file` URI. Windows drive letters lose their leading slash.
    pub fn filepath(&self) -> PathBuf {
        let bytes = self.path.as_bytes();
        let path = if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' {
            &self.path[1..]
        } else {
            self.path.as_str()
        };
        if self.host.is_empty() {
            PathBuf::from(path)
        } else {
            PathBuf::from(format!("//{}{}", self.host, path))
        }
    }

    /// Join path elements onto this URI.
    pub fn join(&self, elem: &str) -> Uri {
        let mut path = self.path.trim_end_matches('/').to_string();
        for part in elem.split('/').filter(|p| !p.is_empty() && *p != ".") {
            path.push('/');
            path.push_str(part);
        }
        if path.is_empty() {
            path.push('/');
        }
        Uri::new(self.scheme.clone(), self.host.clone(), path)
    }

    /// The URI of the containing directory.
    pub fn parent(&self) -> Uri {
        let trimmed = self.path.trim_end_matches('/');
        let path = match trimmed.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => trimmed[..idx].to_string(),
        };
        Uri::new(self.scheme.clone(), self.host.clone(), path)
    }

    /// The path of `target` relative to this URI, or the full URI string if `target` does not
    /// live underneath it.
    pub fn rel_path(&self, target: &Uri) -> String {
        if self.scheme == target.scheme && self.host == target.host {
            let prefix = format!("{}/", self.path.trim_end_matches('/'));
            if let Some(rel) = target.path.strip_prefix(&prefix) {
                return rel.to_string();
            }
        }
        target.to_string()
    }

    /// Whether this is a `file` URI.
    pub fn is_local(&self) -> bool {
        self.scheme == FILE_SCHEME
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.scheme,
            self.host,
            utf8_percent_encode(&self.path, PATH_ESCAPES)
        )
    }
}

impl std::str::FromStr for Uri {
    type Err = strata_error::StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uri::parse(s)
    }
}

impl Serialize for Uri {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uri::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("stdin", "stdio:///stdin")]
    #[case("stderr", "stdio:///stderr")]
    #[case("s3://bucket/some/key", "s3://bucket/some/key")]
    #[case("file:///tmp/x", "file:///tmp/x")]
    #[case("/tmp/lake", "file:///tmp/lake")]
    #[case(r"C:\data\lake", "file:///C:/data/lake")]
    #[case(r"\\server\share\lake", "file://server/share/lake")]
    fn parse_forms(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(Uri::parse(input).unwrap().to_string(), expected);
    }

    #[rstest]
    #[case("/tmp/my lake", "file:///tmp/my%20lake")]
    #[case("/tmp/100%/a#b", "file:///tmp/100%25/a%23b")]
    #[case("/tmp/caf\u{e9}", "file:///tmp/caf%C3%A9")]
    fn escaped_paths_round_trip(#[case] path: &str, #[case] expected: &str) {
        let uri = Uri::from_path(Path::new(path)).unwrap();
        assert_eq!(uri.path(), path);
        let text = uri.to_string();
        assert_eq!(text, expected);
        let back = Uri::parse(&text).unwrap();
        assert_eq!(back, uri);
        assert_eq!(back.filepath(), PathBuf::from(path));
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(serde_json::from_str::<Uri>(&json).unwrap(), uri);
    }

    #[test]
    fn relative_paths_become_absolute() {
        let uri = Uri::parse("some/dir").unwrap();
        assert_eq!(uri.scheme(), "file");
        assert!(uri.filepath().is_absolute());
        assert!(uri.path().ends_with("/some/dir"));
    }

    #[test]
    fn windows_filepath_round_trips() {
        let uri = Uri::parse(r"C:\data\lake").unwrap();
        assert_eq!(uri.filepath(), PathBuf::from("C:/data/lake"));
    }

    #[test]
    fn join_and_parent() {
        let root = Uri::parse("s3://bucket/lake").unwrap();
        let chunk = root.join("zd/20170803/d-x.zng");
        assert_eq!(chunk.to_string(), "s3://bucket/lake/zd/20170803/d-x.zng");
        assert_eq!(chunk.base(), "d-x.zng");
        assert_eq!(chunk.parent().to_string(), "s3://bucket/lake/zd/20170803");
        assert_eq!(root.rel_path(&chunk), "zd/20170803/d-x.zng");
        assert_eq!(root.join(".").to_string(), root.to_string());
    }

    #[test]
    fn not_a_scheme() {
        // a colon without "//" is a path, not a scheme
        let uri = Uri::parse("/tmp/a:b").unwrap();
        assert_eq!(uri.scheme(), "file");
        assert_eq!(uri.path(), "/tmp/a:b");
    }
}
