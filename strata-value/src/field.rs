use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// An ordered sequence of field names. The empty path is `this`, the whole value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn this() -> Self {
        Self(Vec::new())
    }

    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    /// Split a dotted path such as `id.orig_h`. `this` and the empty string are the root.
    pub fn dotted(s: &str) -> Self {
        if s.is_empty() || s == "this" {
            return Self::this();
        }
        Self(s.split('.').map(str::to_string).collect())
    }

    pub fn is_this(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The path without its leaf.
    pub fn parent(&self) -> FieldPath {
        match self.0.split_last() {
            Some((_, rest)) => FieldPath(rest.to_vec()),
            None => FieldPath::this(),
        }
    }

    pub fn child(&self, name: impl Into<String>) -> FieldPath {
        let mut parts = self.0.clone();
        parts.push(name.into());
        FieldPath(parts)
    }

    pub fn has_prefix(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("this")
        } else {
            f.write_str(&self.0.join("."))
        }
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        FieldPath::dotted(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_paths() {
        let p = FieldPath::dotted("id.orig_h");
        assert_eq!(p.len(), 2);
        assert_eq!(p.leaf(), Some("orig_h"));
        assert_eq!(p.parent(), FieldPath::dotted("id"));
        assert_eq!(p.to_string(), "id.orig_h");
        assert!(FieldPath::dotted("this").is_this());
        assert_eq!(FieldPath::this().to_string(), "this");
        assert!(p.has_prefix(&FieldPath::dotted("id")));
    }
}
