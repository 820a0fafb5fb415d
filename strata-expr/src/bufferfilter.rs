//! Byte-level prefilters over raw record frames.
//!
//! A [`BufferFilter`] is derived from a filter expression and run against the uncompressed
//! bytes of a values frame before any record in it is decoded. A `false` result means no
//! record in the frame can match; `true` only means the frame has to be decoded and checked.

use strata_value::zcode;

use crate::{Expr, Literal, Operator, contains_fold};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferFilter {
    /// The frame contains these bytes.
    Contains(Vec<u8>),
    /// The frame contains these bytes, ignoring ASCII case. Stored lowercase.
    ContainsFold(Vec<u8>),
    /// A field name in the stream's type definitions contains these bytes, ignoring ASCII
    /// case. Stored lowercase.
    FieldName(Vec<u8>),
    And(Box<BufferFilter>, Box<BufferFilter>),
    Or(Box<BufferFilter>, Box<BufferFilter>),
}

impl BufferFilter {
    /// Derive a prefilter from `expr`, or `None` when the expression has no byte-level
    /// necessary condition that we know how to check.
    pub fn compile(expr: &Expr) -> Option<BufferFilter> {
        match expr {
            Expr::Binary {
                op: Operator::And,
                lhs,
                rhs,
            } => match (Self::compile(lhs), Self::compile(rhs)) {
                (Some(l), Some(r)) => Some(BufferFilter::And(Box::new(l), Box::new(r))),
                (Some(f), None) | (None, Some(f)) => Some(f),
                (None, None) => None,
            },
            Expr::Binary {
                op: Operator::Or,
                lhs,
                rhs,
            } => Some(BufferFilter::Or(
                Box::new(Self::compile(lhs)?),
                Box::new(Self::compile(rhs)?),
            )),
            Expr::Binary {
                op: Operator::Eq,
                lhs,
                rhs,
            } => match (lhs.as_ref(), rhs.as_ref()) {
                (Expr::Path { .. }, Expr::Literal { value })
                | (Expr::Literal { value }, Expr::Path { .. }) => encoded_literal(value),
                _ => None,
            },
            Expr::Binary {
                op: Operator::In,
                lhs,
                rhs,
            } => match (lhs.as_ref(), rhs.as_ref()) {
                (Expr::Literal { value }, Expr::Path { .. }) => encoded_literal(value),
                _ => None,
            },
            Expr::Search { text } => match Literal::infer(text) {
                Literal::String(_) => {
                    let lower = text.to_ascii_lowercase().into_bytes();
                    Some(BufferFilter::Or(
                        Box::new(BufferFilter::ContainsFold(lower.clone())),
                        Box::new(BufferFilter::FieldName(lower)),
                    ))
                }
                _ => None,
            },
            Expr::TypeEquals { typ, value } if typ.is_stringy() => {
                (value.primitive_type() == *typ).then(|| encoded_literal(value))?
            }
            _ => None,
        }
    }

    /// Check a frame. `values` is the uncompressed values payload and `type_defs` the raw
    /// type definitions in effect for it.
    pub fn eval(&self, values: &[u8], type_defs: &[u8]) -> bool {
        match self {
            BufferFilter::Contains(needle) => contains(values, needle),
            BufferFilter::ContainsFold(needle) => contains_fold(values, needle),
            BufferFilter::FieldName(needle) => contains_fold(type_defs, needle),
            BufferFilter::And(l, r) => l.eval(values, type_defs) && r.eval(values, type_defs),
            BufferFilter::Or(l, r) => l.eval(values, type_defs) || r.eval(values, type_defs),
        }
    }
}

/// The tagged encoding of a string-like literal, which any record holding the value must
/// contain verbatim.
fn encoded_literal(lit: &Literal) -> Option<BufferFilter> {
    if !lit.primitive_type().is_stringy() {
        return None;
    }
    let value = lit.to_value();
    Some(BufferFilter::Contains(zcode::tagged(value.body())))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
