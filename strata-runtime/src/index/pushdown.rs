use std::fmt::{Debug, Formatter};

use strata_error::StrataResult;
use strata_expr::{Expr, Operator, split_conjunction};
use strata_lake::{Archive, Chunk, ChunkFilter, Ksuid};
use strata_value::{TypeContext, Value};

use super::{Definition, Rule, find};

/// Prunes chunks whose indexes prove a filter cannot match.
///
/// Each conjunct `:T = literal` or `path = literal` with a matching type or field index
/// becomes a probe. A chunk is skipped when any probe's index exists and lacks the key.
pub struct IndexFilter {
    probes: Vec<(Definition, Value)>,
}

fn probe(defs: &[Definition], conjunct: &Expr) -> Option<(Definition, Value)> {
    let (rule, value) = match conjunct {
        Expr::TypeEquals { typ, value } => (Rule::new_type(*typ), value.to_value()),
        Expr::Binary {
            op: Operator::Eq,
            lhs,
            rhs,
        } => match (lhs.as_ref(), rhs.as_ref()) {
            (Expr::Path { path }, Expr::Literal { value })
            | (Expr::Literal { value }, Expr::Path { path }) => (
                Rule::Field {
                    field: path.clone(),
                },
                value.to_value(),
            ),
            _ => return None,
        },
        _ => return None,
    };
    if value.is_null() {
        return None;
    }
    defs.iter()
        .find(|d| d.rule.equivalent(&rule))
        .map(|d| (d.clone(), value))
}

impl IndexFilter {
    /// `None` when no conjunct of `filter` can use an index in `defs`.
    pub fn new(defs: &[Definition], filter: &Expr) -> Option<Self> {
        let probes: Vec<_> = split_conjunction(filter)
            .into_iter()
            .filter_map(|c| probe(defs, c))
            .collect();
        (!probes.is_empty()).then_some(Self { probes })
    }
}

impl Debug for IndexFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<Ksuid> = self.probes.iter().map(|(d, _)| d.id).collect();
        f.debug_struct("IndexFilter").field("indexes", &ids).finish()
    }
}

impl ChunkFilter for IndexFilter {
    fn keep(&self, ark: &Archive, chunk: &Chunk) -> StrataResult<bool> {
        let ctx = TypeContext::new();
        for (def, key) in &self.probes {
            match find(ark, &ctx, def, chunk, std::slice::from_ref(key)) {
                Ok(hits) if hits.is_empty() => return Ok(false),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use strata_expr::{and, eq, gt, lit, path, type_equals};
    use strata_value::PrimitiveType;

    use super::*;

    #[test]
    fn only_indexed_equalities_become_probes() {
        let defs = vec![
            Definition::new(Rule::new_type(PrimitiveType::Int64)),
            Definition::new(Rule::new_field("uid")),
        ];
        let filter = and(
            and(type_equals(PrimitiveType::Int64, 336i64), eq(lit("a"), path("uid"))),
            and(gt(path("n"), lit(1i64)), eq(path("other"), lit("x"))),
        );
        let f = IndexFilter::new(&defs, &filter).unwrap();
        assert_eq!(f.probes.len(), 2);
        assert_eq!(f.probes[0].1, Value::int64(336));
        assert_eq!(f.probes[1].0.id, defs[1].id);

        assert!(IndexFilter::new(&defs, &gt(path("n"), lit(1i64))).is_none());
        assert!(IndexFilter::new(&[], &filter).is_none());
    }
}
