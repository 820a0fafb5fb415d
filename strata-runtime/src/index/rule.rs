use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use strata_error::{StrataResult, strata_bail};
use strata_expr::{Assignment, Expr, path};
use strata_value::{FieldPath, Order, PrimitiveType};

use crate::plan::{AggAssignment, AggFunc, Op, Plan};

/// The key field of type and field indexes.
pub const KEY_FIELD: &str = "key";

/// What a secondary index holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// Every distinct value of a primitive type, wherever it appears in a record.
    Type { typ: PrimitiveType },
    /// Every distinct value of one field.
    Field { field: FieldPath },
    /// The output of a plan, which must come out sorted by `keys`.
    Query {
        name: String,
        plan: Plan,
        keys: Vec<FieldPath>,
    },
}

impl Rule {
    pub fn new_type(typ: PrimitiveType) -> Self {
        Rule::Type { typ }
    }

    pub fn new_field(field: &str) -> Self {
        Rule::Field {
            field: FieldPath::dotted(field),
        }
    }

    pub fn new_query(name: &str, plan: Plan, keys: Vec<FieldPath>) -> StrataResult<Self> {
        if name.is_empty() {
            strata_bail!(Invalid: "query index needs a name");
        }
        if keys.is_empty() {
            strata_bail!(Invalid: "query index {name} needs at least one key");
        }
        plan.validate()?;
        Ok(Rule::Query {
            name: name.to_string(),
            plan,
            keys,
        })
    }

    /// `:type` for a type rule, anything else names a field.
    pub fn parse(pattern: &str) -> StrataResult<Self> {
        match pattern.strip_prefix(':') {
            Some(name) => Ok(Rule::new_type(name.parse()?)),
            None if pattern.is_empty() => strata_bail!(Invalid: "empty index pattern"),
            None => Ok(Rule::new_field(pattern)),
        }
    }

    pub fn keys(&self) -> Vec<FieldPath> {
        match self {
            Rule::Type { .. } | Rule::Field { .. } => vec![FieldPath::dotted(KEY_FIELD)],
            Rule::Query { keys, .. } => keys.clone(),
        }
    }

    /// The plan that turns a chunk's records into index entries.
    pub fn plan(&self) -> Plan {
        let key = FieldPath::dotted(KEY_FIELD);
        let summarize = Op::Summarize {
            keys: vec![Assignment::new(key.clone(), path(KEY_FIELD))],
            aggs: vec![AggAssignment {
                lhs: FieldPath::dotted("count"),
                func: AggFunc::Count,
                expr: None,
                filter: None,
            }],
            partials_in: false,
            partials_out: false,
        };
        let sort = Op::Sort {
            keys: vec![path(KEY_FIELD)],
            order: Order::Asc,
            nulls_first: false,
        };
        match self {
            Rule::Type { typ } => Plan::sequential([
                Op::Explode {
                    args: vec![Expr::This],
                    typ: *typ,
                    as_name: KEY_FIELD.to_string(),
                },
                summarize,
                sort,
            ]),
            Rule::Field { field } => Plan::sequential([
                Op::Cut {
                    args: vec![Assignment::new(key, Expr::Path { path: field.clone() })],
                },
                summarize,
                sort,
            ]),
            Rule::Query { plan, .. } => plan.clone(),
        }
    }

    /// Whether a definition holding `other` already covers this rule.
    pub fn equivalent(&self, other: &Rule) -> bool {
        match (self, other) {
            (Rule::Type { typ: a }, Rule::Type { typ: b }) => a == b,
            (Rule::Field { field: a }, Rule::Field { field: b }) => a == b,
            (Rule::Query { name: a, plan: pa, .. }, Rule::Query { name: b, plan: pb, .. }) => {
                a == b && pa == pb
            }
            _ => false,
        }
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Rule::Type { typ } => write!(f, "type-{typ}"),
            Rule::Field { field } => write!(f, "field-{field}"),
            Rule::Query { name, .. } => write!(f, "query-{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_error::ErrorKind;

    use super::*;

    #[test]
    fn patterns_pick_the_rule_kind() {
        assert_eq!(Rule::parse(":ip").unwrap(), Rule::new_type(PrimitiveType::Ip));
        assert_eq!(Rule::parse("id.orig_h").unwrap(), Rule::new_field("id.orig_h"));
        assert!(Rule::parse(":nosuchtype").is_err());
        assert_eq!(Rule::parse("").unwrap_err().kind(), ErrorKind::Invalid);
        assert_eq!(Rule::new_type(PrimitiveType::Int64).to_string(), "type-int64");
        assert_eq!(Rule::new_field("a.b").to_string(), "field-a.b");
    }

    #[test]
    fn query_rules_need_keys_and_a_valid_plan() {
        let plan = Plan::sequential([Op::Pass]);
        assert!(Rule::new_query("q", plan.clone(), vec![]).is_err());
        assert!(Rule::new_query("", plan.clone(), vec![FieldPath::dotted("k")]).is_err());
        let rule = Rule::new_query("q", plan, vec![FieldPath::dotted("k")]).unwrap();
        assert_eq!(rule.keys(), vec![FieldPath::dotted("k")]);
        let json = serde_json::to_string(&rule).unwrap();
        assert_eq!(serde_json::from_str::<Rule>(&json).unwrap(), rule);
    }

    #[test]
    fn equivalence_ignores_query_keys() {
        let a = Rule::new_field("x");
        assert!(a.equivalent(&Rule::new_field("x")));
        assert!(!a.equivalent(&Rule::new_field("y")));
        assert!(!a.equivalent(&Rule::new_type(PrimitiveType::String)));
    }
}
