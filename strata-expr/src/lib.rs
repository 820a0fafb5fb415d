//! Expressions over values: a serializable AST, compiled evaluators, value comparators and the
//! byte-level prefilters derived from filter predicates.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use strata_value::{FieldPath, PrimitiveType};

pub mod bufferfilter;
mod coerce;
mod eval;
mod functions;
mod literal;
mod sort;

pub use coerce::*;
pub use eval::*;
pub use literal::*;
pub use sort::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Operator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::NotEq
                | Operator::Lt
                | Operator::Lte
                | Operator::Gt
                | Operator::Gte
        )
    }

    /// The operator obtained by swapping the operands.
    pub fn swap(self) -> Option<Operator> {
        Some(match self {
            Operator::Lt => Operator::Gt,
            Operator::Lte => Operator::Gte,
            Operator::Gt => Operator::Lt,
            Operator::Gte => Operator::Lte,
            Operator::Eq
            | Operator::NotEq
            | Operator::And
            | Operator::Or
            | Operator::Add
            | Operator::Mul => self,
            _ => return None,
        })
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::In => "in",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

/// An expression node of a plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    /// The whole input value.
    This,
    /// A field of the input value.
    Path { path: FieldPath },
    Literal { value: Literal },
    /// A variable bound by an enclosing `over`, addressed by frame slot.
    Var { name: String, slot: usize },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: Operator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call { name: String, args: Vec<Expr> },
    /// Case-insensitive substring search over every string-like value and field name.
    Search { text: String },
    /// True when any value of primitive type `typ` anywhere in the input equals `value`.
    TypeEquals { typ: PrimitiveType, value: Literal },
    Record { fields: Vec<(String, Expr)> },
    Array { elems: Vec<Expr> },
    /// `container[index]`: array element by position or record field by name.
    Index {
        container: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::This => f.write_str("this"),
            Expr::Path { path } => Display::fmt(path, f),
            Expr::Literal { value } => Display::fmt(value, f),
            Expr::Var { name, .. } => f.write_str(name),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
            },
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => write!(f, "({cond} ? {then} : {otherwise})"),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    Display::fmt(arg, f)?;
                }
                f.write_str(")")
            }
            Expr::Search { text } => write!(f, "search(\"{text}\")"),
            Expr::TypeEquals { typ, value } => write!(f, ":{typ}=={value}"),
            Expr::Record { fields } => {
                f.write_str("{")?;
                for (i, (name, e)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{name}:{e}")?;
                }
                f.write_str("}")
            }
            Expr::Array { elems } => {
                f.write_str("[")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    Display::fmt(e, f)?;
                }
                f.write_str("]")
            }
            Expr::Index { container, index } => write!(f, "{container}[{index}]"),
        }
    }
}

impl Expr {
    /// The field path this expression denotes, if it is `this` or a field reference.
    pub fn as_path(&self) -> Option<FieldPath> {
        match self {
            Expr::This => Some(FieldPath::this()),
            Expr::Path { path } => Some(path.clone()),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Expr::Literal { value } => Some(value),
            _ => None,
        }
    }
}

/// `lhs = rhs`: the destination path and the expression computing it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub lhs: FieldPath,
    pub rhs: Expr,
}

impl Assignment {
    pub fn new(lhs: impl Into<FieldPath>, rhs: Expr) -> Self {
        Self {
            lhs: lhs.into(),
            rhs,
        }
    }

    /// An assignment that copies a field to itself, as `cut a` does.
    pub fn field(path: &str) -> Self {
        Self::new(path, self::path(path))
    }
}

impl Display for Assignment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.lhs, self.rhs)
    }
}

pub fn this() -> Expr {
    Expr::This
}

/// A reference to a dotted field path.
pub fn path(p: &str) -> Expr {
    let path = FieldPath::dotted(p);
    if path.is_this() {
        Expr::This
    } else {
        Expr::Path { path }
    }
}

pub fn lit(value: impl Into<Literal>) -> Expr {
    Expr::Literal {
        value: value.into(),
    }
}

pub fn binary(op: Operator, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
    binary(Operator::Eq, lhs, rhs)
}

pub fn not_eq(lhs: Expr, rhs: Expr) -> Expr {
    binary(Operator::NotEq, lhs, rhs)
}

pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
    binary(Operator::Lt, lhs, rhs)
}

pub fn gt(lhs: Expr, rhs: Expr) -> Expr {
    binary(Operator::Gt, lhs, rhs)
}

pub fn and(lhs: Expr, rhs: Expr) -> Expr {
    binary(Operator::And, lhs, rhs)
}

pub fn or(lhs: Expr, rhs: Expr) -> Expr {
    binary(Operator::Or, lhs, rhs)
}

pub fn not(operand: Expr) -> Expr {
    Expr::Unary {
        op: UnaryOp::Not,
        operand: Box::new(operand),
    }
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call {
        name: name.to_string(),
        args,
    }
}

pub fn search(text: &str) -> Expr {
    Expr::Search {
        text: text.to_string(),
    }
}

pub fn type_equals(typ: PrimitiveType, value: impl Into<Literal>) -> Expr {
    Expr::TypeEquals {
        typ,
        value: value.into(),
    }
}

/// Splits top level `and` operations into separate expressions.
pub fn split_conjunction(expr: &Expr) -> Vec<&Expr> {
    let mut conjuncts = vec![];
    split_inner(expr, &mut conjuncts);
    conjuncts
}

fn split_inner<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Binary {
            op: Operator::And,
            lhs,
            rhs,
        } => {
            split_inner(lhs, out);
            split_inner(rhs, out);
        }
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conjunctions_split() {
        let e = and(
            eq(path("a"), lit(1i64)),
            and(type_equals(PrimitiveType::Int64, 336i64), search("x")),
        );
        assert_eq!(split_conjunction(&e).len(), 3);
        assert_eq!(split_conjunction(&eq(path("a"), lit(1i64))).len(), 1);
    }

    #[test]
    fn expr_display() {
        assert_eq!(path("this").to_string(), "this");
        assert_eq!(
            and(eq(path("id.orig_h"), lit("x")), not(path("b"))).to_string(),
            r#"((id.orig_h == "x") and !b)"#
        );
        assert_eq!(type_equals(PrimitiveType::Int64, 336i64).to_string(), ":int64==336");
    }

    #[test]
    fn plans_serialize_by_kind() {
        let e = eq(path("a.b"), lit(1i64));
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "Binary");
        assert_eq!(json["lhs"]["path"], serde_json::json!(["a", "b"]));
        let back: Expr = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }
}
