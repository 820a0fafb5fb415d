//! The serializable query plan: an arena of operator nodes addressed by [`NodeId`].

use serde::{Deserialize, Serialize};
use strata_error::{StrataResult, strata_bail};
use strata_expr::{Assignment, Expr};
use strata_value::{FieldPath, Order, PrimitiveType, Span};

/// Index of a node in [`Plan::nodes`].
pub type NodeId = usize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStyle {
    #[default]
    Inner,
    Left,
    Right,
    Anti,
}

/// One leg of a switch. A case without an expression is the default leg of an expression
/// switch and matches every value in a predicate switch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Case {
    #[serde(default)]
    pub expr: Option<Expr>,
    pub path: NodeId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Any,
    First,
    Last,
    Collect,
}

/// `lhs = func(expr) where filter`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggAssignment {
    pub lhs: FieldPath,
    pub func: AggFunc,
    #[serde(default)]
    pub expr: Option<Expr>,
    #[serde(default)]
    pub filter: Option<Expr>,
}

/// A variable bound by `over` for its body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Local {
    pub name: String,
    pub expr: Expr,
}

/// What a metadata scan lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Meta {
    Pools,
    Chunks,
    Indexes,
    Stats,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Op {
    /// Each node consumes the output of the previous one.
    Sequential { ops: Vec<NodeId> },
    /// Branches run side by side. With `any` every branch pulls from the one shared parent.
    Parallel {
        branches: Vec<NodeId>,
        #[serde(default)]
        any: bool,
    },
    /// Every branch sees every value.
    Fork { branches: Vec<NodeId> },
    /// Route each value to one case, by predicate or, with `expr`, by value.
    Switch {
        #[serde(default)]
        expr: Option<Expr>,
        cases: Vec<Case>,
    },
    /// Merge join of two parents sorted by their keys.
    Join {
        #[serde(default)]
        style: JoinStyle,
        left_key: Expr,
        right_key: Expr,
        #[serde(default)]
        args: Vec<Assignment>,
    },
    /// Order-preserving fan-in of parents sorted by `key`.
    Merge { key: Expr, order: Order },
    /// Unordered fan-in.
    Combine,
    Filter { expr: Expr },
    Cut { args: Vec<Assignment> },
    Pick { args: Vec<Assignment> },
    Drop { fields: Vec<FieldPath> },
    Put { args: Vec<Assignment> },
    /// `lhs = rhs` renames field `rhs` to `lhs`.
    Rename { args: Vec<Assignment> },
    Sort {
        #[serde(default)]
        keys: Vec<Expr>,
        order: Order,
        #[serde(default)]
        nulls_first: bool,
    },
    Head { limit: usize },
    Tail { limit: usize },
    Top {
        limit: usize,
        #[serde(default)]
        keys: Vec<Expr>,
        #[serde(default)]
        flush_every_batch: bool,
    },
    Uniq {
        #[serde(default)]
        cflag: bool,
    },
    Summarize {
        #[serde(default)]
        keys: Vec<Assignment>,
        aggs: Vec<AggAssignment>,
        #[serde(default)]
        partials_in: bool,
        #[serde(default)]
        partials_out: bool,
    },
    Fuse,
    Shape,
    Explode {
        args: Vec<Expr>,
        typ: PrimitiveType,
        as_name: String,
    },
    Yield { exprs: Vec<Expr> },
    /// Run `body` over the values of `exprs` for each input value, with `locals` bound.
    Over {
        exprs: Vec<Expr>,
        #[serde(default)]
        locals: Vec<Local>,
        body: NodeId,
    },
    Pass,
    Load {
        pool: String,
        #[serde(default)]
        branch: Option<String>,
    },
    FileScan {
        uri: String,
        #[serde(default)]
        filter: Option<Expr>,
    },
    HttpScan {
        url: String,
        #[serde(default)]
        filter: Option<Expr>,
    },
    PoolScan {
        pool: String,
        #[serde(default)]
        span: Option<Span>,
        #[serde(default)]
        filter: Option<Expr>,
    },
    /// Scan the partitions produced by its parent.
    SeqScan {
        pool: String,
        #[serde(default)]
        filter: Option<Expr>,
    },
    /// List the partitions of a pool.
    Lister {
        pool: String,
        #[serde(default)]
        span: Option<Span>,
    },
    /// Clip the partitions from its parent to `span`.
    Slicer { span: Span },
    /// Remove the records matching `filter` from a pool.
    Deleter { pool: String, filter: Expr },
    MetaScan {
        meta: Meta,
        #[serde(default)]
        pool: Option<String>,
    },
}

impl Op {
    /// The nodes this node refers to.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Op::Sequential { ops } => ops.clone(),
            Op::Parallel { branches, .. } | Op::Fork { branches } => branches.clone(),
            Op::Switch { cases, .. } => cases.iter().map(|c| c.path).collect(),
            Op::Over { body, .. } => vec![*body],
            _ => Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Sequential { .. } => "sequential",
            Op::Parallel { .. } => "parallel",
            Op::Fork { .. } => "fork",
            Op::Switch { .. } => "switch",
            Op::Join { .. } => "join",
            Op::Merge { .. } => "merge",
            Op::Combine => "combine",
            Op::Filter { .. } => "filter",
            Op::Cut { .. } => "cut",
            Op::Pick { .. } => "pick",
            Op::Drop { .. } => "drop",
            Op::Put { .. } => "put",
            Op::Rename { .. } => "rename",
            Op::Sort { .. } => "sort",
            Op::Head { .. } => "head",
            Op::Tail { .. } => "tail",
            Op::Top { .. } => "top",
            Op::Uniq { .. } => "uniq",
            Op::Summarize { .. } => "summarize",
            Op::Fuse => "fuse",
            Op::Shape => "shape",
            Op::Explode { .. } => "explode",
            Op::Yield { .. } => "yield",
            Op::Over { .. } => "over",
            Op::Pass => "pass",
            Op::Load { .. } => "load",
            Op::FileScan { .. } => "file_scan",
            Op::HttpScan { .. } => "http_scan",
            Op::PoolScan { .. } => "pool_scan",
            Op::SeqScan { .. } => "seq_scan",
            Op::Lister { .. } => "lister",
            Op::Slicer { .. } => "slicer",
            Op::Deleter { .. } => "deleter",
            Op::MetaScan { .. } => "meta_scan",
        }
    }
}

/// A plan DAG. Nodes may be referenced from several places; each reference is compiled into
/// its own operator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub nodes: Vec<Op>,
    pub root: NodeId,
}

impl Plan {
    /// Add a node, returning its handle. The last node pushed becomes the root.
    pub fn push(&mut self, op: Op) -> NodeId {
        self.nodes.push(op);
        self.root = self.nodes.len() - 1;
        self.root
    }

    /// A plan running `ops` in sequence.
    pub fn sequential(ops: impl IntoIterator<Item = Op>) -> Self {
        let mut plan = Plan::default();
        let ids: Vec<NodeId> = ops.into_iter().map(|op| plan.push(op)).collect();
        plan.push(Op::Sequential { ops: ids });
        plan
    }

    pub fn node(&self, id: NodeId) -> StrataResult<&Op> {
        match self.nodes.get(id) {
            Some(op) => Ok(op),
            None => strata_bail!(Invalid: "plan has no node {id}"),
        }
    }

    pub fn root(&self) -> StrataResult<&Op> {
        self.node(self.root)
    }

    /// Check that every handle resolves and that no node reaches itself.
    pub fn validate(&self) -> StrataResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }
        fn visit(plan: &Plan, id: NodeId, marks: &mut [Mark]) -> StrataResult<()> {
            match marks.get(id) {
                None => strata_bail!(Invalid: "plan has no node {id}"),
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Active) => strata_bail!(Invalid: "plan node {id} refers to itself"),
                Some(Mark::New) => {}
            }
            marks[id] = Mark::Active;
            for child in plan.nodes[id].children() {
                visit(plan, child, marks)?;
            }
            marks[id] = Mark::Done;
            Ok(())
        }
        let mut marks = vec![Mark::New; self.nodes.len()];
        visit(self, self.root, &mut marks)
    }
}

#[cfg(test)]
mod tests {
    use strata_error::ErrorKind;
    use strata_expr::{eq, lit, path};

    use super::*;

    #[test]
    fn plans_round_trip_through_json() {
        let plan = Plan::sequential([
            Op::PoolScan {
                pool: "logs".into(),
                span: None,
                filter: Some(eq(path("uid"), lit("x"))),
            },
            Op::Head { limit: 3 },
        ]);
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["nodes"][1]["kind"], "Head");
        assert_eq!(json["root"], 2);
        let back: Plan = serde_json::from_value(json).unwrap();
        assert_eq!(back, plan);
        back.validate().unwrap();
    }

    #[test]
    fn cycles_and_dangling_handles_are_rejected() {
        let mut plan = Plan::default();
        plan.push(Op::Sequential { ops: vec![1] });
        plan.push(Op::Fork { branches: vec![0] });
        plan.root = 0;
        assert_eq!(plan.validate().unwrap_err().kind(), ErrorKind::Invalid);

        let plan = Plan {
            nodes: vec![Op::Sequential { ops: vec![7] }],
            root: 0,
        };
        assert_eq!(plan.validate().unwrap_err().kind(), ErrorKind::Invalid);
    }

    #[test]
    fn shared_nodes_are_not_cycles() {
        let mut plan = Plan::default();
        let pass = plan.push(Op::Pass);
        plan.push(Op::Fork {
            branches: vec![pass, pass],
        });
        plan.validate().unwrap();
    }
}
