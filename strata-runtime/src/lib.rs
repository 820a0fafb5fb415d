//! The pull-based query runtime.
//!
//! A [`Plan`] is an arena of operator nodes. The [`Builder`](builder::Builder) compiles it
//! into a tree of [`Puller`]s over a shared [`Context`]; values flow upward in [`Batch`]es as
//! the root is pulled. Pools live in a [`Lake`], and the [`index`] module maintains
//! secondary indexes that scans use to skip chunks.

use std::sync::Arc;

pub use batch::*;
pub use context::*;
pub use lake::*;
pub use plan::*;
use strata_error::StrataResult;
use strata_value::Value;

pub mod builder;
pub mod index;
pub mod op;

mod batch;
mod context;
mod guard;
mod lake;
mod plan;
#[cfg(test)]
mod tests;

/// Validate `plan`, run it to completion and return its output.
pub fn run(ctx: &Arc<Context>, plan: Plan) -> StrataResult<Vec<Value>> {
    plan.validate()?;
    let plan = Arc::new(plan);
    let mut root = builder::Builder::new(ctx.clone(), plan.clone()).build_one(plan.root, Vec::new())?;
    let out = collect(&mut root)?;
    log::debug!("query read {} records", ctx.progress().records_read);
    Ok(out)
}
