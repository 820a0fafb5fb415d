//! The operators a plan compiles to.

pub use applier::*;
pub use delete::*;
pub use fuse::*;
pub use join::*;
pub use limit::*;
pub use load::*;
pub use merge::*;
pub use over::*;
pub use project::{Cutter, Dropper, Putter, Renamer};
pub use router::{expr_switch, fork, share, switch};
pub use scan::*;
pub use sort::*;
pub use summarize::*;
pub use top::*;
pub use uniq::*;

pub(crate) use project::lhs_paths;

mod applier;
mod delete;
mod fuse;
mod join;
mod limit;
mod load;
mod merge;
mod over;
mod project;
mod router;
mod scan;
mod sort;
mod summarize;
mod top;
mod uniq;
