//! Secondary indexes on pool chunks.
//!
//! A [`Rule`] says what to index and is stored in a pool as a [`Definition`]. Building a
//! definition on a chunk runs the rule's plan over the chunk's records and writes the sorted
//! entries as a micro-index in the chunk's sidecar directory, named after the definition id.
//! Scans use the indexes through [`IndexFilter`] to skip chunks that cannot match.

pub use definition::*;
pub use pushdown::*;
pub use query::*;
pub use rule::*;
pub use writer::*;

mod definition;
mod pushdown;
mod query;
mod rule;
mod writer;
