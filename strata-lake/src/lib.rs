//! Time-partitioned chunk storage.
//!
//! An [`Archive`] keeps immutable chunks of `ts`-sorted records in one directory per UTC
//! day. Each chunk has a data file, a metadata sidecar and an optional seek index that maps
//! timestamps to byte offsets. Readers walk the buckets, group overlapping chunks into
//! [`SpanInfo`]s and merge them back into a single ordered stream.

pub use archive::*;
pub use cache::*;
pub use chunk::*;
pub use ksuid::*;
pub use multisource::*;
pub use seekindex::*;
pub use stat::*;
pub use walk::*;
pub use writer::*;

mod archive;
mod cache;
mod chunk;
mod ksuid;
mod multisource;
mod seekindex;
mod stat;
mod walk;
mod writer;
