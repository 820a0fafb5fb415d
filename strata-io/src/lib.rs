//! Storage access for Strata.
//!
//! Everything the lake reads or writes is addressed by a [`Uri`] and reached through a
//! [`Source`]. A [`Mux`] routes URIs to the source for their scheme, so lake code never cares
//! whether a chunk lives on local disk or in S3.

mod cancel;
pub mod ctxio;
mod dispatcher;
mod file;
mod mux;
mod object_store;
mod source;
mod stdio;
mod uri;

pub use cancel::*;
pub use dispatcher::IoDispatcher;
pub use file::FileSource;
pub use mux::Mux;
pub use object_store::ObjectStoreSource;
pub use source::*;
pub use stdio::StdioSource;
pub use uri::*;
