//! The Strata value universe: primitive and complex types, the type context that interns
//! them, and values carried as a type plus the bytes of their canonical encoding.

pub use context::*;
pub use field::*;
pub use order::*;
pub use time::*;
pub use types::{Column, FIRST_COMPLEX_ID, PrimitiveType, Type, TypeKind};
pub use value::*;

mod context;
mod field;
mod format;
pub mod json;
mod order;
pub mod primitive;
mod time;
mod types;
pub mod typevalue;
mod value;
pub mod walk;
pub mod zcode;
