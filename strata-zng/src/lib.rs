//! The framed binary record stream used for chunk data, chunk metadata, seek indexes,
//! secondary indexes and sort runs.
//!
//! A stream is a sequence of frames. Types frames introduce stream-local type ids, values
//! frames carry `(type id, tagged body)` pairs and an end-of-stream frame resets the type
//! table, so decoding may begin at any end-of-stream boundary.

mod frame;
pub mod microindex;
mod reader;
mod scanner;
pub mod spill;
mod writer;

pub use reader::*;
pub use scanner::*;
pub use writer::*;

/// Read every value of an encoded stream.
pub fn read_all(
    ctx: &strata_value::TypeContext,
    bytes: &[u8],
) -> strata_error::StrataResult<Vec<strata_value::Value>> {
    let mut reader = Reader::new(ctx.clone(), bytes);
    let mut out = Vec::new();
    while let Some(val) = reader.read()? {
        out.push(val);
    }
    Ok(out)
}

/// Encode `values` as a single uncompressed stream.
pub fn write_all(values: &[strata_value::Value]) -> strata_error::StrataResult<Vec<u8>> {
    let mut writer = Writer::new(
        Vec::new(),
        WriterOptions {
            compress: false,
            ..Default::default()
        },
    );
    for val in values {
        writer.write(val)?;
    }
    writer.close()
}
