//! The tagged body encoding shared by every container value.
//!
//! A container body is a sequence of elements, each prefixed by a uvarint tag. Tag zero is a
//! null element; tag `n` is followed by `n - 1` bytes of element body.

use strata_error::{StrataResult, strata_bail};

/// Append `v` as a uvarint.
#[allow(clippy::cast_possible_truncation)]
pub fn append_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Decode a uvarint from the front of `buf`, returning the value and the bytes consumed.
pub fn read_uvarint(buf: &[u8]) -> StrataResult<(u64, usize)> {
    let mut v: u64 = 0;
    for (i, b) in buf.iter().enumerate() {
        if i >= 10 {
            break;
        }
        v |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((v, i + 1));
        }
    }
    strata_bail!(Corruption: "bad uvarint")
}

/// Number of bytes `v` takes as a uvarint.
pub fn uvarint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Append one tagged element. `None` is the null element.
pub fn append(buf: &mut Vec<u8>, body: Option<&[u8]>) {
    match body {
        None => append_uvarint(buf, 0),
        Some(body) => {
            append_uvarint(buf, body.len() as u64 + 1);
            buf.extend_from_slice(body);
        }
    }
}

/// The full tagged encoding of one element.
pub fn tagged(body: Option<&[u8]>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(body.map_or(1, |b| b.len() + 2));
    append(&mut buf, body);
    buf
}

/// Iterator over the elements of a container body.
#[derive(Clone)]
pub struct Iter<'a> {
    buf: &'a [u8],
}

impl<'a> Iter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn done(&self) -> bool {
        self.buf.is_empty()
    }

    /// The next element, `Ok(None)` meaning a null element.
    pub fn next_elem(&mut self) -> StrataResult<Option<&'a [u8]>> {
        let (tag, n) = read_uvarint(self.buf)?;
        self.buf = &self.buf[n..];
        if tag == 0 {
            return Ok(None);
        }
        let len = usize::try_from(tag - 1)
            .ok()
            .filter(|len| *len <= self.buf.len());
        let Some(len) = len else {
            strata_bail!(Corruption: "tagged element overruns its container");
        };
        let (body, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(Some(body))
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = StrataResult<Option<&'a [u8]>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.next_elem())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uvarint_boundaries() {
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            append_uvarint(&mut buf, v);
            assert_eq!(buf.len(), uvarint_len(v));
            assert_eq!(read_uvarint(&buf).unwrap(), (v, buf.len()));
        }
    }

    #[test]
    fn container_with_null_and_empty() {
        let mut body = Vec::new();
        append(&mut body, Some(b"ab"));
        append(&mut body, None);
        append(&mut body, Some(b""));
        let elems: Vec<_> = Iter::new(&body).map(|e| e.unwrap()).collect();
        assert_eq!(elems, vec![Some(&b"ab"[..]), None, Some(&b""[..])]);
    }

    #[test]
    fn truncated_element_is_corruption() {
        let body = [5u8, b'a'];
        let err = Iter::new(&body).next().unwrap().unwrap_err();
        assert_eq!(err.kind(), strata_error::ErrorKind::Corruption);
    }
}
