//! Body encodings of primitive values.
//!
//! Integers are little-endian with high zero bytes trimmed (signed values are zig-zagged
//! first), floats are eight little-endian bytes, and string-like values are their raw bytes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use strata_error::{StrataResult, strata_bail, strata_err};

use crate::Ts;

pub fn encode_uint(v: u64) -> Vec<u8> {
    let bytes = v.to_le_bytes();
    let len = 8 - (v.leading_zeros() / 8) as usize;
    bytes[..len].to_vec()
}

pub fn decode_uint(b: &[u8]) -> StrataResult<u64> {
    if b.len() > 8 {
        strata_bail!(Corruption: "uint body too long: {} bytes", b.len());
    }
    let mut buf = [0u8; 8];
    buf[..b.len()].copy_from_slice(b);
    Ok(u64::from_le_bytes(buf))
}

pub fn encode_int(v: i64) -> Vec<u8> {
    encode_uint(((v << 1) ^ (v >> 63)) as u64)
}

pub fn decode_int(b: &[u8]) -> StrataResult<i64> {
    let u = decode_uint(b)?;
    Ok(((u >> 1) as i64) ^ -((u & 1) as i64))
}

pub fn encode_float64(v: f64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

pub fn decode_float64(b: &[u8]) -> StrataResult<f64> {
    let arr: [u8; 8] = b
        .try_into()
        .map_err(|_| strata_err!(Corruption: "float64 body must be 8 bytes"))?;
    Ok(f64::from_le_bytes(arr))
}

pub fn encode_bool(v: bool) -> Vec<u8> {
    vec![u8::from(v)]
}

pub fn decode_bool(b: &[u8]) -> StrataResult<bool> {
    match b {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => strata_bail!(Corruption: "bad bool body"),
    }
}

pub fn encode_time(ts: Ts) -> Vec<u8> {
    encode_int(ts.0)
}

pub fn decode_time(b: &[u8]) -> StrataResult<Ts> {
    decode_int(b).map(Ts)
}

pub fn encode_ip(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

pub fn decode_ip(b: &[u8]) -> StrataResult<IpAddr> {
    if let Ok(arr) = <[u8; 4]>::try_from(b) {
        return Ok(IpAddr::V4(Ipv4Addr::from(arr)));
    }
    if let Ok(arr) = <[u8; 16]>::try_from(b) {
        return Ok(IpAddr::V6(Ipv6Addr::from(arr)));
    }
    strata_bail!(Corruption: "ip body must be 4 or 16 bytes")
}

/// A network is its address followed by one byte of prefix length.
pub fn encode_net(ip: IpAddr, prefix: u8) -> Vec<u8> {
    let mut b = encode_ip(ip);
    b.push(prefix);
    b
}

pub fn decode_net(b: &[u8]) -> StrataResult<(IpAddr, u8)> {
    let Some((prefix, addr)) = b.split_last() else {
        strata_bail!(Corruption: "empty net body");
    };
    Ok((decode_ip(addr)?, *prefix))
}

/// Parse `a.b.c.d/n` or `v6::/n`.
pub fn parse_net(s: &str) -> StrataResult<(IpAddr, u8)> {
    let (addr, prefix) = s
        .split_once('/')
        .ok_or_else(|| strata_err!(Invalid: "bad net: {s}"))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| strata_err!(Invalid: "bad net: {s}"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| strata_err!(Invalid: "bad net: {s}"))?;
    Ok((addr, prefix))
}
