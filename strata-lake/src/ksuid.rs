//! K-sortable unique ids: a 32-bit timestamp followed by 128 random bits, rendered as 27
//! base62 characters that sort in creation order.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strata_error::{StrataError, StrataResult, strata_bail};

/// Seconds between the Unix epoch and the KSUID epoch.
const EPOCH: i64 = 1_400_000_000;
const BYTES: usize = 20;
pub const ENCODED_LEN: usize = 27;
const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ksuid([u8; BYTES]);

impl Ksuid {
    pub const NIL: Ksuid = Ksuid([0; BYTES]);

    /// A new id stamped with the current time.
    pub fn new() -> Self {
        let now = jiff::Timestamp::now().as_second();
        let mut payload = [0u8; 16];
        rand::rng().fill_bytes(&mut payload);
        Self::from_parts(now, &payload)
    }

    pub fn from_parts(unix_secs: i64, payload: &[u8; 16]) -> Self {
        let ts = u32::try_from((unix_secs - EPOCH).max(0)).unwrap_or(u32::MAX);
        let mut bytes = [0u8; BYTES];
        bytes[..4].copy_from_slice(&ts.to_be_bytes());
        bytes[4..].copy_from_slice(payload);
        Ksuid(bytes)
    }

    pub fn from_bytes(b: &[u8]) -> StrataResult<Self> {
        let Ok(bytes) = <[u8; BYTES]>::try_from(b) else {
            strata_bail!(Invalid: "ksuid must be {BYTES} bytes, got {}", b.len());
        };
        Ok(Ksuid(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Creation time in seconds since the Unix epoch.
    pub fn unix_secs(&self) -> i64 {
        let mut ts = [0u8; 4];
        ts.copy_from_slice(&self.0[..4]);
        i64::from(u32::from_be_bytes(ts)) + EPOCH
    }

    pub fn parse(s: &str) -> StrataResult<Self> {
        if s.len() != ENCODED_LEN {
            strata_bail!(Invalid: "ksuid '{s}' must be {ENCODED_LEN} characters");
        }
        // Base62 digits into a big-endian base 2^32 number.
        let mut words = [0u32; BYTES / 4];
        for c in s.bytes() {
            let Some(digit) = ALPHABET.iter().position(|a| *a == c) else {
                strata_bail!(Invalid: "ksuid '{s}' has a non-base62 character");
            };
            let mut carry = digit as u64;
            for w in words.iter_mut().rev() {
                let v = u64::from(*w) * 62 + carry;
                *w = (v & 0xffff_ffff) as u32;
                carry = v >> 32;
            }
            if carry != 0 {
                strata_bail!(Invalid: "ksuid '{s}' out of range");
            }
        }
        let mut bytes = [0u8; BYTES];
        for (i, w) in words.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&w.to_be_bytes());
        }
        Ok(Ksuid(bytes))
    }
}

impl Display for Ksuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut words = [0u32; BYTES / 4];
        for (i, w) in words.iter_mut().enumerate() {
            let mut b = [0u8; 4];
            b.copy_from_slice(&self.0[i * 4..i * 4 + 4]);
            *w = u32::from_be_bytes(b);
        }
        let mut out = [b'0'; ENCODED_LEN];
        for slot in out.iter_mut().rev() {
            let mut rem = 0u64;
            for w in words.iter_mut() {
                let v = (rem << 32) | u64::from(*w);
                *w = (v / 62) as u32;
                rem = v % 62;
            }
            *slot = ALPHABET[rem as usize];
        }
        f.write_str(&String::from_utf8_lossy(&out))
    }
}

impl FromStr for Ksuid {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ksuid::parse(s)
    }
}

impl Serialize for Ksuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ksuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ksuid::parse(&s).map_err(serde::de::Error::custom)
    }
}
