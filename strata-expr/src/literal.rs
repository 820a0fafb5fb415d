use std::fmt::{Display, Formatter};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use strata_error::{StrataResult, strata_bail, strata_err};
use strata_value::primitive::parse_net;
use strata_value::{PrimitiveType, Ts, Type, Value};

/// A constant that can appear in a serialized plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Time(Ts),
    Duration(i64),
    Ip(IpAddr),
    Net(IpAddr, u8),
    Type(PrimitiveType),
    Error(String),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::null(),
            Literal::Bool(b) => Value::bool(*b),
            Literal::Int(i) => Value::int64(*i),
            Literal::Uint(u) => Value::uint64(*u),
            Literal::Float(f) => Value::float64(*f),
            Literal::String(s) => Value::string(s),
            Literal::Bytes(b) => Value::bytes_value(b),
            Literal::Time(ts) => Value::time(*ts),
            Literal::Duration(d) => Value::duration(*d),
            Literal::Ip(ip) => Value::ip(*ip),
            Literal::Net(ip, prefix) => Value::net(*ip, *prefix),
            Literal::Type(p) => Value::type_value(&Type::primitive(*p)),
            Literal::Error(msg) => Value::error(msg),
        }
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Literal::Null => PrimitiveType::Null,
            Literal::Bool(_) => PrimitiveType::Bool,
            Literal::Int(_) => PrimitiveType::Int64,
            Literal::Uint(_) => PrimitiveType::Uint64,
            Literal::Float(_) => PrimitiveType::Float64,
            Literal::String(_) => PrimitiveType::String,
            Literal::Bytes(_) => PrimitiveType::Bytes,
            Literal::Time(_) => PrimitiveType::Time,
            Literal::Duration(_) => PrimitiveType::Duration,
            Literal::Ip(_) => PrimitiveType::Ip,
            Literal::Net(..) => PrimitiveType::Net,
            Literal::Type(_) => PrimitiveType::Type,
            Literal::Error(_) => PrimitiveType::Error,
        }
    }

    /// Guess the type of a bare token: numbers, booleans, addresses, networks, RFC 3339 times
    /// and quoted strings are recognized; anything else is a string.
    pub fn infer(s: &str) -> Literal {
        let s = s.trim();
        if s == "null" {
            return Literal::Null;
        }
        if let Ok(b) = s.parse::<bool>() {
            return Literal::Bool(b);
        }
        if let Ok(i) = s.parse::<i64>() {
            return Literal::Int(i);
        }
        if let Ok(u) = s.parse::<u64>() {
            return Literal::Uint(u);
        }
        if let Ok(f) = s.parse::<f64>() {
            if s.contains(['.', 'e', 'E']) {
                return Literal::Float(f);
            }
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Literal::Ip(ip);
        }
        if let Ok((ip, prefix)) = parse_net(s) {
            return Literal::Net(ip, prefix);
        }
        if let Ok(ts) = Ts::parse(s) {
            return Literal::Time(ts);
        }
        if let Some(inner) = s.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            return Literal::String(inner.replace("\\\"", "\""));
        }
        Literal::String(s.to_string())
    }

    /// Parse `s` as a value of the primitive type `typ`.
    pub fn parse_as(typ: PrimitiveType, s: &str) -> StrataResult<Literal> {
        let bad = || strata_err!(Invalid: "cannot parse \"{s}\" as {typ}");
        let s = s.trim();
        Ok(match typ {
            PrimitiveType::Null => Literal::Null,
            PrimitiveType::Bool => Literal::Bool(s.parse().map_err(|_| bad())?),
            PrimitiveType::Uint8
            | PrimitiveType::Uint16
            | PrimitiveType::Uint32
            | PrimitiveType::Uint64 => Literal::Uint(s.parse().map_err(|_| bad())?),
            PrimitiveType::Int8
            | PrimitiveType::Int16
            | PrimitiveType::Int32
            | PrimitiveType::Int64 => Literal::Int(s.parse().map_err(|_| bad())?),
            PrimitiveType::Duration => Literal::Duration(s.parse().map_err(|_| bad())?),
            PrimitiveType::Time => match s.parse::<i64>() {
                Ok(ns) => Literal::Time(Ts(ns)),
                Err(_) => Literal::Time(Ts::parse(s)?),
            },
            PrimitiveType::Float64 => Literal::Float(s.parse().map_err(|_| bad())?),
            PrimitiveType::String => Literal::String(s.to_string()),
            PrimitiveType::Bytes => Literal::Bytes(s.as_bytes().to_vec()),
            PrimitiveType::Error => Literal::Error(s.to_string()),
            PrimitiveType::Ip => Literal::Ip(s.parse().map_err(|_| bad())?),
            PrimitiveType::Net => {
                let (ip, prefix) = parse_net(s)?;
                Literal::Net(ip, prefix)
            }
            PrimitiveType::Type => Literal::Type(s.parse()?),
        })
    }

    /// The literal behind a primitive value, if it has one.
    pub fn from_value(v: &Value) -> StrataResult<Literal> {
        let Some(p) = v.typ().as_primitive() else {
            strata_bail!(Invalid: "not a primitive value: {v}");
        };
        if v.is_null() {
            return Ok(Literal::Null);
        }
        let bad = || strata_err!(Corruption: "bad {p} value");
        Ok(match p {
            PrimitiveType::Bool => Literal::Bool(v.as_bool().ok_or_else(bad)?),
            p if p.is_unsigned() => Literal::Uint(v.as_uint().ok_or_else(bad)?),
            PrimitiveType::Time => Literal::Time(v.as_time().ok_or_else(bad)?),
            PrimitiveType::Duration => Literal::Duration(v.as_int().ok_or_else(bad)?),
            p if p.is_signed() => Literal::Int(v.as_int().ok_or_else(bad)?),
            PrimitiveType::Float64 => Literal::Float(v.as_float().ok_or_else(bad)?),
            PrimitiveType::String => Literal::String(v.as_str().ok_or_else(bad)?.to_string()),
            PrimitiveType::Error => Literal::Error(v.as_str().ok_or_else(bad)?.to_string()),
            PrimitiveType::Bytes => Literal::Bytes(v.body().unwrap_or_default().to_vec()),
            PrimitiveType::Ip => Literal::Ip(v.as_ip().ok_or_else(bad)?),
            PrimitiveType::Net => {
                let (ip, prefix) =
                    strata_value::primitive::decode_net(v.body().unwrap_or_default())?;
                Literal::Net(ip, prefix)
            }
            PrimitiveType::Null => Literal::Null,
            _ => strata_bail!(Invalid: "no literal form for {p} values"),
        })
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Type(p) => write!(f, "<{p}>"),
            other => write!(f, "{}", other.to_value()),
        }
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<u64> for Literal {
    fn from(v: u64) -> Self {
        Literal::Uint(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::String(v.to_string())
    }
}

impl From<IpAddr> for Literal {
    fn from(v: IpAddr) -> Self {
        Literal::Ip(v)
    }
}

impl From<Ts> for Literal {
    fn from(v: Ts) -> Self {
        Literal::Time(v)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("336", Literal::Int(336))]
    #[case("-1", Literal::Int(-1))]
    #[case("1.5", Literal::Float(1.5))]
    #[case("true", Literal::Bool(true))]
    #[case("10.0.0.1", Literal::Ip("10.0.0.1".parse().unwrap()))]
    #[case("10.0.0.0/8", Literal::Net("10.0.0.0".parse().unwrap(), 8))]
    #[case("\"a b\"", Literal::String("a b".to_string()))]
    #[case("hello", Literal::String("hello".to_string()))]
    fn infers_bare_tokens(#[case] s: &str, #[case] expected: Literal) {
        assert_eq!(Literal::infer(s), expected);
    }

    #[test]
    fn parses_as_requested_type() {
        assert_eq!(
            Literal::parse_as(PrimitiveType::Uint64, "7").unwrap(),
            Literal::Uint(7)
        );
        assert!(Literal::parse_as(PrimitiveType::Ip, "nope").is_err());
    }

    #[test]
    fn serde_is_tagged() {
        let json = serde_json::to_string(&Literal::Int(3)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":3}"#);
        let back: Literal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Literal::Int(3));
    }
}
