use std::fmt::{self, Display, Formatter, Write};

use crate::primitive::*;
use crate::typevalue::decode_type;
use crate::{PrimitiveType, Type, TypeContext, TypeKind, Value, zcode};

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt_body(f, self.typ(), self.body())
    }
}

fn quote(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c if c.is_control() => write!(f, "\\u{:04x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

fn fmt_primitive(f: &mut Formatter<'_>, p: PrimitiveType, b: &[u8]) -> fmt::Result {
    let bad = |_| fmt::Error;
    match p {
        p if p.is_unsigned() => write!(f, "{}", decode_uint(b).map_err(bad)?),
        PrimitiveType::Time => write!(f, "{}", decode_time(b).map_err(bad)?),
        PrimitiveType::Duration => write!(f, "{}ns", decode_int(b).map_err(bad)?),
        p if p.is_signed() => write!(f, "{}", decode_int(b).map_err(bad)?),
        PrimitiveType::Float64 => {
            let v = decode_float64(b).map_err(bad)?;
            if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
                write!(f, "{v:.1}")
            } else {
                write!(f, "{v}")
            }
        }
        PrimitiveType::Bool => f.write_str(if decode_bool(b).map_err(bad)? {
            "true"
        } else {
            "false"
        }),
        PrimitiveType::Bytes => {
            f.write_str("0x")?;
            for byte in b {
                write!(f, "{byte:02x}")?;
            }
            Ok(())
        }
        PrimitiveType::String => quote(f, &String::from_utf8_lossy(b)),
        PrimitiveType::Error => {
            f.write_str("error(")?;
            quote(f, &String::from_utf8_lossy(b))?;
            f.write_str(")")
        }
        PrimitiveType::Ip => write!(f, "{}", decode_ip(b).map_err(bad)?),
        PrimitiveType::Net => {
            let (ip, prefix) = decode_net(b).map_err(bad)?;
            write!(f, "{ip}/{prefix}")
        }
        PrimitiveType::Type => {
            let mut buf = b;
            let typ = decode_type(&TypeContext::new(), &mut buf).map_err(bad)?;
            write!(f, "<{typ}>")
        }
        _ => f.write_str("null"),
    }
}

fn fmt_elems(f: &mut Formatter<'_>, typ: &Type, body: &[u8]) -> fmt::Result {
    for (i, elem) in zcode::Iter::new(body).enumerate() {
        if i > 0 {
            f.write_char(',')?;
        }
        fmt_body(f, typ, elem.map_err(|_| fmt::Error)?)?;
    }
    Ok(())
}

pub(crate) fn fmt_body(f: &mut Formatter<'_>, typ: &Type, body: Option<&[u8]>) -> fmt::Result {
    let Some(b) = body else {
        return f.write_str("null");
    };
    match typ.kind() {
        TypeKind::Primitive(p) => fmt_primitive(f, p, b),
        TypeKind::Record(cols) => {
            f.write_char('{')?;
            let mut it = zcode::Iter::new(b);
            for (i, col) in cols.iter().enumerate() {
                if i > 0 {
                    f.write_char(',')?;
                }
                write!(f, "{}:", col.name)?;
                fmt_body(f, &col.typ, it.next_elem().map_err(|_| fmt::Error)?)?;
            }
            f.write_char('}')
        }
        TypeKind::Array(inner) => {
            f.write_char('[')?;
            fmt_elems(f, inner, b)?;
            f.write_char(']')
        }
        TypeKind::Set(inner) => {
            f.write_str("|[")?;
            fmt_elems(f, inner, b)?;
            f.write_str("]|")
        }
        TypeKind::Map(kt, vt) => {
            f.write_str("|{")?;
            let mut it = zcode::Iter::new(b);
            let mut first = true;
            while !it.done() {
                if !first {
                    f.write_char(',')?;
                }
                first = false;
                fmt_body(f, kt, it.next_elem().map_err(|_| fmt::Error)?)?;
                f.write_char(':')?;
                fmt_body(f, vt, it.next_elem().map_err(|_| fmt::Error)?)?;
            }
            f.write_str("}|")
        }
        TypeKind::Union(_) => {
            let v = Value::new(typ.clone(), Some(bytes::Bytes::copy_from_slice(b)));
            let inner = v.union_inner().map_err(|_| fmt::Error)?;
            Display::fmt(&inner, f)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use crate::{Ts, Type, TypeContext, Value};

    #[test]
    fn records_render_like_zson() {
        let ctx = TypeContext::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let rec = Value::record(
            &ctx,
            [
                ("ts", Value::time(Ts::parse("2017-08-03T14:34:40.988247Z").unwrap())),
                ("uid", Value::string("x\"y")),
                ("h", Value::ip(ip)),
                ("n", Value::null_of(Type::INT64)),
                ("f", Value::float64(2.0)),
                ("a", Value::array(&ctx, &Type::INT64, &[Value::int64(1), Value::int64(-2)]).unwrap()),
            ],
        )
        .unwrap();
        assert_eq!(
            rec.to_string(),
            r#"{ts:2017-08-03T14:34:40.988247Z,uid:"x\"y",h:10.0.0.1,n:null,f:2.0,a:[1,-2]}"#
        );
    }

    #[test]
    fn type_values_render_their_type() {
        let ctx = TypeContext::new();
        let t = ctx.lookup_array(&Type::STRING).unwrap();
        assert_eq!(Value::type_value(&t).to_string(), "<[string]>");
        assert_eq!(Value::error("boom").to_string(), "error(\"boom\")");
    }
}
