//! Built-in functions callable from expressions.

use std::sync::Arc;

use strata_error::{StrataResult, strata_bail};
use strata_value::{PrimitiveType, Ts, TypeContext, TypeKind, Value};

use crate::{Evaluator, ExprEvaluator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Function {
    Len,
    Lower,
    Upper,
    Trim,
    TypeOf,
    Has,
    Missing,
    Quiet,
    IsError,
    Error,
    Abs,
    Floor,
    Ceil,
    Sqrt,
    String,
    Bucket,
}

impl Function {
    fn lookup(name: &str) -> Option<(Function, usize)> {
        Some(match name {
            "len" => (Function::Len, 1),
            "lower" => (Function::Lower, 1),
            "upper" => (Function::Upper, 1),
            "trim" => (Function::Trim, 1),
            "typeof" => (Function::TypeOf, 1),
            "has" => (Function::Has, 1),
            "missing" => (Function::Missing, 1),
            "quiet" => (Function::Quiet, 1),
            "is_error" => (Function::IsError, 1),
            "error" => (Function::Error, 1),
            "abs" => (Function::Abs, 1),
            "floor" => (Function::Floor, 1),
            "ceil" => (Function::Ceil, 1),
            "sqrt" => (Function::Sqrt, 1),
            "string" => (Function::String, 1),
            "bucket" => (Function::Bucket, 2),
            _ => return None,
        })
    }
}

#[derive(Debug)]
struct Call {
    func: Function,
    args: Vec<ExprEvaluator>,
}

pub(crate) fn compile_call(
    _ctx: &TypeContext,
    name: &str,
    args: Vec<ExprEvaluator>,
) -> StrataResult<ExprEvaluator> {
    let Some((func, arity)) = Function::lookup(name) else {
        strata_bail!(Invalid: "no such function: {name}");
    };
    if args.len() != arity {
        strata_bail!(Invalid: "{name}: expected {arity} argument(s), got {}", args.len());
    }
    Ok(Arc::new(Call { func, args }))
}

impl Evaluator for Call {
    fn eval_with(&self, vars: &[Value], this: &Value) -> Value {
        let args: Vec<Value> = self.args.iter().map(|a| a.eval_with(vars, this)).collect();
        // These look at errors rather than propagating them.
        match self.func {
            Function::Missing => return Value::bool(args[0].is_missing()),
            Function::Has => return Value::bool(!args[0].is_missing()),
            Function::IsError => return Value::bool(args[0].is_error()),
            Function::Quiet if args[0].is_missing() => return Value::quiet(),
            Function::Quiet => return args[0].clone(),
            _ => {}
        }
        if let Some(err) = args.iter().find(|a| a.is_error()) {
            return err.clone();
        }
        let arg = &args[0];
        match self.func {
            Function::Len => len(arg),
            Function::Lower => map_str(arg, str::to_lowercase),
            Function::Upper => map_str(arg, str::to_uppercase),
            Function::Trim => map_str(arg, |s| s.trim().to_string()),
            Function::TypeOf => Value::type_value(arg.typ()),
            Function::Error => Value::error(&arg.to_string()),
            Function::Abs => match arg.typ().as_primitive() {
                Some(PrimitiveType::Float64) => Value::float64(arg.as_float().unwrap_or_default().abs()),
                Some(p) if p.is_unsigned() => arg.clone(),
                Some(p) if p.is_signed() => arg
                    .as_int()
                    .and_then(i64::checked_abs)
                    .map_or_else(|| Value::error("abs: overflow"), |i| Value::int_of(arg.typ().clone(), i)),
                _ => Value::error(&format!("abs: not a number: {arg}")),
            },
            Function::Floor => float_fn(arg, "floor", f64::floor),
            Function::Ceil => float_fn(arg, "ceil", f64::ceil),
            Function::Sqrt => float_fn(arg, "sqrt", f64::sqrt),
            Function::String => match arg.as_str() {
                Some(s) if arg.typ().is_primitive(PrimitiveType::String) => Value::string(s),
                _ => Value::string(&arg.to_string()),
            },
            Function::Bucket => bucket(arg, &args[1]),
            Function::Missing | Function::Has | Function::IsError | Function::Quiet => {
                Value::missing()
            }
        }
    }
}

fn len(v: &Value) -> Value {
    if v.is_null() {
        return Value::int64(0);
    }
    let n = match v.typ().kind() {
        TypeKind::Array(_) | TypeKind::Set(_) => v.elements().map(|e| e.len()),
        TypeKind::Map(..) => v.entries().map(|e| e.len()),
        TypeKind::Record(cols) => Ok(cols.len()),
        TypeKind::Primitive(PrimitiveType::String) => {
            Ok(v.as_str().map_or(0, |s| s.chars().count()))
        }
        TypeKind::Primitive(PrimitiveType::Bytes) => Ok(v.size()),
        _ => return Value::error(&format!("len: bad type: {}", v.typ())),
    };
    match n {
        Ok(n) => Value::int64(i64::try_from(n).unwrap_or(i64::MAX)),
        Err(err) => Value::error(&err.to_string()),
    }
}

fn map_str(v: &Value, f: impl Fn(&str) -> String) -> Value {
    match v.as_str() {
        Some(s) if v.typ().is_primitive(PrimitiveType::String) => Value::string(&f(s)),
        _ if v.is_null() => v.clone(),
        _ => Value::error(&format!("not a string: {v}")),
    }
}

fn float_fn(v: &Value, name: &str, f: impl Fn(f64) -> f64) -> Value {
    match v.as_float() {
        Some(x) if v.typ().as_primitive().is_some_and(PrimitiveType::is_number) => {
            Value::float64(f(x))
        }
        _ => Value::error(&format!("{name}: not a number: {v}")),
    }
}

/// Truncate a time to a multiple of a duration.
fn bucket(ts: &Value, width: &Value) -> Value {
    let (Some(t), Some(w)) = (ts.as_time(), width.as_int()) else {
        return Value::error("bucket: expected time and duration");
    };
    if w <= 0 {
        return Value::error("bucket: duration must be positive");
    }
    Value::time(Ts(t.0.div_euclid(w) * w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{call, compile, lit, path};

    #[test]
    fn string_functions() {
        let ctx = TypeContext::new();
        let e = compile(&ctx, &call("upper", vec![lit("abc")])).unwrap();
        assert_eq!(e.eval(&Value::null()), Value::string("ABC"));
        let e = compile(&ctx, &call("len", vec![lit("héllo")])).unwrap();
        assert_eq!(e.eval(&Value::null()), Value::int64(5));
    }

    #[test]
    fn missing_is_observable() {
        let ctx = TypeContext::new();
        let rec = Value::record(&ctx, [("a", Value::int64(1))]).unwrap();
        let e = compile(&ctx, &call("missing", vec![path("b")])).unwrap();
        assert!(e.eval(&rec).is_true());
        let e = compile(&ctx, &call("has", vec![path("a")])).unwrap();
        assert!(e.eval(&rec).is_true());
        let e = compile(&ctx, &call("quiet", vec![path("b")])).unwrap();
        assert!(e.eval(&rec).is_quiet());
    }

    #[test]
    fn unknown_function_and_arity() {
        let ctx = TypeContext::new();
        assert!(compile(&ctx, &call("nope", vec![])).is_err());
        assert!(compile(&ctx, &call("len", vec![])).is_err());
    }

    #[test]
    fn bucket_truncates() {
        let ctx = TypeContext::new();
        let e = compile(
            &ctx,
            &call(
                "bucket",
                vec![lit(Ts(1_500)), crate::Expr::Literal { value: crate::Literal::Duration(1_000) }],
            ),
        )
        .unwrap();
        assert_eq!(e.eval(&Value::null()), Value::time(Ts(1_000)));
    }
}
