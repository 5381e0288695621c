//! The XPath core function library.

use std::ops::RangeInclusive;
use std::sync::Arc;

use itertools::Itertools;
use serde_json::Value as Json;

use super::format::{format_number, DecimalSymbols};
use crate::compiler::ast::Expression;
use crate::compiler::CoreFunction;
use crate::errors::{EvalError, Result};
use crate::expression::collapse;
use crate::infoset::{boolean_value, double_value, number, string_value};
use crate::pipeline::{DocumentOrder, EvalContext};
use crate::pointer::{value_pointer, Pointer};
use crate::value::Value;

fn check_arity(function: CoreFunction, args: &[Arc<Expression>], arity: RangeInclusive<usize>) -> Result<()> {
    if arity.contains(&args.len()) {
        Ok(())
    } else {
        Err(EvalError::InvalidArguments(format!(
            "Incorrect number of arguments: {}()",
            function.name()
        )))
    }
}

fn arity(function: CoreFunction) -> RangeInclusive<usize> {
    use CoreFunction::*;
    match function {
        Last | Position | True | False | Null => 0..=0,
        LocalName | Name | NamespaceUri | String | StringLength | Number => 0..=1,
        Count | Id | Boolean | Not | Lang | Sum | Floor | Ceiling | Round | NormalizeSpace => 1..=1,
        Concat => 2..=usize::MAX,
        StartsWith | EndsWith | Contains | SubstringBefore | SubstringAfter | Key => 2..=2,
        Substring | FormatNumber => 2..=3,
        Translate => 3..=3,
    }
}

pub(crate) fn call(function: CoreFunction, args: &[Arc<Expression>], ctx: &mut EvalContext) -> Result<Value> {
    check_arity(function, args, arity(function))?;
    let string_arg = |i: usize, ctx: &mut EvalContext| -> Result<String> {
        Ok(string_value(&collapse(args[i].compute(ctx)?)?))
    };
    Ok(match function {
        CoreFunction::Last => Value::Number(ctx.context_node_list()?.len() as f64),
        CoreFunction::Position => Value::Number(ctx.current_position() as f64),
        CoreFunction::Count => Value::Number(count(args[0].compute(ctx)?)? as f64),
        CoreFunction::Id => {
            let id = string_arg(0, ctx)?;
            let root = ctx.root_context();
            match root.path_context().pointer_by_id(&id)? {
                Some(p) => Value::Pointer(p),
                None => Value::Null,
            }
        }
        CoreFunction::Key => key(args, ctx)?,
        CoreFunction::LocalName | CoreFunction::Name | CoreFunction::NamespaceUri => {
            let node = match args.first() {
                Some(arg) => first_pointer(arg.compute(ctx)?)?,
                None => ctx.current_pointer()?,
            };
            let text = match node {
                None => String::new(),
                Some(p) => match function {
                    CoreFunction::LocalName => p.name().local_name().to_string(),
                    CoreFunction::Name => p.name().qualified().to_string(),
                    _ => p.namespace_uri().unwrap_or_default(),
                },
            };
            Value::String(text)
        }
        CoreFunction::String => match args.first() {
            Some(arg) => Value::String(string_value(&collapse(arg.compute(ctx)?)?)),
            None => Value::String(current_value(ctx, string_value)?),
        },
        CoreFunction::Concat => {
            let mut out = String::new();
            for i in 0..args.len() {
                out.push_str(&string_arg(i, ctx)?);
            }
            Value::String(out)
        }
        CoreFunction::StartsWith => {
            let (s, t) = (string_arg(0, ctx)?, string_arg(1, ctx)?);
            Value::Boolean(s.starts_with(&t))
        }
        CoreFunction::EndsWith => {
            let (s, t) = (string_arg(0, ctx)?, string_arg(1, ctx)?);
            Value::Boolean(s.ends_with(&t))
        }
        CoreFunction::Contains => {
            let (s, t) = (string_arg(0, ctx)?, string_arg(1, ctx)?);
            Value::Boolean(s.contains(&t))
        }
        CoreFunction::SubstringBefore => {
            let (s, t) = (string_arg(0, ctx)?, string_arg(1, ctx)?);
            Value::String(s.find(&t).map(|i| s[..i].to_string()).unwrap_or_default())
        }
        CoreFunction::SubstringAfter => {
            let (s, t) = (string_arg(0, ctx)?, string_arg(1, ctx)?);
            Value::String(
                s.find(&t)
                    .map(|i| s[i + t.len()..].to_string())
                    .unwrap_or_default(),
            )
        }
        CoreFunction::Substring => {
            let s = string_arg(0, ctx)?;
            let from = double_value(&collapse(args[1].compute_value(ctx)?)?);
            let length = match args.get(2) {
                Some(arg) => Some(double_value(&collapse(arg.compute_value(ctx)?)?)),
                None => None,
            };
            Value::String(substring(&s, from, length))
        }
        CoreFunction::StringLength => {
            let s = match args.first() {
                Some(arg) => string_value(&collapse(arg.compute(ctx)?)?),
                None => current_value(ctx, string_value)?,
            };
            Value::Number(s.chars().count() as f64)
        }
        CoreFunction::NormalizeSpace => {
            Value::String(string_arg(0, ctx)?.split_whitespace().join(" "))
        }
        CoreFunction::Translate => {
            let s = string_arg(0, ctx)?;
            let from: Vec<char> = string_arg(1, ctx)?.chars().collect();
            let to: Vec<char> = string_arg(2, ctx)?.chars().collect();
            Value::String(
                s.chars()
                    .filter_map(|c| match from.iter().position(|f| *f == c) {
                        Some(i) => to.get(i).copied(),
                        None => Some(c),
                    })
                    .collect(),
            )
        }
        CoreFunction::Boolean => Value::Boolean(boolean_value(&collapse(args[0].compute(ctx)?)?)),
        CoreFunction::Not => Value::Boolean(!boolean_value(&collapse(args[0].compute(ctx)?)?)),
        CoreFunction::True => Value::Boolean(true),
        CoreFunction::False => Value::Boolean(false),
        CoreFunction::Null => Value::Null,
        CoreFunction::Lang => {
            let wanted = string_arg(0, ctx)?.to_uppercase();
            let root = ctx.root_context();
            let matched = ctx.current_pointer()?.is_some_and(|p| {
                let language = p
                    .language()
                    .unwrap_or_else(|| root.path_context().locale().replace('_', "-"));
                language.to_uppercase().starts_with(&wanted)
            });
            Value::Boolean(matched)
        }
        CoreFunction::Number => match args.first() {
            Some(arg) => Value::Number(number(&collapse(arg.compute(ctx)?)?)),
            None => Value::Number(current_value(ctx, number)?),
        },
        CoreFunction::Sum => Value::Number(sum(args[0].compute(ctx)?)?),
        CoreFunction::Floor => Value::Number(double_value(&collapse(args[0].compute_value(ctx)?)?).floor()),
        CoreFunction::Ceiling => Value::Number(double_value(&collapse(args[0].compute_value(ctx)?)?).ceil()),
        CoreFunction::Round => Value::Number(round(double_value(&collapse(args[0].compute_value(ctx)?)?))),
        CoreFunction::FormatNumber => {
            let value = double_value(&collapse(args[0].compute_value(ctx)?)?);
            let pattern = string_arg(1, ctx)?;
            let root = ctx.root_context();
            let facade = root.path_context();
            let symbols = match args.get(2) {
                Some(arg) => {
                    let name = string_value(&collapse(arg.compute_value(ctx)?)?);
                    facade.decimal_format_symbols(&name).ok_or_else(|| {
                        EvalError::evaluation(format!("unknown decimal format '{name}'"))
                    })?
                }
                None => facade
                    .decimal_format_symbols("")
                    .unwrap_or_else(|| DecimalSymbols::for_locale(&facade.locale())),
            };
            Value::String(format_number(value, &pattern, &symbols)?)
        }
    })
}

fn current_value<T>(ctx: &mut EvalContext, convert: fn(&Value) -> T) -> Result<T> {
    let value = match ctx.current_pointer()? {
        Some(p) => Value::Pointer(p),
        None => Value::Null,
    };
    Ok(convert(&value))
}

fn first_pointer(value: Value) -> Result<Option<Pointer>> {
    Ok(match collapse(value)? {
        Value::Pointer(p) => Some(p),
        _ => None,
    })
}

fn count(value: Value) -> Result<usize> {
    Ok(match value {
        Value::Context(shared) => {
            let mut pipeline = EvalContext::from_shared(shared)?;
            pipeline.try_fold(0, |n, node| node.map(|_| n + 1))?
        }
        Value::Pointer(p) => {
            let target = value_pointer(&p);
            match target.value() {
                Value::Object(Json::Array(items)) => items.len(),
                _ if !target.is_actual() => 0,
                _ => 1,
            }
        }
        Value::Object(Json::Array(items)) => items.len(),
        Value::Null => 0,
        _ => 1,
    })
}

fn sum(value: Value) -> Result<f64> {
    let items = match value {
        Value::Context(shared) => EvalContext::from_shared(shared)?
            .map(|p| p.map(|p| value_pointer(&p).value()))
            .collect::<Result<Vec<_>>>()?,
        Value::Pointer(p) => match value_pointer(&p).value() {
            Value::Object(Json::Array(items)) => items.into_iter().map(Value::from).collect(),
            _ => return Err(invalid_sum()),
        },
        Value::Object(Json::Array(items)) => items.into_iter().map(Value::from).collect(),
        _ => return Err(invalid_sum()),
    };
    Ok(items.iter().map(double_value).sum())
}

fn invalid_sum() -> EvalError {
    EvalError::evaluation("invalid argument type for 'sum'")
}

fn key(args: &[Arc<Expression>], ctx: &mut EvalContext) -> Result<Value> {
    let name = string_value(&collapse(args[0].compute_value(ctx)?)?);
    let root = ctx.root_context();
    let facade = root.path_context();
    let mut nodes = Vec::new();
    match args[1].compute(ctx)? {
        Value::Context(shared) => {
            for node in EvalContext::from_shared(shared)? {
                let text = string_value(&Value::Pointer(node?));
                nodes.extend(facade.node_set_by_key(&name, &Value::String(text))?);
            }
        }
        other => nodes.extend(facade.node_set_by_key(&name, &other)?),
    }
    let nodes = nodes.into_iter().unique().collect();
    Ok(Value::context(EvalContext::from_pointers(
        root.clone(),
        nodes,
        DocumentOrder::Unordered,
    )))
}

/// Half-up rounding; NaN and infinities are returned as they are.
fn round(v: f64) -> f64 {
    if v.is_nan() || v.is_infinite() {
        v
    } else {
        (v + 0.5).floor()
    }
}

/// XPath `substring` on characters, 1-based, with rounded bounds.
fn substring(s: &str, from: f64, length: Option<f64>) -> String {
    if from.is_nan() {
        return String::new();
    }
    let chars: Vec<char> = s.chars().collect();
    let size = chars.len() as f64;
    let mut from = round(from);
    if from > size + 1.0 {
        return String::new();
    }
    let tail = |from: f64| -> String { chars[(from.max(1.0) as usize - 1).min(chars.len())..].iter().collect() };
    let Some(length) = length else {
        return tail(from);
    };
    let length = if length.is_nan() { 0.0 } else { round(length) };
    if length < 0.0 {
        return String::new();
    }
    let to = from + length;
    if to < 1.0 {
        return String::new();
    }
    if to > size + 1.0 {
        return tail(from);
    }
    from = from.max(1.0);
    chars[from as usize - 1..(to as usize - 1).max(from as usize - 1)]
        .iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn substring_follows_rounding_rules() {
        assert_eq!(substring("12345", 2.0, Some(3.0)), "234");
        assert_eq!(substring("12345", 1.5, Some(2.6)), "234");
        assert_eq!(substring("12345", 0.0, Some(3.0)), "12");
        assert_eq!(substring("12345", f64::NAN, Some(3.0)), "");
        assert_eq!(substring("12345", 1.0, Some(f64::NAN)), "");
        assert_eq!(substring("12345", -42.0, Some(f64::INFINITY)), "12345");
        assert_eq!(substring("12345", 2.0, None), "2345");
        assert_eq!(substring("12345", 7.0, None), "");
        assert_eq!(substring("héllo", 2.0, Some(2.0)), "él");
    }

    #[test]
    fn round_is_half_up() {
        assert_eq!(round(2.5), 3.0);
        assert_eq!(round(-2.5), -2.0);
        assert!(round(f64::NAN).is_nan());
        assert_eq!(round(f64::NEG_INFINITY), f64::NEG_INFINITY);
    }

    #[test]
    fn arities() {
        assert!(arity(CoreFunction::Concat).contains(&5));
        assert_eq!(arity(CoreFunction::Translate), 3..=3);
        assert_eq!(arity(CoreFunction::Substring), 2..=3);
    }
}
