//! Extension functions installed by [`FunctionLibrary::with_builtins`](super::FunctionLibrary::with_builtins).

use std::ops::RangeInclusive;

use itertools::Itertools;
use serde_json::Value as Json;

use super::{CallContext, Function};
use crate::errors::{EvalError, Result};
use crate::expression::collapse;
use crate::infoset::{boolean_value, string_value};
use crate::pointer::value_pointer;
use crate::value::Value;

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

fn text(args: &[Value], i: usize) -> Result<String> {
    Ok(string_value(&collapse(arg(args, i))?))
}

/// JSON form of every member of a node-set or array argument.
fn members(value: &Value) -> Result<Vec<Json>> {
    Ok(match value {
        Value::Context(ctx) => ctx
            .try_borrow_mut()
            .map_err(|_| EvalError::ConcurrentIteration)?
            .node_set()?
            .iter()
            .map(|p| value_pointer(p).value().to_json())
            .collect(),
        Value::Pointer(p) => match value_pointer(p).value() {
            Value::Object(Json::Array(items)) => items,
            Value::Null => Vec::new(),
            other => vec![other.to_json()],
        },
        Value::Object(Json::Array(items)) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.to_json()],
    })
}

pub struct LowerCase;
impl Function for LowerCase {
    fn name(&self) -> &str { "lower-case" }
    fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
    fn invoke(&self, _: &CallContext<'_>, args: &[Value]) -> Result<Value> {
        Ok(Value::String(text(args, 0)?.to_lowercase()))
    }
}

pub struct UpperCase;
impl Function for UpperCase {
    fn name(&self) -> &str { "upper-case" }
    fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
    fn invoke(&self, _: &CallContext<'_>, args: &[Value]) -> Result<Value> {
        Ok(Value::String(text(args, 0)?.to_uppercase()))
    }
}

/// Members of a node-set or array with duplicates removed, as a JSON array.
pub struct DistinctValues;
impl Function for DistinctValues {
    fn name(&self) -> &str { "distinct-values" }
    fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
    fn invoke(&self, _: &CallContext<'_>, args: &[Value]) -> Result<Value> {
        let items = members(&arg(args, 0))?;
        Ok(Value::Object(Json::Array(
            items.into_iter().unique_by(|j| j.to_string()).collect(),
        )))
    }
}

/// First argument unless it is empty, otherwise the second.
pub struct OrDefault;
impl Function for OrDefault {
    fn name(&self) -> &str { "or-default" }
    fn arity(&self) -> RangeInclusive<usize> { 2..=2 }
    fn invoke(&self, _: &CallContext<'_>, args: &[Value]) -> Result<Value> {
        let first = collapse(arg(args, 0))?;
        let present = match &first {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            other => boolean_value(other),
        };
        let chosen = if present { first } else { arg(args, 1) };
        Ok(match chosen {
            Value::Pointer(p) => value_pointer(&p).value(),
            other => other,
        })
    }
}

/// Parse a JSON text into a value.
pub struct FromJson;
impl Function for FromJson {
    fn name(&self) -> &str { "from-json" }
    fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
    fn invoke(&self, _: &CallContext<'_>, args: &[Value]) -> Result<Value> {
        let source = text(args, 0)?;
        Ok(Value::from(serde_json::from_str::<Json>(&source)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PathContext;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn call(f: &dyn Function, args: &[Value]) -> Value {
        let context = PathContext::new(json!({}));
        let ctx = CallContext {
            context: &context,
            node: None,
            position: 0,
        };
        f.invoke(&ctx, args).unwrap()
    }

    #[test]
    fn case_mapping() {
        assert_eq!(call(&LowerCase, &["AbC".into()]), Value::from("abc"));
        assert_eq!(call(&UpperCase, &[Value::Number(1.5)]), Value::from("1.5"));
    }

    #[test]
    fn distinct_values_keeps_first_occurrences() {
        let out = call(&DistinctValues, &[Value::Object(json!([1, "1", 1, {"a": 2}, {"a": 2}]))]);
        assert_eq!(out.to_json(), json!([1, "1", {"a": 2}]));
    }

    #[test]
    fn or_default_falls_back_on_empty() {
        assert_eq!(call(&OrDefault, &[Value::Null, "d".into()]), Value::from("d"));
        assert_eq!(call(&OrDefault, &["".into(), "d".into()]), Value::from("d"));
        assert_eq!(call(&OrDefault, &["x".into(), "d".into()]), Value::from("x"));
    }

    #[test]
    fn from_json_parses_text() {
        assert_eq!(call(&FromJson, &[r#"{"a":[1]}"#.into()]), Value::Object(json!({"a": [1]})));
        let context = PathContext::new(json!({}));
        let ctx = CallContext {
            context: &context,
            node: None,
            position: 0,
        };
        assert!(FromJson.invoke(&ctx, &["{".into()]).is_err());
    }
}
