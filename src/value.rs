use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::infoset;
use crate::pipeline::EvalContext;
use crate::pointer::{self, Pointer};

/// The engine's value universe.
///
/// Scalars follow XPath typing, `Object` carries any other host value
/// (JSON arrays and objects), `Pointer` addresses a node, and `Context` is
/// a lazy node-set still to be pulled from an evaluation pipeline.
#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(Json),
    Pointer(Pointer),
    Context(Rc<RefCell<EvalContext>>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn context(ctx: EvalContext) -> Value {
        Value::Context(Rc::new(RefCell::new(ctx)))
    }

    /// Plain JSON form: pointers are dereferenced, lazy node-sets collapse
    /// to their first node, numbers without a fraction become integers.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::Object(json) => json.clone(),
            Value::Pointer(p) => pointer::value_pointer(p).value().to_json(),
            Value::Context(ctx) => match infoset::single_pointer(ctx) {
                Some(p) => Value::Pointer(p).to_json(),
                None => Json::Null,
            },
        }
    }
}

fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Json::Number)
            .unwrap_or(Json::Null)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Object(json) => f.debug_tuple("Object").field(json).finish(),
            Value::Pointer(p) => f.debug_tuple("Pointer").field(&p.as_path()).finish(),
            Value::Context(_) => f.write_str("Context(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Context(a), Value::Context(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s),
            other => Value::Object(other),
        }
    }
}

impl From<&Json> for Value {
    fn from(json: &Json) -> Self {
        Value::from(json.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Pointer> for Value {
    fn from(p: Pointer) -> Self {
        Value::Pointer(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn json_conversion_keeps_integers() {
        assert_eq!(Value::Number(3.0).to_json(), json!(3));
        assert_eq!(Value::Number(3.5).to_json(), json!(3.5));
        assert_eq!(Value::Number(f64::NAN).to_json(), Json::Null);
        assert_eq!(Value::from(json!({"a": [1]})).to_json(), json!({"a": [1]}));
    }

    #[test]
    fn scalars_map_to_xpath_types() {
        assert_eq!(Value::from(json!(2)), Value::Number(2.0));
        assert_eq!(Value::from(json!("x")), Value::String("x".into()));
        assert_eq!(Value::from(json!(null)), Value::Null);
        assert_eq!(Value::from(json!(true)), Value::Boolean(true));
    }
}
