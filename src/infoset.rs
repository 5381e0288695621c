//! XPath type coercion over the engine's value universe.
//!
//! All four conversions are total. The evaluator collapses lazy node-sets
//! before converting so that failures propagate; a lazy node-set handed in
//! directly is collapsed to its first node, and a failure to pull it is
//! logged and treated as empty.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::warn;

use crate::pipeline::EvalContext;
use crate::pointer::{value_pointer, Pointer};
use crate::value::Value;

/// The string-value of `value`.
pub fn string_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_to_string(*n),
        Value::Boolean(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Pointer(p) => string_value(&p.value()),
        Value::Context(ctx) => match single_pointer(ctx) {
            Some(p) => string_value(&Value::Pointer(p)),
            None => String::new(),
        },
        Value::Object(json) => json.to_string(),
    }
}

/// Numeric conversion used by `number()` and by arithmetic on strings.
/// Unparsable text gives NaN.
pub fn number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => parse_double(s),
        Value::Context(ctx) => match single_pointer(ctx) {
            Some(p) => number(&Value::Pointer(p)),
            None => f64::NAN,
        },
        Value::Pointer(p) => number(&p.value()),
        other => parse_double(&string_value(other)),
    }
}

/// Primitive double conversion used by comparisons, arithmetic and most
/// numeric core functions.
///
/// Diverges from [`number`] in two places: the empty string is `0.0`
/// instead of NaN, and booleans map `true -> 0.0`, `false -> 1.0`, the
/// opposite of `number`. Callers depend on both paths as they are.
// FIXME: the boolean mapping here is inverted relative to `number`; keep
// both until the intended semantics are confirmed.
pub fn double_value(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Boolean(b) => {
            if *b {
                0.0
            } else {
                1.0
            }
        }
        Value::String(s) if s.is_empty() => 0.0,
        Value::String(s) => parse_double(s),
        Value::Pointer(p) => double_value(&p.value()),
        Value::Context(ctx) => match single_pointer(ctx) {
            Some(p) => double_value(&Value::Pointer(p)),
            None => f64::NAN,
        },
        other => double_value(&Value::String(string_value(other))),
    }
}

/// XPath boolean conversion.
pub fn boolean_value(value: &Value) -> bool {
    match value {
        Value::Number(n) => !(*n == 0.0 || n.is_nan()),
        Value::Boolean(b) => *b,
        Value::Context(ctx) => match single_pointer(ctx) {
            Some(p) => boolean_value(&Value::Pointer(p)),
            None => false,
        },
        Value::String(s) => !s.is_empty(),
        Value::Pointer(p) if p.is_variable() => boolean_value(&p.value()),
        Value::Pointer(p) => value_pointer(p).is_actual(),
        Value::Object(_) => true,
        Value::Null => false,
    }
}

/// First node of a lazy node-set, or `None` when it is empty or cannot be
/// pulled.
pub(crate) fn single_pointer(ctx: &Rc<RefCell<EvalContext>>) -> Option<Pointer> {
    let Ok(mut ctx) = ctx.try_borrow_mut() else {
        warn!("evaluation context is already borrowed, treating it as empty");
        return None;
    };
    match ctx.single_node_pointer() {
        Ok(pointer) => pointer,
        Err(err) => {
            warn!(%err, "node-set coercion failed, treating it as empty");
            None
        }
    }
}

pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let word = if n > 0.0 { "Infinity" } else { "-Infinity" };
        word.to_string()
    } else if n.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&n) {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

/// Decimal parser accepting optional surrounding whitespace, a sign,
/// an exponent, and the words `NaN` / `Infinity`.
pub(crate) fn parse_double(s: &str) -> f64 {
    let t = s.trim();
    match t {
        "NaN" => return f64::NAN,
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let plausible = !t.is_empty()
        && t.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'));
    if !plausible {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}
