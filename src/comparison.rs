//! XPath comparison rules.
//!
//! Node-sets and JSON arrays compare existentially: the comparison holds if
//! it holds for at least one member (one pair of members when both sides
//! are sets). Node-set members compare by the value of each node.

use std::cmp::Ordering;

use serde_json::Value as Json;

use crate::errors::{EvalError, Result};
use crate::infoset::{boolean_value, double_value, string_value};
use crate::pointer::value_pointer;
use crate::value::Value;

enum Operand {
    Set(Vec<Value>),
    Single(Value),
}

fn operand(value: &Value) -> Result<Operand> {
    Ok(match value {
        Value::Context(ctx) => {
            let nodes = ctx
                .try_borrow_mut()
                .map_err(|_| EvalError::ConcurrentIteration)?
                .node_set()?;
            Operand::Set(nodes.iter().map(|p| value_pointer(p).value()).collect())
        }
        Value::Pointer(p) => {
            let target = value_pointer(p);
            if !target.is_actual() {
                Operand::Set(Vec::new())
            } else {
                single_or_array(target.value())
            }
        }
        other => single_or_array(other.clone()),
    })
}

fn single_or_array(value: Value) -> Operand {
    match value {
        Value::Object(Json::Array(items)) => Operand::Set(items.into_iter().map(Value::from).collect()),
        other => Operand::Single(other),
    }
}

fn scalar_equal(l: &Value, r: &Value, invert: bool) -> bool {
    let result = match (l, r) {
        (Value::Boolean(_), _) | (_, Value::Boolean(_)) => boolean_value(l) == boolean_value(r),
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            let (a, b) = (double_value(l), double_value(r));
            if a.is_nan() || b.is_nan() {
                return false;
            }
            a == b
        }
        _ => string_value(l) == string_value(r),
    };
    result ^ invert
}

fn compare_equality(l: &Value, r: &Value, invert: bool) -> Result<bool> {
    Ok(match (operand(l)?, operand(r)?) {
        (Operand::Set(a), Operand::Set(b)) => a
            .iter()
            .any(|x| b.iter().any(|y| scalar_equal(x, y, invert))),
        (Operand::Set(set), Operand::Single(Value::Boolean(b)))
        | (Operand::Single(Value::Boolean(b)), Operand::Set(set)) => (!set.is_empty() == b) ^ invert,
        (Operand::Set(set), Operand::Single(y)) | (Operand::Single(y), Operand::Set(set)) => {
            set.iter().any(|x| scalar_equal(x, &y, invert))
        }
        (Operand::Single(x), Operand::Single(y)) => scalar_equal(&x, &y, invert),
    })
}

pub fn equal(l: &Value, r: &Value) -> Result<bool> {
    compare_equality(l, r, false)
}

pub fn not_equal(l: &Value, r: &Value) -> Result<bool> {
    compare_equality(l, r, true)
}

/// Numeric ordering test; `pred_on_ord` receives the ordering of the left
/// operand against the right one. NaN on either side never matches.
pub fn relational<F>(l: &Value, r: &Value, pred_on_ord: F) -> Result<bool>
where
    F: Fn(Ordering) -> bool,
{
    let holds = |a: &Value, b: &Value| {
        double_value(a)
            .partial_cmp(&double_value(b))
            .is_some_and(&pred_on_ord)
    };
    Ok(match (operand(l)?, operand(r)?) {
        (Operand::Set(a), Operand::Set(b)) => a.iter().any(|x| b.iter().any(|y| holds(x, y))),
        (Operand::Set(a), Operand::Single(y)) => a.iter().any(|x| holds(x, &y)),
        (Operand::Single(x), Operand::Set(b)) => b.iter().any(|y| holds(&x, y)),
        (Operand::Single(x), Operand::Single(y)) => holds(&x, &y),
    })
}
