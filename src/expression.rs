//! Evaluation of compiled expressions against a pipeline stage.
//!
//! `compute` keeps node-sets lazy (a path yields a [`Value::Context`], a
//! variable yields its pointer). `compute_value` collapses them: a path
//! becomes its first node, a variable becomes its raw value.

use std::rc::Rc;
use std::sync::Arc;

use itertools::Itertools;
use serde_json::Value as Json;

use crate::comparison;
use crate::compiler::ast::{Constant, Expression, LocationPath, Operator, Step};
use crate::errors::{EvalError, Result};
use crate::functions::{self, CallContext};
use crate::infoset::{boolean_value, double_value};
use crate::pipeline::{sort_in_document_order, DocumentOrder, EvalContext, RootContext};
use crate::pointer::{value_pointer, Pointer};
use crate::value::Value;

/// Lazily produced values of an expression.
pub type Values = Box<dyn Iterator<Item = Result<Value>>>;

/// Lazily produced nodes of an expression.
pub type PointerIter = Box<dyn Iterator<Item = Result<Pointer>>>;

impl Expression {
    pub fn compute(&self, ctx: &mut EvalContext) -> Result<Value> {
        match self {
            Expression::Variable(name) => Ok(Value::Pointer(
                ctx.root_context().path_context().variable_pointer(name),
            )),
            Expression::LocationPath(path) => Ok(Value::context(path.pipeline(ctx)?)),
            Expression::ExpressionPath {
                head,
                predicates,
                steps,
            } => Ok(Value::context(expression_path(head, predicates, steps, ctx)?)),
            _ => self.compute_value(ctx),
        }
    }

    pub fn compute_value(&self, ctx: &mut EvalContext) -> Result<Value> {
        match self {
            Expression::Constant(Constant::Number(n)) => Ok(Value::Number(*n)),
            Expression::Constant(Constant::String(s)) => Ok(Value::String(s.clone())),
            Expression::Variable(name) => {
                ctx.root_context().path_context().variable_value(name)
            }
            Expression::LocationPath(path) => first_node(path.pipeline(ctx)?),
            Expression::ExpressionPath {
                head,
                predicates,
                steps,
            } => first_node(expression_path(head, predicates, steps, ctx)?),
            Expression::Operation { op, args } => operation(*op, args, ctx),
            Expression::CoreFunction { function, args } => functions::core::call(*function, args, ctx),
            Expression::ExtensionFunction { name, args } => {
                let root = ctx.root_context();
                let function = root.path_context().function(name, args.len())?;
                let values: Vec<Value> = args
                    .iter()
                    .map(|arg| arg.compute(ctx))
                    .collect::<Result<_>>()?;
                let call = CallContext {
                    context: root.path_context(),
                    node: ctx.current_pointer()?,
                    position: ctx.current_position(),
                };
                function.invoke(&call, &values)
            }
        }
    }

    /// Every value the expression produces; JSON arrays are expanded.
    pub fn iterate(&self, ctx: &mut EvalContext) -> Result<Values> {
        match self.compute(ctx)? {
            Value::Context(shared) => {
                let pipeline = EvalContext::from_shared(shared)?;
                Ok(Box::new(pipeline.map(|p| p.map(|p| value_pointer(&p).value()))))
            }
            Value::Pointer(p) => Ok(expand(value_pointer(&p).value())),
            other => Ok(expand(other)),
        }
    }

    /// Every node the expression addresses. Non-node values are wrapped in
    /// pointers through the factory registry.
    pub fn iterate_pointers(&self, ctx: &mut EvalContext) -> Result<PointerIter> {
        match self.compute(ctx)? {
            Value::Context(shared) => Ok(Box::new(EvalContext::from_shared(shared)?)),
            Value::Pointer(p) => Ok(Box::new(std::iter::once(Ok(p)))),
            Value::Null => Ok(Box::new(std::iter::empty())),
            other => {
                let pointer = ctx.root_context().path_context().wrap_value(other)?;
                Ok(Box::new(std::iter::once(Ok(pointer))))
            }
        }
    }
}

fn expand(value: Value) -> Values {
    match value {
        Value::Object(Json::Array(items)) => Box::new(items.into_iter().map(|v| Ok(Value::from(v)))),
        other => Box::new(std::iter::once(Ok(other))),
    }
}

/// Collapse a lazy node-set to its first node (or `Null`). Failures while
/// pulling that node propagate; the coercions in `infoset` cannot report
/// them.
pub(crate) fn collapse(value: Value) -> Result<Value> {
    match value {
        Value::Context(shared) => {
            let first = shared
                .try_borrow_mut()
                .map_err(|_| EvalError::ConcurrentIteration)?
                .single_node_pointer()?;
            Ok(first.map_or(Value::Null, Value::Pointer))
        }
        other => Ok(other),
    }
}

fn first_node(mut pipeline: EvalContext) -> Result<Value> {
    Ok(match pipeline.single_node_pointer()? {
        Some(p) => Value::Pointer(p),
        None => Value::Null,
    })
}

impl LocationPath {
    /// Chain one stage per step onto a start stage. Relative paths start at
    /// the current node of `ctx`, absolute ones at the document root.
    pub(crate) fn pipeline(&self, ctx: &mut EvalContext) -> Result<EvalContext> {
        let root = ctx.root_context();
        let start = if self.absolute {
            Some(root.absolute_root_pointer())
        } else {
            ctx.current_pointer()?
        };
        let head = match start {
            Some(start) => EvalContext::initial(root, start),
            None => EvalContext::from_pointers(root, Vec::new(), DocumentOrder::Unordered),
        };
        Ok(chain_steps(head, &self.steps))
    }
}

fn chain_steps(mut ctx: EvalContext, steps: &[Step]) -> EvalContext {
    for step in steps {
        ctx = EvalContext::axis(ctx, step.axis, step.test.clone());
        for predicate in &step.predicates {
            ctx = EvalContext::predicate(ctx, predicate.clone());
        }
    }
    ctx
}

fn expression_path(
    head: &Expression,
    predicates: &[Arc<Expression>],
    steps: &[Step],
    ctx: &mut EvalContext,
) -> Result<EvalContext> {
    let root = ctx.root_context();
    let mut pipeline = start_stage(root, head.compute(ctx)?)?;
    for predicate in predicates {
        pipeline = EvalContext::predicate(pipeline, predicate.clone());
    }
    Ok(chain_steps(pipeline, steps))
}

/// Turn the value of a filter expression into the first stage of a path.
/// A node-set head becomes a single set in document order, so predicates
/// count positions across all of it.
fn start_stage(root: Rc<RootContext>, value: Value) -> Result<EvalContext> {
    Ok(match value {
        Value::Context(shared) => {
            let mut head = EvalContext::from_shared(shared)?;
            let nodes = sort_in_document_order(head.node_set()?, DocumentOrder::Ascending)?;
            EvalContext::from_pointers(root, nodes, DocumentOrder::Ascending)
        }
        Value::Pointer(p) => EvalContext::initial(root, p),
        Value::Null => EvalContext::from_pointers(root, Vec::new(), DocumentOrder::Unordered),
        other => {
            let pointer = root.path_context().wrap_value(other)?;
            EvalContext::initial(root, pointer)
        }
    })
}

fn operation(op: Operator, args: &[Arc<Expression>], ctx: &mut EvalContext) -> Result<Value> {
    match op {
        Operator::And => {
            for arg in args {
                if !boolean_value(&collapse(arg.compute(ctx)?)?) {
                    return Ok(Value::Boolean(false));
                }
            }
            Ok(Value::Boolean(true))
        }
        Operator::Or => {
            for arg in args {
                if boolean_value(&collapse(arg.compute(ctx)?)?) {
                    return Ok(Value::Boolean(true));
                }
            }
            Ok(Value::Boolean(false))
        }
        Operator::Union => union(args, ctx),
        Operator::Negate => {
            let arg = args.first().ok_or_else(|| EvalError::evaluation("negation needs an operand"))?;
            Ok(Value::Number(-double_value(&collapse(arg.compute_value(ctx)?)?)))
        }
        Operator::Sum => {
            let mut total = 0.0;
            for arg in args {
                total += double_value(&collapse(arg.compute_value(ctx)?)?);
            }
            Ok(Value::Number(total))
        }
        _ => {
            let [left, right] = args else {
                return Err(EvalError::evaluation(format!(
                    "binary operation expects 2 operands, got {}",
                    args.len()
                )));
            };
            let l = left.compute(ctx)?;
            let r = right.compute(ctx)?;
            binary(op, l, r)
        }
    }
}

fn binary(op: Operator, l: Value, r: Value) -> Result<Value> {
    Ok(match op {
        Operator::Minus | Operator::Multiply | Operator::Divide | Operator::Modulo => {
            let (a, b) = (double_value(&collapse(l)?), double_value(&collapse(r)?));
            Value::Number(match op {
                Operator::Minus => a - b,
                Operator::Multiply => a * b,
                Operator::Divide => a / b,
                _ => a % b,
            })
        }
        Operator::Equal => Value::Boolean(comparison::equal(&l, &r)?),
        Operator::NotEqual => Value::Boolean(comparison::not_equal(&l, &r)?),
        Operator::LessThan => Value::Boolean(comparison::relational(&l, &r, |o| o.is_lt())?),
        Operator::LessThanOrEqual => Value::Boolean(comparison::relational(&l, &r, |o| o.is_le())?),
        Operator::GreaterThan => Value::Boolean(comparison::relational(&l, &r, |o| o.is_gt())?),
        Operator::GreaterThanOrEqual => {
            Value::Boolean(comparison::relational(&l, &r, |o| o.is_ge())?)
        }
        other => {
            return Err(EvalError::evaluation(format!(
                "'{other:?}' is not a binary operator"
            )))
        }
    })
}

fn union(args: &[Arc<Expression>], ctx: &mut EvalContext) -> Result<Value> {
    let root = ctx.root_context();
    let mut nodes = Vec::new();
    for arg in args {
        match arg.compute(ctx)? {
            Value::Context(shared) => {
                let mut pipeline = EvalContext::from_shared(shared)?;
                nodes.extend(pipeline.node_set()?);
            }
            Value::Pointer(p) => nodes.push(p),
            Value::Null => {}
            other => {
                return Err(EvalError::evaluation(format!(
                    "union operands must be node-sets, found {other:?}"
                )))
            }
        }
    }
    let nodes = sort_in_document_order(nodes.into_iter().unique().collect(), DocumentOrder::Ascending)?;
    Ok(Value::context(EvalContext::from_pointers(
        root,
        nodes,
        DocumentOrder::Ascending,
    )))
}
