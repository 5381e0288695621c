use std::fmt;
use std::sync::Arc;

use super::{Axis, CoreFunction, NodeType};
use crate::infoset::number_to_string;
use crate::qname::QName;

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Number(f64),
    String(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Sum,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Negate,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Union,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Sum => "+",
            Operator::Minus | Operator::Negate => "-",
            Operator::Multiply => "*",
            Operator::Divide => "div",
            Operator::Modulo => "mod",
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Union => "|",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeTest {
    /// Name test; a local name of `*` is a wildcard.
    Name(QName),
    Type(NodeType),
    ProcessingInstruction(String),
}

impl NodeTest {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, NodeTest::Name(name) if name.local_name() == "*")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Arc<Expression>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocationPath {
    pub absolute: bool,
    pub steps: Vec<Step>,
}

/// Compiled expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Constant(Constant),
    Operation {
        op: Operator,
        args: Vec<Arc<Expression>>,
    },
    Variable(QName),
    CoreFunction {
        function: CoreFunction,
        args: Vec<Arc<Expression>>,
    },
    ExtensionFunction {
        name: QName,
        args: Vec<Arc<Expression>>,
    },
    LocationPath(LocationPath),
    ExpressionPath {
        head: Arc<Expression>,
        predicates: Vec<Arc<Expression>>,
        steps: Vec<Step>,
    },
}

impl Expression {
    /// Whether the value depends on the context node, position or size.
    pub fn is_context_dependent(&self) -> bool {
        match self {
            Expression::Constant(_) | Expression::Variable(_) => false,
            Expression::Operation { args, .. } => args.iter().any(|a| a.is_context_dependent()),
            Expression::CoreFunction { function, args } => match function {
                CoreFunction::Last | CoreFunction::Position | CoreFunction::Lang => true,
                CoreFunction::Boolean
                | CoreFunction::LocalName
                | CoreFunction::Name
                | CoreFunction::NamespaceUri
                | CoreFunction::String
                | CoreFunction::StringLength
                | CoreFunction::Number
                    if args.is_empty() =>
                {
                    true
                }
                CoreFunction::FormatNumber if args.len() == 2 => true,
                _ => args.iter().any(|a| a.is_context_dependent()),
            },
            Expression::ExtensionFunction { .. } => true,
            Expression::LocationPath(path) => !path.absolute || path.has_dependent_predicates(),
            Expression::ExpressionPath {
                head,
                predicates,
                steps,
            } => {
                head.is_context_dependent()
                    || predicates.iter().any(|p| p.is_context_dependent())
                    || steps
                        .iter()
                        .flat_map(|s| s.predicates.iter())
                        .any(|p| p.is_context_dependent())
            }
        }
    }

    /// Whether the expression can be used to create nodes: a location path
    /// (or a path rooted at a variable) made of child/attribute name steps
    /// with context-independent predicates.
    pub fn is_simple_path(&self) -> bool {
        match self {
            Expression::LocationPath(path) => path.is_simple(),
            Expression::ExpressionPath {
                head,
                predicates,
                steps,
            } => {
                matches!(head.as_ref(), Expression::Variable(_))
                    && predicates.is_empty()
                    && steps.iter().all(Step::is_simple)
            }
            Expression::Variable(_) => true,
            _ => false,
        }
    }
}

impl LocationPath {
    fn has_dependent_predicates(&self) -> bool {
        self.steps
            .iter()
            .flat_map(|s| s.predicates.iter())
            .any(|p| p.is_context_dependent())
    }

    pub fn is_simple(&self) -> bool {
        self.steps.iter().all(Step::is_simple)
    }
}

impl Step {
    pub fn is_simple(&self) -> bool {
        let shape = match (&self.axis, &self.test) {
            (Axis::Child | Axis::Attribute, test @ NodeTest::Name(_)) => !test.is_wildcard(),
            (Axis::Self_, NodeTest::Type(NodeType::Node)) => self.predicates.is_empty(),
            _ => false,
        };
        shape && self.predicates.len() <= 1 && !self.predicates.iter().any(|p| p.is_context_dependent())
    }
}

fn write_predicates(f: &mut fmt::Formatter<'_>, predicates: &[Arc<Expression>]) -> fmt::Result {
    for p in predicates {
        write!(f, "[{p}]")?;
    }
    Ok(())
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Arc<Expression>]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTest::Name(name) => write!(f, "{name}"),
            NodeTest::Type(t) => write!(f, "{}()", t.name()),
            NodeTest::ProcessingInstruction(target) => {
                write!(f, "processing-instruction('{target}')")
            }
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.axis.name(), self.test)?;
        write_predicates(f, &self.predicates)
    }
}

fn write_steps(f: &mut fmt::Formatter<'_>, steps: &[Step]) -> fmt::Result {
    for step in steps {
        write!(f, "/{step}")?;
    }
    Ok(())
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant(Constant::Number(n)) => f.write_str(&number_to_string(*n)),
            Expression::Constant(Constant::String(s)) if s.contains('\'') && s.contains('"') => {
                // No literal can hold both quote kinds.
                let mut parts = Vec::new();
                for (i, piece) in s.split('\'').enumerate() {
                    if i > 0 {
                        parts.push("\"'\"".to_string());
                    }
                    if !piece.is_empty() {
                        parts.push(format!("'{piece}'"));
                    }
                }
                write!(f, "concat({})", parts.join(", "))
            }
            Expression::Constant(Constant::String(s)) if s.contains('\'') => write!(f, "\"{s}\""),
            Expression::Constant(Constant::String(s)) => write!(f, "'{s}'"),
            Expression::Operation { op: Operator::Negate, args } => {
                f.write_str("-")?;
                write_args(f, args)
            }
            Expression::Operation { op, args } => {
                f.write_str("(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", op.symbol())?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            Expression::Variable(name) => write!(f, "${name}"),
            Expression::CoreFunction { function, args } => {
                write!(f, "{}(", function.name())?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Expression::ExtensionFunction { name, args } => {
                write!(f, "{name}(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Expression::LocationPath(path) => {
                if path.steps.is_empty() {
                    return f.write_str(if path.absolute { "/" } else { "." });
                }
                for (i, step) in path.steps.iter().enumerate() {
                    if i > 0 || path.absolute {
                        f.write_str("/")?;
                    }
                    write!(f, "{step}")?;
                }
                Ok(())
            }
            Expression::ExpressionPath {
                head,
                predicates,
                steps,
            } => {
                write!(f, "({head})")?;
                write_predicates(f, predicates)?;
                write_steps(f, steps)
            }
        }
    }
}
