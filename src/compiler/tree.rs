use std::sync::Arc;

use super::ast::{Constant, Expression, LocationPath, NodeTest, Operator, Step};
use super::{Axis, Compiler, CoreFunction, NodeType};
use crate::infoset::parse_double;
use crate::qname::QName;

/// Builds the evaluator's own expression tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeCompiler;

impl TreeCompiler {
    fn operation(op: Operator, args: Vec<Expression>) -> Expression {
        Expression::Operation {
            op,
            args: args.into_iter().map(Arc::new).collect(),
        }
    }

    fn binary(op: Operator, left: Expression, right: Expression) -> Expression {
        Self::operation(op, vec![left, right])
    }
}

impl Compiler for TreeCompiler {
    type Expr = Expression;
    type QName = QName;
    type Step = Step;
    type NodeTest = NodeTest;

    fn number(&self, text: &str) -> Expression {
        Expression::Constant(Constant::Number(parse_double(text)))
    }

    fn literal(&self, text: &str) -> Expression {
        Expression::Constant(Constant::String(text.to_string()))
    }

    fn qname(&self, prefix: Option<&str>, name: &str) -> QName {
        QName::new(prefix, name)
    }

    fn sum(&self, args: Vec<Expression>) -> Expression {
        Self::operation(Operator::Sum, args)
    }

    fn minus(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::Minus, left, right)
    }

    fn multiply(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::Multiply, left, right)
    }

    fn divide(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::Divide, left, right)
    }

    fn modulo(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::Modulo, left, right)
    }

    fn less_than(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::LessThan, left, right)
    }

    fn less_than_or_equal(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::LessThanOrEqual, left, right)
    }

    fn greater_than(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::GreaterThan, left, right)
    }

    fn greater_than_or_equal(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::GreaterThanOrEqual, left, right)
    }

    fn equal(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::Equal, left, right)
    }

    fn not_equal(&self, left: Expression, right: Expression) -> Expression {
        Self::binary(Operator::NotEqual, left, right)
    }

    fn negate(&self, arg: Expression) -> Expression {
        Self::operation(Operator::Negate, vec![arg])
    }

    fn variable_reference(&self, name: QName) -> Expression {
        Expression::Variable(name)
    }

    fn core_function(&self, function: CoreFunction, args: Vec<Expression>) -> Expression {
        Expression::CoreFunction {
            function,
            args: args.into_iter().map(Arc::new).collect(),
        }
    }

    fn function(&self, name: QName, args: Vec<Expression>) -> Expression {
        Expression::ExtensionFunction {
            name,
            args: args.into_iter().map(Arc::new).collect(),
        }
    }

    fn and(&self, args: Vec<Expression>) -> Expression {
        Self::operation(Operator::And, args)
    }

    fn or(&self, args: Vec<Expression>) -> Expression {
        Self::operation(Operator::Or, args)
    }

    fn union(&self, args: Vec<Expression>) -> Expression {
        Self::operation(Operator::Union, args)
    }

    fn node_name_test(&self, name: QName) -> NodeTest {
        NodeTest::Name(name)
    }

    fn node_type_test(&self, node_type: NodeType) -> NodeTest {
        NodeTest::Type(node_type)
    }

    fn processing_instruction_test(&self, target: &str) -> NodeTest {
        NodeTest::ProcessingInstruction(target.to_string())
    }

    fn step(&self, axis: Axis, test: NodeTest, predicates: Vec<Expression>) -> Step {
        Step {
            axis,
            test,
            predicates: predicates.into_iter().map(Arc::new).collect(),
        }
    }

    fn location_path(&self, absolute: bool, steps: Vec<Step>) -> Expression {
        Expression::LocationPath(LocationPath { absolute, steps })
    }

    fn expression_path(
        &self,
        expr: Expression,
        predicates: Vec<Expression>,
        steps: Vec<Step>,
    ) -> Expression {
        if predicates.is_empty() && steps.is_empty() {
            return expr;
        }
        Expression::ExpressionPath {
            head: Arc::new(expr),
            predicates: predicates.into_iter().map(Arc::new).collect(),
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builders_are_pure_constructors() {
        let c = TreeCompiler;
        let a = c.location_path(
            false,
            vec![c.step(Axis::Child, c.node_name_test(c.qname(None, "a")), vec![c.number("2")])],
        );
        let b = c.location_path(
            false,
            vec![c.step(Axis::Child, c.node_name_test(c.qname(None, "a")), vec![c.number("2")])],
        );
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "child::a[2]");
    }

    #[test]
    fn expression_path_without_tail_is_the_head() {
        let c = TreeCompiler;
        let v = c.variable_reference(c.qname(None, "x"));
        assert_eq!(c.expression_path(v.clone(), vec![], vec![]), v);
    }

    #[test]
    fn simple_paths() {
        let c = TreeCompiler;
        let name = |n: &str| c.node_name_test(c.qname(None, n));
        let plain = c.location_path(
            false,
            vec![
                c.step(Axis::Child, name("a"), vec![c.number("1")]),
                c.step(Axis::Attribute, name("b"), vec![]),
            ],
        );
        assert!(plain.is_simple_path());

        let filtered = c.location_path(
            false,
            vec![c.step(
                Axis::Child,
                name("a"),
                vec![c.equal(
                    c.location_path(false, vec![c.step(Axis::Child, name("b"), vec![])]),
                    c.literal("x"),
                )],
            )],
        );
        assert!(!filtered.is_simple_path());

        let wildcard = c.location_path(false, vec![c.step(Axis::Child, name("*"), vec![])]);
        assert!(!wildcard.is_simple_path());
    }
}
