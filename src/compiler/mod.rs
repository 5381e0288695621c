//! The expression-construction protocol.
//!
//! A grammar front-end (see [`crate::parser`]) drives a [`Compiler`] to
//! build opaque expression, name, step and node-test values. Builders are
//! pure constructors; nothing is evaluated here.

pub mod ast;
pub mod tree;

pub use tree::TreeCompiler;

pub trait Compiler {
    type Expr;
    type QName;
    type Step;
    type NodeTest;

    fn number(&self, text: &str) -> Self::Expr;
    fn literal(&self, text: &str) -> Self::Expr;
    fn qname(&self, prefix: Option<&str>, name: &str) -> Self::QName;

    fn sum(&self, args: Vec<Self::Expr>) -> Self::Expr;
    fn minus(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn multiply(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn divide(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn modulo(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn less_than(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn less_than_or_equal(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn greater_than(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn greater_than_or_equal(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn equal(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn not_equal(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;
    fn negate(&self, arg: Self::Expr) -> Self::Expr;

    fn variable_reference(&self, name: Self::QName) -> Self::Expr;
    fn core_function(&self, function: CoreFunction, args: Vec<Self::Expr>) -> Self::Expr;
    fn function(&self, name: Self::QName, args: Vec<Self::Expr>) -> Self::Expr;

    fn and(&self, args: Vec<Self::Expr>) -> Self::Expr;
    fn or(&self, args: Vec<Self::Expr>) -> Self::Expr;
    fn union(&self, args: Vec<Self::Expr>) -> Self::Expr;

    fn node_name_test(&self, name: Self::QName) -> Self::NodeTest;
    fn node_type_test(&self, node_type: NodeType) -> Self::NodeTest;
    fn processing_instruction_test(&self, target: &str) -> Self::NodeTest;

    fn step(&self, axis: Axis, test: Self::NodeTest, predicates: Vec<Self::Expr>) -> Self::Step;
    fn location_path(&self, absolute: bool, steps: Vec<Self::Step>) -> Self::Expr;
    fn expression_path(
        &self,
        expr: Self::Expr,
        predicates: Vec<Self::Expr>,
        steps: Vec<Self::Step>,
    ) -> Self::Expr;
}

macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal => $text:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

coded_enum! {
    /// Traversal direction of a step. Codes are a stable wire contract.
    Axis {
        Self_ = 1 => "self",
        Child = 2 => "child",
        Parent = 3 => "parent",
        Ancestor = 4 => "ancestor",
        Attribute = 5 => "attribute",
        Namespace = 6 => "namespace",
        Preceding = 7 => "preceding",
        Following = 8 => "following",
        Descendant = 9 => "descendant",
        AncestorOrSelf = 10 => "ancestor-or-self",
        FollowingSibling = 11 => "following-sibling",
        PrecedingSibling = 12 => "preceding-sibling",
        DescendantOrSelf = 13 => "descendant-or-self",
    }
}

coded_enum! {
    NodeType {
        Node = 1 => "node",
        Text = 2 => "text",
        Comment = 3 => "comment",
        ProcessingInstruction = 4 => "processing-instruction",
    }
}

coded_enum! {
    /// Built-in function catalogue.
    CoreFunction {
        Last = 1 => "last",
        Position = 2 => "position",
        Count = 3 => "count",
        Id = 4 => "id",
        LocalName = 5 => "local-name",
        NamespaceUri = 6 => "namespace-uri",
        Name = 7 => "name",
        String = 8 => "string",
        Concat = 9 => "concat",
        StartsWith = 10 => "starts-with",
        Contains = 11 => "contains",
        SubstringBefore = 12 => "substring-before",
        SubstringAfter = 13 => "substring-after",
        Substring = 14 => "substring",
        StringLength = 15 => "string-length",
        NormalizeSpace = 16 => "normalize-space",
        Translate = 17 => "translate",
        Boolean = 18 => "boolean",
        Not = 19 => "not",
        True = 20 => "true",
        False = 21 => "false",
        Lang = 22 => "lang",
        Number = 23 => "number",
        Sum = 24 => "sum",
        Floor = 25 => "floor",
        Ceiling = 26 => "ceiling",
        Round = 27 => "round",
        Null = 28 => "null",
        Key = 29 => "key",
        FormatNumber = 30 => "format-number",
        EndsWith = 31 => "ends-with",
    }
}

impl Axis {
    /// Axes whose natural order runs against document order.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Ancestor | Axis::AncestorOrSelf | Axis::Preceding | Axis::PrecedingSibling
        )
    }
}
