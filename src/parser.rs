//! XPath 1.0 grammar front-end.
//!
//! The parser knows nothing about the tree it builds: every construct is
//! handed to a [`Compiler`], so the same grammar can feed any back-end.

use thiserror::Error;

use crate::compiler::{Axis, Compiler, CoreFunction, NodeType};
use crate::errors::EvalError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{message} at position {position}")]
    InvalidSyntax { position: usize, message: String },
}

impl From<ParseError> for EvalError {
    fn from(err: ParseError) -> Self {
        let ParseError::InvalidSyntax { position, message } = err;
        EvalError::Parse { position, message }
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Parse `text` into whatever `compiler` builds.
pub fn parse_expression<C: Compiler>(compiler: &C, text: &str) -> ParseResult<C::Expr> {
    let mut p = Parser::new(text, compiler);
    p.skip_ws();
    let expr = p.parse_or()?;
    p.skip_ws();
    if !p.eof() {
        return Err(p.error("unexpected trailing input"));
    }
    Ok(expr)
}

pub struct Parser<'a, C: Compiler> {
    s: &'a str,
    i: usize,
    compiler: &'a C,
}

impl<'a, C: Compiler> Parser<'a, C> {
    pub fn new(s: &'a str, compiler: &'a C) -> Self {
        Self { s, i: 0, compiler }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::InvalidSyntax {
            position: self.i,
            message: message.into(),
        }
    }

    fn parse_or(&mut self) -> ParseResult<C::Expr> {
        let mut args = vec![self.parse_and()?];
        while self.consume_keyword("or") {
            args.push(self.parse_and()?);
        }
        Ok(if args.len() == 1 {
            args.remove(0)
        } else {
            self.compiler.or(args)
        })
    }

    fn parse_and(&mut self) -> ParseResult<C::Expr> {
        let mut args = vec![self.parse_equality()?];
        while self.consume_keyword("and") {
            args.push(self.parse_equality()?);
        }
        Ok(if args.len() == 1 {
            args.remove(0)
        } else {
            self.compiler.and(args)
        })
    }

    fn parse_equality(&mut self) -> ParseResult<C::Expr> {
        let mut left = self.parse_relational()?;
        loop {
            self.skip_ws();
            if self.consume_str("!=") {
                let right = self.parse_relational()?;
                left = self.compiler.not_equal(left, right);
            } else if self.consume_char('=') {
                let right = self.parse_relational()?;
                left = self.compiler.equal(left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_relational(&mut self) -> ParseResult<C::Expr> {
        let mut left = self.parse_additive()?;
        loop {
            self.skip_ws();
            if self.consume_str("<=") {
                let right = self.parse_additive()?;
                left = self.compiler.less_than_or_equal(left, right);
            } else if self.consume_str(">=") {
                let right = self.parse_additive()?;
                left = self.compiler.greater_than_or_equal(left, right);
            } else if self.consume_char('<') {
                let right = self.parse_additive()?;
                left = self.compiler.less_than(left, right);
            } else if self.consume_char('>') {
                let right = self.parse_additive()?;
                left = self.compiler.greater_than(left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_additive(&mut self) -> ParseResult<C::Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_ws();
            if self.consume_char('+') {
                let right = self.parse_multiplicative()?;
                left = self.compiler.sum(vec![left, right]);
            } else if self.consume_char('-') {
                let right = self.parse_multiplicative()?;
                left = self.compiler.minus(left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<C::Expr> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            if self.consume_char('*') {
                let right = self.parse_unary()?;
                left = self.compiler.multiply(left, right);
            } else if self.consume_keyword("div") {
                let right = self.parse_unary()?;
                left = self.compiler.divide(left, right);
            } else if self.consume_keyword("mod") {
                let right = self.parse_unary()?;
                left = self.compiler.modulo(left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_unary(&mut self) -> ParseResult<C::Expr> {
        self.skip_ws();
        if self.consume_char('-') {
            let arg = self.parse_unary()?;
            return Ok(self.compiler.negate(arg));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> ParseResult<C::Expr> {
        let mut args = vec![self.parse_path()?];
        loop {
            self.skip_ws();
            if !self.consume_char('|') {
                break;
            }
            args.push(self.parse_path()?);
        }
        Ok(if args.len() == 1 {
            args.remove(0)
        } else {
            self.compiler.union(args)
        })
    }

    fn parse_path(&mut self) -> ParseResult<C::Expr> {
        self.skip_ws();
        if self.starts_location_path() {
            return self.parse_location_path();
        }
        let head = self.parse_primary()?;
        let predicates = self.parse_predicates()?;
        let mut steps = Vec::new();
        self.skip_ws();
        if self.peek_char() == Some('/') {
            self.parse_step_tail(&mut steps)?;
        }
        Ok(self.compiler.expression_path(head, predicates, steps))
    }

    fn starts_location_path(&self) -> bool {
        match self.peek_char() {
            Some('/' | '@' | '*') => true,
            Some('.') => !self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()),
            Some(c) if is_name_start(c) => {
                let mut probe = Probe { s: self.s, i: self.i };
                let name = probe.ncname();
                probe.skip_ws();
                if probe.peek_str("::") {
                    return true;
                }
                if probe.peek_char() == Some(':') {
                    probe.i += 1;
                    if probe.peek_char() == Some('*') {
                        return true;
                    }
                    probe.ncname();
                    probe.skip_ws();
                    return probe.peek_char() != Some('(');
                }
                if probe.peek_char() == Some('(') {
                    return NodeType::from_name(name).is_some();
                }
                true
            }
            _ => false,
        }
    }

    fn parse_location_path(&mut self) -> ParseResult<C::Expr> {
        let mut steps = Vec::new();
        if self.peek_char() == Some('/') {
            if self.consume_str("//") {
                steps.push(self.descendant_or_self());
                steps.push(self.parse_step()?);
            } else {
                self.i += 1;
                self.skip_ws();
                if !self.starts_step() {
                    return Ok(self.compiler.location_path(true, steps));
                }
                steps.push(self.parse_step()?);
            }
            self.parse_step_tail(&mut steps)?;
            return Ok(self.compiler.location_path(true, steps));
        }
        steps.push(self.parse_step()?);
        self.parse_step_tail(&mut steps)?;
        Ok(self.compiler.location_path(false, steps))
    }

    fn parse_step_tail(&mut self, steps: &mut Vec<C::Step>) -> ParseResult<()> {
        loop {
            self.skip_ws();
            if self.consume_str("//") {
                steps.push(self.descendant_or_self());
            } else if !self.consume_char('/') {
                return Ok(());
            }
            steps.push(self.parse_step()?);
        }
    }

    fn starts_step(&self) -> bool {
        matches!(self.peek_char(), Some(c) if c == '.' || c == '@' || c == '*' || is_name_start(c))
    }

    fn descendant_or_self(&self) -> C::Step {
        let test = self.compiler.node_type_test(NodeType::Node);
        self.compiler.step(Axis::DescendantOrSelf, test, Vec::new())
    }

    fn parse_step(&mut self) -> ParseResult<C::Step> {
        self.skip_ws();
        if self.consume_str("..") {
            let test = self.compiler.node_type_test(NodeType::Node);
            return Ok(self.compiler.step(Axis::Parent, test, Vec::new()));
        }
        if self.consume_char('.') {
            let test = self.compiler.node_type_test(NodeType::Node);
            return Ok(self.compiler.step(Axis::Self_, test, Vec::new()));
        }
        let axis = if self.consume_char('@') {
            Axis::Attribute
        } else {
            let mut probe = Probe { s: self.s, i: self.i };
            let name = probe.ncname();
            probe.skip_ws();
            if !name.is_empty() && probe.peek_str("::") {
                let axis = Axis::from_name(name)
                    .ok_or_else(|| self.error(format!("unknown axis '{name}'")))?;
                self.i = probe.i + 2;
                axis
            } else {
                Axis::Child
            }
        };
        self.skip_ws();
        let test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;
        Ok(self.compiler.step(axis, test, predicates))
    }

    fn parse_node_test(&mut self) -> ParseResult<C::NodeTest> {
        if self.consume_char('*') {
            return Ok(self.compiler.node_name_test(self.compiler.qname(None, "*")));
        }
        let start = self.i;
        let name = self.parse_identifier()?;
        if self.peek_char() == Some(':') && !self.peek_str("::") {
            self.i += 1;
            if self.consume_char('*') {
                return Ok(self.compiler.node_name_test(self.compiler.qname(Some(name), "*")));
            }
            let local = self.parse_identifier()?;
            return Ok(self.compiler.node_name_test(self.compiler.qname(Some(name), local)));
        }
        let mut probe = Probe { s: self.s, i: self.i };
        probe.skip_ws();
        if probe.peek_char() == Some('(') {
            let Some(node_type) = NodeType::from_name(name) else {
                self.i = start;
                return Err(self.error(format!("'{name}' is not a node type")));
            };
            self.i = probe.i + 1;
            self.skip_ws();
            if node_type == NodeType::ProcessingInstruction && self.peek_quote() {
                let target = self.parse_quoted_string()?;
                self.skip_ws();
                self.expect(')')?;
                return Ok(self.compiler.processing_instruction_test(&target));
            }
            self.expect(')')?;
            return Ok(self.compiler.node_type_test(node_type));
        }
        Ok(self.compiler.node_name_test(self.compiler.qname(None, name)))
    }

    fn parse_predicates(&mut self) -> ParseResult<Vec<C::Expr>> {
        let mut predicates = Vec::new();
        loop {
            self.skip_ws();
            if !self.consume_char('[') {
                return Ok(predicates);
            }
            predicates.push(self.parse_or()?);
            self.skip_ws();
            self.expect(']')?;
        }
    }

    fn parse_primary(&mut self) -> ParseResult<C::Expr> {
        self.skip_ws();
        match self.peek_char() {
            Some('$') => {
                self.i += 1;
                let (prefix, local) = self.parse_qname()?;
                let name = self.compiler.qname(prefix, local);
                Ok(self.compiler.variable_reference(name))
            }
            Some('(') => {
                self.i += 1;
                let expr = self.parse_or()?;
                self.skip_ws();
                self.expect(')')?;
                Ok(expr)
            }
            Some('\'' | '"') => {
                let text = self.parse_quoted_string()?;
                Ok(self.compiler.literal(&text))
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let text = self.parse_number_literal()?;
                Ok(self.compiler.number(text))
            }
            Some(c) if is_name_start(c) => self.parse_function_call(),
            Some(c) => Err(self.error(format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_function_call(&mut self) -> ParseResult<C::Expr> {
        let (prefix, local) = self.parse_qname()?;
        self.skip_ws();
        self.expect('(')?;
        let mut args = Vec::new();
        self.skip_ws();
        if !self.consume_char(')') {
            loop {
                args.push(self.parse_or()?);
                self.skip_ws();
                if self.consume_char(',') {
                    continue;
                }
                self.expect(')')?;
                break;
            }
        }
        match (prefix, CoreFunction::from_name(local)) {
            (None, Some(function)) => Ok(self.compiler.core_function(function, args)),
            _ => {
                let name = self.compiler.qname(prefix, local);
                Ok(self.compiler.function(name, args))
            }
        }
    }

    fn parse_qname(&mut self) -> ParseResult<(Option<&'a str>, &'a str)> {
        let first = self.parse_identifier()?;
        if self.peek_char() == Some(':') && !self.peek_str("::") {
            self.i += 1;
            let local = self.parse_identifier()?;
            return Ok((Some(first), local));
        }
        Ok((None, first))
    }

    fn consume_keyword(&mut self, word: &str) -> bool {
        self.skip_ws();
        if !self.peek_str(word) {
            return false;
        }
        let after = self.s[self.i + word.len()..].chars().next();
        if after.is_some_and(is_name_char) {
            return false;
        }
        self.i += word.len();
        true
    }

    pub fn parse_identifier(&mut self) -> ParseResult<&'a str> {
        let mut probe = Probe { s: self.s, i: self.i };
        let name = probe.ncname();
        if name.is_empty() {
            return Err(self.error("name expected"));
        }
        self.i = probe.i;
        Ok(name)
    }

    pub fn parse_number_literal(&mut self) -> ParseResult<&'a str> {
        let start = self.i;
        self.skip_digits();
        if self.consume_char('.') {
            self.skip_digits();
        }
        let s = &self.s[start..self.i];
        if s.is_empty() || s == "." {
            return Err(self.error("number expected"));
        }
        Ok(s)
    }

    fn skip_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.i += 1;
        }
    }

    // XPath literals have no escapes: a string simply cannot contain its
    // own delimiter.
    pub fn parse_quoted_string(&mut self) -> ParseResult<String> {
        let quote = self
            .peek_char()
            .ok_or_else(|| self.error("expected quoted string"))?;
        if quote != '\'' && quote != '"' {
            return Err(self.error("expected quoted string"));
        }
        let start = self.i + 1;
        match self.s[start..].find(quote) {
            Some(len) => {
                self.i = start + len + 1;
                Ok(self.s[start..start + len].to_string())
            }
            None => Err(self.error("unterminated string")),
        }
    }

    fn peek_quote(&self) -> bool {
        matches!(self.peek_char(), Some('\'' | '"'))
    }

    pub fn expect(&mut self, c: char) -> ParseResult<()> {
        if self.consume_char(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    pub fn consume_char(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.i += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn consume_str(&mut self, lit: &str) -> bool {
        if self.peek_str(lit) {
            self.i += lit.len();
            true
        } else {
            false
        }
    }

    pub fn peek_char(&self) -> Option<char> {
        self.s[self.i..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.s[self.i..].chars().nth(n)
    }

    pub fn peek_str(&self, lit: &str) -> bool {
        self.s[self.i..].starts_with(lit)
    }

    pub fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
    }

    pub fn eof(&self) -> bool {
        self.i >= self.s.len()
    }
}

/// Read-only lookahead cursor.
struct Probe<'a> {
    s: &'a str,
    i: usize,
}

impl<'a> Probe<'a> {
    fn ncname(&mut self) -> &'a str {
        let start = self.i;
        let mut chars = self.s[self.i..].chars();
        match chars.next() {
            Some(c) if is_name_start(c) => self.i += c.len_utf8(),
            _ => return "",
        }
        for c in chars {
            if !is_name_char(c) {
                break;
            }
            self.i += c.len_utf8();
        }
        &self.s[start..self.i]
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.i += c.len_utf8();
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.s[self.i..].chars().next()
    }

    fn peek_str(&self, lit: &str) -> bool {
        self.s[self.i..].starts_with(lit)
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::TreeCompiler;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> String {
        match parse_expression(&TreeCompiler, text) {
            Ok(expr) => expr.to_string(),
            Err(err) => format!("error: {err}"),
        }
    }

    #[test]
    fn abbreviated_steps() {
        assert_eq!(parse("a/b"), "child::a/child::b");
        assert_eq!(parse("/a/@b"), "/child::a/attribute::b");
        assert_eq!(parse("../."), "parent::node()/self::node()");
        assert_eq!(
            parse("//a"),
            "/descendant-or-self::node()/child::a"
        );
        assert_eq!(parse("/"), "/");
    }

    #[test]
    fn operators_bind_by_precedence() {
        assert_eq!(parse("1 + 2 * 3"), "(1 + (2 * 3))");
        assert_eq!(parse("a or b and c"), "(child::a or (child::b and child::c))");
        assert_eq!(parse("6 div 2 mod 4"), "((6 div 2) mod 4)");
        assert_eq!(parse("-x"), "-child::x");
        assert_eq!(parse("a | b"), "(child::a | child::b)");
    }

    #[test]
    fn literals_with_both_quote_kinds_print_as_concat() {
        use crate::compiler::ast::{Constant, Expression};
        use crate::context::PathContext;
        use crate::value::Value;

        let text = "it's \"x\"";
        let printed = Expression::Constant(Constant::String(text.to_string())).to_string();
        assert_eq!(printed, r#"concat('it', "'", 's "x"')"#);
        let ctx = PathContext::new(serde_json::json!({}));
        assert_eq!(ctx.get_value(&printed).unwrap(), Value::from(text));
        assert_eq!(parse("\"it's\""), "\"it's\"");
    }

    #[test]
    fn functions_and_variables() {
        assert_eq!(parse("count(a[@x = 'y'])"), "count(child::a[(attribute::x = 'y')])");
        assert_eq!(parse("ext:go($v, 1)"), "ext:go($v, 1)");
        assert_eq!(parse("$v/a[2]"), "($v)/child::a[2]");
        assert_eq!(parse("text()"), "child::text()");
        assert_eq!(parse("ancestor::*[1]"), "ancestor::*[1]");
    }

    #[test]
    fn keywords_are_names_in_operand_position() {
        assert_eq!(parse("div/mod"), "child::div/child::mod");
        assert_eq!(parse("a-b"), "child::a-b");
    }

    #[test]
    fn syntax_errors_carry_positions() {
        let err = parse_expression(&TreeCompiler, "a[1");
        assert_eq!(
            err.err(),
            Some(ParseError::InvalidSyntax {
                position: 3,
                message: "expected ']'".into()
            })
        );
        assert!(parse_expression(&TreeCompiler, "bogus::a").is_err());
        assert!(parse_expression(&TreeCompiler, "'open").is_err());
    }
}
