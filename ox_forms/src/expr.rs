//! A small, side-effect free expression language used by `{ js: ... }`
//! conditions and computed fields.
//!
//! Supported: number/string/boolean/null literals, array literals, dotted
//! identifiers resolved against a read-only context, arithmetic
//! (`+ - * / % ^`), comparison (`== != < <= > >=`), membership (`in`),
//! boolean `and`/`or`/`not`, the conditional `c ? a : b`, parentheses and a
//! fixed set of pure numeric functions. There is no assignment, no statement
//! and no way to define functions.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use log::warn;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::path;

/// Largest integer an IEEE-754 double holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

const FUNCTIONS: &[&str] = &["abs", "ceil", "floor", "round", "sqrt", "min", "max", "length"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unexpected {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        offset: usize,
    },
    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(&'static str),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("function '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: &'static str,
        found: usize,
    },
    #[error("operator '{op}' cannot be applied to {operand}")]
    InvalidOperand { op: &'static str, operand: &'static str },
    #[error("expression nested too deeply (limit {0})")]
    TooDeep(usize),
}

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ExprValue>),
    Object(Map<String, Value>),
}

impl From<&Value> for ExprValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ExprValue::Null,
            Value::Bool(b) => ExprValue::Bool(*b),
            Value::Number(n) => ExprValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => ExprValue::String(s.clone()),
            Value::Array(items) => ExprValue::Array(items.iter().map(ExprValue::from).collect()),
            Value::Object(map) => ExprValue::Object(map.clone()),
        }
    }
}

impl ExprValue {
    /// Truthiness: non-zero numbers, non-empty strings and non-empty
    /// collections are true; `null`, `false` and `NaN` are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            ExprValue::Null => false,
            ExprValue::Bool(b) => *b,
            ExprValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ExprValue::String(s) => !s.is_empty(),
            ExprValue::Array(items) => !items.is_empty(),
            ExprValue::Object(map) => !map.is_empty(),
        }
    }

    /// Numeric coercion with `Number()` semantics.
    pub fn to_number(&self) -> f64 {
        match self {
            ExprValue::Null => 0.0,
            ExprValue::Bool(b) => f64::from(u8::from(*b)),
            ExprValue::Number(n) => *n,
            ExprValue::String(s) => parse_number(s),
            ExprValue::Array(_) | ExprValue::Object(_) => f64::NAN,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            ExprValue::Null => Value::Null,
            ExprValue::Bool(b) => Value::Bool(b),
            ExprValue::Number(n) => number_value(n),
            ExprValue::String(s) => Value::String(s),
            ExprValue::Array(items) => Value::Array(items.into_iter().map(ExprValue::into_json).collect()),
            ExprValue::Object(map) => Value::Object(map),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ExprValue::Null => "null",
            ExprValue::Bool(_) => "a boolean",
            ExprValue::Number(_) => "a number",
            ExprValue::String(_) => "a string",
            ExprValue::Array(_) => "an array",
            ExprValue::Object(_) => "an object",
        }
    }

    fn strict_eq(&self, other: &ExprValue) -> bool {
        match (self, other) {
            (ExprValue::Number(a), ExprValue::Number(b)) => a == b,
            (ExprValue::Array(a), ExprValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_eq(y))
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Null => f.write_str("null"),
            ExprValue::Bool(b) => write!(f, "{b}"),
            ExprValue::Number(n) => f.write_str(&format_number(*n)),
            ExprValue::String(s) => f.write_str(s),
            ExprValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(","))
            }
            ExprValue::Object(_) => f.write_str("[object Object]"),
        }
    }
}

/// Converts a double into a JSON value, keeping integral values integral so
/// `25 * 2` compares equal to `json!(50)`. Non-finite results become `null`.
pub fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Formats a number the way it is displayed to form authors (`50`, `2.5`,
/// `NaN`, `Infinity`).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// String form of a JSON value used for substring tests and templating.
pub fn display_value(value: &Value) -> String {
    ExprValue::from(value).to_string()
}

/// `Number()` coercion of a string: blank is zero, anything unparsable is NaN.
pub fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().ok().filter(|n| n.is_finite()).unwrap_or(f64::NAN),
    }
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Question,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", format_number(*n)),
            Token::Str(s) => write!(f, "string '{s}'"),
            Token::Ident(name) => write!(f, "identifier '{name}'"),
            other => write!(f, "'{}'", token_symbol(other)),
        }
    }
}

fn token_symbol(token: &Token) -> &'static str {
    match token {
        Token::True => "true",
        Token::False => "false",
        Token::Null => "null",
        Token::And => "and",
        Token::Or => "or",
        Token::Not => "not",
        Token::In => "in",
        Token::Plus => "+",
        Token::Minus => "-",
        Token::Star => "*",
        Token::Slash => "/",
        Token::Percent => "%",
        Token::Caret => "^",
        Token::EqEq => "==",
        Token::NotEq => "!=",
        Token::Lt => "<",
        Token::Le => "<=",
        Token::Gt => ">",
        Token::Ge => ">=",
        Token::Question => "?",
        Token::Colon => ":",
        Token::LParen => "(",
        Token::RParen => ")",
        Token::LBracket => "[",
        Token::RBracket => "]",
        Token::Comma => ",",
        Token::Number(_) | Token::Str(_) | Token::Ident(_) => "literal",
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |idx: usize| chars.get(idx).map(|(_, c)| *c);

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && peek(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while peek(i).is_some_and(|n| n.is_ascii_digit() || n == '.') {
                i += 1;
            }
            if peek(i).is_some_and(|n| n == 'e' || n == 'E') {
                let mut j = i + 1;
                if peek(j).is_some_and(|n| n == '+' || n == '-') {
                    j += 1;
                }
                if peek(j).is_some_and(|n| n.is_ascii_digit()) {
                    i = j;
                    while peek(i).is_some_and(|n| n.is_ascii_digit()) {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| ExprError::InvalidNumber(text.clone()))?;
            tokens.push((Token::Number(number), offset));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                match peek(i) {
                    None => return Err(ExprError::UnterminatedString(offset)),
                    Some('\\') => {
                        let escaped = peek(i + 1).ok_or(ExprError::UnterminatedString(offset))?;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                        i += 2;
                    }
                    Some(ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        text.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push((Token::Str(text), offset));
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            i += 1;
            loop {
                while peek(i).is_some_and(is_ident_char) {
                    i += 1;
                }
                // Dotted paths continue through `.name` and `.0` segments.
                if peek(i) == Some('.') && peek(i + 1).is_some_and(is_ident_char) {
                    i += 1;
                    continue;
                }
                break;
            }
            let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let token = match word.as_str() {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "in" => Token::In,
                _ => Token::Ident(word),
            };
            tokens.push((token, offset));
            continue;
        }

        let next = peek(i + 1);
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('^', _) => (Token::Caret, 1),
            ('?', _) => (Token::Question, 1),
            (':', _) => (Token::Colon, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            (ch, _) => return Err(ExprError::UnexpectedChar { ch, offset }),
        };
        tokens.push((token, offset));
        i += width;
    }

    Ok(tokens)
}

// --- Syntax tree ---

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(ExprValue),
    Variable(String),
    Array(Vec<Node>),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

/// Bound on nested parentheses, brackets, calls, conditionals and prefix
/// operators.
const MAX_DEPTH: usize = 64;
/// Bound on syntax tree height, which long operator chains grow without
/// nesting.
const MAX_HEIGHT: usize = 1024;

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
    /// Height of the node most recently produced.
    height: usize,
}

impl Parser {
    fn new(tokens: Vec<(Token, usize)>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            height: 0,
        }
    }

    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    /// Records the height of a node built over children of the given heights.
    fn grow(&mut self, children: &[usize]) -> Result<(), ExprError> {
        let height = children.iter().copied().max().unwrap_or(0) + 1;
        if height > MAX_HEIGHT {
            return Err(ExprError::TooDeep(MAX_HEIGHT));
        }
        self.height = height;
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &'static str) -> Result<(), ExprError> {
        match self.tokens.get(self.pos) {
            Some((token, _)) if *token == expected => {
                self.pos += 1;
                Ok(())
            }
            Some((token, offset)) => Err(ExprError::UnexpectedToken {
                found: token.to_string(),
                expected: what,
                offset: *offset,
            }),
            None => Err(ExprError::UnexpectedEnd(what)),
        }
    }

    fn parse(mut self) -> Result<Node, ExprError> {
        let node = self.conditional()?;
        match self.tokens.get(self.pos) {
            None => Ok(node),
            Some((token, offset)) => Err(ExprError::UnexpectedToken {
                found: token.to_string(),
                expected: "end of expression",
                offset: *offset,
            }),
        }
    }

    fn conditional(&mut self) -> Result<Node, ExprError> {
        self.descend()?;
        let test = self.or()?;
        let node = if self.eat(&Token::Question) {
            let test_height = self.height;
            let then = self.conditional()?;
            let then_height = self.height;
            self.expect(Token::Colon, "':'")?;
            let otherwise = self.conditional()?;
            self.grow(&[test_height, then_height, self.height])?;
            Node::Conditional(Box::new(test), Box::new(then), Box::new(otherwise))
        } else {
            test
        };
        self.depth -= 1;
        Ok(node)
    }

    fn or(&mut self) -> Result<Node, ExprError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let left_height = self.height;
            let right = self.and()?;
            self.grow(&[left_height, self.height])?;
            left = Node::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node, ExprError> {
        let mut left = self.comparison()?;
        while self.eat(&Token::And) {
            let left_height = self.height;
            let right = self.comparison()?;
            self.grow(&[left_height, self.height])?;
            left = Node::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Node, ExprError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::In) => BinaryOp::In,
                _ => return Ok(left),
            };
            self.pos += 1;
            let left_height = self.height;
            let right = self.additive()?;
            self.grow(&[left_height, self.height])?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Node, ExprError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let left_height = self.height;
            let right = self.multiplicative()?;
            self.grow(&[left_height, self.height])?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Node, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let left_height = self.height;
            let right = self.unary()?;
            self.grow(&[left_height, self.height])?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Not) => UnaryOp::Not,
            _ => return self.power(),
        };
        self.pos += 1;
        self.descend()?;
        let operand = self.unary()?;
        self.depth -= 1;
        self.grow(&[self.height])?;
        Ok(Node::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Node, ExprError> {
        let base = self.primary()?;
        if self.eat(&Token::Caret) {
            let base_height = self.height;
            let exponent = self.unary()?;
            self.grow(&[base_height, self.height])?;
            return Ok(Node::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .ok_or(ExprError::UnexpectedEnd("a value"))?;

        self.height = 1;
        match self.advance() {
            Some(Token::Number(n)) => Ok(Node::Literal(ExprValue::Number(n))),
            Some(Token::Str(s)) => Ok(Node::Literal(ExprValue::String(s))),
            Some(Token::True) => Ok(Node::Literal(ExprValue::Bool(true))),
            Some(Token::False) => Ok(Node::Literal(ExprValue::Bool(false))),
            Some(Token::Null) => Ok(Node::Literal(ExprValue::Null)),
            Some(Token::LParen) => {
                let inner = self.conditional()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let items = self.list(Token::RBracket, "']'")?;
                self.grow(&[self.height])?;
                Ok(Node::Array(items))
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    if !FUNCTIONS.contains(&name.as_str()) {
                        return Err(ExprError::UnknownFunction(name));
                    }
                    let args = self.list(Token::RParen, "')'")?;
                    self.grow(&[self.height])?;
                    return Ok(Node::Call(name, args));
                }
                Ok(Node::Variable(name))
            }
            Some(token) => Err(ExprError::UnexpectedToken {
                found: token.to_string(),
                expected: "a value",
                offset,
            }),
            None => Err(ExprError::UnexpectedEnd("a value")),
        }
    }

    fn list(&mut self, close: Token, what: &'static str) -> Result<Vec<Node>, ExprError> {
        let mut items = Vec::new();
        let mut tallest = 0;
        if self.eat(&close) {
            self.height = tallest;
            return Ok(items);
        }
        loop {
            items.push(self.conditional()?);
            tallest = tallest.max(self.height);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(close, what)?;
            self.height = tallest;
            return Ok(items);
        }
    }
}

// --- Evaluation ---

fn resolve_variable(name: &str, context: &Value) -> Result<ExprValue, ExprError> {
    let exact = context.as_object().and_then(|map| map.get(name));
    exact
        .or_else(|| path::get(context, name))
        .map(ExprValue::from)
        .ok_or_else(|| ExprError::UndefinedVariable(name.to_string()))
}

fn eval_node(node: &Node, context: &Value) -> Result<ExprValue, ExprError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Variable(name) => resolve_variable(name, context),
        Node::Array(items) => Ok(ExprValue::Array(
            items
                .iter()
                .map(|item| eval_node(item, context))
                .collect::<Result<_, _>>()?,
        )),
        Node::Unary(op, operand) => {
            let value = eval_node(operand, context)?;
            Ok(match op {
                UnaryOp::Neg => ExprValue::Number(-value.to_number()),
                UnaryOp::Plus => ExprValue::Number(value.to_number()),
                UnaryOp::Not => ExprValue::Bool(!value.is_truthy()),
            })
        }
        Node::Conditional(test, then, otherwise) => {
            if eval_node(test, context)?.is_truthy() {
                eval_node(then, context)
            } else {
                eval_node(otherwise, context)
            }
        }
        Node::Binary(BinaryOp::And, left, right) => {
            if !eval_node(left, context)?.is_truthy() {
                return Ok(ExprValue::Bool(false));
            }
            Ok(ExprValue::Bool(eval_node(right, context)?.is_truthy()))
        }
        Node::Binary(BinaryOp::Or, left, right) => {
            if eval_node(left, context)?.is_truthy() {
                return Ok(ExprValue::Bool(true));
            }
            Ok(ExprValue::Bool(eval_node(right, context)?.is_truthy()))
        }
        Node::Binary(op, left, right) => {
            let left = eval_node(left, context)?;
            let right = eval_node(right, context)?;
            apply_binary(*op, left, right)
        }
        Node::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| eval_node(arg, context))
                .collect::<Result<Vec<_>, _>>()?;
            call_function(name, args)
        }
    }
}

fn apply_binary(op: BinaryOp, left: ExprValue, right: ExprValue) -> Result<ExprValue, ExprError> {
    let value = match op {
        BinaryOp::Add => match (&left, &right) {
            (ExprValue::String(_), _) | (_, ExprValue::String(_)) => {
                ExprValue::String(format!("{left}{right}"))
            }
            _ => ExprValue::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => ExprValue::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => ExprValue::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => ExprValue::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => ExprValue::Number(left.to_number() % right.to_number()),
        BinaryOp::Pow => ExprValue::Number(left.to_number().powf(right.to_number())),
        BinaryOp::Eq => ExprValue::Bool(left.strict_eq(&right)),
        BinaryOp::Ne => ExprValue::Bool(!left.strict_eq(&right)),
        BinaryOp::Lt => ExprValue::Bool(compare(&left, &right) == Some(Ordering::Less)),
        BinaryOp::Le => ExprValue::Bool(matches!(
            compare(&left, &right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => ExprValue::Bool(compare(&left, &right) == Some(Ordering::Greater)),
        BinaryOp::Ge => ExprValue::Bool(matches!(
            compare(&left, &right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::In => match &right {
            ExprValue::Array(items) => ExprValue::Bool(items.iter().any(|item| item.strict_eq(&left))),
            other => {
                return Err(ExprError::InvalidOperand {
                    op: "in",
                    operand: other.type_name(),
                })
            }
        },
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in eval_node"),
    };
    Ok(value)
}

fn compare(left: &ExprValue, right: &ExprValue) -> Option<Ordering> {
    match (left, right) {
        (ExprValue::String(a), ExprValue::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

fn call_function(name: &str, args: Vec<ExprValue>) -> Result<ExprValue, ExprError> {
    let unary = |f: fn(f64) -> f64| -> Result<ExprValue, ExprError> {
        match args.as_slice() {
            [single] => Ok(ExprValue::Number(f(single.to_number()))),
            _ => Err(ExprError::Arity {
                name: name.to_string(),
                expected: "1",
                found: args.len(),
            }),
        }
    };

    match name {
        "abs" => unary(f64::abs),
        "ceil" => unary(f64::ceil),
        "floor" => unary(f64::floor),
        "round" => unary(|n| (n + 0.5).floor()),
        "sqrt" => unary(f64::sqrt),
        "min" | "max" => {
            let numbers: Vec<f64> = match args.as_slice() {
                [ExprValue::Array(items)] => items.iter().map(ExprValue::to_number).collect(),
                _ => args.iter().map(ExprValue::to_number).collect(),
            };
            if numbers.is_empty() {
                return Err(ExprError::Arity {
                    name: name.to_string(),
                    expected: "at least 1",
                    found: 0,
                });
            }
            let pick = if name == "min" { f64::min } else { f64::max };
            let folded = if numbers.iter().any(|n| n.is_nan()) {
                f64::NAN
            } else {
                numbers.into_iter().reduce(pick).unwrap_or(f64::NAN)
            };
            Ok(ExprValue::Number(folded))
        }
        "length" => match args.as_slice() {
            [ExprValue::String(s)] => Ok(ExprValue::Number(s.chars().count() as f64)),
            [ExprValue::Array(items)] => Ok(ExprValue::Number(items.len() as f64)),
            [other] => Err(ExprError::InvalidOperand {
                op: "length",
                operand: other.type_name(),
            }),
            _ => Err(ExprError::Arity {
                name: name.to_string(),
                expected: "1",
                found: args.len(),
            }),
        },
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

/// A parsed expression, reusable across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::UnexpectedEnd("an expression"));
        }
        let root = Parser::new(tokens).parse()?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates against `context`. The context is never modified.
    pub fn eval(&self, context: &Value) -> Result<ExprValue, ExprError> {
        eval_node(&self.root, context)
    }
}

impl FromStr for Expression {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::parse(s)
    }
}

/// Parses and evaluates `expression`, logging and swallowing any failure.
pub fn evaluate_value(expression: &str, context: &Value) -> Option<ExprValue> {
    match Expression::parse(expression).and_then(|expr| expr.eval(context)) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Expression evaluation failed for '{}': {}", expression, e);
            None
        }
    }
}

/// Same as [`evaluate_value`] but returns a JSON value.
pub fn evaluate(expression: &str, context: &Value) -> Option<Value> {
    evaluate_value(expression, context).map(ExprValue::into_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(src: &str, ctx: &Value) -> Option<Value> {
        evaluate(src, ctx)
    }

    #[test]
    fn arithmetic_precedence() {
        let ctx = json!({});
        assert_eq!(eval("1 + 2 * 3", &ctx), Some(json!(7)));
        assert_eq!(eval("(1 + 2) * 3", &ctx), Some(json!(9)));
        assert_eq!(eval("2 ^ 3 ^ 2", &ctx), Some(json!(512)));
        assert_eq!(eval("-2 ^ 2", &ctx), Some(json!(-4)));
        assert_eq!(eval("7 % 4", &ctx), Some(json!(3)));
        assert_eq!(eval("10 / 4", &ctx), Some(json!(2.5)));
    }

    #[test]
    fn division_by_zero_is_not_finite() {
        assert_eq!(eval("1 / 0", &json!({})), Some(Value::Null));
    }

    #[test]
    fn dotted_identifiers_resolve_against_context() {
        let ctx = json!({"user": {"age": 25, "active": true}});
        assert_eq!(eval("user.age * 2", &ctx), Some(json!(50)));
        assert_eq!(eval("user.active ? user.age + 10 : 0", &ctx), Some(json!(35)));
    }

    #[test]
    fn flattened_keys_take_precedence() {
        let ctx = json!({"user.age": 40, "user": {"age": 25}});
        assert_eq!(eval("user.age", &ctx), Some(json!(40)));
    }

    #[test]
    fn boolean_operators() {
        let ctx = json!({"user": {"age": 25, "active": true}});
        assert_eq!(eval("user.age > 18 and user.active", &ctx), Some(json!(true)));
        assert_eq!(eval("user.age < 18 or not user.active", &ctx), Some(json!(false)));
        assert_eq!(eval("not 0", &ctx), Some(json!(true)));
    }

    #[test]
    fn short_circuit_skips_undefined_operands() {
        let ctx = json!({"flag": false});
        assert_eq!(eval("flag and missing.value", &ctx), Some(json!(false)));
        assert_eq!(eval("flag or missing.value", &ctx), None);
    }

    #[test]
    fn comparison_is_strict() {
        let ctx = json!({"n": 5, "s": "5"});
        assert_eq!(eval("n == 5", &ctx), Some(json!(true)));
        assert_eq!(eval("s == 5", &ctx), Some(json!(false)));
        assert_eq!(eval("s != 5", &ctx), Some(json!(true)));
        assert_eq!(eval("'apple' < 'banana'", &ctx), Some(json!(true)));
        assert_eq!(eval("s >= 5", &ctx), Some(json!(true)));
    }

    #[test]
    fn strings_concatenate() {
        let ctx = json!({"first": "Ada", "n": 2});
        assert_eq!(eval("first + ' ' + 'L'", &ctx), Some(json!("Ada L")));
        assert_eq!(eval("'x' + n", &ctx), Some(json!("x2")));
    }

    #[test]
    fn membership_and_functions() {
        let ctx = json!({"country": "US", "items": [3, 9, 4]});
        assert_eq!(eval("country in ['US', 'CA']", &ctx), Some(json!(true)));
        assert_eq!(eval("max(items)", &ctx), Some(json!(9)));
        assert_eq!(eval("min(4, 2, 8)", &ctx), Some(json!(2)));
        assert_eq!(eval("round(2.5) + floor(1.9) + abs(-1)", &ctx), Some(json!(5)));
        assert_eq!(eval("length(country)", &ctx), Some(json!(2)));
    }

    #[test]
    fn undefined_variable_fails_softly() {
        let ctx = json!({"user": {"age": 25}});
        assert_eq!(eval("invalid.expression.syntax", &ctx), None);
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(matches!(Expression::parse("1 +"), Err(ExprError::UnexpectedEnd(_))));
        assert!(matches!(Expression::parse("a = 1"), Err(ExprError::UnexpectedChar { ch: '=', .. })));
        assert!(matches!(Expression::parse("'open"), Err(ExprError::UnterminatedString(0))));
        assert!(matches!(Expression::parse("exec('rm')"), Err(ExprError::UnknownFunction(_))));
        assert!(matches!(Expression::parse("(1"), Err(ExprError::UnexpectedEnd(_))));
        assert!(matches!(Expression::parse(""), Err(ExprError::UnexpectedEnd(_))));
        assert_eq!(eval("1 2", &json!({})), None);
    }

    #[test]
    fn parsed_expression_is_reusable() {
        let expr: Expression = "price * qty".parse().unwrap();
        assert_eq!(expr.source(), "price * qty");
        let a = expr.eval(&json!({"price": 2, "qty": 3})).unwrap();
        let b = expr.eval(&json!({"price": 2, "qty": 3})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.into_json(), json!(6));
    }

    #[test]
    fn truthiness_rules() {
        assert!(!ExprValue::from(&json!(0)).is_truthy());
        assert!(!ExprValue::from(&json!("")).is_truthy());
        assert!(!ExprValue::from(&json!([])).is_truthy());
        assert!(!ExprValue::from(&json!({})).is_truthy());
        assert!(!ExprValue::Number(f64::NAN).is_truthy());
        assert!(ExprValue::from(&json!("0")).is_truthy());
        assert!(ExprValue::from(&json!([0])).is_truthy());
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(50.0), "50");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(parse_number("  "), 0.0);
        assert!(parse_number("abc").is_nan());
        assert_eq!(number_value(2.0), json!(2));
    }

    #[test]
    fn deep_nesting_is_rejected_not_fatal() {
        let ctx = json!({});
        let parens = format!("{}1{}", "(".repeat(2000), ")".repeat(2000));
        assert_eq!(eval(&parens, &ctx), None);
        assert!(matches!(Expression::parse(&parens), Err(ExprError::TooDeep(_))));

        assert_eq!(eval(&"-".repeat(5000), &ctx), None);
        assert_eq!(eval(&format!("{}1", "not ".repeat(5000)), &ctx), None);
        assert_eq!(eval(&format!("{}0{}", "[".repeat(3000), "]".repeat(3000)), &ctx), None);
        assert_eq!(eval(&format!("{}1{}", "1 ? ".repeat(3000), " : 0".repeat(3000)), &ctx), None);

        let long_sum = vec!["1"; 5000].join(" + ");
        assert_eq!(eval(&long_sum, &ctx), None);
    }

    #[test]
    fn moderate_nesting_still_evaluates() {
        let ctx = json!({"a": 1});
        let parens = format!("{}a + 1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(eval(&parens, &ctx), Some(json!(2)));
        let sum = vec!["a"; 500].join(" + ");
        assert_eq!(eval(&sum, &ctx), Some(json!(500)));
    }

    #[test]
    fn malformed_input_yields_none() {
        let ctx = json!({"a": 1});
        for src in ["(a + 1", "a +", "max(1, 2", "[1, 2", "a ? 1", "'open", "1 2", ")", "unknown(1)"] {
            assert_eq!(eval(src, &ctx), None, "source {src}");
        }
    }
}
