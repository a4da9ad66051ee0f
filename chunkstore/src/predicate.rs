//! Query predicates over compound elements.
//!
//! A query selects the rows of a one dimensional compound chunk that satisfy a boolean expression, for example
//! ```text
//! (symbol == b'AAPL') & (open > 100.5) | not volume < 1000
//! ```
//!
//! The [`BooleanPredicateCompiler`] supports comparisons between a field and a literal (`==`, `!=`, `<`, `<=`, `>`, `>=`),
//! conjunction (`&`, `and`), disjunction (`|`, `or`), negation (`~`, `not`) and parentheses.
//! Literals are integers, floats and single or double quoted strings with an optional `b` prefix.
//! Conjunction binds tighter than disjunction.

use std::{cmp::Ordering, fmt::Debug, sync::Arc};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::data_type::DataType;

/// An invalid predicate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid predicate {expression:?}: {reason}")]
pub struct PredicateError {
    expression: String,
    reason: String,
}

impl PredicateError {
    /// Create a new predicate error.
    #[must_use]
    pub fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// The offending expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Why the expression is invalid.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A compiled predicate over compound records.
pub trait CompiledPredicate: Debug + Send + Sync {
    /// Returns true if `record` (field name to value) satisfies the predicate.
    fn matches(&self, record: &Map<String, Value>) -> bool;
}

/// Compiles query expressions to predicates.
pub trait PredicateCompiler: Send + Sync {
    /// Compile `expression` against the compound `data_type`.
    ///
    /// # Errors
    /// Returns a [`PredicateError`] if the expression is malformed or refers to fields that do not exist in `data_type`.
    fn compile(
        &self,
        expression: &str,
        data_type: &DataType,
    ) -> Result<Arc<dyn CompiledPredicate>, PredicateError>;
}

/// The default [`PredicateCompiler`].
#[derive(Clone, Copy, Debug, Default)]
pub struct BooleanPredicateCompiler;

impl PredicateCompiler for BooleanPredicateCompiler {
    fn compile(
        &self,
        expression: &str,
        data_type: &DataType,
    ) -> Result<Arc<dyn CompiledPredicate>, PredicateError> {
        let error = |reason: String| PredicateError::new(expression, reason);
        let fields = data_type
            .fields()
            .ok_or_else(|| error(format!("{data_type} is not a compound type")))?;
        let tokens = tokenize(expression).map_err(error)?;
        let mut parser = Parser {
            tokens: &tokens,
            position: 0,
            fields: fields
                .iter()
                .map(|field| (field.name.as_str(), &field.data_type))
                .collect(),
        };
        let predicate = parser.or().map_err(error)?;
        if let Some(token) = parser.peek() {
            return Err(error(format!("unexpected {token:?}")));
        }
        Ok(Arc::new(predicate))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn flip(self) -> Self {
        match self {
            Self::Eq | Self::Ne => self,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Ne, None) => true,
            (_, None) => false,
            (Self::Eq, Some(ordering)) => ordering.is_eq(),
            (Self::Ne, Some(ordering)) => ordering.is_ne(),
            (Self::Lt, Some(ordering)) => ordering.is_lt(),
            (Self::Le, Some(ordering)) => ordering.is_le(),
            (Self::Gt, Some(ordering)) => ordering.is_gt(),
            (Self::Ge, Some(ordering)) => ordering.is_ge(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Literal {
    Integer(i128),
    Float(f64),
    String(String),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    Literal(Literal),
    Comparison(Comparison),
    And,
    Or,
    Not,
    Open,
    Close,
}

/// A boolean expression tree.
#[derive(Clone, Debug, PartialEq)]
enum Predicate {
    Compare {
        field: String,
        comparison: Comparison,
        literal: Literal,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

fn compare(value: &Value, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (Value::Number(number), Literal::Integer(literal)) => {
            if let Some(value) = number.as_i64() {
                Some(i128::from(value).cmp(literal))
            } else if let Some(value) = number.as_u64() {
                Some(i128::from(value).cmp(literal))
            } else {
                #[allow(clippy::cast_precision_loss)]
                let literal = *literal as f64;
                number.as_f64()?.partial_cmp(&literal)
            }
        }
        (Value::Number(number), Literal::Float(literal)) => number.as_f64()?.partial_cmp(literal),
        // non-finite floats are represented by strings
        (Value::String(value), Literal::Float(literal)) => {
            let value = match value.as_str() {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                _ => return None,
            };
            value.partial_cmp(literal)
        }
        (Value::String(value), Literal::String(literal)) => Some(value.as_str().cmp(literal)),
        _ => None,
    }
}

impl CompiledPredicate for Predicate {
    fn matches(&self, record: &Map<String, Value>) -> bool {
        match self {
            Self::Compare {
                field,
                comparison,
                literal,
            } => record
                .get(field)
                .is_some_and(|value| comparison.holds(compare(value, literal))),
            Self::And(lhs, rhs) => lhs.matches(record) && rhs.matches(record),
            Self::Or(lhs, rhs) => lhs.matches(record) || rhs.matches(record),
            Self::Not(predicate) => !predicate.matches(record),
        }
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '&' => {
                tokens.push(Token::And);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Or);
                i += 1;
            }
            '~' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let comparison = match (c, next) {
                    ('=', Some('=')) => Comparison::Eq,
                    ('!', Some('=')) => Comparison::Ne,
                    ('<', Some('=')) => Comparison::Le,
                    ('>', Some('=')) => Comparison::Ge,
                    ('<', _) => Comparison::Lt,
                    ('>', _) => Comparison::Gt,
                    _ => return Err(format!("unexpected {c:?} at position {i}")),
                };
                i += if matches!(comparison, Comparison::Lt | Comparison::Gt) {
                    1
                } else {
                    2
                };
                tokens.push(Token::Comparison(comparison));
            }
            '\'' | '"' => {
                let (string, end) = quoted(&chars, i)?;
                tokens.push(Token::Literal(Literal::String(string)));
                i = end;
            }
            'b' | 'B' if matches!(next, Some('\'' | '"')) => {
                let (string, end) = quoted(&chars, i + 1)?;
                tokens.push(Token::Literal(Literal::String(string)));
                i = end;
            }
            c if c.is_ascii_digit()
                || c == '.'
                || (c == '-' && next.is_some_and(|next| next.is_ascii_digit() || next == '.')) =>
            {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric()
                        || chars[i] == '.'
                        || (matches!(chars[i], '+' | '-') && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let literal = if let Ok(integer) = text.parse::<i128>() {
                    Literal::Integer(integer)
                } else if let Ok(float) = text.parse::<f64>() {
                    Literal::Float(float)
                } else {
                    return Err(format!("invalid number {text:?}"));
                };
                tokens.push(Token::Literal(literal));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Identifier(word),
                });
            }
            _ => return Err(format!("unexpected {c:?} at position {i}")),
        }
    }
    Ok(tokens)
}

/// Read the quoted string starting at the quote `chars[start]`, returning the string and the position after the closing quote.
fn quoted(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut string = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                string.push(chars[i + 1]);
                i += 2;
            }
            c if c == quote => return Ok((string, i + 1)),
            c => {
                string.push(c);
                i += 1;
            }
        }
    }
    Err(format!("unterminated string starting at position {start}"))
}

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    fields: Vec<(&'a str, &'a DataType)>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.position);
        self.position += 1;
        token
    }

    fn or(&mut self) -> Result<Predicate, String> {
        let mut predicate = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            predicate = Predicate::Or(Box::new(predicate), Box::new(self.and()?));
        }
        Ok(predicate)
    }

    fn and(&mut self) -> Result<Predicate, String> {
        let mut predicate = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            predicate = Predicate::And(Box::new(predicate), Box::new(self.not()?));
        }
        Ok(predicate)
    }

    fn not(&mut self) -> Result<Predicate, String> {
        if self.peek() == Some(&Token::Not) {
            self.position += 1;
            Ok(Predicate::Not(Box::new(self.not()?)))
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> Result<Predicate, String> {
        if self.peek() == Some(&Token::Open) {
            self.position += 1;
            let predicate = self.or()?;
            return match self.next() {
                Some(Token::Close) => Ok(predicate),
                _ => Err("missing closing parenthesis".to_string()),
            };
        }
        let lhs = self.next().cloned();
        let comparison = match self.next() {
            Some(Token::Comparison(comparison)) => *comparison,
            token => return Err(format!("expected a comparison, found {token:?}")),
        };
        let rhs = self.next().cloned();
        let (field, comparison, literal) = match (lhs, rhs) {
            (Some(Token::Identifier(field)), Some(Token::Literal(literal))) => {
                (field, comparison, literal)
            }
            (Some(Token::Literal(literal)), Some(Token::Identifier(field))) => {
                (field, comparison.flip(), literal)
            }
            (lhs, rhs) => {
                return Err(format!(
                    "a comparison needs a field and a literal, found {lhs:?} and {rhs:?}"
                ))
            }
        };
        self.check_field(&field, &literal)?;
        Ok(Predicate::Compare {
            field,
            comparison,
            literal,
        })
    }

    fn check_field(&self, field: &str, literal: &Literal) -> Result<(), String> {
        let (_, data_type) = self
            .fields
            .iter()
            .find(|(name, _)| *name == field)
            .ok_or_else(|| format!("unknown field {field:?}"))?;
        let compatible = matches!(
            (data_type, literal),
            (
                DataType::Integer { .. } | DataType::Float { .. },
                Literal::Integer(_) | Literal::Float(_)
            ) | (DataType::String { .. }, Literal::String(_))
        );
        if compatible {
            Ok(())
        } else {
            Err(format!("field {field:?} of type {data_type} cannot be compared with {literal:?}"))
        }
    }
}
