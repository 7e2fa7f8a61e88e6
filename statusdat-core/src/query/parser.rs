//! Boolean expression parser
//!
//! Turns strings like `numeric_val >= ? AND (host_name = ? OR state = ?)`
//! into a [`Group`] tree. Parsing happens in two steps: a tokenizer that
//! produces clause / operator / parenthesis tokens, then a recursive
//! descent over that token list.
//!
//! Mixed operators without parentheses are resolved positionally: the first
//! operator seen owns the group, and a change of operator moves the last
//! operand and everything after it into a trailing nested group, so
//! `A AND B OR C` parses as `A AND (B OR C)`.

use super::group::{Group, GroupType, Item};
use super::part::FromClause;
use crate::value::Value;
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

/// Default bound on parenthesis nesting
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 32;

/// Placeholder character in clauses
pub const PLACEHOLDER: char = '?';

/// Lexical token of an expression string
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Comparison clause text, e.g. `host_name = ?`
    Clause(String),
    And,
    Or,
    Open,
    Close,
}

impl Token {
    fn operator(&self) -> Option<GroupType> {
        match self {
            Token::And => Some(GroupType::And),
            Token::Or => Some(GroupType::Or),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Clause(text) => f.write_str(text),
            Token::And => f.write_str("AND"),
            Token::Or => f.write_str("OR"),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
        }
    }
}

/// Split an expression string into tokens
///
/// `AND`/`OR` are only operators as standalone uppercase words outside of
/// quotes. A `(` opens a group only where an operand starts; parentheses
/// inside a clause (`state IN (?)`) stay part of the clause text.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut clause = String::new();
    let mut clause_depth = 0usize;
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut chars = input.char_indices();

    while let Some((pos, c)) = chars.next() {
        if let Some(q) = quote {
            clause.push(c);
            if c == q {
                quote = None;
            }
            prev = Some(c);
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                clause.push(c);
            }
            '(' if clause_depth == 0 && clause.trim().is_empty() => {
                clause.clear();
                tokens.push(Token::Open);
            }
            '(' => {
                clause_depth += 1;
                clause.push(c);
            }
            ')' if clause_depth > 0 => {
                clause_depth -= 1;
                clause.push(c);
            }
            ')' => {
                flush_clause(&mut clause, &mut tokens);
                tokens.push(Token::Close);
            }
            _ if clause_depth == 0 && is_word_boundary(prev) => {
                match keyword_at(&input[pos..]) {
                    Some((token, len)) => {
                        flush_clause(&mut clause, &mut tokens);
                        tokens.push(token);
                        // keywords are ASCII, one char per byte
                        for _ in 1..len {
                            chars.next();
                        }
                        prev = Some(' ');
                        continue;
                    }
                    None => clause.push(c),
                }
            }
            _ => clause.push(c),
        }
        prev = Some(c);
    }

    if quote.is_some() {
        return Err(ParseError::UnterminatedQuote(input.to_string()));
    }
    if clause_depth > 0 {
        return Err(ParseError::UnbalancedParentheses(input.to_string()));
    }
    flush_clause(&mut clause, &mut tokens);

    Ok(tokens)
}

fn flush_clause(clause: &mut String, tokens: &mut Vec<Token>) {
    let text = clause.trim();
    if !text.is_empty() {
        tokens.push(Token::Clause(text.to_string()));
    }
    clause.clear();
}

fn is_word_boundary(prev: Option<char>) -> bool {
    match prev {
        None => true,
        Some(c) => c.is_whitespace() || c == '(' || c == ')',
    }
}

fn keyword_at(rest: &str) -> Option<(Token, usize)> {
    for (keyword, token) in [("AND", Token::And), ("OR", Token::Or)] {
        if let Some(after) = rest.strip_prefix(keyword) {
            let bounded = after
                .chars()
                .next()
                .map_or(true, |c| c.is_whitespace() || c == '(' || c == ')');
            if bounded {
                return Some((token, keyword.len()));
            }
        }
    }
    None
}

/// Count placeholders outside of quoted literals
pub fn count_placeholders(clause: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut count = 0;

    for c in clause.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == PLACEHOLDER => count += 1,
            None => {}
        }
    }

    count
}

fn check_balance(input: &str, tokens: &[Token]) -> Result<(), ParseError> {
    let mut depth = 0usize;
    for token in tokens {
        match token {
            Token::Open => depth += 1,
            Token::Close => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ParseError::UnbalancedParentheses(input.to_string()))?;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ParseError::UnbalancedParentheses(input.to_string()));
    }
    Ok(())
}

/// Parser for boolean filter expressions
#[derive(Debug, Clone)]
pub struct QueryParser {
    max_nesting_depth: usize,
}

impl QueryParser {
    /// Create a parser with a nesting bound
    pub fn new(max_nesting_depth: usize) -> Self {
        Self { max_nesting_depth }
    }

    /// Parse `expression`, binding placeholders to `values` left to right
    ///
    /// The number of placeholders must match `values.len()`. Values are
    /// removed from `values` only if the whole expression parses.
    pub fn parse<E: FromClause>(
        &self,
        expression: &str,
        values: &mut VecDeque<Value>,
    ) -> Result<Group<E>, ParseError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err(ParseError::EmptyExpression);
        }
        check_balance(expression, &tokens)?;

        let expected = count_placeholders(expression);
        if expected != values.len() {
            return Err(ParseError::PlaceholderMismatch {
                expected,
                supplied: values.len(),
            });
        }

        let mut remaining = values.clone();
        let mut cursor = Cursor {
            tokens: &tokens,
            pos: 0,
        };
        let group = self.parse_group(&mut cursor, 0, &mut remaining)?;

        if let Some(token) = cursor.peek() {
            return Err(ParseError::UnexpectedToken {
                token: token.to_string(),
                token_index: cursor.pos,
            });
        }

        debug!(
            expression,
            group_type = %group.group_type(),
            expressions = group.expression_count(),
            consumed = values.len() - remaining.len(),
            "Parsed filter expression"
        );

        *values = remaining;
        Ok(group)
    }

    fn parse_group<E: FromClause>(
        &self,
        cursor: &mut Cursor<'_>,
        depth: usize,
        values: &mut VecDeque<Value>,
    ) -> Result<Group<E>, ParseError> {
        if depth > self.max_nesting_depth {
            return Err(ParseError::TooDeep(self.max_nesting_depth));
        }

        let mut group = Group::new();
        let mut group_type: Option<GroupType> = None;
        let mut implicit: Option<Group<E>> = None;

        let first = self.parse_operand(cursor, depth, values)?;
        group.add_item(first);

        loop {
            let op = match cursor.peek() {
                None | Some(Token::Close) => break,
                Some(token) => match token.operator() {
                    Some(op) => op,
                    None => {
                        return Err(ParseError::UnexpectedToken {
                            token: token.to_string(),
                            token_index: cursor.pos,
                        })
                    }
                },
            };
            cursor.pos += 1;

            if let Some(sub) = &implicit {
                if sub.group_type() != op {
                    return Err(ParseError::AmbiguousPrecedence(format!(
                        "second change of operator to {} without parentheses",
                        op
                    )));
                }
            }

            let operand = self.parse_operand(cursor, depth, values)?;

            match (group_type, implicit.as_mut()) {
                (None, _) => {
                    group_type = Some(op);
                    group.add_item(operand);
                }
                (Some(_), Some(sub)) => {
                    sub.add_item(operand);
                }
                (Some(current), None) if current == op => {
                    group.add_item(operand);
                }
                (Some(_), None) => {
                    let mut sub = Group::with_type(op);
                    if let Some(last) = group.pop_item() {
                        sub.add_item(last);
                    }
                    sub.add_item(operand);
                    implicit = Some(sub);
                }
            }
        }

        group.set_type(group_type.unwrap_or_default());
        if let Some(sub) = implicit {
            group.add_group(sub);
        }

        Ok(group)
    }

    fn parse_operand<E: FromClause>(
        &self,
        cursor: &mut Cursor<'_>,
        depth: usize,
        values: &mut VecDeque<Value>,
    ) -> Result<Item<E>, ParseError> {
        let token_index = cursor.pos;
        match cursor.next() {
            Some(Token::Clause(text)) => Self::build_expression(text, values).map(Item::Expression),
            Some(Token::Open) => {
                let nested = self.parse_group(cursor, depth + 1, values)?;
                match cursor.next() {
                    Some(Token::Close) => Ok(Item::Group(nested)),
                    Some(token) => Err(ParseError::UnexpectedToken {
                        token: token.to_string(),
                        token_index: cursor.pos - 1,
                    }),
                    None => Err(ParseError::UnbalancedParentheses(String::from("("))),
                }
            }
            Some(token) => Err(ParseError::UnexpectedToken {
                token: token.to_string(),
                token_index,
            }),
            None => Err(ParseError::EmptyExpression),
        }
    }

    fn build_expression<E: FromClause>(
        clause: &str,
        values: &mut VecDeque<Value>,
    ) -> Result<E, ParseError> {
        let expected = count_placeholders(clause);
        let before = values.len();
        let expression = E::from_clause(clause, values)?;
        let mismatch = |consumed: usize| ParseError::BindingMismatch {
            clause: clause.to_string(),
            expected,
            consumed,
        };

        // a clause that pushes values back counts as consuming none
        let consumed = before.checked_sub(values.len()).ok_or_else(|| mismatch(0))?;
        if consumed != expected {
            return Err(mismatch(consumed));
        }

        Ok(expression)
    }
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NESTING_DEPTH)
    }
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }
}

/// Expression parsing errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty expression")]
    EmptyExpression,

    #[error("Unbalanced parentheses: {0}")]
    UnbalancedParentheses(String),

    #[error("Unterminated quote: {0}")]
    UnterminatedQuote(String),

    #[error("Unexpected token '{token}' at token {token_index}")]
    UnexpectedToken { token: String, token_index: usize },

    #[error("Expression has {expected} placeholders but {supplied} values were supplied")]
    PlaceholderMismatch { expected: usize, supplied: usize },

    #[error("Clause '{clause}' has {expected} placeholders but consumed {consumed} values")]
    BindingMismatch {
        clause: String,
        expected: usize,
        consumed: usize,
    },

    #[error("Ambiguous operator precedence: {0}")]
    AmbiguousPrecedence(String),

    #[error("Invalid clause: {0}")]
    InvalidClause(String),

    #[error("Invalid value for '{clause}': {reason}")]
    InvalidValue { clause: String, reason: String },

    #[error("Expression nesting exceeds maximum depth of {0}")]
    TooDeep(usize),
}
