//! Comparison clauses evaluated against materialized status records
//!
//! A clause has the form `<field> <operator> ?`. The placeholder is bound to
//! exactly one value when the clause is built.

use super::parser::ParseError;
use super::part::{FromClause, IndexSet, QueryContext, QueryPart};
use crate::value::Value;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// `field OP ?`; symbolic operators may touch the field, keyword operators
/// need whitespace on both sides.
fn clause_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)^\s*([a-z0-9_.]+)",
            r"(?:\s*(>=|<=|!=|<>|=|>|<)|\s+(not\s+like|not\s+in|like|in))",
            r"\s*(\(\s*\?\s*\)|\?)\s*$",
        ))
        .expect("clause pattern is valid")
    })
}

/// Comparison operator of a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotLike,
    In,
    NotIn,
}

impl Operator {
    /// Whether this operator is the negation of another one
    pub fn is_negated(&self) -> bool {
        matches!(self, Operator::NotEqual | Operator::NotLike | Operator::NotIn)
    }

    fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl FromStr for Operator {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_uppercase().as_str() {
            "=" => Ok(Operator::Equal),
            "!=" | "<>" => Ok(Operator::NotEqual),
            ">" => Ok(Operator::GreaterThan),
            ">=" => Ok(Operator::GreaterThanOrEqual),
            "<" => Ok(Operator::LessThan),
            "<=" => Ok(Operator::LessThanOrEqual),
            "LIKE" => Ok(Operator::Like),
            "NOT LIKE" => Ok(Operator::NotLike),
            "IN" => Ok(Operator::In),
            "NOT IN" => Ok(Operator::NotIn),
            _ => Err(ParseError::InvalidClause(format!("unknown operator '{}'", s))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
        };
        f.write_str(op)
    }
}

/// Translate a LIKE pattern (`%` any run, `_` one char) into a regex
fn like_to_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 2);
    source.push('^');
    for c in pattern.chars() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    source.push('$');

    RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
}

/// Clause bound to one value, filtering status records
#[derive(Debug, Clone)]
pub struct Expression {
    raw_expression: String,
    field: String,
    operator: Operator,
    value: Value,
    like: Option<Regex>,
    query: Option<Arc<QueryContext>>,
}

impl Expression {
    /// Clause text as written
    pub fn raw_expression(&self) -> &str {
        &self.raw_expression
    }

    /// Value bound to the placeholder
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Attribute path after alias resolution
    pub fn resolved_field(&self) -> &str {
        match &self.query {
            Some(query) => query.resolve(&self.field),
            None => &self.field,
        }
    }

    /// Check a single record against this clause
    pub fn matches(&self, record: &Value) -> bool {
        let hit = match record.get_by_path(self.resolved_field()) {
            // multi-valued attributes match if any element does
            Some(Value::List(items)) => items.iter().any(|item| self.test(item)),
            Some(found) => self.test(found),
            None => false,
        };

        hit != self.operator.is_negated()
    }

    /// Positive form of the operator against one attribute value
    fn test(&self, found: &Value) -> bool {
        match self.operator {
            Operator::Equal | Operator::NotEqual => found.loose_eq(&self.value),
            Operator::GreaterThan => found.compare(&self.value) == Some(Ordering::Greater),
            Operator::GreaterThanOrEqual => matches!(
                found.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::LessThan => found.compare(&self.value) == Some(Ordering::Less),
            Operator::LessThanOrEqual => matches!(
                found.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Like | Operator::NotLike => match (&self.like, found.to_match_text()) {
                (Some(pattern), Some(text)) => pattern.is_match(&text),
                _ => false,
            },
            Operator::In | Operator::NotIn => self
                .value
                .as_list()
                .map_or(false, |candidates| candidates.iter().any(|c| found.loose_eq(c))),
        }
    }

    fn compile_like(&self, case_insensitive: bool) -> Result<Option<Regex>, ParseError> {
        if !matches!(self.operator, Operator::Like | Operator::NotLike) {
            return Ok(None);
        }
        let text = self.value.to_match_text().ok_or_else(|| ParseError::InvalidValue {
            clause: self.raw_expression.clone(),
            reason: format!("LIKE needs a text pattern, got {}", self.value),
        })?;
        like_to_regex(&text, case_insensitive)
            .map(Some)
            .map_err(|e| ParseError::InvalidValue {
                clause: self.raw_expression.clone(),
                reason: e.to_string(),
            })
    }
}

impl FromClause for Expression {
    fn from_clause(clause: &str, values: &mut VecDeque<Value>) -> Result<Self, ParseError> {
        let captures = clause_pattern().captures(clause).ok_or_else(|| {
            ParseError::InvalidClause(format!(
                "expected `field operator ?`, found '{}'",
                clause
            ))
        })?;

        let field = captures[1].to_string();
        let operator = captures
            .get(2)
            .or_else(|| captures.get(3))
            .ok_or_else(|| {
                ParseError::InvalidClause(format!("missing operator in '{}'", clause))
            })
            .and_then(|op| Operator::from_str(op.as_str()))?;

        let value = values.pop_front().ok_or_else(|| ParseError::InvalidValue {
            clause: clause.to_string(),
            reason: "no value bound to placeholder".to_string(),
        })?;

        if operator.takes_list() && value.as_list().is_none() {
            return Err(ParseError::InvalidValue {
                clause: clause.to_string(),
                reason: format!("{} needs a list, got {}", operator, value),
            });
        }

        let mut expression = Expression {
            raw_expression: clause.to_string(),
            field,
            operator,
            value,
            like: None,
            query: None,
        };
        expression.like = expression.compile_like(false)?;

        Ok(expression)
    }
}

impl QueryPart for Expression {
    type Base = [Value];

    fn filter(&self, base: &[Value], idx: &IndexSet) -> IndexSet {
        idx.iter()
            .copied()
            .filter(|&i| base.get(i).map_or(false, |record| self.matches(record)))
            .collect()
    }

    fn set_query(&mut self, query: Arc<QueryContext>) {
        // the pattern already compiled once in from_clause
        if let Ok(like) = self.compile_like(query.case_insensitive_like) {
            self.like = like;
        }
        self.query = Some(query);
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw_expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(clause: &str, value: impl Into<Value>) -> Result<Expression, ParseError> {
        let mut values = VecDeque::from(vec![value.into()]);
        Expression::from_clause(clause, &mut values)
    }

    fn hosts() -> Vec<Value> {
        [
            json!({"host_name": "web01", "current_state": "0", "contact_groups": ["web"]}),
            json!({
                "host_name": "web02",
                "current_state": "2",
                "contact_groups": ["web", "oncall"]
            }),
            json!({"host_name": "db01", "current_state": "1", "contact_groups": ["dba"]}),
            json!({"host_name": "DB02", "current_state": 2}),
        ]
        .into_iter()
        .map(Value::from)
        .collect()
    }

    fn run(expr: &Expression) -> IndexSet {
        let base = hosts();
        expr.filter(&base, &(0..base.len()).collect())
    }

    #[test]
    fn test_from_clause_binds_one_value() {
        let mut values = VecDeque::from(vec![Value::from(4), Value::from("x")]);
        let expr = Expression::from_clause("numeric_val >= ?", &mut values).unwrap();
        assert_eq!(expr.raw_expression(), "numeric_val >= ?");
        assert_eq!(expr.field(), "numeric_val");
        assert_eq!(expr.operator(), Operator::GreaterThanOrEqual);
        assert_eq!(expr.value(), &Value::from(4));
        assert_eq!(values, VecDeque::from(vec![Value::from("x")]));
    }

    #[test]
    fn test_invalid_clauses() {
        let rejected = [
            "host_name ? ",
            "host_name",
            "= ?",
            "host_name == ?",
            "host_name = 'x'",
            "hostlike ?",
            "domain ?",
        ];
        for clause in rejected {
            assert!(
                matches!(build(clause, 1), Err(ParseError::InvalidClause(_))),
                "{} should be rejected",
                clause
            );
        }
        let list = Value::from(vec![Value::from("a")]);
        assert!(matches!(
            build("domain ?", list),
            Err(ParseError::InvalidClause(_))
        ));
    }

    #[test]
    fn test_symbolic_operator_may_touch_field() {
        let expr = build("current_state>=?", 1).unwrap();
        assert_eq!(expr.field(), "current_state");
        assert_eq!(expr.operator(), Operator::GreaterThanOrEqual);

        let expr = build("host_name  NOT   LIKE  ?", "web%").unwrap();
        assert_eq!(expr.field(), "host_name");
        assert_eq!(expr.operator(), Operator::NotLike);
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!(Operator::from_str("not  like").unwrap(), Operator::NotLike);
        assert_eq!(Operator::from_str("<>").unwrap(), Operator::NotEqual);
        assert_eq!(Operator::from_str("in").unwrap(), Operator::In);
        assert!(Operator::from_str("~").is_err());
    }

    #[test]
    fn test_equality_and_numeric_coercion() {
        assert_eq!(run(&build("host_name = ?", "web01").unwrap()), IndexSet::from([0]));
        assert_eq!(run(&build("current_state = ?", 2).unwrap()), IndexSet::from([1, 3]));
        assert_eq!(run(&build("current_state != ?", 2).unwrap()), IndexSet::from([0, 2]));
        assert_eq!(run(&build("current_state >= ?", 1).unwrap()), IndexSet::from([1, 2, 3]));
        assert_eq!(run(&build("current_state < ?", 1).unwrap()), IndexSet::from([0]));
    }

    #[test]
    fn test_like() {
        assert_eq!(run(&build("host_name LIKE ?", "web%").unwrap()), IndexSet::from([0, 1]));
        assert_eq!(run(&build("host_name like ?", "db_1").unwrap()), IndexSet::from([2]));
        assert_eq!(
            run(&build("host_name NOT LIKE ?", "web%").unwrap()),
            IndexSet::from([2, 3])
        );
        // regex metacharacters are literal
        assert!(run(&build("host_name LIKE ?", "web.1").unwrap()).is_empty());
    }

    #[test]
    fn test_case_insensitive_like_from_context() {
        let mut expr = build("host_name LIKE ?", "db%").unwrap();
        assert_eq!(run(&expr), IndexSet::from([2]));

        let mut ctx = QueryContext::new("hosts");
        ctx.case_insensitive_like = true;
        expr.set_query(Arc::new(ctx));
        assert_eq!(run(&expr), IndexSet::from([2, 3]));

        expr.set_query(Arc::new(QueryContext::new("hosts")));
        assert_eq!(run(&expr), IndexSet::from([2]));
    }

    #[test]
    fn test_in_requires_list() {
        assert!(matches!(
            build("host_name IN ?", "web01"),
            Err(ParseError::InvalidValue { .. })
        ));

        let list = Value::from(vec![Value::from("web01"), Value::from("db01")]);
        assert_eq!(run(&build("host_name IN (?)", list.clone()).unwrap()), IndexSet::from([0, 2]));
        assert_eq!(run(&build("host_name NOT IN ?", list).unwrap()), IndexSet::from([1, 3]));
    }

    #[test]
    fn test_multi_valued_attribute() {
        assert_eq!(run(&build("contact_groups = ?", "web").unwrap()), IndexSet::from([0, 1]));
        // missing attribute matches negated operators only
        assert_eq!(run(&build("contact_groups != ?", "web").unwrap()), IndexSet::from([2, 3]));
    }

    #[test]
    fn test_alias_resolution() {
        let mut expr = build("host = ?", "db01").unwrap();
        assert!(run(&expr).is_empty());

        expr.set_query(Arc::new(QueryContext::new("hosts").with_alias("host", "host_name")));
        assert_eq!(expr.resolved_field(), "host_name");
        assert_eq!(run(&expr), IndexSet::from([2]));
    }

    #[test]
    fn test_filter_respects_candidates_and_bounds() {
        let base = hosts();
        let expr = build("current_state = ?", 2).unwrap();
        assert_eq!(expr.filter(&base, &IndexSet::from([0, 1, 42])), IndexSet::from([1]));
    }
}
