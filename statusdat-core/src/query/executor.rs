//! Query execution over materialized status records
//!
//! A [`StatusQuery`] names a target object type, carries the filter tree
//! built from one or more where clauses and applies ordering, offset and
//! limit to the matching record positions.

use super::expression::Expression;
use super::group::{Group, GroupType};
use super::parser::{ParseError, QueryParser};
use super::part::{QueryContext, QueryPart};
use crate::config::QuerySettings;
use crate::monitoring::SlowQueryLogger;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Query against one object type
#[derive(Debug, Clone)]
pub struct StatusQuery {
    context: QueryContext,
    filter: Option<Group<Expression>>,
    sort: Vec<(String, SortOrder)>,
    offset: Option<usize>,
    limit: Option<usize>,
    parser: QueryParser,
    max_result_limit: usize,
    slow_query_logger: Option<SlowQueryLogger>,
}

impl StatusQuery {
    /// Create a query with default settings
    pub fn new(target: impl Into<String>) -> Self {
        Self::with_settings(target, &QuerySettings::default())
    }

    /// Create a query honoring engine settings
    pub fn with_settings(target: impl Into<String>, settings: &QuerySettings) -> Self {
        let mut context = QueryContext::new(target);
        context.case_insensitive_like = settings.case_insensitive_like;

        Self {
            context,
            filter: None,
            sort: Vec::new(),
            offset: None,
            limit: None,
            parser: QueryParser::new(settings.max_nesting_depth),
            max_result_limit: settings.max_result_limit,
            slow_query_logger: None,
        }
    }

    /// Report execution times to a slow query logger
    pub fn with_slow_query_logger(mut self, logger: SlowQueryLogger) -> Self {
        self.slow_query_logger = Some(logger);
        self
    }

    /// Map a column alias to a record attribute path
    pub fn with_alias(mut self, column: impl Into<String>, path: impl Into<String>) -> Self {
        self.context.aliases.insert(column.into(), path.into());
        self.bind_context();
        self
    }

    /// Add a filter expression; several calls are combined with AND
    pub fn where_clause<I>(
        mut self,
        expression: &str,
        values: I,
    ) -> Result<Self, QueryExecutionError>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut values: VecDeque<Value> = values.into_iter().collect();
        let group = self.parser.parse::<Expression>(expression, &mut values)?;
        self.add_filter(group);
        Ok(self)
    }

    /// Add an already built filter tree; combined with AND like `where_clause`
    pub fn filter_group(mut self, group: Group<Expression>) -> Self {
        self.add_filter(group);
        self
    }

    fn add_filter(&mut self, group: Group<Expression>) {
        self.filter = Some(match self.filter.take() {
            None => group,
            Some(mut existing) if existing.group_type() == GroupType::And => {
                existing.add_group(group);
                existing
            }
            Some(existing) => {
                let mut root = Group::new();
                root.add_group(existing).add_group(group);
                root
            }
        });
        self.bind_context();
    }

    fn bind_context(&mut self) {
        if let Some(filter) = self.filter.as_mut() {
            filter.set_query(Arc::new(self.context.clone()));
        }
    }

    /// Sort by field
    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Skip the first `offset` matches
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Return at most `limit` matches
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn target(&self) -> &str {
        &self.context.target
    }

    pub fn filter(&self) -> Option<&Group<Expression>> {
        self.filter.as_ref()
    }

    /// Validate query bounds
    pub fn validate(&self) -> Result<(), QueryExecutionError> {
        if let Some(limit) = self.limit {
            if limit > self.max_result_limit {
                return Err(QueryExecutionError::ValidationError(format!(
                    "Limit value too large (max: {})",
                    self.max_result_limit
                )));
            }
        }

        if let Some((field, _)) = self.sort.iter().find(|(field, _)| field.trim().is_empty()) {
            return Err(QueryExecutionError::ValidationError(format!(
                "Invalid sort field '{}'",
                field
            )));
        }

        Ok(())
    }

    /// Execute against `records`, returning matching positions
    pub fn execute(&self, records: &[Value]) -> Result<Vec<usize>, QueryExecutionError> {
        self.validate()?;

        let tracker = self
            .slow_query_logger
            .as_ref()
            .map(|logger| logger.start_query(self.to_string(), Some(self.context.target.clone())));

        let mut matched: Vec<usize> = match &self.filter {
            Some(filter) => filter.filter(records, None).into_iter().collect(),
            None => (0..records.len()).collect(),
        };

        if !self.sort.is_empty() {
            self.apply_sort(records, &mut matched);
        }

        if let Some(offset) = self.offset {
            matched.drain(..offset.min(matched.len()));
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }

        if let (Some(logger), Some(tracker)) = (&self.slow_query_logger, tracker) {
            logger.finish_query(tracker, matched.len());
        }

        debug!(
            target_type = %self.context.target,
            records = records.len(),
            matched = matched.len(),
            "Query executed"
        );

        Ok(matched)
    }

    /// Execute against `records`, returning the matching records
    pub fn fetch<'a>(&self, records: &'a [Value]) -> Result<Vec<&'a Value>, QueryExecutionError> {
        Ok(self
            .execute(records)?
            .into_iter()
            .filter_map(|i| records.get(i))
            .collect())
    }

    fn apply_sort(&self, records: &[Value], positions: &mut [usize]) {
        positions.sort_by(|&a, &b| {
            for (field, order) in &self.sort {
                let path = self.context.resolve(field);
                let a_val = records[a].get_by_path(path);
                let b_val = records[b].get_by_path(path);

                let cmp = match (a_val, b_val) {
                    (Some(av), Some(bv)) => av.compare(bv).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };

                let cmp = match order {
                    SortOrder::Ascending => cmp,
                    SortOrder::Descending => cmp.reverse(),
                };

                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            Ordering::Equal
        });
    }
}

impl std::fmt::Display for StatusQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.context.target)?;
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {}", filter)?;
        }
        for (i, (field, order)) in self.sort.iter().enumerate() {
            let keyword = if i == 0 { " ORDER BY" } else { "," };
            let dir = match order {
                SortOrder::Ascending => "ASC",
                SortOrder::Descending => "DESC",
            };
            write!(f, "{} {} {}", keyword, field, dir)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}

/// Query execution errors
#[derive(Debug, thiserror::Error)]
pub enum QueryExecutionError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(host: &str, description: &str, state: &str, last_check: Option<i64>) -> Value {
        let mut record = json!({
            "host_name": host,
            "service_description": description,
            "current_state": state,
        });
        if let Some(last_check) = last_check {
            record["last_check"] = json!(last_check);
        }
        Value::from(record)
    }

    fn services() -> Vec<Value> {
        vec![
            service("web01", "http", "0", Some(30)),
            service("web01", "disk", "2", Some(10)),
            service("web02", "http", "1", Some(20)),
            service("db01", "disk", "2", Some(40)),
            service("db01", "mysql", "0", None),
        ]
    }

    #[test]
    fn test_no_filter_returns_everything() {
        let records = services();
        let query = StatusQuery::new("services");
        assert_eq!(query.execute(&records).unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_where_clause() {
        let records = services();
        let query = StatusQuery::new("services")
            .where_clause(
                "current_state >= ? AND (host_name = ? OR service_description = ?)",
                vec![Value::from(1), Value::from("web01"), Value::from("http")],
            )
            .unwrap();
        assert_eq!(query.execute(&records).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_where_clauses_are_and_combined() {
        let records = services();
        let query = StatusQuery::new("services")
            .where_clause(
                "host_name = ? OR host_name = ?",
                vec![Value::from("web01"), Value::from("db01")],
            )
            .unwrap()
            .where_clause("current_state = ?", vec![Value::from(2)])
            .unwrap();

        assert_eq!(query.filter().unwrap().group_type(), GroupType::And);
        assert_eq!(query.execute(&records).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_parse_errors_surface() {
        let result =
            StatusQuery::new("services").where_clause("host_name = ? AND", vec![Value::from("x")]);
        assert!(matches!(
            result,
            Err(QueryExecutionError::Parse(ParseError::PlaceholderMismatch { .. }))
                | Err(QueryExecutionError::Parse(ParseError::EmptyExpression))
        ));
    }

    #[test]
    fn test_alias_applies_to_existing_filter() {
        let records = services();
        let query = StatusQuery::new("services")
            .where_clause("host = ?", vec![Value::from("db01")])
            .unwrap()
            .with_alias("host", "host_name");
        assert_eq!(query.execute(&records).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_order_offset_limit() {
        let records = services();
        let query = StatusQuery::new("services")
            .order_by("last_check", SortOrder::Descending)
            .offset(1)
            .limit(2);
        // record 4 has no last_check and sorts last in descending order
        assert_eq!(query.execute(&records).unwrap(), vec![0, 2]);

        let query = StatusQuery::new("services")
            .order_by("host_name", SortOrder::Ascending)
            .order_by("service_description", SortOrder::Ascending);
        assert_eq!(query.execute(&records).unwrap(), vec![3, 4, 1, 0, 2]);

        let query = StatusQuery::new("services").offset(10);
        assert!(query.execute(&records).unwrap().is_empty());
    }

    #[test]
    fn test_limit_validation() {
        let settings = QuerySettings {
            max_result_limit: 10,
            ..Default::default()
        };
        let query = StatusQuery::with_settings("services", &settings).limit(11);
        assert!(matches!(
            query.execute(&services()),
            Err(QueryExecutionError::ValidationError(_))
        ));
    }

    #[test]
    fn test_fetch_returns_records() {
        let records = services();
        let query = StatusQuery::new("services")
            .where_clause("service_description LIKE ?", vec![Value::from("my%")])
            .unwrap();
        let fetched = query.fetch(&records).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].get_by_path("host_name"), Some(&Value::from("db01")));
    }

    #[test]
    fn test_case_insensitive_setting() {
        let records = services();
        let settings = QuerySettings {
            case_insensitive_like: true,
            ..Default::default()
        };
        let query = StatusQuery::with_settings("services", &settings)
            .where_clause("host_name LIKE ?", vec![Value::from("DB%")])
            .unwrap();
        assert_eq!(query.execute(&records).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_slow_queries_are_recorded() {
        let logger = SlowQueryLogger::new(std::time::Duration::ZERO, true);
        let query = StatusQuery::new("services")
            .where_clause("current_state = ?", vec![Value::from(0)])
            .unwrap()
            .with_slow_query_logger(logger.clone());
        query.execute(&services()).unwrap();

        let slow = logger.get_slow_queries(10);
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].matched, 2);
        assert_eq!(slow[0].query, "services WHERE current_state = ?");
    }

    #[test]
    fn test_display() {
        let query = StatusQuery::new("hosts")
            .where_clause(
                "a = ? AND b = ? OR c = ?",
                vec![Value::from(1), Value::from(2), Value::from(3)],
            )
            .unwrap()
            .order_by("a", SortOrder::Descending)
            .limit(5);
        assert_eq!(
            query.to_string(),
            "hosts WHERE a = ? AND (b = ? OR c = ?) ORDER BY a DESC LIMIT 5"
        );
    }
}
