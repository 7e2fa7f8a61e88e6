//! Capability contract shared by leaf expressions and groups
//!
//! The group engine never knows which concrete expression kind it builds.
//! Backends plug in their own kind by implementing [`FromClause`] and
//! [`QueryPart`].

use super::parser::ParseError;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Set of index keys (positions in a materialized collection)
pub type IndexSet = BTreeSet<usize>;

/// A collection whose index keys can be enumerated
pub trait IndexedBase {
    /// All index keys of this collection
    fn index_keys(&self) -> IndexSet;
}

impl<T> IndexedBase for [T] {
    fn index_keys(&self) -> IndexSet {
        (0..self.len()).collect()
    }
}

impl<T> IndexedBase for Vec<T> {
    fn index_keys(&self) -> IndexSet {
        self.as_slice().index_keys()
    }
}

/// Anything that can narrow a candidate index set against a base collection
pub trait QueryPart {
    /// Materialized collection this part filters
    type Base: IndexedBase + ?Sized;

    /// Return the members of `idx` this part matches in `base`
    fn filter(&self, base: &Self::Base, idx: &IndexSet) -> IndexSet;

    /// Tell this part which query it belongs to
    fn set_query(&mut self, query: Arc<QueryContext>);
}

/// Construction of a leaf expression from its clause text
pub trait FromClause: Sized {
    /// Build an expression from `clause`, consuming its bound values from
    /// the front of `values`.
    fn from_clause(clause: &str, values: &mut VecDeque<Value>) -> Result<Self, ParseError>;
}

/// Information about the query a filter tree belongs to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryContext {
    /// Object type being queried (e.g. "hosts", "services")
    pub target: String,
    /// Column aliases mapped to record attribute paths
    pub aliases: BTreeMap<String, String>,
    /// Match LIKE patterns ignoring case
    pub case_insensitive_like: bool,
}

impl QueryContext {
    /// Create a context for a target
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            aliases: BTreeMap::new(),
            case_insensitive_like: false,
        }
    }

    /// Map a column alias to an attribute path
    pub fn with_alias(mut self, column: impl Into<String>, path: impl Into<String>) -> Self {
        self.aliases.insert(column.into(), path.into());
        self
    }

    /// Resolve a field name through the alias table
    pub fn resolve<'a>(&'a self, field: &'a str) -> &'a str {
        self.aliases.get(field).map(String::as_str).unwrap_or(field)
    }
}
