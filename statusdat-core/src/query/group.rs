//! AND/OR filter groups
//!
//! A [`Group`] is a boolean tree node holding leaf expressions and nested
//! groups. Evaluation narrows an index set: AND intersects the results of
//! its items, OR unites them.

use super::parser::{ParseError, QueryParser};
use super::part::{FromClause, IndexSet, IndexedBase, QueryContext, QueryPart};
use crate::value::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Boolean combinator of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupType {
    /// All items must match
    #[default]
    And,
    /// At least one item must match
    Or,
}

impl GroupType {
    /// Keyword used in expression strings
    pub fn keyword(&self) -> &'static str {
        match self {
            GroupType::And => "AND",
            GroupType::Or => "OR",
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Item of a group: a leaf expression or a nested group
#[derive(Debug, Clone, PartialEq)]
pub enum Item<E> {
    Expression(E),
    Group(Group<E>),
}

impl<E> Item<E> {
    /// Get the leaf expression, if this item is one
    pub fn as_expression(&self) -> Option<&E> {
        match self {
            Item::Expression(expr) => Some(expr),
            Item::Group(_) => None,
        }
    }

    /// Get the nested group, if this item is one
    pub fn as_group(&self) -> Option<&Group<E>> {
        match self {
            Item::Group(group) => Some(group),
            Item::Expression(_) => None,
        }
    }
}

impl<E: QueryPart> Item<E> {
    fn filter(&self, base: &E::Base, idx: &IndexSet) -> IndexSet {
        match self {
            Item::Expression(expr) => expr.filter(base, idx),
            Item::Group(group) => group.filter(base, Some(idx)),
        }
    }

    fn set_query(&mut self, query: Arc<QueryContext>) {
        match self {
            Item::Expression(expr) => expr.set_query(query),
            Item::Group(group) => QueryPart::set_query(group, query),
        }
    }
}

/// AND/OR collection of expressions and nested groups
#[derive(Debug, Clone, PartialEq)]
pub struct Group<E> {
    group_type: GroupType,
    items: Vec<Item<E>>,
}

impl<E> Group<E> {
    /// Create an empty AND group
    pub fn new() -> Self {
        Self::with_type(GroupType::And)
    }

    /// Create an empty group of the given type
    pub fn with_type(group_type: GroupType) -> Self {
        Self {
            group_type,
            items: Vec::new(),
        }
    }

    /// Append an item
    pub fn add_item(&mut self, item: Item<E>) -> &mut Self {
        self.items.push(item);
        self
    }

    /// Append a leaf expression
    pub fn add_expression(&mut self, expression: E) -> &mut Self {
        self.add_item(Item::Expression(expression))
    }

    /// Append a nested group
    pub fn add_group(&mut self, group: Group<E>) -> &mut Self {
        self.add_item(Item::Group(group))
    }

    /// Override the combinator; existing items are kept as they are
    pub fn set_type(&mut self, group_type: GroupType) -> &mut Self {
        self.group_type = group_type;
        self
    }

    pub fn group_type(&self) -> GroupType {
        self.group_type
    }

    pub fn items(&self) -> &[Item<E>] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn pop_item(&mut self) -> Option<Item<E>> {
        self.items.pop()
    }

    /// Number of leaf expressions in the whole tree
    pub fn expression_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                Item::Expression(_) => 1,
                Item::Group(group) => group.expression_count(),
            })
            .sum()
    }

    /// Nesting depth of the tree (a flat group has depth 1)
    pub fn depth(&self) -> usize {
        1 + self
            .items
            .iter()
            .filter_map(Item::as_group)
            .map(Group::depth)
            .max()
            .unwrap_or(0)
    }
}

impl<E: FromClause> Group<E> {
    /// Parse a boolean expression string into a group tree
    ///
    /// Consumed values are removed from the front of `values`; on error
    /// `values` is left untouched.
    pub fn from_string(expression: &str, values: &mut VecDeque<Value>) -> Result<Self, ParseError> {
        QueryParser::default().parse(expression, values)
    }
}

impl<E: QueryPart> Group<E> {
    /// Evaluate the tree against `base`
    ///
    /// With no `idx` every key of `base` is a candidate. An empty group
    /// matches nothing.
    pub fn filter(&self, base: &E::Base, idx: Option<&IndexSet>) -> IndexSet {
        if self.items.is_empty() {
            return IndexSet::new();
        }

        let candidates = match idx {
            Some(idx) => idx.clone(),
            None => base.index_keys(),
        };

        let result = match self.group_type {
            GroupType::And => self.items.iter().fold(candidates, |acc, item| {
                let matched = item.filter(base, &acc);
                acc.intersection(&matched).copied().collect()
            }),
            GroupType::Or => self.items.iter().fold(IndexSet::new(), |mut acc, item| {
                acc.extend(item.filter(base, &candidates));
                acc
            }),
        };

        trace!(
            group_type = %self.group_type,
            items = self.items.len(),
            matched = result.len(),
            "Group filtered"
        );

        result
    }
}

impl<E: QueryPart> QueryPart for Group<E> {
    type Base = E::Base;

    fn filter(&self, base: &Self::Base, idx: &IndexSet) -> IndexSet {
        Group::filter(self, base, Some(idx))
    }

    fn set_query(&mut self, query: Arc<QueryContext>) {
        for item in &mut self.items {
            item.set_query(Arc::clone(&query));
        }
    }
}

impl<E> Default for Group<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Display> fmt::Display for Group<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, " {} ", self.group_type)?;
            }
            match item {
                Item::Expression(expr) => write!(f, "{}", expr)?,
                Item::Group(group) => write!(f, "({})", group)?,
            }
        }
        Ok(())
    }
}
