//! Query engine for status data
//!
//! Boolean filter expressions are parsed into AND/OR group trees and
//! evaluated as set operations over the index keys of a materialized
//! collection.

pub mod executor;
pub mod expression;
pub mod group;
pub mod parser;
pub mod part;

pub use executor::{QueryExecutionError, SortOrder, StatusQuery};
pub use expression::{Expression, Operator};
pub use group::{Group, GroupType, Item};
pub use parser::{ParseError, QueryParser};
pub use part::{FromClause, IndexSet, IndexedBase, QueryContext, QueryPart};
