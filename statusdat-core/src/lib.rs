//! statusdat-core - query engine for flat-file monitoring status data
//!
//! This crate provides:
//! - A parser for SQL-like boolean filter expressions with `?` placeholders
//! - AND/OR group trees evaluated as index set intersections and unions
//! - A pluggable expression contract plus a record-based implementation
//! - Query execution with ordering and limits, configuration and logging

pub mod config;
pub mod monitoring;
pub mod query;
pub mod value;

pub use config::{EngineConfig, QuerySettings};
pub use monitoring::*;
pub use query::*;
pub use value::Value;
