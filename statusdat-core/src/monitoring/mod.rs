//! Logging and slow query tracking

pub mod logging;

pub use logging::{init_logging, LoggingConfig, QueryTracker, SlowQuery, SlowQueryLogger};
