//! Structured logging with tracing
//!
//! Configurable text or JSON output and slow query tracking

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Maximum number of slow queries kept in memory
const SLOW_QUERY_HISTORY: usize = 1000;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE) or a full filter directive
    pub level: String,

    /// Enable JSON format output
    pub json_format: bool,

    /// Enable slow query logging
    pub slow_query_logging: bool,

    /// Slow query threshold in milliseconds
    pub slow_query_threshold_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            json_format: false,
            slow_query_logging: true,
            slow_query_threshold_ms: 100,
        }
    }
}

impl LoggingConfig {
    /// Parse log level from string; unknown levels fall back to INFO
    pub fn parse_level(&self) -> Level {
        match self.level.to_uppercase().as_str() {
            "ERROR" => Level::ERROR,
            "WARN" => Level::WARN,
            "INFO" => Level::INFO,
            "DEBUG" => Level::DEBUG,
            "TRACE" => Level::TRACE,
            _ => Level::INFO,
        }
    }

    /// Build a slow query logger from this configuration
    pub fn slow_query_logger(&self) -> SlowQueryLogger {
        SlowQueryLogger::new(
            Duration::from_millis(self.slow_query_threshold_ms),
            self.slow_query_logging,
        )
    }
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<SlowQueryLogger> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.parse_level().as_str().to_lowercase()));

    let subscriber = Registry::default().with(env_filter);

    if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr);

        subscriber.with(json_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .compact();

        subscriber.with(fmt_layer).try_init()?;
    }

    tracing::info!(
        "Logging initialized: level={}, json={}, slow_queries={}",
        config.level,
        config.json_format,
        config.slow_query_logging
    );

    Ok(config.slow_query_logger())
}

/// Slow query record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQuery {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub query: String,
    pub target: Option<String>,
    pub matched: usize,
}

/// Query execution tracker
pub struct QueryTracker {
    start_time: Instant,
    query: String,
    target: Option<String>,
}

/// Slow query logger
#[derive(Debug, Clone)]
pub struct SlowQueryLogger {
    threshold: Duration,
    enabled: bool,
    queries: Arc<RwLock<Vec<SlowQuery>>>,
}

impl SlowQueryLogger {
    /// Create a new slow query logger
    pub fn new(threshold: Duration, enabled: bool) -> Self {
        Self {
            threshold,
            enabled,
            queries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start tracking a query
    pub fn start_query(&self, query: String, target: Option<String>) -> QueryTracker {
        QueryTracker {
            start_time: Instant::now(),
            query,
            target,
        }
    }

    /// Finish tracking a query and log it if slow
    pub fn finish_query(&self, tracker: QueryTracker, matched: usize) {
        if !self.enabled {
            return;
        }

        let duration = tracker.start_time.elapsed();
        if duration < self.threshold {
            return;
        }

        let slow_query = SlowQuery {
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            query: tracker.query,
            target: tracker.target,
            matched,
        };

        tracing::warn!(
            target: "slow_query",
            duration_ms = slow_query.duration_ms,
            query = %slow_query.query,
            target_type = ?slow_query.target,
            matched = slow_query.matched,
            "Slow query detected"
        );

        let mut queries = self.queries.write();
        queries.push(slow_query);

        if queries.len() > SLOW_QUERY_HISTORY {
            let len = queries.len();
            queries.drain(0..len - SLOW_QUERY_HISTORY);
        }
    }

    /// Get recent slow queries, newest first
    pub fn get_slow_queries(&self, limit: usize) -> Vec<SlowQuery> {
        let queries = self.queries.read();
        queries.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for SlowQueryLogger {
    fn default() -> Self {
        LoggingConfig::default().slow_query_logger()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "INFO");
        assert_eq!(config.parse_level(), Level::INFO);

        let config = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(config.parse_level(), Level::DEBUG);

        let config = LoggingConfig {
            level: "verbose".to_string(),
            ..Default::default()
        };
        assert_eq!(config.parse_level(), Level::INFO);
    }

    #[test]
    fn test_slow_query_logger() {
        let logger = SlowQueryLogger::new(Duration::from_millis(100), true);

        let tracker =
            logger.start_query("hosts WHERE a = ?".to_string(), Some("hosts".to_string()));
        logger.finish_query(tracker, 3);
        assert!(logger.get_slow_queries(10).is_empty());

        let mut tracker = logger.start_query(
            "services WHERE b = ?".to_string(),
            Some("services".to_string()),
        );
        tracker.start_time = Instant::now() - Duration::from_millis(200);
        logger.finish_query(tracker, 7);

        let slow_queries = logger.get_slow_queries(10);
        assert_eq!(slow_queries.len(), 1);
        assert!(slow_queries[0].duration_ms >= 200);
        assert_eq!(slow_queries[0].matched, 7);
        assert_eq!(slow_queries[0].target.as_deref(), Some("services"));
    }

    #[test]
    fn test_disabled_logger_records_nothing() {
        let logger = SlowQueryLogger::new(Duration::ZERO, false);
        let tracker = logger.start_query("hosts".to_string(), None);
        logger.finish_query(tracker, 0);
        assert!(logger.get_slow_queries(10).is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let logger = SlowQueryLogger::new(Duration::ZERO, true);
        for i in 0..SLOW_QUERY_HISTORY + 5 {
            let tracker = logger.start_query(format!("query {}", i), None);
            logger.finish_query(tracker, i);
        }
        let all = logger.get_slow_queries(usize::MAX);
        assert_eq!(all.len(), SLOW_QUERY_HISTORY);
        assert_eq!(all[0].matched, SLOW_QUERY_HISTORY + 4);
    }
}
