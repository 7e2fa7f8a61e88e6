//! statusdat-query - filter monitoring status records from the command line
//!
//! Loads a JSON dataset (either an array of records or an object mapping
//! object types to record arrays), applies a placeholder filter expression
//! and prints the matching records as JSON.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use statusdat_core::{init_logging, EngineConfig, SortOrder, StatusQuery, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "statusdat-query")]
#[command(about = "Filter monitoring status records with placeholder expressions")]
#[command(version)]
struct Args {
    /// JSON dataset path
    #[arg(short = 'f', long)]
    data: PathBuf,

    /// Filter expression, e.g. "current_state >= ? AND host_name LIKE ?"
    #[arg(short = 'w', long)]
    filter: Option<String>,

    /// Placeholder value, bound left to right (JSON, plain strings accepted)
    #[arg(short = 'v', long = "value")]
    values: Vec<String>,

    /// Object type to query; selects a key of an object dataset
    #[arg(short = 't', long, default_value = "services")]
    target: String,

    /// Column alias as column=path
    #[arg(short = 'a', long = "alias")]
    aliases: Vec<String>,

    /// Sort field, optionally suffixed with :asc or :desc
    #[arg(short = 'o', long = "order")]
    order: Vec<String>,

    /// Number of matches to skip
    #[arg(long)]
    offset: Option<usize>,

    /// Maximum number of matches
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// Configuration file (TOML)
    #[arg(short = 'c', long, env = "STATUSDAT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,

    /// Print matching record positions instead of records
    #[arg(long)]
    indices: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if args.debug {
        config.logging.level = "DEBUG".to_string();
    }
    let slow_query_logger = init_logging(&config.logging)?;

    let records = load_records(&args.data, &args.target)?;
    info!("Loaded {} {} records from {}", records.len(), args.target, args.data.display());

    let mut query = StatusQuery::with_settings(&args.target, &config.query)
        .with_slow_query_logger(slow_query_logger);

    for alias in &args.aliases {
        let (column, path) = parse_alias(alias)?;
        query = query.with_alias(column, path);
    }

    if let Some(filter) = &args.filter {
        let values = args.values.iter().map(|raw| parse_value(raw));
        query = query
            .where_clause(filter, values)
            .with_context(|| format!("Invalid filter: {}", filter))?;
    } else if !args.values.is_empty() {
        bail!("--value given without --filter");
    }

    for order in &args.order {
        let (field, direction) = parse_order(order)?;
        query = query.order_by(field, direction);
    }
    if let Some(offset) = args.offset {
        query = query.offset(offset);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }

    debug!("Executing {}", query);

    let output = if args.indices {
        serde_json::to_string_pretty(&query.execute(&records)?)?
    } else {
        serde_json::to_string_pretty(&query.fetch(&records)?)?
    };
    println!("{}", output);

    Ok(())
}

/// Read the dataset and select the records of `target`
fn load_records(path: &Path, target: &str) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file: {}", path.display()))?;
    let data: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse data file: {}", path.display()))?;

    select_records(data, target)
}

fn select_records(data: Value, target: &str) -> Result<Vec<Value>> {
    match data {
        Value::List(records) => Ok(records),
        Value::Object(mut sections) => match sections.remove(target) {
            Some(Value::List(records)) => Ok(records),
            Some(_) => Err(anyhow!("Section '{}' is not a list of records", target)),
            None => Err(anyhow!(
                "No '{}' section in data file (available: {})",
                target,
                sections.keys().cloned().collect::<Vec<_>>().join(", ")
            )),
        },
        _ => Err(anyhow!("Data file must contain a list or an object of lists")),
    }
}

/// Parse a placeholder value as JSON, falling back to a plain string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw))
}

fn parse_alias(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((column, path)) if !column.trim().is_empty() && !path.trim().is_empty() => {
            Ok((column.trim(), path.trim()))
        }
        _ => Err(anyhow!("Invalid alias '{}', expected column=path", raw)),
    }
}

fn parse_order(raw: &str) -> Result<(&str, SortOrder)> {
    let (field, direction) = match raw.rsplit_once(':') {
        Some((field, dir)) => (field, dir),
        None => (raw, "asc"),
    };

    if field.trim().is_empty() {
        bail!("Invalid sort field in '{}'", raw);
    }

    let order = match direction.to_ascii_lowercase().as_str() {
        "asc" => SortOrder::Ascending,
        "desc" => SortOrder::Descending,
        other => bail!("Unknown sort direction '{}'", other),
    };

    Ok((field.trim(), order))
}
