//! # lp — The "Console" of LOGPIPE
//!
//! Runs pipe-delimited queries over JSON-lines files.
//!
//! - `lp query "<text>" --table name=file.jsonl` — Run a query, print a window of the result.
//! - `lp check "<text>" --table ...` — Show the stage chain and its schemas.
//! - `lp tables --table ...` — List loaded tables.

use std::collections::BTreeSet;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lp_core::{Record, Value};
use lp_query::{
    MemoryStorage, Query, QueryCallback, QueryConfig, QueryEnv, QueryService, QueryStatus,
    ResultSet, TableRegistry,
};

type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// =============================================================================
// CLI
// =============================================================================

/// LOGPIPE — pipe-delimited log queries over JSON-lines tables.
#[derive(Parser)]
#[command(name = "lp", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true, default_value = "lp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query and print a window of its result.
    Query {
        query: String,

        #[command(flatten)]
        tables: TableArgs,

        /// First result record to print.
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Number of records to print (default: `output.default_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print records as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Build the stage chain without running it.
    Check {
        query: String,

        #[command(flatten)]
        tables: TableArgs,
    },

    /// List the loaded tables.
    Tables {
        #[command(flatten)]
        tables: TableArgs,
    },
}

#[derive(Args)]
struct TableArgs {
    /// A table to load, as `name=path.jsonl` (repeatable).
    #[arg(long = "table", value_parser = parse_table_arg)]
    tables: Vec<(String, PathBuf)>,
}

fn parse_table_arg(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected name=path, got '{}'", s)),
    }
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone)]
struct Config {
    #[serde(flatten)]
    query: QueryConfig,
    #[serde(default)]
    output: OutputConfig,
}

#[derive(Deserialize, Clone)]
struct OutputConfig {
    #[serde(default = "default_limit")]
    default_limit: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    100
}

fn load_config(path: &Path) -> CliResult<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| format!("invalid config {}: {}", path.display(), e))?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "lp=info,lp_query=info,lp_io=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lp: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Query {
            query,
            tables,
            offset,
            limit,
            json,
        } => {
            let service = service(&tables, &config)?;
            let limit = limit.unwrap_or(config.output.default_limit);
            run_query(&service, &query, offset, limit, json).await
        }

        Commands::Check { query, tables } => {
            let service = service(&tables, &config)?;
            let query = service.create(&query)?;
            println!("{}", render_chain(&query));
            Ok(())
        }

        Commands::Tables { tables } => {
            let storage = load_tables(&tables)?;
            println!("{}", render_tables(&storage));
            Ok(())
        }
    }
}

fn load_tables(args: &TableArgs) -> CliResult<Arc<MemoryStorage>> {
    let storage = Arc::new(MemoryStorage::new());
    for (name, path) in &args.tables {
        let count = storage
            .load_jsonl(name, path)
            .map_err(|e| format!("cannot load table {} from {}: {}", name, path.display(), e))?;
        tracing::info!("Loaded {} records into table {}", count, name);
    }
    Ok(storage)
}

fn service(args: &TableArgs, config: &Config) -> CliResult<QueryService> {
    let storage = load_tables(args)?;
    Ok(QueryService::new(
        QueryEnv::new(storage).with_config(config.query.clone()),
    ))
}

/// Signals the waiting command when the result is complete.
struct Completion {
    done: Mutex<Option<oneshot::Sender<usize>>>,
}

impl QueryCallback for Completion {
    fn on_eof(&self, result: &ResultSet) {
        let sender = self.done.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = sender {
            let _ = tx.send(result.len());
        }
    }
}

async fn run_query(
    service: &QueryService,
    text: &str,
    offset: usize,
    limit: usize,
    json: bool,
) -> CliResult<()> {
    let query = service.create(text)?;
    let (tx, rx) = oneshot::channel();
    query.register_query_callback(Arc::new(Completion {
        done: Mutex::new(Some(tx)),
    }));

    query.run()?;
    if !query.is_end() {
        tokio::select! {
            total = rx => {
                if let Ok(total) = total {
                    tracing::debug!("Query {} completed with {} records", query.id(), total);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, cancelling query {}", query.id());
                query.cancel();
            }
        }
    }

    if let QueryStatus::Failed(reason) = query.status() {
        return Err(format!("query {} failed: {}", query.id(), reason).into());
    }

    let rows = query.result_page(offset, limit)?;
    let total = query.result().map_or(0, |r| r.len());
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{}", render_records(&query, &rows));
    }
    eprintln!(
        "{} of {} records (offset {}, query {})",
        rows.len(),
        total,
        offset,
        query.id()
    );
    Ok(())
}

// =============================================================================
// Rendering
// =============================================================================

/// Columns: the chain's output schema first, then any other keys in `rows`.
fn columns(query: &Query, rows: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = query
        .commands()
        .last()
        .map(|tail| tail.output_schema().names().map(String::from).collect())
        .unwrap_or_default();
    let mut known: BTreeSet<String> = columns.iter().cloned().collect();
    for row in rows {
        for key in row.keys() {
            if known.insert(key.clone()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn render_records(query: &Query, rows: &[Record]) -> String {
    let columns = columns(query, rows);
    let mut builder = Builder::default();
    builder.push_record(columns.iter().cloned());
    for row in rows {
        builder.push_record(columns.iter().map(|c| cell(row.get(c))));
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "#")]
    index: usize,
    command: String,
    input: String,
    output: String,
}

fn render_chain(query: &Query) -> String {
    let rows = query.commands().iter().enumerate().map(|(index, stage)| StageRow {
        index,
        command: stage.fragment().to_string(),
        input: stage
            .core()
            .input_schema()
            .map_or_else(|| "-".to_string(), |s| s.to_string()),
        output: stage.output_schema().to_string(),
    });
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

#[derive(Tabled)]
struct TableRow {
    table: String,
    records: usize,
    schema: String,
}

fn render_tables(storage: &MemoryStorage) -> String {
    let rows = storage.tables().into_iter().map(|name| TableRow {
        records: storage.count(&name).unwrap_or(0),
        schema: storage
            .schema(&name)
            .map(|s| s.to_string())
            .unwrap_or_default(),
        table: name,
    });
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn jsonl(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_parse_table_arg() {
        assert_eq!(
            parse_table_arg("web=logs/web.jsonl").unwrap(),
            ("web".to_string(), PathBuf::from("logs/web.jsonl"))
        );
        assert!(parse_table_arg("web").is_err());
        assert!(parse_table_arg("=x.jsonl").is_err());
        assert!(parse_table_arg("web=").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "lp",
            "query",
            "table web | limit 5",
            "--table",
            "web=web.jsonl",
            "--table",
            "db=db.jsonl",
            "--limit",
            "3",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Query {
                query,
                tables,
                offset,
                limit,
                json,
            } => {
                assert_eq!(query, "table web | limit 5");
                assert_eq!(tables.tables.len(), 2);
                assert_eq!(offset, 0);
                assert_eq!(limit, Some(3));
                assert!(json);
            }
            _ => panic!("expected query command"),
        }
        assert_eq!(cli.config, PathBuf::from("lp.toml"));
    }

    #[test]
    fn test_config_defaults_and_overrides() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.output.default_limit, 100);
        assert_eq!(config.query.timeline.span_secs, 60);

        let config: Config = toml::from_str(
            "[store]\npage_size = 4096\n\n[timeline]\nflush_every = 10\n\n[output]\ndefault_limit = 5\n",
        )
        .unwrap();
        assert_eq!(config.query.store.page_size, 4096);
        assert_eq!(config.query.timeline.flush_every, 10);
        assert_eq!(config.query.timeline.span_secs, 60);
        assert_eq!(config.output.default_limit, 5);
    }

    #[test]
    fn test_missing_config_is_default() {
        let config = load_config(Path::new("/nonexistent/lp.toml")).unwrap();
        assert_eq!(config.output.default_limit, 100);
    }

    #[test]
    fn test_load_tables_and_render() {
        let file = jsonl(&[
            r#"{"name": "pen", "price": 2}"#,
            r#"{"name": "ink", "price": 5.5}"#,
        ]);
        let args = TableArgs {
            tables: vec![("products".to_string(), file.path().to_path_buf())],
        };
        let storage = load_tables(&args).unwrap();
        let rendered = render_tables(&storage);
        assert!(rendered.contains("products"));
        assert!(rendered.contains("name:string, price:double"));
    }

    #[test]
    fn test_load_missing_table_fails() {
        let args = TableArgs {
            tables: vec![("web".to_string(), PathBuf::from("/nonexistent/web.jsonl"))],
        };
        assert!(load_tables(&args).is_err());
    }

    #[tokio::test]
    async fn test_run_query_and_columns() {
        let file = jsonl(&[
            r#"{"name": "pen", "price": 2, "stock": 1}"#,
            r#"{"name": "ink", "price": 5.5}"#,
        ]);
        let args = TableArgs {
            tables: vec![("products".to_string(), file.path().to_path_buf())],
        };
        let service = service(&args, &Config::default()).unwrap();
        run_query(&service, "table products | sort -price", 0, 10, true)
            .await
            .unwrap();

        let query = service.list()[0].id;
        let query = service.get(query).unwrap();
        assert_eq!(query.status(), QueryStatus::Ended);
        let rows = query.result_page(0, 10).unwrap();
        assert_eq!(rows[0]["name"], "ink");
        assert_eq!(columns(&query, &rows), vec!["name", "price", "stock"]);

        let rendered = render_records(&query, &rows);
        assert!(rendered.contains("ink"));
    }

    #[test]
    fn test_check_renders_chain() {
        let file = jsonl(&[r#"{"name": "pen", "price": 2}"#]);
        let args = TableArgs {
            tables: vec![("products".to_string(), file.path().to_path_buf())],
        };
        let service = service(&args, &Config::default()).unwrap();
        let query = service.create("table products | fields price").unwrap();
        let rendered = render_chain(&query);
        assert!(rendered.contains("fields price"));
        assert!(rendered.contains("price:integer"));
    }
}
