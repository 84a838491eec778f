// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fuzzcache CLI
//!
//! Operator tooling for the shared cache: inspect and invalidate the validity
//! index, and replay recorded call traces against SQLite databases.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fuzzcache_core::{Arg, CacheConfig, CallKind, TableKey};
use fuzzcache_query::{Dispatcher, Reply, SqliteConnector};
use fuzzcache_storage::{SegmentKey, SharedStore, ValidityIndex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fuzzcache")]
#[command(about = "Fuzzcache - shared query cache for fuzzed web applications", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the segment directory
    #[arg(long)]
    segment_dir: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the derived segment key
    Key,

    /// Dump the validity index as JSON
    Index,

    /// Clear every validity bit under a table
    Invalidate {
        /// Table name as it appears in queries
        #[arg(long)]
        table: String,
    },

    /// Drop the validity index
    Reset,

    /// Feed a JSON call trace through a dispatcher
    Run {
        /// File holding `[{"call": "mysqli_query", "args": [...]}, ...]`
        #[arg(long)]
        trace: PathBuf,

        /// Directory of `<database>.sqlite` files
        #[arg(long)]
        sqlite_root: PathBuf,
    },
}

/// One intercepted call in a trace file
#[derive(Debug, Deserialize)]
struct TraceCall {
    call: CallKind,
    #[serde(default)]
    args: Vec<Arg>,
}

#[derive(Debug, Serialize)]
struct CallOutcome {
    index: usize,
    call: CallKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn load_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = &cli.segment_dir {
        config.segment_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn index_json(index: &ValidityIndex) -> serde_json::Value {
    let tables: serde_json::Map<String, serde_json::Value> = index
        .tables()
        .map(|table| {
            let queries: serde_json::Map<String, serde_json::Value> = index
                .queries(table)
                .map(|(query, bit)| (query.to_string(), json!(bit)))
                .collect();
            (table.to_string(), serde_json::Value::Object(queries))
        })
        .collect();
    json!({
        "valid": index.valid_count(),
        "tables": tables,
    })
}

fn run_trace(
    store: SharedStore,
    config: &CacheConfig,
    trace: &Path,
    sqlite_root: &Path,
) -> Result<()> {
    let text = std::fs::read_to_string(trace)
        .with_context(|| format!("Failed to read trace {}", trace.display()))?;
    let calls: Vec<TraceCall> = serde_json::from_str(&text).context("Failed to parse trace")?;

    let connector = Arc::new(SqliteConnector::new(sqlite_root));
    let mut dispatcher = Dispatcher::new(store, connector, config);

    for (index, TraceCall { call, args }) in calls.into_iter().enumerate() {
        let outcome = match dispatcher.dispatch(call, args) {
            Ok(reply) => CallOutcome {
                index,
                call,
                reply: Some(reply),
                error: None,
            },
            Err(e) => CallOutcome {
                index,
                call,
                reply: None,
                error: Some(e.to_string()),
            },
        };
        println!("{}", serde_json::to_string(&outcome)?);
    }

    let stats = dispatcher.stats();
    info!(
        calls = stats.calls,
        hit_rate = stats.hit_rate(),
        "trace replay finished"
    );
    println!("{}", serde_json::to_string(&json!({ "stats": stats }))?);
    Ok(())
}

fn open_store(config: &CacheConfig) -> Result<SharedStore> {
    SharedStore::open(config).with_context(|| {
        format!("Failed to open segments in {}", config.segment_dir.display())
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries JSON
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Key => {
            let key = SegmentKey::derive(&config.key_path, config.key_discriminator)
                .with_context(|| {
                    format!("Failed to derive key from {}", config.key_path.display())
                })?;
            println!("{key}");
        }
        Commands::Index => {
            let index = open_store(&config)?.load_index(config.index_key);
            println!("{}", serde_json::to_string_pretty(&index_json(&index))?);
        }
        Commands::Invalidate { table } => {
            let key = TableKey::of(&table);
            let cleared = open_store(&config)?
                .update_index(config.index_key, |index| index.clear_table(key));
            info!(table = %table, key = %key, cleared, "table invalidated");
            println!("{}", json!({ "table": table, "key": key.to_string(), "cleared": cleared }));
        }
        Commands::Reset => {
            let removed = open_store(&config)?.reset_index(config.index_key);
            println!("{}", json!({ "removed": removed }));
        }
        Commands::Run { trace, sqlite_root } => {
            run_trace(open_store(&config)?, &config, &trace, &sqlite_root)?;
        }
    }

    Ok(())
}
