//! PageDB - file-backed table store
//!
//! Single binary that provides:
//! - Table creation with a declared key column
//! - Insert, update and delete of records
//! - Bitmap indexes on any column
//! - Boolean selects over indexed and unindexed columns
//! - A randomized driver for exercising the engine

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use pagedb_storage::StorageEngine;

mod cli;
mod config;

#[derive(Parser)]
#[command(name = "pagedb")]
#[command(author, version, about = "PageDB - paged table store with bitmap indexes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (.toml, .json or .properties)
    #[arg(short, long, default_value = "pagedb.toml", env = "PAGEDB_CONFIG")]
    config: String,

    /// Data directory, overriding the configuration
    #[arg(short, long, env = "PAGEDB_DATA_DIR")]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a table
    CreateTable {
        name: String,
        /// Key column; pages are kept sorted on it
        #[arg(short, long)]
        key: String,
        /// Columns as name:type, e.g. k:string v:integer
        #[arg(required = true)]
        columns: Vec<String>,
    },

    /// Insert one record given as column=value pairs
    Insert {
        table: String,
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Update records whose match column equals the given value
    Update {
        table: String,
        /// Column to match on; must appear among the values
        #[arg(short = 'm', long = "match")]
        match_column: String,
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Delete records matching every column=value pair (all records if none)
    Delete { table: String, values: Vec<String> },

    /// Build a bitmap index on a column
    CreateIndex { table: String, column: String },

    /// Select records, e.g. `select T 'v<3' or 'k=B'`
    Select {
        table: String,
        #[arg(required = true)]
        query: Vec<String>,
        /// Print records as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print every record of a table
    Scan {
        table: String,
        #[arg(long)]
        json: bool,
    },

    /// Check a table's pages and indexes for consistency
    Verify { table: String },

    /// List tables
    Tables,

    /// Run the randomized driver against a fresh table
    Drive {
        #[arg(short, long, default_value = "drive")]
        table: String,
        #[arg(short, long, default_value_t = 1000)]
        rows: usize,
        #[arg(short, long, default_value_t = 42)]
        seed: u64,
        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load(&cli.config, cli.data_dir.as_deref()).await?;
    config::init_tracing(&config)?;

    if let Commands::Version = cli.command {
        println!("PageDB version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let metrics = match &cli.command {
        Commands::Drive { metrics: true, .. } => Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("installing metrics recorder")?,
        ),
        _ => None,
    };

    let mut engine = StorageEngine::open(&config.storage)?;

    match cli.command {
        Commands::CreateTable { name, key, columns } => {
            let columns = columns
                .iter()
                .map(|pair| {
                    pair.split_once(':')
                        .ok_or_else(|| anyhow::anyhow!("expected name:type, got {pair:?}"))
                })
                .collect::<Result<Vec<_>>>()?;
            engine.create_table(&name, &key, &columns)?;
            println!("Created table {name}");
        }

        Commands::Insert { table, values } => {
            let schema = engine.catalog().schema_for(&table)?;
            let record = cli::parse_record(&schema, &values)?;
            engine.insert(&table, record)?;
            println!("Inserted 1 record");
        }

        Commands::Update {
            table,
            match_column,
            values,
        } => {
            let schema = engine.catalog().schema_for(&table)?;
            let mask = cli::parse_record(&schema, &values)?;
            let updated = engine.update(&table, &match_column, &mask)?;
            println!("Updated {updated} records");
        }

        Commands::Delete { table, values } => {
            let schema = engine.catalog().schema_for(&table)?;
            let mask = cli::parse_record(&schema, &values)?;
            let deleted = engine.delete(&table, &mask)?;
            println!("Deleted {deleted} records");
        }

        Commands::CreateIndex { table, column } => {
            engine.create_index(&table, &column)?;
            println!("Created index on {table}.{column}");
        }

        Commands::Select { table, query, json } => {
            let schema = engine.catalog().schema_for(&table)?;
            let (terms, combinators) = cli::parse_query(&table, &schema, &query)?;
            let count = cli::print_records(engine.select(&terms, &combinators)?, json)?;
            info!("{} records selected", count);
        }

        Commands::Scan { table, json } => {
            let count = cli::print_records(engine.select_all(&table)?, json)?;
            info!("{} records scanned", count);
        }

        Commands::Verify { table } => {
            engine.verify(&table)?;
            println!("Table {table} is consistent");
        }

        Commands::Tables => {
            for name in engine.table_names() {
                println!("{name}");
            }
        }

        Commands::Drive {
            table, rows, seed, ..
        } => {
            let report = cli::drive(&mut engine, &table, rows, seed)?;
            println!(
                "inserted={} flagged={} updated={} deleted={} remaining={}",
                report.inserted, report.flagged, report.updated, report.deleted, report.remaining
            );
            if let Some(handle) = metrics {
                print!("{}", handle.render());
            }
        }

        Commands::Version => {}
    }

    Ok(())
}
