//! dofusdb-ingest CLI - collect, convert and import DofusDB records
//!
//! # Commands
//!
//! ```bash
//! dofusdb-ingest entities dofusdb                          # List configured entities
//! dofusdb-ingest fetch dofusdb monsters --limit 20         # Raw records
//! dofusdb-ingest convert dofusdb monsters --id 31          # Converted record
//! dofusdb-ingest import dofusdb monsters --limit 50 --dry-run
//! dofusdb-ingest seed config/seed.json                     # Schema + formulas + rules
//! ```
//!
//! Settings come from `DOFUSDB_*` environment variables (or `.env`), logs
//! from `RUST_LOG`.

use clap::{Parser, Subcommand};
use dofusdb_ingest::{
    logging, CollectOptions, CollectService, ConfigLoader, Database, ImportOptions, Pipeline, SeedData, Settings,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dofusdb-ingest")]
#[command(about = "Collect, convert, validate and import DofusDB records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entities configured for a source
    Entities {
        source: String,
    },

    /// Fetch raw records (one by id, or a paged list)
    Fetch {
        source: String,
        entity: String,

        /// External id of a single record
        #[arg(long)]
        id: Option<String>,

        #[command(flatten)]
        paging: PagingArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert one raw record (fetched by id or read from a file)
    Convert {
        source: String,
        entity: String,

        #[arg(long, conflicts_with = "input", required_unless_present = "input")]
        id: Option<String>,

        /// Raw record JSON file
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long)]
        lang: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the whole pipeline and print the import report
    Import {
        source: String,
        entity: String,

        /// Import a single record
        #[arg(long)]
        id: Option<String>,

        #[command(flatten)]
        paging: PagingArgs,

        /// Report what would happen, write nothing
        #[arg(long)]
        dry_run: bool,

        /// Overwrite records that already exist
        #[arg(long)]
        force: bool,

        /// Integrate records that fail validation
        #[arg(long)]
        skip_validation: bool,

        #[arg(long)]
        lang: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create the database schema and load characteristics, formulas and conversion config
    Seed {
        /// Seed JSON file
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct PagingArgs {
    /// Maximum records (0 = all)
    #[arg(long, default_value = "0")]
    limit: usize,

    /// Skip this many records first
    #[arg(long, default_value = "0")]
    offset: usize,

    /// Records per HTTP request
    #[arg(long)]
    page_size: Option<usize>,

    /// Filter, repeatable: --filter level=20 --filter race=1,2
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    filters: Vec<String>,
}

impl PagingArgs {
    fn options(&self) -> CollectOptions {
        let mut options = CollectOptions::limit(self.limit).with_offset(self.offset);
        options.page_size = self.page_size;
        options
    }

    fn filters(&self) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
        parse_filters(&self.filters)
    }
}

#[tokio::main]
async fn main() {
    // .env first, so RUST_LOG from it reaches the subscriber
    dotenvy::dotenv().ok();
    logging::init();
    let settings = Settings::from_env();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Entities { source } => cmd_entities(&settings, &source),

        Commands::Fetch {
            source,
            entity,
            id,
            paging,
            output,
        } => cmd_fetch(&settings, &source, &entity, id.as_deref(), &paging, output.as_deref()).await,

        Commands::Convert {
            source,
            entity,
            id,
            input,
            lang,
            output,
        } => {
            cmd_convert(
                &settings,
                &source,
                &entity,
                id.as_deref(),
                input.as_deref(),
                lang.as_deref(),
                output.as_deref(),
            )
            .await
        }

        Commands::Import {
            source,
            entity,
            id,
            paging,
            dry_run,
            force,
            skip_validation,
            lang,
            output,
        } => {
            let options = ImportOptions {
                dry_run,
                force_update: force,
                skip_validation,
                lang,
            };
            cmd_import(&settings, &source, &entity, id.as_deref(), &paging, &options, output.as_deref()).await
        }

        Commands::Seed { file } => cmd_seed(&settings, &file),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_entities(settings: &Settings, source: &str) -> Result<(), Box<dyn std::error::Error>> {
    let loader = ConfigLoader::new(&settings.config_dir);
    for entity in loader.list_entities(source)? {
        println!("{}", entity);
    }
    Ok(())
}

async fn cmd_fetch(
    settings: &Settings,
    source: &str,
    entity: &str,
    id: Option<&str>,
    paging: &PagingArgs,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let collect = CollectService::new(Arc::new(ConfigLoader::new(&settings.config_dir)), settings);

    match id {
        Some(id) => {
            let record = collect.fetch_one(source, entity, id).await?;
            write_json(&record, output)
        }
        None => {
            let collected = collect
                .fetch_many(source, entity, &paging.filters()?, &paging.options())
                .await?;
            tracing::info!(
                collected = collected.meta.collected,
                total = collected.meta.total,
                pages = collected.meta.pages,
                "fetched"
            );
            write_json(&collected, output)
        }
    }
}

async fn cmd_convert(
    settings: &Settings,
    source: &str,
    entity: &str,
    id: Option<&str>,
    input: Option<&Path>,
    lang: Option<&str>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::open(settings)?;

    let raw: Value = match (id, input) {
        (_, Some(path)) => serde_json::from_str(&fs::read_to_string(path)?)?,
        (Some(id), None) => pipeline.collect().fetch_one(source, entity, id).await?,
        (None, None) => return Err("either --id or --input is required".into()),
    };

    let record = pipeline.convert(source, entity, &raw, lang)?;
    write_json(&record, output)
}

async fn cmd_import(
    settings: &Settings,
    source: &str,
    entity: &str,
    id: Option<&str>,
    paging: &PagingArgs,
    options: &ImportOptions,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::open(settings)?;

    match id {
        Some(id) => {
            let report = pipeline.import_one(source, entity, id, options).await?;
            write_json(&report, output)
        }
        None => {
            let report = pipeline
                .import_many(source, entity, &paging.filters()?, &paging.options(), options)
                .await?;
            write_json(&report, output)
        }
    }
}

fn cmd_seed(settings: &Settings, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let seed = SeedData::from_file(file)?;
    let database = Database::open(&settings.database)?;
    let report = database.seed(&seed)?;
    tracing::info!(database = %settings.database.display(), "database seeded");
    write_json(&report, None)
}

/// `key=value` pairs into a filter object. Values are parsed as JSON when
/// possible; comma-separated values become arrays.
fn parse_filters(pairs: &[String]) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
    let mut filters = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("invalid filter '{}', expected KEY=VALUE", pair))?;

        let parse = |v: &str| serde_json::from_str(v.trim()).unwrap_or_else(|_| Value::String(v.trim().to_string()));
        let value = if value.contains(',') {
            Value::Array(value.split(',').map(parse).collect())
        } else {
            parse(value)
        };
        filters.insert(key.trim().to_string(), value);
    }
    Ok(filters)
}

fn write_json<T: Serialize>(value: &T, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let content = serde_json::to_string_pretty(value)?;
    write_output(&content, path)
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            tracing::info!(path = %p.display(), "output written");
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
