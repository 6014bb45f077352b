//! # Defect Harness CLI (`alm`)
//!
//! The `alm` binary syncs defects from ALM into a local store and queries
//! them offline.
//!
//! ## Usage
//!
//! ```bash
//! alm --config ./config/alm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `alm sync` | Fetch all defects and publish a new generation |
//! | `alm sync-file <file>` | Publish a saved API response |
//! | `alm show <id>` | Show one defect |
//! | `alm list` | Filtered list sorted by priority and age |
//! | `alm count` | Count defects matching filters |
//! | `alm search "<query>"` | Full-text prefix search |
//! | `alm stats` | Aggregate statistics |
//! | `alm query "<sql>"` | Ad-hoc read-only SQL |
//! | `alm schema` | Table documentation for `alm query` |
//! | `alm history` | List published generations |
//! | `alm config import-curl` | Create the `[alm]` section from a curl command |
//! | `alm serve` | Start the dashboard API |

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Read};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use defect_harness::config::{self, Config};
use defect_harness::curl;
use defect_harness::filter::{self, DefectFilter};
use defect_harness::get;
use defect_harness::ingest::{self, SyncOverrides};
use defect_harness::progress::ProgressMode;
use defect_harness::schema;
use defect_harness::search;
use defect_harness::server;
use defect_harness::sql;
use defect_harness::stats;
use defect_harness::store::{self, DataDir};

/// Defect Harness: sync ALM defects locally and query them offline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Read-only commands work without one.
#[derive(Parser)]
#[command(
    name = "alm",
    about = "Sync ALM defects into a local SQLite store and query them offline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/alm.toml")]
    config: PathBuf,

    /// Data directory, overriding `ALM_DATA_DIR` and `[data].dir`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every defect from ALM and publish a new generation.
    ///
    /// Requires an `[alm]` section with valid session cookies. On success
    /// the `defects.json` and `defects.db` aliases point at the new
    /// generation; on failure the previous one stays current.
    Sync {
        /// Defects per request (overrides `alm.page_size`).
        #[arg(long)]
        page_size: Option<usize>,

        /// Seconds to wait between requests (overrides `alm.delay_secs`).
        #[arg(long)]
        delay: Option<f64>,

        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressMode,
    },

    /// Publish a saved ALM API response instead of fetching.
    SyncFile {
        /// JSON file with `entities` and `TotalResults`.
        file: PathBuf,

        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressMode,
    },

    /// Show a single defect.
    Show {
        id: i64,

        /// Print the record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List defects sorted by priority, then creation date.
    List {
        #[command(flatten)]
        filters: FilterArgs,

        /// Maximum number of defects to print.
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Skip this many defects.
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Print every match (ignores --limit).
        #[arg(long)]
        all: bool,

        #[arg(long)]
        json: bool,
    },

    /// Count defects matching the filters.
    Count {
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Full-text search; each word matches as a prefix.
    Search {
        query: String,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Aggregate statistics.
    Stats {
        /// Include closed defects in the breakdowns.
        #[arg(long)]
        include_closed: bool,

        /// Entries per breakdown (0 for all).
        #[arg(long, default_value_t = 5)]
        top: usize,

        #[arg(long)]
        json: bool,
    },

    /// Run a read-only SQL query (SELECT, WITH, EXPLAIN).
    Query {
        sql: String,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Print the table schema and example queries.
    Schema,

    /// List published generations; `*` marks the current one.
    History,

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Start the dashboard HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration file.
    Show,
    /// Print the configuration file path.
    Path,
    /// Create or replace the `[alm]` section from a "Copy as cURL" command.
    ///
    /// Paste interactively or pipe it in: `pbpaste | alm config import-curl`.
    ImportCurl,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

/// Filters shared by `list` and `count`. Each flag can repeat and also
/// accepts comma-separated values.
#[derive(Args, Default)]
struct FilterArgs {
    /// Status, exact match (case-insensitive).
    #[arg(long, value_delimiter = ',')]
    status: Vec<String>,
    /// Priority, exact match (case-insensitive).
    #[arg(long, value_delimiter = ',')]
    priority: Vec<String>,
    /// Owner substring.
    #[arg(long, value_delimiter = ',')]
    owner: Vec<String>,
    /// Module substring.
    #[arg(long, value_delimiter = ',')]
    module: Vec<String>,
    /// Defect type substring.
    #[arg(long = "type", value_delimiter = ',')]
    defect_type: Vec<String>,
    /// Workstream substring.
    #[arg(long, value_delimiter = ',')]
    workstream: Vec<String>,
    /// Status to leave out.
    #[arg(long, value_delimiter = ',')]
    exclude_status: Vec<String>,
    /// Only defects that are not closed, rejected, duplicate, or deferred.
    #[arg(long)]
    active: bool,
}

impl From<FilterArgs> for DefectFilter {
    fn from(a: FilterArgs) -> Self {
        DefectFilter {
            status: a.status,
            priority: a.priority,
            owner: a.owner,
            module: a.module,
            defect_type: a.defect_type,
            workstream: a.workstream,
            exclude_status: a.exclude_status,
            active_only: a.active,
        }
    }
}

fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    // Commands that work on the config file itself
    if let Commands::Config { action } = &cli.command {
        return run_config(&cli.config, action);
    }

    let cfg = config::load_config_or_default(&cli.config)?;
    let data = match cli.data_dir {
        Some(ref dir) => DataDir::new(dir.clone()),
        None => cfg.data_dir(),
    };

    match cli.command {
        Commands::Sync {
            page_size,
            delay,
            progress,
        } => {
            let overrides = SyncOverrides {
                page_size,
                delay_secs: delay,
            };
            let reporter = progress.reporter();
            ingest::run_sync(&cfg, &data, &overrides, reporter.as_ref())
                .await?
                .print();
        }
        Commands::SyncFile { file, progress } => {
            let reporter = progress.reporter();
            ingest::run_sync_file(&data, &file, reporter.as_ref())
                .await?
                .print();
        }
        Commands::Show { id, json } => match filter::get_defect(&data, id).await? {
            Some(defect) if json => println!("{}", serde_json::to_string_pretty(&defect)?),
            Some(defect) => println!("{}", get::format_defect(&defect)),
            None => bail!("Defect #{} not found", id),
        },
        Commands::List {
            filters,
            limit,
            offset,
            all,
            json,
        } => {
            let filter = DefectFilter::from(filters);
            let limit = if all { None } else { Some(limit) };
            let defects = filter::list_defects(&data, &filter, limit, offset).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&defects)?);
            } else {
                let total = filter::count_defects(&data, &filter).await? as usize;
                println!("{}", get::format_defect_table(&defects, Some(total)));
            }
        }
        Commands::Count { filters } => {
            let filter = DefectFilter::from(filters);
            println!("{}", filter::count_defects(&data, &filter).await?);
        }
        Commands::Search { query, limit, json } => {
            let defects = search::search_defects(&data, &query, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&defects)?);
            } else {
                println!("{}", get::format_defect_table(&defects, None));
            }
        }
        Commands::Stats {
            include_closed,
            top,
            json,
        } => match stats::get_stats(&data, include_closed, top).await? {
            Some(s) if json => println!("{}", serde_json::to_string_pretty(&s)?),
            Some(s) => println!("{}", stats::format_stats(&s, include_closed, top)),
            None => println!("No data. Run `alm sync` first."),
        },
        Commands::Query { sql: text, format } => {
            let result = sql::execute_query(&data, &text).await?;
            match format {
                OutputFormat::Table => println!("{}", result.to_table()),
                OutputFormat::Csv => print!("{}", result.to_csv()),
                OutputFormat::Json => println!("{}", result.to_json()),
            }
        }
        Commands::Schema => {
            println!("{}", schema::schema_help(&data).await?);
        }
        Commands::History => {
            let generations = store::list_generations(&data).await?;
            if generations.is_empty() {
                println!("No generations in {}", data.history_dir().display());
            } else {
                let current = store::current_generation(&data).await?;
                for id in &generations {
                    let mark = if current.as_deref() == Some(id.as_str()) { "*" } else { " " };
                    println!("{} {}", mark, id);
                }
            }
            if let Some(meta) = store::read_sync_meta(&data).await? {
                println!();
                println!("last sync: {} ({} defects)", meta.last_sync, meta.defect_count);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg, data).await?;
        }
        Commands::Config { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn run_config(path: &std::path::Path, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => {
            if !path.exists() {
                bail!(
                    "No config file found at {}. Run `alm config import-curl` to create one.",
                    path.display()
                );
            }
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            print!("{}", content);
        }
        ConfigAction::ImportCurl => {
            let command = read_curl_command()?;
            let parsed = curl::parse_curl(&command)?;

            let mut cfg = config::load_config_or_default(path)?;
            let cookie_count = parsed.cookies.len();
            let alm = parsed.into_alm_config();
            eprintln!("Imported config:");
            eprintln!("  base_url: {}", alm.base_url);
            eprintln!("  domain:   {}", alm.domain);
            eprintln!("  project:  {}", alm.project);
            eprintln!("  cookies:  {} cookies extracted", cookie_count);
            cfg.alm = Some(alm);

            config::save_config(path, &cfg)?;
            eprintln!("Saved to {}", path.display());
        }
    }
    Ok(())
}

/// Read a curl command from stdin. Interactively, input ends at the first
/// blank line; piped input is read to EOF.
fn read_curl_command() -> Result<String> {
    let stdin = std::io::stdin();
    let command = if atty::is(atty::Stream::Stdin) {
        eprintln!("Paste curl command (press Enter on an empty line when done):");
        let mut lines = Vec::new();
        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                break;
            }
            lines.push(line);
        }
        lines.join("\n")
    } else {
        let mut buf = String::new();
        stdin.lock().read_to_string(&mut buf)?;
        buf.trim().to_string()
    };

    if command.is_empty() {
        bail!("No input provided");
    }
    Ok(command)
}
