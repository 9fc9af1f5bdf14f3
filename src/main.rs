//! # omnidex CLI
//!
//! ## Usage
//!
//! ```bash
//! omnidex --config ./config/omnidex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `omnidex init` | Create the SQLite database and run schema migrations |
//! | `omnidex sources` | List configured sources and check their credentials |
//! | `omnidex sync <all\|name>` | Incremental pass over one or every source |
//! | `omnidex search "<query>"` | Search indexed documents |
//! | `omnidex get <index_id>` | Print one stored document |
//! | `omnidex status` | Per-source document counts and last sync |
//! | `omnidex doctypes` | List the compiled-in doctypes |

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use omnidex::progress::ProgressMode;
use omnidex::search::SearchArgs;
use omnidex::{config, db, get, logging, search, sources, status, sync_cmd};
use omnidex_core::models::parse_timestamp;

/// Incremental search index over GitHub, Google Drive, Disqus and
/// Groups.io.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/omnidex.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "omnidex", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/omnidex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List configured sources and whether their credentials are accepted.
    Sources,

    /// Synchronize one source, or `all` enabled sources.
    ///
    /// Only items whose modification time moved past the stored one are
    /// fetched; documents gone from a complete listing are deleted.
    Sync {
        /// `all` or a configured source name.
        target: String,

        /// Refetch every listed item regardless of stored timestamps.
        #[arg(long)]
        full: bool,

        /// List and classify only; nothing is fetched or written.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to human when stderr is a
        /// terminal, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Search indexed documents.
    Search {
        query: String,

        /// Only documents of this doctype (e.g. `github_issue_pr`).
        #[arg(long)]
        source_tag: Option<String>,

        /// Only documents written by this configured source.
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        owner: Option<String>,

        /// Only documents modified at or after this RFC 3339 time.
        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print one document by index id.
    Get {
        index_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Per-source document counts and last pass.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// List the doctypes compiled into this build.
    Doctypes,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Needs no config file.
    if let Commands::Doctypes = cli.command {
        sources::list_doctypes();
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            let pool = db::open(&cfg).await?;
            pool.close().await;
            println!("Database initialized at {}.", cfg.db.path.display());
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Sync {
            target,
            full,
            dry_run,
            progress,
        } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            sync_cmd::run_sync(&cfg, &target, full, dry_run, mode).await?;
        }
        Commands::Search {
            query,
            source_tag,
            source,
            owner,
            since,
            limit,
            json,
        } => {
            let since = match since {
                Some(s) => Some(
                    parse_timestamp(&s)
                        .ok_or_else(|| anyhow::anyhow!("--since: not an RFC 3339 time: {}", s))?,
                ),
                None => None,
            };
            let args = SearchArgs {
                source_tag,
                source_name: source,
                owner,
                since,
                limit,
                json,
            };
            search::run_search(&cfg, &query, args).await?;
        }
        Commands::Get { index_id, json } => {
            get::run_get(&cfg, &index_id, json).await?;
        }
        Commands::Status { json } => {
            status::run_status(&cfg, json).await?;
        }
        Commands::Doctypes => sources::list_doctypes(),
    }

    Ok(())
}
