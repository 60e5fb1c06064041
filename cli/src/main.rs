mod commands;
mod config;
mod server;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_achievements, cmd_goals, cmd_records, cmd_review, cmd_run_delete, cmd_run_list,
    cmd_run_log, cmd_streak, cmd_summary, cmd_weight_delete, cmd_weight_history, cmd_weight_log,
};
use crate::config::{Config, DB_ENV, SECRET_ENV};
use runzen_core::auth::TokenIssuer;
use runzen_core::models::{Scope, TRACKING_EPOCH_YEAR};
use runzen_core::service::TrackerService;

const DEFAULT_LOG_FILTER: &str = "runzen=info,runzen_core=info,tower_http=info";

#[derive(Parser)]
#[command(
    name = "runzen",
    version,
    about = "Track runs, steps and weight",
    long_about = "Track runs over fixed distances, daily steps and body weight.\n\
                  Serve the REST API with `runzen serve`, or work with the local database directly."
)]
struct Cli {
    /// Act on this account's data instead of the anonymous bucket
    #[arg(long, global = true, value_name = "EMAIL")]
    user: Option<String>,
    /// Database file (default: runzen.db in the data directory)
    #[arg(long, global = true, env = DB_ENV, value_name = "PATH")]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Token signing secret (default: generated once and kept in the data directory)
        #[arg(long, env = SECRET_ENV, hide_env_values = true)]
        secret_key: Option<String>,
        /// Emit logs as JSON lines
        #[arg(long)]
        log_json: bool,
    },
    /// Log and browse runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Derived statistics
    Stats {
        #[command(subcommand)]
        command: StatsCommands,
    },
    /// Track body weight
    Weight {
        #[command(subcommand)]
        command: WeightCommands,
    },
}

#[derive(Subcommand)]
enum RunCommands {
    /// Log a completed run
    Log {
        /// Distance: 3k, 5k, 10k, 15k, 18k, 21k
        run_type: String,
        /// Duration as seconds, MM:SS or HH:MM:SS
        duration: String,
        /// Category: outdoor or treadmill
        #[arg(short, long, default_value = "outdoor")]
        category: String,
        /// Optional notes
        #[arg(long)]
        notes: Option<String>,
        /// When it was run (YYYY-MM-DD[THH:MM:SS] or today/yesterday, default: now)
        #[arg(long)]
        at: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List runs, newest first
    List {
        /// Only this distance
        #[arg(short, long)]
        run_type: Option<String>,
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a run by ID
    Delete {
        /// Run ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum StatsCommands {
    /// Totals, streaks and this week/month
    Summary {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Weekly streak progress
    Streak {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fastest time per distance
    Records {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Yearly and monthly distance goals
    Goals {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Unlocked and locked achievements
    Achievements {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Month-in-review (default: last month, during the first week)
    Review {
        /// Year to review (requires --month)
        #[arg(
            long,
            requires = "month",
            value_parser = clap::value_parser!(i32).range(i64::from(TRACKING_EPOCH_YEAR)..=9999)
        )]
        year: Option<i32>,
        /// Month to review, 1-12 (requires --year)
        #[arg(long, requires = "year", value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WeightCommands {
    /// Log a weight entry
    Log {
        /// Weight in pounds
        lbs: f64,
        /// When it was measured (YYYY-MM-DD[THH:MM:SS] or today/yesterday, default: now)
        #[arg(long)]
        at: Option<String>,
        /// Optional notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show weight history, newest first
    History {
        /// Maximum number of entries
        #[arg(short, long, default_value = "30")]
        limit: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a weight entry by ID
    Delete {
        /// Weight entry ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_json = matches!(cli.command, Commands::Serve { log_json: true, .. });
    init_tracing(log_json);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Resolve `--user` to a data scope. Without it, commands act on the
/// anonymous bucket shared with unauthenticated API callers.
fn resolve_scope(svc: &TrackerService, user: Option<&str>) -> Result<Scope> {
    let Some(email) = user else {
        return Ok(Scope::Anonymous);
    };
    match svc.user_by_email(email)? {
        Some(u) => Ok(Scope::User(u.id)),
        None => bail!("No account registered for '{email}'"),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db.clone())?;
    let svc = TrackerService::open(&config.db_path)?;

    if let Commands::Serve {
        port,
        bind,
        secret_key,
        ..
    } = &cli.command
    {
        let secret = config.token_secret(secret_key.as_deref())?;
        let tokens = TokenIssuer::new(secret.as_bytes());
        return server::start_server(svc, tokens, *port, bind).await;
    }

    let scope = resolve_scope(&svc, cli.user.as_deref())?;
    match cli.command {
        Commands::Serve { .. } => Ok(()),
        Commands::Run { command } => match command {
            RunCommands::Log {
                run_type,
                duration,
                category,
                notes,
                at,
                json,
            } => cmd_run_log(&svc, scope, &run_type, &duration, &category, notes, at, json),
            RunCommands::List {
                run_type,
                limit,
                json,
            } => cmd_run_list(&svc, scope, run_type.as_deref(), limit, json),
            RunCommands::Delete { id, json } => cmd_run_delete(&svc, scope, id, json),
        },
        Commands::Stats { command } => match command {
            StatsCommands::Summary { json } => cmd_summary(&svc, scope, json),
            StatsCommands::Streak { json } => cmd_streak(&svc, scope, json),
            StatsCommands::Records { json } => cmd_records(&svc, scope, json),
            StatsCommands::Goals { json } => cmd_goals(&svc, scope, json),
            StatsCommands::Achievements { json } => cmd_achievements(&svc, scope, json),
            StatsCommands::Review { year, month, json } => {
                cmd_review(&svc, scope, year.zip(month), json)
            }
        },
        Commands::Weight { command } => match command {
            WeightCommands::Log {
                lbs,
                at,
                notes,
                json,
            } => cmd_weight_log(&svc, scope, lbs, at, notes, json),
            WeightCommands::History { limit, json } => {
                cmd_weight_history(&svc, scope, limit, json)
            }
            WeightCommands::Delete { id, json } => cmd_weight_delete(&svc, scope, id, json),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("runzen").chain(args.iter().copied()))
    }

    #[test]
    fn test_db_flag_is_global() {
        let cli = parse(&["stats", "summary", "--db", "/tmp/other.db"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/other.db")));
    }

    #[test]
    fn test_review_year_bounds() {
        assert!(parse(&["stats", "review", "--year", "2026", "--month", "3"]).is_ok());
        assert!(parse(&["stats", "review", "--year", "2025", "--month", "3"]).is_err());
        assert!(parse(&["stats", "review", "--year", "10000", "--month", "1"]).is_err());
        assert!(parse(&["stats", "review", "--year", "2026"]).is_err());
    }

    #[test]
    fn test_serve_secret_flag() {
        let cli = parse(&["serve", "--secret-key", "s3cret"]).unwrap();
        let Commands::Serve {
            port, secret_key, ..
        } = cli.command
        else {
            panic!("expected serve");
        };
        assert_eq!(port, 8000);
        assert_eq!(secret_key.as_deref(), Some("s3cret"));
    }
}
