mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    EntryArgs, cmd_delete, cmd_edit, cmd_export, cmd_history, cmd_import, cmd_log, cmd_stats,
    cmd_user_add, cmd_user_delete, cmd_user_goals, cmd_user_list,
};
use crate::config::Config;
use weighin_core::db::Database;

#[derive(Parser)]
#[command(
    name = "weighin",
    version,
    about = "Track weight, body fat and waist size for one or more people"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a weight entry
    Log {
        /// Weight value
        weight: f64,
        /// User to log for (default: first user)
        #[arg(long)]
        user: Option<String>,
        /// Unit: lbs or kg (default: lbs)
        #[arg(short, long, default_value = "lbs")]
        unit: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Body fat percentage
        #[arg(long)]
        body_fat: Option<f64>,
        /// Waist size in inches
        #[arg(long)]
        waist: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the values of an existing entry
    Edit {
        /// Entry ID
        id: i64,
        /// New weight value
        #[arg(long)]
        weight: f64,
        /// Unit: lbs or kg (default: lbs)
        #[arg(short, long, default_value = "lbs")]
        unit: String,
        /// New date (default: keep the current date)
        #[arg(long)]
        date: Option<String>,
        /// Body fat percentage (omit to clear)
        #[arg(long)]
        body_fat: Option<f64>,
        /// Waist size in inches (omit to clear)
        #[arg(long)]
        waist: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an entry by ID
    Delete {
        /// Entry ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a user's entries, newest first
    History {
        /// User (default: first user)
        #[arg(long)]
        user: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show summary statistics and chart scaling for a user
    Stats {
        /// User (default: first user)
        #[arg(long)]
        user: Option<String>,
        /// Second user to compare against
        #[arg(long)]
        compare: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage user profiles
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Import entries from a CSV file (Date, Weight (lbs), User, Body Fat %, Waist Size (in))
    Import {
        /// Path to the CSV file
        file: std::path::PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export every entry to a CSV file
    Export {
        /// Path to write
        file: std::path::PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the web dashboard
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "5000")]
        port: u16,
        /// Address to bind to (use 0.0.0.0 to expose to the network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Add a user
    Add {
        /// User name (case-sensitive, must be unique)
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a user and all of their entries
    Delete {
        /// User name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set start and goal weight (omitted values are cleared)
    Goals {
        /// User (default: first user)
        #[arg(long)]
        user: Option<String>,
        /// Start weight
        #[arg(long)]
        start: Option<f64>,
        /// Goal weight
        #[arg(long)]
        goal: Option<f64>,
        /// Unit: lbs or kg (default: lbs)
        #[arg(short, long, default_value = "lbs")]
        unit: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// `RUST_LOG` wins; otherwise the server logs at info and other commands stay quiet.
fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    });

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Log {
            weight,
            user,
            unit,
            date,
            body_fat,
            waist,
            json,
        } => cmd_log(
            &db,
            user,
            EntryArgs {
                weight,
                unit,
                date,
                body_fat,
                waist,
            },
            json,
        ),
        Commands::Edit {
            id,
            weight,
            unit,
            date,
            body_fat,
            waist,
            json,
        } => cmd_edit(
            &db,
            id,
            EntryArgs {
                weight,
                unit,
                date,
                body_fat,
                waist,
            },
            json,
        ),
        Commands::Delete { id, json } => cmd_delete(&db, id, json),
        Commands::History { user, json } => cmd_history(&db, user, json),
        Commands::Stats {
            user,
            compare,
            json,
        } => cmd_stats(&db, user, compare.as_deref(), json),
        Commands::User { command } => match command {
            UserCommands::Add { name, json } => cmd_user_add(&db, &name, json),
            UserCommands::List { json } => cmd_user_list(&db, json),
            UserCommands::Delete { name, json } => cmd_user_delete(&db, &name, json),
            UserCommands::Goals {
                user,
                start,
                goal,
                unit,
                json,
            } => cmd_user_goals(&db, user, start, goal, &unit, json),
        },
        Commands::Import {
            file,
            dry_run,
            json,
        } => cmd_import(&db, &file, dry_run, json),
        Commands::Export { file, json } => cmd_export(&db, &file, json),
        Commands::Serve { port, bind } => {
            tracing::info!(db = %config.db_path.display(), "opening dashboard database");
            server::start_server(db, port, &bind).await
        }
    }
}
