// repo-chat-store/src/main.rs

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use repo_chat_store::{config::Config, history_db::ChatDatabase, run_server, telemetry};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "repo-chat-store", version, about = "Per-repository chat history service")]
struct Cli {
    /// Database file, overrides CHAT_DB_PATH
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Listen port, overrides API_PORT
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Print every stored session as JSON
    Sessions,
    /// Delete the session of one repository
    Delete {
        /// Repository path, e.g. owner/name
        repo: String,
    },
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing();

    let mut cfg = Config::from_env()?;
    if let Some(db_path) = cli.db_path {
        cfg.db_path = db_path;
    }
    if let Some(port) = cli.port {
        cfg.api_port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(cfg).await,
        Command::Sessions => {
            let db = ChatDatabase::with_options(&cfg.db_path, cfg.database_options())?;
            let sessions = db.sessions.get_all_sessions()?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
            Ok(())
        }
        Command::Delete { repo } => {
            let db = ChatDatabase::with_options(&cfg.db_path, cfg.database_options())?;
            if db.sessions.delete_session(&repo)? {
                println!("Deleted session for {}", repo);
            } else {
                println!("No session stored for {}", repo);
            }
            Ok(())
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
