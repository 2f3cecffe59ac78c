mod config;
mod shell;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use hush_core::{LocalKv, Session, Store, accounts};
use hush_db::{Database, SqliteKv, SqliteStore};

use crate::config::Config;
use crate::shell::Shell;

#[derive(Parser, Debug)]
#[command(name = "hush")]
#[command(about = "Direct messages with unread tracking, from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new username
    Signup { username: String },
    /// Log in and start the interactive shell
    Shell { username: String },
    /// Print conversations with unread messages and recent activity, then exit
    Inbox {
        username: String,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging (stderr, so it does not interleave with shell output)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hush=info,hush_core=info,hush_db=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let store = SqliteStore::new(db);

    match cli.command {
        Command::Signup { username } => {
            let user = accounts::sign_up(&store, &username).await?;
            println!("Welcome, {}.", user.username);
        }
        Command::Shell { username } => {
            let kv: Arc<dyn LocalKv> = Arc::new(SqliteKv::open(&config.local_path)?);
            hush_db::spawn_watcher(store.clone(), config.poll_interval);
            info!("Polling for new messages every {:?}", config.poll_interval);

            let store: Arc<dyn Store> = Arc::new(store);
            let session = Session::login(store, kv, &username, config.session_options()).await?;
            Shell::new(session).run().await?;
        }
        Command::Inbox { username, json } => {
            let kv: Arc<dyn LocalKv> = Arc::new(SqliteKv::open(&config.local_path)?);
            let store: Arc<dyn Store> = Arc::new(store);
            let session = Session::login(store, kv, &username, config.session_options()).await?;
            let inbox = session.inbox().await;
            let recent = session.recent_activity().await;
            if json {
                let out = serde_json::json!({ "inbox": inbox, "recent": recent });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                shell::print_entries(&inbox);
                shell::print_digest(&recent);
            }
        }
    }

    Ok(())
}
