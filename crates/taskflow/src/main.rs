use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use taskflow::app::{self, AppState};
use taskflow::config::Config;
use taskflow::db;
use taskflow::generator::{HttpTaskGenerator, TaskGenerator};
use taskflow::models::CreateUser;

#[derive(Parser)]
#[command(name = "taskflow", about = "Task and calendar backend")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "TASKFLOW_CONFIG")]
    config: Option<PathBuf>,
    /// SQLite database path (overrides the config file)
    #[arg(long, global = true, env = "TASKFLOW_DB")]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[arg(long, env = "TASKFLOW_PORT")]
        port: Option<u16>,
    },
    /// Initialize the database
    Init,
    /// Create a user and print a fresh session token
    CreateUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Issue a new session token for an existing user
    IssueSession {
        #[arg(long)]
        email: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        config.server.db = db;
    }
    let db_path = config.server.db.clone();

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let storage = db::init_sqlite_storage(&db_path)
                .with_context(|| format!("opening database {}", db_path))?;
            let generator = match config.generator {
                Some(ref generator_config) => {
                    let generator = HttpTaskGenerator::from_config(generator_config)
                        .context("building task generator client")?;
                    Some(Arc::new(generator) as Arc<dyn TaskGenerator>)
                }
                None => {
                    tracing::info!("no [generator] configured, task generation disabled");
                    None
                }
            };
            let state = AppState {
                storage,
                config: Arc::new(config),
                generator,
            };
            app::run_server(state).await.context("server error")?;
        }
        Commands::Init => {
            let conn = db::init_db(&db_path)
                .with_context(|| format!("initializing database {}", db_path))?;
            drop(conn);
            tracing::info!("database initialized at {}", db_path);
        }
        Commands::CreateUser { name, email, lang } => {
            let storage = db::init_sqlite_storage(&db_path)
                .with_context(|| format!("opening database {}", db_path))?;
            let mut input = CreateUser::new(name, email);
            input.lang = lang;
            let user = storage.create_user(&input).context("creating user")?;
            let token = storage
                .create_session(&user.id, config.sessions.ttl_days)
                .context("creating session")?;
            println!("user_id: {}", user.id);
            println!("token:   {}", token);
        }
        Commands::IssueSession { email } => {
            let storage = db::init_sqlite_storage(&db_path)
                .with_context(|| format!("opening database {}", db_path))?;
            let user = storage
                .get_user_by_email(&email)?
                .with_context(|| format!("no user with email {}", email))?;
            let token = storage
                .create_session(&user.id, config.sessions.ttl_days)
                .context("creating session")?;
            println!("{}", token);
        }
    }
    Ok(())
}
