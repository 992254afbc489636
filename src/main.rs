use anyhow::Context;
use clap::{Parser, Subcommand};

use credstore::{
    app::{build_app, serve},
    config::{AppConfig, DatabaseConfig},
    state::AppState,
    store,
};

#[derive(Debug, Parser)]
#[command(name = "credstore", version, about = "User credential store with a JSON auth API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Drop the users table and recreate it at the current schema version.
    RebuildSchema {
        /// Confirm that every stored user will be deleted.
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "credstore=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

async fn rebuild_schema(yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("refusing to rebuild without --yes: every stored user would be deleted");
    }
    let database = DatabaseConfig::from_env()?;

    // Skip migrations: the rebuild has to work on a schema that cannot be opened normally.
    let pool = store::connect(&database.store_options())
        .await
        .context("open database")?;
    store::migrate::rebuild(&pool)
        .await
        .context("rebuild users table")?;
    pool.close().await;
    tracing::warn!(database_url = %database.url, "users table rebuilt by operator");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = AppConfig::from_env()?;
            let (host, port) = (config.host.clone(), config.port);
            tracing::info!(database_url = %config.database.url, "starting credstore");

            let app_state = AppState::init(config).await?;
            serve(build_app(app_state), &host, port).await
        }
        Command::RebuildSchema { yes } => rebuild_schema(yes).await,
    }
}
