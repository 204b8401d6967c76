use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gator::commands::{execute, Cli};
use gator::config::{Config, Session};
use gator::db::Database;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let mut session = Session::open(&config_path)?;
    debug!("Loaded config from {}", config_path.display());

    let db = Database::new(&session.config().db_url)
        .await
        .with_context(|| format!("could not open database {}", session.config().db_url))?;
    db.initialize().await?;

    let mut stdout = std::io::stdout();
    execute(cli.command, &mut session, Arc::new(db), &mut stdout).await?;
    Ok(())
}
