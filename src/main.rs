//! Manaforge - Main entry point.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use manaforge::{
    clock::SystemClock,
    config::Config,
    db,
    economy::ThreadRandom,
    investments::scheduler::InvestmentScheduler,
    jobs::ticker::JobTicker,
};

#[derive(Parser)]
#[command(name = "manaforge", about = "Fantasy economy engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the engines (default).
    Run,
    /// Run database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("manaforge=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(manaforge::error::ConfigError::MissingRequired { key, hint }) => {
            eprintln!("Configuration error: Missing required setting '{}'", key);
            eprintln!("  {}", hint);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let database = db::connect_from_config(&config.database).await?;
    tracing::info!("Database connected and migrations applied");

    if let Some(Command::Migrate) = cli.command {
        return Ok(());
    }

    let clock = Arc::new(SystemClock);
    let rng = Arc::new(ThreadRandom);

    let ticker = JobTicker::new(Arc::clone(&database), clock.clone(), config.ticker.clone());
    ticker.start();

    let scheduler = InvestmentScheduler::new(
        Arc::clone(&database),
        clock,
        rng,
        config.scheduler.clone(),
    );
    scheduler.start().await?;

    tracing::info!("Manaforge engines running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    ticker.stop();
    scheduler.stop();

    Ok(())
}
