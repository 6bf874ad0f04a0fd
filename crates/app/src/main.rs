use clap::Parser;

mod cli;
mod commands;
mod config;
mod context;

use commands::Output;
use config::AppConfig;
use context::AppContext;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("revise error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let mut config = AppConfig::load_with_dotenv()?;
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }
    if let Some(user_id) = cli.user_id {
        config.auth.user_id = Some(user_id);
    }

    let mut ctx = AppContext::init(&config)?;
    commands::dispatch(cli.command, &mut ctx, Output { json: cli.json }).await
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("REVISE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
