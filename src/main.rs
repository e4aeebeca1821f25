use clap::Parser;
use tracing_subscriber::EnvFilter;

use drawcast::cli::{
    Cli, Command, generate_completions, run_cycle_command, run_forecasts_command,
    run_import_command, run_service, run_stats_command,
};
use drawcast::config::Config;

/// Plain text by default; `DRAWCAST_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("drawcast=info"));
    let json = std::env::var("DRAWCAST_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Some(Command::Completion { shell }) = &cli.command {
        return generate_completions(shell);
    }

    init_tracing();

    let mut config = Config::from_env()?;
    if let Some(path) = &cli.data {
        config.storage.data_path = path.clone();
    }

    if cli.should_run_service() {
        return run_service(config).await;
    }

    match cli.command {
        None | Some(Command::Run) | Some(Command::Completion { .. }) => Ok(()),
        Some(Command::Cycle) => run_cycle_command(config).await,
        Some(Command::Import { file }) => run_import_command(config, &file).await,
        Some(Command::Stats { json }) => run_stats_command(&config, json).await,
        Some(Command::Forecasts { pending, limit }) => {
            run_forecasts_command(&config, pending, limit).await
        }
    }
}
