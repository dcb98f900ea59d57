//! r2r - main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use r2r::cli::{Cli, run_command};
use r2r::config::loader::find_repository_root;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Repository .env first, so R2R_CONFIG_PATH and mapped secrets can live there
    let dotenv = std::env::current_dir()
        .ok()
        .and_then(|cwd| find_repository_root(&cwd).ok())
        .map(|root| root.join(".env"))
        .filter(|path| path.is_file());
    match dotenv {
        Some(path) => {
            let _ = dotenvy::from_path(path);
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    let default_filter = if cli.verbose { "r2r=debug" } else { "r2r=warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Container output owns stdout; logs go to stderr
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let code = run_command(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
