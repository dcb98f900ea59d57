//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running an extension (`run`)
//! - Pre-pulling extension images (`install`)
//! - Printing an extension's metadata document (`metadata`)
//! - Checking and listing configuration (`validate`, `list`)
//! - Removing containers left behind by earlier runs (`cleanup`)

mod cleanup;
mod extension;

pub use cleanup::run_cleanup_command;
pub use extension::{
    run_extension_command, run_install_command, run_list_command, run_metadata_command,
    run_validate_command,
};

use std::path::PathBuf;

use clap::{ColorChoice, Parser, Subcommand};

use crate::config::{ConfigStore, load_config};

#[derive(Parser, Debug)]
#[command(name = "r2r")]
#[command(about = "Run containerized CLI extensions declared in the repository configuration")]
#[command(
    long_about = "r2r runs extensions: versioned container images declared in .r2r/r2r-cli.yml.\nExamples:\n  r2r run go build ./...  # Run the 'go' extension\n  r2r install  # Pull every extension image"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Override files merged on top of the discovered configuration, in order.
    /// Given before the subcommand.
    #[arg(short, long = "config", value_name = "FILE")]
    pub config: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an extension
    #[command(
        about = "Run an extension",
        long_about = "Runs the extension container. Without arguments the session is interactive.\nExample: r2r run pwsh -- -Command Get-Date"
    )]
    Run {
        /// Extension name
        extension: String,

        /// Arguments passed to the extension
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Make extension images available locally
    #[command(
        about = "Pull extension images",
        long_about = "Ensures images are present according to their pull policy.\nExamples:\n  r2r install  # All extensions\n  r2r install go  # One extension"
    )]
    Install {
        /// Only this extension
        extension: Option<String>,
    },

    /// Print the metadata document of an extension
    Metadata {
        /// Extension name
        extension: String,
    },

    /// Validate the merged configuration
    Validate,

    /// List configured extensions
    List,

    /// Stop containers started by r2r
    #[command(
        about = "Stop managed containers",
        long_about = "Stops running containers created by r2r, except the one r2r itself runs in.\nExample: r2r cleanup --stopped"
    )]
    Cleanup {
        /// Also remove stopped managed containers
        #[arg(long)]
        stopped: bool,
    },
}

/// Discover the configuration, merge `overrides` on top in order and
/// validate the result.
pub fn load_store(overrides: &[PathBuf]) -> anyhow::Result<ConfigStore> {
    Ok(load_config(None, overrides)?)
}

/// Run the parsed command and return the process exit code.
pub async fn run_command(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Run { extension, args } => run_extension_command(&cli.config, &extension, &args).await,
        Command::Install { extension } => run_install_command(&cli.config, extension.as_deref()).await,
        Command::Metadata { extension } => run_metadata_command(&cli.config, &extension).await,
        Command::Validate => run_validate_command(&cli.config),
        Command::List => run_list_command(&cli.config),
        Command::Cleanup { stopped } => run_cleanup_command(stopped).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_keeps_hyphenated_args() {
        let cli = Cli::try_parse_from(["r2r", "run", "go", "test", "-v", "./..."]).unwrap();
        match cli.command {
            Command::Run { extension, args } => {
                assert_eq!(extension, "go");
                assert_eq!(args, vec!["test", "-v", "./..."]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_repeatable_config() {
        let cli = Cli::try_parse_from(["r2r", "-c", "a.yml", "--config", "b.yml", "list"]).unwrap();
        assert_eq!(cli.config, vec![PathBuf::from("a.yml"), PathBuf::from("b.yml")]);
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn test_config_after_subcommand_rejected() {
        // Accepting it there would let the later occurrence replace the earlier ones.
        assert!(Cli::try_parse_from(["r2r", "-c", "a.yml", "list", "--config", "b.yml"]).is_err());
    }

    #[test]
    fn test_run_passes_config_flag_to_extension() {
        let cli = Cli::try_parse_from(["r2r", "-c", "a.yml", "run", "go", "build", "-c", "x"]).unwrap();
        assert_eq!(cli.config, vec![PathBuf::from("a.yml")]);
        match cli.command {
            Command::Run { args, .. } => assert_eq!(args, vec!["build", "-c", "x"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
