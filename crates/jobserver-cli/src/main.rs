use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use jobserver_core::{Config, Result};

#[derive(Parser)]
#[command(name = "jobserver")]
#[command(about = "Concurrent prioritized compute-job HTTP server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the job server
    Serve {
        #[arg(short = 'H', long, help = "Bind address", default_value = "0.0.0.0")]
        host: String,

        #[arg(short = 'P', long, help = "Port number", default_value = "8080")]
        port: u16,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.as_deref().unwrap_or("info");
    let format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if format == "json" {
        tracing_subscriber::fmt().with_env_filter(log_level).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).init();
    }

    let config = if let Some(ref config_path) = cli.config {
        Config::load(config_path.to_str().unwrap())?
    } else {
        Config::from_env()?
    };

    info!("starting jobserver v{} with config: {}:{}", jobserver_core::VERSION, config.server.host, config.server.port);

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            config.server.host = host;
            config.server.port = port;
            jobserver_api::run(config).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config).unwrap());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve_defaults() {
        let cli = Cli::parse_from(["jobserver", "serve"]);
        assert!(matches!(cli.command, Commands::Serve { .. }));
    }

    #[test]
    fn test_cli_parses_config_subcommand() {
        let cli = Cli::parse_from(["jobserver", "config"]);
        assert!(matches!(cli.command, Commands::Config));
    }
}
