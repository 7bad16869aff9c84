use clap::Parser;

use pairlink::cli::{Cli, Command, run_pairing_command, run_serve};
use pairlink::config::{Config, LogFormat, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            let config = Config::from_env()?;
            init_tracing(config.log_format);
            run_serve(config).await
        }
        #[cfg(feature = "postgres")]
        Command::Migrate => {
            let config = Config::from_env()?;
            init_tracing(config.log_format);
            pairlink::cli::run_migrate(config).await
        }
        Command::Pairing(cmd) => {
            init_tracing(client_log_format());
            run_pairing_command(cmd).await
        }
    }
}

/// Client commands do not need the server configuration to be valid.
fn client_log_format() -> LogFormat {
    std::env::var("PAIRLINK_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(LogFormat::Pretty)
}
