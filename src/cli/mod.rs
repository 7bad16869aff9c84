//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the HTTP gateway (`serve`)
//! - Applying database migrations (`migrate`, postgres builds only)
//! - Driving the pairing flow through the retrying client (`generate`,
//!   `validate`, `accept`, `reject`, `status`)

mod pairing;
mod serve;

pub use pairing::{PairingCommand, run_pairing_command};
#[cfg(feature = "postgres")]
pub use serve::run_migrate;
pub use serve::run_serve;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pairlink")]
#[command(about = "Parent/child device pairing service and client")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the pairing HTTP gateway
    Serve,

    /// Apply pending database migrations and exit
    #[cfg(feature = "postgres")]
    Migrate,

    #[command(flatten)]
    Pairing(PairingCommand),
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["pairlink", "serve"]).unwrap();
        assert!(matches!(cli.command, Command::Serve));
    }

    #[test]
    fn test_parse_validate_code() {
        let cli = Cli::try_parse_from(["pairlink", "validate", "123-456-789-012-345"]).unwrap();
        match cli.command {
            Command::Pairing(PairingCommand::Validate { code }) => {
                assert_eq!(code, "123-456-789-012-345")
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_accept_flags() {
        let id = uuid::Uuid::new_v4().to_string();
        let cli =
            Cli::try_parse_from(["pairlink", "accept", &id, "--camera", "--screen-recording"])
                .unwrap();
        match cli.command {
            Command::Pairing(PairingCommand::Accept {
                camera,
                location,
                microphone,
                screen_recording,
                ..
            }) => {
                assert!(camera && screen_recording);
                assert!(!location && !microphone);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_reject_requires_uuid() {
        assert!(Cli::try_parse_from(["pairlink", "reject", "nope"]).is_err());
    }
}
