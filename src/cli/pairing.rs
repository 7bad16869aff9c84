//! Client-side pairing commands.
//!
//! Each command talks to a running gateway through [`PairingClient`],
//! configured from `PAIRLINK_API_URL` and `PAIRLINK_API_TOKEN`.

use clap::Subcommand;
use serde::Serialize;
use uuid::Uuid;

use crate::client::PairingClient;
use crate::config::ClientConfig;
use crate::pairing::{Permissions, RequestedPermissions};

#[derive(Subcommand, Debug, Clone)]
pub enum PairingCommand {
    /// Generate a pairing code (child account)
    Generate,

    /// Submit a child's pairing code (parent account)
    Validate {
        /// The 15-digit code, dashes allowed
        code: String,
    },

    /// Activate a pairing and grant capabilities (child account)
    Accept {
        /// Pairing id returned by `generate`
        pairing_id: Uuid,

        /// Allow camera access
        #[arg(long)]
        camera: bool,

        /// Allow location access
        #[arg(long)]
        location: bool,

        /// Allow microphone access
        #[arg(long)]
        microphone: bool,

        /// Allow screen recording
        #[arg(long)]
        screen_recording: bool,
    },

    /// Decline a pending pairing (child account)
    Reject {
        pairing_id: Uuid,
    },

    /// Show the status of a pairing (either party)
    Status {
        pairing_id: Uuid,
    },
}

/// Run a pairing command against the configured gateway.
pub async fn run_pairing_command(cmd: PairingCommand) -> anyhow::Result<()> {
    let client = PairingClient::from_config(ClientConfig::from_env()?)?;

    match cmd {
        PairingCommand::Generate => {
            let generated = client.generate_pairing_code().await?;
            println!("Pairing code: {}", generated.display_code);
            println!("Pairing id:   {}", generated.pairing_id);
            println!("Expires at:   {}", generated.expires_at.to_rfc3339());
        }
        PairingCommand::Validate { code } => {
            print_json(&client.validate_pairing_code(&code).await?)?;
        }
        PairingCommand::Accept {
            pairing_id,
            camera,
            location,
            microphone,
            screen_recording,
        } => {
            let permissions = Permissions {
                camera,
                location,
                microphone,
                screen_recording,
            };
            let view = client
                .accept_pairing(pairing_id, Some(RequestedPermissions::from(permissions)))
                .await?;
            print_json(&view)?;
        }
        PairingCommand::Reject { pairing_id } => {
            print_json(&client.reject_pairing(pairing_id).await?)?;
        }
        PairingCommand::Status { pairing_id } => {
            print_json(&client.get_pairing_status(pairing_id).await?)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
