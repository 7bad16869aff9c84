//! Capability flags granted by the child during negotiation.
//!
//! The server only stores the resulting booleans. Probing a capability on
//! the device is the child client's job; [`negotiate_permissions`] turns a
//! set of requested flags plus a [`CapabilityProbe`] into what actually
//! gets sent, so a flag the device could not verify is sent as `false`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Device capabilities a parent can be granted access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Camera,
    Location,
    Microphone,
    ScreenRecording,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Camera,
        Capability::Location,
        Capability::Microphone,
        Capability::ScreenRecording,
    ];
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Camera => write!(f, "camera"),
            Capability::Location => write!(f, "location"),
            Capability::Microphone => write!(f, "microphone"),
            Capability::ScreenRecording => write!(f, "screen_recording"),
        }
    }
}

/// Stored permission map. Every capability is always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub camera: bool,
    pub location: bool,
    pub microphone: bool,
    pub screen_recording: bool,
}

impl Permissions {
    pub fn get(&self, capability: Capability) -> bool {
        match capability {
            Capability::Camera => self.camera,
            Capability::Location => self.location,
            Capability::Microphone => self.microphone,
            Capability::ScreenRecording => self.screen_recording,
        }
    }

    pub fn set(&mut self, capability: Capability, granted: bool) {
        match capability {
            Capability::Camera => self.camera = granted,
            Capability::Location => self.location = granted,
            Capability::Microphone => self.microphone = granted,
            Capability::ScreenRecording => self.screen_recording = granted,
        }
    }

    pub fn granted(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.get(*c))
            .collect()
    }
}

/// Permissions as submitted by the child. Missing keys mean "not granted";
/// unknown keys are rejected at deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestedPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microphone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_recording: Option<bool>,
}

impl RequestedPermissions {
    /// Resolve to a full map, defaulting every unset capability to `false`.
    pub fn resolve(request: Option<RequestedPermissions>) -> Permissions {
        let request = request.unwrap_or_default();
        Permissions {
            camera: request.camera.unwrap_or(false),
            location: request.location.unwrap_or(false),
            microphone: request.microphone.unwrap_or(false),
            screen_recording: request.screen_recording.unwrap_or(false),
        }
    }
}

impl From<Permissions> for RequestedPermissions {
    fn from(p: Permissions) -> Self {
        Self {
            camera: Some(p.camera),
            location: Some(p.location),
            microphone: Some(p.microphone),
            screen_recording: Some(p.screen_recording),
        }
    }
}

/// Result of exercising a capability on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The platform granted access and the capability worked.
    Granted,
    /// The user or OS refused access.
    Denied,
    /// The platform has no way to check this capability.
    Unsupported,
}

/// Device-side capability check (camera/microphone stream, location fix,
/// display capture).
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn probe(&self, capability: Capability) -> ProbeOutcome;
}

/// Upper bound for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe every requested capability and keep only the ones that verified.
///
/// Capabilities that were not requested are never probed. A probe that
/// times out, is denied, or is unsupported on this platform yields `false`.
pub async fn negotiate_permissions(
    requested: &Permissions,
    probe: &dyn CapabilityProbe,
    probe_timeout: Duration,
) -> Permissions {
    let mut result = Permissions::default();

    for capability in requested.granted() {
        let outcome = match tokio::time::timeout(probe_timeout, probe.probe(capability)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(%capability, "Capability probe timed out");
                ProbeOutcome::Unsupported
            }
        };

        if outcome != ProbeOutcome::Granted {
            tracing::info!(%capability, ?outcome, "Capability not verified, sending as not granted");
        }
        result.set(capability, outcome == ProbeOutcome::Granted);
    }

    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    struct ScriptedProbe {
        outcomes: HashMap<Capability, ProbeOutcome>,
        probed: Mutex<Vec<Capability>>,
    }

    #[async_trait]
    impl CapabilityProbe for ScriptedProbe {
        async fn probe(&self, capability: Capability) -> ProbeOutcome {
            self.probed.lock().unwrap().push(capability);
            if capability == Capability::Microphone {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.outcomes
                .get(&capability)
                .copied()
                .unwrap_or(ProbeOutcome::Unsupported)
        }
    }

    #[test]
    fn test_resolve_defaults_to_false() {
        assert_eq!(RequestedPermissions::resolve(None), Permissions::default());

        let partial: RequestedPermissions =
            serde_json::from_str(r#"{"camera": true}"#).unwrap();
        let resolved = RequestedPermissions::resolve(Some(partial));
        assert!(resolved.camera);
        assert!(!resolved.location);
        assert!(!resolved.microphone);
        assert!(!resolved.screen_recording);
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let parsed = serde_json::from_str::<RequestedPermissions>(r#"{"contacts": true}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_serialized_keys() {
        let json = serde_json::to_value(Permissions {
            screen_recording: true,
            ..Permissions::default()
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "camera": false,
                "location": false,
                "microphone": false,
                "screen_recording": true,
            })
        );
    }

    #[test]
    fn test_capability_display_matches_keys() {
        let json = serde_json::to_value(Permissions::default()).unwrap();
        for capability in Capability::ALL {
            assert!(json.get(capability.to_string()).is_some());
        }
    }

    #[tokio::test]
    async fn test_negotiate_keeps_only_verified() {
        let probe = ScriptedProbe {
            outcomes: HashMap::from([
                (Capability::Camera, ProbeOutcome::Granted),
                (Capability::Location, ProbeOutcome::Denied),
                (Capability::Microphone, ProbeOutcome::Granted),
            ]),
            probed: Mutex::new(Vec::new()),
        };
        let requested = Permissions {
            camera: true,
            location: true,
            microphone: true,
            screen_recording: true,
        };

        let result = negotiate_permissions(&requested, &probe, Duration::from_millis(50)).await;

        assert!(result.camera);
        assert!(!result.location);
        // Microphone probe outlives the timeout.
        assert!(!result.microphone);
        // No outcome scripted: unsupported on this platform.
        assert!(!result.screen_recording);
    }

    #[tokio::test]
    async fn test_negotiate_skips_unrequested() {
        let probe = ScriptedProbe {
            outcomes: HashMap::from([(Capability::Camera, ProbeOutcome::Granted)]),
            probed: Mutex::new(Vec::new()),
        };
        let requested = Permissions {
            location: true,
            ..Permissions::default()
        };

        let result = negotiate_permissions(&requested, &probe, DEFAULT_PROBE_TIMEOUT).await;

        assert_eq!(result, Permissions::default());
        assert_eq!(*probe.probed.lock().unwrap(), vec![Capability::Location]);
    }
}
