//! Parent/child device pairing.
//!
//! A child generates a short-lived numeric code, a parent submits it to
//! bind itself to the child's pending record, and the child activates the
//! pairing by granting capability permissions.

pub mod code;
pub mod notify;
pub mod permissions;
pub mod rate_limit;
pub mod record;
pub mod service;
pub mod state;

pub use code::{CODE_LENGTH, PairingCode};
pub use notify::{BroadcastNotifier, LogNotifier, NotifyError, PairingEvent, PairingNotifier};
pub use permissions::{
    Capability, CapabilityProbe, Permissions, ProbeOutcome, RequestedPermissions,
    negotiate_permissions,
};
pub use rate_limit::{AttemptLimiter, InMemoryAttemptLimiter, LimitDecision, UnlimitedAttempts};
pub use record::{PairingRecord, PairingStatus, PairingStatusView, PairingView};
pub use service::{GeneratedCode, PairingService, ServiceConfig, spawn_expiry_sweeper};
pub use state::{Refusal, Transition};
