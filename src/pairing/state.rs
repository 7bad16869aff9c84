//! Pairing state machine.
//!
//! ```text
//!                 parent validates (parent_id set)
//!                ┌──────────┐
//!                ▼          │
//! generate ──► pending ─────┘
//!                │  child accepts (parent bound)  ──► active
//!                │  child declines                ──► rejected
//!                │  TTL elapsed / regenerated     ──► expired
//! ```
//!
//! Stores apply a transition only if [`check`] passes against the record's
//! current state inside the same atomic write, so a stale or duplicate
//! request fails instead of overwriting a newer state.

use chrono::{DateTime, Utc};

use crate::auth::{Identity, Role};
use crate::error::PairingError;
use crate::pairing::record::{PairingRecord, PairingStatus};

/// A state change on a pairing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A parent binds to the record with the code. Status stays pending.
    BindParent,
    /// The child grants permissions and activates.
    Activate,
    /// The child declines.
    Reject,
    /// The TTL elapsed.
    Expire,
    /// A newer code was generated for the same child.
    Supersede,
}

impl Transition {
    pub fn target(&self) -> PairingStatus {
        match self {
            Transition::BindParent => PairingStatus::Pending,
            Transition::Activate => PairingStatus::Active,
            Transition::Reject => PairingStatus::Rejected,
            Transition::Expire | Transition::Supersede => PairingStatus::Expired,
        }
    }

    /// Role allowed to trigger the transition; `None` for system-driven ones.
    pub fn required_role(&self) -> Option<Role> {
        match self {
            Transition::BindParent => Some(Role::Parent),
            Transition::Activate | Transition::Reject | Transition::Supersede => Some(Role::Child),
            Transition::Expire => None,
        }
    }

    /// Whether `caller` may trigger the transition. System-driven
    /// transitions are never caller-triggered.
    pub fn authorize(&self, caller: &Identity) -> Result<(), PairingError> {
        match self.required_role() {
            Some(role) => caller.require_role(role),
            None => Err(PairingError::Forbidden),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::BindParent => "bind_parent",
            Transition::Activate => "activate",
            Transition::Reject => "reject",
            Transition::Expire => "expire",
            Transition::Supersede => "supersede",
        }
    }
}

/// Why a transition cannot be applied to a record in its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Refusal {
    #[error("pairing is {0}, not pending")]
    NotPending(PairingStatus),

    #[error("pairing code has expired")]
    Expired,

    #[error("pairing code has not been validated by a parent yet")]
    ParentNotBound,

    #[error("pairing code has already been used")]
    ParentAlreadyBound,

    #[error("pairing code has not expired yet")]
    NotYetExpired,
}

impl From<Refusal> for PairingError {
    fn from(refusal: Refusal) -> Self {
        PairingError::FailedPrecondition(refusal.to_string())
    }
}

/// Whether `transition` may be applied to `record` at `now`.
pub fn check(
    record: &PairingRecord,
    transition: Transition,
    now: DateTime<Utc>,
) -> Result<(), Refusal> {
    if record.status.is_terminal() {
        return Err(Refusal::NotPending(record.status));
    }

    match transition {
        Transition::BindParent => {
            if record.expires_at <= now {
                return Err(Refusal::Expired);
            }
            if record.parent_id.is_some() {
                return Err(Refusal::ParentAlreadyBound);
            }
        }
        Transition::Activate => {
            if record.expires_at <= now {
                return Err(Refusal::Expired);
            }
            if record.parent_id.is_none() {
                return Err(Refusal::ParentNotBound);
            }
        }
        Transition::Reject => {
            if record.expires_at <= now {
                return Err(Refusal::Expired);
            }
        }
        Transition::Expire => {
            if record.expires_at > now {
                return Err(Refusal::NotYetExpired);
            }
        }
        Transition::Supersede => {}
    }

    Ok(())
}
