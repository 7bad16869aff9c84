//! The pairing record and its caller-facing projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pairing::code::PairingCode;
use crate::pairing::permissions::Permissions;

/// Lifecycle status of a pairing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    Pending,
    Active,
    Rejected,
    Expired,
}

impl PairingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingStatus::Pending => "pending",
            PairingStatus::Active => "active",
            PairingStatus::Rejected => "rejected",
            PairingStatus::Expired => "expired",
        }
    }

    /// Active, rejected and expired records never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PairingStatus::Pending)
    }
}

impl std::fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PairingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PairingStatus::Pending),
            "active" => Ok(PairingStatus::Active),
            "rejected" => Ok(PairingStatus::Rejected),
            "expired" => Ok(PairingStatus::Expired),
            other => Err(format!("unknown pairing status: {}", other)),
        }
    }
}

/// A binding between a child identity and (eventually) a parent identity.
///
/// `status` is the only stored state flag; `is_active` and `is_used` are
/// computed from it.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingRecord {
    pub id: Uuid,
    pub child_id: Uuid,
    /// `None` until a parent validates the code.
    pub parent_id: Option<Uuid>,
    pub pairing_code: PairingCode,
    pub status: PairingStatus,
    /// `None` until the child completes negotiation.
    pub permissions: Option<Permissions>,
    pub expires_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PairingRecord {
    /// A fresh pending record for `child_id`.
    pub fn new_pending(
        child_id: Uuid,
        pairing_code: PairingCode,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            child_id,
            parent_id: None,
            pairing_code,
            status: PairingStatus::Pending,
            permissions: None,
            expires_at: now + ttl,
            activated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PairingStatus::Active
    }

    /// The code has been consumed: a parent is bound or the record left `pending`.
    pub fn is_used(&self) -> bool {
        self.parent_id.is_some() || self.status != PairingStatus::Pending
    }

    /// Expired either by status or, while still pending, by the clock.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            PairingStatus::Expired => true,
            PairingStatus::Pending => self.expires_at <= now,
            PairingStatus::Active | PairingStatus::Rejected => false,
        }
    }

    /// Pending and still inside its TTL.
    pub fn is_live_pending(&self, now: DateTime<Utc>) -> bool {
        self.status == PairingStatus::Pending && self.expires_at > now
    }

    /// Whether `user_id` is one of the two parties of this pairing.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.child_id == user_id || self.parent_id == Some(user_id)
    }

    pub fn to_view(&self) -> PairingView {
        PairingView {
            id: self.id,
            child_id: self.child_id,
            parent_id: self.parent_id,
            status: self.status,
            is_active: self.is_active(),
            is_used: self.is_used(),
            permissions: self.permissions,
            expires_at: self.expires_at,
            activated_at: self.activated_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn to_status_view(&self, now: DateTime<Utc>) -> PairingStatusView {
        PairingStatusView {
            id: self.id,
            status: self.status,
            is_used: self.is_used(),
            is_active: self.is_active(),
            expires_at: self.expires_at,
            created_at: self.created_at,
            is_expired: self.is_expired_at(now),
        }
    }
}

/// Record as returned to callers. The pairing code is omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingView {
    pub id: Uuid,
    pub child_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub status: PairingStatus,
    pub is_active: bool,
    pub is_used: bool,
    pub permissions: Option<Permissions>,
    pub expires_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only status projection for either party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingStatusView {
    pub id: Uuid,
    pub status: PairingStatus,
    pub is_used: bool,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_expired: bool,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(now: DateTime<Utc>) -> PairingRecord {
        PairingRecord::new_pending(
            Uuid::new_v4(),
            PairingCode::generate(),
            now,
            Duration::minutes(15),
        )
    }

    #[test]
    fn test_new_pending_record() {
        let now = Utc::now();
        let rec = record(now);
        assert_eq!(rec.status, PairingStatus::Pending);
        assert_eq!(rec.parent_id, None);
        assert_eq!(rec.expires_at, now + Duration::minutes(15));
        assert!(!rec.is_active());
        assert!(!rec.is_used());
        assert!(rec.is_live_pending(now));
    }

    #[test]
    fn test_pending_record_expires_by_clock() {
        let now = Utc::now();
        let rec = record(now);
        assert!(!rec.is_expired_at(now));
        assert!(rec.is_expired_at(now + Duration::minutes(15)));
        assert!(!rec.is_live_pending(now + Duration::minutes(16)));
    }

    #[test]
    fn test_flags_follow_status() {
        let now = Utc::now();
        let mut rec = record(now);

        rec.parent_id = Some(Uuid::new_v4());
        assert!(rec.is_used());
        assert!(!rec.is_active());

        rec.status = PairingStatus::Active;
        assert!(rec.is_active());
        assert!(!rec.is_expired_at(now + Duration::days(1)));

        rec.status = PairingStatus::Expired;
        assert!(!rec.is_active());
        assert!(rec.is_expired_at(now));
    }

    #[test]
    fn test_view_omits_code() {
        let rec = record(Utc::now());
        let json = serde_json::to_value(rec.to_view()).unwrap();
        assert!(json.get("pairing_code").is_none());
        assert_eq!(json["status"], "pending");
        assert_eq!(json["is_active"], false);
        assert!(json["parent_id"].is_null());
    }

    #[test]
    fn test_status_roundtrip_from_str() {
        for status in [
            PairingStatus::Pending,
            PairingStatus::Active,
            PairingStatus::Rejected,
            PairingStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<PairingStatus>().unwrap(), status);
        }
        assert!("done".parse::<PairingStatus>().is_err());
    }
}
