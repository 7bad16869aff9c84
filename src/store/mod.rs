//! Pairing record persistence.
//!
//! Every mutating call is a conditional write evaluated atomically against
//! the record's current status, so concurrent callers race to exactly one
//! winner without explicit locks held across requests.

mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pairing::code::PairingCode;
use crate::pairing::permissions::Permissions;
use crate::pairing::record::PairingRecord;

pub use memory::InMemoryPairingStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresPairingStore;

/// Storage backend for pairing records.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Expire every pending record of `record.child_id` and insert `record`,
    /// as one unit. Returns the superseded records as they now stand.
    ///
    /// Fails with [`DatabaseError::DuplicateKey`] if `record.pairing_code`
    /// is already held by another pending record; nothing is written then.
    async fn supersede_and_insert(
        &self,
        record: &PairingRecord,
    ) -> Result<Vec<PairingRecord>, DatabaseError>;

    /// Whether a pending record currently holds `code`.
    async fn pending_code_exists(&self, code: &PairingCode) -> Result<bool, DatabaseError>;

    /// Bind `parent_id` to the pending, unexpired, unbound record holding
    /// `code`. `None` if no record matched at the moment of the write.
    async fn bind_parent(
        &self,
        code: &PairingCode,
        parent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError>;

    /// The pending, unexpired record holding `code` that is already bound
    /// to `parent_id`, if any. Lets a parent learn that an earlier bind of
    /// theirs committed even though its reply was lost.
    async fn find_bound(
        &self,
        code: &PairingCode,
        parent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError>;

    /// Activate record `id` owned by `child_id` if it is pending, unexpired
    /// and parent-bound. `None` if those conditions did not hold.
    async fn activate(
        &self,
        id: Uuid,
        child_id: Uuid,
        permissions: Permissions,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError>;

    /// Move record `id` owned by `child_id` from pending (unexpired) to rejected.
    async fn reject(
        &self,
        id: Uuid,
        child_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<PairingRecord>, DatabaseError>;

    /// Mark every pending record past its TTL as expired.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;
}
