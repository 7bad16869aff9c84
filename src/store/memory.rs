//! In-memory pairing store.
//!
//! Records live in an `Arc<RwLock<HashMap>>`; each conditional write runs
//! its check and its mutation under one write guard.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::PairingStore;
use crate::error::DatabaseError;
use crate::pairing::code::PairingCode;
use crate::pairing::permissions::Permissions;
use crate::pairing::record::{PairingRecord, PairingStatus};
use crate::pairing::state::{self, Transition};

#[derive(Debug, Clone, Default)]
pub struct InMemoryPairingStore {
    records: Arc<RwLock<HashMap<Uuid, PairingRecord>>>,
}

impl InMemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, bypassing supersession.
    #[cfg(test)]
    async fn insert_raw(&self, record: PairingRecord) {
        self.records.write().await.insert(record.id, record);
    }

    /// All records of a child, oldest first.
    pub async fn records_for_child(&self, child_id: Uuid) -> Vec<PairingRecord> {
        let records = self.records.read().await;
        let mut list: Vec<PairingRecord> = records
            .values()
            .filter(|r| r.child_id == child_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }
}

#[async_trait]
impl PairingStore for InMemoryPairingStore {
    async fn supersede_and_insert(
        &self,
        record: &PairingRecord,
    ) -> Result<Vec<PairingRecord>, DatabaseError> {
        let mut records = self.records.write().await;

        let code_taken = records.values().any(|r| {
            r.status == PairingStatus::Pending
                && r.child_id != record.child_id
                && r.pairing_code == record.pairing_code
        });
        if code_taken {
            return Err(DatabaseError::DuplicateKey(
                "pairing code already pending".to_string(),
            ));
        }

        let mut superseded = Vec::new();
        for existing in records.values_mut() {
            if existing.child_id == record.child_id
                && state::check(existing, Transition::Supersede, record.created_at).is_ok()
            {
                existing.status = Transition::Supersede.target();
                existing.updated_at = record.created_at;
                superseded.push(existing.clone());
            }
        }

        records.insert(record.id, record.clone());
        Ok(superseded)
    }

    async fn pending_code_exists(&self, code: &PairingCode) -> Result<bool, DatabaseError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .any(|r| r.status == PairingStatus::Pending && &r.pairing_code == code))
    }

    async fn bind_parent(
        &self,
        code: &PairingCode,
        parent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError> {
        let mut records = self.records.write().await;
        let record = records.values_mut().find(|r| {
            &r.pairing_code == code && state::check(r, Transition::BindParent, now).is_ok()
        });

        Ok(record.map(|r| {
            r.parent_id = Some(parent_id);
            r.updated_at = now;
            r.clone()
        }))
    }

    async fn find_bound(
        &self,
        code: &PairingCode,
        parent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| {
                &r.pairing_code == code
                    && r.parent_id == Some(parent_id)
                    && r.is_live_pending(now)
            })
            .cloned())
    }

    async fn activate(
        &self,
        id: Uuid,
        child_id: Uuid,
        permissions: Permissions,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if record.child_id != child_id || state::check(record, Transition::Activate, now).is_err() {
            return Ok(None);
        }

        record.status = Transition::Activate.target();
        record.permissions = Some(permissions);
        record.activated_at = Some(now);
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn reject(
        &self,
        id: Uuid,
        child_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PairingRecord>, DatabaseError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if record.child_id != child_id || state::check(record, Transition::Reject, now).is_err() {
            return Ok(None);
        }

        record.status = Transition::Reject.target();
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<PairingRecord>, DatabaseError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut records = self.records.write().await;
        let mut expired = 0;
        for record in records.values_mut() {
            if state::check(record, Transition::Expire, now).is_ok() {
                record.status = Transition::Expire.target();
                record.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }
}
