//! Pairing operations: generate, validate, accept, reject, status, sweep.
//!
//! Each operation takes the already-authenticated caller, checks its role,
//! and performs at most one conditional store write. Store failures are
//! logged here with the operation and caller and leave as
//! [`PairingError::Internal`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::{DatabaseError, PairingError};
use crate::pairing::code::PairingCode;
use crate::pairing::notify::{PairingEvent, PairingNotifier};
use crate::pairing::permissions::{Permissions, RequestedPermissions};
use crate::pairing::rate_limit::{AttemptLimiter, LimitDecision};
use crate::pairing::record::{PairingRecord, PairingStatusView, PairingView};
use crate::pairing::state::{self, Transition};
use crate::store::PairingStore;

/// Code generation attempts before giving up with `ResourceExhausted`.
pub const MAX_CODE_ATTEMPTS: u32 = 5;

/// Default lifetime of a pairing code.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(15 * 60);

/// Default bound on a single store or notifier call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for [`PairingService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub code_ttl: Duration,
    pub store_timeout: Duration,
    pub notify_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            code_ttl: DEFAULT_CODE_TTL,
            store_timeout: DEFAULT_CALL_TIMEOUT,
            notify_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Result of a successful code generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub pairing_id: Uuid,
    pub pairing_code: String,
    pub display_code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PairingService {
    store: Arc<dyn PairingStore>,
    limiter: Arc<dyn AttemptLimiter>,
    notifier: Arc<dyn PairingNotifier>,
    config: ServiceConfig,
}

impl PairingService {
    pub fn new(
        store: Arc<dyn PairingStore>,
        limiter: Arc<dyn AttemptLimiter>,
        notifier: Arc<dyn PairingNotifier>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            notifier,
            config,
        }
    }

    /// Issue a fresh code for the calling child, expiring its older pending codes.
    pub async fn generate_pairing_code(
        &self,
        caller: &Identity,
    ) -> Result<GeneratedCode, PairingError> {
        const OP: &str = "generate_pairing_code";
        Transition::Supersede.authorize(caller)?;

        let ttl = chrono::Duration::from_std(self.config.code_ttl).map_err(|e| {
            tracing::error!(operation = OP, error = %e, "Code TTL out of range");
            PairingError::Internal
        })?;

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = PairingCode::generate();

            let taken = self
                .store_call(OP, caller, self.store.pending_code_exists(&code))
                .await?;
            if taken {
                tracing::debug!(operation = OP, attempt, "Pairing code collision");
                continue;
            }

            let record = PairingRecord::new_pending(caller.user_id, code, Utc::now(), ttl);
            let superseded = match self
                .store_call(OP, caller, self.store.supersede_and_insert(&record))
                .await
            {
                Ok(records) => records,
                Err(StoreFailure(DatabaseError::DuplicateKey(_))) => {
                    tracing::debug!(operation = OP, attempt, "Pairing code taken at insert");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            tracing::info!(
                operation = OP,
                caller = %caller.user_id,
                pairing_id = %record.id,
                superseded = superseded.len(),
                "Pairing code generated"
            );
            for old in superseded {
                self.publish(PairingEvent::Superseded {
                    pairing_id: old.id,
                    child_id: old.child_id,
                    parent_id: old.parent_id,
                })
                .await;
            }

            return Ok(GeneratedCode {
                pairing_id: record.id,
                display_code: record.pairing_code.display_form(),
                pairing_code: record.pairing_code.as_str().to_string(),
                expires_at: record.expires_at,
            });
        }

        tracing::warn!(
            operation = OP,
            caller = %caller.user_id,
            attempts = MAX_CODE_ATTEMPTS,
            "Pairing code generation exhausted"
        );
        Err(PairingError::ResourceExhausted)
    }

    /// Bind the calling parent to the pending record holding `code`.
    ///
    /// Every lookup failure, storage errors included, returns the same
    /// generic error. Repeating the call for a pairing the caller already
    /// holds returns it again, so a bind whose reply was lost to the store
    /// timeout is recovered rather than reported as failed.
    pub async fn validate_pairing_code(
        &self,
        caller: &Identity,
        code: &str,
    ) -> Result<PairingView, PairingError> {
        const OP: &str = "validate_pairing_code";
        Transition::BindParent.authorize(caller)?;

        match self.limiter.try_acquire(&caller.user_id.to_string()).await {
            LimitDecision::Limited { retry_after } => {
                tracing::warn!(operation = OP, caller = %caller.user_id, "Validation rate limited");
                return Err(PairingError::RateLimited {
                    retry_after: Some(retry_after),
                });
            }
            LimitDecision::Allowed { remaining } => {
                tracing::debug!(operation = OP, caller = %caller.user_id, remaining, "Validation attempt");
            }
        }

        let code = PairingCode::parse(code)?;
        let now = Utc::now();

        let bound = match self
            .store_call(OP, caller, self.store.bind_parent(&code, caller.user_id, now))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) | Err(StoreFailure(DatabaseError::Timeout(_))) => {
                match self
                    .store_call(OP, caller, self.store.find_bound(&code, caller.user_id, now))
                    .await
                {
                    Ok(Some(record)) => {
                        tracing::info!(
                            operation = OP,
                            caller = %caller.user_id,
                            pairing_id = %record.id,
                            "Pairing already bound to caller"
                        );
                        record
                    }
                    Ok(None) => {
                        tracing::info!(operation = OP, caller = %caller.user_id, "Pairing code did not match");
                        return Err(PairingError::invalid_code());
                    }
                    Err(_) => return Err(PairingError::invalid_code()),
                }
            }
            Err(_) => return Err(PairingError::invalid_code()),
        };

        tracing::info!(
            operation = OP,
            caller = %caller.user_id,
            pairing_id = %bound.id,
            "Parent bound to pairing"
        );
        self.publish(PairingEvent::ParentBound {
            pairing_id: bound.id,
            child_id: bound.child_id,
            parent_id: caller.user_id,
        })
        .await;

        Ok(bound.to_view())
    }

    /// Activate the caller's pairing with the granted permissions.
    pub async fn accept_pairing(
        &self,
        caller: &Identity,
        pairing_id: Uuid,
        permissions: Option<RequestedPermissions>,
    ) -> Result<PairingView, PairingError> {
        const OP: &str = "accept_pairing";
        Transition::Activate.authorize(caller)?;

        let permissions: Permissions = RequestedPermissions::resolve(permissions);
        let now = Utc::now();

        let activated = self
            .store_call(
                OP,
                caller,
                self.store
                    .activate(pairing_id, caller.user_id, permissions, now),
            )
            .await?;

        let Some(record) = activated else {
            return Err(self
                .explain_refusal(OP, caller, pairing_id, Transition::Activate, now)
                .await);
        };

        let parent_id = record.parent_id.ok_or_else(|| {
            tracing::error!(operation = OP, pairing_id = %record.id, "Active pairing without parent");
            PairingError::Internal
        })?;

        tracing::info!(
            operation = OP,
            caller = %caller.user_id,
            pairing_id = %record.id,
            granted = ?permissions.granted(),
            "Pairing activated"
        );
        self.publish(PairingEvent::Activated {
            pairing_id: record.id,
            child_id: record.child_id,
            parent_id,
            permissions,
        })
        .await;

        Ok(record.to_view())
    }

    /// Decline the caller's pending pairing.
    pub async fn reject_pairing(
        &self,
        caller: &Identity,
        pairing_id: Uuid,
    ) -> Result<PairingView, PairingError> {
        const OP: &str = "reject_pairing";
        Transition::Reject.authorize(caller)?;
        let now = Utc::now();

        let rejected = self
            .store_call(OP, caller, self.store.reject(pairing_id, caller.user_id, now))
            .await?;

        let Some(record) = rejected else {
            return Err(self
                .explain_refusal(OP, caller, pairing_id, Transition::Reject, now)
                .await);
        };

        tracing::info!(operation = OP, caller = %caller.user_id, pairing_id = %record.id, "Pairing rejected");
        self.publish(PairingEvent::Rejected {
            pairing_id: record.id,
            child_id: record.child_id,
            parent_id: record.parent_id,
        })
        .await;

        Ok(record.to_view())
    }

    /// Read-only status for either party of the pairing.
    pub async fn get_pairing_status(
        &self,
        caller: &Identity,
        pairing_id: Uuid,
    ) -> Result<PairingStatusView, PairingError> {
        const OP: &str = "get_pairing_status";
        let record = self
            .store_call(OP, caller, self.store.get(pairing_id))
            .await?;

        match record {
            Some(record) if record.involves(caller.user_id) => {
                Ok(record.to_status_view(Utc::now()))
            }
            _ => Err(PairingError::Forbidden),
        }
    }

    /// Mark overdue pending records expired. Returns how many changed.
    pub async fn expire_stale(&self) -> Result<u64, DatabaseError> {
        let expired = self.bounded(self.store.expire_stale(Utc::now())).await?;
        if expired > 0 {
            tracing::info!(expired, "Expired stale pairing codes");
        }
        Ok(expired)
    }

    /// Work out why a conditional write matched nothing.
    ///
    /// Missing and foreign records both read as `Forbidden`; for the
    /// caller's own record the state machine names the refusal. A record
    /// that now admits the transition moved under the write and is
    /// reported as a retryable race.
    async fn explain_refusal(
        &self,
        op: &'static str,
        caller: &Identity,
        pairing_id: Uuid,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> PairingError {
        let record = match self.store_call(op, caller, self.store.get(pairing_id)).await {
            Ok(record) => record,
            Err(e) => return e.into(),
        };

        let Some(record) = record else {
            return PairingError::Forbidden;
        };
        if record.child_id != caller.user_id {
            return PairingError::Forbidden;
        }

        let refusal = match state::check(&record, transition, now) {
            Err(refusal) => refusal,
            Ok(()) => {
                // The record changed between the write and this read.
                tracing::warn!(
                    operation = op,
                    caller = %caller.user_id,
                    pairing_id = %pairing_id,
                    transition = transition.name(),
                    "Pairing changed during transition"
                );
                return PairingError::IntegrityRace;
            }
        };
        tracing::info!(
            operation = op,
            caller = %caller.user_id,
            pairing_id = %pairing_id,
            transition = transition.name(),
            %refusal,
            "Transition refused"
        );
        refusal.into()
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, DatabaseError>
    where
        F: Future<Output = Result<T, DatabaseError>>,
    {
        tokio::time::timeout(self.config.store_timeout, fut)
            .await
            .map_err(|_| DatabaseError::Timeout(self.config.store_timeout))?
    }

    /// Run a store call under the timeout and log failures with context.
    async fn store_call<T, F>(
        &self,
        op: &'static str,
        caller: &Identity,
        fut: F,
    ) -> Result<T, StoreFailure>
    where
        F: Future<Output = Result<T, DatabaseError>>,
    {
        self.bounded(fut).await.map_err(|e| {
            match &e {
                DatabaseError::DuplicateKey(_) => {}
                DatabaseError::IntegrityRace(_) => {
                    tracing::warn!(operation = op, caller = %caller.user_id, error = %e, "Store integrity race");
                }
                _ => {
                    tracing::error!(operation = op, caller = %caller.user_id, error = %e, "Store call failed");
                }
            }
            StoreFailure(e)
        })
    }

    async fn publish(&self, event: PairingEvent) {
        let kind = event.kind();
        match tokio::time::timeout(self.config.notify_timeout, self.notifier.notify(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(event = kind, error = %e, "Pairing notification failed"),
            Err(_) => tracing::warn!(event = kind, "Pairing notification timed out"),
        }
    }
}

/// A store failure that has already been logged.
#[derive(Debug)]
struct StoreFailure(DatabaseError);

impl From<StoreFailure> for PairingError {
    fn from(failure: StoreFailure) -> Self {
        match failure.0 {
            DatabaseError::IntegrityRace(_) => PairingError::IntegrityRace,
            _ => PairingError::Internal,
        }
    }
}

/// Periodically expire overdue pending codes until the runtime shuts down.
pub fn spawn_expiry_sweeper(service: PairingService, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Pairing expiry sweeper started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = service.expire_stale().await {
                tracing::error!(error = %e, "Pairing expiry sweep failed");
            }
        }
    })
}
