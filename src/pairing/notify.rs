//! Pairing state-change notifications.
//!
//! Delivery to devices is the job of an external pub/sub channel; this
//! module defines the events and the seam to hand them over. A committed
//! transition is never undone because a notification failed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::pairing::permissions::Permissions;

/// A state change worth telling one or both parties about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PairingEvent {
    /// A pending pairing was invalidated by a newer code of the same child.
    /// A parent already bound to it is told the pairing is gone.
    Superseded {
        pairing_id: Uuid,
        child_id: Uuid,
        parent_id: Option<Uuid>,
    },
    /// A parent validated the code; the child should start negotiation.
    ParentBound {
        pairing_id: Uuid,
        child_id: Uuid,
        parent_id: Uuid,
    },
    /// The child granted permissions; monitoring is live.
    Activated {
        pairing_id: Uuid,
        child_id: Uuid,
        parent_id: Uuid,
        permissions: Permissions,
    },
    /// The child declined the pairing.
    Rejected {
        pairing_id: Uuid,
        child_id: Uuid,
        parent_id: Option<Uuid>,
    },
}

impl PairingEvent {
    /// Identities that should receive this event.
    pub fn recipients(&self) -> Vec<Uuid> {
        match self {
            PairingEvent::Superseded {
                child_id,
                parent_id,
                ..
            } => std::iter::once(*child_id).chain(*parent_id).collect(),
            PairingEvent::ParentBound { child_id, .. } => vec![*child_id],
            PairingEvent::Activated { parent_id, .. } => vec![*parent_id],
            PairingEvent::Rejected { parent_id, .. } => parent_id.iter().copied().collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PairingEvent::Superseded { .. } => "superseded",
            PairingEvent::ParentBound { .. } => "parent_bound",
            PairingEvent::Activated { .. } => "activated",
            PairingEvent::Rejected { .. } => "rejected",
        }
    }
}

/// Error handing an event to the notification channel.
#[derive(Debug, thiserror::Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Hand-off point to the realtime channel.
#[async_trait]
pub trait PairingNotifier: Send + Sync {
    async fn notify(&self, event: PairingEvent) -> Result<(), NotifyError>;
}

/// Writes events to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl PairingNotifier for LogNotifier {
    async fn notify(&self, event: PairingEvent) -> Result<(), NotifyError> {
        tracing::info!(
            event = event.kind(),
            recipients = ?event.recipients(),
            "Pairing event"
        );
        Ok(())
    }
}

/// Fans events out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<PairingEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PairingEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl PairingNotifier for BroadcastNotifier {
    async fn notify(&self, event: PairingEvent) -> Result<(), NotifyError> {
        // No subscribers is not a failure.
        let _ = self.tx.send(event);
        Ok(())
    }
}
