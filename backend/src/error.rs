use thiserror::Error;
use uuid::Uuid;

use crate::request::model::RequestStatus;

/// Errors surfaced to callers of the request lifecycle operations.
///
/// Reconciliation jobs never return these; their per-device failures are
/// logged and skipped so one bad row cannot starve the rest of a tick.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("a pending request already exists for device {0}")]
    DuplicatePendingRequest(Uuid),

    #[error("volume is required for a volume-limited opening")]
    MissingVolume,

    #[error("request {id} was already decided: {status}")]
    AlreadyDecided { id: Uuid, status: RequestStatus },

    #[error("malformed window: open {open_at_ms} is after close {close_at_ms}")]
    MalformedWindow { open_at_ms: u64, close_at_ms: u64 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl LifecycleError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
