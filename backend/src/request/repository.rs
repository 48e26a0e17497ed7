use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::request::model::{ConsumptionMeasurement, Request};

#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Insert one request row. Returns false when the request is
    /// Pending and another Pending row for the same device already
    /// exists (the unique-index guard rejected it).
    async fn insert(&self, request: &Request) -> Result<bool>;

    async fn fetch_by_id(&self, request_id: &Uuid) -> Result<Option<Request>>;

    /// True if a Pending request exists for `device_id`.
    async fn has_pending_for_device(&self, device_id: &Uuid) -> Result<bool>;

    /// Transition Pending -> Approved. Returns false when the request
    /// was no longer Pending (the guard lost a decision race).
    async fn mark_approved(&self, request_id: &Uuid) -> Result<bool>;

    /// Transition Pending -> Rejected with reason metadata. Same guard
    /// semantics as `mark_approved`.
    async fn mark_rejected(
        &self,
        request_id: &Uuid,
        reason_id: i64,
        comment: Option<&str>,
    ) -> Result<bool>;

    async fn reason_exists(&self, reason_id: i64) -> Result<bool>;

    /// All Approved requests targeting `device_id`, malformed windows
    /// included (the reconciler counts and skips them).
    async fn approved_for_device(&self, device_id: &Uuid) -> Result<Vec<Request>>;

    /// Approved requests on valve devices whose window expired before
    /// `now_ms` and which have no consumption record yet. Malformed
    /// windows are excluded: there is no meaningful interval to meter.
    async fn approved_expired_unmeasured(&self, now_ms: u64) -> Result<Vec<Request>>;

    /// Insert one consumption record. Returns false when a record for
    /// the request already exists (insert raced another run).
    async fn insert_measurement(&self, m: &ConsumptionMeasurement) -> Result<bool>;
}
