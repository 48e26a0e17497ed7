//! Request lifecycle: Pending -> Approved | Rejected.
//!
//! Decisions are terminal. Approval deliberately does not touch device
//! state: the status reconciler picks the change up on its next tick,
//! which keeps the decision atomic and independent of the actuator
//! link's availability.

use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::device::repository::DeviceRepository;
use crate::error::LifecycleError;
use crate::request::model::{NewRequest, OpeningKind, Request, RequestStatus};
use crate::request::notify::{LifecycleEvent, LogNotifier, Notifier, Recipient};
use crate::request::repository::RequestRepository;

pub struct RequestLifecycle {
    requests: Arc<dyn RequestRepository>,
    devices: Arc<dyn DeviceRepository>,
    notifier: Arc<dyn Notifier>,
}

impl RequestLifecycle {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        devices: Arc<dyn DeviceRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            requests,
            devices,
            notifier,
        }
    }

    pub fn with_log_notifier(
        requests: Arc<dyn RequestRepository>,
        devices: Arc<dyn DeviceRepository>,
    ) -> Self {
        Self::new(requests, devices, Arc::new(LogNotifier))
    }

    /// Submit a new water-access request. The request is inserted as
    /// Pending; an operator decision moves it on from there.
    #[instrument(skip(self, new), target = "lifecycle", fields(device_id = %new.device_id))]
    pub async fn submit(&self, new: NewRequest, now_ms: u64) -> Result<Request, LifecycleError> {
        validate_window(new.open_at_ms, new.close_at_ms)?;

        if new.kind.requires_volume() && new.requested_volume.is_none() {
            return Err(LifecycleError::MissingVolume);
        }

        // Fast-path check; the unique index on Pending rows is the
        // durable guard when two submits race past it.
        if self.requests.has_pending_for_device(&new.device_id).await? {
            return Err(LifecycleError::DuplicatePendingRequest(new.device_id));
        }

        let request = Request {
            request_id: Uuid::new_v4(),
            device_id: new.device_id,
            lot_id: new.lot_id,
            requester_id: new.requester_id,
            kind: new.kind,
            requested_volume: new.requested_volume,
            open_at_ms: new.open_at_ms,
            close_at_ms: new.close_at_ms,
            created_at_ms: now_ms,
            status: RequestStatus::Pending,
            rejection_reason_id: None,
            rejection_comment: None,
        };

        if !self.requests.insert(&request).await? {
            return Err(LifecycleError::DuplicatePendingRequest(new.device_id));
        }

        tracing::info!(request_id = %request.request_id, "request submitted");

        self.notifier
            .notify(
                Recipient::Requester(request.requester_id),
                &LifecycleEvent::RequestCreated {
                    request_id: request.request_id,
                },
            )
            .await;
        self.notifier
            .notify(
                Recipient::Operators,
                &LifecycleEvent::RequestAwaitingApproval {
                    request_id: request.request_id,
                },
            )
            .await;

        Ok(request)
    }

    /// Approve a pending request. Terminal: a second decision fails
    /// with `AlreadyDecided`.
    #[instrument(skip(self), target = "lifecycle", fields(request_id = %request_id))]
    pub async fn approve(&self, request_id: Uuid) -> Result<Request, LifecycleError> {
        let mut request = self
            .requests
            .fetch_by_id(&request_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("request", request_id))?;

        if !self.requests.mark_approved(&request_id).await? {
            // Guard lost: either already decided before the fetch or a
            // concurrent decision won the race.
            return Err(self.already_decided(request_id, request.status).await);
        }

        request.status = RequestStatus::Approved;

        tracing::info!(request_id = %request_id, "request approved");

        self.notifier
            .notify(
                Recipient::Requester(request.requester_id),
                &LifecycleEvent::RequestApproved { request_id },
            )
            .await;

        Ok(request)
    }

    /// Reject a pending request with a reason from the lookup table.
    #[instrument(skip(self, comment), target = "lifecycle", fields(request_id = %request_id))]
    pub async fn reject(
        &self,
        request_id: Uuid,
        reason_id: i64,
        comment: Option<String>,
    ) -> Result<Request, LifecycleError> {
        let mut request = self
            .requests
            .fetch_by_id(&request_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("request", request_id))?;

        if !self.requests.reason_exists(reason_id).await? {
            return Err(LifecycleError::not_found("rejection reason", reason_id));
        }

        if !self
            .requests
            .mark_rejected(&request_id, reason_id, comment.as_deref())
            .await?
        {
            return Err(self.already_decided(request_id, request.status).await);
        }

        request.status = RequestStatus::Rejected;
        request.rejection_reason_id = Some(reason_id);
        request.rejection_comment = comment;

        tracing::info!(request_id = %request_id, reason_id, "request rejected");

        self.notifier
            .notify(
                Recipient::Requester(request.requester_id),
                &LifecycleEvent::RequestRejected {
                    request_id,
                    reason_id,
                },
            )
            .await;

        Ok(request)
    }

    /// Manual operator override, modeled as a synthetic already-Approved
    /// request so the reconciler stays the sole writer of device state.
    /// An out-of-band state write would be clobbered on the next tick.
    #[instrument(skip(self), target = "lifecycle", fields(device_id = %device_id))]
    pub async fn submit_override(
        &self,
        device_id: Uuid,
        operator_id: i64,
        open_at_ms: u64,
        close_at_ms: u64,
        now_ms: u64,
    ) -> Result<Request, LifecycleError> {
        validate_window(open_at_ms, close_at_ms)?;

        let device = self
            .devices
            .fetch_by_id(&device_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("device", device_id))?;

        let request = Request {
            request_id: Uuid::new_v4(),
            device_id,
            lot_id: device.lot_id,
            requester_id: operator_id,
            kind: OpeningKind::Scheduled,
            requested_volume: None,
            open_at_ms,
            close_at_ms,
            created_at_ms: now_ms,
            status: RequestStatus::Approved,
            rejection_reason_id: None,
            rejection_comment: None,
        };

        // Approved rows never hit the pending-per-device guard.
        let _ = self.requests.insert(&request).await?;

        tracing::info!(
            request_id = %request.request_id,
            operator_id,
            "manual override submitted as approved request"
        );

        Ok(request)
    }

    /// Guard-loss error carrying the status the row actually ended up
    /// in, not the stale one observed before the race.
    async fn already_decided(
        &self,
        request_id: Uuid,
        observed: RequestStatus,
    ) -> LifecycleError {
        let status = match self.requests.fetch_by_id(&request_id).await {
            Ok(Some(r)) => r.status,
            _ => observed,
        };
        LifecycleError::AlreadyDecided {
            id: request_id,
            status,
        }
    }
}

fn validate_window(open_at_ms: u64, close_at_ms: u64) -> Result<(), LifecycleError> {
    if close_at_ms < open_at_ms {
        return Err(LifecycleError::MalformedWindow {
            open_at_ms,
            close_at_ms,
        });
    }
    Ok(())
}
