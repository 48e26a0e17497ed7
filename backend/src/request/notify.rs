use async_trait::async_trait;
use uuid::Uuid;

/// Who a lifecycle notification is addressed to. Operator fan-out
/// (which users hold the operator role) is the collaborator's problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Requester(i64),
    Operators,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    RequestCreated { request_id: Uuid },
    RequestAwaitingApproval { request_id: Uuid },
    RequestApproved { request_id: Uuid },
    RequestRejected { request_id: Uuid, reason_id: i64 },
}

/// Delivery seam for lifecycle notifications. The surrounding
/// application plugs in its real channel (websocket push, email);
/// delivery failure must never fail the lifecycle operation, so the
/// trait is infallible and implementations log their own errors.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: Recipient, event: &LifecycleEvent);
}

/// Default notifier: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: Recipient, event: &LifecycleEvent) {
        tracing::info!(?recipient, ?event, "lifecycle notification");
    }
}
