use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RequestId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    /// Legacy integer code used by the original status lookup table.
    ///
    /// Serialization concern only; nothing internal branches on these.
    pub fn legacy_code(&self) -> i64 {
        match self {
            RequestStatus::Approved => 17,
            RequestStatus::Pending => 18,
            RequestStatus::Rejected => 19,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Approved => "Approved",
            RequestStatus::Rejected => "Rejected",
        })
    }
}

impl FromStr for RequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(RequestStatus::Pending),
            "Approved" => Ok(RequestStatus::Approved),
            "Rejected" => Ok(RequestStatus::Rejected),
            other => Err(anyhow::anyhow!("invalid RequestStatus value: {}", other)),
        }
    }
}

/// Kind of valve opening the requester asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpeningKind {
    /// Open for the whole requested window.
    Scheduled,
    /// Open until a requested volume has flowed; requires
    /// `requested_volume` at submission time.
    VolumeLimited,
}

impl OpeningKind {
    pub fn requires_volume(&self) -> bool {
        matches!(self, OpeningKind::VolumeLimited)
    }
}

impl fmt::Display for OpeningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpeningKind::Scheduled => "Scheduled",
            OpeningKind::VolumeLimited => "VolumeLimited",
        })
    }
}

impl FromStr for OpeningKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scheduled" => Ok(OpeningKind::Scheduled),
            "VolumeLimited" => Ok(OpeningKind::VolumeLimited),
            other => Err(anyhow::anyhow!("invalid OpeningKind value: {}", other)),
        }
    }
}

/// One user-submitted water-access window for a valve.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: RequestId,
    pub device_id: Uuid,
    pub lot_id: Uuid,
    pub requester_id: i64,

    pub kind: OpeningKind,
    pub requested_volume: Option<f64>,

    /// Approved operating window, epoch ms. Inclusive on both ends.
    pub open_at_ms: u64,
    pub close_at_ms: u64,
    pub created_at_ms: u64,

    pub status: RequestStatus,
    pub rejection_reason_id: Option<i64>,
    pub rejection_comment: Option<String>,
}

impl Request {
    /// A window with open after close is data corruption; such rows are
    /// excluded from state derivation and must never produce a command.
    pub fn window_is_valid(&self) -> bool {
        self.open_at_ms <= self.close_at_ms
    }

    /// True while `now` falls inside the operating window.
    pub fn brackets(&self, now_ms: u64) -> bool {
        self.open_at_ms <= now_ms && now_ms <= self.close_at_ms
    }

    pub fn is_upcoming(&self, now_ms: u64) -> bool {
        now_ms < self.open_at_ms
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.close_at_ms
    }
}

/// Fields a requester supplies when submitting; everything else
/// (id, status, created_at) is assigned by the lifecycle service.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub device_id: Uuid,
    pub lot_id: Uuid,
    pub requester_id: i64,
    pub kind: OpeningKind,
    pub requested_volume: Option<f64>,
    pub open_at_ms: u64,
    pub close_at_ms: u64,
}

/// Post-hoc attribution of metered volume to one closed request.
#[derive(Debug, Clone)]
pub struct ConsumptionMeasurement {
    pub measurement_id: Uuid,
    pub request_id: RequestId,
    pub measured_volume: f64,
    pub created_at_ms: u64,
}
