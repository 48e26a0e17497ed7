use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type DeviceId = Uuid;

/// Role a physical unit plays in reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Remotely actuated valve; participates in status reconciliation.
    Valve,
    /// Passive meter; its readings feed consumption attribution.
    Meter,
    /// Anything else (controllers, power units); ignored by both loops.
    Other,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::Valve => "Valve",
            DeviceKind::Meter => "Meter",
            DeviceKind::Other => "Other",
        })
    }
}

impl FromStr for DeviceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Valve" => Ok(DeviceKind::Valve),
            "Meter" => Ok(DeviceKind::Meter),
            "Other" => Ok(DeviceKind::Other),
            other => Err(anyhow::anyhow!("invalid DeviceKind value: {}", other)),
        }
    }
}

/// Derived device status. Always a pure function of "now" and the
/// device's Approved requests; the status reconciler is the only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingState {
    /// No Approved request exists for the device at all.
    Disabled,
    /// An Approved request exists whose window has not opened yet.
    Waiting,
    /// An Approved window currently brackets "now"; valve is open.
    Active,
    /// The most recent Approved window has expired.
    Closed,
}

impl OperatingState {
    /// Legacy integer code from the original status lookup table. The
    /// legacy codes drifted between revisions; this table is the
    /// canonical external mapping and nothing internal depends on it.
    pub fn legacy_code(&self) -> i64 {
        match self {
            OperatingState::Active => 11,
            OperatingState::Disabled => 12,
            OperatingState::Waiting => 20,
            OperatingState::Closed => 21,
        }
    }

    pub fn from_legacy_code(code: i64) -> anyhow::Result<Self> {
        match code {
            11 => Ok(OperatingState::Active),
            12 => Ok(OperatingState::Disabled),
            20 => Ok(OperatingState::Waiting),
            21 => Ok(OperatingState::Closed),
            other => Err(anyhow::anyhow!("unknown operating state code: {}", other)),
        }
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperatingState::Disabled => "Disabled",
            OperatingState::Waiting => "Waiting",
            OperatingState::Active => "Active",
            OperatingState::Closed => "Closed",
        })
    }
}

impl FromStr for OperatingState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Disabled" => Ok(OperatingState::Disabled),
            "Waiting" => Ok(OperatingState::Waiting),
            "Active" => Ok(OperatingState::Active),
            "Closed" => Ok(OperatingState::Closed),
            other => Err(anyhow::anyhow!("invalid OperatingState value: {}", other)),
        }
    }
}

/// One physical unit bound to a lot. Rows are created at provisioning
/// time and never deleted, only deactivated.
#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: DeviceId,
    pub lot_id: Uuid,
    pub kind: DeviceKind,
    pub operating_state: OperatingState,
    pub last_transition_ms: Option<u64>,
    pub active: bool,
}
