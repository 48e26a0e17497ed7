use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::device::model::{Device, OperatingState};

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn fetch_by_id(&self, device_id: &Uuid) -> Result<Option<Device>>;

    /// Active valve-kind devices, the population the status reconciler
    /// walks every tick.
    async fn fetch_active_valves(&self) -> Result<Vec<Device>>;

    /// Active meter-kind devices on a lot.
    async fn meters_for_lot(&self, lot_id: &Uuid) -> Result<Vec<Device>>;

    /// Persist a derived state change. Sole write path for
    /// `operating_state`; called only by the status reconciler.
    async fn set_operating_state(
        &self,
        device_id: &Uuid,
        state: OperatingState,
        now_ms: u64,
    ) -> Result<()>;

    /// Sum of one meter's readings recorded inside `[from_ms, to_ms]`
    /// (inclusive). Zero when no readings fall in the interval.
    async fn readings_total(&self, device_id: &Uuid, from_ms: u64, to_ms: u64) -> Result<f64>;
}
