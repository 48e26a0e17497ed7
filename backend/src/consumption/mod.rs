//! Post-hoc consumption attribution.
//!
//! A lower-frequency job than status reconciliation: for every
//! Approved, expired, not-yet-measured request on a valve, sum the
//! readings of the meters on the request's lot inside the request
//! window and persist exactly one measurement. The absence of a
//! measurement row is the "still pending" signal, so a lot without a
//! meter writes nothing and is re-examined on every run.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::device::repository::DeviceRepository;
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::request::model::{ConsumptionMeasurement, Request};
use crate::request::repository::RequestRepository;

pub struct ConsumptionReconciler {
    requests: Arc<dyn RequestRepository>,
    devices: Arc<dyn DeviceRepository>,
    counters: Counters,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumptionSummary {
    pub examined: usize,
    pub recorded: usize,
    pub skipped_no_meter: usize,
    pub failed: usize,
}

enum Settlement {
    Recorded(f64),
    NoMeter,
    /// A concurrent run inserted the row first; nothing to do.
    AlreadyMeasured,
}

impl ConsumptionReconciler {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        devices: Arc<dyn DeviceRepository>,
        counters: Counters,
    ) -> Self {
        Self {
            requests,
            devices,
            counters,
        }
    }

    /// Run one consumption pass. Per-request failures are logged and
    /// skipped, same isolation rule as the status reconciler.
    #[instrument(skip(self), target = "consumption", fields(now_ms))]
    pub async fn tick(&self, now_ms: u64) -> anyhow::Result<ConsumptionSummary> {
        let pending = warn_if_slow(
            "approved_expired_unmeasured",
            Duration::from_millis(500),
            async { self.requests.approved_expired_unmeasured(now_ms).await },
        )
        .await
        .context("failed to load unmeasured requests")?;

        let mut summary = ConsumptionSummary::default();

        for request in &pending {
            summary.examined += 1;

            match self.settle_request(request, now_ms).await {
                Ok(Settlement::Recorded(volume)) => {
                    summary.recorded += 1;
                    self.counters.consumption_records.fetch_add(1, Ordering::Relaxed);
                    info!(
                        request_id = %request.request_id,
                        volume,
                        "consumption measurement recorded"
                    );
                }
                Ok(Settlement::NoMeter) => {
                    summary.skipped_no_meter += 1;
                    self.counters.consumption_no_meter.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        request_id = %request.request_id,
                        lot_id = %request.lot_id,
                        "lot has no meter; consumption cannot be measured"
                    );
                }
                Ok(Settlement::AlreadyMeasured) => {
                    debug!(request_id = %request.request_id, "measurement already recorded");
                }
                Err(e) => {
                    summary.failed += 1;
                    self.counters.consumption_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        request_id = %request.request_id,
                        error = ?e,
                        "consumption settlement failed; skipping until next run"
                    );
                }
            }
        }

        self.counters.consumption_ticks.fetch_add(1, Ordering::Relaxed);

        debug!(
            examined = summary.examined,
            recorded = summary.recorded,
            skipped_no_meter = summary.skipped_no_meter,
            failed = summary.failed,
            "consumption tick complete"
        );

        Ok(summary)
    }

    async fn settle_request(
        &self,
        request: &Request,
        now_ms: u64,
    ) -> anyhow::Result<Settlement> {
        let meters = self.devices.meters_for_lot(&request.lot_id).await?;
        if meters.is_empty() {
            return Ok(Settlement::NoMeter);
        }

        let mut total = 0.0f64;
        for meter in &meters {
            total += self
                .devices
                .readings_total(&meter.device_id, request.open_at_ms, request.close_at_ms)
                .await
                .context("failed to sum meter readings")?;
        }

        let measurement = ConsumptionMeasurement {
            measurement_id: Uuid::new_v4(),
            request_id: request.request_id,
            measured_volume: total,
            created_at_ms: now_ms,
        };

        if self.requests.insert_measurement(&measurement).await? {
            Ok(Settlement::Recorded(total))
        } else {
            Ok(Settlement::AlreadyMeasured)
        }
    }
}
