//! Device status reconciliation tick.
//!
//! Every tick, for every active valve:
//!   1. Load the device's Approved requests.
//!   2. Derive the target state from the wall clock (`derive`).
//!   3. On a transition, push the actuator command (entering Active =>
//!      Open, Active -> Closed => Close) and persist the new state.
//!
//! The command is pushed before the state write: if the relay is
//! unavailable the write is skipped, so the next tick re-derives the
//! same transition and re-attempts. A persisted state with a lost
//! command would otherwise leave an open valve the hardware never heard
//! about.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::device::model::{Device, OperatingState};
use crate::device::repository::DeviceRepository;
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::reconciler::derive::derive_target;
use crate::relay::{Command, CommandSink};
use crate::request::repository::RequestRepository;

pub struct StatusReconciler {
    requests: Arc<dyn RequestRepository>,
    devices: Arc<dyn DeviceRepository>,
    relay: Arc<dyn CommandSink>,
    counters: Counters,
}

/// What one tick did; returned for logging and assertions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub transitions: usize,
    pub commands: usize,
    pub malformed_windows: usize,
    pub deferred: usize,
    pub failed: usize,
}

enum DeviceOutcome {
    Unchanged,
    Transitioned { command: Option<Command> },
    /// Relay refused the command; state intentionally left stale so the
    /// next tick retries.
    Deferred,
}

impl StatusReconciler {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        devices: Arc<dyn DeviceRepository>,
        relay: Arc<dyn CommandSink>,
        counters: Counters,
    ) -> Self {
        Self {
            requests,
            devices,
            relay,
            counters,
        }
    }

    /// Run one reconciliation pass over all active valves.
    ///
    /// Per-device failures are logged and skipped; one bad device never
    /// starves reconciliation for the rest. Idempotent: with no data
    /// change between two ticks the second one writes nothing and
    /// issues no command.
    #[instrument(skip(self), target = "reconciler", fields(now_ms))]
    pub async fn tick(&self, now_ms: u64) -> anyhow::Result<TickSummary> {
        let valves = warn_if_slow("fetch_active_valves", Duration::from_millis(200), async {
            self.devices.fetch_active_valves().await
        })
        .await
        .context("failed to load valve devices")?;

        let mut summary = TickSummary::default();

        for device in &valves {
            summary.evaluated += 1;

            match self.reconcile_device(device, now_ms).await {
                Ok(DeviceOutcome::Unchanged) => {}
                Ok(DeviceOutcome::Transitioned { command }) => {
                    summary.transitions += 1;
                    if command.is_some() {
                        summary.commands += 1;
                    }
                }
                Ok(DeviceOutcome::Deferred) => {
                    summary.deferred += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    self.counters.recon_device_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        device_id = %device.device_id,
                        error = ?e,
                        "device reconciliation failed; skipping until next tick"
                    );
                }
            }
        }

        self.counters.recon_ticks.fetch_add(1, Ordering::Relaxed);

        debug!(
            evaluated = summary.evaluated,
            transitions = summary.transitions,
            commands = summary.commands,
            failed = summary.failed,
            "reconciliation tick complete"
        );

        Ok(summary)
    }

    async fn reconcile_device(
        &self,
        device: &Device,
        now_ms: u64,
    ) -> anyhow::Result<DeviceOutcome> {
        let approved = self
            .requests
            .approved_for_device(&device.device_id)
            .await
            .context("failed to load approved requests")?;

        let derived = derive_target(&approved, now_ms);

        if derived.malformed > 0 {
            self.counters
                .recon_malformed_windows
                .fetch_add(derived.malformed as u64, Ordering::Relaxed);
            warn!(
                device_id = %device.device_id,
                count = derived.malformed,
                "ignoring approved requests with malformed windows"
            );
        }

        if derived.target == device.operating_state {
            return Ok(DeviceOutcome::Unchanged);
        }

        let command = command_for(device.operating_state, derived.target);

        if let Some(cmd) = command {
            if let Err(e) = self.relay.set_command(cmd) {
                self.counters.relay_unavailable.fetch_add(1, Ordering::Relaxed);
                warn!(
                    device_id = %device.device_id,
                    command = %cmd,
                    error = %e,
                    "relay unavailable; deferring transition to next tick"
                );
                return Ok(DeviceOutcome::Deferred);
            }

            match cmd {
                Command::Open => {
                    self.counters.recon_commands_open.fetch_add(1, Ordering::Relaxed)
                }
                Command::Close => {
                    self.counters.recon_commands_close.fetch_add(1, Ordering::Relaxed)
                }
            };
        }

        self.devices
            .set_operating_state(&device.device_id, derived.target, now_ms)
            .await
            .context("failed to persist operating state")?;

        self.counters.recon_transitions.fetch_add(1, Ordering::Relaxed);

        info!(
            device_id = %device.device_id,
            from = %device.operating_state,
            to = %derived.target,
            command = command.map(|c| c.to_string()).unwrap_or_default(),
            driving_request = derived
                .driving
                .map(|r| r.request_id.to_string())
                .unwrap_or_default(),
            "device state transition"
        );

        Ok(DeviceOutcome::Transitioned { command })
    }
}

/// A command is issued only on entry into Active (open the valve) and on
/// the Active -> Closed edge (close it). Entering Waiting or Disabled,
/// or expiring a window that never became Active, actuates nothing.
fn command_for(current: OperatingState, target: OperatingState) -> Option<Command> {
    match (current, target) {
        (OperatingState::Active, OperatingState::Active) => None,
        (_, OperatingState::Active) => Some(Command::Open),
        (OperatingState::Active, OperatingState::Closed) => Some(Command::Close),
        _ => None,
    }
}
