use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    // status reconciler
    pub recon_ticks: Arc<AtomicU64>,
    pub recon_transitions: Arc<AtomicU64>,
    pub recon_commands_open: Arc<AtomicU64>,
    pub recon_commands_close: Arc<AtomicU64>,
    pub recon_malformed_windows: Arc<AtomicU64>,
    pub recon_device_errors: Arc<AtomicU64>,
    pub relay_unavailable: Arc<AtomicU64>,

    // consumption reconciler
    pub consumption_ticks: Arc<AtomicU64>,
    pub consumption_records: Arc<AtomicU64>,
    pub consumption_no_meter: Arc<AtomicU64>,
    pub consumption_errors: Arc<AtomicU64>,
}
