use chrono::Utc;

/// Current wall-clock time in epoch milliseconds.
///
/// Ticking code never calls this directly; `now_ms` is always passed in
/// as a parameter so tests can drive the clock.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
