#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Connection pool cap. Both reconciliation loops share one pool;
    /// the default leaves headroom for the surrounding application.
    pub db_max_connections: u32,

    // =========================
    // Reconciliation loops
    // =========================
    /// Interval (ms) between device status reconciliation ticks.
    ///
    /// Field hardware polls the command relay more often than this, so a
    /// shorter interval tightens the bound between "request approved"
    /// and "valve actuated". Ticks of this loop never overlap: an
    /// overrunning tick delays the next one.
    pub status_tick_ms: u64,

    /// Interval (ms) between consumption reconciliation runs.
    ///
    /// Consumption attribution is post-hoc bookkeeping; an hour of lag
    /// is acceptable and keeps the metering queries off the hot path.
    pub consumption_tick_ms: u64,

    // =========================
    // Logging
    // =========================
    /// Emit JSON logs (production) instead of the pretty formatter.
    pub json_logs: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://irrigation_dev.db".to_string());

        Self {
            database_url,
            db_max_connections: env_u64("DB_MAX_CONNECTIONS", 16) as u32,
            status_tick_ms: env_u64("STATUS_TICK_MS", 5_000),
            consumption_tick_ms: env_u64("CONSUMPTION_TICK_MS", 3_600_000),
            json_logs: std::env::var("APP_ENV").unwrap_or_default() == "production",
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
