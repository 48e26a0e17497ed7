use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Devices (valves, meters). Provisioning writes these rows; the
    // reconciler only ever touches operating_state / last_transition_ms.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS devices (
  device_id TEXT PRIMARY KEY,
  lot_id TEXT NOT NULL,
  kind TEXT NOT NULL,
  operating_state TEXT NOT NULL,
  last_transition_ms BIGINT,
  active INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0,1))
);
"#,
    )
    .execute(pool)
    .await?;

    // Water-access requests. Status is TEXT ('Pending' | 'Approved' |
    // 'Rejected'); rows are never deleted, decided rows stay for audit
    // and consumption attribution.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS requests (
  request_id TEXT PRIMARY KEY,
  device_id TEXT NOT NULL,
  lot_id TEXT NOT NULL,
  requester_id BIGINT NOT NULL,
  kind TEXT NOT NULL,
  requested_volume REAL,
  open_at_ms BIGINT NOT NULL,
  close_at_ms BIGINT NOT NULL,
  created_at_ms BIGINT NOT NULL,
  status TEXT NOT NULL,
  rejection_reason_id BIGINT,
  rejection_comment TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    // Rejection reason lookup. Contents are owned by the surrounding
    // application; reject() only validates the id exists.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS rejection_reasons (
  reason_id BIGINT PRIMARY KEY,
  label TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Metered volumes reported by meter-kind devices.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS meter_readings (
  reading_id TEXT PRIMARY KEY,
  device_id TEXT NOT NULL,
  volume REAL NOT NULL,
  recorded_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // One consumption record per request, append-only. The UNIQUE
    // constraint is what makes the consumption job idempotent.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS consumption_measurements (
  measurement_id TEXT PRIMARY KEY,
  request_id TEXT NOT NULL UNIQUE,
  measured_volume REAL NOT NULL,
  created_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_requests_device ON requests(device_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status);"#)
        .execute(pool)
        .await?;

    // Durable form of the at-most-one-pending-per-device rule. The
    // lifecycle checks before inserting, but two concurrent submits can
    // both pass that check; this index makes the second insert fail.
    sqlx::query(
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_one_pending_per_device
           ON requests(device_id) WHERE status = 'Pending';"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_readings_device_time
           ON meter_readings(device_id, recorded_at_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
