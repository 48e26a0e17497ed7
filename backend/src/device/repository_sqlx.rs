use anyhow::Context;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::device::model::{Device, DeviceKind, OperatingState};
use crate::device::repository::DeviceRepository;

/// SQLx-backed implementation of DeviceRepository.
pub struct SqlxDeviceRepository {
    pool: AnyPool,
}

impl SqlxDeviceRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

const DEVICE_COLUMNS: &str = r#"
  device_id, lot_id, kind, operating_state, last_transition_ms,
  CASE WHEN active THEN 1 ELSE 0 END AS active_i64
"#;

#[async_trait]
impl DeviceRepository for SqlxDeviceRepository {
    async fn fetch_by_id(&self, device_id: &Uuid) -> anyhow::Result<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = ?;");

        let row = sqlx::query(&sql)
            .bind(device_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_device(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_active_valves(&self) -> anyhow::Result<Vec<Device>> {
        let sql = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE kind = 'Valve' AND active = TRUE;"
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_device(&r) {
                Ok(d) => out.push(d),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the tick
                    tracing::warn!(error = %e, "skipping malformed device row");
                }
            }
        }

        Ok(out)
    }

    async fn meters_for_lot(&self, lot_id: &Uuid) -> anyhow::Result<Vec<Device>> {
        let sql = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices
             WHERE lot_id = ? AND kind = 'Meter' AND active = TRUE;"
        );

        let rows = sqlx::query(&sql)
            .bind(lot_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_device(&r) {
                Ok(d) => out.push(d),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed device row");
                }
            }
        }

        Ok(out)
    }

    async fn set_operating_state(
        &self,
        device_id: &Uuid,
        state: OperatingState,
        now_ms: u64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"UPDATE devices SET operating_state = ?, last_transition_ms = ?
               WHERE device_id = ?;"#,
        )
        .bind(state.to_string())
        .bind(u64_to_i64(now_ms)?)
        .bind(device_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn readings_total(
        &self,
        device_id: &Uuid,
        from_ms: u64,
        to_ms: u64,
    ) -> anyhow::Result<f64> {
        // COALESCE keeps "no readings" as 0.0 instead of NULL.
        let row = sqlx::query(
            r#"SELECT COALESCE(SUM(volume), 0.0) AS total
               FROM meter_readings
               WHERE device_id = ? AND recorded_at_ms BETWEEN ? AND ?;"#,
        )
        .bind(device_id.to_string())
        .bind(u64_to_i64(from_ms)?)
        .bind(u64_to_i64(to_ms)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<f64, _>("total"))
    }
}

fn row_to_device(r: &sqlx::any::AnyRow) -> anyhow::Result<Device> {
    let device_id =
        Uuid::parse_str(&r.get::<String, _>("device_id")).context("invalid device_id")?;
    let lot_id = Uuid::parse_str(&r.get::<String, _>("lot_id")).context("invalid lot_id")?;

    let kind_str: String = r.get("kind");
    let kind = DeviceKind::from_str(&kind_str)?;

    let state_str: String = r.get("operating_state");
    let operating_state = OperatingState::from_str(&state_str)?;

    let active_i64: i64 = r.get("active_i64");

    Ok(Device {
        device_id,
        lot_id,
        kind,
        operating_state,
        last_transition_ms: r
            .get::<Option<i64>, _>("last_transition_ms")
            .map(|v| v as u64),
        active: active_i64 != 0,
    })
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        anyhow::bail!("timestamp too large for i64: {v}");
    }
    Ok(v as i64)
}
