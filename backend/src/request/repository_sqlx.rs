use anyhow::Context;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::request::model::{
    ConsumptionMeasurement, OpeningKind, Request, RequestStatus,
};
use crate::request::repository::RequestRepository;

/// SQLx-backed implementation of RequestRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxRequestRepository {
    pool: AnyPool,
}

impl SqlxRequestRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

const REQUEST_COLUMNS: &str = r#"
  r.request_id, r.device_id, r.lot_id, r.requester_id,
  r.kind, r.requested_volume,
  r.open_at_ms, r.close_at_ms, r.created_at_ms,
  r.status, r.rejection_reason_id, r.rejection_comment
"#;

#[async_trait]
impl RequestRepository for SqlxRequestRepository {
    async fn insert(&self, request: &Request) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
INSERT INTO requests (
  request_id, device_id, lot_id, requester_id,
  kind, requested_volume,
  open_at_ms, close_at_ms, created_at_ms,
  status, rejection_reason_id, rejection_comment
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(request.request_id.to_string())
        .bind(request.device_id.to_string())
        .bind(request.lot_id.to_string())
        .bind(request.requester_id)
        .bind(request.kind.to_string())
        .bind(request.requested_volume)
        .bind(u64_to_i64(request.open_at_ms)?)
        .bind(u64_to_i64(request.close_at_ms)?)
        .bind(u64_to_i64(request.created_at_ms)?)
        .bind(request.status.to_string())
        .bind(request.rejection_reason_id)
        .bind(request.rejection_comment.as_deref())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            // idx_one_pending_per_device: a concurrent Pending row won.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_by_id(&self, request_id: &Uuid) -> anyhow::Result<Option<Request>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests r WHERE r.request_id = ?;"
        );

        let row = sqlx::query(&sql)
            .bind(request_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_request(&r)?)),
            None => Ok(None),
        }
    }

    async fn has_pending_for_device(&self, device_id: &Uuid) -> anyhow::Result<bool> {
        let row = sqlx::query(
            r#"SELECT 1 AS present FROM requests
               WHERE device_id = ? AND status = 'Pending' LIMIT 1;"#,
        )
        .bind(device_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn mark_approved(&self, request_id: &Uuid) -> anyhow::Result<bool> {
        // Guarded single-statement transition; losing the decision race
        // affects zero rows instead of overwriting a prior decision.
        let result = sqlx::query(
            r#"UPDATE requests SET status = 'Approved'
               WHERE request_id = ? AND status = 'Pending';"#,
        )
        .bind(request_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_rejected(
        &self,
        request_id: &Uuid,
        reason_id: i64,
        comment: Option<&str>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE requests
               SET status = 'Rejected', rejection_reason_id = ?, rejection_comment = ?
               WHERE request_id = ? AND status = 'Pending';"#,
        )
        .bind(reason_id)
        .bind(comment)
        .bind(request_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reason_exists(&self, reason_id: i64) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM rejection_reasons WHERE reason_id = ?;")
            .bind(reason_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn approved_for_device(&self, device_id: &Uuid) -> anyhow::Result<Vec<Request>> {
        let sql = format!(
            r#"SELECT {REQUEST_COLUMNS} FROM requests r
               WHERE r.device_id = ? AND r.status = 'Approved'
               ORDER BY r.open_at_ms DESC;"#
        );

        let rows = sqlx::query(&sql)
            .bind(device_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(map_rows(rows))
    }

    async fn approved_expired_unmeasured(&self, now_ms: u64) -> anyhow::Result<Vec<Request>> {
        let sql = format!(
            r#"SELECT {REQUEST_COLUMNS}
               FROM requests r
               JOIN devices d ON d.device_id = r.device_id
               LEFT JOIN consumption_measurements m ON m.request_id = r.request_id
               WHERE r.status = 'Approved'
                 AND d.kind = 'Valve'
                 AND r.close_at_ms < ?
                 AND r.open_at_ms <= r.close_at_ms
                 AND m.request_id IS NULL
               ORDER BY r.close_at_ms ASC;"#
        );

        let rows = sqlx::query(&sql)
            .bind(u64_to_i64(now_ms)?)
            .fetch_all(&self.pool)
            .await?;

        Ok(map_rows(rows))
    }

    async fn insert_measurement(&self, m: &ConsumptionMeasurement) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
INSERT INTO consumption_measurements (measurement_id, request_id, measured_volume, created_at_ms)
VALUES (?, ?, ?, ?)
ON CONFLICT(request_id) DO NOTHING;
"#,
        )
        .bind(m.measurement_id.to_string())
        .bind(m.request_id.to_string())
        .bind(m.measured_volume)
        .bind(u64_to_i64(m.created_at_ms)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/* =========================
Row mapping + conversions
========================= */

fn map_rows(rows: Vec<sqlx::any::AnyRow>) -> Vec<Request> {
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        match row_to_request(&r) {
            Ok(req) => out.push(req),
            Err(e) => {
                // poison-row resilience: skip but don't fail the batch
                tracing::warn!(error = %e, "skipping malformed request row");
            }
        }
    }
    out
}

fn row_to_request(r: &sqlx::any::AnyRow) -> anyhow::Result<Request> {
    let request_id =
        Uuid::parse_str(&r.get::<String, _>("request_id")).context("invalid request_id")?;
    let device_id =
        Uuid::parse_str(&r.get::<String, _>("device_id")).context("invalid device_id")?;
    let lot_id = Uuid::parse_str(&r.get::<String, _>("lot_id")).context("invalid lot_id")?;

    let kind_str: String = r.get("kind");
    let kind = OpeningKind::from_str(&kind_str)?;

    let status_str: String = r.get("status");
    let status = RequestStatus::from_str(&status_str)?;

    Ok(Request {
        request_id,
        device_id,
        lot_id,
        requester_id: r.get::<i64, _>("requester_id"),
        kind,
        requested_volume: r.get::<Option<f64>, _>("requested_volume"),
        open_at_ms: r.get::<i64, _>("open_at_ms") as u64,
        close_at_ms: r.get::<i64, _>("close_at_ms") as u64,
        created_at_ms: r.get::<i64, _>("created_at_ms") as u64,
        status,
        rejection_reason_id: r.get::<Option<i64>, _>("rejection_reason_id"),
        rejection_comment: r.get::<Option<String>, _>("rejection_comment"),
    })
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        anyhow::bail!("timestamp too large for i64: {v}");
    }
    Ok(v as i64)
}
