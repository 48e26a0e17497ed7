use std::sync::Arc;

use sqlx::AnyPool;
use sqlx::Row;
use sqlx::any::AnyPoolOptions;
use uuid::Uuid;

use backend::{
    db::schema,
    device::model::{DeviceKind, OperatingState},
    device::repository_sqlx::SqlxDeviceRepository,
    metrics::counters::Counters,
    reconciler::StatusReconciler,
    relay::{Command, CommandSink, RelayError, SingleSlotRelay},
    request::lifecycle::RequestLifecycle,
    request::model::{NewRequest, OpeningKind, RequestStatus},
    request::repository_sqlx::SqlxRequestRepository,
};

const T0: u64 = 1_000_000;
const OPEN: u64 = T0 + 3_600_000; // +1h
const CLOSE: u64 = T0 + 7_200_000; // +2h

// -----------------------
// DB + helpers
// -----------------------

async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");

    schema::migrate(&pool).await.expect("run migrations");

    pool
}

async fn seed_device(pool: &AnyPool, device_id: Uuid, lot_id: Uuid, state: OperatingState) {
    sqlx::query(
        "INSERT INTO devices (device_id, lot_id, kind, operating_state, last_transition_ms, active)
         VALUES (?, ?, ?, ?, NULL, 1);",
    )
    .bind(device_id.to_string())
    .bind(lot_id.to_string())
    .bind(DeviceKind::Valve.to_string())
    .bind(state.to_string())
    .execute(pool)
    .await
    .expect("seed device");
}

async fn seed_request(
    pool: &AnyPool,
    device_id: Uuid,
    lot_id: Uuid,
    open_at_ms: u64,
    close_at_ms: u64,
    status: RequestStatus,
) -> Uuid {
    let request_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO requests (request_id, device_id, lot_id, requester_id, kind,
                               requested_volume, open_at_ms, close_at_ms, created_at_ms,
                               status, rejection_reason_id, rejection_comment)
         VALUES (?, ?, ?, 1, 'Scheduled', NULL, ?, ?, ?, ?, NULL, NULL);",
    )
    .bind(request_id.to_string())
    .bind(device_id.to_string())
    .bind(lot_id.to_string())
    .bind(open_at_ms as i64)
    .bind(close_at_ms as i64)
    .bind(T0 as i64)
    .bind(status.to_string())
    .execute(pool)
    .await
    .expect("seed request");
    request_id
}

async fn device_state(pool: &AnyPool, device_id: Uuid) -> OperatingState {
    let row = sqlx::query("SELECT operating_state FROM devices WHERE device_id = ?;")
        .bind(device_id.to_string())
        .fetch_one(pool)
        .await
        .expect("fetch device state");
    row.get::<String, _>("operating_state").parse().expect("valid state")
}

struct Harness {
    pool: AnyPool,
    relay: Arc<SingleSlotRelay>,
    reconciler: StatusReconciler,
    lifecycle: RequestLifecycle,
}

fn mk_harness(pool: AnyPool) -> Harness {
    let requests = Arc::new(SqlxRequestRepository::new(pool.clone()));
    let devices = Arc::new(SqlxDeviceRepository::new(pool.clone()));
    let relay = Arc::new(SingleSlotRelay::new());

    let reconciler = StatusReconciler::new(
        requests.clone(),
        devices.clone(),
        relay.clone(),
        Counters::default(),
    );
    let lifecycle = RequestLifecycle::with_log_notifier(requests, devices);

    Harness {
        pool,
        relay,
        reconciler,
        lifecycle,
    }
}

// -----------------------
// tests
// -----------------------

#[tokio::test]
async fn device_without_approved_request_is_forced_disabled() {
    let pool = setup_db().await;
    let (device_id, lot_id) = (Uuid::new_v4(), Uuid::new_v4());
    // Stale Active state left over from a deleted deployment, say.
    seed_device(&pool, device_id, lot_id, OperatingState::Active).await;

    let h = mk_harness(pool);
    let summary = h.reconciler.tick(T0).await.expect("tick");

    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.transitions, 1);
    assert_eq!(summary.commands, 0);
    assert_eq!(device_state(&h.pool, device_id).await, OperatingState::Disabled);
    assert_eq!(h.relay.drain_command(), None);
}

#[tokio::test]
async fn pending_and_rejected_requests_never_drive_state() {
    let pool = setup_db().await;
    let (device_id, lot_id) = (Uuid::new_v4(), Uuid::new_v4());
    seed_device(&pool, device_id, lot_id, OperatingState::Disabled).await;
    seed_request(&pool, device_id, lot_id, T0, CLOSE, RequestStatus::Pending).await;
    seed_request(&pool, device_id, lot_id, T0, CLOSE, RequestStatus::Rejected).await;

    let h = mk_harness(pool);
    let summary = h.reconciler.tick(T0 + 1).await.expect("tick");

    assert_eq!(summary.transitions, 0);
    assert_eq!(device_state(&h.pool, device_id).await, OperatingState::Disabled);
    assert_eq!(h.relay.drain_command(), None);
}

#[tokio::test]
async fn end_to_end_submit_approve_open_close() {
    let pool = setup_db().await;
    let (device_id, lot_id) = (Uuid::new_v4(), Uuid::new_v4());
    seed_device(&pool, device_id, lot_id, OperatingState::Disabled).await;

    let h = mk_harness(pool);

    // Submit at T0 a window [T0+1h, T0+2h] and approve it.
    let request = h
        .lifecycle
        .submit(
            NewRequest {
                device_id,
                lot_id,
                requester_id: 9,
                kind: OpeningKind::Scheduled,
                requested_volume: None,
                open_at_ms: OPEN,
                close_at_ms: CLOSE,
            },
            T0,
        )
        .await
        .expect("submit");
    h.lifecycle.approve(request.request_id).await.expect("approve");

    // Before the window opens: Waiting, no command.
    let s = h.reconciler.tick(T0 + 10_000).await.expect("tick waiting");
    assert_eq!(s.transitions, 1);
    assert_eq!(s.commands, 0);
    assert_eq!(device_state(&h.pool, device_id).await, OperatingState::Waiting);
    assert_eq!(h.relay.drain_command(), None);

    // Window opens: Active, exactly one Open command.
    let s = h.reconciler.tick(OPEN).await.expect("tick open");
    assert_eq!(s.transitions, 1);
    assert_eq!(s.commands, 1);
    assert_eq!(device_state(&h.pool, device_id).await, OperatingState::Active);
    assert_eq!(h.relay.drain_command(), Some(Command::Open));

    // Second tick inside the window: nothing changes, nothing re-sent.
    let s = h.reconciler.tick(OPEN + 60_000).await.expect("tick idempotent");
    assert_eq!(s.transitions, 0);
    assert_eq!(s.commands, 0);
    assert_eq!(h.relay.drain_command(), None);

    // Window expires: Closed, exactly one Close command.
    let s = h.reconciler.tick(CLOSE + 1).await.expect("tick close");
    assert_eq!(s.transitions, 1);
    assert_eq!(s.commands, 1);
    assert_eq!(device_state(&h.pool, device_id).await, OperatingState::Closed);
    assert_eq!(h.relay.drain_command(), Some(Command::Close));

    // Long after: still Closed, silent.
    let s = h.reconciler.tick(CLOSE + 3_600_000).await.expect("tick after");
    assert_eq!(s.transitions, 0);
    assert_eq!(s.commands, 0);
    assert_eq!(h.relay.drain_command(), None);
}

#[tokio::test]
async fn window_missed_entirely_closes_without_actuating() {
    // Approval landed, but every tick ran after close_at: the valve was
    // never opened, so expiry must not emit a Close.
    let pool = setup_db().await;
    let (device_id, lot_id) = (Uuid::new_v4(), Uuid::new_v4());
    seed_device(&pool, device_id, lot_id, OperatingState::Waiting).await;
    seed_request(&pool, device_id, lot_id, OPEN, CLOSE, RequestStatus::Approved).await;

    let h = mk_harness(pool);
    let s = h.reconciler.tick(CLOSE + 5_000).await.expect("tick");

    assert_eq!(s.transitions, 1);
    assert_eq!(s.commands, 0);
    assert_eq!(device_state(&h.pool, device_id).await, OperatingState::Closed);
    assert_eq!(h.relay.drain_command(), None);
}

#[tokio::test]
async fn malformed_approved_window_is_ignored_and_never_commands() {
    let pool = setup_db().await;
    let (device_id, lot_id) = (Uuid::new_v4(), Uuid::new_v4());
    seed_device(&pool, device_id, lot_id, OperatingState::Disabled).await;
    // open after close, approved directly in the store
    seed_request(&pool, device_id, lot_id, CLOSE, OPEN, RequestStatus::Approved).await;

    let h = mk_harness(pool);
    let s = h.reconciler.tick(OPEN + 10).await.expect("tick");

    assert_eq!(s.malformed_windows, 1);
    assert_eq!(s.transitions, 0);
    assert_eq!(s.commands, 0);
    assert_eq!(device_state(&h.pool, device_id).await, OperatingState::Disabled);
    assert_eq!(h.relay.drain_command(), None);
}

#[tokio::test]
async fn a_new_approved_window_reopens_after_close() {
    let pool = setup_db().await;
    let (device_id, lot_id) = (Uuid::new_v4(), Uuid::new_v4());
    seed_device(&pool, device_id, lot_id, OperatingState::Closed).await;
    seed_request(&pool, device_id, lot_id, OPEN, CLOSE, RequestStatus::Approved).await;
    // Later window approved after the first one expired.
    let open2 = CLOSE + 100_000;
    let close2 = open2 + 50_000;
    seed_request(&pool, device_id, lot_id, open2, close2, RequestStatus::Approved).await;

    let h = mk_harness(pool);

    let s = h.reconciler.tick(CLOSE + 10_000).await.expect("tick waiting");
    assert_eq!(device_state(&h.pool, device_id).await, OperatingState::Waiting);
    assert_eq!(s.commands, 0);

    let s = h.reconciler.tick(open2 + 1).await.expect("tick reopen");
    assert_eq!(device_state(&h.pool, device_id).await, OperatingState::Active);
    assert_eq!(s.commands, 1);
    assert_eq!(h.relay.drain_command(), Some(Command::Open));
}

#[tokio::test]
async fn per_device_failure_does_not_starve_other_devices() {
    let pool = setup_db().await;
    let lot_id = Uuid::new_v4();
    let (dev_ok, dev_poison) = (Uuid::new_v4(), Uuid::new_v4());
    seed_device(&pool, dev_ok, lot_id, OperatingState::Disabled).await;
    seed_device(&pool, dev_poison, lot_id, OperatingState::Disabled).await;

    seed_request(&pool, dev_ok, lot_id, T0, CLOSE, RequestStatus::Approved).await;
    // Poison row: unparseable kind on the poison device's request makes
    // row mapping skip it, leaving the device Disabled but harmless.
    sqlx::query(
        "INSERT INTO requests (request_id, device_id, lot_id, requester_id, kind,
                               requested_volume, open_at_ms, close_at_ms, created_at_ms,
                               status, rejection_reason_id, rejection_comment)
         VALUES (?, ?, ?, 1, 'NotAKind', NULL, ?, ?, ?, 'Approved', NULL, NULL);",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(dev_poison.to_string())
    .bind(lot_id.to_string())
    .bind(T0 as i64)
    .bind(CLOSE as i64)
    .bind(T0 as i64)
    .execute(&pool)
    .await
    .expect("seed poison request");

    let h = mk_harness(pool);
    let s = h.reconciler.tick(T0 + 1).await.expect("tick");

    assert_eq!(s.evaluated, 2);
    assert_eq!(device_state(&h.pool, dev_ok).await, OperatingState::Active);
    assert_eq!(h.relay.drain_command(), Some(Command::Open));
}

// -----------------------
// relay failure
// -----------------------

/// Sink that refuses every write, simulating a dead actuator link.
struct DeadRelay;

impl CommandSink for DeadRelay {
    fn set_command(&self, _cmd: Command) -> Result<(), RelayError> {
        Err(RelayError::Unavailable("link down".into()))
    }

    fn drain_command(&self) -> Option<Command> {
        None
    }
}

#[tokio::test]
async fn relay_failure_defers_the_transition_for_retry() {
    let pool = setup_db().await;
    let (device_id, lot_id) = (Uuid::new_v4(), Uuid::new_v4());
    seed_device(&pool, device_id, lot_id, OperatingState::Waiting).await;
    seed_request(&pool, device_id, lot_id, T0, CLOSE, RequestStatus::Approved).await;

    let requests = Arc::new(SqlxRequestRepository::new(pool.clone()));
    let devices = Arc::new(SqlxDeviceRepository::new(pool.clone()));

    let broken = StatusReconciler::new(
        requests.clone(),
        devices.clone(),
        Arc::new(DeadRelay),
        Counters::default(),
    );

    // Command push fails: state must stay Waiting so the transition is
    // re-derived next tick.
    let s = broken.tick(T0 + 1).await.expect("tick with dead relay");
    assert_eq!(s.deferred, 1);
    assert_eq!(s.transitions, 0);
    assert_eq!(device_state(&pool, device_id).await, OperatingState::Waiting);

    // Relay comes back: same tick input now completes the transition.
    let relay = Arc::new(SingleSlotRelay::new());
    let healthy = StatusReconciler::new(requests, devices, relay.clone(), Counters::default());

    let s = healthy.tick(T0 + 2).await.expect("tick with healthy relay");
    assert_eq!(s.transitions, 1);
    assert_eq!(s.commands, 1);
    assert_eq!(device_state(&pool, device_id).await, OperatingState::Active);
    assert_eq!(relay.drain_command(), Some(Command::Open));
}
