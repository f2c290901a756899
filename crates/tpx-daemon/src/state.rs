//! Shared runtime state for tpx-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum. Trading state itself is owned by the
//! controller task; the daemon only holds a handle to it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use tpx_execution::{ControllerHandle, ControllerSnapshot, Notifier};

use crate::auth::SharedSecret;

/// How long `GET /` waits for the broker clock.
pub const TIME_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// BusMsg (SSE event bus payload)
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Returned by GET /v1/status and carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub state: String,
    pub win_count: u32,
    pub daily_win_cap: u32,
    pub symbol: Option<String>,
    pub active_order_id: Option<i64>,
    pub place_pending: bool,
    pub timeout_armed: bool,
}

impl StatusSnapshot {
    pub fn from_controller(snap: &ControllerSnapshot) -> Self {
        Self {
            daemon_uptime_secs: uptime_secs(),
            state: snap.state.to_string(),
            win_count: snap.win_count,
            daily_win_cap: snap.daily_win_cap,
            symbol: snap.sequence.as_ref().map(|s| s.symbol.clone()),
            active_order_id: snap.active_order.as_ref().map(|a| a.order_id),
            place_pending: snap.place_pending,
            timeout_armed: snap.timeout_armed,
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub controller: ControllerHandle,
    /// Sink for relayed free-form messages.
    pub notifier: Arc<dyn Notifier>,
    pub secret: SharedSecret,
}

impl AppState {
    pub fn new(controller: ControllerHandle, notifier: Arc<dyn Notifier>, secret: SharedSecret) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "tpx-daemon".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            controller,
            notifier,
            secret,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits heartbeat messages on `bus`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, every: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            let _ = bus.send(BusMsg::Heartbeat {
                ts_millis: chrono::Utc::now().timestamp_millis(),
            });
        }
    });
}

/// Republish every controller snapshot change on `bus`.
pub fn spawn_status_forwarder(controller: ControllerHandle, bus: broadcast::Sender<BusMsg>) {
    let mut rx = controller.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snap = StatusSnapshot::from_controller(&rx.borrow_and_update());
            // No subscribers is fine.
            if bus.send(BusMsg::Status(snap)).is_err() {
                debug!("status change with no stream subscribers");
            }
        }
    });
}
