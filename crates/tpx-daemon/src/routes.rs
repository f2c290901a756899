//! Axum router and all HTTP handlers for tpx-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Scenario tests in `tests/` compose the bare router.
//!
//! Control endpoints answer auth failures with a bare 404 and touch no state.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use tpx_execution::{is_buy_signal, Notification, PlaceOutcome};

use crate::{
    api_types::{HealthResponse, PasswordQuery, PlaceRequest, PlaceResponse},
    state::{AppState, BusMsg, StatusSnapshot, TIME_QUERY_TIMEOUT},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(broker_time))
        .route("/place", post(place))
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

/// HTTP status for a final place outcome.
pub fn outcome_status(outcome: &PlaceOutcome) -> StatusCode {
    match outcome {
        PlaceOutcome::Accepted => StatusCode::OK,
        PlaceOutcome::RejectedOpenOrdersPending
        | PlaceOutcome::RejectedPositionsExist
        | PlaceOutcome::RejectedCycleInProgress => StatusCode::ACCEPTED,
        PlaceOutcome::RejectedDailyCapReached => StatusCode::RESET_CONTENT,
        PlaceOutcome::Aborted | PlaceOutcome::Error(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ---------------------------------------------------------------------------
// GET /?password=
// ---------------------------------------------------------------------------

pub(crate) async fn broker_time(
    State(st): State<Arc<AppState>>,
    Query(q): Query<PasswordQuery>,
) -> Response {
    if !st.secret.verify(q.password.as_deref().unwrap_or("")) {
        return StatusCode::NOT_FOUND.into_response();
    }

    match st.controller.current_time(TIME_QUERY_TIMEOUT).await {
        Ok(t) => (StatusCode::OK, format!("API time is: {t}")).into_response(),
        Err(e) => {
            warn!(error = %e, "broker time query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Broker time unavailable").into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// POST /place
// ---------------------------------------------------------------------------

/// Submit a buy signal (`{"message": "b SYMBOL QTY PRICE"}`) and wait for the
/// cycle's outcome. Any other message text is relayed to the notifier.
pub(crate) async fn place(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !st.secret.verify(token) {
        return StatusCode::NOT_FOUND.into_response();
    }

    // Malformed bodies answer 500.
    let req: PlaceRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed place body");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PlaceResponse::malformed(format!("malformed body: {e}"))),
            )
                .into_response();
        }
    };

    if !is_buy_signal(&req.message) {
        info!("relaying non-trade message");
        st.notifier.notify(Notification::Relay {
            message: req.message.clone(),
        });
        let _ = st.bus.send(BusMsg::LogLine {
            level: "INFO".to_string(),
            msg: "message relayed".to_string(),
        });
        return (StatusCode::OK, Json(PlaceResponse::relayed())).into_response();
    }

    let outcome = st.controller.place(req.message).await;
    info!(?outcome, "place answered");
    (outcome_status(&outcome), Json(PlaceResponse::from_outcome(&outcome))).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.clone(),
            version: st.build.version.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = match st.controller.fresh_snapshot().await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "controller unavailable; serving last snapshot");
            st.controller.latest()
        }
    };
    let status = StatusSnapshot::from_controller(&snap);

    let _ = st.bus.send(BusMsg::Status(status.clone()));
    (StatusCode::OK, Json(status))
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
