//! In-process scenario tests for tpx-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test wires a real controller task over the paper broker, calls
//! `routes::build_router` and drives it via `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use tower::ServiceExt; // oneshot

use tpx_broker_paper::{FillMode, PaperBroker};
use tpx_config::TradingConfig;
use tpx_daemon::{auth::SharedSecret, routes, state::AppState, wiring};
use tpx_execution::testkit::RecordingNotifier;
use tpx_execution::{
    event_queue, spawn_controller, BrokerAdapter, Controller, Notification, Notifier,
};

const PASSWORD: &str = "correct horse";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(extra: &[(&str, &str)]) -> TradingConfig {
    let mut pairs: Vec<(String, String)> = vec![
        ("POSTER_PASSWORD".into(), PASSWORD.into()),
        ("TPX_MARGIN_RATE".into(), "0.0025".into()),
    ];
    pairs.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    TradingConfig::from_lookup(move |name| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    })
    .unwrap()
}

/// Router over a fresh controller; returns the notifier for inspection.
fn make_router(cfg: &TradingConfig) -> (axum::Router, RecordingNotifier) {
    let notifier = RecordingNotifier::default();
    let shared: Arc<dyn Notifier> = Arc::new(notifier.clone());
    let controller = wiring::start_controller(cfg, Arc::clone(&shared)).unwrap();
    let st = AppState::new(controller, shared, SharedSecret::new(&cfg.poster_password));
    (routes::build_router(Arc::new(st)), notifier)
}

/// Drive the router with a single request and return (status, body_bytes).
async fn call(router: &axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.clone().oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn place(auth: Option<&str>, body: &str) -> Request<axum::body::Body> {
    let mut b = Request::builder()
        .method("POST")
        .uri("/place")
        .header("content-type", "application/json");
    if let Some(a) = auth {
        b = b.header("authorization", a);
    }
    b.body(axum::body::Body::from(body.to_string())).unwrap()
}

fn signal(msg: &str) -> String {
    serde_json::json!({ "message": msg }).to_string()
}

async fn status_json(router: &axum::Router) -> serde_json::Value {
    let (status, body) = call(router, get("/v1/status")).await;
    assert_eq!(status, StatusCode::OK);
    parse_json(body)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (router, _) = make_router(&config(&[]));
    let (status, body) = call(&router, get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "tpx-daemon");
}

// ---------------------------------------------------------------------------
// GET /?password=
// ---------------------------------------------------------------------------

#[tokio::test]
async fn root_requires_password_and_echoes_broker_time() {
    let (router, _) = make_router(&config(&[]));

    let (status, body) = call(&router, get("/?password=nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());

    let (status, _) = call(&router, get("/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&router, get("/?password=correct%20horse")).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.starts_with("API time is: "), "got {text}");
}

// ---------------------------------------------------------------------------
// POST /place
// ---------------------------------------------------------------------------

#[tokio::test]
async fn place_auth_failure_is_404_without_mutation() {
    let (router, notifier) = make_router(&config(&[]));

    let (status, body) = call(&router, place(None, &signal("b ACME 100 10.05"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());

    let (status, _) = call(&router, place(Some("guess"), &signal("b ACME 100 10.05"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let json = status_json(&router).await;
    assert_eq!(json["state"], "READY_TO_BUY");
    assert_eq!(json["place_pending"], false);
    assert!(json["symbol"].is_null());
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn malformed_body_is_500() {
    let (router, _) = make_router(&config(&[]));

    let (status, _) = call(&router, place(Some(PASSWORD), "{not json")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, body) = call(&router, place(Some(PASSWORD), &signal("b ACME lots 10.05"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(parse_json(body)["outcome"], "error");

    assert_eq!(status_json(&router).await["state"], "READY_TO_BUY");
}

#[tokio::test]
async fn accepted_cycle_then_daily_cap() {
    let (router, notifier) = make_router(&config(&[("TPX_DAILY_WIN_CAP", "1")]));

    let (status, body) = call(&router, place(Some(PASSWORD), &signal("b ACME 100 10.05"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["outcome"], "accepted");

    // The paper broker fills the take-profit right away; wait for the win.
    let mut won = false;
    for _ in 0..100 {
        let json = status_json(&router).await;
        if json["win_count"] == 1 && json["state"] == "READY_TO_BUY" {
            won = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(won, "take-profit never completed");
    assert!(matches!(
        notifier.sent().first(),
        Some(Notification::Win { symbol, .. }) if symbol == "ACME"
    ));

    let (status, _) = call(&router, place(Some(PASSWORD), &signal("b ACME 100 10.05"))).await;
    assert_eq!(status, StatusCode::RESET_CONTENT);
}

#[tokio::test]
async fn non_buy_message_is_relayed() {
    let (router, notifier) = make_router(&config(&[]));

    let (status, body) = call(&router, place(Some(PASSWORD), &signal("running late, back at 3"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["outcome"], "relayed");
    assert_eq!(
        notifier.sent(),
        vec![Notification::Relay {
            message: "running late, back at 3".into()
        }]
    );
    assert_eq!(status_json(&router).await["state"], "READY_TO_BUY");
}

#[tokio::test(start_paused = true)]
async fn unfilled_buy_is_500_aborted() {
    let cfg = config(&[("TPX_PAPER_FILL", "never"), ("TPX_BUY_TIMEOUT_SECS", "7")]);
    let (router, _) = make_router(&cfg);

    let (status, body) = call(&router, place(Some(PASSWORD), &signal("b ACME 100 10.05"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(parse_json(body)["outcome"], "aborted");
    assert_eq!(status_json(&router).await["state"], "READY_TO_BUY");
}

#[tokio::test]
async fn existing_position_is_202() {
    let cfg = config(&[]);
    let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());

    let (queue, inbox) = event_queue();
    let mut broker = PaperBroker::new(queue.broker_sink(), FillMode::Immediate);
    broker.connect().unwrap();
    broker.set_position("ACME", 100, Decimal::new(1005, 2));
    let controller = Controller::new(
        wiring::controller_config(&cfg),
        broker,
        queue.scheduler(),
        Arc::clone(&notifier),
    );
    let handle = spawn_controller(controller, queue, inbox);
    let router = routes::build_router(Arc::new(AppState::new(
        handle,
        notifier,
        SharedSecret::new(PASSWORD),
    )));

    let (status, body) = call(&router, place(Some(PASSWORD), &signal("b ACME 100 10.05"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let json = parse_json(body);
    assert_eq!(json["outcome"], "rejected_positions_exist");
    assert_eq!(json["message"], "Positions already exist");
}
