//! Scenario: full take-profit cycle.
//!
//! # Invariant under test
//!
//! A clean account walks READY_TO_BUY -> BUYING -> READY_TO_SELL -> SELLING
//! -> READY_TO_BUY. The caller is answered `Accepted` on the BUY fill, the
//! SELL is priced off the actual average fill price, and a win is counted
//! exactly once per SELL fill.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::oneshot;

use tpx_execution::testkit::{RecordingBroker, RecordingNotifier, RecordingScheduler};
use tpx_execution::{
    BrokerCommand, BrokerEvent, Controller, ControllerConfig, ControllerEvent, Notification,
    OrderStatusUpdate, PlaceOutcome, Side, TimeoutKey, TradingState, VenuePolicy,
};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

type TestController = Controller<RecordingBroker, RecordingScheduler, RecordingNotifier>;

fn controller(cap: u32) -> TestController {
    let cfg = ControllerConfig {
        margin_rate: dec!(0.0025),
        daily_win_cap: cap,
        buy_timeout: Duration::from_secs(10),
        account_id: None,
        venues: VenuePolicy::default(),
    };
    Controller::new(
        cfg,
        RecordingBroker::default(),
        RecordingScheduler::default(),
        RecordingNotifier::default(),
    )
}

fn place(c: &mut TestController, msg: &str) -> oneshot::Receiver<PlaceOutcome> {
    let (reply, rx) = oneshot::channel();
    c.handle(ControllerEvent::Place {
        message: msg.to_string(),
        reply,
    });
    rx
}

fn feed(c: &mut TestController, ev: BrokerEvent) {
    c.handle(ControllerEvent::Broker(ev));
}

fn status(order_id: i64, status: &str, filled: i64, remaining: i64, avg: Decimal) -> BrokerEvent {
    BrokerEvent::OrderStatus(OrderStatusUpdate {
        order_id,
        status: status.to_string(),
        filled,
        remaining,
        avg_fill_price: avg,
    })
}

/// Drive a fresh request through both scans and the BUY submission.
fn buy_submitted(c: &mut TestController, msg: &str, id: i64) -> oneshot::Receiver<PlaceOutcome> {
    let rx = place(c, msg);
    feed(c, BrokerEvent::OpenOrderEnd);
    feed(c, BrokerEvent::PositionEnd);
    feed(c, BrokerEvent::NextValidId(id));
    rx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn acme_cycle_end_to_end() {
    let mut c = controller(2);
    let mut rx = place(&mut c, "b ACME 100 10.05");
    assert_eq!(c.broker().commands, vec![BrokerCommand::RequestOpenOrders]);

    feed(&mut c, BrokerEvent::OpenOrderEnd);
    assert_eq!(
        c.broker().commands.last(),
        Some(&BrokerCommand::RequestPositions)
    );
    assert_eq!(c.state(), TradingState::ReadyToBuy);

    feed(&mut c, BrokerEvent::PositionEnd);
    assert_eq!(c.state(), TradingState::Buying);
    assert_eq!(c.broker().commands.last(), Some(&BrokerCommand::RequestIds(1)));

    feed(&mut c, BrokerEvent::NextValidId(1));
    let placed = c.broker().placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].0, 1);
    assert_eq!(placed[0].1.action, Side::Buy);
    assert_eq!(placed[0].1.quantity, 100);
    assert_eq!(placed[0].1.limit_price, dec!(10.05));

    feed(&mut c, status(1, "Submitted", 0, 100, Decimal::ZERO));
    assert!(rx.try_recv().is_err(), "not answered before the fill");

    feed(&mut c, status(1, "Filled", 100, 0, dec!(10.05)));
    assert_eq!(rx.try_recv(), Ok(PlaceOutcome::Accepted));
    assert_eq!(c.state(), TradingState::ReadyToSell);
    assert!(c.live_timeout().is_none(), "fill disarms the BUY deadline");

    feed(&mut c, BrokerEvent::NextValidId(2));
    assert_eq!(c.state(), TradingState::Selling);
    let placed = c.broker().placed();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[1].0, 2);
    assert_eq!(placed[1].1.action, Side::Sell);
    assert_eq!(placed[1].1.quantity, 100);
    assert_eq!(placed[1].1.limit_price, dec!(10.08));

    feed(&mut c, status(2, "Filled", 100, 0, dec!(10.08)));
    assert_eq!(c.state(), TradingState::ReadyToBuy);
    assert_eq!(c.win_count(), 1);
    assert_eq!(
        c.notifier().sent(),
        vec![Notification::Win {
            symbol: "ACME".into(),
            quantity: 100,
            bought_at: dec!(10.05),
            sold_at: dec!(10.08),
            win_count: 1,
            daily_win_cap: 2,
        }]
    );
}

#[test]
fn sell_target_uses_actual_fill_price() {
    let mut c = controller(1);
    let mut rx = buy_submitted(&mut c, "b ACME 100 10.05", 1);
    feed(&mut c, status(1, "Filled", 100, 0, dec!(10.04)));
    assert_eq!(rx.try_recv(), Ok(PlaceOutcome::Accepted));
    assert_eq!(c.sequence().map(|s| s.price), Some(dec!(10.04)));

    feed(&mut c, BrokerEvent::NextValidId(2));
    // 10.04 * 1.0025 = 10.0651 -> 10.07
    assert_eq!(c.broker().placed()[1].1.limit_price, dec!(10.07));
}

#[test]
fn duplicate_terminal_status_counts_one_win() {
    let mut c = controller(5);
    let _rx = buy_submitted(&mut c, "b ACME 100 10.05", 1);
    feed(&mut c, status(1, "Filled", 100, 0, dec!(10.05)));
    feed(&mut c, status(1, "Filled", 100, 0, dec!(10.05)));
    let id_requests = c
        .broker()
        .commands
        .iter()
        .filter(|cmd| **cmd == BrokerCommand::RequestIds(1))
        .count();
    assert_eq!(id_requests, 2, "one for the BUY, one for the SELL");

    feed(&mut c, BrokerEvent::NextValidId(2));
    feed(&mut c, status(2, "Filled", 100, 0, dec!(10.08)));
    feed(&mut c, status(2, "Filled", 100, 0, dec!(10.08)));
    assert_eq!(c.win_count(), 1);
    assert_eq!(c.notifier().sent().len(), 1);
}

#[test]
fn daily_cap_blocks_the_next_cycle() {
    let mut c = controller(1);
    let _rx = buy_submitted(&mut c, "b ACME 100 10.05", 1);
    feed(&mut c, status(1, "Filled", 100, 0, dec!(10.05)));
    feed(&mut c, BrokerEvent::NextValidId(2));
    feed(&mut c, status(2, "Filled", 100, 0, dec!(10.08)));

    assert!(c
        .notifier()
        .sent()
        .contains(&Notification::DailyCapReached { win_count: 1 }));

    let before = c.broker().commands.len();
    let mut rx = place(&mut c, "b ACME 100 10.05");
    assert_eq!(rx.try_recv(), Ok(PlaceOutcome::RejectedDailyCapReached));
    assert_eq!(c.broker().commands.len(), before, "no broker traffic");
    assert_eq!(c.state(), TradingState::ReadyToBuy);
}

#[test]
fn partial_fill_then_cancel_sells_the_filled_quantity() {
    let mut c = controller(1);
    let mut rx = buy_submitted(&mut c, "b ACME 100 10.05", 1);
    feed(&mut c, status(1, "Submitted", 40, 60, dec!(10.05)));
    assert!(rx.try_recv().is_err());

    feed(&mut c, status(1, "Cancelled", 40, 60, dec!(10.05)));
    assert_eq!(rx.try_recv(), Ok(PlaceOutcome::Accepted));
    assert_eq!(c.state(), TradingState::ReadyToSell);

    feed(&mut c, BrokerEvent::NextValidId(2));
    let placed = c.broker().placed();
    assert_eq!(placed[1].1.action, Side::Sell);
    assert_eq!(placed[1].1.quantity, 40);
}

#[test]
fn sell_cancelled_resets_without_a_win() {
    let mut c = controller(1);
    let _rx = buy_submitted(&mut c, "b ACME 100 10.05", 1);
    feed(&mut c, status(1, "Filled", 100, 0, dec!(10.05)));
    feed(&mut c, BrokerEvent::NextValidId(2));

    feed(&mut c, status(2, "PendingCancel", 0, 100, Decimal::ZERO));
    assert_eq!(c.state(), TradingState::Selling, "pending cancel is not final");

    feed(&mut c, status(2, "Cancelled", 0, 100, Decimal::ZERO));
    assert_eq!(c.state(), TradingState::ReadyToBuy);
    assert_eq!(c.win_count(), 0);
    assert_eq!(
        c.notifier().sent(),
        vec![Notification::SellCancelled {
            symbol: "ACME".into(),
            order_id: 2,
            filled: 0,
        }]
    );
}

fn id_requests(c: &TestController) -> usize {
    c.broker()
        .commands
        .iter()
        .filter(|cmd| matches!(cmd, BrokerCommand::RequestIds(_)))
        .count()
}

#[test]
fn sell_placement_failure_retries_with_a_fresh_order_id() {
    let mut c = controller(1);
    let _rx = buy_submitted(&mut c, "b ACME 100 10.05", 1);
    feed(&mut c, status(1, "Filled", 100, 0, dec!(10.05)));
    assert_eq!(id_requests(&c), 2);

    c.broker_mut().fail_place = true;
    feed(&mut c, BrokerEvent::NextValidId(2));
    assert_eq!(c.state(), TradingState::ReadyToSell);
    assert!(matches!(
        c.notifier().sent().as_slice(),
        [Notification::SellNotPlaced { symbol, .. }] if symbol == "ACME"
    ));

    // The back-off deadline is the only thing that moves the cycle on.
    let retry = c.live_timeout().expect("retry deadline armed");
    assert_eq!(retry.key, TimeoutKey::SellRetry);
    assert_eq!(c.scheduler().scheduled.last(), Some(&(retry, Duration::from_secs(10))));
    assert_eq!(id_requests(&c), 2, "no id request before the deadline");

    c.broker_mut().fail_place = false;
    c.handle(ControllerEvent::TimeoutFired(retry));
    assert_eq!(id_requests(&c), 3);
    assert_eq!(c.broker().commands.last(), Some(&BrokerCommand::RequestIds(1)));

    feed(&mut c, BrokerEvent::NextValidId(3));
    assert_eq!(c.state(), TradingState::Selling);
    assert_eq!(c.active_order().map(|a| a.order_id), Some(3));
    assert!(c.live_timeout().is_none());

    feed(&mut c, status(3, "Filled", 100, 0, dec!(10.08)));
    assert_eq!(c.win_count(), 1);
}

#[test]
fn failed_sell_id_request_is_retried() {
    let mut c = controller(1);
    let mut rx = buy_submitted(&mut c, "b ACME 100 10.05", 1);

    c.broker_mut().fail_requests = true;
    feed(&mut c, status(1, "Filled", 100, 0, dec!(10.05)));
    assert_eq!(rx.try_recv(), Ok(PlaceOutcome::Accepted));
    assert_eq!(c.state(), TradingState::ReadyToSell);

    // Still failing: the retry re-arms itself.
    let first = c.live_timeout().expect("retry deadline armed");
    c.handle(ControllerEvent::TimeoutFired(first));
    let second = c.live_timeout().expect("retry deadline re-armed");
    assert_eq!(second.key, TimeoutKey::SellRetry);
    assert_ne!(first, second);

    c.broker_mut().fail_requests = false;
    c.handle(ControllerEvent::TimeoutFired(second));
    assert_eq!(c.broker().commands.last(), Some(&BrokerCommand::RequestIds(1)));
    feed(&mut c, BrokerEvent::NextValidId(2));
    assert_eq!(c.state(), TradingState::Selling);
}

#[test]
fn stale_sell_retry_after_placement_is_a_noop() {
    let mut c = controller(1);
    let _rx = buy_submitted(&mut c, "b ACME 100 10.05", 1);
    feed(&mut c, status(1, "Filled", 100, 0, dec!(10.05)));
    c.broker_mut().fail_place = true;
    feed(&mut c, BrokerEvent::NextValidId(2));
    let retry = c.live_timeout().expect("retry deadline armed");

    c.broker_mut().fail_place = false;
    feed(&mut c, BrokerEvent::NextValidId(3));
    assert_eq!(c.state(), TradingState::Selling);

    let before = c.broker().commands.len();
    c.handle(ControllerEvent::TimeoutFired(retry));
    assert_eq!(c.broker().commands.len(), before);
}

#[test]
fn unrepresentable_take_profit_abandons_the_cycle() {
    let mut c = controller(1);
    let mut rx = buy_submitted(&mut c, "b ACME 1 10.05", 1);
    feed(&mut c, status(1, "Filled", 1, 0, Decimal::MAX));
    assert_eq!(rx.try_recv(), Ok(PlaceOutcome::Accepted));

    feed(&mut c, BrokerEvent::NextValidId(2));
    assert_eq!(c.state(), TradingState::ReadyToBuy);
    assert_eq!(c.broker().placed().len(), 1, "no SELL sent");
    assert!(matches!(
        c.notifier().sent().as_slice(),
        [Notification::SellNotPlaced { symbol, .. }] if symbol == "ACME"
    ));

    // Still alive: the next signal starts a scan.
    let _next = place(&mut c, "b ACME 1 10.05");
    assert_eq!(
        c.broker().commands.last(),
        Some(&BrokerCommand::RequestOpenOrders)
    );
}

#[test]
fn oversized_signal_price_is_rejected_up_front() {
    let mut c = controller(1);
    let mut rx = place(&mut c, "b ACME 1 79228162514264337593543950335");
    assert!(matches!(rx.try_recv(), Ok(PlaceOutcome::Error(_))));
    assert!(c.broker().commands.is_empty());
}

#[test]
fn status_for_unknown_order_is_ignored() {
    let mut c = controller(1);
    let mut rx = buy_submitted(&mut c, "b ACME 100 10.05", 7);
    feed(&mut c, status(99, "Filled", 100, 0, dec!(10.05)));
    assert_eq!(c.state(), TradingState::Buying);
    assert!(rx.try_recv().is_err());
}
