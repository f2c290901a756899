use rust_decimal::Decimal;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::{
    ActiveOrder, ControllerConfig, ControllerSnapshot, Counters, PlaceOutcome, TradingState,
};
use crate::broker::{is_benign_error, BrokerAdapter, BrokerEvent, OrderStatusUpdate, StatusClass};
use crate::notify::{Notification, Notifier};
use crate::policy::compute_sell_target;
use crate::timeout::{DeadlineScheduler, TimeoutKey, TimeoutSupervisor, TimeoutToken};
use crate::types::{ContractSpec, OrderId, OrderSequence, OrderSpec, Side};

// ---------------------------------------------------------------------------
// ControllerEvent
// ---------------------------------------------------------------------------

/// Everything the controller reacts to. Fed through one serialized queue.
#[derive(Debug)]
pub enum ControllerEvent {
    Place {
        message: String,
        reply: oneshot::Sender<PlaceOutcome>,
    },
    Broker(BrokerEvent),
    TimeoutFired(TimeoutToken),
    CurrentTime {
        reply: oneshot::Sender<i64>,
    },
    Snapshot {
        reply: oneshot::Sender<ControllerSnapshot>,
    },
}

// ---------------------------------------------------------------------------
// Internal bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PendingPlace {
    cycle_id: Uuid,
    symbol: String,
    reply: oneshot::Sender<PlaceOutcome>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ScanPhase {
    OpenOrders,
    Positions,
}

/// Pre-trade scan for an accepted place request. The parsed signal only
/// becomes the cycle's `OrderSequence` once both scans come back clean.
#[derive(Debug)]
struct Scan {
    phase: ScanPhase,
    signal: OrderSequence,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Sole owner of all mutable trading state.
///
/// Not `Sync` by design of use: exactly one task calls [`Controller::handle`],
/// one event at a time (see [`crate::runtime`]).
pub struct Controller<B, S, N> {
    cfg: ControllerConfig,
    broker: B,
    timeouts: TimeoutSupervisor<S>,
    notifier: N,
    state: TradingState,
    sequence: Option<OrderSequence>,
    active: Option<ActiveOrder>,
    pending: Option<PendingPlace>,
    scan: Option<Scan>,
    counters: Counters,
    time_waiters: Vec<oneshot::Sender<i64>>,
}

impl<B, S, N> Controller<B, S, N>
where
    B: BrokerAdapter,
    S: DeadlineScheduler,
    N: Notifier,
{
    pub fn new(cfg: ControllerConfig, broker: B, scheduler: S, notifier: N) -> Self {
        Self {
            cfg,
            broker,
            timeouts: TimeoutSupervisor::new(scheduler),
            notifier,
            state: TradingState::ReadyToBuy,
            sequence: None,
            active: None,
            pending: None,
            scan: None,
            counters: Counters::default(),
            time_waiters: Vec::new(),
        }
    }

    /// Single entry point for all mutation.
    pub fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Place { message, reply } => self.on_place(message, reply),
            ControllerEvent::Broker(ev) => self.on_broker_event(ev),
            ControllerEvent::TimeoutFired(token) => self.on_timeout(token),
            ControllerEvent::CurrentTime { reply } => self.on_current_time_request(reply),
            ControllerEvent::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> TradingState {
        self.state
    }

    pub fn win_count(&self) -> u32 {
        self.counters.win_count
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn sequence(&self) -> Option<&OrderSequence> {
        self.sequence.as_ref()
    }

    pub fn active_order(&self) -> Option<&ActiveOrder> {
        self.active.as_ref()
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending.is_some()
    }

    pub fn live_timeout(&self) -> Option<TimeoutToken> {
        self.timeouts.live()
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn scheduler(&self) -> &S {
        self.timeouts.scheduler()
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.state,
            win_count: self.counters.win_count,
            daily_win_cap: self.cfg.daily_win_cap,
            sequence: self.sequence.clone(),
            active_order: self.active.clone(),
            place_pending: self.pending.is_some(),
            timeout_armed: self.timeouts.live().is_some(),
        }
    }

    // -----------------------------------------------------------------------
    // Place request and pre-trade scans
    // -----------------------------------------------------------------------

    fn on_place(&mut self, message: String, reply: oneshot::Sender<PlaceOutcome>) {
        // Malformed input is an error whatever the cycle is doing.
        let signal = match message.parse::<OrderSequence>() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "place rejected: malformed signal");
                let _ = reply.send(PlaceOutcome::Error(e.to_string()));
                return;
            }
        };

        // No queueing: one request in flight, and only from READY_TO_BUY.
        if self.pending.is_some() || self.state != TradingState::ReadyToBuy {
            info!(state = %self.state, "place rejected: cycle in progress");
            let _ = reply.send(PlaceOutcome::RejectedCycleInProgress);
            return;
        }

        if self.counters.win_count >= self.cfg.daily_win_cap {
            info!(
                win_count = self.counters.win_count,
                cap = self.cfg.daily_win_cap,
                "place rejected: daily win cap reached"
            );
            let _ = reply.send(PlaceOutcome::RejectedDailyCapReached);
            return;
        }

        let cycle_id = Uuid::new_v4();
        info!(
            %cycle_id,
            symbol = %signal.symbol,
            quantity = signal.quantity,
            price = %signal.price,
            "place accepted; scanning open orders"
        );

        self.pending = Some(PendingPlace {
            cycle_id,
            symbol: signal.symbol.clone(),
            reply,
        });
        self.scan = Some(Scan {
            phase: ScanPhase::OpenOrders,
            signal,
        });
        self.counters.open_orders_seen = 0;
        self.timeouts.arm(TimeoutKey::Handshake, self.cfg.buy_timeout);

        if let Err(e) = self.broker.request_open_orders() {
            error!(error = %e, "request open orders failed");
            self.abandon_handshake(PlaceOutcome::Error(format!(
                "request open orders failed: {e}"
            )));
        }
    }

    fn scan_phase(&self) -> Option<ScanPhase> {
        self.scan.as_ref().map(|s| s.phase)
    }

    fn on_open_order_end(&mut self) {
        if self.scan_phase() != Some(ScanPhase::OpenOrders) {
            debug!("open-order enumeration end outside a scan; ignored");
            return;
        }

        if self.counters.open_orders_seen > 0 {
            info!(
                open_orders = self.counters.open_orders_seen,
                "place rejected: open orders pending"
            );
            self.abandon_handshake(PlaceOutcome::RejectedOpenOrdersPending);
            return;
        }

        if let Some(scan) = self.scan.as_mut() {
            scan.phase = ScanPhase::Positions;
        }
        self.counters.positions_seen = 0;

        if let Err(e) = self.broker.request_positions() {
            error!(error = %e, "request positions failed");
            self.abandon_handshake(PlaceOutcome::Error(format!(
                "request positions failed: {e}"
            )));
        }
    }

    fn on_position_end(&mut self) {
        if self.scan_phase() != Some(ScanPhase::Positions) {
            debug!("position enumeration end outside a scan; ignored");
            return;
        }

        if self.counters.positions_seen > 0 {
            info!(
                positions = self.counters.positions_seen,
                "place rejected: positions exist"
            );
            self.abandon_handshake(PlaceOutcome::RejectedPositionsExist);
            return;
        }

        let Some(scan) = self.scan.take() else {
            return;
        };

        // Guards passed: the signal becomes this cycle's sequence and any
        // order left over from the previous cycle is superseded.
        self.sequence = Some(scan.signal);
        self.active = None;
        self.transition(TradingState::Buying);

        if let Err(e) = self.broker.request_ids(1) {
            error!(error = %e, "request ids failed");
            self.abandon_handshake(PlaceOutcome::Error(format!("request ids failed: {e}")));
        }
    }

    /// Drop the in-flight request before any BUY exists.
    fn abandon_handshake(&mut self, outcome: PlaceOutcome) {
        self.scan = None;
        self.timeouts.clear();
        if self.state == TradingState::Buying && self.active.is_none() {
            self.transition(TradingState::ReadyToBuy);
        }
        self.resolve_pending(outcome);
    }

    fn resolve_pending(&mut self, outcome: PlaceOutcome) {
        if let Some(p) = self.pending.take() {
            info!(cycle_id = %p.cycle_id, ?outcome, "place request resolved");
            if p.reply.send(outcome).is_err() {
                debug!(cycle_id = %p.cycle_id, "caller went away before the outcome");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Broker events
    // -----------------------------------------------------------------------

    fn on_broker_event(&mut self, ev: BrokerEvent) {
        match ev {
            BrokerEvent::Error {
                code,
                req_id,
                message,
            } => self.on_broker_error(code, req_id, message),
            BrokerEvent::Position { symbol, size, .. } => {
                if !size.is_zero() {
                    self.counters.positions_seen += 1;
                    debug!(%symbol, %size, "position reported");
                }
            }
            BrokerEvent::PositionEnd => self.on_position_end(),
            BrokerEvent::NextValidId(id) => self.on_next_valid_id(id),
            BrokerEvent::OrderStatus(u) => self.on_order_status(u),
            BrokerEvent::OpenOrder {
                order_id, symbol, ..
            } => {
                self.counters.open_orders_seen += 1;
                debug!(order_id, %symbol, "open order reported");
            }
            BrokerEvent::OpenOrderEnd => self.on_open_order_end(),
            BrokerEvent::CurrentTime(t) => {
                for w in self.time_waiters.drain(..) {
                    let _ = w.send(t);
                }
            }
        }
    }

    fn on_broker_error(&mut self, code: i32, req_id: Option<OrderId>, message: String) {
        if is_benign_error(code) {
            debug!(code, ?req_id, %message, "benign broker error");
            return;
        }
        warn!(code, ?req_id, %message, "broker error");
        self.notifier
            .notify(Notification::BrokerWarning { code, message });
    }

    fn on_next_valid_id(&mut self, id: OrderId) {
        match self.state {
            TradingState::Buying if self.active.is_none() => self.place_buy(id),
            TradingState::ReadyToSell
                if self.active.as_ref().map_or(true, |a| a.side == Side::Buy) =>
            {
                self.place_sell(id)
            }
            _ => debug!(order_id = id, state = %self.state, "order id not needed; ignored"),
        }
    }

    fn place_buy(&mut self, id: OrderId) {
        let Some(seq) = self.sequence.clone() else {
            error!(order_id = id, "BUYING without an order sequence");
            self.abandon_handshake(PlaceOutcome::Error("missing order sequence".to_string()));
            return;
        };

        let default_venue = self.broker.default_venue(&seq.symbol);
        let contract = ContractSpec::stock(
            &seq.symbol,
            self.cfg.venues.resolve_venue(&seq.symbol, &default_venue),
        );
        let order = OrderSpec::limit(
            Side::Buy,
            seq.quantity,
            seq.price,
            self.cfg.account_id.clone(),
        );

        match self.broker.place_order(id, &contract, &order) {
            Ok(()) => {
                info!(
                    order_id = id,
                    symbol = %seq.symbol,
                    quantity = seq.quantity,
                    limit = %seq.price,
                    exchange = %contract.exchange,
                    "BUY submitted"
                );
                self.active = Some(ActiveOrder::new(id, Side::Buy));
                self.timeouts.arm(TimeoutKey::Order(id), self.cfg.buy_timeout);
            }
            Err(e) => {
                error!(order_id = id, error = %e, "place BUY failed");
                self.abandon_handshake(PlaceOutcome::Error(format!("place BUY failed: {e}")));
            }
        }
    }

    fn place_sell(&mut self, id: OrderId) {
        let Some(seq) = self.sequence.clone() else {
            error!(order_id = id, "READY_TO_SELL without an order sequence");
            return;
        };

        let Some(target) = compute_sell_target(seq.price, self.cfg.margin_rate) else {
            self.abandon_take_profit(&seq, id);
            return;
        };
        let default_venue = self.broker.default_venue(&seq.symbol);
        let contract = ContractSpec::stock(
            &seq.symbol,
            self.cfg.venues.resolve_venue(&seq.symbol, &default_venue),
        );
        let order = OrderSpec::limit(Side::Sell, seq.quantity, target, self.cfg.account_id.clone());

        match self.broker.place_order(id, &contract, &order) {
            Ok(()) => {
                info!(
                    order_id = id,
                    symbol = %seq.symbol,
                    quantity = seq.quantity,
                    bought_at = %seq.price,
                    limit = %target,
                    "take-profit SELL submitted"
                );
                self.timeouts.clear_key(TimeoutKey::SellRetry);
                self.active = Some(ActiveOrder::new(id, Side::Sell));
                self.transition(TradingState::Selling);
            }
            Err(e) => {
                error!(order_id = id, error = %e, "place SELL failed");
                self.schedule_sell_retry(seq.symbol, e.to_string());
            }
        }
    }

    /// Stay READY_TO_SELL and ask for a fresh order id after a back-off.
    fn schedule_sell_retry(&mut self, symbol: String, reason: String) {
        self.notifier.notify(Notification::SellNotPlaced { symbol, reason });
        self.timeouts.arm(TimeoutKey::SellRetry, self.cfg.buy_timeout);
    }

    fn on_sell_retry(&mut self) {
        if self.state != TradingState::ReadyToSell {
            debug!(state = %self.state, "SELL retry no longer needed");
            return;
        }
        info!("retrying take-profit SELL; requesting order id");
        if let Err(e) = self.broker.request_ids(1) {
            error!(error = %e, "request ids for SELL retry failed");
            let symbol = self.sequence.as_ref().map(|s| s.symbol.clone()).unwrap_or_default();
            self.schedule_sell_retry(symbol, format!("request ids failed: {e}"));
        }
    }

    /// No representable take-profit price: give the cycle up. The position
    /// stays at the broker, so the next position scan still blocks buying.
    fn abandon_take_profit(&mut self, seq: &OrderSequence, id: OrderId) {
        error!(
            order_id = id,
            symbol = %seq.symbol,
            bought_at = %seq.price,
            margin_rate = %self.cfg.margin_rate,
            "take-profit price out of range; cycle abandoned"
        );
        self.timeouts.clear_key(TimeoutKey::SellRetry);
        self.transition(TradingState::ReadyToBuy);
        self.notifier.notify(Notification::SellNotPlaced {
            symbol: seq.symbol.clone(),
            reason: "take-profit price out of range; position left open".to_string(),
        });
    }

    fn on_order_status(&mut self, u: OrderStatusUpdate) {
        let Some(active) = self.active.clone() else {
            debug!(order_id = u.order_id, status = %u.status, "status without active order; ignored");
            return;
        };
        if active.order_id != u.order_id {
            debug!(
                order_id = u.order_id,
                active = active.order_id,
                status = %u.status,
                "stale order status; ignored"
            );
            return;
        }
        if active.filled_confirmed {
            debug!(order_id = u.order_id, status = %u.status, "duplicate terminal status; ignored");
            return;
        }

        let pending_cancel = u.status == "PendingCancel";
        match (active.side, u.class()) {
            (Side::Buy, StatusClass::Filled) if u.remaining == 0 => self.confirm_buy(&u, None),
            (Side::Buy, StatusClass::Cancelled) if u.filled > 0 => {
                self.confirm_buy(&u, Some(u.filled))
            }
            (Side::Buy, StatusClass::Cancelled) if !pending_cancel => self.buy_cancelled_unfilled(&u),
            (Side::Sell, StatusClass::Filled) if u.remaining == 0 => self.confirm_sell(&u),
            (Side::Sell, StatusClass::Cancelled) if !pending_cancel => self.sell_cancelled(&u),
            _ => debug!(
                order_id = u.order_id,
                status = %u.status,
                filled = u.filled,
                remaining = u.remaining,
                "working order status"
            ),
        }
    }

    fn confirm_buy(&mut self, u: &OrderStatusUpdate, partial_qty: Option<i64>) {
        if let Some(a) = self.active.as_mut() {
            a.filled_confirmed = true;
        }
        self.timeouts.disarm(u.order_id);

        // READY_TO_BUY here means the BUY already timed out and was cancelled,
        // but the broker filled (some of) it first. The shares are real.
        let adopted = self.state == TradingState::ReadyToBuy;

        let Some(seq) = self.sequence.as_mut() else {
            error!(order_id = u.order_id, "BUY fill without an order sequence");
            return;
        };
        if u.avg_fill_price > Decimal::ZERO {
            seq.price = u.avg_fill_price;
        } else {
            warn!(order_id = u.order_id, "fill reported without average price; keeping limit price");
        }
        if let Some(q) = partial_qty {
            seq.quantity = q;
        }
        info!(
            order_id = u.order_id,
            symbol = %seq.symbol,
            quantity = seq.quantity,
            avg_fill_price = %seq.price,
            partial = partial_qty.is_some(),
            adopted,
            "BUY fill confirmed"
        );

        if adopted && self.scan.take().is_some() {
            // A new request was mid-scan; the adopted position blocks it.
            self.timeouts.clear();
            self.resolve_pending(PlaceOutcome::RejectedPositionsExist);
        }

        self.transition(TradingState::ReadyToSell);
        self.resolve_pending(PlaceOutcome::Accepted);

        if let Err(e) = self.broker.request_ids(1) {
            error!(error = %e, "request ids for SELL failed");
            let symbol = self.sequence.as_ref().map(|s| s.symbol.clone()).unwrap_or_default();
            self.schedule_sell_retry(symbol, format!("request ids failed: {e}"));
        }
    }

    fn buy_cancelled_unfilled(&mut self, u: &OrderStatusUpdate) {
        self.timeouts.disarm(u.order_id);
        self.active = None;

        if self.state != TradingState::Buying {
            debug!(order_id = u.order_id, "timed-out BUY confirmed cancelled");
            return;
        }

        info!(order_id = u.order_id, status = %u.status, "BUY cancelled unfilled; cycle reset");
        let symbol = self.sequence.as_ref().map(|s| s.symbol.clone()).unwrap_or_default();
        self.transition(TradingState::ReadyToBuy);
        self.resolve_pending(PlaceOutcome::Aborted);
        self.notifier.notify(Notification::BuyAborted {
            symbol,
            order_id: Some(u.order_id),
            reason: format!("cancelled by broker ({})", u.status),
        });
    }

    fn confirm_sell(&mut self, u: &OrderStatusUpdate) {
        if let Some(a) = self.active.as_mut() {
            a.filled_confirmed = true;
        }
        self.counters.win_count += 1;

        let (symbol, quantity, bought_at) = match self.sequence.as_ref() {
            Some(s) => (s.symbol.clone(), s.quantity, s.price),
            None => (String::new(), 0, Decimal::ZERO),
        };
        info!(
            order_id = u.order_id,
            %symbol,
            sold_at = %u.avg_fill_price,
            win_count = self.counters.win_count,
            "take-profit SELL filled"
        );

        self.transition(TradingState::ReadyToBuy);

        self.notifier.notify(Notification::Win {
            symbol,
            quantity,
            bought_at,
            sold_at: u.avg_fill_price,
            win_count: self.counters.win_count,
            daily_win_cap: self.cfg.daily_win_cap,
        });
        if self.counters.win_count >= self.cfg.daily_win_cap {
            self.notifier.notify(Notification::DailyCapReached {
                win_count: self.counters.win_count,
            });
        }
    }

    fn sell_cancelled(&mut self, u: &OrderStatusUpdate) {
        if let Some(a) = self.active.as_mut() {
            a.filled_confirmed = true;
        }
        warn!(
            order_id = u.order_id,
            status = %u.status,
            filled = u.filled,
            "take-profit SELL cancelled; no win recorded"
        );
        let symbol = self.sequence.as_ref().map(|s| s.symbol.clone()).unwrap_or_default();
        self.transition(TradingState::ReadyToBuy);
        self.notifier.notify(Notification::SellCancelled {
            symbol,
            order_id: u.order_id,
            filled: u.filled,
        });
    }

    // -----------------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------------

    fn on_timeout(&mut self, token: TimeoutToken) {
        if !self.timeouts.claim(token) {
            debug!(?token, "stale timeout; ignored");
            return;
        }

        match token.key {
            TimeoutKey::Handshake => {
                let symbol = self.pending.as_ref().map(|p| p.symbol.clone()).unwrap_or_default();
                warn!(%symbol, "broker handshake timed out; cycle abandoned");
                self.abandon_handshake(PlaceOutcome::Aborted);
                self.notifier.notify(Notification::BuyAborted {
                    symbol,
                    order_id: None,
                    reason: "broker did not answer in time".to_string(),
                });
            }
            TimeoutKey::Order(order_id) => self.on_buy_timeout(order_id),
            TimeoutKey::SellRetry => self.on_sell_retry(),
        }
    }

    fn on_buy_timeout(&mut self, order_id: OrderId) {
        let unfilled_buy = matches!(
            &self.active,
            Some(a) if a.order_id == order_id && a.side == Side::Buy && !a.filled_confirmed
        );
        if !unfilled_buy || self.state != TradingState::Buying {
            debug!(order_id, state = %self.state, "BUY timeout with nothing to cancel");
            return;
        }

        warn!(order_id, timeout = ?self.cfg.buy_timeout, "BUY not filled before deadline; cancelling");
        if let Err(e) = self.broker.cancel_order(order_id) {
            error!(order_id, error = %e, "cancel order failed");
        }
        if let Some(a) = self.active.as_mut() {
            a.cancel_requested = true;
        }

        let symbol = self.sequence.as_ref().map(|s| s.symbol.clone()).unwrap_or_default();
        self.transition(TradingState::ReadyToBuy);
        self.resolve_pending(PlaceOutcome::Aborted);
        self.notifier.notify(Notification::BuyAborted {
            symbol,
            order_id: Some(order_id),
            reason: "not filled before deadline".to_string(),
        });
    }

    // -----------------------------------------------------------------------
    // Misc
    // -----------------------------------------------------------------------

    fn on_current_time_request(&mut self, reply: oneshot::Sender<i64>) {
        // Callers that gave up waiting have dropped their receivers.
        self.time_waiters.retain(|w| !w.is_closed());
        self.time_waiters.push(reply);
        if let Err(e) = self.broker.request_current_time() {
            warn!(error = %e, "request current time failed");
            // Dropping the senders tells every waiter the query failed.
            self.time_waiters.clear();
        }
    }

    fn transition(&mut self, next: TradingState) {
        debug_assert!(
            is_legal_transition(self.state, next),
            "illegal trading transition {} -> {}",
            self.state,
            next
        );
        info!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }
}

/// Transition table of the trading cycle.
///
/// `READY_TO_BUY -> READY_TO_SELL` is the late-fill path: a BUY cancelled on
/// timeout that the broker reports filled anyway. `READY_TO_SELL ->
/// READY_TO_BUY` only happens when no take-profit price can be computed.
pub fn is_legal_transition(from: TradingState, to: TradingState) -> bool {
    use TradingState::*;
    matches!(
        (from, to),
        (ReadyToBuy, Buying)
            | (Buying, ReadyToSell)
            | (Buying, ReadyToBuy)
            | (ReadyToSell, Selling)
            | (Selling, ReadyToBuy)
            | (ReadyToBuy, ReadyToSell)
            | (ReadyToSell, ReadyToBuy)
    )
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
