//! Startup wiring: config -> notifier, broker, controller task.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use tpx_broker_paper::{FillMode, PaperBroker};
use tpx_config::TradingConfig;
use tpx_execution::{
    event_queue, spawn_controller, BrokerAdapter, Controller, ControllerConfig, ControllerHandle,
    Notifier, VenuePolicy,
};
use tpx_notify::{TracingNotifier, WebhookNotifier};

pub fn controller_config(cfg: &TradingConfig) -> ControllerConfig {
    ControllerConfig {
        margin_rate: cfg.margin_rate,
        daily_win_cap: cfg.daily_win_cap,
        buy_timeout: cfg.buy_timeout,
        account_id: cfg.account_id.clone(),
        venues: VenuePolicy::new(cfg.exchange_overrides.clone()),
    }
}

/// Webhook relay when a URL is configured, log-only otherwise.
pub fn build_notifier(cfg: &TradingConfig) -> Result<Arc<dyn Notifier>> {
    match &cfg.notify_webhook_url {
        Some(url) => {
            let from = cfg.notify_from.clone().unwrap_or_default();
            let to = cfg.notify_to.clone().unwrap_or_default();
            let webhook = WebhookNotifier::new(url.clone(), from, to)?;
            info!(?webhook, "webhook notifications enabled");
            Ok(Arc::new(webhook))
        }
        None => {
            info!("no webhook configured; notifications go to the log only");
            Ok(Arc::new(TracingNotifier))
        }
    }
}

/// Connect the paper broker and start the controller task.
pub fn start_controller(cfg: &TradingConfig, notifier: Arc<dyn Notifier>) -> Result<ControllerHandle> {
    let fill_mode: FillMode = cfg
        .paper_fill
        .parse()
        .with_context(|| format!("invalid {}", tpx_config::ENV_PAPER_FILL))?;

    let (queue, inbox) = event_queue();
    let mut broker = PaperBroker::new(queue.broker_sink(), fill_mode);
    if let Some(account) = &cfg.account_id {
        broker = broker.with_account(account.clone());
    }
    broker
        .connect()
        .map_err(|e| anyhow!("broker connect failed: {e}"))?;
    info!(
        endpoint = %cfg.broker_endpoint(),
        ?fill_mode,
        "paper broker standing in for the brokerage gateway"
    );

    let controller = Controller::new(controller_config(cfg), broker, queue.scheduler(), notifier);
    Ok(spawn_controller(controller, queue, inbox))
}
