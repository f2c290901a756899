//! Notification sinks.
//!
//! - [`TracingNotifier`]: structured log line per notification. Always on.
//! - [`WebhookNotifier`]: POSTs `{from, to, body}` JSON to a relay endpoint
//!   (an SMS gateway in production) and logs as well.
//!
//! Both are fire-and-forget from the controller's point of view: delivery
//! runs on a spawned task and failures end up in the log, never back in the
//! trading cycle.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use tpx_execution::{Notification, Notifier};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// TracingNotifier
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, note: Notification) {
        log_notification(&note);
    }
}

fn log_notification(note: &Notification) {
    match note {
        Notification::BuyAborted { .. }
        | Notification::SellCancelled { .. }
        | Notification::SellNotPlaced { .. }
        | Notification::BrokerWarning { .. } => warn!(?note, body = %note.body(), "notification"),
        _ => info!(?note, body = %note.body(), "notification"),
    }
}

// ---------------------------------------------------------------------------
// WebhookNotifier
// ---------------------------------------------------------------------------

/// Wire body of one relay POST.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub from: String,
    pub to: String,
    pub body: String,
}

/// The URL may carry credentials, so it is never logged.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
    from: String,
    to: String,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &"<REDACTED>")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("webhook http client build failed")?;
        Ok(Self::new_with_client(http, url, from, to))
    }

    pub fn new_with_client(
        http: reqwest::Client,
        url: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn payload(&self, note: &Notification) -> WebhookPayload {
        WebhookPayload {
            from: self.from.clone(),
            to: self.to.clone(),
            body: note.body(),
        }
    }

    /// Deliver one notification and wait for the relay's answer.
    pub async fn deliver(&self, note: &Notification) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .json(&self.payload(note))
            .send()
            .await
            .context("webhook request failed")?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("webhook http error status={}", status.as_u16()));
        }
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, note: Notification) {
        log_notification(&note);

        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; webhook notification not sent");
            return;
        };
        let this = self.clone();
        rt.spawn(async move {
            if let Err(e) = this.deliver(&note).await {
                warn!(error = %e, body = %note.body(), "webhook delivery failed");
            }
        });
    }
}
