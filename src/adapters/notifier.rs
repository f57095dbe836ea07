//! Outbound trade notifications
//!
//! Delivery is best-effort: failures are logged and never reach the caller.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::{Session, TradeEvent};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &TradeEvent);
}

/// Sink used when no webhook is configured
#[derive(Debug, Default, Clone)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, event: &TradeEvent) {
        debug!(event = event.name(), "No notification sink configured");
    }
}

/// Forwards trade events only while the session holds the master role.
///
/// Nodes share one chat channel; slaves keep their events in the log.
pub struct MasterOnlySink {
    inner: Arc<dyn NotificationSink>,
    session: Arc<Session>,
}

impl MasterOnlySink {
    pub fn new(inner: Arc<dyn NotificationSink>, session: Arc<Session>) -> Arc<Self> {
        Arc::new(Self { inner, session })
    }
}

#[async_trait]
impl NotificationSink for MasterOnlySink {
    async fn notify(&self, event: &TradeEvent) {
        if self.session.is_master() {
            self.inner.notify(event).await;
        } else {
            debug!(event = event.name(), "Slave node, notification kept local");
        }
    }
}

/// Chat-style webhook client (Feishu / Lark compatible text payload)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    msg_type: &'static str,
    content: WebhookContent,
    /// Structured copy for receivers that parse events
    event: &'a TradeEvent,
}

#[derive(Serialize)]
struct WebhookContent {
    text: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Arc<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Arc::new(Self {
            client,
            webhook_url,
        })
    }

    /// Build the configured sink, falling back to [`NullSink`].
    pub fn from_config(webhook_url: Option<&str>) -> Arc<dyn NotificationSink> {
        match webhook_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                info!("Webhook notifications enabled");
                Self::new(url.to_string())
            }
            None => Arc::new(NullSink),
        }
    }

    /// Send a text message to the webhook
    pub async fn send(&self, event: &TradeEvent) -> Result<(), String> {
        let message = WebhookMessage {
            msg_type: "text",
            content: WebhookContent {
                text: event.summary(),
            },
            event,
        };

        match self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await
        {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("Webhook notification sent successfully");
                    Ok(())
                } else {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    Err(format!("HTTP {}: {}", status, body))
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, event: &TradeEvent) {
        if let Err(e) = self.send(event).await {
            error!(event = event.name(), "Failed to send notification: {}", e);
        }
    }
}
