// src/services/dispatcher.rs

//! Alert delivery.
//!
//! Confirmed transitions leave the pipeline here. Delivery is
//! at-least-once: a failed send is logged and never rolls back the
//! already-committed record update; duplicate suppression lives in the
//! verified-out and cooldown caches, not the transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{Alert, DispatchConfig};

/// Delivery seam for confirmed alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Posts alerts to a Discord-style webhook.
pub struct WebhookDispatcher {
    client: Client,
    webhook_url: String,
}

impl WebhookDispatcher {
    /// Build from configuration; `None` when no webhook is configured.
    pub fn from_config(config: &DispatchConfig) -> Result<Option<Self>> {
        let Some(webhook_url) = config.resolve_webhook() else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self {
            client,
            webhook_url,
        }))
    }

    /// Webhook body for an alert.
    pub fn payload(alert: &Alert) -> serde_json::Value {
        json!({ "content": alert.message() })
    }
}

#[async_trait]
impl AlertSink for WebhookDispatcher {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(alert))
            .send()
            .await
            .map_err(AppError::dispatch)?;

        // Discord answers 204 No Content on success
        if !response.status().is_success() {
            return Err(AppError::dispatch(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        log::debug!("Alert delivered for {}", alert.canonical_url);
        Ok(())
    }
}

/// Fallback sink when no webhook is configured.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        log::info!(
            "ALERT ({}) {}",
            alert.kind,
            alert.message().replace('\n', " | ")
        );
        Ok(())
    }
}
