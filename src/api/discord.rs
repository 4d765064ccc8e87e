use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{Alert, AlertField, ApiError, Notifier};

/// Discord webhook notifier. Without a webhook URL every alert is a no-op.
#[derive(Clone)]
pub struct DiscordNotifier {
    client: Client,
    webhook_url: Option<String>,
    lot_size: u32,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    embeds: [Embed<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
    timestamp: String,
    footer: Footer,
    #[serde(skip_serializing_if = "no_fields")]
    fields: &'a [AlertField],
}

#[derive(Debug, Serialize)]
struct Footer {
    text: String,
}

fn no_fields(fields: &&[AlertField]) -> bool {
    fields.is_empty()
}

impl DiscordNotifier {
    pub fn new(webhook_url: Option<String>, lot_size: u32) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        let webhook_url = webhook_url.filter(|url| !url.trim().is_empty());
        if webhook_url.is_none() {
            tracing::info!("Discord webhook not configured, alerts disabled");
        }

        Ok(Self {
            client,
            webhook_url,
            lot_size,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), ApiError> {
        let Some(url) = &self.webhook_url else {
            return Ok(());
        };

        let payload = WebhookPayload {
            embeds: [Embed {
                title: &alert.title,
                description: &alert.description,
                color: alert.severity.color(),
                timestamp: Utc::now().to_rfc3339(),
                footer: Footer {
                    text: format!("Nifty Bot | Lot: {}", self.lot_size),
                },
                fields: &alert.fields,
            }],
        };

        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("✅ Discord alert sent: {}", alert.title);
        Ok(())
    }
}
