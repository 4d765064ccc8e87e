// External collaborators: market data and alert delivery
pub mod discord;
pub mod upstox;

pub use discord::DiscordNotifier;
pub use upstox::UpstoxClient;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{Bar, OptionContract, Quote};

/// Quote endpoint accepts at most this many instrument keys per call
pub const QUOTE_BATCH_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Rate limited after {0} attempts")]
    RateLimited(u32),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Failed to decode response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Candles, quotes and the option chain for one underlying
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Today's 1-minute bars, oldest first
    async fn intraday_candles(&self, instrument_key: &str) -> Result<Vec<Bar>, ApiError>;

    /// Latest quotes keyed by the requested instrument key
    ///
    /// Callers keep batches within [`QUOTE_BATCH_LIMIT`]. Keys with no quote
    /// are simply absent from the map.
    async fn quotes(&self, instrument_keys: &[String]) -> Result<HashMap<String, Quote>, ApiError>;

    /// Option contracts for the underlying, optionally for one expiry
    async fn option_contracts(
        &self,
        underlying: &str,
        expiry: Option<NaiveDate>,
    ) -> Result<Vec<OptionContract>, ApiError>;
}

/// Fire-and-forget alert sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Failure,
    Warning,
}

impl Severity {
    /// Embed colour
    pub fn color(&self) -> u32 {
        match self {
            Severity::Success => 0x00ff00,
            Severity::Failure => 0xff0000,
            Severity::Warning => 0xffff00,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub fields: Vec<AlertField>,
}

impl Alert {
    pub fn new(title: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(AlertField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}
