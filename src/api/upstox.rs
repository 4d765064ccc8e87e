use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{ApiError, MarketDataProvider};
use crate::models::{Bar, OptionContract, OptionType, Quote};

pub const UPSTOX_API_BASE: &str = "https://api.upstox.com/v2";
const MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

type UpstoxRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Upstox v2 REST client
///
/// Clones share the rate limiter.
#[derive(Clone)]
pub struct UpstoxClient {
    client: Client,
    base_url: String,
    access_token: Arc<SecretString>,
    rate_limiter: Arc<UpstoxRateLimiter>,
    retry_backoff: Duration,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    #[serde(default)]
    candles: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    instrument_token: Option<String>,
    last_price: Option<f64>,
    ltp: Option<f64>,
    oi: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ContractEntry {
    instrument_key: String,
    strike_price: f64,
    instrument_type: String,
    expiry: String,
    #[serde(default)]
    trading_symbol: Option<String>,
    #[serde(default)]
    lot_size: Option<u32>,
}

impl UpstoxClient {
    pub fn new(
        access_token: SecretString,
        base_url: impl Into<String>,
        requests_per_minute: u32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(requests_per_minute)
            .context("requests_per_minute must be positive")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: Arc::new(access_token),
            rate_limiter,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    /// Base delay between retries, doubled on each attempt
    pub fn with_retry_backoff(mut self, base: Duration) -> Self {
        self.retry_backoff = base;
        self
    }

    /// Rate-limited GET with back-off on 429 and 5xx
    async fn get(&self, path_and_query: &str) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, path_and_query);

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let response = self
                .client
                .get(&url)
                .header("Accept", "application/json")
                .bearer_auth(self.access_token.expose_secret())
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff = self.retry_backoff * 2u32.pow(attempt);
                    tracing::warn!(
                        "Network error: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(ApiError::Http(e)),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let rate_limited = status.as_u16() == 429;
            if (rate_limited || status.is_server_error()) && attempt < MAX_RETRIES {
                let backoff = self.retry_backoff * 2u32.pow(attempt);
                tracing::warn!(
                    "Upstox returned {}, backing off for {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            if rate_limited {
                return Err(ApiError::RateLimited(MAX_RETRIES));
            }

            // Other 4xx, or 5xx on the last attempt
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Err(ApiError::RateLimited(MAX_RETRIES))
    }

    async fn get_data<T: serde::de::DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> Result<Option<T>, ApiError> {
        let body = self.get(path_and_query).await?.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl MarketDataProvider for UpstoxClient {
    async fn intraday_candles(&self, instrument_key: &str) -> Result<Vec<Bar>, ApiError> {
        let path = format!(
            "/historical-candle/intraday/{}/1minute",
            encode_key(instrument_key)
        );

        let data: Option<CandleData> = self.get_data(&path).await?;
        let rows = data.map(|d| d.candles).unwrap_or_default();

        let mut bars = rows
            .iter()
            .map(|row| parse_candle(row))
            .collect::<Result<Vec<_>, _>>()?;

        // Upstox returns newest first
        bars.sort_by_key(|b| b.timestamp);
        tracing::debug!("Fetched {} 1m candles for {}", bars.len(), instrument_key);
        Ok(bars)
    }

    async fn quotes(&self, instrument_keys: &[String]) -> Result<HashMap<String, Quote>, ApiError> {
        if instrument_keys.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = instrument_keys
            .iter()
            .map(|k| encode_key(k))
            .collect::<Vec<_>>()
            .join(",");
        let path = format!("/market-quote/quotes?instrument_key={}", joined);

        let data: Option<HashMap<String, QuoteEntry>> = self.get_data(&path).await?;
        let entries = data.unwrap_or_default();
        let single_key = (instrument_keys.len() == 1).then(|| instrument_keys[0].clone());

        let mut quotes = HashMap::with_capacity(entries.len());
        for (response_key, entry) in entries {
            // Response keys are "NSE_FO:SYMBOL"; join on the token we asked for
            let Some(key) = entry.instrument_token.clone().or_else(|| single_key.clone()) else {
                tracing::debug!("Quote {} has no instrument_token, skipping", response_key);
                continue;
            };

            let last_price = entry
                .last_price
                .filter(|p| *p > 0.0)
                .or(entry.ltp)
                .unwrap_or(0.0);

            quotes.insert(
                key,
                Quote {
                    last_price,
                    open_interest: entry.oi,
                },
            );
        }

        Ok(quotes)
    }

    async fn option_contracts(
        &self,
        underlying: &str,
        expiry: Option<NaiveDate>,
    ) -> Result<Vec<OptionContract>, ApiError> {
        let mut path = format!("/option/contract?instrument_key={}", encode_key(underlying));
        if let Some(expiry) = expiry {
            path.push_str(&format!("&expiry_date={}", expiry.format("%Y-%m-%d")));
        }

        let data: Option<Vec<ContractEntry>> = self.get_data(&path).await?;

        let contracts = data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                let option_type = match entry.instrument_type.as_str() {
                    "CE" => OptionType::Call,
                    "PE" => OptionType::Put,
                    _ => return None,
                };
                let expiry = match NaiveDate::parse_from_str(&entry.expiry, "%Y-%m-%d") {
                    Ok(date) => date,
                    Err(_) => {
                        tracing::debug!(
                            "Skipping {} with bad expiry '{}'",
                            entry.instrument_key,
                            entry.expiry
                        );
                        return None;
                    }
                };
                Some(OptionContract {
                    trading_symbol: entry
                        .trading_symbol
                        .unwrap_or_else(|| entry.instrument_key.clone()),
                    instrument_key: entry.instrument_key,
                    strike: entry.strike_price,
                    option_type,
                    expiry,
                    lot_size: entry.lot_size.unwrap_or(0),
                })
            })
            .collect();

        Ok(contracts)
    }
}

/// "NSE_INDEX|Nifty 50" -> "NSE_INDEX%7CNifty%2050"
fn encode_key(instrument_key: &str) -> String {
    instrument_key.replace('|', "%7C").replace(' ', "%20")
}

/// [time, open, high, low, close, volume, oi]
fn parse_candle(row: &[serde_json::Value]) -> Result<Bar, ApiError> {
    if row.len() < 6 {
        return Err(ApiError::Malformed(format!(
            "candle has {} fields, expected at least 6",
            row.len()
        )));
    }

    let time = row[0]
        .as_str()
        .ok_or_else(|| ApiError::Malformed("candle time is not a string".to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(time)
        .map_err(|e| ApiError::Malformed(format!("candle time '{}': {}", time, e)))?;

    let number = |idx: usize| {
        row[idx]
            .as_f64()
            .ok_or_else(|| ApiError::Malformed(format!("candle field {} is not a number", idx)))
    };

    Ok(Bar {
        timestamp,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(base_url: &str) -> UpstoxClient {
        UpstoxClient::new(
            SecretString::new("test-token".into()),
            base_url,
            600,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("NSE_INDEX|Nifty 50"), "NSE_INDEX%7CNifty%2050");
        assert_eq!(encode_key("NSE_FO|43885"), "NSE_FO%7C43885");
    }

    #[tokio::test]
    async fn test_intraday_candles_sorted_oldest_first() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                Matcher::Regex(r"^/historical-candle/intraday/NSE_INDEX%7CNifty%2050/1minute".to_string()),
            )
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"success","data":{"candles":[
                    ["2025-01-07T09:16:00+05:30",23510.0,23520.5,23505.0,23515.0,0,0],
                    ["2025-01-07T09:15:00+05:30",23500.0,23512.0,23498.0,23510.0,0,0]
                ]}}"#,
            )
            .create_async()
            .await;

        let bars = client(&server.url())
            .intraday_candles("NSE_INDEX|Nifty 50")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 23500.0);
        assert_eq!(bars[1].close, 23515.0);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[0].timestamp.offset().local_minus_utc(), 19800);
    }

    #[tokio::test]
    async fn test_intraday_candles_malformed_row() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/historical-candle/".to_string()))
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"candles":[["not-a-time",1,2,3,4,5,0]]}}"#)
            .create_async()
            .await;

        let result = client(&server.url()).intraday_candles("NSE_INDEX|Nifty 50").await;
        assert!(matches!(result, Err(ApiError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_quotes_keyed_by_instrument_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex(r"^/market-quote/quotes\?instrument_key=".to_string()))
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{
                    "NSE_FO:NIFTY2510723500CE":{"instrument_token":"NSE_FO|1","last_price":120.5,"oi":150000.0},
                    "NSE_FO:NIFTY2510723500PE":{"instrument_token":"NSE_FO|2","last_price":0,"ltp":98.25,"oi":210000.0},
                    "NSE_FO:NIFTY2510723600CE":{"instrument_token":"NSE_FO|3","last_price":80.0}
                }}"#,
            )
            .create_async()
            .await;

        let keys = vec![
            "NSE_FO|1".to_string(),
            "NSE_FO|2".to_string(),
            "NSE_FO|3".to_string(),
        ];
        let quotes = client(&server.url()).quotes(&keys).await.unwrap();

        mock.assert_async().await;
        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes["NSE_FO|1"].last_price, 120.5);
        assert_eq!(quotes["NSE_FO|1"].open_interest, Some(150000.0));
        // last_price of 0 falls back to ltp
        assert_eq!(quotes["NSE_FO|2"].last_price, 98.25);
        assert_eq!(quotes["NSE_FO|3"].open_interest, None);
    }

    #[tokio::test]
    async fn test_single_quote_without_token() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/market-quote/quotes".to_string()))
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"NSE_INDEX:Nifty 50":{"last_price":23510.4}}}"#)
            .create_async()
            .await;

        let keys = vec!["NSE_INDEX|Nifty 50".to_string()];
        let quotes = client(&server.url()).quotes(&keys).await.unwrap();
        assert_eq!(quotes["NSE_INDEX|Nifty 50"].last_price, 23510.4);
    }

    #[tokio::test]
    async fn test_quotes_client_error_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex(r"^/market-quote/quotes".to_string()))
            .with_status(401)
            .with_body(r#"{"status":"error","errors":[{"message":"Invalid token"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let keys = vec!["NSE_FO|1".to_string()];
        let result = client(&server.url()).quotes(&keys).await;

        mock.assert_async().await;
        match result {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("Invalid token"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_option_contracts() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                Matcher::Regex(r"^/option/contract\?instrument_key=NSE_INDEX%7CNifty%2050&expiry_date=2025-01-07$".to_string()),
            )
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":[
                    {"instrument_key":"NSE_FO|1","strike_price":23500.0,"instrument_type":"CE","expiry":"2025-01-07","trading_symbol":"NIFTY 23500 CE 07 JAN 25","lot_size":75},
                    {"instrument_key":"NSE_FO|2","strike_price":23500.0,"instrument_type":"PE","expiry":"2025-01-07","trading_symbol":"NIFTY 23500 PE 07 JAN 25","lot_size":75},
                    {"instrument_key":"NSE_FO|9","strike_price":0.0,"instrument_type":"FUT","expiry":"2025-01-30"}
                ]}"#,
            )
            .create_async()
            .await;

        let expiry = NaiveDate::from_ymd_opt(2025, 1, 7);
        let contracts = client(&server.url())
            .option_contracts("NSE_INDEX|Nifty 50", expiry)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(contracts.len(), 2);
        assert_eq!(contracts[0].option_type, OptionType::Call);
        assert_eq!(contracts[1].option_type, OptionType::Put);
        assert_eq!(contracts[0].strike, 23500.0);
        assert_eq!(contracts[0].lot_size, 75);
        assert_eq!(contracts[0].trading_symbol, "NIFTY 23500 CE 07 JAN 25");
    }

    #[tokio::test]
    async fn test_option_contracts_null_data() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/option/contract".to_string()))
            .with_status(200)
            .with_body(r#"{"status":"success","data":null}"#)
            .create_async()
            .await;

        let contracts = client(&server.url())
            .option_contracts("NSE_INDEX|Nifty 50", None)
            .await
            .unwrap();
        assert!(contracts.is_empty());
    }

    #[tokio::test]
    async fn test_candles_missing_data_field() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/historical-candle/".to_string()))
            .with_status(200)
            .with_body(r#"{"status":"success"}"#)
            .create_async()
            .await;

        let bars = client(&server.url())
            .intraday_candles("NSE_INDEX|Nifty 50")
            .await
            .unwrap();
        assert!(bars.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_after_retries_keeps_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex(r"^/market-quote/quotes".to_string()))
            .with_status(503)
            .with_body("upstream unavailable")
            .expect(3)
            .create_async()
            .await;

        let keys = vec!["NSE_FO|1".to_string()];
        let result = client(&server.url())
            .with_retry_backoff(Duration::from_millis(1))
            .quotes(&keys)
            .await;

        mock.assert_async().await;
        match result {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "upstream unavailable");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_too_many_requests_after_retries() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex(r"^/market-quote/quotes".to_string()))
            .with_status(429)
            .expect(3)
            .create_async()
            .await;

        let keys = vec!["NSE_FO|1".to_string()];
        let result = client(&server.url())
            .with_retry_backoff(Duration::from_millis(1))
            .quotes(&keys)
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(ApiError::RateLimited(3))));
    }
}
