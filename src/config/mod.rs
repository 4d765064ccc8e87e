// Runtime configuration
// Optional TOML file layered under NIFTYBOT_* environment variables
use chrono::{Duration, NaiveTime, Weekday};
use chrono_tz::Tz;
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::execution::RiskParams;
use crate::risk::SessionClock;
use crate::strategy::SignalConfig;

pub const ENV_PREFIX: &str = "NIFTYBOT";
pub const ACCESS_TOKEN_ENV: &str = "UPSTOX_ACCESS_TOKEN";
pub const DEFAULT_UPSTOX_BASE: &str = "https://api.upstox.com/v2";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("Invalid time for {field}: '{value}' (expected HH:MM)")]
    InvalidTime { field: &'static str, value: String },
    #[error("Invalid expiry weekday: '{0}'")]
    InvalidWeekday(String),
    #[error("Unknown timezone: '{0}'")]
    InvalidTimezone(String),
    #[error("Invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
    #[error("No Upstox access token (set upstox.access_token or UPSTOX_ACCESS_TOKEN)")]
    MissingAccessToken,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct UpstoxSettings {
    pub base_url: String,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
    access_token: Option<String>,
}

impl Default for UpstoxSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTOX_BASE.to_string(),
            requests_per_minute: 120,
            timeout_secs: 10,
            access_token: None,
        }
    }
}

// Keep the token out of logs
impl fmt::Debug for UpstoxSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstoxSettings")
            .field("base_url", &self.base_url)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("timeout_secs", &self.timeout_secs)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiscordSettings {
    pub webhook_url: Option<String>,
}

impl fmt::Debug for DiscordSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordSettings")
            .field("enabled", &self.webhook_url.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Underlying index instrument key
    pub underlying: String,
    pub poll_interval_secs: u64,
    pub timezone: String,
    pub market_open: String,
    pub market_close: String,
    pub weekdays_only: bool,
    pub cooldown_secs: i64,
    pub expiry_weekday: String,
    pub bar_minutes: u32,
    /// OI is aggregated over strikes within this distance of spot
    pub strike_radius: f64,
    /// Contracts used for OI when spot is unavailable at start-up
    pub oi_fallback_contracts: usize,
    pub trade_log: PathBuf,
    pub signal: SignalConfig,
    pub risk: RiskParams,
    pub upstox: UpstoxSettings,
    pub discord: DiscordSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            underlying: "NSE_INDEX|Nifty 50".to_string(),
            poll_interval_secs: 60,
            timezone: "Asia/Kolkata".to_string(),
            market_open: "09:15".to_string(),
            market_close: "15:30".to_string(),
            weekdays_only: true,
            cooldown_secs: 300,
            expiry_weekday: "Tue".to_string(),
            bar_minutes: 5,
            strike_radius: 500.0,
            oi_fallback_contracts: 50,
            trade_log: PathBuf::from("nifty_trades.csv"),
            signal: SignalConfig::default(),
            risk: RiskParams::default(),
            upstox: UpstoxSettings::default(),
            discord: DiscordSettings::default(),
        }
    }
}

impl BotConfig {
    /// Load from an optional file, then NIFTYBOT_* env vars (`__` for nesting)
    ///
    /// e.g. `NIFTYBOT_RISK__STOP_LOSS=2500`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: BotConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let open = self.market_open_time()?;
        let close = self.market_close_time()?;
        if open >= close {
            return Err(invalid("market_open", "must be before market_close"));
        }

        self.tz()?;
        self.expiry_day()?;

        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be positive"));
        }
        if self.cooldown_secs < 0 {
            return Err(invalid("cooldown_secs", "must not be negative"));
        }
        if self.bar_minutes == 0 || 1440 % self.bar_minutes != 0 {
            return Err(invalid("bar_minutes", "must divide a day evenly"));
        }
        if self.signal.rsi_period == 0 {
            return Err(invalid("signal.rsi_period", "must be positive"));
        }
        if self.signal.oi_bias_ratio < 1.0 {
            return Err(invalid("signal.oi_bias_ratio", "must be at least 1.0"));
        }
        if self.risk.lot_size == 0 {
            return Err(invalid("risk.lot_size", "must be positive"));
        }
        for (field, value) in [
            ("risk.take_profit", self.risk.take_profit),
            ("risk.stop_loss", self.risk.stop_loss),
            ("risk.trailing_stop", self.risk.trailing_stop),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(field, "must be a positive amount"));
            }
        }
        if self.upstox.requests_per_minute == 0 {
            return Err(invalid("upstox.requests_per_minute", "must be positive"));
        }

        Ok(())
    }

    pub fn market_open_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_hhmm("market_open", &self.market_open)
    }

    pub fn market_close_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_hhmm("market_close", &self.market_close)
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    pub fn expiry_day(&self) -> Result<Weekday, ConfigError> {
        self.expiry_weekday
            .parse::<Weekday>()
            .map_err(|_| ConfigError::InvalidWeekday(self.expiry_weekday.clone()))
    }

    pub fn session_clock(&self) -> Result<SessionClock, ConfigError> {
        Ok(SessionClock::new(
            self.market_open_time()?,
            self.market_close_time()?,
            Duration::seconds(self.cooldown_secs),
            self.weekdays_only,
        ))
    }

    /// Token from the config file, else UPSTOX_ACCESS_TOKEN
    pub fn access_token(&self) -> Result<SecretString, ConfigError> {
        let token = self
            .upstox
            .access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                std::env::var(ACCESS_TOKEN_ENV)
                    .ok()
                    .filter(|t| !t.trim().is_empty())
            })
            .ok_or(ConfigError::MissingAccessToken)?;

        Ok(SecretString::new(token.into()))
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn parse_hhmm(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ConfigError::InvalidTime {
        field,
        value: value.to_string(),
    })
}
