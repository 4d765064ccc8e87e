use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV bar for the underlying index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Option side. The exchange tags these CE / PE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl OptionType {
    pub fn tag(&self) -> &'static str {
        match self {
            OptionType::Call => "CE",
            OptionType::Put => "PE",
        }
    }

    /// Action label used in alerts and the trade journal
    pub fn entry_label(&self) -> &'static str {
        match self {
            OptionType::Call => "BUY CE",
            OptionType::Put => "BUY PE",
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Directional read of option-chain open interest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OiTrend {
    Bullish,
    Bearish,
    Sideways,
    /// No open interest could be obtained. Not a market read.
    Unknown,
}

impl fmt::Display for OiTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OiTrend::Bullish => "Bullish",
            OiTrend::Bearish => "Bearish",
            OiTrend::Sideways => "Sideways",
            OiTrend::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Latest quote for one instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub last_price: f64,
    pub open_interest: Option<f64>,
}

/// A single option contract from the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub instrument_key: String,
    pub trading_symbol: String,
    pub strike: f64,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
    pub lot_size: u32,
}

/// Contracts for one expiry plus the subset whose open interest we aggregate
#[derive(Debug, Clone)]
pub struct OptionChain {
    pub expiry: NaiveDate,
    contracts: Vec<OptionContract>,
    oi_universe: Vec<String>,
}

impl OptionChain {
    pub fn new(expiry: NaiveDate, contracts: Vec<OptionContract>) -> Self {
        Self {
            expiry,
            contracts,
            oi_universe: Vec::new(),
        }
    }

    /// Restrict the OI universe to strikes within `radius` of spot.
    ///
    /// Without a spot price the first `fallback_size` contracts are used instead.
    pub fn with_oi_universe(mut self, spot: Option<f64>, radius: f64, fallback_size: usize) -> Self {
        self.oi_universe = match spot {
            Some(spot) => self
                .contracts
                .iter()
                .filter(|c| (c.strike - spot).abs() <= radius)
                .map(|c| c.instrument_key.clone())
                .collect(),
            None => self
                .contracts
                .iter()
                .take(fallback_size)
                .map(|c| c.instrument_key.clone())
                .collect(),
        };
        self
    }

    pub fn contracts(&self) -> &[OptionContract] {
        &self.contracts
    }

    pub fn oi_universe(&self) -> &[String] {
        &self.oi_universe
    }

    pub fn contract(&self, instrument_key: &str) -> Option<&OptionContract> {
        self.contracts
            .iter()
            .find(|c| c.instrument_key == instrument_key)
    }

    /// Nearest strike to spot for the given side; first match wins on ties
    pub fn atm_contract(&self, spot: f64, option_type: OptionType) -> Option<&OptionContract> {
        self.contracts
            .iter()
            .filter(|c| c.option_type == option_type)
            .min_by(|a, b| (a.strike - spot).abs().total_cmp(&(b.strike - spot).abs()))
    }
}
