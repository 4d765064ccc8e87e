use anyhow::Context;
use chrono::NaiveDateTime;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::execution::{ExitReason, ExitReport};
use crate::indicators::IndicatorSnapshot;
use crate::models::{OiTrend, OptionType};

pub const JOURNAL_HEADER: [&str; 12] = [
    "Time",
    "Signal",
    "Strike",
    "Premium",
    "Spot",
    "RSI",
    "VWAP",
    "Day_Open",
    "OI_Trend",
    "Exit_Reason",
    "PnL",
    "Premium_Diff",
];

/// Append-only record of entries and exits
pub trait TradeJournal: Send {
    fn append(&mut self, record: &TradeRecord) -> anyhow::Result<()>;
}

/// One journal row. Market context is only known at entry, P&L only at exit.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub time: NaiveDateTime,
    pub action: String,
    pub strike: f64,
    pub premium: f64,
    pub spot: Option<f64>,
    pub rsi: Option<f64>,
    pub vwap: Option<f64>,
    pub day_open: Option<f64>,
    pub oi_trend: Option<OiTrend>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Option<f64>,
    pub premium_diff: Option<f64>,
}

impl TradeRecord {
    pub fn entry(
        time: NaiveDateTime,
        option_type: OptionType,
        strike: f64,
        premium: f64,
        snapshot: &IndicatorSnapshot,
        oi_trend: OiTrend,
    ) -> Self {
        Self {
            time,
            action: option_type.entry_label().to_string(),
            strike,
            premium,
            spot: Some(snapshot.spot),
            rsi: Some(snapshot.rsi),
            vwap: Some(snapshot.vwap),
            day_open: Some(snapshot.day_open),
            oi_trend: Some(oi_trend),
            exit_reason: None,
            pnl: None,
            premium_diff: None,
        }
    }

    pub fn exit(report: &ExitReport) -> Self {
        Self {
            time: report.exit_time,
            action: format!("EXIT {}", report.direction.entry_label()),
            strike: report.strike,
            premium: report.exit_premium,
            spot: None,
            rsi: None,
            vwap: None,
            day_open: None,
            oi_trend: None,
            exit_reason: Some(report.reason),
            pnl: Some(report.pnl),
            premium_diff: Some(report.premium_diff),
        }
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.time.format("%Y-%m-%d %H:%M:%S").to_string(),
            self.action.clone(),
            self.strike.to_string(),
            format!("{:.2}", self.premium),
            money(self.spot),
            money(self.rsi),
            money(self.vwap),
            money(self.day_open),
            self.oi_trend.map(|t| t.to_string()).unwrap_or_default(),
            self.exit_reason.map(|r| r.to_string()).unwrap_or_default(),
            money(self.pnl),
            money(self.premium_diff),
        ]
    }
}

fn money(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// UTF-8 CSV journal. Appends to an existing file; the header is only
/// written to a new or empty one.
#[derive(Debug, Clone)]
pub struct CsvTradeJournal {
    path: PathBuf,
}

impl CsvTradeJournal {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let is_empty = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        if is_empty {
            let mut writer = csv::Writer::from_path(&path)
                .with_context(|| format!("Failed to create trade log {}", path.display()))?;
            writer.write_record(JOURNAL_HEADER)?;
            writer.flush()?;
            tracing::info!("📝 Created trade log {}", path.display());
        } else {
            tracing::info!("📝 Appending to trade log {}", path.display());
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TradeJournal for CsvTradeJournal {
    fn append(&mut self, record: &TradeRecord) -> anyhow::Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open trade log {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(record.to_row())?;
        writer.flush()?;

        tracing::debug!("Logged {} {} to {}", record.action, record.strike, self.path.display());
        Ok(())
    }
}
