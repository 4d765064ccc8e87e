// Technical indicators module
// Intraday VWAP and RSI over resampled session bars

pub mod resample;
pub mod rsi;
pub mod vwap;

pub use resample::resample_bars;
pub use rsi::{calculate_rsi, calculate_rsi_series, NEUTRAL_RSI};
pub use vwap::{calculate_vwap, calculate_vwap_series};

use crate::models::Bar;

/// Indicator readings for the latest bar of the session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub spot: f64,
    pub day_open: f64,
    pub vwap: f64,
    pub rsi: f64,
}

/// Compute spot, day open, VWAP and RSI from same-session bars
///
/// Returns None only for an empty session.
pub fn compute_snapshot(bars: &[Bar], rsi_period: usize) -> Option<IndicatorSnapshot> {
    let first = bars.first()?;
    let latest = bars.last()?;

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let vwap = calculate_vwap(bars).unwrap_or(latest.close);
    let rsi = calculate_rsi(&closes, rsi_period).unwrap_or(NEUTRAL_RSI);

    Some(IndicatorSnapshot {
        spot: latest.close,
        day_open: first.open,
        vwap,
        rsi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn bar(minute: u32, open: f64, close: f64) -> Bar {
        Bar {
            timestamp: FixedOffset::east_opt(19800)
                .unwrap()
                .with_ymd_and_hms(2025, 1, 7, 10, minute, 0)
                .unwrap(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn test_snapshot_uses_first_open_and_last_close() {
        let bars = vec![bar(0, 90.0, 92.0), bar(5, 92.0, 96.0), bar(10, 96.0, 100.0)];
        let snapshot = compute_snapshot(&bars, 14).unwrap();

        assert_eq!(snapshot.day_open, 90.0);
        assert_eq!(snapshot.spot, 100.0);
        assert!(snapshot.vwap > 90.0 && snapshot.vwap < 100.0);
        assert!((0.0..=100.0).contains(&snapshot.rsi));
    }

    #[test]
    fn test_snapshot_empty_session() {
        assert!(compute_snapshot(&[], 14).is_none());
    }
}
