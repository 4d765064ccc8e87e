//! Session-cumulative Volume Weighted Average Price (VWAP)
//!
//! Typical price is (high + low + close) / 3. Every value is the running
//! sum of typical price times volume divided by the running volume since the
//! first bar of the session. When no volume has accumulated the bar's close
//! is used instead.

use crate::models::Bar;

/// VWAP aligned with `bars`
pub fn calculate_vwap_series(bars: &[Bar]) -> Vec<f64> {
    let mut cumulative_tpv = 0.0;
    let mut cumulative_volume = 0.0;

    bars.iter()
        .map(|bar| {
            cumulative_tpv += bar.typical_price() * bar.volume;
            cumulative_volume += bar.volume;

            let vwap = cumulative_tpv / cumulative_volume;
            if cumulative_volume > 0.0 && vwap.is_finite() {
                vwap
            } else {
                bar.close
            }
        })
        .collect()
}

/// VWAP as of the latest bar
pub fn calculate_vwap(bars: &[Bar]) -> Option<f64> {
    calculate_vwap_series(bars).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn bar(minute: u32, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: FixedOffset::east_opt(19800)
                .unwrap()
                .with_ymd_and_hms(2025, 1, 7, 9, 15 + minute, 0)
                .unwrap(),
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_single_bar_vwap_is_typical_price() {
        for volume in [1.0, 250.0, 1_000_000.0] {
            let bars = vec![bar(0, 110.0, 90.0, 100.0, volume)];
            assert!((calculate_vwap(&bars).unwrap() - 100.0).abs() < 1e-9);
        }

        let bars = vec![bar(0, 23520.0, 23480.0, 23510.0, 42.0)];
        let expected = (23520.0 + 23480.0 + 23510.0) / 3.0;
        assert!((calculate_vwap(&bars).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_vwap_is_cumulative() {
        let bars = vec![
            bar(0, 100.0, 100.0, 100.0, 1.0),
            bar(5, 110.0, 110.0, 110.0, 3.0),
        ];

        let series = calculate_vwap_series(&bars);
        assert_eq!(series[0], 100.0);
        // (100 * 1 + 110 * 3) / 4
        assert!((series[1] - 107.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_volume_falls_back_to_close() {
        let bars = vec![bar(0, 110.0, 90.0, 104.0, 0.0)];
        assert_eq!(calculate_vwap(&bars), Some(104.0));
    }

    #[test]
    fn test_empty_bars() {
        assert!(calculate_vwap(&[]).is_none());
    }
}
