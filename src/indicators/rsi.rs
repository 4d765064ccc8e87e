/// Cold-start reading for a session with a single close
pub const NEUTRAL_RSI: f64 = 50.0;

/// Calculate Relative Strength Index (RSI) for every close
///
/// Uses simple moving averages of gains and losses over the trailing `period`
/// deltas. Early values average over however many deltas exist, so the series
/// has the same length as `closes`. The first close has no prior close and
/// contributes a zero delta; its reading is [`NEUTRAL_RSI`]. A window with no
/// losses has RS = 0 and therefore RSI = 0.
///
/// Values:
/// - RSI > 60: Bullish momentum
/// - RSI < 40: Bearish momentum
///
pub fn calculate_rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);

    let mut gains = Vec::with_capacity(closes.len());
    let mut losses = Vec::with_capacity(closes.len());

    for (i, close) in closes.iter().enumerate() {
        let change = if i == 0 { 0.0 } else { close - closes[i - 1] };
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    (0..closes.len())
        .map(|i| {
            if i == 0 {
                return NEUTRAL_RSI;
            }

            let start = (i + 1).saturating_sub(period);
            let window = (i + 1 - start) as f64;

            let avg_gain = gains[start..=i].iter().sum::<f64>() / window;
            let avg_loss = losses[start..=i].iter().sum::<f64>() / window;

            rsi_from_averages(avg_gain, avg_loss)
        })
        .collect()
}

/// RSI of the latest close, or None for an empty series
pub fn calculate_rsi(closes: &[f64], period: usize) -> Option<f64> {
    calculate_rsi_series(closes, period).last().copied()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    let rs = if avg_loss > 0.0 { avg_gain / avg_loss } else { 0.0 };
    let rsi = 100.0 - (100.0 / (1.0 + rs));

    if rsi.is_finite() {
        rsi.clamp(0.0, 100.0)
    } else {
        NEUTRAL_RSI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_calculation() {
        let closes = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];

        let rsi = calculate_rsi(&closes, 14).unwrap();
        assert!(rsi > 0.0 && rsi < 100.0);
        // Mostly gains over the window
        assert!(rsi > 60.0);
    }

    #[test]
    fn test_rsi_known_value() {
        // Deltas: 0, +2, -1 -> avg_gain = 2/3, avg_loss = 1/3, RS = 2
        let rsi = calculate_rsi(&[100.0, 102.0, 101.0], 14).unwrap();
        assert!((rsi - (100.0 - 100.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_window_drops_old_deltas() {
        // With period 2 only the last two deltas count: -1 and +3
        let rsi = calculate_rsi(&[100.0, 110.0, 109.0, 112.0], 2).unwrap();
        assert!((rsi - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_single_bar_is_neutral() {
        assert_eq!(calculate_rsi(&[23500.0], 14), Some(NEUTRAL_RSI));
    }

    #[test]
    fn test_rsi_empty() {
        assert!(calculate_rsi(&[], 14).is_none());
        assert!(calculate_rsi_series(&[], 14).is_empty());
    }

    #[test]
    fn test_rsi_without_losses_is_zero() {
        let rising = vec![100.0, 101.0, 102.0, 103.0, 104.0];
        assert_eq!(calculate_rsi(&rising, 14), Some(0.0));

        let flat = vec![23500.0; 6];
        assert_eq!(calculate_rsi(&flat, 14), Some(0.0));
    }

    #[test]
    fn test_rsi_series_starts_neutral() {
        let series = calculate_rsi_series(&[100.0, 101.0, 100.0], 14);
        assert_eq!(series[0], NEUTRAL_RSI);
        assert_eq!(series[1], 0.0);
        assert!((series[2] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_all_losses() {
        let closes = vec![105.0, 104.0, 103.0, 102.0, 101.0, 100.0];
        assert_eq!(calculate_rsi(&closes, 14), Some(0.0));
    }

    #[test]
    fn test_rsi_series_bounded() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 23500.0 + ((i * 37) % 23) as f64 * 3.5 - ((i * 11) % 7) as f64 * 9.0)
            .collect();

        let series = calculate_rsi_series(&closes, 14);
        assert_eq!(series.len(), closes.len());
        assert!(series.iter().all(|rsi| (0.0..=100.0).contains(rsi)));
    }
}
