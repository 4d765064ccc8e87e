use crate::models::{OiTrend, OptionType};

/// Aggregated open interest across the strike window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OiSummary {
    pub trend: OiTrend,
    pub call_oi: f64,
    pub put_oi: f64,
}

impl OiSummary {
    pub fn unknown() -> Self {
        Self {
            trend: OiTrend::Unknown,
            call_oi: 0.0,
            put_oi: 0.0,
        }
    }
}

/// Classify option-chain open interest into a directional bias
///
/// Heavy put writing is read as support (bullish) and heavy call writing as
/// resistance (bearish). A side needs more than `bias_ratio` times the other
/// side's total to count. No data at all is `Unknown`, never `Sideways`.
pub fn classify_open_interest<I>(entries: I, bias_ratio: f64) -> OiSummary
where
    I: IntoIterator<Item = (OptionType, f64)>,
{
    let mut call_oi = 0.0;
    let mut put_oi = 0.0;

    for (option_type, oi) in entries {
        if !oi.is_finite() || oi < 0.0 {
            continue;
        }
        match option_type {
            OptionType::Call => call_oi += oi,
            OptionType::Put => put_oi += oi,
        }
    }

    if call_oi == 0.0 && put_oi == 0.0 {
        return OiSummary::unknown();
    }

    let trend = if put_oi > call_oi * bias_ratio {
        OiTrend::Bullish
    } else if call_oi > put_oi * bias_ratio {
        OiTrend::Bearish
    } else {
        OiTrend::Sideways
    };

    OiSummary {
        trend,
        call_oi,
        put_oi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(call: f64, put: f64) -> OiSummary {
        classify_open_interest(
            vec![(OptionType::Call, call), (OptionType::Put, put)],
            1.05,
        )
    }

    #[test]
    fn test_more_put_oi_is_bullish() {
        let summary = totals(100.0, 200.0);
        assert_eq!(summary.trend, OiTrend::Bullish);
        assert_eq!(summary.call_oi, 100.0);
        assert_eq!(summary.put_oi, 200.0);
    }

    #[test]
    fn test_more_call_oi_is_bearish() {
        assert_eq!(totals(200.0, 100.0).trend, OiTrend::Bearish);
    }

    #[test]
    fn test_within_band_is_sideways() {
        assert_eq!(totals(100.0, 104.0).trend, OiTrend::Sideways);
        assert_eq!(totals(104.0, 100.0).trend, OiTrend::Sideways);
        assert_eq!(totals(100.0, 100.0).trend, OiTrend::Sideways);
    }

    #[test]
    fn test_no_data_is_unknown_not_sideways() {
        let summary = totals(0.0, 0.0);
        assert_eq!(summary.trend, OiTrend::Unknown);
        assert_eq!(summary, OiSummary::unknown());

        let empty = classify_open_interest(Vec::<(OptionType, f64)>::new(), 1.05);
        assert_eq!(empty.trend, OiTrend::Unknown);
    }

    #[test]
    fn test_sums_across_contracts() {
        let entries = vec![
            (OptionType::Call, 1_000.0),
            (OptionType::Put, 2_500.0),
            (OptionType::Call, 1_500.0),
            (OptionType::Put, 500.0),
        ];
        let summary = classify_open_interest(entries, 1.05);
        assert_eq!(summary.call_oi, 2_500.0);
        assert_eq!(summary.put_oi, 3_000.0);
        assert_eq!(summary.trend, OiTrend::Bullish);
    }

    #[test]
    fn test_one_sided_data() {
        assert_eq!(totals(0.0, 50.0).trend, OiTrend::Bullish);
        assert_eq!(totals(50.0, 0.0).trend, OiTrend::Bearish);
    }

    #[test]
    fn test_invalid_values_ignored() {
        let summary = classify_open_interest(
            vec![(OptionType::Call, f64::NAN), (OptionType::Put, -5.0)],
            1.05,
        );
        assert_eq!(summary.trend, OiTrend::Unknown);
    }
}
