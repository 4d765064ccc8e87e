use crate::models::Bar;
use chrono::{DateTime, Duration, FixedOffset, Timelike};

/// Aggregate fine-grained bars (1-minute from the broker) into fixed buckets
///
/// Buckets are aligned to multiples of `bucket_minutes` in the bars' local
/// time. Within a bucket: open = first, high = max, low = min, close = last,
/// volume = sum. A source volume of zero counts as 1. Input order does not
/// matter; output is strictly increasing by bucket start and empty buckets
/// are never emitted.
pub fn resample_bars(bars: &[Bar], bucket_minutes: u32) -> Vec<Bar> {
    let bucket_secs = i64::from(bucket_minutes.max(1)) * 60;

    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by_key(|b| b.timestamp);

    let mut buckets: Vec<Bar> = Vec::new();

    for bar in sorted {
        let start = bucket_start(bar.timestamp, bucket_secs);
        let volume = if bar.volume == 0.0 { 1.0 } else { bar.volume };

        match buckets.last_mut() {
            Some(current) if current.timestamp == start => {
                current.high = current.high.max(bar.high);
                current.low = current.low.min(bar.low);
                current.close = bar.close;
                current.volume += volume;
            }
            _ => buckets.push(Bar {
                timestamp: start,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume,
            }),
        }
    }

    buckets
}

fn bucket_start(timestamp: DateTime<FixedOffset>, bucket_secs: i64) -> DateTime<FixedOffset> {
    let secs_into_day = i64::from(timestamp.time().num_seconds_from_midnight());
    let offset = secs_into_day % bucket_secs;
    let floored = timestamp - Duration::seconds(offset);
    floored.with_nanosecond(0).unwrap_or(floored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute_bar(hour: u32, minute: u32, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: FixedOffset::east_opt(19800)
                .unwrap()
                .with_ymd_and_hms(2025, 1, 7, hour, minute, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_aggregates_within_bucket() {
        let bars = vec![
            minute_bar(9, 15, 100.0, 101.0, 99.0, 100.5, 10.0),
            minute_bar(9, 16, 100.5, 103.0, 100.0, 102.0, 20.0),
            minute_bar(9, 17, 102.0, 102.5, 98.0, 99.0, 30.0),
            minute_bar(9, 19, 99.0, 100.0, 98.5, 99.5, 40.0),
        ];

        let resampled = resample_bars(&bars, 5);
        assert_eq!(resampled.len(), 1);

        let bucket = &resampled[0];
        assert_eq!(bucket.timestamp, bars[0].timestamp);
        assert_eq!(bucket.open, 100.0);
        assert_eq!(bucket.high, 103.0);
        assert_eq!(bucket.low, 98.0);
        assert_eq!(bucket.close, 99.5);
        assert_eq!(bucket.volume, 100.0);
    }

    #[test]
    fn test_unsorted_input_and_bucket_boundaries() {
        // Broker returns newest first
        let bars = vec![
            minute_bar(9, 25, 105.0, 106.0, 104.0, 105.5, 5.0),
            minute_bar(9, 20, 101.0, 102.0, 100.0, 101.5, 5.0),
            minute_bar(9, 19, 100.0, 101.0, 99.0, 100.5, 5.0),
            minute_bar(9, 15, 99.0, 100.0, 98.0, 99.5, 5.0),
        ];

        let resampled = resample_bars(&bars, 5);
        let starts: Vec<u32> = resampled.iter().map(|b| b.timestamp.minute()).collect();
        assert_eq!(starts, vec![15, 20, 25]);

        assert_eq!(resampled[0].open, 99.0);
        assert_eq!(resampled[0].close, 100.5);
        assert!(resampled.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_gap_buckets_are_skipped() {
        let bars = vec![
            minute_bar(9, 15, 100.0, 100.0, 100.0, 100.0, 1.0),
            minute_bar(9, 42, 101.0, 101.0, 101.0, 101.0, 1.0),
        ];

        let resampled = resample_bars(&bars, 5);
        assert_eq!(resampled.len(), 2);
        assert_eq!(resampled[1].timestamp.minute(), 40);
    }

    #[test]
    fn test_zero_volume_counts_as_one() {
        let bars = vec![
            minute_bar(9, 15, 100.0, 100.0, 100.0, 100.0, 0.0),
            minute_bar(9, 16, 100.0, 100.0, 100.0, 100.0, 0.0),
        ];

        let resampled = resample_bars(&bars, 5);
        assert_eq!(resampled[0].volume, 2.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(resample_bars(&[], 5).is_empty());
    }
}
