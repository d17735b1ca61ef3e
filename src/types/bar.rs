use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One OHLCV observation for a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Positive prices and volume, and a high/low range that contains the body.
    pub fn is_valid(&self) -> bool {
        let positive = self.open > Decimal::ZERO
            && self.high > Decimal::ZERO
            && self.low > Decimal::ZERO
            && self.close > Decimal::ZERO
            && self.volume > Decimal::ZERO;

        positive
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }

    /// Lossy conversion used by the feature pipeline.
    pub fn to_f64(&self) -> BarF64 {
        BarF64 {
            open: self.open.to_f64().unwrap_or(f64::NAN),
            high: self.high.to_f64().unwrap_or(f64::NAN),
            low: self.low.to_f64().unwrap_or(f64::NAN),
            close: self.close.to_f64().unwrap_or(f64::NAN),
            volume: self.volume.to_f64().unwrap_or(f64::NAN),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarF64 {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Counts of bars removed while cleaning a raw series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub received: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

impl CleaningReport {
    pub fn kept(&self) -> usize {
        self.received - self.duplicates - self.invalid
    }
}

/// Ordered, deduplicated, validated bar history.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Sorts by timestamp, drops repeated timestamps (first one wins) and
    /// drops bars that break the OHLCV invariants.
    pub fn clean(raw: &[Bar]) -> (Self, CleaningReport) {
        let mut report = CleaningReport {
            received: raw.len(),
            ..Default::default()
        };

        let mut sorted: Vec<&Bar> = raw.iter().collect();
        sorted.sort_by_key(|b| b.timestamp);

        let mut bars: Vec<Bar> = Vec::with_capacity(sorted.len());
        let mut last_ts: Option<DateTime<Utc>> = None;
        for bar in sorted {
            if last_ts == Some(bar.timestamp) {
                report.duplicates += 1;
                continue;
            }
            last_ts = Some(bar.timestamp);

            if !bar.is_valid() {
                report.invalid += 1;
                continue;
            }
            bars.push(bar.clone());
        }

        if report.duplicates > 0 || report.invalid > 0 {
            warn!(
                "Bar cleaning dropped {} duplicate and {} invalid bars ({} kept of {})",
                report.duplicates,
                report.invalid,
                report.kept(),
                report.received
            );
        }

        (Self { bars }, report)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn bar_at(minute: i64, close: Decimal) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap() + Duration::minutes(minute);
        Bar::new(ts, close, close + dec!(1), close - dec!(1), close, dec!(1000))
    }

    #[test]
    fn test_bar_validity() {
        let bar = bar_at(0, dec!(100));
        assert!(bar.is_valid());

        let mut high_below_close = bar.clone();
        high_below_close.high = dec!(99);
        assert!(!high_below_close.is_valid());

        let mut zero_volume = bar.clone();
        zero_volume.volume = Decimal::ZERO;
        assert!(!zero_volume.is_valid());

        let mut negative_low = bar;
        negative_low.low = dec!(-1);
        assert!(!negative_low.is_valid());
    }

    #[test]
    fn test_clean_sorts_dedupes_and_filters() {
        let mut invalid = bar_at(3, dec!(103));
        invalid.volume = Decimal::ZERO;

        let raw = vec![
            bar_at(2, dec!(102)),
            bar_at(0, dec!(100)),
            bar_at(1, dec!(101)),
            bar_at(1, dec!(555)),
            invalid,
        ];

        let (series, report) = BarSeries::clean(&raw);
        assert_eq!(report.received, 5);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.kept(), 3);
        let closes: Vec<Decimal> = series.bars().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![dec!(100), dec!(101), dec!(102)]);
    }
}
