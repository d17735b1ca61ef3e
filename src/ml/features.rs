use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::{
    BollingerBands, Indicator, RollingStd, VolumeProfile, ATR, EMA, MACD, OBV, RSI, VWAP,
};
use crate::types::Bar;

pub const NUM_FEATURES: usize = 18;

/// Longest indicator lookback. Training on fewer bars is rejected.
pub const MIN_HISTORY: usize = 50;

/// Column order of `FeatureRow::values`. Models are trained against this
/// order, so it must not change without retraining.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "rsi_14",
    "ema_9_ratio",
    "ema_21_ratio",
    "ema_50_ratio",
    "macd",
    "macd_signal",
    "macd_histogram",
    "bb_width",
    "atr_pct",
    "volatility",
    "vwap_ratio",
    "obv_ratio",
    "volume_ratio",
    "price_change_pct",
    "hl_pct",
    "co_pct",
    "price_position",
    "log_return",
];

/// Derived indicators for one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub values: [f64; NUM_FEATURES],
}

impl FeatureRow {
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.values[i])
    }

    pub fn is_finite(&self) -> bool {
        self.close.is_finite() && self.values.iter().all(|v| v.is_finite())
    }
}

/// Streaming state for every column. Each update only sees bars up to and
/// including the current one.
struct FeatureState {
    rsi: RSI,
    ema_9: EMA,
    ema_21: EMA,
    ema_50: EMA,
    macd: MACD,
    bollinger: BollingerBands,
    atr: ATR,
    volatility: RollingStd,
    vwap: VWAP,
    obv: OBV,
    volume: VolumeProfile,
    prev_close: Option<f64>,
}

impl FeatureState {
    fn new() -> Self {
        Self {
            rsi: RSI::new(14),
            ema_9: EMA::new(9),
            ema_21: EMA::new(21),
            ema_50: EMA::new(50),
            macd: MACD::default_params(),
            bollinger: BollingerBands::default_params(),
            atr: ATR::new(14),
            volatility: RollingStd::new(20),
            vwap: VWAP::new(),
            obv: OBV::new(),
            volume: VolumeProfile::new(20),
            prev_close: None,
        }
    }

    fn indicators(&self) -> [&dyn Indicator; 11] {
        [
            &self.rsi,
            &self.ema_9,
            &self.ema_21,
            &self.ema_50,
            &self.macd,
            &self.bollinger,
            &self.atr,
            &self.volatility,
            &self.vwap,
            &self.obv,
            &self.volume,
        ]
    }

    /// Names of indicators that have not produced a value yet.
    fn warming_up(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .indicators()
            .iter()
            .filter(|i| !i.is_ready())
            .map(|i| i.name())
            .collect();
        names.dedup();
        names
    }

    fn update(&mut self, bar: &Bar) -> FeatureRow {
        let b = bar.to_f64();
        let close = b.close;
        let nan = f64::NAN;

        let ratio_to_close = |v: Option<f64>| v.map_or(nan, |v| v / close - 1.0);
        let over_close = |v: Option<f64>| v.map_or(nan, |v| v / close);

        let rsi = self.rsi.update(close).map_or(nan, |v| v / 100.0);
        let ema_9 = ratio_to_close(self.ema_9.update(close));
        let ema_21 = ratio_to_close(self.ema_21.update(close));
        let ema_50 = ratio_to_close(self.ema_50.update(close));

        let macd = self.macd.update(close);
        let macd_line = over_close(macd.map(|m| m.macd_line));
        let macd_signal = over_close(macd.map(|m| m.signal_line));
        let macd_histogram = over_close(macd.map(|m| m.histogram));

        let bb_width = self.bollinger.update(close).map_or(nan, |o| o.width);
        let atr_pct = over_close(self.atr.update(b.high, b.low, close));

        let price_change = self.prev_close.map_or(nan, |p| close / p - 1.0);
        let log_return = self.prev_close.map_or(nan, |p| (close / p).ln());
        self.prev_close = Some(close);

        let volatility = self.volatility.update(price_change).unwrap_or(nan);

        let vwap_ratio = self
            .vwap
            .update(b.high, b.low, close, b.volume)
            .map_or(nan, |v| close / v - 1.0);

        self.obv.update(close, b.volume);
        let obv_ratio = self.obv.ratio().unwrap_or(nan);

        self.volume.update(b.volume);
        let volume_ratio = self.volume.relative_volume(b.volume).unwrap_or(nan);

        let range = b.high - b.low;
        let price_position = if range != 0.0 {
            (close - b.low) / range
        } else {
            nan
        };

        FeatureRow {
            timestamp: bar.timestamp,
            close,
            values: [
                rsi,
                ema_9,
                ema_21,
                ema_50,
                macd_line,
                macd_signal,
                macd_histogram,
                bb_width,
                atr_pct,
                volatility,
                vwap_ratio,
                obv_ratio,
                volume_ratio,
                price_change,
                range / close,
                (close - b.open) / b.open,
                price_position,
                log_return,
            ],
        }
    }
}

/// Computes one sanitized feature row per bar.
///
/// Bars are expected to be cleaned and ascending (see `BarSeries::clean`).
/// The output has the same length as the input and every value is finite.
pub fn extract_features(bars: &[Bar]) -> Vec<FeatureRow> {
    let mut state = FeatureState::new();
    let mut rows: Vec<FeatureRow> = bars.iter().map(|bar| state.update(bar)).collect();

    let pending = state.warming_up();
    if !pending.is_empty() {
        debug!(
            "{} bars too short to warm up {}; their columns are zero-filled",
            bars.len(),
            pending.join(", ")
        );
    }
    sanitize_columns(&mut rows);
    rows
}

/// Forward-fills NaN per column, zero-fills what is left (leading warm-up
/// values), then maps infinities to zero.
pub fn sanitize_columns(rows: &mut [FeatureRow]) {
    let mut last_seen: [Option<f64>; NUM_FEATURES] = [None; NUM_FEATURES];

    for row in rows.iter_mut() {
        for (col, value) in row.values.iter_mut().enumerate() {
            if value.is_nan() {
                *value = last_seen[col].unwrap_or(0.0);
            } else {
                last_seen[col] = Some(*value);
            }
            if value.is_infinite() {
                *value = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn make_bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let wave = Decimal::from((i % 7) as i64) - dec!(3);
                let close = dec!(100) + wave + Decimal::from(i as i64) / dec!(10);
                Bar::new(
                    start + Duration::minutes(5 * i as i64),
                    close - dec!(0.2),
                    close + dec!(0.5),
                    close - dec!(0.5),
                    close,
                    dec!(1000) + Decimal::from((i * 13 % 50) as i64),
                )
            })
            .collect()
    }

    #[test]
    fn test_output_matches_input_length_and_is_finite() {
        let bars = make_bars(120);
        let rows = extract_features(&bars);
        assert_eq!(rows.len(), bars.len());
        assert!(rows.iter().all(|r| r.is_finite()));
    }

    #[test]
    fn test_warmup_columns_are_zero_filled() {
        let rows = extract_features(&make_bars(60));
        // EMA(50) seeds on bar 49
        assert_eq!(rows[0].get("ema_50_ratio"), Some(0.0));
        assert_ne!(rows[55].get("ema_50_ratio"), Some(0.0));
        // first bar has no previous close
        assert_eq!(rows[0].get("log_return"), Some(0.0));
    }

    #[test]
    fn test_warming_up_lists_unready_indicators() {
        let bars = make_bars(120);

        let mut state = FeatureState::new();
        for bar in &bars[..10] {
            state.update(bar);
        }
        let pending = state.warming_up();
        assert!(pending.contains(&"RSI"));
        assert!(pending.contains(&"MACD"));
        assert_eq!(pending.iter().filter(|n| **n == "EMA").count(), 1);
        assert!(!pending.contains(&"VWAP"));
        assert!(!pending.contains(&"OBV"));

        for bar in &bars[10..] {
            state.update(bar);
        }
        assert!(state.warming_up().is_empty());
    }

    #[test]
    fn test_flat_bar_position_is_forward_filled() {
        let mut bars = make_bars(10);
        let c = bars[5].close;
        bars[5].open = c;
        bars[5].high = c;
        bars[5].low = c;

        let rows = extract_features(&bars);
        let col = FEATURE_NAMES.iter().position(|n| *n == "price_position").unwrap();
        assert_eq!(rows[5].values[col], rows[4].values[col]);
    }

    #[test]
    fn test_sanitize_order() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut rows = vec![
            FeatureRow { timestamp: ts, close: 1.0, values: [f64::NAN; NUM_FEATURES] },
            FeatureRow { timestamp: ts, close: 1.0, values: [2.0; NUM_FEATURES] },
            FeatureRow { timestamp: ts, close: 1.0, values: [f64::NAN; NUM_FEATURES] },
            FeatureRow { timestamp: ts, close: 1.0, values: [f64::INFINITY; NUM_FEATURES] },
        ];
        sanitize_columns(&mut rows);
        assert_eq!(rows[0].values[0], 0.0);
        assert_eq!(rows[2].values[0], 2.0);
        assert_eq!(rows[3].values[0], 0.0);
    }

    #[test]
    fn test_feature_names_are_unique() {
        let mut names = FEATURE_NAMES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), NUM_FEATURES);
    }
}
