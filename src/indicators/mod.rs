pub mod ema;
pub mod rsi;
pub mod macd;
pub mod bollinger;
pub mod atr;
pub mod volume;

pub use ema::*;
pub use rsi::*;
pub use macd::*;
pub use bollinger::*;
pub use atr::*;
pub use volume::*;

use std::collections::VecDeque;

/// Streaming indicator. `update` methods return `None` until warm-up is done.
pub trait Indicator {
    fn name(&self) -> &'static str;
    fn is_ready(&self) -> bool;
}

pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Population standard deviation over the last `period` values.
pub fn stddev(values: &[f64], period: usize) -> Option<f64> {
    let mean = sma(values, period)?;
    let variance = values
        .iter()
        .rev()
        .take(period)
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / period as f64;
    Some(variance.max(0.0).sqrt())
}

/// Sample (n-1) standard deviation over the last `period` values.
pub fn sample_stddev(values: &[f64], period: usize) -> Option<f64> {
    if period < 2 {
        return None;
    }
    let mean = sma(values, period)?;
    let ss = values
        .iter()
        .rev()
        .take(period)
        .map(|v| (v - mean).powi(2))
        .sum::<f64>();
    Some((ss / (period - 1) as f64).max(0.0).sqrt())
}

/// Fixed-capacity window used by the rolling indicators.
#[derive(Debug, Clone)]
pub(crate) struct Window {
    capacity: usize,
    values: VecDeque<f64>,
}

impl Window {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub(crate) fn push(&mut self, value: f64) {
        self.values.push_back(value);
        if self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.values.len() >= self.capacity
    }

    pub(crate) fn as_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}

/// Rolling sample std of a series, e.g. the return volatility feature.
#[derive(Debug, Clone)]
pub struct RollingStd {
    period: usize,
    window: Window,
    value: Option<f64>,
}

impl RollingStd {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: Window::new(period),
            value: None,
        }
    }

    /// NaN inputs reset the warm-up, matching a rolling window that skips
    /// incomplete spans.
    pub fn update(&mut self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            self.window.clear();
            self.value = None;
            return None;
        }
        self.window.push(value);
        self.value = if self.window.is_full() {
            sample_stddev(&self.window.as_vec(), self.period)
        } else {
            None
        };
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Indicator for RollingStd {
    fn name(&self) -> &'static str {
        "RollingStd"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_and_stddev() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(sma(&values, 2), Some(3.5));
        assert_eq!(sma(&values, 5), None);
        assert!((stddev(&values, 4).unwrap() - 1.118_033_988_7).abs() < 1e-9);
        assert!((sample_stddev(&values, 4).unwrap() - 1.290_994_448_7).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_std_warmup() {
        let mut rs = RollingStd::new(3);
        assert_eq!(rs.update(1.0), None);
        assert_eq!(rs.update(2.0), None);
        assert_eq!(rs.update(3.0), Some(1.0));
        assert_eq!(rs.update(f64::NAN), None);
        assert!(!rs.is_ready());
    }
}
