use super::{ema::EMA, Indicator};

#[derive(Debug, Clone)]
pub struct MACD {
    fast_ema: EMA,
    slow_ema: EMA,
    signal_ema: EMA,
    macd_line: Option<f64>,
    signal_line: Option<f64>,
    histogram: Option<f64>,
}

impl MACD {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_ema: EMA::new(fast_period),
            slow_ema: EMA::new(slow_period),
            signal_ema: EMA::new(signal_period),
            macd_line: None,
            signal_line: None,
            histogram: None,
        }
    }

    pub fn default_params() -> Self {
        Self::new(12, 26, 9)
    }

    /// Returns a full output only once the signal EMA is seeded.
    pub fn update(&mut self, price: f64) -> Option<MACDOutput> {
        let fast = self.fast_ema.update(price);
        let slow = self.slow_ema.update(price);

        if let (Some(f), Some(s)) = (fast, slow) {
            let macd_line = f - s;
            self.macd_line = Some(macd_line);

            if let Some(signal) = self.signal_ema.update(macd_line) {
                let histogram = macd_line - signal;
                self.signal_line = Some(signal);
                self.histogram = Some(histogram);

                return Some(MACDOutput {
                    macd_line,
                    signal_line: signal,
                    histogram,
                });
            }
        }

        None
    }

    pub fn macd_line(&self) -> Option<f64> {
        self.macd_line
    }

    pub fn signal_line(&self) -> Option<f64> {
        self.signal_line
    }

    pub fn histogram(&self) -> Option<f64> {
        self.histogram
    }
}

impl Indicator for MACD {
    fn name(&self) -> &'static str {
        "MACD"
    }

    fn is_ready(&self) -> bool {
        self.histogram.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MACDOutput {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_warmup_length() {
        let mut macd = MACD::default_params();
        let mut first_ready = None;
        for i in 0..60 {
            if macd.update(100.0 + (i as f64).sin()).is_some() && first_ready.is_none() {
                first_ready = Some(i);
            }
        }
        // slow EMA seeds at index 25, signal needs 8 more
        assert_eq!(first_ready, Some(33));
    }

    #[test]
    fn test_macd_histogram_identity() {
        let mut macd = MACD::new(3, 6, 3);
        let mut out = None;
        for i in 0..30 {
            out = macd.update(i as f64 * 1.5);
        }
        let out = out.unwrap();
        assert!((out.histogram - (out.macd_line - out.signal_line)).abs() < 1e-12);
    }
}
