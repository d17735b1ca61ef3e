use super::{sma, stddev, Indicator, Window};

/// Bollinger bands over a population std.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
    prices: Window,
    output: Option<BollingerOutput>,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Self {
        Self {
            period,
            std_dev_multiplier,
            prices: Window::new(period),
            output: None,
        }
    }

    pub fn default_params() -> Self {
        Self::new(20, 2.0)
    }

    pub fn update(&mut self, price: f64) -> Option<BollingerOutput> {
        self.prices.push(price);
        if !self.prices.is_full() {
            return None;
        }

        let prices = self.prices.as_vec();
        let middle = sma(&prices, self.period)?;
        let deviation = stddev(&prices, self.period)? * self.std_dev_multiplier;
        let upper = middle + deviation;
        let lower = middle - deviation;

        // (upper - lower) / middle; NaN when the middle band is zero
        let width = if middle != 0.0 {
            (upper - lower) / middle
        } else {
            f64::NAN
        };

        self.output = Some(BollingerOutput {
            upper,
            middle,
            lower,
            width,
        });
        self.output
    }

    pub fn output(&self) -> Option<BollingerOutput> {
        self.output
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &'static str {
        "BollingerBands"
    }

    fn is_ready(&self) -> bool {
        self.output.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_prices_have_zero_width() {
        let mut bb = BollingerBands::new(5, 2.0);
        let mut out = None;
        for _ in 0..5 {
            out = bb.update(10.0);
        }
        let out = out.unwrap();
        assert_eq!(out.middle, 10.0);
        assert_eq!(out.width, 0.0);
    }

    #[test]
    fn test_bands_are_symmetric() {
        let mut bb = BollingerBands::default_params();
        let mut out = None;
        for i in 0..25 {
            out = bb.update(100.0 + (i % 4) as f64);
        }
        let out = out.unwrap();
        assert!(((out.upper - out.middle) - (out.middle - out.lower)).abs() < 1e-9);
        assert!(out.width > 0.0);
    }
}
