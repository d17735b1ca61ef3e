use super::Indicator;

/// Wilder-smoothed average true range.
#[derive(Debug, Clone)]
pub struct ATR {
    period: usize,
    prev_close: Option<f64>,
    seed: Vec<f64>,
    value: Option<f64>,
}

impl ATR {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seed: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = self.true_range(high, low);
        self.prev_close = Some(close);

        match self.value {
            Some(prev_atr) => {
                let n = self.period as f64;
                self.value = Some((prev_atr * (n - 1.0) + tr) / n);
            }
            None => {
                self.seed.push(tr);
                if self.seed.len() == self.period {
                    self.value = Some(self.seed.iter().sum::<f64>() / self.period as f64);
                    self.seed.clear();
                }
            }
        }

        self.value
    }

    fn true_range(&self, high: f64, low: f64) -> f64 {
        let hl = high - low;
        match self.prev_close {
            Some(prev_close) => {
                let hc = (high - prev_close).abs();
                let lc = (low - prev_close).abs();
                hl.max(hc).max(lc)
            }
            None => hl,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Indicator for ATR {
    fn name(&self) -> &'static str {
        "ATR"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atr_constant_range() {
        let mut atr = ATR::new(3);
        assert_eq!(atr.update(11.0, 9.0, 10.0), None);
        assert_eq!(atr.update(11.0, 9.0, 10.0), None);
        assert_eq!(atr.update(11.0, 9.0, 10.0), Some(2.0));
        assert_eq!(atr.update(11.0, 9.0, 10.0), Some(2.0));
    }

    #[test]
    fn test_true_range_uses_gap() {
        let mut atr = ATR::new(1);
        atr.update(11.0, 9.0, 10.0);
        // gap up: |15 - 10| dominates 15 - 14
        assert_eq!(atr.update(15.0, 14.0, 14.5), Some(5.0));
    }
}
