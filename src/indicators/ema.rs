use super::Indicator;

/// EMA seeded with the SMA of the first `period` values.
#[derive(Debug, Clone)]
pub struct EMA {
    period: usize,
    multiplier: f64,
    value: Option<f64>,
    count: usize,
    sum: f64,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        let multiplier = 2.0 / (period as f64 + 1.0);
        Self {
            period,
            multiplier,
            value: None,
            count: 0,
            sum: 0.0,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        self.count += 1;

        if self.count < self.period {
            self.sum += price;
            return None;
        } else if self.count == self.period {
            self.sum += price;
            self.value = Some(self.sum / self.period as f64);
            return self.value;
        }

        if let Some(prev_ema) = self.value {
            self.value = Some((price - prev_ema) * self.multiplier + prev_ema);
        }

        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for EMA {
    fn name(&self) -> &'static str {
        "EMA"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }
}

/// One output per input; `None` during warm-up.
pub fn ema_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut ema = EMA::new(period);
    prices.iter().map(|p| ema.update(*p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_seeds_with_sma() {
        let out = ema_series(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(2.0));
        // multiplier 0.5: (4 - 2) * 0.5 + 2
        assert_eq!(out[3], Some(3.0));
    }

    #[test]
    fn test_ema_ready_after_period() {
        let mut ema = EMA::new(2);
        assert_eq!(ema.update(1.0), None);
        assert!(!ema.is_ready());
        ema.update(1.0);
        assert!(ema.is_ready());
    }
}
