use super::Indicator;

/// Wilder RSI on a 0..100 scale.
#[derive(Debug, Clone)]
pub struct RSI {
    period: usize,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
    prev_price: Option<f64>,
    gains: Vec<f64>,
    losses: Vec<f64>,
    value: Option<f64>,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            avg_gain: None,
            avg_loss: None,
            prev_price: None,
            gains: Vec::with_capacity(period),
            losses: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        if let Some(prev) = self.prev_price {
            let change = price - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);

            if self.gains.len() < self.period {
                self.gains.push(gain);
                self.losses.push(loss);

                if self.gains.len() == self.period {
                    let n = self.period as f64;
                    self.avg_gain = Some(self.gains.iter().sum::<f64>() / n);
                    self.avg_loss = Some(self.losses.iter().sum::<f64>() / n);
                    self.value = self.calculate_rsi();
                }
            } else if let (Some(avg_gain), Some(avg_loss)) = (self.avg_gain, self.avg_loss) {
                let n = self.period as f64;
                self.avg_gain = Some((avg_gain * (n - 1.0) + gain) / n);
                self.avg_loss = Some((avg_loss * (n - 1.0) + loss) / n);
                self.value = self.calculate_rsi();
            }
        }

        self.prev_price = Some(price);
        self.value
    }

    fn calculate_rsi(&self) -> Option<f64> {
        match (self.avg_gain, self.avg_loss) {
            (Some(avg_gain), Some(avg_loss)) => {
                if avg_loss == 0.0 && avg_gain == 0.0 {
                    // no movement at all
                    Some(50.0)
                } else if avg_loss == 0.0 {
                    Some(100.0)
                } else {
                    let rs = avg_gain / avg_loss;
                    Some(100.0 - 100.0 / (1.0 + rs))
                }
            }
            _ => None,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Indicator for RSI {
    fn name(&self) -> &'static str {
        "RSI"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_monotonic_rise_is_100() {
        let mut rsi = RSI::new(14);
        let mut last = None;
        for i in 0..20 {
            last = rsi.update(100.0 + i as f64);
        }
        assert_eq!(last, Some(100.0));
    }

    #[test]
    fn test_rsi_warmup_and_bounds() {
        let mut rsi = RSI::new(3);
        assert_eq!(rsi.update(10.0), None);
        assert_eq!(rsi.update(11.0), None);
        assert_eq!(rsi.update(10.0), None);
        let v = rsi.update(12.0).unwrap();
        assert!((0.0..=100.0).contains(&v));
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        let mut rsi = RSI::new(3);
        let mut last = None;
        for _ in 0..6 {
            last = rsi.update(50.0);
        }
        assert_eq!(last, Some(50.0));
    }
}
