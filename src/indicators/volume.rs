use super::{sma, Indicator, Window};

/// Rolling mean volume and relative volume against it.
#[derive(Debug, Clone)]
pub struct VolumeProfile {
    period: usize,
    volumes: Window,
    avg_volume: Option<f64>,
}

impl VolumeProfile {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            volumes: Window::new(period),
            avg_volume: None,
        }
    }

    pub fn update(&mut self, volume: f64) -> Option<f64> {
        self.volumes.push(volume);
        if self.volumes.is_full() {
            self.avg_volume = sma(&self.volumes.as_vec(), self.period);
        }
        self.avg_volume
    }

    pub fn avg_volume(&self) -> Option<f64> {
        self.avg_volume
    }

    pub fn relative_volume(&self, current_volume: f64) -> Option<f64> {
        self.avg_volume.map(|avg| {
            if avg == 0.0 {
                1.0
            } else {
                current_volume / avg
            }
        })
    }
}

impl Indicator for VolumeProfile {
    fn name(&self) -> &'static str {
        "VolumeProfile"
    }

    fn is_ready(&self) -> bool {
        self.avg_volume.is_some()
    }
}

/// On-balance volume, tracked together with cumulative volume so callers can
/// express it as a bounded ratio.
#[derive(Debug, Clone, Default)]
pub struct OBV {
    value: f64,
    cumulative_volume: f64,
    prev_close: Option<f64>,
}

impl OBV {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, close: f64, volume: f64) -> f64 {
        if let Some(prev) = self.prev_close {
            if close > prev {
                self.value += volume;
            } else if close < prev {
                self.value -= volume;
            }
        }
        self.cumulative_volume += volume;
        self.prev_close = Some(close);
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// OBV / cumulative volume, in [-1, 1].
    pub fn ratio(&self) -> Option<f64> {
        if self.cumulative_volume > 0.0 {
            Some(self.value / self.cumulative_volume)
        } else {
            None
        }
    }
}

impl Indicator for OBV {
    fn name(&self) -> &'static str {
        "OBV"
    }

    fn is_ready(&self) -> bool {
        self.prev_close.is_some()
    }
}

/// Cumulative typical-price VWAP since the first bar.
#[derive(Debug, Clone, Default)]
pub struct VWAP {
    cumulative_tp_volume: f64,
    cumulative_volume: f64,
    value: Option<f64>,
}

impl VWAP {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64, volume: f64) -> Option<f64> {
        let typical_price = (high + low + close) / 3.0;
        self.cumulative_tp_volume += typical_price * volume;
        self.cumulative_volume += volume;

        if self.cumulative_volume != 0.0 {
            self.value = Some(self.cumulative_tp_volume / self.cumulative_volume);
        }

        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Indicator for VWAP {
    fn name(&self) -> &'static str {
        "VWAP"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obv_ratio() {
        let mut obv = OBV::new();
        obv.update(10.0, 100.0);
        obv.update(11.0, 100.0);
        obv.update(10.5, 50.0);
        assert_eq!(obv.value(), 50.0);
        assert!((obv.ratio().unwrap() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_vwap_weights_by_volume() {
        let mut vwap = VWAP::new();
        vwap.update(10.0, 10.0, 10.0, 1.0);
        let v = vwap.update(20.0, 20.0, 20.0, 3.0).unwrap();
        assert_eq!(v, 17.5);
    }

    #[test]
    fn test_relative_volume() {
        let mut vp = VolumeProfile::new(2);
        assert_eq!(vp.update(100.0), None);
        assert_eq!(vp.update(300.0), Some(200.0));
        assert_eq!(vp.relative_volume(400.0), Some(2.0));
    }
}
