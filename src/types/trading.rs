use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SignalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,   // 1 minute
    M5,   // 5 minutes
    M15,  // 15 minutes
    H1,   // 1 hour
    H4,   // 4 hours
    D1,   // 1 day
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M5 => "5m",
            TimeFrame::M15 => "15m",
            TimeFrame::H1 => "1h",
            TimeFrame::H4 => "4h",
            TimeFrame::D1 => "1d",
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimeFrame {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "M1" | "1M" => Ok(TimeFrame::M1),
            "M5" | "5M" => Ok(TimeFrame::M5),
            "M15" | "15M" => Ok(TimeFrame::M15),
            "H1" | "1H" => Ok(TimeFrame::H1),
            "H4" | "4H" => Ok(TimeFrame::H4),
            "D1" | "1D" => Ok(TimeFrame::D1),
            _ => Err(SignalError::input(format!("unknown timeframe: {}", s))),
        }
    }
}

/// Three-way trading signal. The discriminants are the class indices used by
/// labels and model outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Signal {
    Sell = 0,
    Hold = 1,
    Buy = 2,
}

impl Signal {
    pub const COUNT: usize = 3;
    pub const ALL: [Signal; 3] = [Signal::Sell, Signal::Hold, Signal::Buy];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Signal::Sell),
            1 => Some(Signal::Hold),
            2 => Some(Signal::Buy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Sell => "Sell",
            Signal::Hold => "Hold",
            Signal::Buy => "Buy",
        }
    }

    pub fn is_directional(&self) -> bool {
        matches!(self, Signal::Buy | Signal::Sell)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("5m".parse::<TimeFrame>().unwrap(), TimeFrame::M5);
        assert_eq!("H1".parse::<TimeFrame>().unwrap(), TimeFrame::H1);
        assert_eq!(TimeFrame::M15.to_string(), "15m");
        assert!("7m".parse::<TimeFrame>().is_err());
    }

    #[test]
    fn test_signal_indices() {
        for signal in Signal::ALL {
            assert_eq!(Signal::from_index(signal.index()), Some(signal));
        }
        assert_eq!(Signal::from_index(3), None);
        assert!(Signal::Buy.is_directional());
        assert!(!Signal::Hold.is_directional());
    }
}
