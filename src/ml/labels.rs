use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SignalError};
use crate::ml::features::FeatureRow;
use crate::types::Signal;

/// Minimum share of Buy or Sell labels before a warning is raised.
pub const IMBALANCE_FLOOR: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassDistribution {
    pub counts: [usize; Signal::COUNT],
    pub ratios: [f64; Signal::COUNT],
}

impl ClassDistribution {
    pub fn from_labels(labels: &[Signal]) -> Self {
        let mut counts = [0usize; Signal::COUNT];
        for label in labels {
            counts[label.index()] += 1;
        }
        let total = labels.len().max(1) as f64;
        let ratios = counts.map(|c| c as f64 / total);
        Self { counts, ratios }
    }

    pub fn count(&self, signal: Signal) -> usize {
        self.counts[signal.index()]
    }

    pub fn ratio(&self, signal: Signal) -> f64 {
        self.ratios[signal.index()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Soft warning: one of the directional classes is rare. Never alters labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassImbalanceWarning {
    pub sell_ratio: f64,
    pub buy_ratio: f64,
    pub floor: f64,
}

#[derive(Debug, Clone)]
pub struct LabeledSeries {
    pub rows: Vec<FeatureRow>,
    pub labels: Vec<Signal>,
    pub future_returns: Vec<f64>,
    pub distribution: ClassDistribution,
    pub imbalance: Option<ClassImbalanceWarning>,
}

impl LabeledSeries {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub fn classify_return(future_return: f64, threshold: f64) -> Signal {
    if future_return > threshold {
        Signal::Buy
    } else if future_return < -threshold {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

/// Labels each row from the next row's return. The last row has no future
/// and is dropped, so `rows.len()` shrinks by one.
pub fn generate_labels(mut rows: Vec<FeatureRow>, threshold: f64) -> Result<LabeledSeries> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(SignalError::input(format!(
            "label threshold must be finite and non-negative, got {}",
            threshold
        )));
    }
    if rows.len() < 2 {
        return Err(SignalError::input(format!(
            "need at least 2 rows to label, got {}",
            rows.len()
        )));
    }

    let future_returns: Vec<f64> = rows
        .windows(2)
        .map(|w| w[1].close / w[0].close - 1.0)
        .collect();
    let labels: Vec<Signal> = future_returns
        .iter()
        .map(|r| classify_return(*r, threshold))
        .collect();
    rows.truncate(labels.len());

    let distribution = ClassDistribution::from_labels(&labels);
    info!(
        "Label distribution: Sell={} Hold={} Buy={}",
        distribution.count(Signal::Sell),
        distribution.count(Signal::Hold),
        distribution.count(Signal::Buy)
    );

    let sell_ratio = distribution.ratio(Signal::Sell);
    let buy_ratio = distribution.ratio(Signal::Buy);
    let imbalance = if sell_ratio < IMBALANCE_FLOOR || buy_ratio < IMBALANCE_FLOOR {
        warn!(
            "Class imbalance: Sell {:.1}%, Buy {:.1}% (floor {:.0}%)",
            sell_ratio * 100.0,
            buy_ratio * 100.0,
            IMBALANCE_FLOOR * 100.0
        );
        Some(ClassImbalanceWarning {
            sell_ratio,
            buy_ratio,
            floor: IMBALANCE_FLOOR,
        })
    } else {
        None
    };

    Ok(LabeledSeries {
        rows,
        labels,
        future_returns,
        distribution,
        imbalance,
    })
}
