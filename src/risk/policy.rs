use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SignalError};
use crate::types::Signal;

pub const MIN_RISK_TOLERANCE: u8 = 1;
pub const MAX_RISK_TOLERANCE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    /// Tolerance at which the confidence bar equals `base_threshold`.
    pub neutral_tolerance: u8,
    pub base_threshold: f64,
    /// Threshold change per tolerance step away from neutral.
    pub threshold_step: f64,
    /// Below this tolerance every Buy/Sell becomes Hold.
    pub conservative_cutoff: u8,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            neutral_tolerance: 5,
            base_threshold: 0.5,
            threshold_step: 0.05,
            conservative_cutoff: 4,
        }
    }
}

impl RiskSettings {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(MIN_RISK_TOLERANCE..=MAX_RISK_TOLERANCE).contains(&self.neutral_tolerance) {
            return Err(format!(
                "neutral_tolerance must be between {} and {}",
                MIN_RISK_TOLERANCE, MAX_RISK_TOLERANCE
            ));
        }
        if !(0.0..=1.0).contains(&self.base_threshold) {
            return Err("base_threshold must be between 0 and 1".to_string());
        }
        if !(self.threshold_step >= 0.0 && self.threshold_step.is_finite()) {
            return Err("threshold_step must be >= 0".to_string());
        }
        if self.conservative_cutoff > MAX_RISK_TOLERANCE + 1 {
            return Err("conservative_cutoff must be <= 11".to_string());
        }
        Ok(())
    }
}

/// Why a directional call was turned into Hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideReason {
    BelowThreshold { threshold: f64 },
    ConservativeTolerance { cutoff: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub action: Signal,
    pub threshold: f64,
    pub overridden: Option<OverrideReason>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskPolicy {
    settings: RiskSettings,
}

impl RiskPolicy {
    pub fn new(settings: RiskSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    pub fn check_tolerance(risk_tolerance: u8) -> Result<()> {
        if !(MIN_RISK_TOLERANCE..=MAX_RISK_TOLERANCE).contains(&risk_tolerance) {
            return Err(SignalError::input(format!(
                "risk_tolerance must be between {} and {}, got {}",
                MIN_RISK_TOLERANCE, MAX_RISK_TOLERANCE, risk_tolerance
            )));
        }
        Ok(())
    }

    /// Minimum confidence for the model's call to stand. Higher tolerance
    /// means a lower bar.
    pub fn threshold(&self, risk_tolerance: u8) -> f64 {
        let offset = self.settings.neutral_tolerance as f64 - risk_tolerance as f64;
        self.settings.base_threshold + offset * self.settings.threshold_step
    }

    pub fn evaluate(&self, action: Signal, confidence: f64, risk_tolerance: u8) -> Result<RiskDecision> {
        Self::check_tolerance(risk_tolerance)?;
        let threshold = self.threshold(risk_tolerance);

        let overridden = if confidence < threshold {
            Some(OverrideReason::BelowThreshold { threshold })
        } else if risk_tolerance < self.settings.conservative_cutoff && action.is_directional() {
            Some(OverrideReason::ConservativeTolerance {
                cutoff: self.settings.conservative_cutoff,
            })
        } else {
            None
        };

        let adjusted = match overridden {
            Some(reason) => {
                if action != Signal::Hold {
                    debug!(
                        "Risk override: {} -> HOLD (confidence={:.3}, tolerance={}, {:?})",
                        action, confidence, risk_tolerance, reason
                    );
                }
                Signal::Hold
            }
            None => action,
        };

        Ok(RiskDecision {
            action: adjusted,
            threshold,
            overridden,
        })
    }

    pub fn adjust(&self, action: Signal, confidence: f64, risk_tolerance: u8) -> Result<Signal> {
        Ok(self.evaluate(action, confidence, risk_tolerance)?.action)
    }
}
