use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};
use crate::ml::dataset::SplitRatios;
use crate::ml::model::{Architecture, ModelConfig};
use crate::ml::trainer::TrainingSettings;
use crate::risk::RiskSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub labels: LabelSettings,
    pub sequence: SequenceSettings,
    pub model: ModelConfig,
    pub training: TrainingSettings,
    pub risk: RiskSettings,
    pub inference: InferenceSettings,
    pub registry: RegistrySettings,
}

impl PipelineConfig {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Labels
        if !(self.labels.threshold.is_finite() && self.labels.threshold >= 0.0) {
            errors.push("labels.threshold must be a finite value >= 0".to_string());
        }

        // Sequences
        if self.sequence.length == 0 {
            errors.push("sequence.length must be > 0".to_string());
        }
        if let Err(e) = self.sequence.split.validate() {
            errors.push(format!("sequence.split: {}", e));
        }

        // Model and training
        if let Err(e) = self.model.validate() {
            errors.push(format!("model: {}", e));
        }
        if let Err(e) = self.training.validate() {
            errors.push(format!("training: {}", e));
        }

        // Risk
        if let Err(e) = self.risk.validate() {
            errors.push(format!("risk: {}", e));
        }
        if !(1..=10).contains(&self.inference.default_risk_tolerance) {
            errors.push("inference.default_risk_tolerance must be between 1 and 10".to_string());
        }

        if self.registry.root.as_os_str().is_empty() {
            errors.push("registry.root must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SignalError::input(format!("cannot render config as TOML: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    /// Minimum absolute next-bar return for a directional label.
    pub threshold: f64,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self { threshold: 0.001 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSettings {
    pub length: usize,
    pub split: SplitRatios,
    pub seed: u64,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            length: 60,
            split: SplitRatios::default(),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub architecture: Architecture,
    pub default_risk_tolerance: u8,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            architecture: Architecture::Lstm,
            default_risk_tolerance: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Directory holding checkpoints, normalizers and training reports.
    pub root: PathBuf,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("models"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sequence.length, 60);
        assert_eq!(config.labels.threshold, 0.001);
        assert_eq!(config.model.hidden_size, 16);
        assert_eq!(config.training.batch_size, 32);
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = PipelineConfig::default();
        config.labels.threshold = -1.0;
        config.sequence.length = 0;
        config.model.num_heads = 3;
        config.inference.default_risk_tolerance = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.starts_with("labels.threshold")));
        assert!(errors.iter().any(|e| e.starts_with("model:")));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PipelineConfig::default();
        config.inference.architecture = Architecture::Transformer;
        config.training.epochs = 7;

        let text = config.to_toml().unwrap();
        assert!(text.contains("[training]"));
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: PipelineConfig = toml::from_str("[training]\nepochs = 3\n").unwrap();
        assert_eq!(parsed.training.epochs, 3);
        assert_eq!(parsed.training.batch_size, 32);
        assert_eq!(parsed.sequence, SequenceSettings::default());
    }
}
