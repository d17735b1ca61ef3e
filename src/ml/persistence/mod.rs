//! Checkpoint and normalizer persistence.
//!
//! Weights live under `{instrument}_{timeframe}_{architecture}`, normalizers
//! under `{instrument}_{timeframe}`. Both are serde JSON payloads written
//! through a [`CheckpointStore`].

pub mod registry;
pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalError};
use crate::ml::model::{Architecture, ModelConfig, WeightsPayload};
use crate::types::TimeFrame;

pub use registry::{LoadedModel, ModelRegistry};
pub use store::{CheckpointStore, FileStore, MemoryStore, PayloadKind};

fn validate_instrument(instrument: &str) -> Result<String> {
    let trimmed = instrument.trim();
    if trimmed.is_empty() {
        return Err(SignalError::input("instrument must not be empty"));
    }
    // "BTC/USDT" is stored as "BTC-USDT"
    let normalized = trimmed.replace('/', "-");
    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || normalized.starts_with('.')
    {
        return Err(SignalError::input(format!("invalid instrument: {}", instrument)));
    }
    Ok(normalized)
}

/// Owner of a normalizer: one per instrument and timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub instrument: String,
    pub timeframe: TimeFrame,
}

impl SeriesKey {
    pub fn new(instrument: &str, timeframe: TimeFrame) -> Result<Self> {
        Ok(Self {
            instrument: validate_instrument(instrument)?,
            timeframe,
        })
    }

    pub fn with_architecture(&self, architecture: Architecture) -> ModelKey {
        ModelKey {
            instrument: self.instrument.clone(),
            timeframe: self.timeframe,
            architecture,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.instrument, self.timeframe)
    }
}

/// Owner of one set of model weights.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub instrument: String,
    pub timeframe: TimeFrame,
    pub architecture: Architecture,
}

impl ModelKey {
    pub fn new(instrument: &str, timeframe: TimeFrame, architecture: Architecture) -> Result<Self> {
        Ok(SeriesKey::new(instrument, timeframe)?.with_architecture(architecture))
    }

    pub fn series(&self) -> SeriesKey {
        SeriesKey {
            instrument: self.instrument.clone(),
            timeframe: self.timeframe,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.instrument, self.timeframe, self.architecture)
    }
}

impl FromStr for ModelKey {
    type Err = SignalError;

    /// Parses from the right, so instruments may contain underscores.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.rsplitn(3, '_');
        let (architecture, timeframe, instrument) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(t), Some(i)) => (a, t, i),
            _ => return Err(SignalError::input(format!("malformed model key: {}", s))),
        };
        ModelKey::new(instrument, timeframe.parse()?, architecture.parse()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub architecture: Architecture,
    pub instrument: String,
    pub timeframe: TimeFrame,
    pub input_size: usize,
    pub feature_names: Vec<String>,
    pub config: ModelConfig,
    pub created_at: DateTime<Utc>,
    pub validation_accuracy: f64,
}

/// Everything needed to rebuild a model: metadata plus weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    pub weights: WeightsPayload,
}

impl Checkpoint {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_rendering() {
        let key = ModelKey::new("AAPL", TimeFrame::M5, Architecture::Lstm).unwrap();
        assert_eq!(key.to_string(), "AAPL_5m_lstm");
        assert_eq!(key.series().to_string(), "AAPL_5m");
    }

    #[test]
    fn test_key_normalizes_pair_symbols() {
        let key = SeriesKey::new("BTC/USDT", TimeFrame::H1).unwrap();
        assert_eq!(key.to_string(), "BTC-USDT_1h");
    }

    #[test]
    fn test_key_rejects_path_like_instruments() {
        assert!(SeriesKey::new("", TimeFrame::M1).is_err());
        assert!(SeriesKey::new("../etc", TimeFrame::M1).is_err());
        assert!(SeriesKey::new("a\\b", TimeFrame::M1).is_err());
    }

    #[test]
    fn test_model_key_round_trips_through_string() {
        let key = ModelKey::new("BRK_B", TimeFrame::D1, Architecture::Transformer).unwrap();
        let parsed: ModelKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
        assert!("nounderscores".parse::<ModelKey>().is_err());
    }
}
