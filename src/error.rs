use thiserror::Error;

/// Errors surfaced by the signal pipeline.
///
/// Input problems are fatal to the call that raised them. Numerical trouble is
/// normally absorbed locally (skipped batches, zeroed features) and only
/// reaches the caller when nothing usable is left.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid input: {0}")]
    InputError(String),

    #[error("insufficient data: need {required} rows, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    #[error("{kind} not found for key {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),
}

impl SignalError {
    pub fn input(msg: impl Into<String>) -> Self {
        SignalError::InputError(msg.into())
    }

    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        SignalError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        SignalError::Storage(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{} lock poisoned", what),
        ))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SignalError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, SignalError>;
