//! Three-class (Sell / Hold / Buy) trading signals from OHLCV history.
//!
//! Bars are turned into indicator features, labelled from the next bar's
//! return, windowed into sequences and fed to an LSTM, GRU or Transformer
//! classifier. Trained weights and normalizers live in a [`ml::ModelRegistry`];
//! [`ml::SignalEngine`] serves risk-adjusted predictions from them.

pub mod config;
pub mod error;
pub mod indicators;
pub mod ml;
pub mod pipeline;
pub mod risk;
pub mod types;

pub use error::{Result, SignalError};
