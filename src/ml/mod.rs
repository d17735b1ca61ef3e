pub mod features;
pub mod labels;
pub mod dataset;
pub mod normalizer;
pub mod model;
pub mod metrics;
pub mod trainer;
pub mod persistence;
pub mod inference;

pub use features::{extract_features, FeatureRow, FEATURE_NAMES, NUM_FEATURES};
pub use labels::{generate_labels, ClassDistribution, ClassImbalanceWarning, LabeledSeries};
pub use dataset::{build_sequences, stratified_split, DataSplits, SequenceDataset, SplitRatios};
pub use normalizer::Normalizer;
pub use model::{build_model, Architecture, ModelConfig, TrainableModel};
pub use metrics::ClassificationReport;
pub use trainer::{Trainer, TrainingOutcome, TrainingSettings};
pub use persistence::{FileStore, MemoryStore, ModelKey, ModelRegistry, SeriesKey};
pub use inference::{Prediction, PredictionRequest, SignalEngine};
