//! End-to-end training: bars in, checkpoint and normalizer stored, report out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{Result, SignalError};
use crate::ml::dataset::{build_sequences, stratified_split, DataSplits, SequenceDataset, SplitSizes};
use crate::ml::features::{extract_features, MIN_HISTORY};
use crate::ml::labels::{generate_labels, ClassDistribution, ClassImbalanceWarning};
use crate::ml::metrics::ClassificationReport;
use crate::ml::model::{build_model, Architecture};
use crate::ml::normalizer::Normalizer;
use crate::ml::persistence::store::write_atomic;
use crate::ml::persistence::{CheckpointStore, FileStore, ModelKey, ModelRegistry};
use crate::ml::trainer::{EpochMetrics, StopReason, Trainer, TrainingSettings};
use crate::types::{Bar, BarSeries, CleaningReport, TimeFrame};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub instrument: String,
    pub timeframe: TimeFrame,
    pub architecture: Architecture,
    pub best_validation_accuracy: f64,
    pub test_accuracy: f64,
    pub test_loss: f64,
    pub per_class_report: ClassificationReport,
    pub class_imbalance_warning: Option<ClassImbalanceWarning>,
    pub class_distribution: ClassDistribution,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub stop_reason: StopReason,
    pub history: Vec<EpochMetrics>,
    pub split_sizes: SplitSizes,
    pub cleaning: CleaningReport,
    pub num_parameters: usize,
    pub trained_at: DateTime<Utc>,
}

/// Input for one run of [`train_many`].
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub bars: Vec<Bar>,
    pub instrument: String,
    pub timeframe: TimeFrame,
    pub architecture: Architecture,
    pub epoch_budget: usize,
}

pub struct TrainingPipeline<S: CheckpointStore = FileStore> {
    registry: Arc<ModelRegistry<S>>,
    config: PipelineConfig,
}

impl<S: CheckpointStore> TrainingPipeline<S> {
    pub fn new(registry: Arc<ModelRegistry<S>>, config: PipelineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| SignalError::input(errors.join(", ")))?;
        Ok(Self { registry, config })
    }

    pub fn registry(&self) -> &Arc<ModelRegistry<S>> {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn train(
        &self,
        bars: &[Bar],
        instrument: &str,
        timeframe: TimeFrame,
        architecture: Architecture,
        epoch_budget: usize,
    ) -> Result<TrainingReport> {
        let key = ModelKey::new(instrument, timeframe, architecture)?;
        let series_key = key.series();
        info!("Training pipeline started for {}", key);

        let (series, cleaning) = BarSeries::clean(bars);
        if series.len() < MIN_HISTORY {
            return Err(SignalError::InsufficientData {
                required: MIN_HISTORY,
                available: series.len(),
            });
        }

        let rows = extract_features(series.bars());
        let labeled = generate_labels(rows, self.config.labels.threshold)?;
        let dataset = build_sequences(&labeled, self.config.sequence.length)?;
        let splits = stratified_split(&dataset, self.config.sequence.split, self.config.sequence.seed)?;
        let split_sizes = splits.sizes();

        let normalizer = Normalizer::fit(&splits.train.features)?;
        self.registry.save_normalizer(&series_key, &normalizer)?;
        let splits = normalize_splits(&normalizer, splits)?;

        let mut model = build_model(
            architecture,
            dataset.num_features(),
            &self.config.model,
            self.registry.device(),
        )?;
        let num_parameters = model.num_parameters();

        let settings = TrainingSettings {
            epochs: epoch_budget,
            ..self.config.training
        };
        let registry = &self.registry;
        let outcome = Trainer::new(settings)?.fit(&mut model, &splits, |model, metrics| {
            registry.save_model(model, &key, metrics.val_accuracy)
        })?;

        self.registry.evict_model(&key)?;
        self.registry.evict_normalizer(&series_key)?;

        if !outcome.history.iter().any(|m| m.improved) {
            warn!("{}: no epoch improved validation accuracy, nothing was checkpointed", key);
        }
        info!(
            "Training pipeline finished for {}: best val_acc={:.4} at epoch {}, test_acc={:.4}",
            key,
            outcome.best_validation_accuracy,
            outcome.best_epoch,
            outcome.test_report.accuracy
        );

        Ok(TrainingReport {
            instrument: key.instrument.clone(),
            timeframe,
            architecture,
            best_validation_accuracy: outcome.best_validation_accuracy,
            test_accuracy: outcome.test_report.accuracy,
            test_loss: outcome.test_loss,
            epochs_run: outcome.epochs_run(),
            best_epoch: outcome.best_epoch,
            stop_reason: outcome.stop_reason,
            per_class_report: outcome.test_report,
            class_imbalance_warning: labeled.imbalance,
            class_distribution: labeled.distribution,
            history: outcome.history,
            split_sizes,
            cleaning,
            num_parameters,
            trained_at: Utc::now(),
        })
    }

    /// Runs independent jobs in parallel. One result per job, in job order.
    pub fn train_many(&self, jobs: &[TrainingJob]) -> Vec<Result<TrainingReport>> {
        jobs.par_iter()
            .map(|job| {
                self.train(
                    &job.bars,
                    &job.instrument,
                    job.timeframe,
                    job.architecture,
                    job.epoch_budget,
                )
            })
            .collect()
    }
}

fn normalize_splits(normalizer: &Normalizer, splits: DataSplits) -> Result<DataSplits> {
    let apply = |ds: SequenceDataset| -> Result<SequenceDataset> {
        Ok(SequenceDataset {
            features: normalizer.transform(&ds.features)?,
            labels: ds.labels,
        })
    };
    Ok(DataSplits {
        train: apply(splits.train)?,
        validation: apply(splits.validation)?,
        test: apply(splits.test)?,
    })
}

pub fn report_path(dir: &Path, key: &ModelKey) -> PathBuf {
    dir.join(format!("{}_results.json", key))
}

/// Writes `{key}_results.json` under `dir`.
pub fn write_report(dir: &Path, key: &ModelKey, report: &TrainingReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = report_path(dir, key);
    write_atomic(&path, &serde_json::to_vec_pretty(report)?)?;
    info!("Training report written to {}", path.display());
    Ok(path)
}
