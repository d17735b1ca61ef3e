use candle_core::{backprop::GradStore, Tensor, Var, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SignalError};
use crate::ml::dataset::{DataSplits, SequenceDataset};
use crate::ml::metrics::ClassificationReport;
use crate::ml::model::{array_to_tensor, export_weights, import_weights, TrainableModel, WeightsPayload};
use crate::types::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Epoch budget.
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub max_grad_norm: f64,
    /// Epochs without a validation-accuracy gain before stopping.
    pub patience: usize,
    pub lr_patience: usize,
    pub lr_factor: f64,
    pub min_lr: f64,
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            max_grad_norm: 1.0,
            patience: 3,
            lr_patience: 5,
            lr_factor: 0.5,
            min_lr: 1e-6,
            seed: 42,
        }
    }
}

impl TrainingSettings {
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.epochs == 0 {
            problems.push("epochs must be positive".to_string());
        }
        if self.batch_size == 0 {
            problems.push("batch_size must be positive".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            problems.push(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if self.weight_decay < 0.0 {
            problems.push(format!("weight_decay must be non-negative, got {}", self.weight_decay));
        }
        if !(self.max_grad_norm > 0.0) {
            problems.push(format!("max_grad_norm must be positive, got {}", self.max_grad_norm));
        }
        if self.patience == 0 {
            problems.push("patience must be positive".to_string());
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            problems.push(format!("lr_factor must be in (0, 1), got {}", self.lr_factor));
        }
        if self.min_lr < 0.0 || self.min_lr > self.learning_rate {
            problems.push(format!("min_lr must be in [0, learning_rate], got {}", self.min_lr));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SignalError::input(problems.join("; ")))
        }
    }
}

/// Reduce-on-plateau for a loss that should go down.
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    patience: usize,
    factor: f64,
    min_lr: f64,
    best: f64,
    bad_epochs: usize,
}

impl PlateauScheduler {
    /// Relative improvement needed to reset the plateau counter.
    const THRESHOLD: f64 = 1e-4;

    pub fn new(patience: usize, factor: f64, min_lr: f64) -> Self {
        Self {
            patience,
            factor,
            min_lr,
            best: f64::INFINITY,
            bad_epochs: 0,
        }
    }

    /// Returns the new learning rate when it should change.
    pub fn step(&mut self, metric: f64, current_lr: f64) -> Option<f64> {
        if metric < self.best * (1.0 - Self::THRESHOLD) {
            self.best = metric;
            self.bad_epochs = 0;
            return None;
        }

        self.bad_epochs += 1;
        if self.bad_epochs > self.patience {
            self.bad_epochs = 0;
            let new_lr = (current_lr * self.factor).max(self.min_lr);
            if current_lr - new_lr > f64::EPSILON {
                return Some(new_lr);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainerPhase {
    Init,
    EpochTrain(usize),
    EpochValidate(usize),
    Checkpoint(usize),
    Skip(usize),
    Continue(usize),
    EarlyStop,
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EarlyStop,
    EpochBudget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
    pub skipped_batches: usize,
    pub improved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub history: Vec<EpochMetrics>,
    pub best_epoch: usize,
    pub best_validation_accuracy: f64,
    pub stop_reason: StopReason,
    pub test_loss: f64,
    pub test_report: ClassificationReport,
}

impl TrainingOutcome {
    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }
}

struct Evaluation {
    loss: f64,
    accuracy: f64,
    predictions: Vec<Signal>,
}

pub struct Trainer {
    settings: TrainingSettings,
}

impl Trainer {
    pub fn new(settings: TrainingSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &TrainingSettings {
        &self.settings
    }

    /// Trains `model` in place and leaves it holding the best-validation weights.
    ///
    /// `on_improvement` runs right after every epoch that raises validation
    /// accuracy, with the model in that epoch's state.
    pub fn fit<F>(
        &self,
        model: &mut TrainableModel,
        splits: &DataSplits,
        mut on_improvement: F,
    ) -> Result<TrainingOutcome>
    where
        F: FnMut(&TrainableModel, &EpochMetrics) -> Result<()>,
    {
        let s = &self.settings;
        let vars = model.varmap.all_vars();
        let mut optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: s.learning_rate,
                weight_decay: s.weight_decay,
                ..Default::default()
            },
        )?;
        let mut scheduler = PlateauScheduler::new(s.lr_patience, s.lr_factor, s.min_lr);
        let mut rng = StdRng::seed_from_u64(s.seed);

        let mut history: Vec<EpochMetrics> = Vec::new();
        let mut current: Option<EpochMetrics> = None;
        let mut best_accuracy = f64::NEG_INFINITY;
        let mut best_epoch = 0;
        let mut best_snapshot: Option<WeightsPayload> = None;
        let mut epochs_without_gain = 0;
        let mut stop_reason = StopReason::EpochBudget;

        let mut phase = TrainerPhase::Init;
        loop {
            debug!("Trainer phase: {:?}", phase);
            phase = match phase {
                TrainerPhase::Init => {
                    info!(
                        "Training {} model: {} train / {} validation samples, {} parameters",
                        model.architecture,
                        splits.train.len(),
                        splits.validation.len(),
                        model.num_parameters()
                    );
                    TrainerPhase::EpochTrain(1)
                }
                TrainerPhase::EpochTrain(epoch) => {
                    let (train_loss, train_accuracy, skipped) =
                        self.train_epoch(model, &splits.train, &vars, &mut optimizer, &mut rng)?;
                    current = Some(EpochMetrics {
                        epoch,
                        train_loss,
                        train_accuracy,
                        val_loss: f64::NAN,
                        val_accuracy: 0.0,
                        learning_rate: optimizer.learning_rate(),
                        skipped_batches: skipped,
                        improved: false,
                    });
                    TrainerPhase::EpochValidate(epoch)
                }
                TrainerPhase::EpochValidate(epoch) => {
                    let eval = self.evaluate(model, &splits.validation)?;
                    let metrics = current
                        .as_mut()
                        .ok_or_else(|| SignalError::NumericalInstability("missing epoch state".into()))?;
                    metrics.val_loss = eval.loss;
                    metrics.val_accuracy = eval.accuracy;

                    if let Some(new_lr) = scheduler.step(eval.loss, optimizer.learning_rate()) {
                        info!("Validation loss plateaued, learning rate {:.2e} -> {:.2e}", optimizer.learning_rate(), new_lr);
                        optimizer.set_learning_rate(new_lr);
                    }

                    if eval.accuracy > best_accuracy {
                        TrainerPhase::Checkpoint(epoch)
                    } else {
                        TrainerPhase::Skip(epoch)
                    }
                }
                TrainerPhase::Checkpoint(epoch) => {
                    let metrics = current
                        .as_mut()
                        .ok_or_else(|| SignalError::NumericalInstability("missing epoch state".into()))?;
                    metrics.improved = true;
                    best_accuracy = metrics.val_accuracy;
                    best_epoch = epoch;
                    epochs_without_gain = 0;
                    best_snapshot = Some(export_weights(&model.varmap)?);
                    on_improvement(model, metrics)?;
                    TrainerPhase::Continue(epoch)
                }
                TrainerPhase::Skip(epoch) => {
                    epochs_without_gain += 1;
                    TrainerPhase::Continue(epoch)
                }
                TrainerPhase::Continue(epoch) => {
                    if let Some(metrics) = current.take() {
                        info!(
                            "Epoch {}/{}: train_loss={:.4} train_acc={:.3} val_loss={:.4} val_acc={:.3} lr={:.2e}{}",
                            epoch,
                            s.epochs,
                            metrics.train_loss,
                            metrics.train_accuracy,
                            metrics.val_loss,
                            metrics.val_accuracy,
                            metrics.learning_rate,
                            if metrics.improved { " *" } else { "" }
                        );
                        history.push(metrics);
                    }

                    if epochs_without_gain >= s.patience {
                        TrainerPhase::EarlyStop
                    } else if epoch >= s.epochs {
                        stop_reason = StopReason::EpochBudget;
                        TrainerPhase::Finalize
                    } else {
                        TrainerPhase::EpochTrain(epoch + 1)
                    }
                }
                TrainerPhase::EarlyStop => {
                    info!(
                        "Early stopping: no validation gain for {} epochs (best {:.3} at epoch {})",
                        epochs_without_gain, best_accuracy, best_epoch
                    );
                    stop_reason = StopReason::EarlyStop;
                    TrainerPhase::Finalize
                }
                TrainerPhase::Finalize => break,
            };
        }

        if let Some(snapshot) = &best_snapshot {
            import_weights(&mut model.varmap, snapshot)?;
        }

        let test = self.evaluate(model, &splits.test)?;
        let test_report = ClassificationReport::from_predictions(&splits.test.labels, &test.predictions);
        info!(
            "Test evaluation: accuracy={:.3} loss={:.4} macro_f1={:.3}",
            test_report.accuracy, test.loss, test_report.macro_avg.f1
        );

        Ok(TrainingOutcome {
            history,
            best_epoch,
            best_validation_accuracy: best_accuracy.max(0.0),
            stop_reason,
            test_loss: test.loss,
            test_report,
        })
    }

    /// One pass over shuffled mini-batches. Returns mean loss, accuracy over
    /// the batches that were applied, and the number of skipped batches.
    fn train_epoch(
        &self,
        model: &TrainableModel,
        data: &SequenceDataset,
        vars: &[Var],
        optimizer: &mut AdamW,
        rng: &mut StdRng,
    ) -> Result<(f64, f64, usize)> {
        let mut order: Vec<usize> = (0..data.len()).collect();
        order.shuffle(rng);

        let mut loss_sum = 0.0;
        let mut correct = 0usize;
        let mut seen = 0usize;
        let mut skipped = 0usize;

        for chunk in order.chunks(self.settings.batch_size) {
            let batch = data.features.select(Axis(0), chunk);
            if batch.iter().any(|v| !v.is_finite()) {
                warn!("Skipping batch with non-finite inputs");
                skipped += 1;
                continue;
            }
            let labels: Vec<Signal> = chunk.iter().map(|&i| data.labels[i]).collect();

            let xs = array_to_tensor(&batch, &model.device)?;
            let ys = labels_to_tensor(&labels, &model.device)?;
            let logits = model.forward_t(&xs, true)?;
            if !all_finite(&logits)? {
                warn!("Skipping batch with non-finite model outputs");
                skipped += 1;
                continue;
            }

            let loss = candle_nn::loss::cross_entropy(&logits, &ys)?;
            let loss_value = loss.to_scalar::<f32>()? as f64;
            if !loss_value.is_finite() {
                warn!("Skipping batch with non-finite loss");
                skipped += 1;
                continue;
            }

            let mut grads = loss.backward()?;
            let norm = clip_grad_norm(vars, &mut grads, self.settings.max_grad_norm)?;
            if !norm.is_finite() {
                warn!("Skipping batch with non-finite gradient norm");
                skipped += 1;
                continue;
            }
            optimizer.step(&grads)?;

            loss_sum += loss_value * chunk.len() as f64;
            correct += count_correct(&logits, &labels)?;
            seen += chunk.len();
        }

        if seen == 0 {
            return Err(SignalError::NumericalInstability(format!(
                "all {} batches in the epoch were skipped",
                skipped
            )));
        }

        Ok((loss_sum / seen as f64, correct as f64 / seen as f64, skipped))
    }

    fn evaluate(&self, model: &TrainableModel, data: &SequenceDataset) -> Result<Evaluation> {
        let mut loss_sum = 0.0;
        let mut predictions = Vec::with_capacity(data.len());
        let indices: Vec<usize> = (0..data.len()).collect();

        for chunk in indices.chunks(self.settings.batch_size) {
            let batch = data.features.select(Axis(0), chunk);
            let labels: Vec<Signal> = chunk.iter().map(|&i| data.labels[i]).collect();

            let xs = array_to_tensor(&batch, &model.device)?;
            let ys = labels_to_tensor(&labels, &model.device)?;
            let logits = model.forward_t(&xs, false)?;
            let loss = candle_nn::loss::cross_entropy(&logits, &ys)?.to_scalar::<f32>()? as f64;

            loss_sum += loss * chunk.len() as f64;
            predictions.extend(argmax_signals(&logits)?);
        }

        let n = data.len().max(1) as f64;
        let correct = predictions
            .iter()
            .zip(&data.labels)
            .filter(|(p, a)| p == a)
            .count();

        Ok(Evaluation {
            loss: loss_sum / n,
            accuracy: correct as f64 / n,
            predictions,
        })
    }
}

fn labels_to_tensor(labels: &[Signal], device: &candle_core::Device) -> Result<Tensor> {
    let ids: Vec<u32> = labels.iter().map(|l| l.index() as u32).collect();
    Ok(Tensor::from_vec(ids, labels.len(), device)?)
}

fn all_finite(t: &Tensor) -> Result<bool> {
    Ok(t.flatten_all()?.to_vec1::<f32>()?.iter().all(|v| v.is_finite()))
}

fn argmax_signals(logits: &Tensor) -> Result<Vec<Signal>> {
    logits
        .argmax(D::Minus1)?
        .to_vec1::<u32>()?
        .into_iter()
        .map(|i| {
            Signal::from_index(i as usize)
                .ok_or_else(|| SignalError::NumericalInstability(format!("class index {} out of range", i)))
        })
        .collect()
}

fn count_correct(logits: &Tensor, labels: &[Signal]) -> Result<usize> {
    Ok(argmax_signals(logits)?
        .iter()
        .zip(labels)
        .filter(|(p, a)| p == a)
        .count())
}

/// Scales all gradients so their global L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_grad_norm(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let mut sum_sq = 0.0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            sum_sq += g.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = sum_sq.sqrt();

    if norm.is_finite() && norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            let clipped = match grads.get(var.as_tensor()) {
                Some(g) => (g * scale)?,
                None => continue,
            };
            grads.insert(var.as_tensor(), clipped);
        }
    }
    Ok(norm)
}
