use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use candle_core::Device;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::store::{CheckpointStore, FileStore, PayloadKind};
use super::{Checkpoint, CheckpointMetadata, ModelKey, SeriesKey};
use crate::error::{Result, SignalError};
use crate::ml::features::FEATURE_NAMES;
use crate::ml::model::{build_model, export_weights, import_weights, TrainableModel};
use crate::ml::normalizer::Normalizer;

/// A model rebuilt from a checkpoint, together with what it was saved with.
pub struct LoadedModel {
    pub model: TrainableModel,
    pub metadata: CheckpointMetadata,
}

/// Saves and loads weights and normalizers, caching loaded entries.
///
/// Cached values are shared as `Arc`s; evicting an entry never invalidates a
/// handle a caller already holds.
pub struct ModelRegistry<S: CheckpointStore = FileStore> {
    store: S,
    device: Device,
    models: RwLock<HashMap<ModelKey, Arc<LoadedModel>>>,
    normalizers: RwLock<HashMap<SeriesKey, Arc<Normalizer>>>,
}

impl ModelRegistry<FileStore> {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(FileStore::new(root)?, Device::Cpu))
    }
}

impl<S: CheckpointStore> ModelRegistry<S> {
    pub fn new(store: S, device: Device) -> Self {
        Self {
            store,
            device,
            models: RwLock::new(HashMap::new()),
            normalizers: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Persists the model's current weights. Does not touch the cache.
    pub fn save_model(
        &self,
        model: &TrainableModel,
        key: &ModelKey,
        validation_accuracy: f64,
    ) -> Result<()> {
        if model.architecture != key.architecture {
            return Err(SignalError::input(format!(
                "cannot save a {} model under key {}",
                model.architecture, key
            )));
        }

        let checkpoint = Checkpoint {
            metadata: CheckpointMetadata {
                architecture: model.architecture,
                instrument: key.instrument.clone(),
                timeframe: key.timeframe,
                input_size: model.input_size,
                feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                config: model.config,
                created_at: Utc::now(),
                validation_accuracy,
            },
            weights: export_weights(&model.varmap)?,
        };

        self.store
            .put(PayloadKind::Weights, &key.to_string(), &checkpoint.to_json()?)?;
        info!(
            "Saved {} model {} ({} params, val_acc={:.4})",
            model.architecture,
            key,
            checkpoint.weights.num_parameters(),
            validation_accuracy
        );
        Ok(())
    }

    pub fn save_normalizer(&self, key: &SeriesKey, normalizer: &Normalizer) -> Result<()> {
        let bytes = serde_json::to_vec(normalizer)?;
        self.store.put(PayloadKind::Normalizer, &key.to_string(), &bytes)?;
        info!("Saved normalizer {} ({} features)", key, normalizer.num_features());
        Ok(())
    }

    pub fn load_model(&self, key: &ModelKey) -> Result<Arc<LoadedModel>> {
        {
            let cache = self.models.read().map_err(|_| SignalError::poisoned("model cache"))?;
            if let Some(hit) = cache.get(key) {
                debug!("Model cache hit: {}", key);
                return Ok(Arc::clone(hit));
            }
        }

        let bytes = self
            .store
            .get(PayloadKind::Weights, &key.to_string())?
            .ok_or_else(|| SignalError::not_found(PayloadKind::Weights.as_str(), key.to_string()))?;
        let checkpoint = Checkpoint::from_json(&bytes)?;
        let metadata = checkpoint.metadata;

        if metadata.architecture != key.architecture {
            return Err(SignalError::input(format!(
                "checkpoint {} holds a {} model",
                key, metadata.architecture
            )));
        }
        if metadata.feature_names.len() != FEATURE_NAMES.len() {
            warn!(
                "Checkpoint {} was trained on {} features, current extractor yields {}",
                key,
                metadata.feature_names.len(),
                FEATURE_NAMES.len()
            );
        }

        let mut model = build_model(
            metadata.architecture,
            metadata.input_size,
            &metadata.config,
            &self.device,
        )?;
        import_weights(&mut model.varmap, &checkpoint.weights)?;

        let loaded = Arc::new(LoadedModel { model, metadata });
        let mut cache = self.models.write().map_err(|_| SignalError::poisoned("model cache"))?;
        let entry = cache.entry(key.clone()).or_insert(loaded);
        info!("Loaded model {} (val_acc={:.4})", key, entry.metadata.validation_accuracy);
        Ok(Arc::clone(entry))
    }

    pub fn load_normalizer(&self, key: &SeriesKey) -> Result<Arc<Normalizer>> {
        {
            let cache = self
                .normalizers
                .read()
                .map_err(|_| SignalError::poisoned("normalizer cache"))?;
            if let Some(hit) = cache.get(key) {
                return Ok(Arc::clone(hit));
            }
        }

        let bytes = self
            .store
            .get(PayloadKind::Normalizer, &key.to_string())?
            .ok_or_else(|| {
                SignalError::not_found(PayloadKind::Normalizer.as_str(), key.to_string())
            })?;
        let normalizer: Normalizer = serde_json::from_slice(&bytes)?;
        if normalizer.mean.len() != normalizer.scale.len() {
            return Err(SignalError::input(format!(
                "normalizer {} has {} means and {} scales",
                key,
                normalizer.mean.len(),
                normalizer.scale.len()
            )));
        }

        let mut cache = self
            .normalizers
            .write()
            .map_err(|_| SignalError::poisoned("normalizer cache"))?;
        let entry = cache.entry(key.clone()).or_insert_with(|| Arc::new(normalizer));
        debug!("Loaded normalizer {}", key);
        Ok(Arc::clone(entry))
    }

    pub fn has_model(&self, key: &ModelKey) -> Result<bool> {
        self.store.exists(PayloadKind::Weights, &key.to_string())
    }

    pub fn has_normalizer(&self, key: &SeriesKey) -> Result<bool> {
        self.store.exists(PayloadKind::Normalizer, &key.to_string())
    }

    /// Drops a cached model so the next load reads storage again.
    pub fn evict_model(&self, key: &ModelKey) -> Result<bool> {
        let mut cache = self.models.write().map_err(|_| SignalError::poisoned("model cache"))?;
        Ok(cache.remove(key).is_some())
    }

    pub fn evict_normalizer(&self, key: &SeriesKey) -> Result<bool> {
        let mut cache = self
            .normalizers
            .write()
            .map_err(|_| SignalError::poisoned("normalizer cache"))?;
        Ok(cache.remove(key).is_some())
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.models.write().map_err(|_| SignalError::poisoned("model cache"))?.clear();
        self.normalizers
            .write()
            .map_err(|_| SignalError::poisoned("normalizer cache"))?
            .clear();
        Ok(())
    }

    /// Every stored model key. Files that do not parse as keys are skipped.
    pub fn list_models(&self) -> Result<Vec<ModelKey>> {
        Ok(self
            .store
            .keys(PayloadKind::Weights)?
            .into_iter()
            .filter_map(|raw| match raw.parse::<ModelKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("Ignoring stored checkpoint {}: {}", raw, e);
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::{array_to_tensor, Architecture, ModelConfig};
    use crate::ml::persistence::MemoryStore;
    use crate::types::TimeFrame;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn tiny() -> ModelConfig {
        ModelConfig { hidden_size: 4, num_layers: 1, num_heads: 2, dropout: 0.0 }
    }

    #[test]
    fn test_save_then_load_reproduces_logits() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::open(dir.path())?;
        let key = ModelKey::new("AAPL", TimeFrame::M5, Architecture::Transformer)?;

        let model = build_model(Architecture::Transformer, 3, &tiny(), &Device::Cpu)?;
        registry.save_model(&model, &key, 0.61)?;

        let batch = Array3::from_shape_fn((2, 5, 3), |(i, t, f)| (i + t + f) as f32 * 0.1);
        let xs = array_to_tensor(&batch, &Device::Cpu)?;
        let expected = model.forward_t(&xs, false)?.to_vec2::<f32>()?;

        let loaded = registry.load_model(&key)?;
        let actual = loaded.model.forward_t(&xs, false)?.to_vec2::<f32>()?;
        assert_eq!(expected, actual);
        assert_eq!(loaded.metadata.validation_accuracy, 0.61);
        assert_eq!(registry.list_models()?, vec![key]);
        Ok(())
    }

    #[test]
    fn test_cache_shares_and_evicts() -> Result<()> {
        let registry = ModelRegistry::new(MemoryStore::new(), Device::Cpu);
        let key = ModelKey::new("EURUSD", TimeFrame::H1, Architecture::Gru)?;
        let model = build_model(Architecture::Gru, 3, &tiny(), &Device::Cpu)?;
        registry.save_model(&model, &key, 0.5)?;

        let a = registry.load_model(&key)?;
        let b = registry.load_model(&key)?;
        assert!(Arc::ptr_eq(&a, &b));

        assert!(registry.evict_model(&key)?);
        let c = registry.load_model(&key)?;
        assert!(!Arc::ptr_eq(&a, &c));
        // the evicted handle is still usable
        assert_eq!(a.model.input_size, 3);
        Ok(())
    }

    #[test]
    fn test_missing_entries_are_not_found() -> Result<()> {
        let registry = ModelRegistry::new(MemoryStore::new(), Device::Cpu);
        let key = ModelKey::new("MSFT", TimeFrame::D1, Architecture::Lstm)?;
        assert!(registry.load_model(&key).err().is_some_and(|e| e.is_not_found()));
        assert!(registry
            .load_normalizer(&key.series())
            .err()
            .is_some_and(|e| e.is_not_found()));
        assert!(!registry.has_model(&key)?);
        Ok(())
    }

    #[test]
    fn test_save_rejects_mismatched_key() -> Result<()> {
        let registry = ModelRegistry::new(MemoryStore::new(), Device::Cpu);
        let key = ModelKey::new("MSFT", TimeFrame::D1, Architecture::Lstm)?;
        let model = build_model(Architecture::Gru, 3, &tiny(), &Device::Cpu)?;
        assert!(registry.save_model(&model, &key, 0.0).is_err());
        Ok(())
    }

    #[test]
    fn test_normalizer_round_trip() -> Result<()> {
        let registry = ModelRegistry::new(MemoryStore::new(), Device::Cpu);
        let key = SeriesKey::new("BTC/USDT", TimeFrame::M15)?;
        let data = Array3::from_shape_fn((3, 4, 2), |(i, t, f)| (i * 4 + t) as f32 * (f + 1) as f32);
        let normalizer = Normalizer::fit(&data)?;

        registry.save_normalizer(&key, &normalizer)?;
        assert!(registry.has_normalizer(&key)?);
        assert_eq!(*registry.load_normalizer(&key)?, normalizer);
        Ok(())
    }
}
