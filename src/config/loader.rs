use std::path::Path;

use tracing::{debug, info};

use super::runtime::PipelineConfig;
use crate::error::{Result, SignalError};

pub const ENV_PREFIX: &str = "SIGNAL_FORGE";
pub const ENV_SEPARATOR: &str = "__";

/// Loads `.env`, then layers the TOML file at `path` (optional) and
/// `SIGNAL_FORGE__SECTION__FIELD` environment variables over the defaults.
pub fn load(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    dotenvy::dotenv().ok();
    let path = path.as_ref();

    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()
        .map_err(|e| SignalError::input(format!("cannot read config {}: {}", path.display(), e)))?;

    let config: PipelineConfig = settings
        .try_deserialize()
        .map_err(|e| SignalError::input(format!("invalid config {}: {}", path.display(), e)))?;

    config
        .validate()
        .map_err(|errors| SignalError::input(errors.join(", ")))?;

    if path.exists() {
        info!("Loaded configuration from {}", path.display());
    } else {
        debug!("No config file at {}, using defaults and environment", path.display());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::Architecture;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.sequence.length, PipelineConfig::default().sequence.length);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signal_forge.toml");
        fs::write(
            &path,
            "[sequence]\nlength = 30\n\n[inference]\narchitecture = \"gru\"\n",
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.sequence.length, 30);
        assert_eq!(config.inference.architecture, Architecture::Gru);
        assert_eq!(config.training.epochs, 20);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[model]\nhidden_size = 9\nnum_heads = 2\n").unwrap();
        assert!(load(&path).is_err());
    }
}
