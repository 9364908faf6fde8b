//! Saving and loading trained pixel classifiers
//!
//! Classifiers are stored by name as pretty-printed JSON snapshots. The
//! snapshot schema belongs to the model variant; callers treat it as opaque.

use crate::classification::ModelConfig;
use crate::pixel_classifier::{PixelClassifier, PixelClassifierSnapshot};
use pixclass_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Named storage for trained classifiers.
pub trait ModelStore {
    fn save(&self, name: &str, classifier: &PixelClassifierSnapshot) -> Result<()>;

    fn load(&self, name: &str) -> Result<PixelClassifierSnapshot>;

    /// Stored names, sorted.
    fn list(&self) -> Result<Vec<String>>;

    /// Load and rebuild a classifier.
    fn load_classifier(&self, name: &str) -> Result<PixelClassifier> {
        PixelClassifier::from_snapshot(self.load(name)?)
    }
}

/// Default name offered for a newly trained classifier.
pub fn default_classifier_name(model: &ModelConfig) -> String {
    format!("{} classifier", model.name())
}

fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_parameter("name", name, "classifier name is empty"));
    }
    if trimmed.contains(['/', '\\']) || trimmed == "." || trimmed == ".." {
        return Err(Error::invalid_parameter(
            "name",
            name,
            "classifier names cannot contain path separators",
        ));
    }
    Ok(())
}

/// Stores each classifier as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryModelStore {
    dir: PathBuf,
}

impl DirectoryModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.json", name.trim())))
    }
}

impl ModelStore for DirectoryModelStore {
    fn save(&self, name: &str, classifier: &PixelClassifierSnapshot) -> Result<()> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(classifier)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(&path, json)?;
        debug!(path = %path.display(), "saved classifier");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<PixelClassifierSnapshot> {
        let path = self.path_for(name)?;
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{KNearestParams, StatModel};
    use crate::features::{FeatureCalculator, NeighborFeatureCalculator, NeighborParams};
    use crate::pixel_classifier::{OutputType, PixelClassifierMetadata};
    use crate::preprocess::FeaturePreprocessor;
    use ndarray::array;
    use pixclass_core::{PathClass, PixelCalibration, Resolution};
    use std::sync::Arc;

    fn snapshot() -> PixelClassifierSnapshot {
        let x = array![[0.0f32], [1.0]];
        let model = ModelConfig::KNearest(KNearestParams { k: 1 })
            .fit(x.view(), &[0, 1], 2, 0)
            .unwrap();
        let features: Arc<dyn FeatureCalculator> = Arc::new(
            NeighborFeatureCalculator::new(NeighborParams {
                radius: 0,
                circular: false,
                tile_size: 32,
            })
            .unwrap(),
        );
        let metadata = PixelClassifierMetadata {
            resolution: Resolution::full(PixelCalibration::default()),
            input_width: 32,
            input_height: 32,
            output_type: OutputType::Classification,
            channels: vec![PathClass::new("a"), PathClass::new("b")],
        };
        assert_eq!(model.n_features(), 1);
        PixelClassifier::new(metadata, features, FeaturePreprocessor::identity(1), model)
            .unwrap()
            .snapshot()
    }

    #[test]
    fn test_save_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryModelStore::new(dir.path().join("classifiers"));
        assert!(store.list().unwrap().is_empty());

        store.save("tissue", &snapshot()).unwrap();
        store.save("K nearest classifier", &snapshot()).unwrap();
        assert_eq!(store.list().unwrap(), vec!["K nearest classifier", "tissue"]);

        let loaded = store.load_classifier("tissue").unwrap();
        assert_eq!(loaded.metadata().channels.len(), 2);
        assert_eq!(loaded.model().name(), "K nearest");
    }

    #[test]
    fn test_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryModelStore::new(dir.path());
        assert!(store.save("../escape", &snapshot()).is_err());
        assert!(store.save("  ", &snapshot()).is_err());
        assert!(store.load("a\\b").is_err());
    }

    #[test]
    fn test_missing_model_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectoryModelStore::new(dir.path()).load("absent").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_default_name() {
        assert_eq!(
            default_classifier_name(&ModelConfig::MaximumLikelihood),
            "Maximum likelihood classifier"
        );
    }
}
