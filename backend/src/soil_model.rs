use crate::error::StartupError;
use aprender::primitives::Matrix;
use aprender::tree::RandomForestClassifier;
use shared::{NUTRIENT_COUNT, UNKNOWN_SOIL};
use std::fs;
use std::path::Path;

/// File names inside the soil model directory, shared with the trainer.
pub const SOIL_MODEL_FILE: &str = "soil_model.safetensors";
pub const SOIL_LABELS_FILE: &str = "soil_labels.json";

/// Seam for the soil recommender so route tests can substitute stubs.
/// Infallible by contract: internal failures degrade to a sentinel label
/// instead of erroring the request.
pub trait SoilRecommender: Send + Sync {
    fn recommend(&self, nutrients: &[f32; NUTRIENT_COUNT]) -> String;
}

/// Random forest over nutrient features plus the class label table
/// persisted next to it by the trainer.
pub struct SoilModel {
    forest: RandomForestClassifier,
    labels: Vec<String>,
}

impl SoilModel {
    pub fn load(dir: &Path) -> Result<Self, StartupError> {
        let model_path = dir.join(SOIL_MODEL_FILE);
        if !model_path.exists() {
            return Err(StartupError::ModelMissing { path: model_path });
        }
        let forest =
            RandomForestClassifier::load_safetensors(&model_path).map_err(|reason| {
                StartupError::ModelLoad {
                    path: model_path.clone(),
                    reason,
                }
            })?;

        let labels_path = dir.join(SOIL_LABELS_FILE);
        let raw = fs::read_to_string(&labels_path).map_err(|e| StartupError::ModelLoad {
            path: labels_path.clone(),
            reason: e.to_string(),
        })?;
        let labels: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| StartupError::ModelLoad {
                path: labels_path.clone(),
                reason: e.to_string(),
            })?;
        if labels.is_empty() {
            return Err(StartupError::ModelLoad {
                path: labels_path,
                reason: "label table is empty".to_string(),
            });
        }

        log::info!(
            "loaded soil model with {} classes from {}",
            labels.len(),
            model_path.display()
        );
        Ok(Self { forest, labels })
    }

    fn try_recommend(&self, nutrients: &[f32; NUTRIENT_COUNT]) -> Result<String, String> {
        let row = Matrix::from_vec(1, NUTRIENT_COUNT, nutrients.to_vec())
            .map_err(|e| e.to_string())?;
        let predicted = self.forest.predict(&row);
        let index = *predicted.first().ok_or("empty prediction")?;
        self.labels
            .get(index)
            .cloned()
            .ok_or_else(|| format!("class index {index} outside label table"))
    }
}

impl SoilRecommender for SoilModel {
    fn recommend(&self, nutrients: &[f32; NUTRIENT_COUNT]) -> String {
        match self.try_recommend(nutrients) {
            Ok(label) => label,
            Err(reason) => {
                log::warn!("soil recommendation failed, degrading to sentinel: {reason}");
                UNKNOWN_SOIL.to_string()
            }
        }
    }
}
