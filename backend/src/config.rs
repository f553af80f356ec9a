use crate::error::StartupError;
use std::env;
use std::path::PathBuf;

/// Runtime configuration, resolved once at startup. Model locations are
/// required; there are no built-in fallback paths.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// TorchScript artifact holding the dual-head waste model.
    pub waste_model_path: PathBuf,
    /// Directory holding the soil forest and its label sidecar.
    pub soil_model_dir: PathBuf,
    pub bind_address: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, StartupError> {
        let waste_model_path = PathBuf::from(require_var("WASTE_MODEL_PATH")?);
        let soil_model_dir = PathBuf::from(require_var("SOIL_MODEL_DIR")?);
        let port = env::var("PORT").unwrap_or_else(|_| "8081".to_string());

        Ok(Self {
            waste_model_path,
            soil_model_dir,
            bind_address: format!("0.0.0.0:{}", port),
        })
    }
}

fn require_var(name: &'static str) -> Result<String, StartupError> {
    env::var(name).map_err(|_| StartupError::MissingVar(name))
}
