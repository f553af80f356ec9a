use crate::error::{ApiError, StartupError};
use shared::{NUTRIENT_COUNT, WASTE_CLASS_COUNT};
use std::path::Path;
use std::sync::Mutex;
use tch::{CModule, Device, IValue, Kind, Tensor};

/// Default soil features fed alongside the image when the caller supplies
/// none, in nutrient label order.
pub const DEFAULT_SOIL_FEATURES: [f32; NUTRIENT_COUNT] = [0.0; NUTRIENT_COUNT];

/// Minimum top-class probability required to report a classification
/// instead of suppressing it as "Not a waste".
pub const CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Seam for the dual-head waste model so route tests can substitute stubs.
pub trait WasteClassifier: Send + Sync {
    /// Returns the class probability distribution and the nutrient
    /// regression vector for one image.
    fn predict(
        &self,
        image: &Tensor,
        soil_features: &[f32; NUTRIENT_COUNT],
    ) -> Result<(Vec<f32>, Vec<f32>), ApiError>;
}

/// Pretrained TorchScript model with a class head and a nutrient head.
/// `forward_is` reentrancy is not guaranteed by libtorch, so calls are
/// serialized behind a mutex.
pub struct WasteModel {
    module: Mutex<CModule>,
    device: Device,
}

impl WasteModel {
    pub fn load(path: &Path) -> Result<Self, StartupError> {
        if !path.exists() {
            return Err(StartupError::ModelMissing {
                path: path.to_path_buf(),
            });
        }
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path, device).map_err(|e| StartupError::ModelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        log::info!("loaded waste model from {} on {:?}", path.display(), device);
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }
}

impl WasteClassifier for WasteModel {
    fn predict(
        &self,
        image: &Tensor,
        soil_features: &[f32; NUTRIENT_COUNT],
    ) -> Result<(Vec<f32>, Vec<f32>), ApiError> {
        let image = image.to_device(self.device);
        let soil = Tensor::from_slice(soil_features)
            .view([1, NUTRIENT_COUNT as i64])
            .to_device(self.device);

        let module = self
            .module
            .lock()
            .map_err(|_| ApiError::Inference("waste model lock poisoned".to_string()))?;
        let output = module
            .forward_is(&[IValue::Tensor(image), IValue::Tensor(soil)])
            .map_err(|e| ApiError::Inference(e.to_string()))?;
        drop(module);

        let (class_head, nutrient_head) = match output {
            IValue::Tuple(values) => match <[IValue; 2]>::try_from(values) {
                Ok([IValue::Tensor(class), IValue::Tensor(nutrients)]) => (class, nutrients),
                _ => {
                    return Err(ApiError::Inference(
                        "expected a (class, nutrients) tensor pair".to_string(),
                    ));
                }
            },
            other => {
                return Err(ApiError::Inference(format!(
                    "unexpected model output: {other:?}"
                )));
            }
        };

        let probabilities = tensor_to_vec(&class_head.softmax(-1, Kind::Float));
        let nutrients = tensor_to_vec(&nutrient_head);

        if probabilities.len() != WASTE_CLASS_COUNT {
            return Err(ApiError::Inference(format!(
                "class head emitted {} values, expected {WASTE_CLASS_COUNT}",
                probabilities.len()
            )));
        }
        if nutrients.len() != NUTRIENT_COUNT {
            return Err(ApiError::Inference(format!(
                "nutrient head emitted {} values, expected {NUTRIENT_COUNT}",
                nutrients.len()
            )));
        }
        Ok((probabilities, nutrients))
    }
}

fn tensor_to_vec(tensor: &Tensor) -> Vec<f32> {
    let flat = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .view([-1]);
    let len = flat.size()[0] as usize;
    let mut values = vec![0.0f32; len];
    flat.copy_data(&mut values, len);
    values
}

/// Arg-max over the class distribution; `None` on an empty slice.
pub fn top_class(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}
