//! Offline trainer for the soil recommendation model.
//!
//! Reads a labeled nutrient CSV, fits a random forest and writes the
//! SafeTensors model plus the class label sidecar consumed by the server.
//!
//! Usage: `train_soil [dataset.csv] [output-dir]`

use aprender::metrics::classification::accuracy;
use aprender::model_selection::train_test_split;
use aprender::primitives::{Matrix, Vector};
use aprender::tree::RandomForestClassifier;
use serde::Deserialize;
use shared::NUTRIENT_COUNT;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SOIL_MODEL_FILE: &str = "soil_model.safetensors";
const SOIL_LABELS_FILE: &str = "soil_labels.json";

const N_ESTIMATORS: usize = 100;
const TEST_FRACTION: f32 = 0.2;
const RANDOM_STATE: u64 = 42;

#[derive(Debug, Error)]
enum TrainError {
    #[error("failed to read dataset: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("failed to assemble training matrix: {0}")]
    Matrix(String),

    #[error("failed to split dataset: {0}")]
    Split(String),

    #[error("failed to fit forest: {0}")]
    Fit(String),

    #[error("failed to persist model: {0}")]
    Persist(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One labeled row: the seven nutrient features and the target soil type.
#[derive(Debug, Deserialize)]
struct SoilRecord {
    zinc: f32,
    copper: f32,
    iron: f32,
    nitrogen: f32,
    phosphorus: f32,
    potassium: f32,
    magnesium: f32,
    best_soil: String,
}

impl SoilRecord {
    fn features(&self) -> [f32; NUTRIENT_COUNT] {
        [
            self.zinc,
            self.copper,
            self.iron,
            self.nitrogen,
            self.phosphorus,
            self.potassium,
            self.magnesium,
        ]
    }
}

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let mut args = std::env::args().skip(1);
    let csv_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("datasets/soil_nutrient.csv"));
    let out_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("models"));

    if let Err(e) = run(&csv_path, &out_dir) {
        log::error!("training failed: {e}");
        std::process::exit(1);
    }
}

fn run(csv_path: &Path, out_dir: &Path) -> Result<(), TrainError> {
    log::info!("loading dataset from {}", csv_path.display());
    let file = fs::File::open(csv_path)?;
    let records = read_records(file)?;
    log::info!("{} samples loaded", records.len());

    let (x, y, labels) = build_dataset(&records)?;
    log::info!("{} soil classes: {labels:?}", labels.len());

    let (x_train, x_test, y_train, y_test) =
        train_test_split(&x, &y, TEST_FRACTION, Some(RANDOM_STATE)).map_err(TrainError::Split)?;

    let mut forest = RandomForestClassifier::new(N_ESTIMATORS).with_random_state(RANDOM_STATE);
    forest
        .fit(&x_train, &to_class_indices(&y_train))
        .map_err(|e| TrainError::Fit(e.to_string()))?;

    let predicted = forest.predict(&x_test);
    log::info!(
        "held-out accuracy: {:.3}",
        accuracy(&predicted, &to_class_indices(&y_test))
    );

    fs::create_dir_all(out_dir)?;
    let model_path = out_dir.join(SOIL_MODEL_FILE);
    forest
        .save_safetensors(&model_path)
        .map_err(TrainError::Persist)?;
    let labels_path = out_dir.join(SOIL_LABELS_FILE);
    fs::write(&labels_path, serde_json::to_string_pretty(&labels)?)?;

    log::info!(
        "wrote {} and {}",
        model_path.display(),
        labels_path.display()
    );
    Ok(())
}

fn read_records<R: Read>(reader: R) -> Result<Vec<SoilRecord>, TrainError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();
    for record in csv_reader.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

/// Flattens records into a feature matrix and an encoded target vector.
/// Soil labels are encoded by first occurrence; the returned table maps
/// class index back to label.
fn build_dataset(
    records: &[SoilRecord],
) -> Result<(Matrix<f32>, Vector<f32>, Vec<String>), TrainError> {
    if records.is_empty() {
        return Err(TrainError::EmptyDataset);
    }

    let mut labels: Vec<String> = Vec::new();
    let mut features = Vec::with_capacity(records.len() * NUTRIENT_COUNT);
    let mut targets = Vec::with_capacity(records.len());

    for record in records {
        features.extend_from_slice(&record.features());
        let class = match labels.iter().position(|l| l == &record.best_soil) {
            Some(index) => index,
            None => {
                labels.push(record.best_soil.clone());
                labels.len() - 1
            }
        };
        targets.push(class as f32);
    }

    let x = Matrix::from_vec(records.len(), NUTRIENT_COUNT, features)
        .map_err(|e| TrainError::Matrix(e.to_string()))?;
    Ok((x, Vector::from_slice(&targets), labels))
}

fn to_class_indices(y: &Vector<f32>) -> Vec<usize> {
    y.as_slice().iter().map(|&v| v as usize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
zinc,copper,iron,nitrogen,phosphorus,potassium,magnesium,best_soil
0.1,0.2,0.3,0.4,0.5,0.6,0.7,loamy
1.1,1.2,1.3,1.4,1.5,1.6,1.7,sandy
2.1,2.2,2.3,2.4,2.5,2.6,2.7,loamy
";

    #[test]
    fn parses_csv_rows_in_order() {
        let records = read_records(SAMPLE.as_bytes()).expect("parse");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].best_soil, "loamy");
        assert_eq!(records[1].features(), [1.1, 1.2, 1.3, 1.4, 1.5, 1.6, 1.7]);
    }

    #[test]
    fn encodes_labels_by_first_occurrence() {
        let records = read_records(SAMPLE.as_bytes()).expect("parse");
        let (x, y, labels) = build_dataset(&records).expect("dataset");
        assert_eq!(x.shape(), (3, NUTRIENT_COUNT));
        assert_eq!(labels, vec!["loamy".to_string(), "sandy".to_string()]);
        assert_eq!(to_class_indices(&y), vec![0, 1, 0]);
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let records = read_records("zinc,copper,iron,nitrogen,phosphorus,potassium,magnesium,best_soil\n".as_bytes())
            .expect("parse");
        assert!(matches!(
            build_dataset(&records),
            Err(TrainError::EmptyDataset)
        ));
    }

    #[test]
    fn malformed_row_is_a_csv_error() {
        let bad = "zinc,copper,iron,nitrogen,phosphorus,potassium,magnesium,best_soil\nnot,a,number,row,x,y,z,loamy\n";
        assert!(matches!(
            read_records(bad.as_bytes()),
            Err(TrainError::Csv(_))
        ));
    }
}
