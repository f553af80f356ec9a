use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// Nutrient names in the order the waste model emits its regression head
/// and the soil model expects its feature columns.
pub const NUTRIENT_LABELS: [&str; 7] = [
    "zinc",
    "copper",
    "iron",
    "nitrogen",
    "phosphorus",
    "potassium",
    "magnesium",
];

pub const NUTRIENT_COUNT: usize = NUTRIENT_LABELS.len();
pub const WASTE_CLASS_COUNT: usize = 6;

/// Class label reported when the top probability falls below the
/// confidence threshold.
pub const NOT_A_WASTE: &str = "Not a waste";

/// Label reported when the soil recommender cannot produce a prediction.
pub const UNKNOWN_SOIL: &str = "Unknown";

/// The six waste categories, in the output order of the classifier head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum WasteCategory {
    Cardboard,
    Glass,
    Metal,
    Paper,
    Plastic,
    Trash,
}

impl WasteCategory {
    /// Maps a classifier output index back to its category.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    /// Biodegradable categories are cardboard, paper and trash.
    pub fn is_biodegradable(self) -> bool {
        matches!(self, Self::Cardboard | Self::Paper | Self::Trash)
    }
}

/// Predicted nutrient concentrations, one field per nutrient so the JSON
/// object always carries exactly the seven expected keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientLevels {
    pub zinc: f32,
    pub copper: f32,
    pub iron: f32,
    pub nitrogen: f32,
    pub phosphorus: f32,
    pub potassium: f32,
    pub magnesium: f32,
}

impl NutrientLevels {
    /// Builds the record from the regression head output. Returns `None`
    /// when the vector does not have exactly one value per nutrient.
    pub fn from_vector(values: &[f32]) -> Option<Self> {
        if values.len() != NUTRIENT_COUNT {
            return None;
        }
        Some(Self {
            zinc: values[0],
            copper: values[1],
            iron: values[2],
            nitrogen: values[3],
            phosphorus: values[4],
            potassium: values[5],
            magnesium: values[6],
        })
    }

    /// Feature row for the soil recommender, in `NUTRIENT_LABELS` order.
    pub fn to_features(&self) -> [f32; NUTRIENT_COUNT] {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub class: String,
    pub biodegradable: bool,
    pub nutrient_levels: Option<NutrientLevels>,
    pub best_soil: Option<String>,
}

impl ClassifyResponse {
    /// Body returned when the top probability is below the threshold.
    pub fn suppressed() -> Self {
        Self {
            class: NOT_A_WASTE.to_string(),
            biodegradable: false,
            nutrient_levels: None,
            best_soil: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
