use ndarray::{Array2, Array3, Array4};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 8-bit single band image (rows x cols)
pub type GrayImage = Array2<u8>;

/// 8-bit RGB image (rows x cols x 3), channel order R, G, B
pub type RgbImage = Array3<u8>;

/// Real-valued raster used by every numeric stage
pub type FloatGrid = Array2<f64>;

/// Binary mask (true = member)
pub type Mask = Array2<bool>;

/// Classifier input tensor (batch x height x width x channels)
pub type ImageTensor = Array4<f32>;

/// Observation modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    RadarImage,
    OpticalImage,
    ElevationGrid,
    VideoFramePair,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::RadarImage => write!(f, "radar_image"),
            Modality::OpticalImage => write!(f, "optical_image"),
            Modality::ElevationGrid => write!(f, "elevation_grid"),
            Modality::VideoFramePair => write!(f, "video_frame_pair"),
        }
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }
}

/// Geospatial metadata attached to a raw observation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    /// Meters per pixel, when known
    pub pixel_resolution: Option<f64>,
    /// Sentinel used for missing samples
    pub no_data: Option<f64>,
    /// Carried through untouched; none of the analyses use it
    pub geo_transform: Option<GeoTransform>,
}

/// Discrete risk levels, ascending severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Moderate => write!(f, "MODERATE"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Outcome of one risk classification. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub numeric_score: Option<f64>,
    pub message: String,
    pub contributing_factors: Vec<String>,
}

impl RiskAssessment {
    pub fn new(risk_level: RiskLevel, message: impl Into<String>) -> Self {
        Self {
            risk_level,
            numeric_score: None,
            message: message.into(),
            contributing_factors: Vec::new(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.numeric_score = Some(score);
        self
    }

    pub fn with_factors<I, S>(mut self, factors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contributing_factors = factors.into_iter().map(Into::into).collect();
        self
    }
}

/// Named quantities handed from the analysis stages to the risk tables.
///
/// Risk tables only ever see these values, never the arrays they came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(BTreeMap<String, f64>);

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Percentage change `(after - before) / before * 100`, 0 when `before == 0`
pub fn percent_change(before: f64, after: f64) -> f64 {
    if before > 0.0 {
        (after - before) / before * 100.0
    } else {
        0.0
    }
}

/// Round for presentation only; computations keep full precision
pub fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Error types for GLOF analysis
#[derive(Debug, thiserror::Error)]
pub enum GlofError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not decode {source_id}: {reason}")]
    Decode { source_id: String, reason: String },

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Classifier failure: {0}")]
    Classifier(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl GlofError {
    pub fn decode(source_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        GlofError::Decode {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for GLOF operations
pub type GlofResult<T> = Result<T, GlofError>;
