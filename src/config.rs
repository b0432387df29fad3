//! Analysis configuration
//!
//! Every tunable of the pipelines is an explicit field here. Analyzers receive
//! their section at construction; nothing is read from process-wide state.

use crate::types::{GlofError, GlofResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// SAR preprocessing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SarConfig {
    /// Classifier input size (height, width)
    pub target_size: (usize, usize),
    /// Bilateral filter radiometric bandwidth (intensity scaled to [0,1])
    pub sigma_color: f64,
    /// Bilateral filter spatial bandwidth in pixels
    pub sigma_spatial: f64,
    /// Floor applied before the dB conversion
    pub epsilon: f64,
}

impl Default for SarConfig {
    fn default() -> Self {
        Self {
            target_size: (128, 128),
            sigma_color: 0.05,
            sigma_spatial: 15.0,
            epsilon: 1e-10,
        }
    }
}

/// Lake/ice segmentation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LakeConfig {
    /// Meters per pixel
    pub resolution_m: f64,
    pub lake_dilation_radius: usize,
    pub ice_dilation_radius: usize,
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            resolution_m: 10.0,
            lake_dilation_radius: 5,
            ice_dilation_radius: 3,
        }
    }
}

/// Elevation flow model parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemConfig {
    /// Stride used when subsampling the grid
    pub downscale_factor: usize,
    /// Percentile (0-100) of the smoothed surface used as water level
    pub water_level_percentile: f64,
    /// Gaussian smoothing spread in (downsampled) pixels
    pub smoothing_sigma: f64,
}

impl Default for DemConfig {
    fn default() -> Self {
        Self {
            downscale_factor: 5,
            water_level_percentile: 90.0,
            smoothing_sigma: 2.0,
        }
    }
}

/// Inclusive HSV range using the 8-bit convention (H 0-179, S and V 0-255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] >= self.lower[c] && hsv[c] <= self.upper[c])
    }
}

/// Hue ranges typical of glacial lakes
pub fn glacial_lake_colors() -> Vec<HsvRange> {
    vec![
        HsvRange::new([75, 50, 50], [120, 255, 255]),  // turquoise / blue-green
        HsvRange::new([100, 50, 50], [140, 255, 255]), // deep blue
        HsvRange::new([60, 50, 50], [80, 255, 255]),   // emerald green
        HsvRange::new([90, 20, 150], [120, 100, 255]), // milky blue
    ]
}

/// Pyramidal optical flow parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalFlowParams {
    /// Number of pyramid levels above the base image
    pub levels: usize,
    /// Integration window size (odd)
    pub window_size: usize,
    /// Refinement iterations per level
    pub iterations: usize,
    /// Minimum structure-tensor determinant for a solvable window
    pub min_determinant: f64,
}

impl Default for OpticalFlowParams {
    fn default() -> Self {
        Self {
            levels: 3,
            window_size: 15,
            iterations: 3,
            min_determinant: 1e-6,
        }
    }
}

/// Water-motion detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub pixel_to_meter: f64,
    pub estimated_depth_m: f64,
    /// Displacement magnitude (pixels per frame step) treated as motion
    pub motion_threshold: f64,
    /// Contours with area at or below this are discarded
    pub min_region_area_px: f64,
    pub color_ranges: Vec<HsvRange>,
    /// Cap on analysed frame pairs per video
    pub max_frames: usize,
    /// Keep every Nth frame; flow is computed between consecutive kept frames
    pub frame_skip: usize,
    pub flow: OpticalFlowParams,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_to_meter: 0.01,
            estimated_depth_m: 0.5,
            motion_threshold: 1.5,
            min_region_area_px: 100.0,
            color_ranges: glacial_lake_colors(),
            max_frames: 100,
            frame_skip: 1,
            flow: OpticalFlowParams::default(),
        }
    }
}

/// Tabular predictor and sensor simulation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Half-width of the uniform drift applied per simulation step
    pub sensor_step: f64,
    /// Half-width of the uniform noise added to the heuristic probability
    pub heuristic_noise: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            sensor_step: 0.5,
            heuristic_noise: 0.05,
        }
    }
}

/// Complete configuration surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlofConfig {
    pub sar: SarConfig,
    pub lake: LakeConfig,
    pub dem: DemConfig,
    pub motion: MotionConfig,
    pub predictor: PredictorConfig,
}

impl GlofConfig {
    /// Load from a YAML file; absent keys keep their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> GlofResult<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> GlofResult<Self> {
        let config: GlofConfig = serde_yaml::from_str(contents)
            .map_err(|e| GlofError::Config(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GLOF_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> GlofResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> GlofResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override::<f64, _>(&lookup, "GLOF_RESOLUTION")? {
            self.lake.resolution_m = v;
        }
        if let Some(v) = parse_override::<usize, _>(&lookup, "GLOF_DILATION_LAKE")? {
            self.lake.lake_dilation_radius = v;
        }
        if let Some(v) = parse_override::<usize, _>(&lookup, "GLOF_DILATION_ICE")? {
            self.lake.ice_dilation_radius = v;
        }
        if let Some(v) = parse_override::<usize, _>(&lookup, "GLOF_DOWNSCALE_FACTOR")? {
            self.dem.downscale_factor = v;
        }
        if let Some(v) = parse_override::<f64, _>(&lookup, "GLOF_WATER_LEVEL_PERCENTILE")? {
            self.dem.water_level_percentile = v;
        }
        if let Some(v) = parse_override::<f64, _>(&lookup, "GLOF_PIXEL_TO_METER")? {
            self.motion.pixel_to_meter = v;
        }
        if let Some(v) = parse_override::<f64, _>(&lookup, "GLOF_ESTIMATED_DEPTH")? {
            self.motion.estimated_depth_m = v;
        }
        if let Some(v) = parse_override::<f64, _>(&lookup, "GLOF_MOTION_THRESHOLD")? {
            self.motion.motion_threshold = v;
        }
        if let Some(v) = parse_override::<usize, _>(&lookup, "GLOF_IMAGE_SIZE")? {
            self.sar.target_size = (v, v);
        }
        self.validate()
    }

    pub fn validate(&self) -> GlofResult<()> {
        if !(self.lake.resolution_m > 0.0) {
            return Err(GlofError::Config("lake.resolution_m must be positive".to_string()));
        }
        if self.dem.downscale_factor == 0 {
            return Err(GlofError::Config("dem.downscale_factor must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.dem.water_level_percentile) {
            return Err(GlofError::Config(
                "dem.water_level_percentile must lie in [0, 100]".to_string(),
            ));
        }
        if self.motion.frame_skip == 0 {
            return Err(GlofError::Config("motion.frame_skip must be at least 1".to_string()));
        }
        if self.motion.flow.window_size % 2 == 0 {
            return Err(GlofError::Config("motion.flow.window_size must be odd".to_string()));
        }
        if self.sar.target_size.0 == 0 || self.sar.target_size.1 == 0 {
            return Err(GlofError::Config("sar.target_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> GlofResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .map_err(|e| GlofError::Config(format!("{}={}: {}", key, raw, e)))?;
            log::debug!("Configuration override {}={}", key, raw);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_reference_constants() {
        let cfg = GlofConfig::default();
        assert_eq!(cfg.sar.target_size, (128, 128));
        assert_eq!(cfg.lake.lake_dilation_radius, 5);
        assert_eq!(cfg.lake.ice_dilation_radius, 3);
        assert_eq!(cfg.dem.downscale_factor, 5);
        assert_eq!(cfg.motion.color_ranges.len(), 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"lake:\n  resolution_m: 30.0\ndem:\n  water_level_percentile: 75\n")
            .unwrap();
        let path = temp.into_temp_path();
        let cfg = GlofConfig::load(&path).unwrap();
        assert_eq!(cfg.lake.resolution_m, 30.0);
        assert_eq!(cfg.lake.lake_dilation_radius, 5);
        assert_eq!(cfg.dem.water_level_percentile, 75.0);
        assert_eq!(cfg.dem.downscale_factor, 5);
    }

    #[test]
    fn test_invalid_yaml_values_rejected() {
        assert!(GlofConfig::from_yaml("dem:\n  downscale_factor: 0\n").is_err());
        assert!(GlofConfig::from_yaml("motion:\n  frame_skip: 0\n").is_err());
        assert!(GlofConfig::from_yaml("dem:\n  water_level_percentile: 120\n").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [("GLOF_RESOLUTION", "20"), ("GLOF_IMAGE_SIZE", "64")]
            .into_iter()
            .collect();
        let mut cfg = GlofConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.lake.resolution_m, 20.0);
        assert_eq!(cfg.sar.target_size, (64, 64));

        let mut cfg = GlofConfig::default();
        let bad = cfg.apply_overrides(|k| (k == "GLOF_DOWNSCALE_FACTOR").then(|| "x".to_string()));
        assert!(bad.is_err());
    }
}
