//! Lake/ice segmentation and areal change metrics

use crate::config::LakeConfig;
use crate::core::batch::{run_batch, BatchReport};
use crate::core::morphology::{dilate, label_regions, LabeledRegions};
use crate::core::risk::{lake_risk_table, RiskTable, LAKE_CHANGE_PERCENT, WATER_PERCENTAGE};
use crate::core::trend::{TrendRecord, TrendSubject};
use crate::io::image::ImageLoader;
use crate::types::{percent_change, round_to, FeatureVector, GlofError, GlofResult, GrayImage, Mask, Modality, RiskAssessment};
use serde::Serialize;
use std::path::Path;

/// Global threshold maximising between-class variance of the histogram.
///
/// Pixels `<= threshold` form the dark class. A constant image returns its
/// single value, so every pixel falls in the dark class.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for &v in gray.iter() {
        histogram[v as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let sum_all: f64 = histogram.iter().enumerate().map(|(v, &n)| v as f64 * n as f64).sum();

    let mut best_t: Option<u8> = None;
    let mut best_variance = f64::NEG_INFINITY;
    let mut weight_dark = 0u64;
    let mut sum_dark = 0.0;

    for t in 0..256usize {
        weight_dark += histogram[t];
        sum_dark += t as f64 * histogram[t] as f64;
        let weight_light = total - weight_dark;
        if weight_dark == 0 || weight_light == 0 {
            continue;
        }
        let mean_dark = sum_dark / weight_dark as f64;
        let mean_light = (sum_all - sum_dark) / weight_light as f64;
        let diff = mean_dark - mean_light;
        let variance = weight_dark as f64 * weight_light as f64 * diff * diff;
        if variance > best_variance {
            best_variance = variance;
            best_t = Some(t as u8);
        }
    }

    best_t.unwrap_or_else(|| gray.iter().copied().min().unwrap_or(0))
}

/// Binary lake/ice masks of one image, labelled before and after growth
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub threshold: u8,
    pub lake_mask: Mask,
    pub ice_mask: Mask,
    pub lake_regions: LabeledRegions,
    pub ice_regions: LabeledRegions,
    pub lake_dilated: LabeledRegions,
    pub ice_dilated: LabeledRegions,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageDimensions {
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionChange {
    pub size_before_m2: f64,
    pub size_after_m2: f64,
    pub change_percent: f64,
}

impl RegionChange {
    fn from_pixels(before: usize, after: usize, pixel_area_m2: f64) -> Self {
        let size_before_m2 = before as f64 * pixel_area_m2;
        let size_after_m2 = after as f64 * pixel_area_m2;
        Self {
            size_before_m2,
            size_after_m2,
            change_percent: percent_change(size_before_m2, size_after_m2),
        }
    }

    fn rounded(&self) -> Self {
        Self {
            size_before_m2: round_to(self.size_before_m2, 2),
            size_after_m2: round_to(self.size_after_m2, 2),
            change_percent: round_to(self.change_percent, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IceChange {
    #[serde(flatten)]
    pub change: RegionChange,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coverage {
    pub total_area_m2: f64,
    /// Grown lake size over scene area, in percent
    pub water_percentage: f64,
}

/// Lake/ice metrics and risk for one optical image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LakeAnalysis {
    pub image_dimensions: ImageDimensions,
    pub resolution_m_per_pixel: f64,
    pub threshold: u8,
    pub lake: RegionChange,
    pub ice: IceChange,
    pub coverage: Coverage,
    pub risk: RiskAssessment,
}

impl LakeAnalysis {
    pub fn features(&self) -> FeatureVector {
        FeatureVector::new()
            .with("lake_size_before_m2", self.lake.size_before_m2)
            .with("lake_size_after_m2", self.lake.size_after_m2)
            .with(LAKE_CHANGE_PERCENT, self.lake.change_percent)
            .with("ice_size_before_m2", self.ice.change.size_before_m2)
            .with("ice_size_after_m2", self.ice.change.size_after_m2)
            .with("ice_change_percent", self.ice.change.change_percent)
            .with("total_area_m2", self.coverage.total_area_m2)
            .with(WATER_PERCENTAGE, self.coverage.water_percentage)
    }

    /// Copy with sizes and percentages rounded to 2 decimals
    pub fn to_presentation(&self) -> Self {
        Self {
            lake: self.lake.rounded(),
            ice: IceChange {
                change: self.ice.change.rounded(),
                status: self.ice.status.clone(),
            },
            coverage: Coverage {
                total_area_m2: round_to(self.coverage.total_area_m2, 2),
                water_percentage: round_to(self.coverage.water_percentage, 2),
            },
            ..self.clone()
        }
    }
}

impl TrendSubject for LakeAnalysis {
    fn trend_value(&self) -> f64 {
        self.lake.size_after_m2
    }

    fn risk(&self) -> &RiskAssessment {
        &self.risk
    }
}

/// Per-image results plus the lake-size trend across them
#[derive(Debug, Clone, Serialize)]
pub struct LakeComparison {
    pub report: BatchReport<LakeAnalysis>,
    pub trend: TrendRecord,
}

/// Optical lake/ice analyser
pub struct LakeAnalyzer {
    config: LakeConfig,
    table: RiskTable,
}

impl LakeAnalyzer {
    pub fn new(config: LakeConfig) -> Self {
        Self {
            config,
            table: lake_risk_table(),
        }
    }

    pub fn config(&self) -> &LakeConfig {
        &self.config
    }

    /// Threshold, label and grow the lake and ice classes
    pub fn segment(&self, gray: &GrayImage) -> SegmentationResult {
        let threshold = otsu_threshold(gray);
        let lake_mask = gray.mapv(|v| v <= threshold);
        let ice_mask = gray.mapv(|v| v > threshold);
        log::debug!("Otsu threshold {}", threshold);

        let lake_regions = label_regions(&lake_mask);
        let ice_regions = label_regions(&ice_mask);
        let lake_dilated = label_regions(&dilate(&lake_mask, self.config.lake_dilation_radius));
        let ice_dilated = label_regions(&dilate(&ice_mask, self.config.ice_dilation_radius));

        SegmentationResult {
            threshold,
            lake_mask,
            ice_mask,
            lake_regions,
            ice_regions,
            lake_dilated,
            ice_dilated,
        }
    }

    pub fn analyze(&self, gray: &GrayImage) -> GlofResult<LakeAnalysis> {
        self.analyze_with_resolution(gray, None)
    }

    /// Analyse with an optional per-call resolution (meters per pixel)
    pub fn analyze_with_resolution(&self, gray: &GrayImage, resolution_m: Option<f64>) -> GlofResult<LakeAnalysis> {
        let resolution = resolution_m.unwrap_or(self.config.resolution_m);
        if !(resolution > 0.0) || !resolution.is_finite() {
            return Err(GlofError::InvalidInput(format!("resolution must be positive, got {}", resolution)));
        }
        let (height, width) = gray.dim();
        if height == 0 || width == 0 {
            return Err(GlofError::InvalidInput("image has no pixels".to_string()));
        }

        log::info!("Analysing lake image {}x{} at {} m/px", width, height, resolution);
        let seg = self.segment(gray);
        let pixel_area = resolution * resolution;

        let lake = RegionChange::from_pixels(seg.lake_regions.largest(), seg.lake_dilated.largest(), pixel_area);
        let ice_change = RegionChange::from_pixels(seg.ice_regions.largest(), seg.ice_dilated.largest(), pixel_area);

        let total_area_m2 = (height * width) as f64 * pixel_area;
        let water_percentage = if total_area_m2 > 0.0 {
            lake.size_after_m2 / total_area_m2 * 100.0
        } else {
            0.0
        };

        let status = if ice_change.size_after_m2 == 0.0 {
            "No ice detected".to_string()
        } else {
            format!("{:.2} m²", ice_change.size_after_m2)
        };

        let features = FeatureVector::new()
            .with(LAKE_CHANGE_PERCENT, lake.change_percent)
            .with(WATER_PERCENTAGE, water_percentage);
        let risk = self.table.evaluate(&features);
        log::debug!(
            "Lake {:.1} -> {:.1} m2 ({:.2}%), water {:.2}% => {}",
            lake.size_before_m2,
            lake.size_after_m2,
            lake.change_percent,
            water_percentage,
            risk.risk_level
        );

        Ok(LakeAnalysis {
            image_dimensions: ImageDimensions { height, width },
            resolution_m_per_pixel: resolution,
            threshold: seg.threshold,
            lake,
            ice: IceChange {
                change: ice_change,
                status,
            },
            coverage: Coverage {
                total_area_m2,
                water_percentage,
            },
            risk,
        })
    }

    pub fn analyze_path<P: AsRef<Path>>(&self, path: P, resolution_m: Option<f64>) -> GlofResult<LakeAnalysis> {
        let gray = ImageLoader::load_gray_from_path(path)?;
        self.analyze_with_resolution(&gray, resolution_m)
    }

    pub fn analyze_bytes(&self, bytes: &[u8], resolution_m: Option<f64>) -> GlofResult<LakeAnalysis> {
        let gray = ImageLoader::load_gray_from_bytes(bytes)?;
        self.analyze_with_resolution(&gray, resolution_m)
    }

    /// Analyse a chronologically ordered image series and trend the grown lake size
    pub fn compare_images<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> LakeComparison {
        let report = run_batch(Modality::OpticalImage, paths, |p| self.analyze_path(p, None));
        let trend = TrendRecord::from_outcomes(&report.outcomes);
        log::info!("Lake trend over {} images: {:?}", report.successful, trend.trend);
        LakeComparison { report, trend }
    }
}

impl Default for LakeAnalyzer {
    fn default() -> Self {
        Self::new(LakeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskLevel;
    use ndarray::Array2;

    #[test]
    fn test_otsu_bimodal() {
        let gray = Array2::from_shape_fn((10, 10), |(i, _)| if i < 5 { 30 } else { 220 });
        let t = otsu_threshold(&gray);
        assert!(t >= 30 && t < 220);
    }

    #[test]
    fn test_otsu_constant_image() {
        let gray = Array2::from_elem((4, 4), 77u8);
        assert_eq!(otsu_threshold(&gray), 77);
        let seg = LakeAnalyzer::default().segment(&gray);
        assert!(seg.lake_mask.iter().all(|&v| v));
        assert_eq!(seg.ice_regions.count(), 0);
    }

    #[test]
    fn test_no_ice_status() {
        let gray = Array2::from_elem((8, 8), 10u8);
        let analysis = LakeAnalyzer::default().analyze(&gray).unwrap();
        assert_eq!(analysis.ice.status, "No ice detected");
        assert_eq!(analysis.ice.change.change_percent, 0.0);
        // Whole scene is lake, so coverage is total
        assert!((analysis.coverage.water_percentage - 100.0).abs() < 1e-9);
        assert_eq!(analysis.risk.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_resolution_override() {
        let gray = Array2::from_shape_fn((20, 20), |(i, j)| if i < 4 && j < 4 { 5 } else { 250 });
        let analyzer = LakeAnalyzer::default();
        let at_10 = analyzer.analyze(&gray).unwrap();
        let at_30 = analyzer.analyze_with_resolution(&gray, Some(30.0)).unwrap();
        assert_eq!(at_10.lake.size_before_m2, 1600.0);
        assert_eq!(at_30.lake.size_before_m2, 16.0 * 900.0);
        assert!(analyzer.analyze_with_resolution(&gray, Some(0.0)).is_err());
    }

    #[test]
    fn test_presentation_rounding_keeps_full_precision_source() {
        let gray = Array2::from_shape_fn((7, 9), |(i, j)| if (i + j) % 5 == 0 { 10 } else { 200 });
        let analysis = LakeAnalyzer::default().analyze_with_resolution(&gray, Some(3.3333)).unwrap();
        let shown = analysis.to_presentation();
        assert_eq!(shown.lake.size_before_m2, round_to(analysis.lake.size_before_m2, 2));
        assert_eq!(shown.risk, analysis.risk);
    }
}
