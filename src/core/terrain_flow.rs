//! Gradient-based surface flow model over elevation grids

use crate::config::DemConfig;
use crate::core::risk::{dem_risk_table, RiskTable, AVG_FLOW_VELOCITY, OVERFLOW_RATE};
use crate::io::dem::{DemReader, ElevationGrid};
use crate::types::{round_to, FeatureVector, FloatGrid, GlofError, GlofResult, Mask, RasterMetadata, RiskAssessment};
use ndarray::{s, Array2, Axis};
use serde::Serialize;
use std::path::Path;

/// Half-sample symmetric boundary: `d c b a | a b c d | d c b a`
fn reflect_index(i: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let m = i.rem_euclid(period);
    (if m < n { m } else { period - 1 - m }) as usize
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (4.0 * sigma + 0.5) as usize;
    let denom = 2.0 * sigma * sigma;
    let raw: Vec<f64> = (0..=2 * radius)
        .map(|k| {
            let x = k as f64 - radius as f64;
            (-(x * x) / denom).exp()
        })
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

fn smooth_axis(grid: &FloatGrid, kernel: &[f64], axis: Axis) -> FloatGrid {
    let radius = (kernel.len() / 2) as isize;
    let n = grid.len_of(axis);
    let mut out = grid.clone();

    for (src, mut dst) in grid.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        for i in 0..n {
            let center = src[i];
            if !center.is_finite() {
                continue;
            }
            // Centred accumulation keeps flat surfaces exactly flat
            let mut offset = 0.0;
            let mut weight = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let v = src[reflect_index(i as isize + k as isize - radius, n)];
                if v.is_finite() {
                    offset += w * (v - center);
                    weight += w;
                }
            }
            dst[i] = center + offset / weight;
        }
    }
    out
}

/// Separable Gaussian smoothing with reflected borders.
///
/// Non-finite cells stay non-finite and are left out of their neighbours'
/// weighted means.
pub fn gaussian_smooth(grid: &FloatGrid, sigma: f64) -> FloatGrid {
    if !(sigma > 0.0) || grid.is_empty() {
        return grid.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let rows_done = smooth_axis(grid, &kernel, Axis(0));
    smooth_axis(&rows_done, &kernel, Axis(1))
}

fn gradient_axis(grid: &FloatGrid, axis: Axis) -> FloatGrid {
    let n = grid.len_of(axis);
    let mut out = Array2::zeros(grid.dim());
    if n < 2 {
        return out;
    }
    for (src, mut dst) in grid.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        dst[0] = src[1] - src[0];
        dst[n - 1] = src[n - 1] - src[n - 2];
        for i in 1..n - 1 {
            dst[i] = (src[i + 1] - src[i - 1]) / 2.0;
        }
    }
    out
}

/// Central-difference gradient with one-sided edges: (d/drow, d/dcol)
pub fn gradient(grid: &FloatGrid) -> (FloatGrid, FloatGrid) {
    (gradient_axis(grid, Axis(0)), gradient_axis(grid, Axis(1)))
}

/// Linear-interpolated percentile (0-100) over finite cells
pub fn nan_percentile(grid: &FloatGrid, percentile: f64) -> Option<f64> {
    let mut values: Vec<f64> = grid.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = percentile.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}

fn nan_mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Stride subsampling, keeping every `factor`-th row and column
pub fn downsample(grid: &FloatGrid, factor: usize) -> FloatGrid {
    let step = factor.max(1) as isize;
    grid.slice(s![..;step, ..;step]).to_owned()
}

/// Downhill flow over a smoothed surface
#[derive(Debug, Clone)]
pub struct FlowField {
    pub smoothed: FloatGrid,
    /// Column-direction component of the downhill gradient
    pub dx: FloatGrid,
    /// Row-direction component of the downhill gradient
    pub dy: FloatGrid,
    pub magnitude: FloatGrid,
    /// `atan2(dy, dx)` in degrees, [0, 360)
    pub direction_deg: FloatGrid,
    pub water_level: f64,
    /// Cells at or below the water level
    pub water_mask: Mask,
}

impl FlowField {
    /// Build the flow field of an already downsampled grid
    pub fn compute(grid: &FloatGrid, smoothing_sigma: f64, water_level_percentile: f64) -> GlofResult<Self> {
        let smoothed = gaussian_smooth(grid, smoothing_sigma);
        let downhill = smoothed.mapv(|v| -v);
        let (dy, dx) = gradient(&downhill);
        let magnitude = ndarray::Zip::from(&dx).and(&dy).map_collect(|&gx, &gy| (gx * gx + gy * gy).sqrt());
        let direction_deg = ndarray::Zip::from(&dx)
            .and(&dy)
            .map_collect(|&gx, &gy| gy.atan2(gx).to_degrees().rem_euclid(360.0));

        let water_level = nan_percentile(&smoothed, water_level_percentile)
            .ok_or_else(|| GlofError::Processing("smoothed surface has no finite cells".to_string()))?;
        let water_mask = smoothed.mapv(|v| v <= water_level);

        Ok(Self {
            smoothed,
            dx,
            dy,
            magnitude,
            direction_deg,
            water_level,
            water_mask,
        })
    }

    /// Mean flow direction in degrees from the averaged components
    pub fn mean_direction_deg(&self) -> Option<f64> {
        let mx = nan_mean(self.dx.iter().copied())?;
        let my = nan_mean(self.dy.iter().copied())?;
        if mx == 0.0 && my == 0.0 {
            return None;
        }
        Some(my.atan2(mx).to_degrees().rem_euclid(360.0))
    }

    /// Sum of `water_level - elevation` over submerged cells
    pub fn submerged_volume(&self) -> f64 {
        ndarray::Zip::from(&self.smoothed)
            .and(&self.water_mask)
            .fold(0.0, |acc, &z, &wet| if wet && z.is_finite() { acc + (self.water_level - z) } else { acc })
    }

    pub fn submerged_cells(&self) -> usize {
        self.water_mask.iter().filter(|&&wet| wet).count()
    }

    /// Sum of flow magnitude over submerged cells
    pub fn overflow_rate(&self) -> f64 {
        ndarray::Zip::from(&self.magnitude)
            .and(&self.water_mask)
            .fold(0.0, |acc, &m, &wet| if wet && m.is_finite() { acc + m } else { acc })
    }

    pub fn mean_magnitude(&self) -> f64 {
        nan_mean(self.magnitude.iter().copied()).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridDimensions {
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElevationStats {
    pub min_m: f64,
    pub max_m: f64,
    pub mean_m: f64,
    pub water_level_threshold_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterFlowMetrics {
    pub submerged_volume_m3: f64,
    pub submerged_area_m2: f64,
    pub overflow_rate_m3_per_s: f64,
    pub avg_flow_velocity_m_per_s: f64,
    pub mean_flow_direction_deg: Option<f64>,
}

/// Hydrological metrics and risk for one elevation grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemAnalysis {
    pub source: String,
    /// Grid size after downsampling
    pub dimensions: GridDimensions,
    pub downscale_factor: usize,
    pub water_level_percentile: f64,
    pub elevation: ElevationStats,
    pub water_flow: WaterFlowMetrics,
    pub risk: RiskAssessment,
    #[serde(skip)]
    pub metadata: RasterMetadata,
}

impl DemAnalysis {
    pub fn features(&self) -> FeatureVector {
        FeatureVector::new()
            .with("submerged_volume_m3", self.water_flow.submerged_volume_m3)
            .with("submerged_area_m2", self.water_flow.submerged_area_m2)
            .with(OVERFLOW_RATE, self.water_flow.overflow_rate_m3_per_s)
            .with(AVG_FLOW_VELOCITY, self.water_flow.avg_flow_velocity_m_per_s)
    }

    /// Copy rounded for display: 2 decimals, 4 for the velocity
    pub fn to_presentation(&self) -> Self {
        let e = &self.elevation;
        let w = &self.water_flow;
        Self {
            elevation: ElevationStats {
                min_m: round_to(e.min_m, 2),
                max_m: round_to(e.max_m, 2),
                mean_m: round_to(e.mean_m, 2),
                water_level_threshold_m: round_to(e.water_level_threshold_m, 2),
            },
            water_flow: WaterFlowMetrics {
                submerged_volume_m3: round_to(w.submerged_volume_m3, 2),
                submerged_area_m2: round_to(w.submerged_area_m2, 2),
                overflow_rate_m3_per_s: round_to(w.overflow_rate_m3_per_s, 2),
                avg_flow_velocity_m_per_s: round_to(w.avg_flow_velocity_m_per_s, 4),
                mean_flow_direction_deg: w.mean_flow_direction_deg.map(|d| round_to(d, 2)),
            },
            ..self.clone()
        }
    }
}

/// Per-call overrides of the configured flow parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct DemOverrides {
    pub downscale_factor: Option<usize>,
    pub water_level_percentile: Option<f64>,
}

/// Elevation flow analyser
pub struct DemAnalyzer {
    config: DemConfig,
    table: RiskTable,
}

impl DemAnalyzer {
    pub fn new(config: DemConfig) -> Self {
        Self {
            config,
            table: dem_risk_table(),
        }
    }

    pub fn config(&self) -> &DemConfig {
        &self.config
    }

    pub fn analyze(&self, grid: &ElevationGrid) -> GlofResult<DemAnalysis> {
        self.analyze_with(grid, DemOverrides::default())
    }

    pub fn analyze_with(&self, grid: &ElevationGrid, overrides: DemOverrides) -> GlofResult<DemAnalysis> {
        let downscale = overrides.downscale_factor.unwrap_or(self.config.downscale_factor);
        let percentile = overrides
            .water_level_percentile
            .unwrap_or(self.config.water_level_percentile);
        if downscale == 0 {
            return Err(GlofError::InvalidInput("downscale factor must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&percentile) {
            return Err(GlofError::InvalidInput(format!("percentile {} outside [0, 100]", percentile)));
        }

        log::info!("Analysing DEM {} ({:?}), downscale {}", grid.source_id, grid.dim(), downscale);
        let reduced = downsample(&grid.data, downscale);
        let (height, width) = reduced.dim();

        let (min_m, max_m) = reduced
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean_m = nan_mean(reduced.iter().copied())
            .ok_or_else(|| GlofError::Processing(format!("{}: elevation grid has no finite cells", grid.source_id)))?;

        let flow = FlowField::compute(&reduced, self.config.smoothing_sigma, percentile)?;
        let cell_area = (downscale * downscale) as f64;

        let water_flow = WaterFlowMetrics {
            submerged_volume_m3: flow.submerged_volume(),
            submerged_area_m2: flow.submerged_cells() as f64 * cell_area,
            overflow_rate_m3_per_s: flow.overflow_rate(),
            avg_flow_velocity_m_per_s: flow.mean_magnitude(),
            mean_flow_direction_deg: flow.mean_direction_deg(),
        };
        log::debug!("Water level {:.2} m, flow metrics {:?}", flow.water_level, water_flow);

        let risk = self.table.evaluate(
            &FeatureVector::new()
                .with(OVERFLOW_RATE, water_flow.overflow_rate_m3_per_s)
                .with(AVG_FLOW_VELOCITY, water_flow.avg_flow_velocity_m_per_s),
        );

        Ok(DemAnalysis {
            source: grid.source_id.clone(),
            dimensions: GridDimensions { height, width },
            downscale_factor: downscale,
            water_level_percentile: percentile,
            elevation: ElevationStats {
                min_m,
                max_m,
                mean_m,
                water_level_threshold_m: flow.water_level,
            },
            water_flow,
            risk,
            metadata: grid.metadata.clone(),
        })
    }

    pub fn analyze_path<P: AsRef<Path>>(&self, path: P, no_data: Option<f64>, overrides: DemOverrides) -> GlofResult<DemAnalysis> {
        let grid = DemReader::read_dem(path, no_data)?;
        self.analyze_with(&grid, overrides)
    }

    pub fn analyze_bytes(&self, bytes: &[u8], no_data: Option<f64>, overrides: DemOverrides) -> GlofResult<DemAnalysis> {
        let grid = DemReader::read_dem_bytes(bytes, no_data)?;
        self.analyze_with(&grid, overrides)
    }

    /// Analyse a buffer known to be an SRTM `.hgt` grid
    pub fn analyze_hgt_bytes(&self, bytes: &[u8], no_data: Option<f64>, overrides: DemOverrides) -> GlofResult<DemAnalysis> {
        let grid = DemReader::read_hgt_bytes(bytes, no_data)?;
        self.analyze_with(&grid, overrides)
    }
}

impl Default for DemAnalyzer {
    fn default() -> Self {
        Self::new(DemConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskLevel;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 4), 0);
        assert_eq!(reflect_index(-2, 4), 1);
        assert_eq!(reflect_index(4, 4), 3);
        assert_eq!(reflect_index(5, 4), 2);
        assert_eq!(reflect_index(-3, 1), 0);
    }

    #[test]
    fn test_gradient_matches_central_differences() {
        let grid = array![[1.0, 2.0, 4.0], [1.0, 3.0, 9.0]];
        let (gy, gx) = gradient(&grid);
        assert_eq!(gx.row(0).to_vec(), vec![1.0, 1.5, 2.0]);
        assert_eq!(gx.row(1).to_vec(), vec![2.0, 4.0, 6.0]);
        assert_eq!(gy.row(0).to_vec(), vec![0.0, 1.0, 5.0]);
        let (gy1, _) = gradient(&array![[1.0, 2.0]]);
        assert!(gy1.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_percentile_ignores_nan() {
        let grid = array![[1.0, f64::NAN], [3.0, 5.0]];
        assert_abs_diff_eq!(nan_percentile(&grid, 50.0).unwrap(), 3.0);
        assert_abs_diff_eq!(nan_percentile(&grid, 75.0).unwrap(), 4.0);
        assert!(nan_percentile(&array![[f64::NAN]], 90.0).is_none());
    }

    #[test]
    fn test_smoothing_preserves_flat_and_voids() {
        let mut grid = Array2::from_elem((12, 12), 250.0);
        grid[[3, 3]] = f64::NAN;
        let smoothed = gaussian_smooth(&grid, 2.0);
        assert!(smoothed[[3, 3]].is_nan());
        assert!(smoothed.iter().filter(|v| v.is_finite()).all(|&v| v == 250.0));
    }

    #[test]
    fn test_smoothing_reduces_peak() {
        let mut grid = Array2::zeros((15, 15));
        grid[[7, 7]] = 100.0;
        let smoothed = gaussian_smooth(&grid, 2.0);
        assert!(smoothed[[7, 7]] < 100.0);
        assert!(smoothed[[7, 8]] > 0.0);
        assert_abs_diff_eq!(smoothed.sum(), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_downsample_stride() {
        let grid = Array2::from_shape_fn((7, 7), |(i, j)| (i * 7 + j) as f64);
        let reduced = downsample(&grid, 3);
        assert_eq!(reduced.dim(), (3, 3));
        assert_eq!(reduced[[1, 1]], 24.0);
    }

    #[test]
    fn test_slope_flows_downhill() {
        // Elevation rising with column index: water flows toward column 0
        let grid = Array2::from_shape_fn((20, 20), |(_, j)| j as f64 * 10.0);
        let flow = FlowField::compute(&grid, 0.0, 90.0).unwrap();
        assert_abs_diff_eq!(flow.dx[[10, 10]], -10.0);
        assert_abs_diff_eq!(flow.direction_deg[[10, 10]], 180.0);
        assert_abs_diff_eq!(flow.mean_direction_deg().unwrap(), 180.0);
    }

    #[test]
    fn test_all_void_grid_is_processing_error() {
        let grid = ElevationGrid::from_array(Array2::from_elem((10, 10), -32768.0), Some(-32768.0), "voids");
        let err = DemAnalyzer::default().analyze(&grid).unwrap_err();
        assert!(matches!(err, GlofError::Processing(_)));
    }

    #[test]
    fn test_steep_terrain_is_high_risk() {
        let grid = ElevationGrid::from_array(
            Array2::from_shape_fn((60, 60), |(i, j)| (i + j) as f64 * 5.0),
            None,
            "ramp",
        );
        let analysis = DemAnalyzer::default().analyze(&grid).unwrap();
        assert_eq!(analysis.dimensions, GridDimensions { height: 12, width: 12 });
        assert!(analysis.water_flow.avg_flow_velocity_m_per_s > 0.5);
        assert_eq!(analysis.risk.risk_level, RiskLevel::High);
    }
}
