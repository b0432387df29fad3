//! Radar preprocessing: backscatter conversion, cleaning, normalisation,
//! resampling and classifier tensor layout.

use crate::config::SarConfig;
use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterParams};
use crate::io::image::ImageLoader;
use crate::types::{FloatGrid, GlofError, GlofResult, GrayImage, ImageTensor};
use ndarray::{Array2, Array4};
use std::path::Path;

/// Convert linear intensity to decibels, flooring non-positive samples at `epsilon`
pub fn to_db(linear: &FloatGrid, epsilon: f64) -> FloatGrid {
    log::debug!("Converting to dB scale");
    linear.mapv(|x| {
        let x = if x > 0.0 || x.is_nan() { x } else { epsilon };
        10.0 * x.log10()
    })
}

/// Replace non-finite samples with the mean of the finite ones.
///
/// A grid without any finite sample becomes all zero.
pub fn clean_non_finite(grid: &FloatGrid) -> FloatGrid {
    let (sum, count) = grid
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));

    if count == 0 {
        log::warn!("No finite samples; grid replaced by zeros");
        return Array2::zeros(grid.dim());
    }
    if count == grid.len() {
        return grid.clone();
    }

    let mean = sum / count as f64;
    log::debug!("Replacing {} non-finite samples with mean {:.4}", grid.len() - count, mean);
    grid.mapv(|v| if v.is_finite() { v } else { mean })
}

/// Min-max normalisation to [0,1]; a constant grid maps to zeros
pub fn normalize_min_max(grid: &FloatGrid) -> FloatGrid {
    let (min, max) = grid
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let range = max - min;
    if range > 0.0 && range.is_finite() {
        grid.mapv(|v| (v - min) / range)
    } else {
        Array2::zeros(grid.dim())
    }
}

/// Bilinear resampling with pixel-centre alignment
pub fn resize_bilinear(grid: &FloatGrid, target: (usize, usize)) -> GlofResult<FloatGrid> {
    let (src_h, src_w) = grid.dim();
    let (dst_h, dst_w) = target;
    if src_h == 0 || src_w == 0 || dst_h == 0 || dst_w == 0 {
        return Err(GlofError::InvalidInput(format!(
            "cannot resize {}x{} to {}x{}",
            src_h, src_w, dst_h, dst_w
        )));
    }
    if (src_h, src_w) == target {
        return Ok(grid.clone());
    }

    let scale_y = src_h as f64 / dst_h as f64;
    let scale_x = src_w as f64 / dst_w as f64;

    // Source coordinate, lower index and fractional weight along one axis
    let sample = |dst: usize, scale: f64, len: usize| -> (usize, usize, f64) {
        let src = ((dst as f64 + 0.5) * scale - 0.5).max(0.0);
        let i0 = (src.floor() as usize).min(len - 1);
        let i1 = (i0 + 1).min(len - 1);
        let frac = if i1 == i0 { 0.0 } else { src - i0 as f64 };
        (i0, i1, frac)
    };

    let rows: Vec<_> = (0..dst_h).map(|i| sample(i, scale_y, src_h)).collect();
    let cols: Vec<_> = (0..dst_w).map(|j| sample(j, scale_x, src_w)).collect();

    Ok(Array2::from_shape_fn((dst_h, dst_w), |(i, j)| {
        let (i0, i1, fi) = rows[i];
        let (j0, j1, fj) = cols[j];
        grid[[i0, j0]] * (1.0 - fi) * (1.0 - fj)
            + grid[[i1, j0]] * fi * (1.0 - fj)
            + grid[[i0, j1]] * (1.0 - fi) * fj
            + grid[[i1, j1]] * fi * fj
    }))
}

/// Replicate a single band into three channels and add the batch axis
pub fn to_tensor(grid: &FloatGrid) -> ImageTensor {
    let (h, w) = grid.dim();
    Array4::from_shape_fn((1, h, w, 3), |(_, i, j, _)| grid[[i, j]] as f32)
}

/// Intermediate products of the radar pipeline, in stage order
#[derive(Debug, Clone)]
pub struct PreprocessStages {
    pub filtered: FloatGrid,
    pub sigma0_db: FloatGrid,
    pub cleaned: FloatGrid,
    pub normalized: FloatGrid,
    pub resized: FloatGrid,
}

/// Radar preprocessing pipeline producing classifier-ready tensors
pub struct SarPreprocessor {
    config: SarConfig,
    filter: SpeckleFilter,
}

impl SarPreprocessor {
    pub fn new(config: SarConfig) -> Self {
        let filter = SpeckleFilter::with_params(SpeckleFilterParams::from(&config));
        Self { config, filter }
    }

    /// Replace the speckle filter (window size etc.)
    pub fn with_filter(mut self, filter: SpeckleFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &SarConfig {
        &self.config
    }

    /// Run every stage on a digital-number image, keeping the intermediates
    pub fn run_stages(&self, image: &GrayImage) -> GlofResult<PreprocessStages> {
        log::info!("Preprocessing SAR image {:?}", image.dim());

        let intensity = image.mapv(|dn| dn as f64 / 255.0);
        let filtered = self.filter.apply_bilateral(&intensity)?;
        let sigma0_db = to_db(&filtered, self.config.epsilon);
        let cleaned = clean_non_finite(&sigma0_db);
        let normalized = normalize_min_max(&cleaned);
        let resized = resize_bilinear(&normalized, self.config.target_size)?;

        Ok(PreprocessStages {
            filtered,
            sigma0_db,
            cleaned,
            normalized,
            resized,
        })
    }

    /// Full pipeline; output shape is (1, height, width, 3)
    pub fn preprocess(&self, image: &GrayImage) -> GlofResult<ImageTensor> {
        let stages = self.run_stages(image)?;
        Ok(to_tensor(&stages.resized))
    }

    pub fn preprocess_path<P: AsRef<Path>>(&self, path: P) -> GlofResult<ImageTensor> {
        let image = ImageLoader::load_gray_from_path(path)?;
        self.preprocess(&image)
    }

    pub fn preprocess_bytes(&self, bytes: &[u8]) -> GlofResult<ImageTensor> {
        let image = ImageLoader::load_gray_from_bytes(bytes)?;
        self.preprocess(&image)
    }
}
