//! Bilateral speckle suppression for radar intensity grids

use crate::config::SarConfig;
use crate::types::{FloatGrid, GlofError, GlofResult};
use ndarray::Array2;

/// Treatment of window samples that fall outside the image
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BorderMode {
    /// Drop them from the weighted mean, so flat images stay exactly flat
    Skip,
    /// Pad with a fixed value; `Constant(0.0)` is scikit-image's `denoise_bilateral` behaviour
    Constant(f64),
}

/// Speckle filtering parameters
#[derive(Debug, Clone)]
pub struct SpeckleFilterParams {
    /// Radiometric bandwidth, in units of the [0,1] intensity scale
    pub sigma_color: f64,
    /// Spatial bandwidth in pixels
    pub sigma_spatial: f64,
    /// Half window; `None` derives `ceil(3 * sigma_spatial)`
    pub radius: Option<usize>,
    pub border: BorderMode,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self {
            sigma_color: 0.05,
            sigma_spatial: 15.0,
            radius: None,
            border: BorderMode::Skip,
        }
    }
}

impl From<&SarConfig> for SpeckleFilterParams {
    fn from(config: &SarConfig) -> Self {
        Self {
            sigma_color: config.sigma_color,
            sigma_spatial: config.sigma_spatial,
            radius: None,
            border: BorderMode::Skip,
        }
    }
}

/// Edge-preserving bilateral speckle filter
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
}

impl SpeckleFilter {
    /// Create a new speckle filter with default parameters
    pub fn new() -> Self {
        Self {
            params: SpeckleFilterParams::default(),
        }
    }

    /// Create a speckle filter with custom parameters
    pub fn with_params(params: SpeckleFilterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SpeckleFilterParams {
        &self.params
    }

    pub fn radius(&self) -> usize {
        self.params
            .radius
            .unwrap_or_else(|| (3.0 * self.params.sigma_spatial).ceil().max(1.0) as usize)
    }

    /// Apply the bilateral filter to an intensity grid scaled to [0,1].
    ///
    /// Each output pixel is the weighted mean of its window, with weights
    /// `exp(-d²/2σs²) · exp(-Δ²/2σc²)`. Non-finite samples do not
    /// contribute; samples outside the image follow [`BorderMode`].
    pub fn apply_bilateral(&self, image: &FloatGrid) -> GlofResult<FloatGrid> {
        let (height, width) = image.dim();
        if height == 0 || width == 0 {
            return Err(GlofError::InvalidInput("cannot filter an empty image".to_string()));
        }
        if !(self.params.sigma_color > 0.0) || !(self.params.sigma_spatial > 0.0) {
            return Err(GlofError::InvalidInput(format!(
                "bilateral bandwidths must be positive (color {}, spatial {})",
                self.params.sigma_color, self.params.sigma_spatial
            )));
        }

        let radius = self.radius();
        log::info!("Applying bilateral speckle filter ({}x{})", height, width);
        log::debug!("Filter parameters: {:?}, radius {}", self.params, radius);

        let spatial = self.spatial_kernel(radius);

        #[cfg(feature = "parallel")]
        let filtered = self.filter_rows_parallel(image, &spatial, radius)?;

        #[cfg(not(feature = "parallel"))]
        let filtered = {
            let mut out = Array2::zeros((height, width));
            for i in 0..height {
                for j in 0..width {
                    out[[i, j]] = self.filter_pixel(image, &spatial, radius, i, j);
                }
            }
            out
        };

        Ok(filtered)
    }

    fn spatial_kernel(&self, radius: usize) -> Array2<f64> {
        let size = 2 * radius + 1;
        let denom = 2.0 * self.params.sigma_spatial * self.params.sigma_spatial;
        Array2::from_shape_fn((size, size), |(a, b)| {
            let di = a as f64 - radius as f64;
            let dj = b as f64 - radius as f64;
            (-(di * di + dj * dj) / denom).exp()
        })
    }

    fn filter_pixel(&self, image: &FloatGrid, spatial: &Array2<f64>, radius: usize, i: usize, j: usize) -> f64 {
        let (height, width) = image.dim();
        let center = image[[i, j]];
        if !center.is_finite() {
            return center;
        }

        let color_denom = 2.0 * self.params.sigma_color * self.params.sigma_color;
        let size = 2 * radius + 1;

        let mut weighted = 0.0;
        let mut total = 0.0;
        for a in 0..size {
            for b in 0..size {
                let ii = (i + a).checked_sub(radius).filter(|&ii| ii < height);
                let jj = (j + b).checked_sub(radius).filter(|&jj| jj < width);
                let value = match (ii, jj, self.params.border) {
                    (Some(ii), Some(jj), _) => image[[ii, jj]],
                    (_, _, BorderMode::Constant(pad)) => pad,
                    (_, _, BorderMode::Skip) => continue,
                };
                if !value.is_finite() {
                    continue;
                }
                let diff = value - center;
                let w = spatial[[a, b]] * (-(diff * diff) / color_denom).exp();
                weighted += w * diff;
                total += w;
            }
        }

        // Offsets from the centre keep flat neighbourhoods exact
        if total > 0.0 {
            center + weighted / total
        } else {
            center
        }
    }

    /// Row-parallel variant using Rayon
    #[cfg(feature = "parallel")]
    fn filter_rows_parallel(&self, image: &FloatGrid, spatial: &Array2<f64>, radius: usize) -> GlofResult<FloatGrid> {
        use rayon::prelude::*;

        let (height, width) = image.dim();
        let values: Vec<f64> = (0..height)
            .into_par_iter()
            .flat_map_iter(|i| (0..width).map(move |j| (i, j)))
            .map(|(i, j)| self.filter_pixel(image, spatial, radius, i, j))
            .collect();

        Array2::from_shape_vec((height, width), values)
            .map_err(|e| GlofError::Processing(format!("Shape error: {}", e)))
    }
}

impl Default for SpeckleFilter {
    fn default() -> Self {
        Self::new()
    }
}
