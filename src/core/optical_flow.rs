//! Dense pyramidal optical flow (iterative Lucas-Kanade)
//!
//! Displacements are estimated coarse-to-fine on a Gaussian pyramid. At each
//! level the second frame is warped by the current estimate and a windowed
//! least-squares update is solved per pixel.

use crate::config::OpticalFlowParams;
use crate::core::calibrate::resize_bilinear;
use crate::core::terrain_flow::gradient;
use crate::types::{FloatGrid, GlofError, GlofResult, GrayImage};
use ndarray::{Array2, Zip};

/// Per-pixel displacement from the first frame to the second
#[derive(Debug, Clone)]
pub struct DisplacementField {
    /// Column displacement
    pub u: FloatGrid,
    /// Row displacement
    pub v: FloatGrid,
}

impl DisplacementField {
    /// Magnitude and angle (radians in [0, 2π)) of every vector
    pub fn to_polar(&self) -> (FloatGrid, FloatGrid) {
        cart_to_polar(&self.u, &self.v)
    }
}

pub fn cart_to_polar(x: &FloatGrid, y: &FloatGrid) -> (FloatGrid, FloatGrid) {
    let magnitude = Zip::from(x).and(y).map_collect(|&a, &b| (a * a + b * b).sqrt());
    let angle = Zip::from(x)
        .and(y)
        .map_collect(|&a, &b| b.atan2(a).rem_euclid(std::f64::consts::TAU));
    (magnitude, angle)
}

/// 5-tap binomial blur followed by factor-two decimation
fn pyramid_down(image: &FloatGrid) -> FloatGrid {
    const TAPS: [f64; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];
    let (rows, cols) = image.dim();
    let clamp = |i: isize, n: usize| i.clamp(0, n as isize - 1) as usize;

    let horizontal = Array2::from_shape_fn((rows, cols), |(i, j)| {
        TAPS.iter()
            .enumerate()
            .map(|(k, w)| w * image[[i, clamp(j as isize + k as isize - 2, cols)]])
            .sum::<f64>()
    });
    let out_rows = (rows + 1) / 2;
    let out_cols = (cols + 1) / 2;
    Array2::from_shape_fn((out_rows, out_cols), |(i, j)| {
        TAPS.iter()
            .enumerate()
            .map(|(k, w)| w * horizontal[[clamp(2 * i as isize + k as isize - 2, rows), 2 * j]])
            .sum::<f64>()
    })
}

/// Bilinear sample with clamped borders
fn sample(image: &FloatGrid, y: f64, x: f64) -> f64 {
    let (rows, cols) = image.dim();
    let y = y.clamp(0.0, (rows - 1) as f64);
    let x = x.clamp(0.0, (cols - 1) as f64);
    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(rows - 1);
    let x1 = (x0 + 1).min(cols - 1);
    let fy = y - y0 as f64;
    let fx = x - x0 as f64;
    image[[y0, x0]] * (1.0 - fy) * (1.0 - fx)
        + image[[y1, x0]] * fy * (1.0 - fx)
        + image[[y0, x1]] * (1.0 - fy) * fx
        + image[[y1, x1]] * fy * fx
}

/// Sums over a clipped square window, via a summed-area table
fn box_sum(grid: &FloatGrid, radius: usize) -> FloatGrid {
    let (rows, cols) = grid.dim();
    let mut integral = Array2::<f64>::zeros((rows + 1, cols + 1));
    for i in 0..rows {
        let mut row_sum = 0.0;
        for j in 0..cols {
            row_sum += grid[[i, j]];
            integral[[i + 1, j + 1]] = integral[[i, j + 1]] + row_sum;
        }
    }
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let top = i.saturating_sub(radius);
        let left = j.saturating_sub(radius);
        let bottom = (i + radius + 1).min(rows);
        let right = (j + radius + 1).min(cols);
        integral[[bottom, right]] - integral[[top, right]] - integral[[bottom, left]] + integral[[top, left]]
    })
}

/// Dense optical flow estimator
pub struct OpticalFlow {
    params: OpticalFlowParams,
}

impl OpticalFlow {
    pub fn new(params: OpticalFlowParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &OpticalFlowParams {
        &self.params
    }

    pub fn compute(&self, first: &GrayImage, second: &GrayImage) -> GlofResult<DisplacementField> {
        if first.dim() != second.dim() {
            return Err(GlofError::InvalidInput(format!(
                "frame sizes differ: {:?} vs {:?}",
                first.dim(),
                second.dim()
            )));
        }
        let (rows, cols) = first.dim();
        if rows < 2 || cols < 2 {
            return Err(GlofError::InvalidInput(format!("frames too small for flow: {}x{}", cols, rows)));
        }

        let mut pyramid_a = vec![first.mapv(f64::from)];
        let mut pyramid_b = vec![second.mapv(f64::from)];
        for _ in 0..self.params.levels {
            let (r, c) = pyramid_a[pyramid_a.len() - 1].dim();
            if r < 8 || c < 8 {
                break;
            }
            let next_a = pyramid_down(&pyramid_a[pyramid_a.len() - 1]);
            let next_b = pyramid_down(&pyramid_b[pyramid_b.len() - 1]);
            pyramid_a.push(next_a);
            pyramid_b.push(next_b);
        }
        log::debug!("Optical flow over {} pyramid levels", pyramid_a.len());

        let coarsest = pyramid_a[pyramid_a.len() - 1].dim();
        let mut u = Array2::<f64>::zeros(coarsest);
        let mut v = Array2::<f64>::zeros(coarsest);

        for level in (0..pyramid_a.len()).rev() {
            let a = &pyramid_a[level];
            let b = &pyramid_b[level];
            let dim = a.dim();
            if u.dim() != dim {
                u = resize_bilinear(&u, dim)?.mapv(|d| d * 2.0);
                v = resize_bilinear(&v, dim)?.mapv(|d| d * 2.0);
            }
            self.refine_level(a, b, &mut u, &mut v);
        }

        Ok(DisplacementField { u, v })
    }

    fn refine_level(&self, a: &FloatGrid, b: &FloatGrid, u: &mut FloatGrid, v: &mut FloatGrid) {
        let radius = self.params.window_size / 2;
        let (gy, gx) = gradient(a);
        let sxx = box_sum(&(&gx * &gx), radius);
        let sxy = box_sum(&(&gx * &gy), radius);
        let syy = box_sum(&(&gy * &gy), radius);

        for _ in 0..self.params.iterations.max(1) {
            let warped = Array2::from_shape_fn(a.dim(), |(i, j)| sample(b, i as f64 + v[[i, j]], j as f64 + u[[i, j]]));
            let it = &warped - a;
            let sxt = box_sum(&(&gx * &it), radius);
            let syt = box_sum(&(&gy * &it), radius);

            for ((i, j), &xx) in sxx.indexed_iter() {
                let xy = sxy[[i, j]];
                let yy = syy[[i, j]];
                let det = xx * yy - xy * xy;
                if det <= self.params.min_determinant {
                    continue;
                }
                let xt = sxt[[i, j]];
                let yt = syt[[i, j]];
                u[[i, j]] += (-yy * xt + xy * yt) / det;
                v[[i, j]] += (xy * xt - xx * yt) / det;
            }
        }
    }
}

impl Default for OpticalFlow {
    fn default() -> Self {
        Self::new(OpticalFlowParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn texture(rows: usize, cols: usize, shift_x: f64) -> GrayImage {
        Array2::from_shape_fn((rows, cols), |(i, j)| {
            let x = j as f64 - shift_x;
            let y = i as f64;
            (128.0 + 50.0 * (x / 5.0).sin() * (y / 6.0).cos() + 30.0 * (x / 9.0 + y / 7.0).sin()).round() as u8
        })
    }

    #[test]
    fn test_identical_frames_have_zero_flow() {
        let frame = texture(48, 64, 0.0);
        let flow = OpticalFlow::default().compute(&frame, &frame).unwrap();
        assert!(flow.u.iter().all(|&d| d == 0.0));
        assert!(flow.v.iter().all(|&d| d == 0.0));
    }

    #[test]
    fn test_horizontal_translation_recovered() {
        let first = texture(64, 80, 0.0);
        let second = texture(64, 80, 3.0);
        let flow = OpticalFlow::default().compute(&first, &second).unwrap();

        let interior_u: Vec<f64> = flow.u.slice(ndarray::s![16..48, 16..64]).iter().copied().collect();
        let mean_u = interior_u.iter().sum::<f64>() / interior_u.len() as f64;
        assert!((mean_u - 3.0).abs() < 0.5, "mean u = {}", mean_u);

        let interior_v: Vec<f64> = flow.v.slice(ndarray::s![16..48, 16..64]).iter().copied().collect();
        let mean_v = interior_v.iter().sum::<f64>() / interior_v.len() as f64;
        assert!(mean_v.abs() < 0.5, "mean v = {}", mean_v);
    }

    #[test]
    fn test_polar_conversion() {
        let x = Array2::from_elem((1, 1), 0.0);
        let y = Array2::from_elem((1, 1), -2.0);
        let (mag, ang) = cart_to_polar(&x, &y);
        assert_abs_diff_eq!(mag[[0, 0]], 2.0);
        assert_abs_diff_eq!(ang[[0, 0]], 1.5 * std::f64::consts::PI, epsilon = 1e-12);
    }

    #[test]
    fn test_mismatched_frames_rejected() {
        let a = Array2::<u8>::zeros((10, 10));
        let b = Array2::<u8>::zeros((10, 12));
        assert!(OpticalFlow::default().compute(&a, &b).is_err());
    }
}
