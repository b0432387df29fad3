//! Binary morphology and connected-component labelling

use crate::types::Mask;
use ndarray::Array2;
use std::collections::VecDeque;

const NEIGHBORS_8: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Disk structuring element of the given radius: `x² + y² <= r²`
pub fn disk(radius: usize) -> Mask {
    let size = 2 * radius + 1;
    let r = radius as isize;
    Array2::from_shape_fn((size, size), |(i, j)| {
        let y = i as isize - r;
        let x = j as isize - r;
        x * x + y * y <= r * r
    })
}

/// Binary dilation by a disk; pixels outside the grid are ignored
pub fn dilate(mask: &Mask, radius: usize) -> Mask {
    if radius == 0 {
        return mask.clone();
    }

    let element = disk(radius);
    let r = radius as isize;
    let offsets: Vec<(isize, isize)> = element
        .indexed_iter()
        .filter(|(_, &on)| on)
        .map(|((i, j), _)| (i as isize - r, j as isize - r))
        .collect();

    let (rows, cols) = mask.dim();
    let mut out = Array2::from_elem((rows, cols), false);
    for ((i, j), &on) in mask.indexed_iter() {
        if !on {
            continue;
        }
        for &(di, dj) in &offsets {
            let ii = i as isize + di;
            let jj = j as isize + dj;
            if ii >= 0 && jj >= 0 && (ii as usize) < rows && (jj as usize) < cols {
                out[[ii as usize, jj as usize]] = true;
            }
        }
    }
    out
}

/// 8-connected regions of a mask
#[derive(Debug, Clone)]
pub struct LabeledRegions {
    /// 0 = background, regions numbered from 1 in raster order of first pixel
    pub labels: Array2<u32>,
    /// Pixel count of region `k` at index `k - 1`
    pub sizes: Vec<usize>,
}

impl LabeledRegions {
    pub fn count(&self) -> usize {
        self.sizes.len()
    }

    /// Largest region pixel count, 0 when there are no regions
    pub fn largest(&self) -> usize {
        self.sizes.iter().copied().max().unwrap_or(0)
    }
}

/// Label 8-connected foreground regions
pub fn label_regions(mask: &Mask) -> LabeledRegions {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();

    for i in 0..rows {
        for j in 0..cols {
            if !mask[[i, j]] || labels[[i, j]] != 0 {
                continue;
            }

            let label = sizes.len() as u32 + 1;
            let mut size = 0usize;
            labels[[i, j]] = label;
            queue.push_back((i, j));

            while let Some((ci, cj)) = queue.pop_front() {
                size += 1;
                for &(di, dj) in &NEIGHBORS_8 {
                    let ni = ci as isize + di;
                    let nj = cj as isize + dj;
                    if ni < 0 || nj < 0 || ni as usize >= rows || nj as usize >= cols {
                        continue;
                    }
                    let (ni, nj) = (ni as usize, nj as usize);
                    if mask[[ni, nj]] && labels[[ni, nj]] == 0 {
                        labels[[ni, nj]] = label;
                        queue.push_back((ni, nj));
                    }
                }
            }
            sizes.push(size);
        }
    }

    LabeledRegions { labels, sizes }
}

/// Pixel count of the largest 8-connected region
pub fn largest_region_size(mask: &Mask) -> usize {
    label_regions(mask).largest()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_shapes() {
        assert_eq!(disk(0).len(), 1);
        let d1 = disk(1);
        assert_eq!(d1.iter().filter(|&&v| v).count(), 5);
        let d5 = disk(5);
        assert_eq!(d5.dim(), (11, 11));
        assert!(d5[[5, 0]] && d5[[0, 5]] && !d5[[0, 0]]);
    }

    #[test]
    fn test_dilate_single_pixel() {
        let mut mask = Array2::from_elem((9, 9), false);
        mask[[4, 4]] = true;
        let grown = dilate(&mask, 2);
        assert_eq!(grown.iter().filter(|&&v| v).count(), disk(2).iter().filter(|&&v| v).count());
        assert_eq!(dilate(&mask, 0), mask);
    }

    #[test]
    fn test_dilate_clips_at_border() {
        let mut mask = Array2::from_elem((3, 3), false);
        mask[[0, 0]] = true;
        let grown = dilate(&mask, 1);
        assert_eq!(grown.iter().filter(|&&v| v).count(), 3);
    }

    #[test]
    fn test_label_diagonal_connectivity() {
        let mut mask = Array2::from_elem((4, 4), false);
        mask[[0, 0]] = true;
        mask[[1, 1]] = true;
        mask[[3, 3]] = true;
        let regions = label_regions(&mask);
        assert_eq!(regions.count(), 2);
        assert_eq!(regions.sizes, vec![2, 1]);
        assert_eq!(regions.largest(), 2);
        assert_eq!(regions.labels[[1, 1]], 1);
        assert_eq!(regions.labels[[3, 3]], 2);
    }

    #[test]
    fn test_empty_mask_has_no_regions() {
        let mask = Array2::from_elem((5, 5), false);
        assert_eq!(largest_region_size(&mask), 0);
    }

    #[test]
    fn test_dilation_never_shrinks_largest_region() {
        let mask = Array2::from_shape_fn((20, 20), |(i, j)| (i * 3 + j * 7) % 11 == 0);
        let before = largest_region_size(&mask);
        for radius in 0..4 {
            assert!(largest_region_size(&dilate(&mask, radius)) >= before);
        }
    }
}
