//! External contour extraction on binary masks
//!
//! Only outermost boundaries are reported: a region nested inside the hole
//! of another region produces no contour of its own.

use crate::core::morphology::label_regions;
use crate::types::Mask;
use ndarray::Array2;
use serde::Serialize;
use std::collections::VecDeque;

/// Clockwise Moore neighbourhood (row, col) starting west
const MOORE: [(isize, isize); 8] = [
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
];

/// Axis-aligned bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Closed boundary of one region
#[derive(Debug, Clone)]
pub struct Contour {
    /// Boundary pixels (row, col) in clockwise order
    pub points: Vec<(usize, usize)>,
    pub bounding_box: BoundingBox,
    /// Number of pixels of the enclosed region
    pub pixel_count: usize,
}

impl Contour {
    /// Polygon area through boundary pixel centres
    pub fn area(&self) -> f64 {
        contour_area(&self.points)
    }
}

/// Shoelace area of a closed polygon of (row, col) vertices
pub fn contour_area(points: &[(usize, usize)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(&(r0, c0), &(r1, c1))| c0 as f64 * r1 as f64 - c1 as f64 * r0 as f64)
        .sum();
    twice.abs() / 2.0
}

/// Background reachable from outside the grid through 4-connected steps
fn outer_background(mask: &Mask) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut outside = Array2::from_elem((rows, cols), false);
    let mut queue = VecDeque::new();

    let seed = |i: usize, j: usize, outside: &mut Array2<bool>, queue: &mut VecDeque<(usize, usize)>| {
        if !mask[[i, j]] && !outside[[i, j]] {
            outside[[i, j]] = true;
            queue.push_back((i, j));
        }
    };
    for j in 0..cols {
        seed(0, j, &mut outside, &mut queue);
        seed(rows - 1, j, &mut outside, &mut queue);
    }
    for i in 0..rows {
        seed(i, 0, &mut outside, &mut queue);
        seed(i, cols - 1, &mut outside, &mut queue);
    }

    while let Some((i, j)) = queue.pop_front() {
        let candidates = [
            (i.wrapping_sub(1), j),
            (i + 1, j),
            (i, j.wrapping_sub(1)),
            (i, j + 1),
        ];
        for (ni, nj) in candidates {
            if ni < rows && nj < cols && !mask[[ni, nj]] && !outside[[ni, nj]] {
                outside[[ni, nj]] = true;
                queue.push_back((ni, nj));
            }
        }
    }
    outside
}

fn trace_boundary(labels: &Array2<u32>, label: u32, start: (usize, usize), max_steps: usize) -> Vec<(usize, usize)> {
    let (rows, cols) = labels.dim();
    let inside = |p: (isize, isize)| -> bool {
        p.0 >= 0 && p.1 >= 0 && (p.0 as usize) < rows && (p.1 as usize) < cols && labels[[p.0 as usize, p.1 as usize]] == label
    };
    let direction_to = |from: (isize, isize), to: (isize, isize)| -> usize {
        let delta = (to.0 - from.0, to.1 - from.1);
        MOORE.iter().position(|&d| d == delta).unwrap_or(0)
    };

    let start = (start.0 as isize, start.1 as isize);
    // The start is the first pixel in raster order, so its west side is background
    let mut current = start;
    let mut backtrack = (start.0, start.1 - 1);
    let mut points = vec![(start.0 as usize, start.1 as usize)];
    let mut first_step: Option<(isize, isize)> = None;

    for _ in 0..max_steps {
        let from_dir = direction_to(current, backtrack);
        let mut next = None;
        for k in 1..=8 {
            let d = (from_dir + k) % 8;
            let candidate = (current.0 + MOORE[d].0, current.1 + MOORE[d].1);
            if inside(candidate) {
                let prev = (from_dir + k - 1) % 8;
                backtrack = (current.0 + MOORE[prev].0, current.1 + MOORE[prev].1);
                next = Some(candidate);
                break;
            }
        }

        let Some(next) = next else {
            // Isolated pixel
            break;
        };

        if current == start {
            match first_step {
                None => first_step = Some(next),
                Some(step) if step == next => break,
                Some(_) => {}
            }
        }

        current = next;
        if current != start || first_step.is_none() {
            points.push((current.0 as usize, current.1 as usize));
        }
    }

    // Closing point is implicit
    if points.len() > 1 && points.last() == points.first() {
        points.pop();
    }
    points
}

/// Trace the outer boundary of every outermost 8-connected region
pub fn find_external_contours(mask: &Mask) -> Vec<Contour> {
    let (rows, cols) = mask.dim();
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    let regions = label_regions(mask);
    if regions.count() == 0 {
        return Vec::new();
    }
    let outside = outer_background(mask);

    let n = regions.count();
    let mut external = vec![false; n];
    let mut starts: Vec<Option<(usize, usize)>> = vec![None; n];
    let mut boxes = vec![(usize::MAX, usize::MAX, 0usize, 0usize); n];

    for ((i, j), &label) in regions.labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let k = label as usize - 1;
        if starts[k].is_none() {
            starts[k] = Some((i, j));
        }
        let b = &mut boxes[k];
        b.0 = b.0.min(i);
        b.1 = b.1.min(j);
        b.2 = b.2.max(i);
        b.3 = b.3.max(j);

        if !external[k] {
            let on_edge = i == 0 || j == 0 || i == rows - 1 || j == cols - 1;
            let touches_outside = (i > 0 && outside[[i - 1, j]])
                || (i + 1 < rows && outside[[i + 1, j]])
                || (j > 0 && outside[[i, j - 1]])
                || (j + 1 < cols && outside[[i, j + 1]]);
            external[k] = on_edge || touches_outside;
        }
    }

    let mut contours = Vec::new();
    for k in 0..n {
        let Some(start) = starts[k] else { continue };
        if !external[k] {
            continue;
        }
        let size = regions.sizes[k];
        let points = trace_boundary(&regions.labels, k as u32 + 1, start, 8 * size + 16);
        let (top, left, bottom, right) = boxes[k];
        contours.push(Contour {
            points,
            bounding_box: BoundingBox {
                x: left,
                y: top,
                width: right - left + 1,
                height: bottom - top + 1,
            },
            pixel_count: size,
        });
    }

    log::debug!("Traced {} external contours from {} regions", contours.len(), n);
    contours
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn rect_mask(rows: usize, cols: usize, top: usize, left: usize, h: usize, w: usize) -> Mask {
        Array2::from_shape_fn((rows, cols), |(i, j)| i >= top && i < top + h && j >= left && j < left + w)
    }

    #[test]
    fn test_square_contour_area() {
        let mask = rect_mask(20, 20, 5, 5, 10, 10);
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        assert_abs_diff_eq!(c.area(), 81.0, epsilon = 1e-9);
        assert_eq!(c.points.len(), 36);
        assert_eq!(
            c.bounding_box,
            BoundingBox {
                x: 5,
                y: 5,
                width: 10,
                height: 10
            }
        );
        assert_eq!(c.pixel_count, 100);
    }

    #[test]
    fn test_region_touching_border() {
        let mask = rect_mask(6, 6, 0, 0, 3, 4);
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert_abs_diff_eq!(contours[0].area(), 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_single_pixel_and_line() {
        let mut mask = Array2::from_elem((7, 7), false);
        mask[[1, 1]] = true;
        for j in 2..6 {
            mask[[5, j]] = true;
        }
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 2);
        assert_eq!(contours[0].points, vec![(1, 1)]);
        assert_eq!(contours[0].area(), 0.0);
        assert_eq!(contours[1].area(), 0.0);
        assert_eq!(contours[1].bounding_box.width, 4);
    }

    #[test]
    fn test_nested_region_is_not_external() {
        // Ring with an island in its hole
        let mut mask = Array2::from_shape_fn((11, 11), |(i, j)| {
            let ring = (1..=9).contains(&i) && (1..=9).contains(&j);
            let hole = (3..=7).contains(&i) && (3..=7).contains(&j);
            ring && !hole
        });
        mask[[5, 5]] = true;
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert_abs_diff_eq!(contours[0].area(), 64.0, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_mask() {
        let mask = Array2::from_elem((4, 4), false);
        assert!(find_external_contours(&mask).is_empty());
    }
}
