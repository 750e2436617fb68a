// fast.rs — FAST-style corner detection, CPU reference.
//
// Reference: Rosten & Drummond, "Machine learning for high-speed corner
// detection" (ECCV 2006).
//
// The detector runs as two stages, mirroring the GPU wiring:
//
//   1. `prefast_candidates` — cheap 4-point cull over every pixel. A pixel
//      survives if two adjacent cardinal circle points differ from the
//      center by more than the threshold. Typically rejects >90% of pixels.
//   2. `FastDetector::detect` — full 16-point Bresenham ring test over the
//      surviving candidates: a corner needs `ring` contiguous circle pixels
//      all brighter or all darker than center ± threshold.
//
// Between the two, the depth-clip stage (`clip_by_depth`) drops candidates
// without a usable inverse-depth reading, since they can never contribute
// a (u, v, q) tuple to the pose solve.

use crate::image::Image;

/// Bresenham circle of radius 3: 16 (dx, dy) offsets.
/// Listed clockwise starting from 12 o'clock, matching Rosten's convention.
const CIRCLE_OFFSETS: [(isize, isize); 16] = [
    ( 0, -3), ( 1, -3), ( 2, -2), ( 3, -1),
    ( 3,  0), ( 3,  1), ( 2,  2), ( 1,  3),
    ( 0,  3), (-1,  3), (-2,  2), (-3,  1),
    (-3,  0), (-3, -1), (-2, -2), (-1, -3),
];

/// A 2D integer image coordinate. This is the element type of every point
/// list in the pipeline, including correspondence lists, which store
/// (index-in-A, index-in-B) pairs through the same type.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }
}

/// Cheap candidate cull: keep pixels where two adjacent cardinal circle
/// points (top, right, bottom, left) both differ from the center by more
/// than `threshold`. Border pixels (within 3 of an edge) are never emitted.
pub fn prefast_candidates(image: &Image<u8>, threshold: u8) -> Vec<Point> {
    let w = image.width();
    let h = image.height();
    let mut out = Vec::new();
    if w <= 6 || h <= 6 {
        return out;
    }

    let thresh = threshold as i16;
    for y in 3..(h - 3) {
        for x in 3..(w - 3) {
            // SAFETY: x in [3, w-3), y in [3, h-3); offsets are at most ±3.
            let center = unsafe { image.get_unchecked(x, y) } as i16;
            let d = |i: usize| -> bool {
                let (dx, dy) = CIRCLE_OFFSETS[i];
                // SAFETY: same bounds as above.
                let p = unsafe {
                    image.get_unchecked((x as isize + dx) as usize, (y as isize + dy) as usize)
                } as i16;
                (p - center).abs() > thresh
            };
            let (d0, d4, d8, d12) = (d(0), d(4), d(8), d(12));
            if (d0 && d4) || (d4 && d8) || (d8 && d12) || (d12 && d0) {
                out.push(Point::new(x as i32, y as i32));
            }
        }
    }
    out
}

/// Drop candidates whose q-plane (inverse depth) value is not positive.
/// Order is preserved.
pub fn clip_by_depth(points: &[Point], qplane: &Image<f32>) -> Vec<Point> {
    points
        .iter()
        .copied()
        .filter(|p| qplane.get(p.x as usize, p.y as usize) > 0.0)
        .collect()
}

/// Full FAST ring test over a candidate list.
pub struct FastDetector {
    /// Intensity difference threshold. A circle pixel counts as BRIGHTER or
    /// DARKER only if it differs from the center by more than this value.
    pub threshold: u8,
    /// Minimum contiguous run length on the 16-pixel circle (FAST-N).
    pub ring: usize,
}

impl FastDetector {
    /// Create a detector.
    ///
    /// # Panics
    /// Panics if `ring` is not in [9, 16].
    pub fn new(threshold: u8, ring: usize) -> Self {
        assert!(
            (9..=16).contains(&ring),
            "ring must be 9..=16 (got {ring})"
        );
        FastDetector { threshold, ring }
    }

    /// Run the full ring test over `candidates`, returning the survivors in
    /// input order. Candidates are assumed to lie at least 3 pixels from
    /// every border (as `prefast_candidates` guarantees).
    pub fn detect(&self, image: &Image<u8>, candidates: &[Point]) -> Vec<Point> {
        candidates
            .iter()
            .copied()
            .filter(|p| self.is_corner(image, *p))
            .collect()
    }

    /// Classify a single candidate.
    pub fn is_corner(&self, image: &Image<u8>, p: Point) -> bool {
        let x = p.x as usize;
        let y = p.y as usize;
        debug_assert!(
            x >= 3 && y >= 3 && x < image.width() - 3 && y < image.height() - 3,
            "candidate ({x}, {y}) inside 3-pixel border"
        );

        let thresh = self.threshold as i16;
        // SAFETY: candidate position is at least 3 from every border.
        let (bright_mask, dark_mask) = unsafe {
            let center = image.get_unchecked(x, y) as i16;
            let mut bright: u16 = 0;
            let mut dark: u16 = 0;
            for (i, &(dx, dy)) in CIRCLE_OFFSETS.iter().enumerate() {
                let v = image.get_unchecked(
                    (x as isize + dx) as usize,
                    (y as isize + dy) as usize,
                ) as i16;
                if v > center + thresh {
                    bright |= 1 << i;
                } else if v < center - thresh {
                    dark |= 1 << i;
                }
            }
            (bright, dark)
        };

        has_contiguous_run(bright_mask, self.ring) || has_contiguous_run(dark_mask, self.ring)
    }
}

/// Check a circular 16-bit mask for a run of `n` contiguous set bits.
///
/// The mask is doubled into a u32 to handle wrap-around, then AND-shifted
/// n-1 times; any surviving bit marks the start of a long-enough run. The
/// same branchless form is used by the GPU kernel.
#[inline]
fn has_contiguous_run(mask: u16, n: usize) -> bool {
    if (mask.count_ones() as usize) < n {
        return false;
    }
    let mut acc = (mask as u32) | ((mask as u32) << 16);
    for _ in 1..n {
        acc &= acc >> 1;
    }
    acc != 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Blank image with all 16 circle pixels around the center set.
    fn make_ring_image(size: usize, center_val: u8, ring_val: u8) -> Image<u8> {
        let mut img = Image::from_vec(size, size, vec![center_val; size * size]);
        let c = size / 2;
        for &(dx, dy) in &CIRCLE_OFFSETS {
            img.set((c as isize + dx) as usize, (c as isize + dy) as usize, ring_val);
        }
        img
    }

    fn detect_full(img: &Image<u8>, threshold: u8, ring: usize) -> Vec<Point> {
        let candidates = prefast_candidates(img, threshold);
        FastDetector::new(threshold, ring).detect(img, &candidates)
    }

    #[test]
    fn test_bright_ring_detected() {
        let img = make_ring_image(20, 50, 200);
        let corners = detect_full(&img, 30, 9);
        assert!(
            corners.contains(&Point::new(10, 10)),
            "center of a fully bright ring must be a corner"
        );
    }

    #[test]
    fn test_dark_ring_detected() {
        let img = make_ring_image(20, 200, 20);
        let corners = detect_full(&img, 30, 9);
        assert!(corners.contains(&Point::new(10, 10)));
    }

    #[test]
    fn test_flat_image_empty() {
        let img = Image::from_vec(20, 20, vec![128u8; 400]);
        assert!(prefast_candidates(&img, 20).is_empty());
    }

    #[test]
    fn test_prefast_superset_of_fast() {
        // Every full-test corner must appear among the prefast candidates —
        // a corner has >= 9 contiguous differing circle pixels, which always
        // covers two adjacent cardinals.
        let mut img = Image::from_vec(40, 40, vec![30u8; 1600]);
        for y in 10..30 {
            for x in 10..30 {
                img.set(x, y, 220);
            }
        }
        let candidates = prefast_candidates(&img, 30);
        let det = FastDetector::new(30, 9);
        let corners = det.detect(&img, &candidates);
        assert!(!corners.is_empty(), "square corners expected");
        for c in &corners {
            assert!(candidates.contains(c));
        }
    }

    #[test]
    fn test_ring_length_sensitivity() {
        // Only 10 contiguous bright circle pixels: FAST-9 fires, FAST-12 not.
        let mut img = Image::from_vec(20, 20, vec![100u8; 400]);
        for i in 0..10 {
            let (dx, dy) = CIRCLE_OFFSETS[i];
            img.set((10 + dx) as usize, (10 + dy) as usize, 200);
        }
        let p = Point::new(10, 10);
        assert!(FastDetector::new(20, 9).is_corner(&img, p));
        assert!(!FastDetector::new(20, 12).is_corner(&img, p));
    }

    #[test]
    fn test_border_exclusion() {
        let mut img = Image::from_vec(20, 20, vec![100u8; 400]);
        img.set(2, 2, 255);
        for p in prefast_candidates(&img, 10) {
            assert!(p.x >= 3 && p.y >= 3 && p.x < 17 && p.y < 17);
        }
    }

    #[test]
    fn test_clip_by_depth() {
        let mut q: Image<f32> = Image::new(20, 20);
        q.set(5, 5, 0.5);
        let points = vec![Point::new(5, 5), Point::new(6, 6)];
        let kept = clip_by_depth(&points, &q);
        assert_eq!(kept, vec![Point::new(5, 5)]);
    }

    #[test]
    fn test_contiguous_run_wraps() {
        // Bits 14, 15, 0..=6 form a run of 9 across the wrap point.
        let mask: u16 = 0b1100_0000_0111_1111;
        assert!(has_contiguous_run(mask, 9));
        assert!(!has_contiguous_run(mask, 10));
    }

    #[test]
    #[should_panic(expected = "ring")]
    fn test_invalid_ring() {
        FastDetector::new(20, 8);
    }
}
