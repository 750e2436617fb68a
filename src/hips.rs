// hips.rs — HIPS binary descriptors, CPU reference.
//
// A descriptor summarizes the intensity pattern around a corner as a
// 512-bit set: 64 samples on an 8×8 grid around the point, each quantized
// into one of 8 intensity bins relative to the patch mean. Bit
// (sample * 8 + bin) is set when the sample's intensity falls in (or, with
// blending, near) that bin.
//
// BLENDING
// ─────────
// With blend size 1 each sample sets exactly its own bin. Blend sizes 5
// and 9 also set the 2 or 4 adjacent bins on each side, making the
// descriptor tolerant to small intensity shifts at the cost of more set
// bits. The reference frame is built with the configured blend; the query
// frame always uses blend 1, so the match error below stays small for a
// true match: every thin query bit lands inside the blurred reference set.
//
// MATCH ERROR
// ────────────
// error(q, r) = popcount(q & !r) — the number of query bits missing from
// the reference. This is deliberately asymmetric: blended reference bits
// that the query lacks cost nothing.
//
// ROTATION MODE
// ──────────────
// Optional rotation-invariant matching compares 16 variants of the query,
// each 64-bit lane rotated by a further 4 bits, and keeps the minimum
// error. This is an approximation inherited from the descriptor geometry
// (one lane = one sample row), not an exact rotation of the patch.

use crate::fast::Point;
use crate::image::Image;

/// Number of 32-bit words in a descriptor (512 bits).
pub const HIPS_WORDS: usize = 16;

/// Number of intensity bins per sample.
const BINS: usize = 8;

/// Sample grid: 8×8 points at odd offsets in [-7, 7], row-major.
/// Sample i = (row * 8 + col) so one 64-bit lane covers one grid row.
fn sample_offset(i: usize) -> (isize, isize) {
    let col = (i % 8) as isize;
    let row = (i / 8) as isize;
    (col * 2 - 7, row * 2 - 7)
}

/// A 512-bit binary descriptor.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HipsDescriptor(pub [u32; HIPS_WORDS]);

impl HipsDescriptor {
    /// The empty descriptor. Empty descriptors are dead: the matcher skips
    /// them as queries, and as references they cannot satisfy a non-empty
    /// query (every query bit counts as an error).
    pub fn zero() -> Self {
        HipsDescriptor([0; HIPS_WORDS])
    }

    /// Number of set bits.
    pub fn popcount(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    #[inline]
    fn set_bit(&mut self, bit: usize) {
        self.0[bit / 32] |= 1 << (bit % 32);
    }

    /// Bitwise OR, used to fold leaf descriptors into tree cells.
    pub fn or(&self, other: &HipsDescriptor) -> HipsDescriptor {
        let mut out = [0u32; HIPS_WORDS];
        for i in 0..HIPS_WORDS {
            out[i] = self.0[i] | other.0[i];
        }
        HipsDescriptor(out)
    }

    /// Rotate each 64-bit lane left by `4 * step` bits (step in 0..16).
    pub fn rotate_lanes(&self, step: u32) -> HipsDescriptor {
        let shift = (step * 4) % 64;
        if shift == 0 {
            return *self;
        }
        let mut out = [0u32; HIPS_WORDS];
        for lane in 0..HIPS_WORDS / 2 {
            let lo = self.0[lane * 2] as u64;
            let hi = self.0[lane * 2 + 1] as u64;
            let v = (hi << 32) | lo;
            let r = v.rotate_left(shift);
            out[lane * 2] = r as u32;
            out[lane * 2 + 1] = (r >> 32) as u32;
        }
        HipsDescriptor(out)
    }
}

/// Number of query rotations tried in rotation-invariant mode.
pub const ROTATIONS: u32 = 16;

/// Match error: query bits missing from the reference, minimized over lane
/// rotations of the query when `rotate` is set.
pub fn match_error(query: &HipsDescriptor, reference: &HipsDescriptor, rotate: bool) -> u32 {
    let steps = if rotate { ROTATIONS } else { 1 };
    let mut best = u32::MAX;
    for step in 0..steps {
        let q = query.rotate_lanes(step);
        let mut err = 0u32;
        for i in 0..HIPS_WORDS {
            err += (q.0[i] & !reference.0[i]).count_ones();
        }
        best = best.min(err);
    }
    best
}

/// Descriptor construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct HipsConfig {
    /// Blend size: 1, 5 or 9 bins set per sample.
    pub blend: usize,
}

impl HipsConfig {
    /// # Panics
    /// Panics if `blend` is not 1, 5 or 9.
    pub fn new(blend: usize) -> Self {
        assert!(
            matches!(blend, 1 | 5 | 9),
            "blend size must be 1, 5 or 9 (got {blend})"
        );
        HipsConfig { blend }
    }
}

/// Build one descriptor around `p`. Samples falling outside the image are
/// clamped to the nearest edge pixel, matching the GPU kernel.
pub fn build_descriptor(image: &Image<u8>, p: Point, config: HipsConfig) -> HipsDescriptor {
    let w = image.width() as isize;
    let h = image.height() as isize;

    // Gather the 64 samples and their mean.
    let mut samples = [0i32; 64];
    let mut total = 0i32;
    for (i, s) in samples.iter_mut().enumerate() {
        let (dx, dy) = sample_offset(i);
        let sx = (p.x as isize + dx).clamp(0, w - 1) as usize;
        let sy = (p.y as isize + dy).clamp(0, h - 1) as usize;
        // SAFETY: coordinates clamped into bounds above.
        *s = unsafe { image.get_unchecked(sx, sy) } as i32;
        total += *s;
    }
    let mean = total / 64;

    let spread = (config.blend as i32 - 1) / 2;
    let mut desc = HipsDescriptor::zero();
    for (i, &s) in samples.iter().enumerate() {
        // Quantize the mean-relative intensity into 8 bins.
        let bin = ((s - mean + 128).clamp(0, 255) >> 5).min(BINS as i32 - 1);
        let lo = (bin - spread).max(0) as usize;
        let hi = (bin + spread).min(BINS as i32 - 1) as usize;
        for b in lo..=hi {
            desc.set_bit(i * BINS + b);
        }
    }
    desc
}

/// Build descriptors for a corner list, index-aligned with the input.
pub fn build_descriptors(
    image: &Image<u8>,
    points: &[Point],
    config: HipsConfig,
) -> Vec<HipsDescriptor> {
    points
        .iter()
        .map(|&p| build_descriptor(image, p, config))
        .collect()
}

/// Clip stage: zero every descriptor whose popcount exceeds `max_bits`.
/// Operates in place so descriptor indices stay paired with the corner
/// list. Returns the number of descriptors cleared.
pub fn clip_descriptors(descriptors: &mut [HipsDescriptor], max_bits: u32) -> usize {
    let mut cleared = 0;
    for d in descriptors.iter_mut() {
        if d.popcount() > max_bits {
            *d = HipsDescriptor::zero();
            cleared += 1;
        }
    }
    cleared
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn textured_image(seed: u32) -> Image<u8> {
        let mut rng = seed;
        let pixels: Vec<u8> = (0..64 * 64)
            .map(|_| {
                rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
                (rng >> 24) as u8
            })
            .collect();
        Image::from_vec(64, 64, pixels)
    }

    #[test]
    fn test_blend1_sets_one_bit_per_sample() {
        let img = textured_image(1);
        let d = build_descriptor(&img, Point::new(32, 32), HipsConfig::new(1));
        assert_eq!(d.popcount(), 64);
    }

    #[test]
    fn test_blend_widens_descriptor() {
        let img = textured_image(2);
        let p = Point::new(32, 32);
        let d1 = build_descriptor(&img, p, HipsConfig::new(1));
        let d5 = build_descriptor(&img, p, HipsConfig::new(5));
        let d9 = build_descriptor(&img, p, HipsConfig::new(9));
        assert!(d5.popcount() > d1.popcount());
        assert!(d9.popcount() > d5.popcount());
        // Blending only adds bits: the thin descriptor is a subset,
        // so a blended reference matches its own thin query exactly.
        assert_eq!(match_error(&d1, &d5, false), 0);
        assert_eq!(match_error(&d1, &d9, false), 0);
    }

    #[test]
    fn test_self_match_is_exact() {
        let img = textured_image(3);
        let d = build_descriptor(&img, Point::new(20, 20), HipsConfig::new(1));
        assert_eq!(match_error(&d, &d, false), 0);
    }

    #[test]
    fn test_error_is_asymmetric() {
        let img = textured_image(4);
        let p = Point::new(25, 25);
        let thin = build_descriptor(&img, p, HipsConfig::new(1));
        let wide = build_descriptor(&img, p, HipsConfig::new(9));
        assert_eq!(match_error(&thin, &wide, false), 0);
        assert!(match_error(&wide, &thin, false) > 0);
    }

    #[test]
    fn test_distinct_patches_have_high_error() {
        let img = textured_image(5);
        let a = build_descriptor(&img, Point::new(16, 16), HipsConfig::new(1));
        let b = build_descriptor(&img, Point::new(48, 48), HipsConfig::new(1));
        assert!(
            match_error(&a, &b, false) > 10,
            "unrelated noise patches should not match"
        );
    }

    #[test]
    fn test_rotation_zero_is_identity() {
        let img = textured_image(6);
        let d = build_descriptor(&img, Point::new(30, 30), HipsConfig::new(1));
        assert_eq!(d.rotate_lanes(0), d);
        assert_eq!(d.rotate_lanes(16), d);
    }

    #[test]
    fn test_rotation_preserves_popcount() {
        let img = textured_image(7);
        let d = build_descriptor(&img, Point::new(30, 30), HipsConfig::new(5));
        for step in 0..16 {
            assert_eq!(d.rotate_lanes(step).popcount(), d.popcount());
        }
    }

    #[test]
    fn test_rotated_match_recovered_in_rotation_mode() {
        let img = textured_image(8);
        let d = build_descriptor(&img, Point::new(30, 30), HipsConfig::new(1));
        let r = d.rotate_lanes(3);
        assert!(match_error(&r, &d, false) > 0);
        assert_eq!(match_error(&r, &d, true), 0);
    }

    #[test]
    fn test_clip_zeroes_over_budget() {
        let img = textured_image(9);
        let points: Vec<Point> = (0..4).map(|i| Point::new(16 + i * 8, 16)).collect();
        let mut descs = build_descriptors(&img, &points, HipsConfig::new(9));
        let max_bits = 150;
        let over: Vec<bool> = descs.iter().map(|d| d.popcount() > max_bits).collect();
        let cleared = clip_descriptors(&mut descs, max_bits);
        assert_eq!(cleared, over.iter().filter(|&&o| o).count());
        for (d, was_over) in descs.iter().zip(over) {
            if was_over {
                assert!(d.is_zero());
            } else {
                assert!(d.popcount() <= max_bits);
            }
        }
    }

    #[test]
    #[should_panic(expected = "blend size")]
    fn test_invalid_blend() {
        HipsConfig::new(3);
    }
}
