// image.rs — Runtime-sized image container, generic over pixel type.
//
// Row-major, contiguous buffer with explicit stride. Stride is measured in
// *elements* (not bytes) and may exceed width when rows carry alignment
// padding; pixels for row y start at index y * stride.
//
// Memory layout (stride = 5, width = 4):
//
//   data index:  0  1  2  3 [4]  5  6  7  8 [9] 10 11 12 13 [14]
//   pixel:       ■  ■  ■  ■  ·   ■  ■  ■  ■  ·   ■  ■  ■  ■  ·
//   row:         |--- row 0 ---|  |--- row 1 ---|  |--- row 2 ---|
//
// The GPU upload path compacts rows (padding stripped) into the device
// buffer, so device-side indexing is always y * width + x.

use std::fmt;

// ---------------------------------------------------------------------------
// Pixel trait
// ---------------------------------------------------------------------------

/// Trait for types that can serve as pixel values in an [`Image`].
///
/// `Copy + Default` let the container zero-fill and move values freely;
/// `PartialOrd` is needed by the corner detector's thresholding.
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + 'static {
    /// Convert this pixel value to f32 (raw cast, not normalized).
    fn to_f32(self) -> f32;

    /// Construct a pixel from an f32 value, clamping to the valid range.
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// A 2D image with runtime dimensions, generic over pixel type `T`.
pub struct Image<T: Pixel> {
    /// Pixel data in row-major order. Length = height * stride.
    data: Vec<T>,
    /// Image width in pixels.
    width: usize,
    /// Image height in pixels.
    height: usize,
    /// Row stride in elements. stride >= width.
    stride: usize,
}

// Clone is implemented manually rather than derived to document that this
// is a deep copy of heap data.
impl<T: Pixel> Clone for Image<T> {
    fn clone(&self) -> Self {
        Image {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }
}

impl<T: Pixel> Image<T> {
    /// Create a zero-initialized image. Stride equals width (no padding).
    ///
    /// # Panics
    /// Panics if either dimension is zero — non-positive image dimensions
    /// are a contract violation, not a recoverable error.
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "image dimensions must be positive");
        Image {
            data: vec![T::default(); height * width],
            width,
            height,
            stride: width,
        }
    }

    /// Create an image from an existing pixel vector.
    ///
    /// `data` must contain exactly `height * width` elements (no padding).
    ///
    /// # Panics
    /// Panics if `data.len() != width * height` or a dimension is zero.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert!(width > 0 && height > 0, "image dimensions must be positive");
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image {
            data,
            width,
            height,
            stride: width,
        }
    }

    /// Create an image from raw data with explicit stride.
    ///
    /// # Panics
    /// Panics if `data.len() != height * stride` or `stride < width`.
    pub fn from_vec_with_stride(
        width: usize,
        height: usize,
        stride: usize,
        data: Vec<T>,
    ) -> Self {
        assert!(width > 0 && height > 0, "image dimensions must be positive");
        assert!(stride >= width, "stride ({stride}) must be >= width ({width})");
        assert_eq!(
            data.len(),
            height * stride,
            "data length ({}) must equal height * stride ({})",
            data.len(),
            height * stride,
        );
        Image {
            data,
            width,
            height,
            stride,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Get the pixel value at (x, y). x is column, y is row.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) out of bounds for {}x{} image",
            self.width,
            self.height,
        );
        self.data[y * self.stride + x]
    }

    /// Get a pixel value without bounds checking.
    ///
    /// # Safety
    /// Caller must guarantee `x < width` and `y < height`. Used in hot
    /// inner loops (corner detection, descriptor sampling) where bounds
    /// are already validated at the loop level.
    #[inline]
    pub unsafe fn get_unchecked(&self, x: usize, y: usize) -> T {
        *self.data.get_unchecked(y * self.stride + x)
    }

    /// Set the pixel value at (x, y).
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) out of bounds for {}x{} image",
            self.width,
            self.height,
        );
        self.data[y * self.stride + x] = value;
    }

    /// Pixel slice for row y (active pixels only, padding excluded).
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    /// The full backing buffer, including any stride padding.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Copy a rectangular region into a new contiguous image.
    ///
    /// # Panics
    /// Panics if the region exceeds the image bounds.
    pub fn crop(&self, x0: usize, y0: usize, w: usize, h: usize) -> Image<T> {
        assert!(
            x0 + w <= self.width && y0 + h <= self.height,
            "crop region {w}x{h}+{x0}+{y0} exceeds {}x{} image",
            self.width,
            self.height,
        );
        let mut out = Vec::with_capacity(w * h);
        for y in y0..y0 + h {
            let start = y * self.stride + x0;
            out.extend_from_slice(&self.data[start..start + w]);
        }
        Image::from_vec(w, h, out)
    }
}

impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Image {{ {}x{}, stride {} }}",
            self.width, self.height, self.stride
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_zero_filled() {
        let img: Image<u8> = Image::new(4, 3);
        assert_eq!(img.width(), 4);
        assert_eq!(img.height(), 3);
        assert_eq!(img.stride(), 4);
        assert!(img.as_slice().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_get_set_round_trip() {
        let mut img: Image<u8> = Image::new(8, 8);
        img.set(3, 5, 200);
        assert_eq!(img.get(3, 5), 200);
        assert_eq!(img.get(5, 3), 0);
    }

    #[test]
    fn test_stride_addressing() {
        // stride 5, width 4: row 1 starts at index 5.
        let data = vec![
            1u8, 2, 3, 4, 0, //
            5, 6, 7, 8, 0,
        ];
        let img = Image::from_vec_with_stride(4, 2, 5, data);
        assert_eq!(img.get(0, 1), 5);
        assert_eq!(img.row(1), &[5, 6, 7, 8]);
    }

    #[test]
    fn test_crop() {
        let data: Vec<u8> = (0..16).collect();
        let img = Image::from_vec(4, 4, data);
        let sub = img.crop(1, 1, 2, 2);
        assert_eq!(sub.width(), 2);
        assert_eq!(sub.get(0, 0), 5);
        assert_eq!(sub.get(1, 1), 10);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_bounds() {
        let img: Image<u8> = Image::new(4, 4);
        img.get(4, 0);
    }

    #[test]
    #[should_panic(expected = "dimensions must be positive")]
    fn test_zero_dimensions_rejected() {
        let _ = Image::<u8>::new(0, 4);
    }

    #[test]
    #[should_panic(expected = "data length")]
    fn test_from_vec_wrong_length() {
        let _ = Image::<u8>::from_vec(4, 4, vec![0u8; 15]);
    }
}
