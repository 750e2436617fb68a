// rgbd.rs — Plaintext RGB-D frame reader.
//
// Format: two leading integers `nx ny`, followed by nx*ny whitespace-
// separated records of four unsigned integers `r g b d` in row-major order,
// with r, g, b in 0..=255 and d in 0..=65535 (raw sensor depth units).
//
// The reader produces the two planes the pipeline consumes:
//   - a gray `Image<u8>`   — mean of (r, g, b) per pixel
//   - a depth `Image<f32>` — raw depth value per pixel, 0 meaning "no depth"
//
// Out-of-range fields and short files are data errors and reported as such;
// non-positive dimensions in the header violate the format contract and are
// rejected before any allocation.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::image::Image;

/// A decoded RGB-D frame pair of planes.
pub struct RgbdFrame {
    /// Grayscale intensity plane.
    pub gray: Image<u8>,
    /// Raw depth plane. 0.0 where the sensor reported no depth.
    pub depth: Image<f32>,
}

impl RgbdFrame {
    /// Read a frame from a plaintext RGB-D file.
    pub fn read(path: &Path) -> Result<RgbdFrame, RgbdError> {
        let file = File::open(path).map_err(|e| RgbdError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut text = String::new();
        BufReader::new(file)
            .read_to_string(&mut text)
            .map_err(|e| RgbdError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        Self::parse(&text)
    }

    /// Parse a frame from already-loaded text. Split out of [`read`] so the
    /// format can be tested without touching the filesystem.
    pub fn parse(text: &str) -> Result<RgbdFrame, RgbdError> {
        let mut fields = text.split_ascii_whitespace();

        let nx = next_int(&mut fields, "nx")?;
        let ny = next_int(&mut fields, "ny")?;
        if nx <= 0 || ny <= 0 {
            return Err(RgbdError::BadDimensions { nx, ny });
        }
        let (nx, ny) = (nx as usize, ny as usize);

        let mut gray = Vec::with_capacity(nx * ny);
        let mut depth = Vec::with_capacity(nx * ny);

        for i in 0..nx * ny {
            let r = next_record_int(&mut fields, i, "r")?;
            let g = next_record_int(&mut fields, i, "g")?;
            let b = next_record_int(&mut fields, i, "b")?;
            let d = next_record_int(&mut fields, i, "d")?;

            if r > 0xFF || g > 0xFF || b > 0xFF {
                return Err(RgbdError::BadValue {
                    record: i,
                    field: "rgb",
                    value: r.max(g).max(b),
                });
            }
            if d > 0xFFFF {
                return Err(RgbdError::BadValue {
                    record: i,
                    field: "d",
                    value: d,
                });
            }

            gray.push(((r + g + b) / 3) as u8);
            depth.push(d as f32);
        }

        Ok(RgbdFrame {
            gray: Image::from_vec(nx, ny, gray),
            depth: Image::from_vec(nx, ny, depth),
        })
    }

    /// Crop both planes to the same rectangle.
    pub fn crop(&self, x0: usize, y0: usize, w: usize, h: usize) -> RgbdFrame {
        RgbdFrame {
            gray: self.gray.crop(x0, y0, w, h),
            depth: self.depth.crop(x0, y0, w, h),
        }
    }
}

fn next_int<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    what: &'static str,
) -> Result<i64, RgbdError> {
    let tok = fields.next().ok_or(RgbdError::Truncated { expected: what })?;
    tok.parse::<i64>().map_err(|_| RgbdError::NotANumber {
        expected: what,
        token: tok.to_string(),
    })
}

fn next_record_int<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    record: usize,
    field: &'static str,
) -> Result<i64, RgbdError> {
    match next_int(fields, field) {
        Ok(v) if v >= 0 => Ok(v),
        Ok(v) => Err(RgbdError::BadValue { record, field, value: v }),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from reading or parsing a plaintext RGB-D file.
#[derive(Debug)]
pub enum RgbdError {
    /// Underlying file I/O failure.
    Io { path: String, source: std::io::Error },
    /// Header dimensions were not both positive.
    BadDimensions { nx: i64, ny: i64 },
    /// File ended before all records were read.
    Truncated { expected: &'static str },
    /// A field failed to parse as an integer.
    NotANumber { expected: &'static str, token: String },
    /// A field was outside its valid range.
    BadValue { record: usize, field: &'static str, value: i64 },
}

impl fmt::Display for RgbdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RgbdError::Io { path, source } => write!(f, "cannot read {path}: {source}"),
            RgbdError::BadDimensions { nx, ny } => {
                write!(f, "image dimensions must be positive, got {nx} x {ny}")
            }
            RgbdError::Truncated { expected } => {
                write!(f, "file ended while reading {expected}")
            }
            RgbdError::NotANumber { expected, token } => {
                write!(f, "expected integer for {expected}, got {token:?}")
            }
            RgbdError::BadValue { record, field, value } => {
                write!(f, "record {record}: {field} value {value} out of range")
            }
        }
    }
}

impl std::error::Error for RgbdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RgbdError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        // 2x1 frame: one white pixel with depth, one black pixel without.
        let frame = RgbdFrame::parse("2 1  255 255 255 1000  0 0 0 0").unwrap();
        assert_eq!(frame.gray.width(), 2);
        assert_eq!(frame.gray.height(), 1);
        assert_eq!(frame.gray.get(0, 0), 255);
        assert_eq!(frame.gray.get(1, 0), 0);
        assert_eq!(frame.depth.get(0, 0), 1000.0);
        assert_eq!(frame.depth.get(1, 0), 0.0);
    }

    #[test]
    fn test_gray_is_mean_of_rgb() {
        let frame = RgbdFrame::parse("1 1  10 20 30 0").unwrap();
        assert_eq!(frame.gray.get(0, 0), 20);
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        assert!(matches!(
            RgbdFrame::parse("0 4"),
            Err(RgbdError::BadDimensions { .. })
        ));
        assert!(matches!(
            RgbdFrame::parse("-2 4"),
            Err(RgbdError::BadDimensions { .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_file() {
        assert!(matches!(
            RgbdFrame::parse("2 2  1 2 3 4"),
            Err(RgbdError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(matches!(
            RgbdFrame::parse("1 1  300 0 0 0"),
            Err(RgbdError::BadValue { field: "rgb", .. })
        ));
        assert!(matches!(
            RgbdFrame::parse("1 1  0 0 0 70000"),
            Err(RgbdError::BadValue { field: "d", .. })
        ));
    }

    #[test]
    fn test_crop_planes_stay_aligned() {
        let frame = RgbdFrame::parse(
            "2 2  10 10 10 1  20 20 20 2  30 30 30 3  40 40 40 4",
        )
        .unwrap();
        let sub = frame.crop(1, 1, 1, 1);
        assert_eq!(sub.gray.get(0, 0), 40);
        assert_eq!(sub.depth.get(0, 0), 4.0);
    }
}
