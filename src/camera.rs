// camera.rs -- Linear pinhole camera model and per-pixel unprojection tables.
//
// Handles:
// - Parsing intrinsics from a plaintext parameter file (fx fy cx cy)
// - Pixel <-> normalized (bearing-plane) coordinate conversion
// - Building the per-pixel u-map / v-map planes the GPU pipeline samples
//   instead of unprojecting in-kernel, and the q-plane (inverse depth)
//   derived from a sensor depth image.
//
// The pose pipeline works entirely in (u, v, q) space: u and v are
// normalized image-plane coordinates, q is inverse depth. A 3D point is
// (u/q, v/q, 1/q), which keeps the projection equations division-free on
// the hypothesis-refinement path.

use std::fs;
use std::path::Path;

use crate::image::Image;

/// Linear (distortion-free) pinhole intrinsics.
#[derive(Debug, Clone)]
pub struct CameraModel {
    /// Focal length in pixels (x-axis).
    pub fx: f32,
    /// Focal length in pixels (y-axis).
    pub fy: f32,
    /// Principal point x (pixels).
    pub cx: f32,
    /// Principal point y (pixels).
    pub cy: f32,
}

impl CameraModel {
    /// Construct from explicit parameters.
    ///
    /// # Panics
    /// Panics if either focal length is not positive.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        assert!(fx > 0.0 && fy > 0.0, "focal lengths must be positive");
        CameraModel { fx, fy, cx, cy }
    }

    /// Parse from a plaintext parameter file containing four whitespace-
    /// separated values `fx fy cx cy` (all in pixels). Trailing values are
    /// ignored so files carrying extra calibration terms still load.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

        let values: Vec<f32> = content
            .split_ascii_whitespace()
            .map_while(|tok| tok.parse::<f32>().ok())
            .collect();
        if values.len() < 4 {
            return Err(format!(
                "expected at least 4 camera parameters in {}, got {}",
                path.display(),
                values.len()
            ));
        }
        if values[0] <= 0.0 || values[1] <= 0.0 {
            return Err(format!(
                "focal lengths must be positive, got fx={} fy={}",
                values[0], values[1]
            ));
        }
        Ok(CameraModel {
            fx: values[0],
            fy: values[1],
            cx: values[2],
            cy: values[3],
        })
    }

    /// Convert pixel coordinates to normalized coordinates:
    ///
    ///   u = (x - cx) / fx
    ///   v = (y - cy) / fy
    pub fn unproject(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.cx) / self.fx, (y - self.cy) / self.fy)
    }

    /// Convert normalized coordinates back to pixel coordinates.
    pub fn project(&self, u: f32, v: f32) -> (f32, f32) {
        (u * self.fx + self.cx, v * self.fy + self.cy)
    }

    /// Build the per-pixel unprojection tables for an image of the given
    /// size: `umap(x, y)` and `vmap(x, y)` hold the normalized coordinates
    /// of pixel center (x, y). The GPU pipeline samples these planes rather
    /// than evaluating the camera model in-kernel.
    pub fn unprojection_maps(&self, width: usize, height: usize) -> (Image<f32>, Image<f32>) {
        let mut umap = Image::new(width, height);
        let mut vmap = Image::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let (u, v) = self.unproject(x as f32, y as f32);
                umap.set(x, y, u);
                vmap.set(x, y, v);
            }
        }
        (umap, vmap)
    }
}

/// Convert a raw depth plane into the q-plane (inverse depth).
///
/// q = 1 / d where the sensor reported a positive depth, 0 elsewhere.
/// A zero q marks the pixel as unusable; the depth-clip stage drops corners
/// that land on such pixels.
pub fn inverse_depth_plane(depth: &Image<f32>) -> Image<f32> {
    let mut q = Image::new(depth.width(), depth.height());
    for y in 0..depth.height() {
        for x in 0..depth.width() {
            let d = depth.get(x, y);
            if d > 0.0 {
                q.set(x, y, 1.0 / d);
            }
        }
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unproject_project_round_trip() {
        let cam = CameraModel::new(500.0, 510.0, 320.0, 240.0);
        let (u, v) = cam.unproject(100.0, 50.0);
        let (x, y) = cam.project(u, v);
        assert!((x - 100.0).abs() < 1e-4);
        assert!((y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_principal_point_maps_to_origin() {
        let cam = CameraModel::new(500.0, 500.0, 320.0, 240.0);
        let (u, v) = cam.unproject(320.0, 240.0);
        assert_eq!((u, v), (0.0, 0.0));
    }

    #[test]
    fn test_unprojection_maps_match_model() {
        let cam = CameraModel::new(400.0, 400.0, 8.0, 6.0);
        let (umap, vmap) = cam.unprojection_maps(16, 12);
        for y in 0..12 {
            for x in 0..16 {
                let (u, v) = cam.unproject(x as f32, y as f32);
                assert_eq!(umap.get(x, y), u);
                assert_eq!(vmap.get(x, y), v);
            }
        }
    }

    #[test]
    fn test_inverse_depth_plane() {
        let mut depth: Image<f32> = Image::new(2, 1);
        depth.set(0, 0, 4.0);
        // (1, 0) stays 0: no depth reading.
        let q = inverse_depth_plane(&depth);
        assert_eq!(q.get(0, 0), 0.25);
        assert_eq!(q.get(1, 0), 0.0);
    }

    #[test]
    #[should_panic(expected = "focal lengths")]
    fn test_rejects_non_positive_focal() {
        CameraModel::new(0.0, 500.0, 0.0, 0.0);
    }
}
