use image::RgbaImage;

use base::defs::{Error, ErrorKind::*, Result};

use crate::mesh::{Matrix4, Vector3};

/// Planar luma/chroma camera frame, the convention the live tracker
/// delivers. The chroma plane holds interleaved Cb/Cr at half the luma
/// resolution.
pub struct CameraImage {
    pub luma: Vec<u8>,
    pub chroma: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub chroma_width: u32,
    pub chroma_height: u32,
}

impl CameraImage {
    /// Dimension and byte-length sanity, run before any GPU upload.
    pub fn validate(&self) -> Result<()> {
        let luma_len = self.width as usize * self.height as usize;
        let chroma_len =
            self.chroma_width as usize * self.chroma_height as usize * 2;
        if self.width == 0 || self.height == 0 {
            return Err(Error::new(
                GpuError,
                "camera image has zero dimension".to_string(),
            ));
        }
        if self.luma.len() != luma_len || self.chroma.len() != chroma_len {
            let desc = format!(
                "camera plane sizes do not match dimensions: \
                 luma {} of {}, chroma {} of {}",
                self.luma.len(),
                luma_len,
                self.chroma.len(),
                chroma_len
            );
            return Err(Error::new(GpuError, desc));
        }
        Ok(())
    }

    /// Convert an RGBA image into full-range BT.601 planes with 2x2
    /// subsampled chroma, the inverse of the projection shader's
    /// YCbCr-to-RGB matrix. Lets recorded frames and tests stand in
    /// for a live camera buffer.
    pub fn from_rgba(image: &RgbaImage) -> CameraImage {
        let (width, height) = image.dimensions();
        let chroma_width = (width + 1) / 2;
        let chroma_height = (height + 1) / 2;

        let mut luma = vec![0u8; (width * height) as usize];
        for (x, y, pixel) in image.enumerate_pixels() {
            let [r, g, b, _] = pixel.0;
            let yv = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            luma[(y * width + x) as usize] = yv.round().clamp(0.0, 255.0) as u8;
        }

        let mut chroma =
            vec![0u8; (chroma_width * chroma_height * 2) as usize];
        for cy in 0..chroma_height {
            for cx in 0..chroma_width {
                let (mut r, mut g, mut b, mut n) = (0.0, 0.0, 0.0, 0.0);
                for dy in 0..2u32 {
                    for dx in 0..2u32 {
                        let (x, y) = (cx * 2 + dx, cy * 2 + dy);
                        if x < width && y < height {
                            let p = image.get_pixel(x, y).0;
                            r += p[0] as f32;
                            g += p[1] as f32;
                            b += p[2] as f32;
                            n += 1.0;
                        }
                    }
                }
                let (r, g, b) = (r / n, g / n, b / n);
                let yv = 0.299 * r + 0.587 * g + 0.114 * b;
                let cb = 128.0 + (b - yv) / 1.772;
                let cr = 128.0 + (r - yv) / 1.402;
                let base = ((cy * chroma_width + cx) * 2) as usize;
                chroma[base] = cb.round().clamp(0.0, 255.0) as u8;
                chroma[base + 1] = cr.round().clamp(0.0, 255.0) as u8;
            }
        }

        CameraImage {
            luma,
            chroma,
            width,
            height,
            chroma_width,
            chroma_height,
        }
    }
}

/// 2D affine display/orientation correction supplied with each frame.
///
/// ```text
/// x' = a*x + c*y + tx
/// y' = b*x + d*y + ty
/// ```
#[derive(Clone, Copy)]
pub struct DisplayTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl DisplayTransform {
    pub fn identity() -> DisplayTransform {
        DisplayTransform {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Embed the 2D affine into a 4x4 for the shader, the screen plane
    /// living in xy.
    #[rustfmt::skip]
    pub fn to_matrix4(self) -> Matrix4 {
        Matrix4::new(
            self.a, self.c, 0.0, self.tx,
            self.b, self.d, 0.0, self.ty,
            0.0,    0.0,    1.0, 0.0,
            0.0,    0.0,    0.0, 1.0,
        )
    }
}

/// Per-frame coordinate-space inputs for the texture projection.
#[derive(Clone)]
pub struct FrameTransforms {
    /// Camera extrinsic transform (camera node in world space).
    pub camera_transform: Matrix4,
    /// World transform of the head mesh.
    pub world_transform: Matrix4,
    /// Device/image orientation correction.
    pub display_transform: DisplayTransform,
    /// Camera projection transform.
    pub projection: Matrix4,
}

impl FrameTransforms {
    /// `modelView = world · inverse(camera)`. Fails on a singular
    /// camera transform.
    pub fn model_view(&self) -> Result<Matrix4> {
        let view = self.camera_transform.try_inverse().ok_or_else(|| {
            Error::new(
                InconsistentState,
                "camera transform is not invertible".to_string(),
            )
        })?;
        Ok(self.world_transform * view)
    }

    /// Inverse display transform, mapping screen-aligned camera samples
    /// into the renderer's convention.
    pub fn display_inverse(&self) -> Result<Matrix4> {
        self.display_transform.to_matrix4().try_inverse().ok_or_else(
            || {
                Error::new(
                    InconsistentState,
                    "display transform is not invertible".to_string(),
                )
            },
        )
    }
}

/// Full-range BT.601 YCbCr to RGB, the same matrix the projection
/// shader applies (column-major columns listed in order).
pub const YCBCR_TO_RGB: [[f32; 4]; 4] = [
    [1.0, 1.0, 1.0, 0.0],
    [0.0, -0.3441, 1.772, 0.0],
    [1.402, -0.7141, 0.0, 0.0],
    [-0.7010, 0.5291, -0.8860, 1.0],
];

/// CPU mirror of the shader's conversion, used by tests to pin down
/// the plane encoding.
pub fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> Vector3 {
    let m = &YCBCR_TO_RGB;
    let v = [y, cb, cr, 1.0];
    Vector3::new(
        m[0][0] * v[0] + m[1][0] * v[1] + m[2][0] * v[2] + m[3][0],
        m[0][1] * v[0] + m[1][1] * v[1] + m[2][1] * v[2] + m[3][1],
        m[0][2] * v[0] + m[1][2] * v[1] + m[2][2] * v[2] + m[3][2],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid_image(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    #[test]
    fn test_from_rgba_plane_sizes() {
        let camera =
            CameraImage::from_rgba(&solid_image(5, 3, [10, 20, 30, 255]));
        camera.validate().unwrap();
        assert_eq!(camera.luma.len(), 15);
        assert_eq!((camera.chroma_width, camera.chroma_height), (3, 2));
        assert_eq!(camera.chroma.len(), 12);
    }

    #[test]
    fn test_validate_rejects_truncated_plane() {
        let mut camera =
            CameraImage::from_rgba(&solid_image(4, 4, [0, 0, 0, 255]));
        camera.luma.pop();
        assert!(camera.validate().is_err());
    }

    #[test]
    fn test_solid_color_roundtrip() {
        let color = [180u8, 120, 90, 255];
        let camera = CameraImage::from_rgba(&solid_image(4, 4, color));

        let y = camera.luma[0] as f32 / 255.0;
        let cb = camera.chroma[0] as f32 / 255.0;
        let cr = camera.chroma[1] as f32 / 255.0;
        let rgb = ycbcr_to_rgb(y, cb, cr) * 255.0;

        // Quantizing to 8 bits twice costs at most a couple of steps.
        assert!((rgb.x - color[0] as f32).abs() < 2.5);
        assert!((rgb.y - color[1] as f32).abs() < 2.5);
        assert!((rgb.z - color[2] as f32).abs() < 2.5);
    }

    #[test]
    fn test_gray_maps_to_neutral_chroma() {
        let camera =
            CameraImage::from_rgba(&solid_image(2, 2, [128, 128, 128, 255]));
        assert_eq!(camera.chroma[0], 128);
        assert_eq!(camera.chroma[1], 128);
    }

    #[test]
    fn test_display_transform_roundtrip() {
        // 90-degree rotation with translation, as a portrait display
        // correction would be.
        let transform = DisplayTransform {
            a: 0.0,
            b: 1.0,
            c: -1.0,
            d: 0.0,
            tx: 1.0,
            ty: 0.0,
        };
        let m = transform.to_matrix4();
        let p = m * nalgebra::Vector4::new(0.25, 0.5, 0.0, 1.0);
        assert!((p.x - 0.5).abs() < 1e-6);
        assert!((p.y - 0.25).abs() < 1e-6);

        let inverse = m.try_inverse().unwrap();
        let q = inverse * p;
        assert!((q.x - 0.25).abs() < 1e-6);
        assert!((q.y - 0.5).abs() < 1e-6);
    }
}
