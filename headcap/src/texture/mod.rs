mod blending;
mod projection;

pub use blending::*;
pub use projection::*;

use image::GrayImage;
use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, Result};
use base::util::cli;

use crate::gpu::GpuContext;

/// Square compute tile edge. Both blend pipelines share the default
/// 256-invocation workgroup limit, so the common square tiling is
/// 16x16.
pub const WORKGROUP_SIZE: u32 = 16;

/// Largest supported texture edge. The blend reduction accumulates
/// 8-bit channel steps into `u32` sums, and 4096 * 4096 * 255 is the
/// largest full-mask total that still fits.
pub const MAX_TEXTURE_SIZE: u32 = 4096;

pub type MeanColor = [f32; 4];

#[derive(Clone, StructOpt)]
pub struct TextureParams {
    #[structopt(
        help = "Edge of the square output texture in pixels",
        long,
        default_value = "2048"
    )]
    pub texture_size: u32,

    #[structopt(
        help = "RGBA color the texture is cleared to before projection",
        long,
        default_value = "0,0,0,0"
    )]
    pub clear_color: cli::Array<f32, 4>,
}

impl Default for TextureParams {
    fn default() -> Self {
        TextureParams {
            texture_size: 2048,
            clear_color: [0.0; 4].into(),
        }
    }
}

pub(crate) fn check_texture_size(size: u32) -> Result<()> {
    if size == 0 || size > MAX_TEXTURE_SIZE {
        let desc = format!(
            "texture size {} is outside the supported 1..{} range",
            size, MAX_TEXTURE_SIZE
        );
        return Err(Error::new(UnsupportedFeature, desc));
    }
    Ok(())
}

pub(crate) fn dispatch_extent(size: u32) -> u32 {
    (size + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE
}

pub(crate) fn create_square_texture(
    gpu: &GpuContext,
    size: u32,
    usage: wgpu::TextureUsages,
    label: &str,
) -> wgpu::Texture {
    gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage,
        view_formats: &[],
    })
}

/// Upload a static mask image as a single-channel texture. Masks must
/// match the output texture resolution exactly.
pub(crate) fn upload_mask(
    gpu: &GpuContext,
    mask: &GrayImage,
    size: u32,
    label: &str,
) -> Result<wgpu::Texture> {
    let (width, height) = mask.dimensions();
    if width != size || height != size {
        let desc = format!(
            "mask '{}' is {}x{}, expected {}x{}",
            label, width, height, size, size
        );
        return Err(Error::new(InconsistentState, desc));
    }

    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::R8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    gpu.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        mask.as_raw(),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );

    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_size_bounds() {
        assert!(check_texture_size(64).is_ok());
        assert!(check_texture_size(MAX_TEXTURE_SIZE).is_ok());

        // Beyond 4096 a full sample mask would overflow the u32
        // channel sums of the mean reduction.
        let err = check_texture_size(8192).unwrap_err();
        assert_eq!(
            err.description,
            "texture size 8192 is outside the supported 1..4096 range"
        );
        assert!(check_texture_size(0).is_err());
    }

    #[test]
    fn test_dispatch_extent_covers_texture() {
        assert_eq!(dispatch_extent(2048), 128);
        assert_eq!(dispatch_extent(2047), 128);
        assert_eq!(dispatch_extent(2049), 129);
        assert_eq!(dispatch_extent(1), 1);
    }
}
