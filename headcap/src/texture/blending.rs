use std::sync::mpsc;

use image::{GrayImage, RgbaImage};

use base::defs::{Error, ErrorKind::*, Result};

use crate::gpu::GpuContext;
use crate::texture::{
    check_texture_size, create_square_texture, dispatch_extent,
    upload_mask, MeanColor,
};

const SUMS_SIZE: u64 = 5 * 4;

/// Two-pass cleanup of the baked texture: average the color under the
/// sample mask, then blend that mean back in wherever the skin mask is
/// set. Tracking holes and lighting seams end up filled with the
/// frame's overall skin tone.
#[derive(Debug)]
pub struct Blender {
    reduce_pipeline: wgpu::ComputePipeline,
    blend_pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sums_buffer: wgpu::Buffer,
    sums_readback: wgpu::Buffer,
    mean_buffer: wgpu::Buffer,
    sample_mask_view: wgpu::TextureView,
    skin_mask_view: wgpu::TextureView,
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    texture_size: u32,
}

impl Blender {
    /// Both masks must match `texture_size` exactly.
    pub fn new(
        gpu: &GpuContext,
        sample_mask: &GrayImage,
        skin_mask: &GrayImage,
        texture_size: u32,
    ) -> Result<Blender> {
        check_texture_size(texture_size)?;
        let sample_mask =
            upload_mask(gpu, sample_mask, texture_size, "sample mask")?;
        let skin_mask =
            upload_mask(gpu, skin_mask, texture_size, "skin mask")?;

        gpu.scoped(|| {
            Self::create(gpu, sample_mask, skin_mask, texture_size)
        })
    }

    fn create(
        gpu: &GpuContext,
        sample_mask: wgpu::Texture,
        skin_mask: wgpu::Texture,
        texture_size: u32,
    ) -> Blender {
        let device = &gpu.device;

        let shader =
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("blend shader"),
                source: wgpu::ShaderSource::Wgsl(
                    include_str!("blend.wgsl").into(),
                ),
            });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float {
                    filterable: false,
                },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(
            &wgpu::BindGroupLayoutDescriptor {
                label: Some("blend bind group layout"),
                entries: &[
                    texture_entry(0),
                    texture_entry(1),
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage {
                                read_only: false,
                            },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    texture_entry(3),
                    wgpu::BindGroupLayoutEntry {
                        binding: 4,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 5,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: wgpu::TextureFormat::Rgba8Unorm,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                ],
            },
        );

        let pipeline_layout = device.create_pipeline_layout(
            &wgpu::PipelineLayoutDescriptor {
                label: Some("blend pipeline layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            },
        );

        let compute_pipeline = |label, entry_point| {
            device.create_compute_pipeline(
                &wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: Some(entry_point),
                    compilation_options:
                        wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                },
            )
        };
        let reduce_pipeline =
            compute_pipeline("reduce mean pipeline", "reduce_mean");
        let blend_pipeline =
            compute_pipeline("blend masked pipeline", "blend_masked");

        let sums_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("color sums"),
            size: SUMS_SIZE,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sums_readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("color sums readback"),
            size: SUMS_SIZE,
            usage: wgpu::BufferUsages::MAP_READ
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mean_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mean color"),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let output = create_square_texture(
            gpu,
            texture_size,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            "blended texture",
        );

        let view = |texture: &wgpu::Texture| {
            texture.create_view(&wgpu::TextureViewDescriptor::default())
        };
        let sample_mask_view = view(&sample_mask);
        let skin_mask_view = view(&skin_mask);
        let output_view = view(&output);

        Blender {
            reduce_pipeline,
            blend_pipeline,
            bind_group_layout,
            sums_buffer,
            sums_readback,
            mean_buffer,
            sample_mask_view,
            skin_mask_view,
            output,
            output_view,
            texture_size,
        }
    }

    /// The blended texture the last `blend` call wrote.
    pub fn texture(&self) -> &wgpu::Texture {
        &self.output
    }

    /// Run both passes over `baked`. Blocks twice: once to read the
    /// color sums back between the passes, once for the blend itself.
    /// Returns the masked mean color in normalized RGBA.
    pub fn blend(
        &mut self,
        gpu: &GpuContext,
        baked: &wgpu::Texture,
    ) -> Result<MeanColor> {
        let baked_view =
            baked.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = gpu.scoped(|| {
            gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("blend bind group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(
                            &baked_view,
                        ),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(
                            &self.sample_mask_view,
                        ),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.sums_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(
                            &self.skin_mask_view,
                        ),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: self.mean_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::TextureView(
                            &self.output_view,
                        ),
                    },
                ],
            })
        })?;

        let groups = dispatch_extent(self.texture_size);

        gpu.scoped(|| {
            gpu.queue
                .write_buffer(&self.sums_buffer, 0, &[0; SUMS_SIZE as usize]);

            let mut encoder = gpu.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor {
                    label: Some("reduce mean encoder"),
                },
            );
            {
                let mut pass = encoder.begin_compute_pass(
                    &wgpu::ComputePassDescriptor {
                        label: Some("reduce mean pass"),
                        timestamp_writes: None,
                    },
                );
                pass.set_pipeline(&self.reduce_pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups, groups, 1);
            }
            encoder.copy_buffer_to_buffer(
                &self.sums_buffer,
                0,
                &self.sums_readback,
                0,
                SUMS_SIZE,
            );
            gpu.queue.submit(std::iter::once(encoder.finish()));
        })?;

        let sums = self.read_sums(gpu)?;
        let mean = mean_from_sums(&sums)?;

        gpu.scoped(|| {
            gpu.queue.write_buffer(
                &self.mean_buffer,
                0,
                bytemuck::bytes_of(&mean),
            );

            let mut encoder = gpu.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor {
                    label: Some("blend masked encoder"),
                },
            );
            {
                let mut pass = encoder.begin_compute_pass(
                    &wgpu::ComputePassDescriptor {
                        label: Some("blend masked pass"),
                        timestamp_writes: None,
                    },
                );
                pass.set_pipeline(&self.blend_pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups, groups, 1);
            }
            gpu.queue.submit(std::iter::once(encoder.finish()));
            gpu.wait();
        })?;

        Ok(mean)
    }

    fn read_sums(&self, gpu: &GpuContext) -> Result<[u32; 5]> {
        let slice = self.sums_readback.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        gpu.wait();

        let mapped = receiver.recv().map_err(|err| {
            Error::with_source(
                GpuError,
                "sums readback callback was dropped".to_string(),
                err,
            )
        })?;
        mapped.map_err(|err| {
            Error::with_source(
                GpuError,
                "failed to map the sums readback buffer".to_string(),
                err,
            )
        })?;

        let sums: [u32; 5] = {
            let data = slice.get_mapped_range();
            let words: &[u32] = bytemuck::cast_slice(&data);
            [words[0], words[1], words[2], words[3], words[4]]
        };
        self.sums_readback.unmap();
        Ok(sums)
    }

    /// Copy the blended texture into a CPU-side image. Row pitch is
    /// padded to 256 bytes for the copy and stripped here.
    pub fn read_back(&self, gpu: &GpuContext) -> Result<RgbaImage> {
        let size = self.texture_size;
        let unpadded_row = size * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = (unpadded_row + align - 1) / align * align;

        let staging = gpu.scoped(|| {
            let staging =
                gpu.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("texture readback"),
                    size: (padded_row * size) as u64,
                    usage: wgpu::BufferUsages::MAP_READ
                        | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });

            let mut encoder = gpu.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor {
                    label: Some("texture readback encoder"),
                },
            );
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: &self.output,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &staging,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_row),
                        rows_per_image: Some(size),
                    },
                },
                wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
            );
            gpu.queue.submit(std::iter::once(encoder.finish()));
            staging
        })?;

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        gpu.wait();

        receiver
            .recv()
            .map_err(|err| {
                Error::with_source(
                    GpuError,
                    "texture readback callback was dropped".to_string(),
                    err,
                )
            })?
            .map_err(|err| {
                Error::with_source(
                    GpuError,
                    "failed to map the texture readback buffer".to_string(),
                    err,
                )
            })?;

        let mut pixels = Vec::with_capacity((unpadded_row * size) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded_row as usize) {
                pixels.extend_from_slice(&row[..unpadded_row as usize]);
            }
        }
        staging.unmap();

        RgbaImage::from_raw(size, size, pixels).ok_or_else(|| {
            Error::new(
                InconsistentState,
                "texture readback produced a short pixel buffer".to_string(),
            )
        })
    }
}

/// CPU side of `reduce_mean`: channel sums are 8-bit step counts, the
/// mean comes out normalized to 0..1.
pub fn mean_from_sums(sums: &[u32; 5]) -> Result<MeanColor> {
    let count = sums[4];
    if count == 0 {
        let desc = "sample mask selects no pixels".to_string();
        return Err(Error::new(InconsistentState, desc));
    }
    let mean = |sum: u32| sum as f32 / 255.0 / count as f32;
    Ok([mean(sums[0]), mean(sums[1]), mean(sums[2]), mean(sums[3])])
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mirror of the blend pass: per-pixel lerp toward the mean by the
    // skin-mask weight.
    fn blend_pixel(
        src: MeanColor,
        mean: MeanColor,
        weight: f32,
    ) -> MeanColor {
        let mut out = [0.0; 4];
        for c in 0..4 {
            out[c] = src[c] + (mean[c] - src[c]) * weight;
        }
        out
    }

    #[test]
    fn test_blend_mask_boundaries() {
        let src = [0.8, 0.4, 0.2, 1.0];
        let mean = [0.6, 0.5, 0.4, 1.0];

        // Unmasked pixels pass through untouched, fully masked ones
        // take the mean exactly.
        assert_eq!(blend_pixel(src, mean, 0.0), src);
        assert_eq!(blend_pixel(src, mean, 1.0), mean);

        let half = blend_pixel(src, mean, 0.5);
        base::assert_eq_f32!(half[0], 0.7);
        base::assert_eq_f32!(half[1], 0.45);
        base::assert_eq_f32!(half[2], 0.3);
    }

    #[test]
    fn test_mean_from_sums() {
        // Two pixels, both mid-gray opaque.
        let sums = [255, 255, 255, 510, 2];
        let mean = mean_from_sums(&sums).unwrap();

        base::assert_eq_f32!(mean[0], 0.5);
        base::assert_eq_f32!(mean[1], 0.5);
        base::assert_eq_f32!(mean[2], 0.5);
        base::assert_eq_f32!(mean[3], 1.0);
    }

    #[test]
    fn test_mean_from_sums_empty_mask() {
        let res = mean_from_sums(&[0, 0, 0, 0, 0]);
        assert_eq!(
            res.unwrap_err().description,
            "sample mask selects no pixels"
        );
    }
}
