use wgpu::util::DeviceExt;

use base::defs::{Error, ErrorKind::*, Result};

use crate::camera::{CameraImage, FrameTransforms};
use crate::gpu::GpuContext;
use crate::mesh::Mesh;
use crate::texture::{
    check_texture_size, create_square_texture, TextureParams,
};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShaderState {
    display_transform: [[f32; 4]; 4],
    model_view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
}

/// GPU render pass that projects the camera frame into the mesh's UV
/// space, producing the per-frame baked texture.
///
/// The index buffer is uploaded once at construction; position, normal
/// and UV streams are re-uploaded on every call because deformation
/// moves them each frame. The render target is cleared before each
/// draw, so two calls with identical inputs produce identical pixels.
#[derive(Debug)]
pub struct Projector {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    position_buffer: wgpu::Buffer,
    normal_buffer: wgpu::Buffer,
    uv_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    corner_count: usize,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    clear_color: wgpu::Color,
}

impl Projector {
    pub fn new(
        gpu: &GpuContext,
        mesh: &Mesh,
        params: &TextureParams,
    ) -> Result<Projector> {
        check_texture_size(params.texture_size)?;
        gpu.scoped(|| Self::create(gpu, mesh, params))
    }

    fn create(gpu: &GpuContext, mesh: &Mesh, params: &TextureParams) -> Projector {
        let device = &gpu.device;

        let shader =
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("project shader"),
                source: wgpu::ShaderSource::Wgsl(
                    include_str!("project.wgsl").into(),
                ),
            });

        let bind_group_layout = device.create_bind_group_layout(
            &wgpu::BindGroupLayoutDescriptor {
                label: Some("project bind group layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    texture_entry(1),
                    texture_entry(2),
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(
                            wgpu::SamplerBindingType::Filtering,
                        ),
                        count: None,
                    },
                ],
            },
        );

        let pipeline_layout = device.create_pipeline_layout(
            &wgpu::PipelineLayoutDescriptor {
                label: Some("project pipeline layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            },
        );

        let vertex_layouts = [
            vertex_layout::<[f32; 3]>(0, wgpu::VertexFormat::Float32x3),
            vertex_layout::<[f32; 3]>(1, wgpu::VertexFormat::Float32x3),
            vertex_layout::<[f32; 2]>(2, wgpu::VertexFormat::Float32x2),
        ];

        let pipeline = device.create_render_pipeline(
            &wgpu::RenderPipelineDescriptor {
                label: Some("project pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_layouts,
                    compilation_options:
                        wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options:
                        wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    // The unwrapped mesh has no meaningful winding.
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            },
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("camera plane sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("project uniforms"),
            size: std::mem::size_of::<ShaderState>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let corner_count = mesh.corner_count();
        let vertex_buffer = |label, stride: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: (corner_count * stride) as u64,
                usage: wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let position_buffer = vertex_buffer("corner positions", 12);
        let normal_buffer = vertex_buffer("corner normals", 12);
        let uv_buffer = vertex_buffer("corner uvs", 8);

        let index_buffer =
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("triangle indices"),
                contents: bytemuck::cast_slice(&mesh.triangle_indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        let [r, g, b, a] = params.clear_color.0;
        let clear_color = wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        };

        let target = create_square_texture(
            gpu,
            params.texture_size,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING,
            "baked texture",
        );
        let target_view =
            target.create_view(&wgpu::TextureViewDescriptor::default());

        Projector {
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            position_buffer,
            normal_buffer,
            uv_buffer,
            index_buffer,
            index_count: mesh.triangle_indices.len() as u32,
            corner_count,
            target,
            target_view,
            clear_color,
        }
    }

    /// The baked texture the last `project` call rendered into.
    pub fn texture(&self) -> &wgpu::Texture {
        &self.target
    }

    /// Project the camera frame onto the mesh's UV space. Blocks until
    /// the GPU has finished writing the baked texture.
    pub fn project(
        &mut self,
        gpu: &GpuContext,
        mesh: &Mesh,
        camera: &CameraImage,
        transforms: &FrameTransforms,
    ) -> Result<()> {
        camera.validate()?;
        if mesh.corner_count() != self.corner_count {
            let desc = format!(
                "mesh has {} corners, projector was built for {}",
                mesh.corner_count(),
                self.corner_count
            );
            return Err(Error::new(InconsistentState, desc));
        }

        let state = ShaderState {
            display_transform: transforms.display_inverse()?.into(),
            model_view: transforms.model_view()?.into(),
            projection: transforms.projection.into(),
        };

        gpu.scoped(|| {
            self.upload_geometry(gpu, mesh);
            gpu.queue.write_buffer(
                &self.uniform_buffer,
                0,
                bytemuck::bytes_of(&state),
            );

            let luma = upload_plane(
                gpu,
                &camera.luma,
                camera.width,
                camera.height,
                wgpu::TextureFormat::R8Unorm,
                "camera luma plane",
            );
            let chroma = upload_plane(
                gpu,
                &camera.chroma,
                camera.chroma_width,
                camera.chroma_height,
                wgpu::TextureFormat::Rg8Unorm,
                "camera chroma plane",
            );

            let luma_view =
                luma.create_view(&wgpu::TextureViewDescriptor::default());
            let chroma_view =
                chroma.create_view(&wgpu::TextureViewDescriptor::default());

            let bind_group =
                gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("project bind group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: self
                                .uniform_buffer
                                .as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(
                                &luma_view,
                            ),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(
                                &chroma_view,
                            ),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::Sampler(
                                &self.sampler,
                            ),
                        },
                    ],
                });

            let mut encoder = gpu.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor {
                    label: Some("project encoder"),
                },
            );
            {
                let mut pass =
                    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("project pass"),
                        color_attachments: &[Some(
                            wgpu::RenderPassColorAttachment {
                                view: &self.target_view,
                                resolve_target: None,
                                ops: wgpu::Operations {
                                    load: wgpu::LoadOp::Clear(
                                        self.clear_color,
                                    ),
                                    store: wgpu::StoreOp::Store,
                                },
                            },
                        )],
                        depth_stencil_attachment: None,
                        occlusion_query_set: None,
                        timestamp_writes: None,
                    });

                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.set_vertex_buffer(0, self.position_buffer.slice(..));
                pass.set_vertex_buffer(1, self.normal_buffer.slice(..));
                pass.set_vertex_buffer(2, self.uv_buffer.slice(..));
                pass.set_index_buffer(
                    self.index_buffer.slice(..),
                    wgpu::IndexFormat::Uint32,
                );
                pass.draw_indexed(0..self.index_count, 0, 0..1);
            }

            gpu.queue.submit(std::iter::once(encoder.finish()));
            gpu.wait();
        })
    }

    fn upload_geometry(&self, gpu: &GpuContext, mesh: &Mesh) {
        let positions: Vec<[f32; 3]> = mesh
            .corner_vertices
            .iter()
            .map(|p| [p.x, p.y, p.z])
            .collect();
        let normals: Vec<[f32; 3]> = mesh
            .corner_normals
            .iter()
            .map(|n| [n.x, n.y, n.z])
            .collect();
        let uvs: Vec<[f32; 2]> =
            mesh.corner_uvs.iter().map(|uv| [uv.x, uv.y]).collect();

        gpu.queue.write_buffer(
            &self.position_buffer,
            0,
            bytemuck::cast_slice(&positions),
        );
        gpu.queue.write_buffer(
            &self.normal_buffer,
            0,
            bytemuck::cast_slice(&normals),
        );
        gpu.queue
            .write_buffer(&self.uv_buffer, 0, bytemuck::cast_slice(&uvs));
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn vertex_layout<T>(
    location: u32,
    format: wgpu::VertexFormat,
) -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [[wgpu::VertexAttribute; 1]; 3] = [
        [wgpu::VertexAttribute {
            offset: 0,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        }],
        [wgpu::VertexAttribute {
            offset: 0,
            shader_location: 1,
            format: wgpu::VertexFormat::Float32x3,
        }],
        [wgpu::VertexAttribute {
            offset: 0,
            shader_location: 2,
            format: wgpu::VertexFormat::Float32x2,
        }],
    ];
    debug_assert_eq!(ATTRIBUTES[location as usize][0].format, format);
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<T>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES[location as usize],
    }
}

/// CPU mirror of the vertex shader's texcoord-to-clip mapping, pinned
/// by tests.
#[cfg(test)]
fn uv_to_clip(u: f32, v: f32) -> (f32, f32) {
    (u * 2.0 - 1.0, 1.0 - v * 2.0)
}

/// CPU mirror of the vertex shader's NDC-to-screen mapping.
#[cfg(test)]
fn ndc_to_screen(x: f32, y: f32) -> (f32, f32) {
    (x * 0.5 + 0.5, 0.5 - y * 0.5)
}

fn upload_plane(
    gpu: &GpuContext,
    data: &[u8],
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    label: &str,
) -> wgpu::Texture {
    let bytes_per_pixel = match format {
        wgpu::TextureFormat::Rg8Unorm => 2,
        _ => 1,
    };
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
        format,
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
        data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * bytes_per_pixel),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    texture
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uv_square_fills_clip_space() {
        assert_eq!(uv_to_clip(0.0, 0.0), (-1.0, 1.0));
        assert_eq!(uv_to_clip(1.0, 1.0), (1.0, -1.0));
        assert_eq!(uv_to_clip(0.5, 0.5), (0.0, 0.0));
    }

    #[test]
    fn test_screen_mapping_flips_y() {
        assert_eq!(ndc_to_screen(0.0, 0.0), (0.5, 0.5));
        assert_eq!(ndc_to_screen(-1.0, 1.0), (0.0, 0.0));
        assert_eq!(ndc_to_screen(1.0, -1.0), (1.0, 1.0));
    }
}
