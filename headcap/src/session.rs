use image::GrayImage;
use log::info;
use structopt::StructOpt;

use base::defs::{IntoResult, Result};

use crate::assets::AssetProvider;
use crate::camera::{CameraImage, FrameTransforms};
use crate::deform::{DeformParams, Deformer};
use crate::gpu::GpuContext;
use crate::import_obj::load_template;
use crate::mesh::{Mesh, MeshSnapshot, Point3};
use crate::texture::{Blender, MeanColor, Projector, TextureParams};

#[derive(Clone, StructOpt)]
pub struct SessionParams {
    #[structopt(flatten)]
    pub deform: DeformParams,

    #[structopt(flatten)]
    pub texture: TextureParams,

    #[structopt(
        help = "Template mesh asset name",
        long,
        default_value = "ARHead.obj"
    )]
    pub template_asset: String,

    #[structopt(
        help = "Sample mask asset name",
        long,
        default_value = "sampleMask.png"
    )]
    pub sample_mask_asset: String,

    #[structopt(
        help = "Skin mask asset name",
        long,
        default_value = "headMask.png"
    )]
    pub skin_mask_asset: String,
}

impl Default for SessionParams {
    fn default() -> Self {
        SessionParams {
            deform: DeformParams::default(),
            texture: TextureParams::default(),
            template_asset: "ARHead.obj".to_string(),
            sample_mask_asset: "sampleMask.png".to_string(),
            skin_mask_asset: "headMask.png".to_string(),
        }
    }
}

/// One tracked camera frame handed to the session.
pub struct FrameInput<'a> {
    pub tracked: &'a [Point3],
    pub camera: &'a CameraImage,
    pub transforms: &'a FrameTransforms,
}

/// What a processed frame yields: the deformed mesh, the masked mean
/// skin color and the landmark scale used for extrapolation.
pub struct FrameOutput {
    pub mesh: MeshSnapshot,
    pub mean_color: MeanColor,
    pub avg_scale: f32,
}

/// Live capture pipeline: deform the template toward the tracked
/// frame, project the camera image into texture space, then blend the
/// result with the masked mean color.
///
/// Frames are processed one at a time; each `on_frame` call fully
/// replaces the previous frame's texture.
#[derive(Debug)]
pub struct ScanSession {
    gpu: GpuContext,
    mesh: Mesh,
    deformer: Deformer,
    projector: Projector,
    blender: Blender,
}

impl ScanSession {
    pub fn new(
        assets: &dyn AssetProvider,
        params: &SessionParams,
        deformer: Deformer,
    ) -> Result<ScanSession> {
        let template = assets.load(&params.template_asset)?;
        let mesh = load_template(&template[..])?;
        let num_unmapped = mesh.check_topology()?;
        info!(
            "loaded template: {} sources ({} unmapped), {} corners, \
             {} triangles",
            mesh.source_vertices.len(),
            num_unmapped,
            mesh.corner_count(),
            mesh.triangle_count()
        );

        let sample_mask =
            load_mask_asset(assets, &params.sample_mask_asset)?;
        let skin_mask = load_mask_asset(assets, &params.skin_mask_asset)?;

        let gpu = GpuContext::new()?;
        let projector = Projector::new(&gpu, &mesh, &params.texture)?;
        let blender = Blender::new(
            &gpu,
            &sample_mask,
            &skin_mask,
            params.texture.texture_size,
        )?;

        Ok(ScanSession {
            gpu,
            mesh,
            deformer,
            projector,
            blender,
        })
    }

    /// Process one frame. Failure leaves the previous texture in
    /// place; the caller may retry with the next frame.
    pub fn on_frame(&mut self, frame: &FrameInput) -> Result<FrameOutput> {
        let avg_scale =
            self.deformer.deform(&mut self.mesh, frame.tracked)?;
        self.projector.project(
            &self.gpu,
            &self.mesh,
            frame.camera,
            frame.transforms,
        )?;
        let mean_color =
            self.blender.blend(&self.gpu, self.projector.texture())?;

        Ok(FrameOutput {
            mesh: self.mesh.snapshot(),
            mean_color,
            avg_scale,
        })
    }

    /// Download the latest blended texture.
    pub fn final_texture(&self) -> Result<image::RgbaImage> {
        self.blender.read_back(&self.gpu)
    }
}

fn load_mask_asset(
    assets: &dyn AssetProvider,
    name: &str,
) -> Result<GrayImage> {
    let data = assets.load(name)?;
    let image = image::load_from_memory(&data)
        .res(|| format!("failed to decode mask asset '{}'", name))?;
    Ok(image.to_luma8())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, Luma, RgbaImage};
    use nalgebra::Matrix4;

    use crate::assets::testing::MockAssets;
    use crate::camera::DisplayTransform;

    use super::*;

    const TEMPLATE_OBJ: &str = "\
        v 0 0 1\n\
        v 1 0 1\n\
        v 0 1 1\n\
        v 0 0 2\n\
        vt 0 0\n\
        vt 1 0\n\
        vt 0 1\n\
        vn 0 0 1\n\
        f 1/1/1 2/2/1 3/3/1\n\
        f 1/1/1 2/2/1 4/3/1\n\
    ";

    fn mask_png(size: u32) -> Vec<u8> {
        let mask = GrayImage::from_pixel(size, size, Luma([255u8]));
        let mut data = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(mask)
            .write_to(&mut data, image::ImageOutputFormat::Png)
            .unwrap();
        data.into_inner()
    }

    fn test_params() -> SessionParams {
        SessionParams {
            deform: DeformParams {
                tracked_count: 3,
                vertical_damping: 0.97,
            },
            texture: TextureParams {
                texture_size: 64,
                ..TextureParams::default()
            },
            ..SessionParams::default()
        }
    }

    fn test_assets() -> MockAssets {
        let assets = MockAssets::new();
        {
            let mut mock = assets.load_mock.borrow_mut();
            // Loaded in order: template, sample mask, skin mask.
            mock.rets.push(Ok(mask_png(64)));
            mock.rets.push(Ok(mask_png(64)));
            mock.rets.push(Ok(TEMPLATE_OBJ.as_bytes().to_vec()));
        }
        assets
    }

    fn drain_args(assets: &MockAssets) {
        let mut mock = assets.load_mock.borrow_mut();
        assert_eq!(
            mock.args.drain(..).collect::<Vec<_>>(),
            vec![
                "ARHead.obj".to_string(),
                "sampleMask.png".to_string(),
                "headMask.png".to_string(),
            ]
        );
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_session_end_to_end() {
        let params = test_params();
        let assets = test_assets();
        let deformer =
            Deformer::new(params.deform.clone(), vec![0, 1]).unwrap();

        let mut session =
            ScanSession::new(&assets, &params, deformer).unwrap();
        drain_args(&assets);

        let camera = CameraImage::from_rgba(&RgbaImage::from_pixel(
            8,
            8,
            image::Rgba([200, 150, 120, 255]),
        ));
        let transforms = FrameTransforms {
            camera_transform: Matrix4::identity(),
            world_transform: Matrix4::identity(),
            display_transform: DisplayTransform::identity(),
            projection: Matrix4::identity(),
        };
        let tracked = [
            Point3::new(0.0, 0.0, 1.1),
            Point3::new(1.1, 0.0, 1.1),
            Point3::new(0.0, 1.1, 1.1),
        ];

        let frame = FrameInput {
            tracked: &tracked,
            camera: &camera,
            transforms: &transforms,
        };
        let output = session.on_frame(&frame).unwrap();

        assert_eq!(output.mesh.corner_vertices.len(), 6);
        assert!(output.avg_scale > 1.0);
        assert!(output.mean_color[3] > 0.0);

        let texture = session.final_texture().unwrap();
        assert_eq!(texture.dimensions(), (64, 64));
    }

    #[test]
    fn test_session_bad_mask_asset() {
        let params = test_params();
        let assets = MockAssets::new();
        {
            let mut mock = assets.load_mock.borrow_mut();
            mock.rets.push(Ok(vec![1, 2, 3]));
            mock.rets.push(Ok(TEMPLATE_OBJ.as_bytes().to_vec()));
        }
        let deformer =
            Deformer::new(params.deform.clone(), vec![0, 1]).unwrap();

        let err = ScanSession::new(&assets, &params, deformer)
            .unwrap_err();
        assert_eq!(
            err.description,
            "failed to decode mask asset 'sampleMask.png'"
        );

        let mut mock = assets.load_mock.borrow_mut();
        mock.args.clear();
    }
}
