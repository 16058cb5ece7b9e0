use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, IntoResult, Result};
use base::util::fs;

use crate::assets::DirAssets;
use crate::camera::{CameraImage, DisplayTransform, FrameTransforms};
use crate::deform::Deformer;
use crate::export_obj::export_mesh;
use crate::mesh::{Matrix4, Point3};
use crate::pose;
use crate::pose::PoseTolerances;
use crate::session::{FrameInput, ScanSession, SessionParams};

/// One recorded capture frame, as the recording side serializes it.
/// Matrices are row-major.
#[derive(Deserialize, Serialize)]
pub struct FrameRecord {
    pub tracked: Vec<[f32; 3]>,
    pub camera_transform: [[f32; 4]; 4],
    pub world_transform: [[f32; 4]; 4],
    pub face_transform: [[f32; 4]; 4],
    /// Affine coefficients a, b, c, d, tx, ty.
    pub display_transform: [f32; 6],
    pub projection: [[f32; 4]; 4],
    /// Camera image file, relative to the capture directory.
    pub image: String,
}

#[derive(StructOpt)]
#[structopt(about = "Bake recorded capture frames into a textured model")]
pub struct BakeCommand {
    #[structopt(
        help = "Capture directory with assets and frames.json",
        name = "in-dir"
    )]
    in_dir: PathBuf,

    #[structopt(
        help = "Output directory",
        long,
        short = "o",
        default_value = "."
    )]
    out_dir: PathBuf,

    #[structopt(flatten)]
    session: SessionParams,

    #[structopt(flatten)]
    tolerances: PoseTolerances,
}

impl BakeCommand {
    pub fn run(&self) -> Result<()> {
        let assets = DirAssets::new(&self.in_dir);
        let deformer =
            Deformer::with_reference_landmarks(self.session.deform.clone())?;
        let mut session =
            ScanSession::new(&assets, &self.session, deformer)?;

        let records = self.read_records()?;
        let num_records = records.len();

        let mut last_output = None;
        for (i, record) in records.iter().enumerate() {
            match self.bake_frame(&mut session, record) {
                Ok(Some(output)) => last_output = Some(output),
                Ok(None) => {
                    info!("frame {}: skipped by pose gates", i);
                }
                Err(err) => {
                    warn!("frame {}: {}", i, err);
                }
            }
        }

        let output = last_output.ok_or_else(|| {
            let desc = format!(
                "no usable frame among {} recorded",
                num_records
            );
            Error::new(InconsistentState, desc)
        })?;

        let obj_path = self.out_dir.join("Model.obj");
        let mut obj = fs::create_file(&obj_path)?;
        export_mesh(&output.mesh, &mut obj)?;

        let texture_path = self.out_dir.join("Model.png");
        let texture = session.final_texture()?;
        texture.save(&texture_path).res(|| {
            format!(
                "failed to write texture '{}'",
                texture_path.to_string_lossy()
            )
        })?;

        info!(
            "baked '{}' and '{}', mean color {:?}",
            obj_path.to_string_lossy(),
            texture_path.to_string_lossy(),
            output.mean_color
        );
        Ok(())
    }

    fn read_records(&self) -> Result<Vec<FrameRecord>> {
        let path = self.in_dir.join("frames.json");
        let data = fs::read_file(&path)?;
        serde_json::from_slice(&data).res(|| {
            format!(
                "failed to parse frame records '{}'",
                path.to_string_lossy()
            )
        })
    }

    fn bake_frame(
        &self,
        session: &mut ScanSession,
        record: &FrameRecord,
    ) -> Result<Option<crate::session::FrameOutput>> {
        let face = matrix_from_rows(&record.face_transform);
        let camera = matrix_from_rows(&record.camera_transform);

        let distance = pose::face_distance_cm(&face, &camera)?;
        let straight =
            pose::is_facing_straight(&face, &camera, &self.tolerances)?;
        let centered =
            pose::is_face_centered(&face, &camera, &self.tolerances)?;
        info!(
            "face at {:.1} cm, straight: {}, centered: {}",
            distance, straight, centered
        );
        if !straight || !centered {
            return Ok(None);
        }

        let image_path = self.in_dir.join(&record.image);
        let image_data = fs::read_file(&image_path)?;
        let image = image::load_from_memory(&image_data).res(|| {
            format!(
                "failed to decode camera image '{}'",
                image_path.to_string_lossy()
            )
        })?;
        let camera_image = CameraImage::from_rgba(&image.to_rgba8());

        let tracked: Vec<Point3> = record
            .tracked
            .iter()
            .map(|p| Point3::new(p[0], p[1], p[2]))
            .collect();
        let [a, b, c, d, tx, ty] = record.display_transform;
        let transforms = FrameTransforms {
            camera_transform: camera,
            world_transform: matrix_from_rows(&record.world_transform),
            display_transform: DisplayTransform { a, b, c, d, tx, ty },
            projection: matrix_from_rows(&record.projection),
        };

        let frame = FrameInput {
            tracked: &tracked,
            camera: &camera_image,
            transforms: &transforms,
        };
        session.on_frame(&frame).map(Some)
    }
}

fn matrix_from_rows(rows: &[[f32; 4]; 4]) -> Matrix4 {
    Matrix4::from_fn(|r, c| rows[r][c])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_from_rows() {
        let m = matrix_from_rows(&[
            [1.0, 2.0, 3.0, 4.0],
            [5.0, 6.0, 7.0, 8.0],
            [9.0, 10.0, 11.0, 12.0],
            [13.0, 14.0, 15.0, 16.0],
        ]);
        base::assert_eq_f32!(m[(0, 1)], 2.0);
        base::assert_eq_f32!(m[(3, 0)], 13.0);
    }

    #[test]
    fn test_frame_record_json() {
        let json = r#"{
            "tracked": [[0.0, 0.1, 0.2]],
            "camera_transform": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
            "world_transform": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
            "face_transform": [[1,0,0,0],[0,1,0,0],[0,0,1,-0.3],[0,0,0,1]],
            "display_transform": [1, 0, 0, 1, 0, 0],
            "projection": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
            "image": "frame0.png"
        }"#;

        let record: FrameRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.tracked.len(), 1);
        assert_eq!(record.image, "frame0.png");
        base::assert_eq_f32!(record.face_transform[2][3], -0.3);
    }
}
