use log::warn;
use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, Result};

use crate::mesh::{Mesh, Point3};

/// Number of source vertices driven directly by the tracker in the
/// reference template.
pub const REFERENCE_TRACKED_COUNT: usize = 1220;

/// Landmark source indices used to estimate the per-frame scale of the
/// untracked head region. Empirically chosen for the reference
/// template; all lie inside the tracked region.
pub const REFERENCE_LANDMARKS: &[usize] = &[
    20, 39, 57, 130, 131, 167, 208, 211, 212, 213, 295, 330, 352, 376, 392,
    425, 462, 467, 489, 579, 580, 616, 659, 660, 661, 730, 765, 783, 807,
    822, 853, 888, 904, 905, 906, 907, 908, 909, 910, 911, 912, 913, 914,
    915, 916, 917, 918, 919, 920, 921, 966, 1047, 1213, 1214, 1215, 1216,
];

#[derive(Clone, Debug, StructOpt)]
pub struct DeformParams {
    #[structopt(
        help = "Number of tracker-driven source vertices",
        long,
        default_value = "1220"
    )]
    pub tracked_count: usize,

    #[structopt(
        help = "Vertical damping applied to extrapolated vertices",
        long,
        default_value = "0.97"
    )]
    pub vertical_damping: f32,
}

impl Default for DeformParams {
    fn default() -> Self {
        DeformParams {
            tracked_count: REFERENCE_TRACKED_COUNT,
            vertical_damping: 0.97,
        }
    }
}

/// Warps the template toward live tracked positions, extrapolating the
/// untracked region by a radial scale law.
#[derive(Debug)]
pub struct Deformer {
    params: DeformParams,
    landmarks: Vec<usize>,
}

impl Deformer {
    pub fn new(params: DeformParams, landmarks: Vec<usize>) -> Result<Self> {
        if landmarks.is_empty() {
            return Err(Error::new(
                InconsistentState,
                "landmark set is empty".to_string(),
            ));
        }
        if let Some(&bad) = landmarks
            .iter()
            .find(|&&index| index >= params.tracked_count)
        {
            let desc = format!(
                "landmark index {} is outside the tracked region of {}",
                bad, params.tracked_count
            );
            return Err(Error::new(InconsistentState, desc));
        }
        Ok(Deformer { params, landmarks })
    }

    pub fn with_reference_landmarks(params: DeformParams) -> Result<Self> {
        Self::new(params, REFERENCE_LANDMARKS.to_vec())
    }

    /// Mutate the mesh positions in place to match the tracked frame.
    /// Returns the frame's average landmark scale. Topology is never
    /// touched; a source index without a corner mapping keeps its
    /// previous corner positions.
    pub fn deform(&self, mesh: &mut Mesh, tracked: &[Point3]) -> Result<f32> {
        let num_tracked = self.params.tracked_count;
        if tracked.len() != num_tracked {
            let desc = format!(
                "expected {} tracked positions, got {}",
                num_tracked,
                tracked.len()
            );
            return Err(Error::new(InconsistentState, desc));
        }
        if mesh.source_vertices.len() < num_tracked {
            let desc = format!(
                "mesh has {} source vertices, fewer than the tracked {}",
                mesh.source_vertices.len(),
                num_tracked
            );
            return Err(Error::new(InconsistentState, desc));
        }

        for (i, position) in tracked.iter().enumerate() {
            mesh.source_vertices[i] = *position;
            apply_to_corners(mesh, i, *position);
        }

        let avg_scale = self.average_scale(mesh, tracked);

        for j in num_tracked..mesh.original_source_vertices.len() {
            let original = mesh.original_source_vertices[j];
            let d0 = original.coords.norm();
            if d0 == 0.0 {
                continue;
            }
            let dir = original.coords / d0;
            let d1 = d0 * avg_scale;
            // Depth is never rescaled; only the tracked region moves
            // along z.
            let position = Point3::new(
                dir.x * d1,
                dir.y * d1 * self.params.vertical_damping,
                dir.z * d0,
            );
            mesh.source_vertices[j] = position;
            apply_to_corners(mesh, j, position);
        }

        Ok(avg_scale)
    }

    /// Arithmetic mean over the landmark set of the tracked-to-template
    /// distance-from-origin ratio.
    fn average_scale(&self, mesh: &Mesh, tracked: &[Point3]) -> f32 {
        let mut sum = 0.0;
        let mut count = 0;
        for &index in &self.landmarks {
            let original = mesh.original_source_vertices[index].coords.norm();
            if original == 0.0 {
                warn!("landmark {} sits at the origin, skipped", index);
                continue;
            }
            sum += tracked[index].coords.norm() / original;
            count += 1;
        }
        if count == 0 {
            return 1.0;
        }
        sum / count as f32
    }
}

fn apply_to_corners(mesh: &mut Mesh, source_index: usize, position: Point3) {
    if mesh.source_to_corner_map[source_index].is_empty() {
        warn!("no corner mapping for source vertex {}", source_index);
        return;
    }
    for k in 0..mesh.source_to_corner_map[source_index].len() {
        let corner = mesh.source_to_corner_map[source_index][k] as usize;
        mesh.corner_vertices[corner] = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Vector2, Vector3};
    use base::assert_eq_f32;

    // Four tracked vertices plus two extrapolated ones, each mapped to
    // a single corner for easy assertions.
    fn synthetic_mesh() -> Mesh {
        let positions = vec![
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 3.0, 4.0),
        ];
        Mesh {
            source_vertices: positions.clone(),
            original_source_vertices: positions.clone(),
            corner_vertices: positions.clone(),
            corner_normals: vec![Vector3::z(); 6],
            corner_uvs: vec![Vector2::zeros(); 6],
            triangle_indices: vec![0, 1, 2, 3, 4, 5],
            source_to_corner_map: (0..6).map(|i| vec![i as u32]).collect(),
        }
    }

    fn params() -> DeformParams {
        DeformParams {
            tracked_count: 4,
            vertical_damping: 0.97,
        }
    }

    fn scaled_tracked(scale: f32) -> Vec<Point3> {
        synthetic_mesh().source_vertices[..4]
            .iter()
            .map(|p| Point3::from(p.coords * scale))
            .collect()
    }

    #[test]
    fn test_tracked_region_is_exact() {
        let mut mesh = synthetic_mesh();
        let deformer = Deformer::new(params(), vec![0, 1, 2, 3]).unwrap();

        let tracked = vec![
            Point3::new(0.5, 0.25, 0.125),
            Point3::new(1.0, 2.0, 3.0),
            Point3::new(-1.0, 0.0, 0.5),
            Point3::new(0.0, 0.0, 2.0),
        ];
        deformer.deform(&mut mesh, &tracked).unwrap();

        for i in 0..4 {
            assert_eq!(mesh.source_vertices[i], tracked[i]);
            for &corner in &mesh.source_to_corner_map[i] {
                assert_eq!(mesh.corner_vertices[corner as usize], tracked[i]);
            }
        }
    }

    #[test]
    fn test_extrapolation_formula() {
        let mut mesh = synthetic_mesh();
        let deformer = Deformer::new(params(), vec![0, 1, 2, 3]).unwrap();

        // Every landmark ratio is 1.1, so avg_scale is exactly 1.1.
        let avg_scale = deformer
            .deform(&mut mesh, &scaled_tracked(1.1))
            .unwrap();
        assert_eq_f32!(avg_scale, 1.1);

        // Source 4 lies on the x axis at distance 2.
        let p = mesh.source_vertices[4];
        assert_eq_f32!(p.x, 2.0 * 1.1);
        assert_eq_f32!(p.y, 0.0);
        assert_eq_f32!(p.z, 0.0);

        // Source 5 at (0, 3, 4), d0 = 5, dir = (0, 0.6, 0.8).
        let q = mesh.source_vertices[5];
        assert_eq_f32!(q.x, 0.0);
        assert_eq_f32!(q.y, 0.6 * 5.0 * 1.1 * 0.97);
        assert_eq_f32!(q.z, 4.0);
    }

    #[test]
    fn test_scale_is_order_independent() {
        let tracked = vec![
            Point3::new(1.2, 0.0, 0.0),
            Point3::new(0.0, 0.9, 0.0),
            Point3::new(0.0, 0.0, 1.5),
            Point3::new(1.0, 1.0, 0.0),
        ];

        let mut mesh_a = synthetic_mesh();
        let a = Deformer::new(params(), vec![0, 1, 2, 3])
            .unwrap()
            .deform(&mut mesh_a, &tracked)
            .unwrap();

        let mut mesh_b = synthetic_mesh();
        let b = Deformer::new(params(), vec![3, 1, 0, 2])
            .unwrap()
            .deform(&mut mesh_b, &tracked)
            .unwrap();

        assert_eq_f32!(a, b);
    }

    #[test]
    fn test_unmapped_source_keeps_position() {
        let mut mesh = synthetic_mesh();
        mesh.source_to_corner_map[4].clear();
        let deformer = Deformer::new(params(), vec![0, 1, 2, 3]).unwrap();

        deformer.deform(&mut mesh, &scaled_tracked(1.1)).unwrap();

        // The corner keeps its template position, the source entry
        // still receives the extrapolated value.
        assert_eq!(mesh.corner_vertices[4], Point3::new(2.0, 0.0, 0.0));
        assert_eq_f32!(mesh.source_vertices[4].x, 2.2);
    }

    #[test]
    fn test_wrong_tracked_length_fails() {
        let mut mesh = synthetic_mesh();
        let deformer = Deformer::new(params(), vec![0, 1]).unwrap();
        let tracked = scaled_tracked(1.0)[..3].to_vec();
        assert!(deformer.deform(&mut mesh, &tracked).is_err());
    }

    #[test]
    fn test_landmark_outside_tracked_region_fails() {
        assert!(Deformer::new(params(), vec![0, 4]).is_err());
    }
}
