use log::warn;

use base::defs::{Error, ErrorKind::*, Result};

pub type Point3 = nalgebra::Point3<f32>;
pub type Vector2 = nalgebra::Vector2<f32>;
pub type Vector3 = nalgebra::Vector3<f32>;
pub type Matrix3 = nalgebra::Matrix3<f32>;
pub type Matrix4 = nalgebra::Matrix4<f32>;

/// Indexed triangle mesh expanded from the template asset.
///
/// Two index spaces coexist: source vertices (unique positions, shared
/// with the tracker) and corner vertices (one entry per position/normal/
/// texcoord tuple used by a triangle corner, as a rasterizer needs).
/// `source_to_corner_map` ties them together.
#[derive(Default)]
#[derive(Debug)]
pub struct Mesh {
    pub source_vertices: Vec<Point3>,
    pub original_source_vertices: Vec<Point3>,
    pub corner_vertices: Vec<Point3>,
    pub corner_normals: Vec<Vector3>,
    pub corner_uvs: Vec<Vector2>,
    pub triangle_indices: Vec<u32>,
    pub source_to_corner_map: Vec<Vec<u32>>,
}

impl Mesh {
    pub fn corner_count(&self) -> usize {
        self.corner_vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_indices.len() / 3
    }

    /// Validate the loaded topology. Source vertices without a corner
    /// mapping are logged and counted, not fatal; a triangle index
    /// outside the corner range or a map that does not cover every
    /// source vertex is.
    pub fn check_topology(&self) -> Result<usize> {
        let num_corners = self.corner_count() as u32;
        for (i, &index) in self.triangle_indices.iter().enumerate() {
            if index >= num_corners {
                let desc = format!(
                    "triangle corner {} references corner vertex {} \
                     of {} total",
                    i, index, num_corners
                );
                return Err(Error::new(InconsistentState, desc));
            }
        }

        if self.triangle_indices.len() % 3 != 0 {
            let desc = format!(
                "triangle index count {} is not divisible by 3",
                self.triangle_indices.len()
            );
            return Err(Error::new(InconsistentState, desc));
        }

        if self.source_to_corner_map.len() != self.source_vertices.len() {
            let desc = format!(
                "source-to-corner map covers {} of {} source vertices",
                self.source_to_corner_map.len(),
                self.source_vertices.len()
            );
            return Err(Error::new(InconsistentState, desc));
        }

        let mut num_unmapped = 0;
        for (i, corners) in self.source_to_corner_map.iter().enumerate() {
            if corners.is_empty() {
                warn!("source vertex {} has no corner mapping", i);
                num_unmapped += 1;
            }
        }

        Ok(num_unmapped)
    }

    /// Value copy of the renderable state, safe to hand downstream
    /// while the next frame deforms the mesh in place.
    pub fn snapshot(&self) -> MeshSnapshot {
        MeshSnapshot {
            corner_vertices: self.corner_vertices.clone(),
            corner_normals: self.corner_normals.clone(),
            corner_uvs: self.corner_uvs.clone(),
            triangle_indices: self.triangle_indices.clone(),
        }
    }
}

/// Immutable per-frame copy of the deformed mesh handed to rendering
/// and export collaborators.
pub struct MeshSnapshot {
    pub corner_vertices: Vec<Point3>,
    pub corner_normals: Vec<Vector3>,
    pub corner_uvs: Vec<Vector2>,
    pub triangle_indices: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_corner_mesh() -> Mesh {
        Mesh {
            source_vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            original_source_vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            corner_vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            corner_normals: vec![Vector3::z(); 3],
            corner_uvs: vec![Vector2::zeros(); 3],
            triangle_indices: vec![0, 1, 2],
            source_to_corner_map: vec![vec![0], vec![1], vec![2]],
        }
    }

    #[test]
    fn test_check_topology_covered() {
        let mesh = two_corner_mesh();
        assert_eq!(mesh.check_topology().unwrap(), 0);
    }

    #[test]
    fn test_check_topology_counts_unmapped_sources() {
        let mut mesh = two_corner_mesh();
        mesh.source_to_corner_map[1].clear();
        assert_eq!(mesh.check_topology().unwrap(), 1);
    }

    #[test]
    fn test_check_topology_rejects_bad_triangle_index() {
        let mut mesh = two_corner_mesh();
        mesh.triangle_indices[2] = 9;
        assert!(mesh.check_topology().is_err());
    }

    #[test]
    fn test_check_topology_rejects_short_corner_map() {
        let mut mesh = two_corner_mesh();
        mesh.source_to_corner_map.pop();
        let err = mesh.check_topology().unwrap_err();
        assert_eq!(
            err.description,
            "source-to-corner map covers 2 of 3 source vertices"
        );
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut mesh = two_corner_mesh();
        let snapshot = mesh.snapshot();
        mesh.corner_vertices[0] = Point3::new(5.0, 5.0, 5.0);
        assert_eq!(snapshot.corner_vertices[0], Point3::new(0.0, 0.0, 0.0));
    }
}
