use std::io;

use base::defs::{IntoResult, Result};

use crate::mesh::MeshSnapshot;

/// Write the snapshot as a Wavefront OBJ.
///
/// Texture coordinates are emitted as stored, V already flipped at
/// load, so they index the top-left-origin texture image written next
/// to the model. Faces reuse one index for position, texcoord and
/// normal, which is valid because corners are expanded so all three
/// streams run in lockstep.
pub fn export_mesh(
    snapshot: &MeshSnapshot,
    writer: &mut dyn io::Write,
) -> Result<()> {
    let write_err = || "failed to write OBJ data".to_string();

    for v in &snapshot.corner_vertices {
        writeln!(writer, "v {} {} {}", v.x, v.y, v.z).res(write_err)?;
    }

    for uv in &snapshot.corner_uvs {
        writeln!(writer, "vt {} {}", uv.x, uv.y).res(write_err)?;
    }

    for n in &snapshot.corner_normals {
        writeln!(writer, "vn {} {} {}", n.x, n.y, n.z).res(write_err)?;
    }

    for triangle in snapshot.triangle_indices.chunks_exact(3) {
        let (a, b, c) =
            (triangle[0] + 1, triangle[1] + 1, triangle[2] + 1);
        writeln!(writer, "f {0}/{0}/{0} {1}/{1}/{1} {2}/{2}/{2}", a, b, c)
            .res(write_err)?;
    }

    Ok(())
}
