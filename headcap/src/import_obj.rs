use std::io::{BufRead, BufReader, Read};

use log::{info, warn};

use base::defs::{Error, ErrorKind::*, IntoResult, Result};

use crate::mesh::{Mesh, Point3, Vector2, Vector3};

/// Parse the template mesh asset into an expanded `Mesh`.
///
/// Accepts the `v`/`vt`/`vn`/`f i/j/k` subset of Wavefront OBJ with
/// 1-based indices. Malformed geometry lines are skipped with a
/// warning; only an unreadable source fails the load. The texcoord V
/// component is flipped on load to match the image convention of the
/// baked texture.
pub fn load_template<R: Read>(reader: R) -> Result<Mesh> {
    let mut state = ImportState::default();

    for line_res in BufReader::new(reader).lines() {
        let line =
            line_res.res(|| "failed to read template line".to_string())?;
        state.line += 1;

        let parts: Vec<&str> = line.trim().split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "v" => import_v(&mut state, &parts),
            "vt" => import_vt(&mut state, &parts),
            "vn" => import_vn(&mut state, &parts),
            "f" => import_f(&mut state, &parts),
            _ => (),
        }
    }

    if state.positions.is_empty() || state.faces.is_empty() {
        let desc = format!(
            "template asset holds no geometry ({} positions, {} faces)",
            state.positions.len(),
            state.faces.len()
        );
        return Err(Error::new(MalformedData, desc));
    }

    info!(
        "loaded template: {} source vertices, {} faces",
        state.positions.len(),
        state.faces.len()
    );

    Ok(expand_corners(state))
}

#[derive(Default)]
struct ImportState {
    line: usize,
    positions: Vec<Point3>,
    uvs: Vec<Vector2>,
    normals: Vec<Vector3>,
    faces: Vec<[(u32, u32, u32); 3]>,
}

fn parse_coord(part: &str) -> Option<f32> {
    part.parse::<f32>().ok()
}

fn import_v(state: &mut ImportState, parts: &[&str]) {
    if parts.len() < 4 {
        warn!("malformed v-statement at line {}, skipped", state.line);
        return;
    }
    match (
        parse_coord(parts[1]),
        parse_coord(parts[2]),
        parse_coord(parts[3]),
    ) {
        (Some(x), Some(y), Some(z)) => {
            state.positions.push(Point3::new(x, y, z));
        }
        _ => warn!("malformed v-statement at line {}, skipped", state.line),
    }
}

fn import_vt(state: &mut ImportState, parts: &[&str]) {
    if parts.len() < 3 {
        warn!("malformed vt-statement at line {}, skipped", state.line);
        return;
    }
    match (parse_coord(parts[1]), parse_coord(parts[2])) {
        // Flip V to match the baked-texture image origin.
        (Some(u), Some(v)) => state.uvs.push(Vector2::new(u, 1.0 - v)),
        _ => warn!("malformed vt-statement at line {}, skipped", state.line),
    }
}

fn import_vn(state: &mut ImportState, parts: &[&str]) {
    if parts.len() < 4 {
        warn!("malformed vn-statement at line {}, skipped", state.line);
        return;
    }
    match (
        parse_coord(parts[1]),
        parse_coord(parts[2]),
        parse_coord(parts[3]),
    ) {
        (Some(x), Some(y), Some(z)) => {
            state.normals.push(Vector3::new(x, y, z));
        }
        _ => warn!("malformed vn-statement at line {}, skipped", state.line),
    }
}

fn import_f(state: &mut ImportState, parts: &[&str]) {
    if parts.len() != 4 {
        warn!(
            "f-statement at line {} has {} vertices instead of 3, skipped",
            state.line,
            parts.len() - 1
        );
        return;
    }

    let mut face = [(0u32, 0u32, 0u32); 3];
    for (corner, part) in parts[1..].iter().enumerate() {
        let mut iter = part.split('/');
        let indices = (
            parse_f_component(&mut iter),
            parse_f_component(&mut iter),
            parse_f_component(&mut iter),
        );
        match indices {
            (Some(v), Some(t), Some(n)) => face[corner] = (v, t, n),
            _ => {
                warn!(
                    "malformed corner {} in f-statement at line {}, \
                     face skipped",
                    corner + 1,
                    state.line
                );
                return;
            }
        }
    }

    for &(v, t, n) in &face {
        if v as usize > state.positions.len()
            || t as usize > state.uvs.len()
            || n as usize > state.normals.len()
        {
            warn!(
                "f-statement at line {} references unknown geometry, \
                 face skipped",
                state.line
            );
            return;
        }
    }

    state.faces.push(face);
}

fn parse_f_component(iter: &mut std::str::Split<char>) -> Option<u32> {
    let num = iter.next()?.parse::<u32>().ok()?;
    // OBJ indices are 1-based; 0 never refers to geometry.
    if num == 0 {
        None
    } else {
        Some(num)
    }
}

/// Expand face records into per-corner attribute streams. Every corner
/// gets a fresh entry even when positions are shared, and the
/// source-to-corner map accumulates the expansion.
fn expand_corners(state: ImportState) -> Mesh {
    let mut mesh = Mesh {
        source_vertices: state.positions.clone(),
        original_source_vertices: state.positions.clone(),
        source_to_corner_map: vec![Vec::new(); state.positions.len()],
        ..Default::default()
    };

    for face in &state.faces {
        for &(v, t, n) in face {
            let corner = mesh.corner_vertices.len() as u32;
            mesh.corner_vertices.push(state.positions[(v - 1) as usize]);
            mesh.corner_uvs.push(state.uvs[(t - 1) as usize]);
            mesh.corner_normals.push(state.normals[(n - 1) as usize]);
            mesh.triangle_indices.push(corner);
            mesh.source_to_corner_map[(v - 1) as usize].push(corner);
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "\
# comment
v 0 0 0
v 1 0 0
v 0 1 0
vt 0 0
vt 1 0
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1
f 3/3/1 2/2/1 1/1/1
";

    #[test]
    fn test_load_template() {
        let mesh = load_template(TEMPLATE.as_bytes()).unwrap();

        assert_eq!(mesh.source_vertices.len(), 3);
        assert_eq!(mesh.corner_count(), 6);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.check_topology().unwrap(), 0);

        // Shared positions are duplicated per corner.
        assert_eq!(mesh.corner_vertices[0], mesh.corner_vertices[5]);
        assert_eq!(mesh.source_to_corner_map[0], vec![0, 5]);
        assert_eq!(mesh.source_to_corner_map[1], vec![1, 4]);
        assert_eq!(mesh.source_to_corner_map[2], vec![2, 3]);
    }

    #[test]
    fn test_texcoord_v_is_flipped() {
        let mesh = load_template(TEMPLATE.as_bytes()).unwrap();
        // vt 0 1 becomes (0, 0) after the flip.
        assert_eq!(mesh.corner_uvs[2], Vector2::new(0.0, 0.0));
        assert_eq!(mesh.corner_uvs[0], Vector2::new(0.0, 1.0));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let template = "\
v 0 0 0
v abc 0 0
v 1 0 0
v 0 1 0
vt 0 0
vn 0 0 1
f 1/1/1 2/1/1 3/1/1
f 1/1/1 2/1/1
f 1/1/1 2/1/1 9/1/1
";
        let mesh = load_template(template.as_bytes()).unwrap();
        assert_eq!(mesh.source_vertices.len(), 3);
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn test_empty_template_fails() {
        assert!(load_template("# nothing\n".as_bytes()).is_err());
    }

    #[test]
    fn test_unreadable_source_fails() {
        struct BrokenReader;

        impl Read for BrokenReader {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "device gone",
                ))
            }
        }

        assert!(load_template(BrokenReader).is_err());
    }
}
