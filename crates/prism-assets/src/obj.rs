// SPDX-License-Identifier: CEPL-1.0
//! Wavefront OBJ subset: `v`, `vt`, `vn` and `f` records. Everything else
//! (groups, materials, smoothing) is skipped.
use prism_render::{MeshBuilder, MeshData, Vertex};

use crate::{AssetError, Result};

fn error(line: usize, message: impl Into<String>) -> AssetError {
    AssetError::Obj {
        line,
        message: message.into(),
    }
}

/// Parses up to `N` components; at least `required` must be present and the
/// rest default to 0.
fn floats<const N: usize>(line: usize, fields: &[&str], required: usize) -> Result<[f32; N]> {
    // Extra components (w, or a vt's third coordinate) are allowed and ignored.
    if fields.len() < required {
        return Err(error(
            line,
            format!("expected {required} components, got {}", fields.len()),
        ));
    }
    let mut out = [0.0; N];
    for (slot, text) in out.iter_mut().zip(fields) {
        *slot = text
            .parse()
            .map_err(|_| error(line, format!("bad number {text:?}")))?;
    }
    Ok(out)
}

/// Resolves a 1-based (or negative, relative) index against `len` elements.
fn resolve(line: usize, text: &str, len: usize, what: &str) -> Result<usize> {
    let raw: i64 = text
        .parse()
        .map_err(|_| error(line, format!("bad {what} index {text:?}")))?;
    let index = match raw {
        0 => return Err(error(line, format!("{what} index 0 is invalid"))),
        i if i > 0 => i - 1,
        i => len as i64 + i,
    };
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| error(line, format!("{what} index {raw} out of range ({len} defined)")))
}

pub fn parse_obj(src: &str) -> Result<MeshData> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut uvs: Vec<[f32; 2]> = Vec::new();
    let mut normals = 0usize;
    let mut builder = MeshBuilder::new();

    for (i, raw) in src.lines().enumerate() {
        let line = i + 1;
        let text = raw.split('#').next().unwrap_or("").trim();
        let mut fields = text.split_whitespace();
        let Some(tag) = fields.next() else {
            continue;
        };
        let rest: Vec<&str> = fields.collect();

        match tag {
            "v" => positions.push(floats::<3>(line, &rest, 3)?),
            "vt" => {
                let [u, v] = floats::<2>(line, &rest, 1)?;
                uvs.push([u, 1.0 - v]);
            }
            "vn" => {
                floats::<3>(line, &rest, 3)?;
                normals += 1;
            }
            "f" => {
                if rest.len() < 3 {
                    return Err(error(line, "face needs at least 3 corners"));
                }
                let mut corners = Vec::with_capacity(rest.len());
                for corner in &rest {
                    let mut parts = corner.split('/');
                    let p = resolve(line, parts.next().unwrap_or(""), positions.len(), "position")?;
                    let uv = match parts.next() {
                        Some(t) if !t.is_empty() => uvs[resolve(line, t, uvs.len(), "uv")?],
                        _ => [0.0, 0.0],
                    };
                    if let Some(t) = parts.next().filter(|t| !t.is_empty()) {
                        resolve(line, t, normals, "normal")?;
                    }
                    corners.push(Vertex::new(positions[p], uv));
                }
                for k in 1..corners.len() - 1 {
                    builder.push_triangle([corners[0], corners[k], corners[k + 1]]);
                }
            }
            _ => {}
        }
    }

    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const CUBE: &str = "\
# unit cube, quads
o cube
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 0 0 1
v 1 0 1
v 1 1 1
v 0 1 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
s off
f 1/1 2/2 3/3 4/4
f 5/1 8/4 7/3 6/2
f 1/1 5/2 6/3 2/4
f 4/1 3/2 7/3 8/4
f 1/1 4/2 8/3 5/4
f 2/1 6/2 7/3 3/4
";

    #[test]
    fn vertex_and_index_counts_match_unique_corners() {
        let mesh = parse_obj(CUBE).unwrap();

        // Count unique (position, uv) references straight from the text.
        let mut unique = HashSet::new();
        let mut faces = 0;
        for line in CUBE.lines().filter(|l| l.starts_with("f ")) {
            let corners: Vec<&str> = line.split_whitespace().skip(1).collect();
            faces += corners.len() - 2;
            unique.extend(corners.into_iter().map(str::to_owned));
        }

        assert_eq!(mesh.vertices.len(), unique.len());
        assert_eq!(mesh.indices.len(), 3 * faces);
        assert!(mesh
            .indices
            .iter()
            .all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn uv_v_is_flipped_and_bounds_computed() {
        let mesh = parse_obj("v 0 0 0\nv 2 0 0\nv 0 3 -1\nvt 0.25 0.75\nf 1/1 2/1 3/1\n").unwrap();
        assert_eq!(mesh.vertices[0].uv, [0.25, 0.25]);
        assert_eq!(mesh.bounds.min.to_array(), [0.0, 0.0, -1.0]);
        assert_eq!(mesh.bounds.max.to_array(), [2.0, 3.0, 0.0]);
    }

    #[test]
    fn single_component_uv_defaults_v_to_zero() {
        let mesh = parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0.5\nf 1/1 2/1 3/1\n").unwrap();
        assert_eq!(mesh.vertices[0].uv, [0.5, 1.0]);

        let err = parse_obj("v 0 0 0\nvt\n").unwrap_err();
        assert!(matches!(err, AssetError::Obj { line: 2, .. }));
    }

    #[test]
    fn corner_forms_and_negative_indices() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 1 1\nvn 0 0 1\nf -3//1 -2/1/1 3\n";
        let mesh = parse_obj(src).unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.vertices[0].uv, [0.0, 0.0]);
        assert_eq!(mesh.vertices[1].uv, [1.0, 0.0]);
    }

    #[test]
    fn polygons_are_fanned() {
        let src = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nv -1 1 0\nf 1 2 3 4 5\n";
        let mesh = parse_obj(src).unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3, 0, 3, 4]);
    }

    #[test]
    fn bad_records_report_their_line() {
        let err = parse_obj("v 0 0 0\nv 1 0\n").unwrap_err();
        assert!(matches!(err, AssetError::Obj { line: 2, .. }));

        let err = parse_obj("v 0 0 0\nf 1 2 3\n").unwrap_err();
        assert!(matches!(err, AssetError::Obj { line: 2, .. }));

        let err = parse_obj("v 0 0 0\nf 0 1 1\n").unwrap_err();
        assert!(err.to_string().contains("index 0"));

        let err = parse_obj("v 0 0 0\nf 1 1\n").unwrap_err();
        assert!(err.to_string().contains("3 corners"));
    }
}
