// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Vertex layout consumed by the standard pipeline: binding 0, location 0 is
/// the position, location 1 the texture coordinate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, uv }
    }

    // Bit patterns so that -0.0 and NaN payloads stay distinct keys.
    fn key(&self) -> [u32; 5] {
        [
            self.position[0].to_bits(),
            self.position[1].to_bits(),
            self.position[2].to_bits(),
            self.uv[0].to_bits(),
            self.uv[1].to_bits(),
        ]
    }
}

/// Axis-aligned box spanned by a mesh's vertex positions.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    /// Smallest box containing every point. An empty iterator gives a
    /// degenerate box at the origin.
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        let mut it = points.into_iter();
        let Some(first) = it.next() else {
            return Self::default();
        };
        it.fold(
            Self {
                min: first,
                max: first,
            },
            |b, p| Self {
                min: b.min.min(p),
                max: b.max.max(p),
            },
        )
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Host-side geometry, ready for upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub bounds: Bounds,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let bounds = Bounds::from_points(vertices.iter().map(|v| Vec3::from(v.position)));
        Self {
            vertices,
            indices,
            bounds,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Box mesh covering `bounds`: four vertices per face so each face gets
    /// its own 0..1 texture coordinates, counter-clockwise seen from outside.
    pub fn bounds_box(bounds: Bounds) -> Self {
        // (x, y, z) corner selectors, true picks `max`.
        const FACES: [[(bool, bool, bool); 4]; 6] = [
            [(true, false, true), (true, false, false), (true, true, false), (true, true, true)],
            [(false, false, false), (false, false, true), (false, true, true), (false, true, false)],
            [(false, true, true), (true, true, true), (true, true, false), (false, true, false)],
            [(false, false, false), (true, false, false), (true, false, true), (false, false, true)],
            [(false, false, true), (true, false, true), (true, true, true), (false, true, true)],
            [(true, false, false), (false, false, false), (false, true, false), (true, true, false)],
        ];
        const UVS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

        let pick = |hi: bool, lo: f32, hi_v: f32| if hi { hi_v } else { lo };
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for face in FACES {
            let base = vertices.len() as u32;
            for (corner, uv) in face.iter().zip(UVS) {
                vertices.push(Vertex::new(
                    [
                        pick(corner.0, bounds.min.x, bounds.max.x),
                        pick(corner.1, bounds.min.y, bounds.max.y),
                        pick(corner.2, bounds.min.z, bounds.max.z),
                    ],
                    uv,
                ));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self {
            vertices,
            indices,
            bounds,
        }
    }
}

/// Collects triangle corners, sharing one vertex per unique
/// (position, uv) pair.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    lookup: HashMap<[u32; 5], u32>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one corner and returns the index it resolved to.
    pub fn push(&mut self, vertex: Vertex) -> u32 {
        let next = self.vertices.len() as u32;
        let index = *self.lookup.entry(vertex.key()).or_insert(next);
        if index == next {
            self.vertices.push(vertex);
        }
        self.indices.push(index);
        index
    }

    pub fn push_triangle(&mut self, corners: [Vertex; 3]) {
        for v in corners {
            self.push(v);
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn finish(self) -> MeshData {
        MeshData::new(self.vertices, self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_corners_are_deduplicated() {
        let a = Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0]);
        let b = Vertex::new([1.0, 0.0, 0.0], [1.0, 0.0]);
        let c = Vertex::new([1.0, 1.0, 0.0], [1.0, 1.0]);
        let d = Vertex::new([0.0, 1.0, 0.0], [0.0, 1.0]);

        let mut builder = MeshBuilder::new();
        builder.push_triangle([a, b, c]);
        builder.push_triangle([a, c, d]);
        let mesh = builder.finish();

        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn same_position_different_uv_stays_distinct() {
        let mut builder = MeshBuilder::new();
        builder.push(Vertex::new([0.0; 3], [0.0, 0.0]));
        builder.push(Vertex::new([0.0; 3], [0.5, 0.0]));
        assert_eq!(builder.vertex_count(), 2);
    }

    #[test]
    fn bounds_cover_all_positions() {
        let mesh = MeshData::new(
            vec![
                Vertex::new([-1.0, 2.0, 0.5], [0.0; 2]),
                Vertex::new([3.0, -4.0, 0.0], [0.0; 2]),
                Vertex::new([0.0, 0.0, 9.0], [0.0; 2]),
            ],
            vec![0, 1, 2],
        );
        assert_eq!(mesh.bounds.min, Vec3::new(-1.0, -4.0, 0.0));
        assert_eq!(mesh.bounds.max, Vec3::new(3.0, 2.0, 9.0));
        assert_eq!(mesh.bounds.center(), Vec3::new(1.0, -1.0, 4.5));
    }

    #[test]
    fn empty_mesh_has_origin_bounds() {
        let mesh = MeshData::new(Vec::new(), Vec::new());
        assert_eq!(mesh.bounds, Bounds::default());
        assert!(mesh.is_empty());
    }

    #[test]
    fn bounds_box_faces_point_outwards() {
        let bounds = Bounds {
            min: Vec3::new(-1.0, -2.0, -3.0),
            max: Vec3::new(1.0, 2.0, 3.0),
        };
        let mesh = MeshData::bounds_box(bounds);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        assert_eq!(mesh.bounds, bounds);

        let center = bounds.center();
        for tri in mesh.indices.chunks(3) {
            let p = |i: u32| Vec3::from(mesh.vertices[i as usize].position);
            let (a, b, c) = (p(tri[0]), p(tri[1]), p(tri[2]));
            let normal = (b - a).cross(c - a);
            let outward = (a + b + c) / 3.0 - center;
            assert!(normal.dot(outward) > 0.0, "inward facing triangle {tri:?}");
        }
    }
}
