#![allow(dead_code)]
//! Synthetic reduced meshes shared by the integration tests
//!
//! Every triangle is a small right triangle (legs of 12 mm) whose centroid is
//! exactly the requested center, so the sector a triangle lands in is known
//! from the center alone.

use galaxy_3d_reconstruction::galaxy3d::{ReducedMesh, Rgba8};
use galaxy_3d_reconstruction::glam::Vec3;

/// Corner offsets; they sum to zero so the centroid is the center
const OFFSETS: [Vec3; 3] = [
    Vec3::new(-0.004, -0.004, 0.0),
    Vec3::new(0.008, -0.004, 0.0),
    Vec3::new(-0.004, 0.008, 0.0),
];

/// Append one gray triangle around `center` with its own three vertices
pub fn push_triangle(mesh: &mut ReducedMesh, center: Vec3, color: Rgba8) {
    let base = mesh.vertices.len() as u32;
    mesh.vertices.extend(OFFSETS.map(|offset| center + offset));
    mesh.colors.extend([color; 3]);
    mesh.indices.push([base, base + 1, base + 2]);
}

/// Mesh of gray triangles, one per `(center, gray)` pair
pub fn triangle_mesh(triangles: &[(Vec3, u8)]) -> ReducedMesh {
    let mut mesh = ReducedMesh::default();
    for &(center, gray) in triangles {
        push_triangle(&mut mesh, center, Rgba8::gray(gray));
    }
    mesh
}

/// Deterministic scatter of `count` triangles over a cube of `extent` meters
/// centered on the origin, with varied colors
pub fn scattered_mesh(count: usize, extent: f32) -> ReducedMesh {
    let mut mesh = ReducedMesh::default();
    let mut state = 0x2545_f491u32;
    let mut next = || {
        // xorshift32
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state as f32 / u32::MAX as f32
    };

    for _ in 0..count {
        let center = Vec3::new(next(), next(), next()) * extent - Vec3::splat(extent * 0.5);
        let color = Rgba8::new((next() * 255.0) as u8, (next() * 255.0) as u8, (next() * 255.0) as u8, 255);
        push_triangle(&mut mesh, center, color);
    }
    mesh
}

/// Copy of `mesh` with the vertices of `triangle` moved by `offset`
pub fn moved(mesh: &ReducedMesh, triangle: usize, offset: Vec3) -> ReducedMesh {
    let mut mesh = mesh.clone();
    let corners = mesh.indices[triangle];
    for vertex in corners {
        mesh.vertices[vertex as usize] += offset;
    }
    mesh
}
