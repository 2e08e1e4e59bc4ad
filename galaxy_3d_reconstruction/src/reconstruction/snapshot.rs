/// Retained mesh state of one frame and the double buffer holding two of them.

use glam::{IVec3, Vec3};
use rayon::prelude::*;
use crate::matching::TriangleAppearance;
use crate::sector::{quantize, HashEntry, SectorHash, SectorHierarchy, SectorLevel};
use super::mesh::ReducedMesh;

/// Everything the next frame's matcher reads from this frame.
///
/// Besides the mesh and its accumulated appearance, a snapshot carries a
/// vertex grid (vertices sorted by super-nano hash) for tolerance searches
/// and a vertex to triangle map in CSR layout.
#[derive(Debug, Clone, Default)]
pub struct MeshSnapshot {
    mesh: ReducedMesh,
    appearance: Vec<TriangleAppearance>,
    /// `None` when the frame's sort failed and it was replaced wholesale
    hierarchy: Option<SectorHierarchy>,
    vertex_grid: Vec<HashEntry>,
    /// `vertex_offsets[v]..vertex_offsets[v + 1]` indexes `vertex_triangles`
    vertex_offsets: Vec<u32>,
    vertex_triangles: Vec<u32>,
    frame_index: u64,
}

impl MeshSnapshot {
    pub fn new(
        mesh: ReducedMesh,
        appearance: Vec<TriangleAppearance>,
        hierarchy: Option<SectorHierarchy>,
        frame_index: u64,
    ) -> Self {
        let mut vertex_grid: Vec<HashEntry> = mesh
            .vertices
            .par_iter()
            .enumerate()
            .map(|(vertex, &position)| {
                HashEntry::new(SectorHash::of_point(SectorLevel::SuperNano, position).value(), vertex as u32)
            })
            .collect();
        HashEntry::sort(&mut vertex_grid);

        let mut vertex_offsets = vec![0u32; mesh.vertex_count() + 1];
        for triangle in &mesh.indices {
            for &vertex in triangle {
                vertex_offsets[vertex as usize + 1] += 1;
            }
        }
        for vertex in 0..mesh.vertex_count() {
            vertex_offsets[vertex + 1] += vertex_offsets[vertex];
        }

        let mut cursor = vertex_offsets.clone();
        let mut vertex_triangles = vec![0u32; mesh.triangle_count() * 3];
        for (triangle, corners) in mesh.indices.iter().enumerate() {
            for &vertex in corners {
                let slot = &mut cursor[vertex as usize];
                vertex_triangles[*slot as usize] = triangle as u32;
                *slot += 1;
            }
        }

        Self {
            mesh,
            appearance,
            hierarchy,
            vertex_grid,
            vertex_offsets,
            vertex_triangles,
            frame_index,
        }
    }

    pub fn mesh(&self) -> &ReducedMesh {
        &self.mesh
    }

    pub fn appearance(&self) -> &[TriangleAppearance] {
        &self.appearance
    }

    pub fn hierarchy(&self) -> Option<&SectorHierarchy> {
        self.hierarchy.as_ref()
    }

    pub fn triangle_count(&self) -> usize {
        self.mesh.triangle_count()
    }

    pub fn vertex_count(&self) -> usize {
        self.mesh.vertex_count()
    }

    /// Frame that produced this snapshot (0 for the empty session baseline)
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Triangles referencing `vertex`, ascending
    pub fn triangles_of_vertex(&self, vertex: u32) -> &[u32] {
        let v = vertex as usize;
        match (self.vertex_offsets.get(v), self.vertex_offsets.get(v + 1)) {
            (Some(&start), Some(&end)) => &self.vertex_triangles[start as usize..end as usize],
            _ => &[],
        }
    }

    /// Append `(distance, vertex)` for every vertex within `tolerance` of `point`.
    ///
    /// Only the super-nano cells overlapping the tolerance box are visited.
    pub fn vertices_near(&self, point: Vec3, tolerance: f32, out: &mut Vec<(f32, u32)>) {
        let low = quantize(point - Vec3::splat(tolerance));
        let high = quantize(point + Vec3::splat(tolerance));
        for z in low.z..=high.z {
            for y in low.y..=high.y {
                for x in low.x..=high.x {
                    let hash = SectorHash::new(SectorLevel::SuperNano, IVec3::new(x, y, z));
                    for entry in HashEntry::equal_range(&self.vertex_grid, hash.value()) {
                        let distance = self.mesh.vertices[entry.index as usize].distance(point);
                        if distance <= tolerance {
                            out.push((distance, entry.index));
                        }
                    }
                }
            }
        }
    }
}

/// Two values of which one is current ("front") and the other is being
/// rebuilt ("back"). Promotion swaps the roles; nothing is copied.
#[derive(Debug, Clone, Default)]
pub struct DoubleBuffered<T> {
    buffers: [T; 2],
    front: usize,
}

impl<T> DoubleBuffered<T> {
    pub fn new(front: T, back: T) -> Self {
        Self { buffers: [front, back], front: 0 }
    }

    pub fn front(&self) -> &T {
        &self.buffers[self.front]
    }

    pub fn back(&self) -> &T {
        &self.buffers[1 - self.front]
    }

    pub fn back_mut(&mut self) -> &mut T {
        &mut self.buffers[1 - self.front]
    }

    /// Read the front while writing the back
    pub fn split(&mut self) -> (&T, &mut T) {
        let (first, second) = self.buffers.split_at_mut(1);
        if self.front == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        }
    }

    /// Make the back buffer current
    pub fn promote(&mut self) {
        self.front = 1 - self.front;
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
