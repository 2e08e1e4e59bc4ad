/// Reduced mesh handed over by the mesh-reduction stage every frame.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use crate::error::Result;
use crate::engine_bail;
use crate::sector::MAX_COORDINATE;

/// Compact per-vertex color; alpha carries observation confidence
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque gray
    pub const fn gray(value: u8) -> Self {
        Self::new(value, value, value, 255)
    }

    /// RGB channels on the 0..255 scale
    pub fn rgb(self) -> Vec3 {
        Vec3::new(self.r as f32, self.g as f32, self.b as f32)
    }
}

/// Vertex positions, triangle indices and per-vertex colors of one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
    pub colors: Vec<Rgba8>,
}

impl ReducedMesh {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>, colors: Vec<Rgba8>) -> Self {
        Self { vertices, indices, colors }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Check the mesh before it enters the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a color count that differs from the
    /// vertex count, an index out of range, or a position that is not finite
    /// or lies outside the representable world.
    pub fn validate(&self) -> Result<()> {
        if self.colors.len() != self.vertices.len() {
            engine_bail!(InvalidInput @ "galaxy3d::ReducedMesh",
                "{} colors for {} vertices", self.colors.len(), self.vertices.len());
        }

        let vertex_count = self.vertices.len() as u64;
        if let Some((triangle, corners)) = self
            .indices
            .iter()
            .enumerate()
            .find(|(_, corners)| corners.iter().any(|&i| i as u64 >= vertex_count))
        {
            engine_bail!(InvalidInput @ "galaxy3d::ReducedMesh",
                "Triangle {} references {:?}, mesh has {} vertices", triangle, corners, vertex_count);
        }

        if let Some((vertex, position)) = self
            .vertices
            .iter()
            .enumerate()
            .find(|(_, p)| !p.is_finite() || p.abs().max_element() >= MAX_COORDINATE)
        {
            engine_bail!(InvalidInput @ "galaxy3d::ReducedMesh",
                "Vertex {} has unusable position {:?}", vertex, position);
        }

        Ok(())
    }

    pub fn corners(&self, triangle: usize) -> [Vec3; 3] {
        let [a, b, c] = self.indices[triangle];
        [self.vertices[a as usize], self.vertices[b as usize], self.vertices[c as usize]]
    }

    pub fn centroid(&self, triangle: usize) -> Vec3 {
        let [a, b, c] = self.corners(triangle);
        (a + b + c) / 3.0
    }

    /// Mean RGB (0..255) of the triangle's vertex colors
    pub fn observation(&self, triangle: usize) -> Vec3 {
        let [a, b, c] = self.indices[triangle];
        (self.colors[a as usize].rgb() + self.colors[b as usize].rgb() + self.colors[c as usize].rgb()) / 3.0
    }

    /// Summed vertex alpha, used to rank redundant copies of a surface
    pub fn alpha_weight(&self, triangle: usize) -> u32 {
        self.indices[triangle]
            .iter()
            .map(|&i| self.colors[i as usize].a as u32)
            .sum()
    }
}
