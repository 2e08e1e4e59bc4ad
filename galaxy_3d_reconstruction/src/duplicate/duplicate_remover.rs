/// Duplicate remover: drops triangles that observe the same surface twice.
///
/// Vertices are welded by quantizing their positions to `weld_resolution`
/// cells; the lowest vertex index in a cell represents it. Welding only
/// decides identity, positions and indices of surviving triangles are left
/// untouched so the sector assignment of the sort stays valid.
///
/// Two triangles are duplicates when they sit in the same super-nano sector
/// and reference the same welded vertices with the same winding. The copy
/// with the largest summed vertex alpha survives, ties going to the lowest
/// index. Triangles that reference one welded vertex twice are culled.

use glam::{IVec3, Vec3};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use crate::buffer::{grow_buffer, BufferCategory, BufferLayer, CapacityManager, LayeredBuffer};
use crate::config::{BufferCapacities, ReconstructionConfig};
use crate::error::Result;
use crate::reconstruction::ReducedMesh;
use crate::sector::{SectorHierarchy, SectorLevel};
use crate::{engine_bail, engine_debug};

const SOURCE: &str = "galaxy3d::DuplicateRemover";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexLayer {
    /// Weld cell of the position
    WeldCell,
    /// Representative vertex of the weld cell
    WeldTarget,
}

impl BufferLayer for VertexLayer {
    const LABEL: &'static str = "Duplicate Remover Vertex Buffer";
    const ALL: &'static [Self] = &[Self::WeldCell, Self::WeldTarget];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        match self {
            Self::WeldCell => capacity * std::mem::size_of::<IVec3>(),
            Self::WeldTarget => capacity * std::mem::size_of::<u32>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriangleLayer {
    /// Welded corners, rotated so the smallest index comes first
    Corners,
}

impl BufferLayer for TriangleLayer {
    const LABEL: &'static str = "Duplicate Remover Triangle Buffer";
    const ALL: &'static [Self] = &[Self::Corners];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        capacity * std::mem::size_of::<[u32; 3]>()
    }
}

/// Outcome of one duplicate removal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateReport {
    /// Vertices represented by a lower-index vertex of the same weld cell
    pub welded_vertices: usize,
    pub degenerate_triangles: usize,
    pub duplicate_triangles: usize,
    /// Old triangle index to new one, `u32::MAX` for removed triangles
    pub triangle_remap: Vec<u32>,
}

impl DuplicateReport {
    pub fn removed(&self) -> usize {
        self.degenerate_triangles + self.duplicate_triangles
    }
}

/// Rotate a triangle so its smallest index leads, keeping the winding
fn canonical_rotation(corners: [u32; 3]) -> [u32; 3] {
    let [a, b, c] = corners;
    if a <= b && a <= c {
        [a, b, c]
    } else if b <= a && b <= c {
        [b, c, a]
    } else {
        [c, a, b]
    }
}

pub struct DuplicateRemover {
    weld_resolution: f32,
    limits: BufferCapacities,
    vertex_buffer: LayeredBuffer<VertexLayer>,
    triangle_buffer: LayeredBuffer<TriangleLayer>,
    growth_events: u32,
}

impl DuplicateRemover {
    pub fn new(config: &ReconstructionConfig) -> Self {
        Self {
            weld_resolution: config.weld_resolution,
            limits: config.capacity_limits,
            vertex_buffer: LayeredBuffer::new(config.initial_capacities.vertex),
            triangle_buffer: LayeredBuffer::new(config.initial_capacities.triangle),
            growth_events: 0,
        }
    }

    /// Buffer reallocations since the last call
    pub fn take_growth_events(&mut self) -> u32 {
        std::mem::take(&mut self.growth_events)
    }

    /// Remove degenerate and duplicate triangles from `mesh` and `hierarchy`.
    ///
    /// On return the mesh's index buffer and the hierarchy hold the same,
    /// densely renumbered triangles, with occupancy and color aggregates
    /// recomputed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the hierarchy was not built from
    /// `mesh`, and `Error::CapacityExceeded` if the mesh outgrows a buffer.
    pub fn remove_duplicates(
        &mut self,
        mesh: &mut ReducedMesh,
        hierarchy: &mut SectorHierarchy,
    ) -> Result<DuplicateReport> {
        let vertex_count = mesh.vertex_count();
        let triangle_count = mesh.triangle_count();
        if hierarchy.triangle_count() != triangle_count {
            engine_bail!(InvalidInput @ SOURCE, "Hierarchy holds {} triangles, mesh has {}",
                hierarchy.triangle_count(), triangle_count);
        }

        self.ensure_buffer_capacity(BufferCategory::Vertex, vertex_count)?;
        self.ensure_buffer_capacity(BufferCategory::Triangle, triangle_count)?;

        let welded_vertices = self.weld(&mesh.vertices)?;

        let targets = &self.vertex_buffer.layer::<u32>(VertexLayer::WeldTarget)?[..vertex_count];
        let corners = &mut self.triangle_buffer.layer_mut::<[u32; 3]>(TriangleLayer::Corners)?[..triangle_count];
        corners
            .par_iter_mut()
            .zip(mesh.indices.par_iter())
            .for_each(|(welded, triangle)| {
                *welded = canonical_rotation((*triangle).map(|i| targets[i as usize]));
            });

        let mut keep = vec![false; triangle_count];
        let mut degenerate_triangles = 0;
        let mut duplicate_triangles = 0;
        let mut survivors: FxHashMap<(u32, [u32; 3]), u32> = FxHashMap::default();
        let sectors = hierarchy.triangle_sectors(SectorLevel::SuperNano);

        for (triangle, &[a, b, c]) in corners.iter().enumerate() {
            if a == b || b == c || a == c {
                degenerate_triangles += 1;
                continue;
            }

            let key = (sectors[triangle], [a, b, c]);
            match survivors.get_mut(&key) {
                None => {
                    survivors.insert(key, triangle as u32);
                    keep[triangle] = true;
                }
                Some(kept) => {
                    duplicate_triangles += 1;
                    if mesh.alpha_weight(triangle) > mesh.alpha_weight(*kept as usize) {
                        keep[*kept as usize] = false;
                        keep[triangle] = true;
                        *kept = triangle as u32;
                    }
                }
            }
        }

        let triangle_remap = if degenerate_triangles + duplicate_triangles > 0 {
            let remap = hierarchy.retain_triangles(&keep)?;
            mesh.indices = mesh
                .indices
                .iter()
                .zip(&keep)
                .filter(|&(_, &k)| k)
                .map(|(&triangle, _)| triangle)
                .collect();
            remap
        } else {
            (0..triangle_count as u32).collect()
        };

        engine_debug!(SOURCE, "Welded {} vertices, removed {} degenerate and {} duplicate triangles, {} remain",
            welded_vertices, degenerate_triangles, duplicate_triangles, mesh.triangle_count());

        Ok(DuplicateReport {
            welded_vertices,
            degenerate_triangles,
            duplicate_triangles,
            triangle_remap,
        })
    }

    /// Fill the weld target layer and return the number of welded vertices
    fn weld(&mut self, vertices: &[Vec3]) -> Result<usize> {
        let vertex_count = vertices.len();
        let scale = 1.0 / self.weld_resolution;
        let (cells, targets) = self
            .vertex_buffer
            .two_layers_mut::<IVec3, u32>(VertexLayer::WeldCell, VertexLayer::WeldTarget)?;
        let cells = &mut cells[..vertex_count];
        let targets = &mut targets[..vertex_count];

        cells
            .par_iter_mut()
            .zip(vertices.par_iter())
            .for_each(|(cell, &position)| *cell = (position * scale).floor().as_ivec3());

        // Sequential so the lowest index claims each cell
        let mut owners: FxHashMap<IVec3, u32> = FxHashMap::default();
        owners.reserve(vertex_count);
        let mut welded = 0;
        for (vertex, (&cell, target)) in cells.iter().zip(targets.iter_mut()).enumerate() {
            let owner = *owners.entry(cell).or_insert(vertex as u32);
            if owner != vertex as u32 {
                welded += 1;
            }
            *target = owner;
        }
        Ok(welded)
    }
}

impl CapacityManager for DuplicateRemover {
    fn ensure_buffer_capacity(&mut self, category: BufferCategory, capacity: usize) -> Result<()> {
        let limit = self.limits.get(category);
        let grown = match category {
            BufferCategory::Vertex => grow_buffer(&mut self.vertex_buffer, category, capacity, limit, SOURCE)?,
            BufferCategory::Triangle => grow_buffer(&mut self.triangle_buffer, category, capacity, limit, SOURCE)?,
            _ => engine_bail!(SOURCE, "Duplicate remover owns no {} buffer", category),
        };
        if grown {
            self.growth_events += 1;
        }
        Ok(())
    }

    fn buffer_capacity(&self, category: BufferCategory) -> Option<usize> {
        match category {
            BufferCategory::Vertex => Some(self.vertex_buffer.capacity()),
            BufferCategory::Triangle => Some(self.triangle_buffer.capacity()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "duplicate_remover_tests.rs"]
mod tests;
