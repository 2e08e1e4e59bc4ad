/// Scene sorter: buckets the triangles of a reduced mesh into the four-level
/// sector hierarchy.
///
/// Passes run strictly in order, each consuming the previous one's output:
///
/// 1. **First sort**: centroids, fixed-point cells, world octant size and the
///    world octants below the octree root.
/// 2. **Second sort**: subdivides octree nodes until they reach the small
///    sector size, then splits every small sector into micro sectors.
/// 3. **Third sort**: sub-micro and super-nano sectors, then per-sector
///    occupancy and observed color aggregates at every level.
/// 4. **Fourth sort**: triangle order and hash-sorted lookup tables.
///
/// Every pass grows the buffers it is about to write first. A sector count
/// above its configured limit fails the sort with `CapacityExceeded` before
/// anything is written.

use glam::{IVec3, UVec3, Vec3};
use rayon::prelude::*;
use rdst::RadixSort;
use std::sync::atomic::Ordering;
use crate::buffer::{grow_buffer, BufferCategory, BufferLayer, CapacityManager, LayeredBuffer};
use crate::config::BufferCapacities;
use crate::error::Result;
use crate::reconstruction::ReducedMesh;
use crate::sector::{
    encode_color, quantize, SectorHash, SectorHierarchy, SectorLevel, SectorOctree, SectorTable,
    SMALL_SECTOR_SIZE,
};
use crate::{engine_bail, engine_debug, engine_trace};
use super::bucket::{bucket, CellLayer};

const SOURCE: &str = "galaxy3d::SceneSorter";

// ===== BUFFER LAYERS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriangleLayer {
    Centroid,
    /// Super-nano cell of the centroid
    Cell,
}

impl BufferLayer for TriangleLayer {
    const LABEL: &'static str = "Scene Sorter Triangle Buffer";
    const ALL: &'static [Self] = &[Self::Centroid, Self::Cell];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        match self {
            Self::Centroid => capacity * std::mem::size_of::<Vec3>(),
            Self::Cell => capacity * std::mem::size_of::<IVec3>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmallSectorLayer {
    /// Center of the focus node
    Center,
    /// Octree node owning the sector
    Node,
}

impl BufferLayer for SmallSectorLayer {
    const LABEL: &'static str = "Scene Sorter Small Sector Buffer";
    const ALL: &'static [Self] = &[Self::Center, Self::Node];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        match self {
            Self::Center => capacity * std::mem::size_of::<Vec3>(),
            Self::Node => capacity * std::mem::size_of::<u32>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateLayer {
    /// Fixed-point RGB sum, three words per sector
    ColorSum,
    Count,
}

impl BufferLayer for AggregateLayer {
    const LABEL: &'static str = "Scene Sorter Aggregate Buffer";
    const ALL: &'static [Self] = &[Self::ColorSum, Self::Count];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        match self {
            Self::ColorSum => capacity * std::mem::size_of::<UVec3>(),
            Self::Count => capacity * std::mem::size_of::<u32>(),
        }
    }
}

// ===== PASS STATE =====

/// Sectors of one level, as produced by a bucketing pass
#[derive(Debug, Clone)]
struct LevelSort {
    /// Sector id of every triangle
    triangle_sectors: Vec<u32>,
    parents: Vec<u32>,
    hashes: Vec<SectorHash>,
    counts: Vec<u32>,
    color_sums: Vec<UVec3>,
}

/// Intermediate state handed from one sort pass to the next
#[derive(Debug, Clone)]
pub struct SortProgress {
    triangle_count: usize,
    octree: SectorOctree,
    /// Octree node of every bucket on the current subdivision frontier
    frontier: Vec<u32>,
    /// Frontier bucket of every triangle
    frontier_buckets: Vec<u32>,
    /// Edge length of the frontier nodes
    node_size: f32,
    subdivisions: u32,
    /// Completed levels, coarsest first
    levels: Vec<LevelSort>,
    triangle_colors: Vec<UVec3>,
    aggregated: bool,
}

impl SortProgress {
    pub fn triangle_count(&self) -> usize {
        self.triangle_count
    }

    pub fn world_octant_size(&self) -> f32 {
        self.octree.world_octant_size()
    }

    /// Octree subdivision rounds run by the second sort
    pub fn subdivisions(&self) -> u32 {
        self.subdivisions
    }

    /// Sectors found so far at `level`, `None` until its pass has run
    pub fn sector_count(&self, level: SectorLevel) -> Option<usize> {
        self.levels.get(level.index()).map(|sort| sort.hashes.len())
    }
}

// ===== SCENE SORTER =====

pub struct SceneSorter {
    limits: BufferCapacities,
    triangle_buffer: LayeredBuffer<TriangleLayer>,
    cell_buffer: LayeredBuffer<CellLayer>,
    small_sector_buffer: LayeredBuffer<SmallSectorLayer>,
    /// One aggregate buffer per level, coarsest first
    aggregate_buffers: [LayeredBuffer<AggregateLayer>; 4],
    growth_events: u32,
}

impl SceneSorter {
    pub fn new(initial: &BufferCapacities, limits: &BufferCapacities) -> Self {
        Self {
            limits: *limits,
            triangle_buffer: LayeredBuffer::new(initial.triangle),
            cell_buffer: LayeredBuffer::new(initial.micro_sector),
            small_sector_buffer: LayeredBuffer::new(initial.small_sector),
            aggregate_buffers: [
                LayeredBuffer::new(initial.small_sector),
                LayeredBuffer::new(initial.micro_sector),
                LayeredBuffer::new(initial.sub_micro_sector),
                LayeredBuffer::new(initial.super_nano_sector),
            ],
            growth_events: 0,
        }
    }

    /// Buffer reallocations since the last call
    pub fn take_growth_events(&mut self) -> u32 {
        std::mem::take(&mut self.growth_events)
    }

    /// Run all four passes over `mesh`.
    ///
    /// # Errors
    ///
    /// Returns `Error::CapacityExceeded` if a level holds more sectors than
    /// its configured limit. Nothing of the frame's hierarchy survives.
    pub fn execute_scene_sort(&mut self, mesh: &ReducedMesh) -> Result<SectorHierarchy> {
        let mut progress = self.first_sort(mesh)?;
        self.second_sort(&mut progress)?;
        self.third_sort(&mut progress, mesh)?;
        let hierarchy = self.fourth_sort(progress)?;

        engine_debug!(SOURCE, "Sorted {} triangles: {} small, {} micro, {} sub-micro, {} super-nano sectors",
            hierarchy.triangle_count(),
            hierarchy.sector_count(SectorLevel::Small),
            hierarchy.sector_count(SectorLevel::Micro),
            hierarchy.sector_count(SectorLevel::SubMicro),
            hierarchy.sector_count(SectorLevel::SuperNano));

        Ok(hierarchy)
    }

    /// Quantize centroids and bucket triangles into world octants.
    pub fn first_sort(&mut self, mesh: &ReducedMesh) -> Result<SortProgress> {
        let triangle_count = mesh.triangle_count();
        self.ensure_buffer_capacity(BufferCategory::Triangle, triangle_count)?;
        self.grow_cells(8)?;

        {
            let (centroids, cells) = self
                .triangle_buffer
                .two_layers_mut::<Vec3, IVec3>(TriangleLayer::Centroid, TriangleLayer::Cell)?;
            centroids[..triangle_count]
                .par_iter_mut()
                .zip(cells[..triangle_count].par_iter_mut())
                .enumerate()
                .for_each(|(triangle, (centroid, cell))| {
                    *centroid = mesh.centroid(triangle);
                    *cell = quantize(*centroid);
                });
        }

        let centroids = &self.triangle_buffer.layer::<Vec3>(TriangleLayer::Centroid)?[..triangle_count];
        let largest = centroids
            .par_iter()
            .map(|centroid| centroid.abs().max_element())
            .reduce(|| 0.0, f32::max);

        let mut world_octant_size = SMALL_SECTOR_SIZE;
        while world_octant_size <= largest {
            world_octant_size *= 2.0;
        }

        let octants: Vec<u32> = centroids
            .par_iter()
            .map(|&centroid| SectorOctree::world_octant_id(centroid) as u32)
            .collect();
        let roots = vec![0u32; triangle_count];
        let buckets = bucket(&mut self.cell_buffer, &roots, &octants, 1, 8)?;

        let mut octree = SectorOctree::new(world_octant_size);
        let frontier = (0..buckets.len())
            .map(|b| octree.add_child(0, buckets.cell[b] as usize, buckets.count[b]))
            .collect::<Vec<_>>();

        engine_trace!(SOURCE, "First sort: {} triangles in {} world octants of size {}",
            triangle_count, frontier.len(), world_octant_size);

        Ok(SortProgress {
            triangle_count,
            octree,
            frontier,
            frontier_buckets: buckets.item_bucket,
            node_size: world_octant_size,
            subdivisions: 0,
            levels: Vec::with_capacity(4),
            triangle_colors: Vec::new(),
            aggregated: false,
        })
    }

    /// Subdivide down to small sectors, then split them into micro sectors.
    pub fn second_sort(&mut self, progress: &mut SortProgress) -> Result<()> {
        if !progress.levels.is_empty() {
            engine_bail!(SOURCE, "Second sort already ran for this frame");
        }
        let triangle_count = progress.triangle_count;

        // Every round halves the node size, so the loop ends at the small sector size
        while progress.node_size > SMALL_SECTOR_SIZE {
            self.grow_cells(progress.frontier.len() * 8)?;

            let centroids = &self.triangle_buffer.layer::<Vec3>(TriangleLayer::Centroid)?[..triangle_count];
            let octree = &progress.octree;
            let frontier = &progress.frontier;
            let slots: Vec<u32> = centroids
                .par_iter()
                .zip(progress.frontier_buckets.par_iter())
                .map(|(&centroid, &b)| {
                    let center = octree.nodes()[frontier[b as usize] as usize].center;
                    SectorOctree::point_octant(center, centroid) as u32
                })
                .collect();

            let buckets = bucket(&mut self.cell_buffer, &progress.frontier_buckets, &slots, frontier.len(), 8)?;
            let next = (0..buckets.len())
                .map(|b| {
                    let parent = progress.frontier[buckets.parent[b] as usize];
                    progress.octree.add_child(parent, buckets.cell[b] as usize, buckets.count[b])
                })
                .collect();

            progress.frontier = next;
            progress.frontier_buckets = buckets.item_bucket;
            progress.node_size *= 0.5;
            progress.subdivisions += 1;
        }

        let small_count = progress.frontier.len();
        self.ensure_buffer_capacity(BufferCategory::SmallSector, small_count)?;

        let mut hashes = Vec::with_capacity(small_count);
        let mut counts = Vec::with_capacity(small_count);
        {
            let (centers, nodes) = self
                .small_sector_buffer
                .two_layers_mut::<Vec3, u32>(SmallSectorLayer::Center, SmallSectorLayer::Node)?;
            for (sector, &node_index) in progress.frontier.iter().enumerate() {
                let node = progress.octree.nodes()[node_index as usize];
                centers[sector] = node.center;
                nodes[sector] = node_index;
                let coord = (node.min_corner() / SMALL_SECTOR_SIZE).round().as_ivec3();
                hashes.push(SectorHash::new(SectorLevel::Small, coord));
                counts.push(node.count);
            }
        }
        for (sector, &node) in progress.frontier.iter().enumerate() {
            progress.octree.set_sector(node, sector as u32);
        }

        progress.levels.push(LevelSort {
            triangle_sectors: std::mem::take(&mut progress.frontier_buckets),
            parents: std::mem::take(&mut progress.frontier),
            hashes,
            counts,
            color_sums: Vec::new(),
        });

        self.subdivide(progress, SectorLevel::Micro)?;

        engine_trace!(SOURCE, "Second sort: {} subdivision rounds, {} small sectors, {} micro sectors",
            progress.subdivisions, small_count, progress.levels[SectorLevel::Micro.index()].hashes.len());
        Ok(())
    }

    /// Split sub-micro and super-nano sectors and aggregate every level.
    pub fn third_sort(&mut self, progress: &mut SortProgress, mesh: &ReducedMesh) -> Result<()> {
        if progress.levels.len() != 2 {
            engine_bail!(SOURCE, "Third sort needs the second sort's micro sectors");
        }
        if mesh.triangle_count() != progress.triangle_count {
            engine_bail!(InvalidInput @ SOURCE, "Third sort got {} triangles, first sort saw {}",
                mesh.triangle_count(), progress.triangle_count);
        }

        self.subdivide(progress, SectorLevel::SubMicro)?;
        self.subdivide(progress, SectorLevel::SuperNano)?;

        let colors: Vec<UVec3> = (0..progress.triangle_count)
            .into_par_iter()
            .map(|triangle| encode_color(mesh.observation(triangle)))
            .collect();

        for level in SectorLevel::ALL {
            let sort = &mut progress.levels[level.index()];
            let sector_count = sort.hashes.len();
            let buffer = &mut self.aggregate_buffers[level.index()];

            buffer.fill(AggregateLayer::ColorSum, 0..sector_count * 3, 0u32)?;
            buffer.fill(AggregateLayer::Count, 0..sector_count, 0u32)?;
            {
                let atomics = buffer.atomic_layers();
                let sums = atomics.layer(AggregateLayer::ColorSum);
                let counts = atomics.layer(AggregateLayer::Count);
                sort.triangle_sectors
                    .par_iter()
                    .zip(colors.par_iter())
                    .for_each(|(&sector, color)| {
                        let base = sector as usize * 3;
                        sums[base].fetch_add(color.x, Ordering::Relaxed);
                        sums[base + 1].fetch_add(color.y, Ordering::Relaxed);
                        sums[base + 2].fetch_add(color.z, Ordering::Relaxed);
                        counts[sector as usize].fetch_add(1, Ordering::Relaxed);
                    });
            }

            sort.color_sums = buffer.layer::<UVec3>(AggregateLayer::ColorSum)?[..sector_count].to_vec();
            sort.counts = buffer.layer::<u32>(AggregateLayer::Count)?[..sector_count].to_vec();
        }

        progress.triangle_colors = colors;
        progress.aggregated = true;

        engine_trace!(SOURCE, "Third sort: {} sub-micro sectors, {} super-nano sectors",
            progress.levels[SectorLevel::SubMicro.index()].hashes.len(),
            progress.levels[SectorLevel::SuperNano.index()].hashes.len());
        Ok(())
    }

    /// Order triangles by sector and build the lookup tables.
    pub fn fourth_sort(&mut self, progress: SortProgress) -> Result<SectorHierarchy> {
        if !progress.aggregated {
            engine_bail!(SOURCE, "Fourth sort needs the third sort's aggregates");
        }

        let SortProgress { mut octree, levels, triangle_colors, .. } = progress;
        let finest = &levels[SectorLevel::SuperNano.index()].triangle_sectors;

        let mut keys: Vec<u64> = finest
            .par_iter()
            .enumerate()
            .map(|(triangle, &sector)| ((sector as u64) << 32) | triangle as u64)
            .collect();
        keys.radix_sort_unstable();
        let triangle_order: Vec<u32> = keys.iter().map(|&key| key as u32).collect();

        let mut triangle_sectors: [Vec<u32>; 4] = Default::default();
        let mut tables = Vec::with_capacity(4);
        for (level, sort) in SectorLevel::ALL.into_iter().zip(levels) {
            triangle_sectors[level.index()] = sort.triangle_sectors;
            tables.push(SectorTable::new(level, sort.hashes, sort.parents, sort.counts, sort.color_sums));
        }
        let tables: [SectorTable; 4] = match tables.try_into() {
            Ok(tables) => tables,
            Err(_) => engine_bail!(SOURCE, "Fourth sort expected four sector levels"),
        };

        octree.refresh(&tables[SectorLevel::Small.index()], None);

        engine_trace!(SOURCE, "Fourth sort: {} octree nodes, {} leaves",
            octree.len(), octree.array().len());

        Ok(SectorHierarchy::new(octree, tables, triangle_sectors, triangle_order, triangle_colors))
    }

    /// Bucket the sectors of `level` inside the already sorted coarser level
    fn subdivide(&mut self, progress: &mut SortProgress, level: SectorLevel) -> Result<()> {
        let parent_level = match level.coarser() {
            Some(parent) if progress.levels.len() == parent.index() + 1 => parent,
            _ => engine_bail!(SOURCE, "Cannot split {} sectors out of the current sort state", level.name()),
        };

        let triangle_count = progress.triangle_count;
        let parent_count = progress.levels[parent_level.index()].hashes.len();
        let cells_per_parent = level.cells_per_parent();
        self.grow_cells(parent_count * cells_per_parent)?;

        let cells = &self.triangle_buffer.layer::<IVec3>(TriangleLayer::Cell)?[..triangle_count];
        let local_cells: Vec<u32> = cells
            .par_iter()
            .map(|&cell| level.local_cell(level.coord_of(cell)))
            .collect();

        let parent = &progress.levels[parent_level.index()];
        let buckets = bucket(
            &mut self.cell_buffer,
            &parent.triangle_sectors,
            &local_cells,
            parent_count,
            cells_per_parent,
        )?;

        let n = level.subdivisions();
        let hashes: Vec<SectorHash> = (0..buckets.len())
            .map(|b| {
                let cell = buckets.cell[b] as i32;
                let local = IVec3::new(cell % n, (cell / n) % n, cell / (n * n));
                let parent_coord = parent.hashes[buckets.parent[b] as usize].coord();
                SectorHash::new(level, parent_coord * n + local)
            })
            .collect();

        self.ensure_buffer_capacity(level.category(), hashes.len())?;

        progress.levels.push(LevelSort {
            triangle_sectors: buckets.item_bucket,
            parents: buckets.parent,
            hashes,
            counts: buckets.count,
            color_sums: Vec::new(),
        });
        Ok(())
    }

    /// Candidate cells of one bucketing pass, counted against the micro limit
    fn grow_cells(&mut self, capacity: usize) -> Result<()> {
        let limit = self.limits.get(BufferCategory::MicroSector);
        if grow_buffer(&mut self.cell_buffer, BufferCategory::MicroSector, capacity, limit, SOURCE)? {
            self.growth_events += 1;
        }
        Ok(())
    }

    fn grow_aggregates(&mut self, level: SectorLevel, capacity: usize) -> Result<()> {
        let category = level.category();
        let limit = self.limits.get(category);
        if grow_buffer(&mut self.aggregate_buffers[level.index()], category, capacity, limit, SOURCE)? {
            self.growth_events += 1;
        }
        Ok(())
    }
}

impl CapacityManager for SceneSorter {
    fn ensure_buffer_capacity(&mut self, category: BufferCategory, capacity: usize) -> Result<()> {
        let limit = self.limits.get(category);
        match category {
            BufferCategory::Triangle => {
                if grow_buffer(&mut self.triangle_buffer, category, capacity, limit, SOURCE)? {
                    self.growth_events += 1;
                }
            }
            BufferCategory::SmallSector => {
                if grow_buffer(&mut self.small_sector_buffer, category, capacity, limit, SOURCE)? {
                    self.growth_events += 1;
                }
                self.grow_aggregates(SectorLevel::Small, capacity)?;
            }
            BufferCategory::MicroSector => {
                self.grow_cells(capacity)?;
                self.grow_aggregates(SectorLevel::Micro, capacity)?;
            }
            BufferCategory::SubMicroSector => self.grow_aggregates(SectorLevel::SubMicro, capacity)?,
            BufferCategory::SuperNanoSector => self.grow_aggregates(SectorLevel::SuperNano, capacity)?,
            BufferCategory::Vertex | BufferCategory::VertexMatch => {
                engine_bail!(SOURCE, "Scene sorter owns no {} buffer", category);
            }
        }
        Ok(())
    }

    fn buffer_capacity(&self, category: BufferCategory) -> Option<usize> {
        match category {
            BufferCategory::Triangle => Some(self.triangle_buffer.capacity()),
            BufferCategory::SmallSector => Some(self.small_sector_buffer.capacity()),
            BufferCategory::MicroSector => Some(self.aggregate_buffers[1].capacity()),
            BufferCategory::SubMicroSector => Some(self.aggregate_buffers[2].capacity()),
            BufferCategory::SuperNanoSector => Some(self.aggregate_buffers[3].capacity()),
            BufferCategory::Vertex | BufferCategory::VertexMatch => None,
        }
    }
}

#[cfg(test)]
#[path = "scene_sorter_tests.rs"]
mod tests;
