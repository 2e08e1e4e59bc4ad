/// Mesh matcher: links new triangles to the previous frame's triangles.
///
/// A frame walks the stages of [`MatchStage`], each one only looking at the
/// triangles its predecessors left unmatched:
///
/// - **First match**: every new vertex collects the old vertices within
///   `match_tolerance` (count pass, prefix scan, write pass into the vertex
///   match buffer). A new triangle matches an old triangle when all three
///   corners line up under one of the three winding-preserving rotations.
///   Candidates are ranked by summed corner distance, then by higher old
///   confidence, then by lower old index.
/// - **Second match**: an unmatched triangle tries the old super-nano sector
///   with its hash, then the old micro sector with its hash. A sector is
///   accepted when its mean accumulated color is within `color_tolerance`
///   of the observation.
/// - **Third match**: only when the gate is open. Aggregates of the old
///   accumulated colors are rebuilt at super-nano, sub-micro and micro level
///   and tried in that order with `coarse_color_tolerance`.
///
/// Sector matches continue the old triangle of that sector whose centroid
/// is nearest to the new centroid.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::Ordering;
use glam::{IVec3, Vec3};
use rayon::prelude::*;
use crate::buffer::{grow_buffer, BufferCategory, BufferLayer, CapacityManager, LayeredBuffer, ScratchPool};
use crate::config::{BufferCapacities, ReconstructionConfig};
use crate::error::Result;
use crate::reconstruction::{MeshSnapshot, ReducedMesh};
use crate::sector::{quantize, SectorHash, SectorHierarchy, SectorLevel, SectorTable, NONE};
use crate::utils::as_atomic_u32;
use crate::{engine_bail, engine_debug, engine_trace};
use super::appearance::TriangleAppearance;
use super::record::MatchRecord;
use super::stage::{MatchProgress, MatchStage};

const SOURCE: &str = "galaxy3d::MeshMatcher";

/// Levels searched by the third match, finest first
const COARSE_LEVELS: [SectorLevel; 3] = [SectorLevel::SuperNano, SectorLevel::SubMicro, SectorLevel::Micro];

// ===== BUFFER LAYERS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmallSectorLayer {
    /// Old small sector with the same hash, `NONE` if the sector is new
    Mapping,
}

impl BufferLayer for SmallSectorLayer {
    const LABEL: &'static str = "Mesh Matcher Small Sector Buffer";
    const ALL: &'static [Self] = &[Self::Mapping];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        capacity * std::mem::size_of::<u32>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MicroSectorLayer {
    /// Triangles left unmatched by the first match
    Unmatched,
}

impl BufferLayer for MicroSectorLayer {
    const LABEL: &'static str = "Mesh Matcher Micro Sector Buffer";
    const ALL: &'static [Self] = &[Self::Unmatched];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        capacity * std::mem::size_of::<u32>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexLayer {
    CandidateOffset,
    CandidateCount,
}

impl BufferLayer for VertexLayer {
    const LABEL: &'static str = "Mesh Matcher Vertex Buffer";
    const ALL: &'static [Self] = &[Self::CandidateOffset, Self::CandidateCount];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        capacity * std::mem::size_of::<u32>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexMatchLayer {
    OldVertex,
    Distance,
}

impl BufferLayer for VertexMatchLayer {
    const LABEL: &'static str = "Mesh Matcher Vertex Match Buffer";
    const ALL: &'static [Self] = &[Self::OldVertex, Self::Distance];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        match self {
            Self::OldVertex => capacity * std::mem::size_of::<u32>(),
            Self::Distance => capacity * std::mem::size_of::<f32>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriangleLayer {
    /// Old super-nano sector sharing the triangle's hash
    Target,
}

impl BufferLayer for TriangleLayer {
    const LABEL: &'static str = "Mesh Matcher Triangle Buffer";
    const ALL: &'static [Self] = &[Self::Target];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        capacity * std::mem::size_of::<u32>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateLayer {
    /// Mean accumulated color of an old sector
    MeanColor,
    Count,
}

impl BufferLayer for AggregateLayer {
    const LABEL: &'static str = "Mesh Matcher Old Aggregate Buffer";
    const ALL: &'static [Self] = &[Self::MeanColor, Self::Count];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        match self {
            Self::MeanColor => capacity * std::mem::size_of::<Vec3>(),
            Self::Count => capacity * std::mem::size_of::<u32>(),
        }
    }
}

/// Aggregate buffer slot of a level (small sectors have none)
fn aggregate_slot(level: SectorLevel) -> usize {
    level.index().saturating_sub(1)
}

// ===== OUTCOME =====

/// Per-frame matcher statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchStats {
    pub first_matches: usize,
    pub second_matches: usize,
    pub third_matches: usize,
    pub unmatched: usize,
    /// Micro sectors with unmatched triangles after the first match
    pub micro_sectors_needing_second_match: usize,
    /// New micro sectors missing last frame inside small sectors that existed
    pub sector_growth: usize,
    pub third_match_gate: bool,
    /// Last stage run this frame
    pub final_stage: Option<MatchStage>,
    /// Old triangles the third match read, or the new count when it was skipped
    pub old_triangle_count: usize,
}

impl MatchStats {
    pub fn matched(&self) -> usize {
        self.first_matches + self.second_matches + self.third_matches
    }
}

/// Result of matching one frame
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// One record per new triangle
    pub records: Vec<MatchRecord>,
    /// Accumulated appearance per new triangle
    pub appearance: Vec<TriangleAppearance>,
    pub stats: MatchStats,
}

// ===== CANDIDATES =====

/// Old vertices near each new vertex, sorted by distance then index
struct CandidateTable<'a> {
    offsets: &'a [u32],
    counts: &'a [u32],
    old_vertices: &'a [u32],
    distances: &'a [f32],
}

impl<'a> CandidateTable<'a> {
    fn of(&self, vertex: u32) -> (&'a [u32], &'a [f32]) {
        let start = self.offsets[vertex as usize] as usize;
        let end = start + self.counts[vertex as usize] as usize;
        (&self.old_vertices[start..end], &self.distances[start..end])
    }

    fn distance_to(&self, vertex: u32, old_vertex: u32) -> Option<f32> {
        let (vertices, distances) = self.of(vertex);
        vertices
            .iter()
            .position(|&candidate| candidate == old_vertex)
            .map(|slot| distances[slot])
    }

    /// Best old triangle whose corners all line up with `corners`
    fn best_triangle(&self, corners: [u32; 3], old: &MeshSnapshot) -> Option<(u32, u8)> {
        let old_indices = &old.mesh().indices;
        let (first_vertices, first_distances) = self.of(corners[0]);
        let mut best: Option<(f32, u32, u32, u8)> = None;

        for (&old_vertex, &first_distance) in first_vertices.iter().zip(first_distances) {
            for &old_triangle in old.triangles_of_vertex(old_vertex) {
                let old_corners = old_indices[old_triangle as usize];
                for rotation in 0..3 {
                    if old_corners[rotation] != old_vertex {
                        continue;
                    }
                    let second = self.distance_to(corners[1], old_corners[(rotation + 1) % 3]);
                    let third = self.distance_to(corners[2], old_corners[(rotation + 2) % 3]);
                    let (Some(second), Some(third)) = (second, third) else {
                        continue;
                    };

                    let delta = first_distance + second + third;
                    let confidence = confidence_of(old, old_triangle);
                    let better = match best {
                        None => true,
                        Some((best_delta, best_confidence, best_triangle, _)) => {
                            delta
                                .total_cmp(&best_delta)
                                .then(best_confidence.cmp(&confidence))
                                .then(old_triangle.cmp(&best_triangle))
                                == CmpOrdering::Less
                        }
                    };
                    if better {
                        best = Some((delta, confidence, old_triangle, rotation as u8));
                    }
                }
            }
        }

        best.map(|(_, _, old_triangle, rotation)| (old_triangle, rotation))
    }
}

/// Whether any old small sector overlaps the bounds of `corners` grown by `tolerance`
fn near_old_small_sector(old_small: &SectorTable, corners: [Vec3; 3], tolerance: f32) -> bool {
    let [a, b, c] = corners;
    let low = SectorLevel::Small.coord_of(quantize(a.min(b).min(c) - Vec3::splat(tolerance)));
    let high = SectorLevel::Small.coord_of(quantize(a.max(b).max(c) + Vec3::splat(tolerance)));
    (low.z..=high.z).any(|z| {
        (low.y..=high.y).any(|y| {
            (low.x..=high.x).any(|x| old_small.contains(SectorHash::new(SectorLevel::Small, IVec3::new(x, y, z))))
        })
    })
}

fn confidence_of(old: &MeshSnapshot, old_triangle: u32) -> u32 {
    old.appearance().get(old_triangle as usize).map_or(0, |appearance| appearance.confidence)
}

/// Rotation of `old` that puts its corners closest to `new`
fn best_rotation(new: [Vec3; 3], old: [Vec3; 3]) -> u8 {
    let cost = |rotation: usize| -> f32 {
        (0..3).map(|k| new[k].distance(old[(k + rotation) % 3])).sum()
    };
    (0..3usize)
        .min_by(|&a, &b| cost(a).total_cmp(&cost(b)).then(a.cmp(&b)))
        .unwrap_or(0) as u8
}

/// Old triangle of a sector nearest to new triangle `triangle`.
///
/// Ties go to the higher confidence, then to the lower index.
fn nearest_in_sector(
    old: &MeshSnapshot,
    old_sectors: &SectorHierarchy,
    level: SectorLevel,
    sector: u32,
    new: &ReducedMesh,
    triangle: usize,
) -> Option<(u32, u8)> {
    let centroid = new.centroid(triangle);
    let (_, _, old_triangle) = old_sectors
        .triangles_in(level, sector)
        .iter()
        .map(|&old_triangle| {
            let distance = old.mesh().centroid(old_triangle as usize).distance(centroid);
            (distance, confidence_of(old, old_triangle), old_triangle)
        })
        .min_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)))?;

    let rotation = best_rotation(new.corners(triangle), old.mesh().corners(old_triangle as usize));
    Some((old_triangle, rotation))
}

/// Mean accumulated color of every old sector at `level`.
///
/// With `marks`, sectors whose mark is zero are skipped and read as empty.
fn aggregate_colors(
    buffer: &mut LayeredBuffer<AggregateLayer>,
    old: &MeshSnapshot,
    old_sectors: &SectorHierarchy,
    level: SectorLevel,
    marks: Option<&[u32]>,
) -> Result<()> {
    let sector_count = old_sectors.sector_count(level);
    let appearance = old.appearance();
    let (means, counts) = buffer.two_layers_mut::<Vec3, u32>(AggregateLayer::MeanColor, AggregateLayer::Count)?;

    means[..sector_count]
        .par_iter_mut()
        .zip(counts[..sector_count].par_iter_mut())
        .enumerate()
        .for_each(|(sector, (mean, count))| {
            if marks.is_some_and(|marks| marks[sector] == 0) {
                *mean = Vec3::ZERO;
                *count = 0;
                return;
            }
            let triangles = old_sectors.triangles_in(level, sector as u32);
            let sum: Vec3 = triangles
                .iter()
                .map(|&t| appearance.get(t as usize).map_or(Vec3::ZERO, |a| a.color))
                .sum();
            *count = triangles.len() as u32;
            *mean = if triangles.is_empty() { Vec3::ZERO } else { sum / triangles.len() as f32 };
        });
    Ok(())
}

// ===== MESH MATCHER =====

pub struct MeshMatcher {
    match_tolerance: f32,
    color_tolerance: f32,
    coarse_color_tolerance: f32,
    max_confidence: u32,
    third_match_sector_growth: u32,
    limits: BufferCapacities,
    small_sector_buffer: LayeredBuffer<SmallSectorLayer>,
    micro_sector_buffer: LayeredBuffer<MicroSectorLayer>,
    vertex_buffer: LayeredBuffer<VertexLayer>,
    vertex_match_buffer: LayeredBuffer<VertexMatchLayer>,
    triangle_buffer: LayeredBuffer<TriangleLayer>,
    /// Old-sector aggregates at micro, sub-micro and super-nano level
    aggregate_buffers: [LayeredBuffer<AggregateLayer>; 3],
    scratch: ScratchPool,
    growth_events: u32,
}

impl MeshMatcher {
    pub fn new(config: &ReconstructionConfig) -> Self {
        let initial = &config.initial_capacities;
        Self {
            match_tolerance: config.match_tolerance,
            color_tolerance: config.color_tolerance,
            coarse_color_tolerance: config.coarse_color_tolerance,
            max_confidence: config.max_confidence,
            third_match_sector_growth: config.third_match_sector_growth,
            limits: config.capacity_limits,
            small_sector_buffer: LayeredBuffer::new(initial.small_sector),
            micro_sector_buffer: LayeredBuffer::new(initial.micro_sector),
            vertex_buffer: LayeredBuffer::new(initial.vertex),
            vertex_match_buffer: LayeredBuffer::new(initial.vertex_match),
            triangle_buffer: LayeredBuffer::new(initial.triangle),
            aggregate_buffers: [
                LayeredBuffer::new(initial.micro_sector),
                LayeredBuffer::new(initial.sub_micro_sector),
                LayeredBuffer::new(initial.super_nano_sector),
            ],
            scratch: ScratchPool::new(),
            growth_events: 0,
        }
    }

    /// Buffer reallocations since the last call
    pub fn take_growth_events(&mut self) -> u32 {
        std::mem::take(&mut self.growth_events)
    }

    /// Match `new` against the retained `old` snapshot.
    ///
    /// Without sector hierarchies on both sides the frame is a replacement.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `hierarchy` was not built from `new`,
    /// and `Error::CapacityExceeded` if a matcher buffer would outgrow its
    /// limit.
    pub fn match_mesh(
        &mut self,
        old: &MeshSnapshot,
        new: &ReducedMesh,
        hierarchy: Option<&SectorHierarchy>,
    ) -> Result<MatchOutcome> {
        self.scratch.begin_frame();
        let triangle_count = new.triangle_count();

        let entry = MatchStage::entry(old.hierarchy().is_some(), hierarchy.is_some());
        let (old_sectors, new_sectors) = match (entry, old.hierarchy(), hierarchy) {
            (MatchStage::FirstMatch, Some(old_sectors), Some(new_sectors)) => (old_sectors, new_sectors),
            _ => return Ok(self.replace(new)),
        };
        if new_sectors.triangle_count() != triangle_count {
            engine_bail!(InvalidInput @ SOURCE, "Sector hierarchy holds {} triangles, mesh has {}",
                new_sectors.triangle_count(), triangle_count);
        }

        let mut records = vec![MatchRecord::Unmatched; triangle_count];
        let mut stats = MatchStats::default();
        let mut progress = MatchProgress::new(triangle_count);
        let mut stage = entry;

        loop {
            match stage {
                MatchStage::FirstMatch => {
                    let (matched, needing) = self.first_match(old, old_sectors, new, new_sectors, &mut records)?;
                    stats.first_matches = matched;
                    stats.micro_sectors_needing_second_match = needing;
                }
                MatchStage::SecondMatch => {
                    stats.second_matches = self.second_match(old, old_sectors, new, new_sectors, &mut records)?;
                }
                MatchStage::ThirdMatch => {
                    stats.third_matches = self.third_match(old, old_sectors, new, new_sectors, &mut records)?;
                }
                MatchStage::Replace => break,
            }

            progress.unmatched = records.par_iter().filter(|record| !record.is_matched()).count();
            if stage == MatchStage::SecondMatch {
                stats.sector_growth = Self::sector_growth(old_sectors, new_sectors);
                progress.third_match_gate = stats.sector_growth >= self.third_match_sector_growth as usize
                    && progress.unmatched > 0;
                stats.third_match_gate = progress.third_match_gate;
            }
            stats.final_stage = Some(stage);

            engine_trace!(SOURCE, "{}: {} of {} triangles still unmatched",
                stage, progress.unmatched, triangle_count);

            match stage.transition(&progress) {
                Some(next) => stage = next,
                None => break,
            }
        }

        stats.unmatched = progress.unmatched;
        stats.old_triangle_count = if stats.final_stage == Some(MatchStage::ThirdMatch) {
            old.triangle_count()
        } else {
            triangle_count
        };

        let appearance = self.blend(old, new, &records);

        engine_debug!(SOURCE, "Matched {} of {} triangles (first {}, second {}, third {}), sector growth {}, gate {}",
            stats.matched(), triangle_count, stats.first_matches, stats.second_matches,
            stats.third_matches, stats.sector_growth, stats.third_match_gate);

        Ok(MatchOutcome { records, appearance, stats })
    }

    /// Outcome of a frame that starts over: every triangle unmatched
    pub fn replace(&self, new: &ReducedMesh) -> MatchOutcome {
        let triangle_count = new.triangle_count();
        let appearance = (0..triangle_count)
            .into_par_iter()
            .map(|triangle| TriangleAppearance::observed(new.observation(triangle)))
            .collect();

        engine_debug!(SOURCE, "Replaced mesh with {} fresh triangles", triangle_count);

        MatchOutcome {
            records: vec![MatchRecord::Unmatched; triangle_count],
            appearance,
            stats: MatchStats {
                unmatched: triangle_count,
                final_stage: Some(MatchStage::Replace),
                old_triangle_count: triangle_count,
                ..Default::default()
            },
        }
    }

    /// Returns the matches made and the micro sectors left with unmatched triangles
    fn first_match(
        &mut self,
        old: &MeshSnapshot,
        old_sectors: &SectorHierarchy,
        new: &ReducedMesh,
        new_sectors: &SectorHierarchy,
        records: &mut [MatchRecord],
    ) -> Result<(usize, usize)> {
        let tolerance = self.match_tolerance;
        let vertex_count = new.vertex_count();

        // Old small sector of every new small sector
        let small_count = new_sectors.sector_count(SectorLevel::Small);
        self.ensure_buffer_capacity(BufferCategory::SmallSector, small_count)?;
        {
            let new_small = new_sectors.table(SectorLevel::Small);
            let old_small = old_sectors.table(SectorLevel::Small);
            let mapping = &mut self.small_sector_buffer.layer_mut::<u32>(SmallSectorLayer::Mapping)?[..small_count];
            mapping.par_iter_mut().enumerate().for_each(|(sector, mapped)| {
                *mapped = old_small.find(new_small.hash(sector as u32)).unwrap_or(NONE);
            });
        }

        // Count candidates, then scan into offsets
        self.ensure_buffer_capacity(BufferCategory::Vertex, vertex_count)?;
        let total = {
            let (offsets, counts) = self
                .vertex_buffer
                .two_layers_mut::<u32, u32>(VertexLayer::CandidateOffset, VertexLayer::CandidateCount)?;
            let counts = &mut counts[..vertex_count];
            counts
                .par_iter_mut()
                .zip(new.vertices.par_iter())
                .for_each_init(Vec::new, |found, (count, &position)| {
                    found.clear();
                    old.vertices_near(position, tolerance, found);
                    *count = found.len() as u32;
                });

            let mut running = 0usize;
            for (offset, &count) in offsets[..vertex_count].iter_mut().zip(counts.iter()) {
                *offset = running as u32;
                running += count as usize;
            }
            running
        };

        // Write sorted candidates into per-vertex ranges
        self.ensure_buffer_capacity(BufferCategory::VertexMatch, total)?;
        {
            let counts = &self.vertex_buffer.layer::<u32>(VertexLayer::CandidateCount)?[..vertex_count];
            let (old_vertices, distances) = self
                .vertex_match_buffer
                .two_layers_mut::<u32, f32>(VertexMatchLayer::OldVertex, VertexMatchLayer::Distance)?;

            let mut vertex_ranges = Vec::with_capacity(vertex_count);
            let mut distance_ranges = Vec::with_capacity(vertex_count);
            let mut rest_vertices = &mut old_vertices[..total];
            let mut rest_distances = &mut distances[..total];
            for &count in counts {
                let (head, tail) = std::mem::take(&mut rest_vertices).split_at_mut(count as usize);
                vertex_ranges.push(head);
                rest_vertices = tail;
                let (head, tail) = std::mem::take(&mut rest_distances).split_at_mut(count as usize);
                distance_ranges.push(head);
                rest_distances = tail;
            }

            vertex_ranges
                .into_par_iter()
                .zip(distance_ranges)
                .zip(new.vertices.par_iter())
                .for_each_init(Vec::new, |found, ((vertex_range, distance_range), &position)| {
                    found.clear();
                    old.vertices_near(position, tolerance, found);
                    found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                    for ((slot, distance), &(d, vertex)) in vertex_range
                        .iter_mut()
                        .zip(distance_range.iter_mut())
                        .zip(found.iter())
                    {
                        *slot = vertex;
                        *distance = d;
                    }
                });
        }

        let matched = {
            let table = CandidateTable {
                offsets: &self.vertex_buffer.layer::<u32>(VertexLayer::CandidateOffset)?[..vertex_count],
                counts: &self.vertex_buffer.layer::<u32>(VertexLayer::CandidateCount)?[..vertex_count],
                old_vertices: &self.vertex_match_buffer.layer::<u32>(VertexMatchLayer::OldVertex)?[..total],
                distances: &self.vertex_match_buffer.layer::<f32>(VertexMatchLayer::Distance)?[..total],
            };
            let mapping = &self.small_sector_buffer.layer::<u32>(SmallSectorLayer::Mapping)?[..small_count];
            let small_sectors = new_sectors.triangle_sectors(SectorLevel::Small);
            let old_small = old_sectors.table(SectorLevel::Small);

            records
                .par_iter_mut()
                .zip(new.indices.par_iter())
                .enumerate()
                .map(|(triangle, (record, &corners))| {
                    // A new small sector can still border old geometry across its faces
                    if mapping[small_sectors[triangle] as usize] == NONE
                        && !near_old_small_sector(old_small, new.corners(triangle), tolerance)
                    {
                        return 0;
                    }
                    match table.best_triangle(corners, old) {
                        Some((old_triangle, rotation)) => {
                            *record = MatchRecord::Matched {
                                old_triangle,
                                stage: MatchStage::FirstMatch,
                                rotation,
                            };
                            1
                        }
                        None => 0,
                    }
                })
                .sum::<usize>()
        };

        // Unmatched triangles per micro sector
        let micro_count = new_sectors.sector_count(SectorLevel::Micro);
        self.ensure_buffer_capacity(BufferCategory::MicroSector, micro_count)?;
        self.micro_sector_buffer.fill(MicroSectorLayer::Unmatched, 0..micro_count, 0u32)?;
        {
            let micro_sectors = new_sectors.triangle_sectors(SectorLevel::Micro);
            let atomics = self.micro_sector_buffer.atomic_layers();
            let unmatched = atomics.layer(MicroSectorLayer::Unmatched);
            records
                .par_iter()
                .zip(micro_sectors.par_iter())
                .filter(|(record, _)| !record.is_matched())
                .for_each(|(_, &sector)| {
                    unmatched[sector as usize].fetch_add(1, Ordering::Relaxed);
                });
        }
        let needing = self.micro_sector_buffer.layer::<u32>(MicroSectorLayer::Unmatched)?[..micro_count]
            .iter()
            .filter(|&&count| count > 0)
            .count();

        engine_trace!(SOURCE, "First match: {} vertex candidates, {} matches, {} micro sectors need second match",
            total, matched, needing);

        Ok((matched, needing))
    }

    fn second_match(
        &mut self,
        old: &MeshSnapshot,
        old_sectors: &SectorHierarchy,
        new: &ReducedMesh,
        new_sectors: &SectorHierarchy,
        records: &mut [MatchRecord],
    ) -> Result<usize> {
        let triangle_count = records.len();
        let old_table = old_sectors.table(SectorLevel::SuperNano);
        let new_table = new_sectors.table(SectorLevel::SuperNano);
        let old_count = old_table.len();
        let old_micro_count = old_sectors.sector_count(SectorLevel::Micro);

        self.ensure_buffer_capacity(BufferCategory::Triangle, triangle_count)?;
        self.ensure_buffer_capacity(BufferCategory::SuperNanoSector, old_count)?;
        self.ensure_buffer_capacity(BufferCategory::MicroSector, old_micro_count)?;

        // Mark the old sectors some unmatched triangle points at
        let marks_key = self.scratch.acquire(old_count);
        {
            let targets = &mut self.triangle_buffer.layer_mut::<u32>(TriangleLayer::Target)?[..triangle_count];
            let marks = as_atomic_u32(self.scratch.get_mut(marks_key)?);
            let sectors = new_sectors.triangle_sectors(SectorLevel::SuperNano);
            targets
                .par_iter_mut()
                .zip(records.par_iter())
                .zip(sectors.par_iter())
                .for_each(|((target, record), &sector)| {
                    *target = NONE;
                    if record.is_matched() {
                        return;
                    }
                    if let Some(old_sector) = old_table.find(new_table.hash(sector)) {
                        marks[old_sector as usize].store(1, Ordering::Relaxed);
                        *target = old_sector;
                    }
                });
        }

        let marks = self.scratch.get(marks_key)?;
        let marked = marks.iter().filter(|&&mark| mark != 0).count();
        aggregate_colors(
            &mut self.aggregate_buffers[aggregate_slot(SectorLevel::SuperNano)],
            old,
            old_sectors,
            SectorLevel::SuperNano,
            Some(marks),
        )?;
        aggregate_colors(
            &mut self.aggregate_buffers[aggregate_slot(SectorLevel::Micro)],
            old,
            old_sectors,
            SectorLevel::Micro,
            None,
        )?;

        let nano_means = &self.aggregate_buffers[aggregate_slot(SectorLevel::SuperNano)]
            .layer::<Vec3>(AggregateLayer::MeanColor)?[..old_count];
        let micro_means = &self.aggregate_buffers[aggregate_slot(SectorLevel::Micro)]
            .layer::<Vec3>(AggregateLayer::MeanColor)?[..old_micro_count];
        let targets = &self.triangle_buffer.layer::<u32>(TriangleLayer::Target)?[..triangle_count];
        let tolerance = self.color_tolerance;

        let matched = records
            .par_iter_mut()
            .zip(targets.par_iter())
            .enumerate()
            .map(|(triangle, (record, &target))| {
                if record.is_matched() {
                    return 0;
                }
                let observation = new.observation(triangle);

                // Same super-nano sector first, then anywhere in the same micro sector
                let super_nano = (target != NONE && observation.distance(nano_means[target as usize]) <= tolerance)
                    .then_some((SectorLevel::SuperNano, target));
                let candidate = super_nano.or_else(|| {
                    let hash = new_sectors.sector_hash_of(SectorLevel::Micro, triangle as u32);
                    let sector = old_sectors.find(SectorLevel::Micro, hash)?;
                    (observation.distance(micro_means[sector as usize]) <= tolerance)
                        .then_some((SectorLevel::Micro, sector))
                });
                let Some((level, sector)) = candidate else {
                    return 0;
                };
                match nearest_in_sector(old, old_sectors, level, sector, new, triangle) {
                    Some((old_triangle, rotation)) => {
                        *record = MatchRecord::Matched {
                            old_triangle,
                            stage: MatchStage::SecondMatch,
                            rotation,
                        };
                        1
                    }
                    None => 0,
                }
            })
            .sum::<usize>();

        self.scratch.release(marks_key);

        engine_trace!(SOURCE, "Second match: {} old super-nano sectors marked, {} matches", marked, matched);
        Ok(matched)
    }

    /// New micro sectors absent last frame whose small sector did exist
    fn sector_growth(old_sectors: &SectorHierarchy, new_sectors: &SectorHierarchy) -> usize {
        let old_micro = old_sectors.table(SectorLevel::Micro);
        let old_small = old_sectors.table(SectorLevel::Small);
        new_sectors
            .table(SectorLevel::Micro)
            .hashes()
            .par_iter()
            .filter(|&&hash| {
                !old_micro.contains(hash) && hash.parent().is_some_and(|small| old_small.contains(small))
            })
            .count()
    }

    fn third_match(
        &mut self,
        old: &MeshSnapshot,
        old_sectors: &SectorHierarchy,
        new: &ReducedMesh,
        new_sectors: &SectorHierarchy,
        records: &mut [MatchRecord],
    ) -> Result<usize> {
        for level in COARSE_LEVELS {
            self.ensure_buffer_capacity(level.category(), old_sectors.sector_count(level))?;
            aggregate_colors(&mut self.aggregate_buffers[aggregate_slot(level)], old, old_sectors, level, None)?;
        }

        let mut means = Vec::with_capacity(COARSE_LEVELS.len());
        for level in COARSE_LEVELS {
            let count = old_sectors.sector_count(level);
            means.push(&self.aggregate_buffers[aggregate_slot(level)].layer::<Vec3>(AggregateLayer::MeanColor)?[..count]);
        }
        let tolerance = self.coarse_color_tolerance;

        let matched = records
            .par_iter_mut()
            .enumerate()
            .map(|(triangle, record)| {
                if record.is_matched() {
                    return 0;
                }
                let observation = new.observation(triangle);
                for (level, level_means) in COARSE_LEVELS.into_iter().zip(&means) {
                    let hash = new_sectors.sector_hash_of(level, triangle as u32);
                    let Some(sector) = old_sectors.find(level, hash) else {
                        continue;
                    };
                    if observation.distance(level_means[sector as usize]) > tolerance {
                        continue;
                    }
                    if let Some((old_triangle, rotation)) =
                        nearest_in_sector(old, old_sectors, level, sector, new, triangle)
                    {
                        *record = MatchRecord::Matched {
                            old_triangle,
                            stage: MatchStage::ThirdMatch,
                            rotation,
                        };
                        return 1;
                    }
                }
                0
            })
            .sum::<usize>();

        engine_trace!(SOURCE, "Third match: rebuilt aggregates of {} old triangles, {} matches",
            old.triangle_count(), matched);
        Ok(matched)
    }

    /// Carry accumulated appearance over matched triangles
    fn blend(&self, old: &MeshSnapshot, new: &ReducedMesh, records: &[MatchRecord]) -> Vec<TriangleAppearance> {
        let max_confidence = self.max_confidence;
        records
            .par_iter()
            .enumerate()
            .map(|(triangle, record)| {
                let observation = new.observation(triangle);
                match record.old_triangle().and_then(|old_triangle| old.appearance().get(old_triangle as usize)) {
                    Some(previous) => previous.blend(observation, max_confidence),
                    None => TriangleAppearance::observed(observation),
                }
            })
            .collect()
    }

    fn grow<L: BufferLayer>(
        buffer: &mut LayeredBuffer<L>,
        category: BufferCategory,
        capacity: usize,
        limit: usize,
        growth_events: &mut u32,
    ) -> Result<()> {
        if grow_buffer(buffer, category, capacity, limit, SOURCE)? {
            *growth_events += 1;
        }
        Ok(())
    }
}

impl CapacityManager for MeshMatcher {
    fn ensure_buffer_capacity(&mut self, category: BufferCategory, capacity: usize) -> Result<()> {
        let limit = self.limits.get(category);
        let events = &mut self.growth_events;
        match category {
            BufferCategory::SmallSector => Self::grow(&mut self.small_sector_buffer, category, capacity, limit, events),
            BufferCategory::MicroSector => {
                Self::grow(&mut self.micro_sector_buffer, category, capacity, limit, events)?;
                Self::grow(&mut self.aggregate_buffers[0], category, capacity, limit, events)
            }
            BufferCategory::SubMicroSector => Self::grow(&mut self.aggregate_buffers[1], category, capacity, limit, events),
            BufferCategory::SuperNanoSector => Self::grow(&mut self.aggregate_buffers[2], category, capacity, limit, events),
            BufferCategory::Vertex => Self::grow(&mut self.vertex_buffer, category, capacity, limit, events),
            BufferCategory::VertexMatch => Self::grow(&mut self.vertex_match_buffer, category, capacity, limit, events),
            BufferCategory::Triangle => Self::grow(&mut self.triangle_buffer, category, capacity, limit, events),
        }
    }

    fn buffer_capacity(&self, category: BufferCategory) -> Option<usize> {
        Some(match category {
            BufferCategory::SmallSector => self.small_sector_buffer.capacity(),
            BufferCategory::MicroSector => self.micro_sector_buffer.capacity(),
            BufferCategory::SubMicroSector => self.aggregate_buffers[1].capacity(),
            BufferCategory::SuperNanoSector => self.aggregate_buffers[2].capacity(),
            BufferCategory::Vertex => self.vertex_buffer.capacity(),
            BufferCategory::VertexMatch => self.vertex_match_buffer.capacity(),
            BufferCategory::Triangle => self.triangle_buffer.capacity(),
        })
    }
}
