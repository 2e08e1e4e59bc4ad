//! Frame pipeline of a reconstruction session.
//!
//! Each frame runs sort, duplicate removal and matching against the retained
//! baseline, then promotes the new mesh to the baseline. A frame that hits a
//! buffer limit is degraded to a full replacement instead of failing.

use crate::config::ReconstructionConfig;
use crate::duplicate::{DuplicateRemover, DuplicateReport};
use crate::error::Result;
use crate::matching::{MatchOutcome, MatchRecord, MatchStats, MeshMatcher, TriangleAppearance};
use crate::sector::{SectorHierarchy, SectorLevel};
use crate::sort::SceneSorter;
use crate::utils::PendingResult;
use crate::{engine_debug, engine_info, engine_warn};
use super::mesh::ReducedMesh;
use super::snapshot::{DoubleBuffered, MeshSnapshot};

const SOURCE: &str = "galaxy3d::SceneReconstructor";

/// Per-frame pipeline statistics
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameStats {
    pub frame_index: u64,
    /// Triangles handed in by the mesh reduction stage
    pub input_triangles: usize,
    /// Triangles left after duplicate removal
    pub triangles: usize,
    /// Sector count per level, indexed by `SectorLevel::index()`
    pub sector_counts: [usize; 4],
    pub welded_vertices: usize,
    pub degenerate_triangles: usize,
    pub duplicate_triangles: usize,
    pub matching: MatchStats,
    /// The frame hit a buffer limit and was replaced wholesale
    pub fell_back: bool,
    /// Buffer reallocations across every component this frame
    pub capacity_growths: u32,
}

impl FrameStats {
    pub fn sector_count(&self, level: SectorLevel) -> usize {
        self.sector_counts[level.index()]
    }
}

/// What a processed frame hands to downstream consumers.
///
/// The merged mesh and its sector hierarchy are read through
/// [`SceneReconstructor::baseline`] until the next frame is processed.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutput {
    pub records: Vec<MatchRecord>,
    pub appearance: Vec<TriangleAppearance>,
    pub stats: FrameStats,
}

pub struct SceneReconstructor {
    config: ReconstructionConfig,
    sorter: SceneSorter,
    duplicate_remover: DuplicateRemover,
    matcher: MeshMatcher,
    snapshots: DoubleBuffered<MeshSnapshot>,
    pending: PendingResult<ReducedMesh>,
    frame_index: u64,
}

impl SceneReconstructor {
    /// Build a session with empty baseline.
    ///
    /// # Errors
    ///
    /// Returns `Error::InitializationFailed` if `config` does not validate.
    pub fn new(config: ReconstructionConfig) -> Result<Self> {
        config.validate()?;

        let sorter = SceneSorter::new(&config.initial_capacities, &config.capacity_limits);
        let duplicate_remover = DuplicateRemover::new(&config);
        let matcher = MeshMatcher::new(&config);

        engine_info!(SOURCE, "Reconstruction session created (match tolerance {} m, color tolerance {})",
            config.match_tolerance, config.color_tolerance);

        Ok(Self {
            config,
            sorter,
            duplicate_remover,
            matcher,
            snapshots: DoubleBuffered::default(),
            pending: PendingResult::new(),
            frame_index: 0,
        })
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Index of the last processed frame (0 before the first one)
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Mesh, appearance and hierarchy of the last processed frame
    pub fn baseline(&self) -> &MeshSnapshot {
        self.snapshots.front()
    }

    /// Process one reduced mesh and make it the new baseline.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a malformed mesh; the session is left
    /// untouched. Buffer limits never fail a frame: the frame is replaced
    /// wholesale and `FrameStats::fell_back` is set.
    pub fn process_frame(&mut self, mesh: ReducedMesh) -> Result<FrameOutput> {
        mesh.validate()?;

        let mut mesh = mesh;
        let frame_index = self.frame_index + 1;
        let input_triangles = mesh.triangle_count();
        let mut fell_back = false;

        let (hierarchy, report) = match self.sort_and_clean(&mut mesh) {
            Ok((hierarchy, report)) => (Some(hierarchy), report),
            Err(error) if error.is_recoverable() => {
                engine_warn!(SOURCE, "Frame {} sort failed ({}), replacing the mesh", frame_index, error);
                fell_back = true;
                (None, DuplicateReport::default())
            }
            Err(error) => return Err(error),
        };

        let (old, next) = self.snapshots.split();
        let outcome = match self.matcher.match_mesh(old, &mesh, hierarchy.as_ref()) {
            Ok(outcome) => outcome,
            Err(error) if error.is_recoverable() => {
                engine_warn!(SOURCE, "Frame {} match failed ({}), replacing the mesh", frame_index, error);
                fell_back = true;
                self.matcher.replace(&mesh)
            }
            Err(error) => return Err(error),
        };
        let MatchOutcome { records, appearance, stats: matching } = outcome;

        let mut sector_counts = [0; 4];
        if let Some(hierarchy) = &hierarchy {
            for level in SectorLevel::ALL {
                sector_counts[level.index()] = hierarchy.sector_count(level);
            }
        }

        let capacity_growths = self.sorter.take_growth_events()
            + self.duplicate_remover.take_growth_events()
            + self.matcher.take_growth_events();

        let stats = FrameStats {
            frame_index,
            input_triangles,
            triangles: mesh.triangle_count(),
            sector_counts,
            welded_vertices: report.welded_vertices,
            degenerate_triangles: report.degenerate_triangles,
            duplicate_triangles: report.duplicate_triangles,
            matching,
            fell_back,
            capacity_growths,
        };

        *next = MeshSnapshot::new(mesh, appearance.clone(), hierarchy, frame_index);
        self.snapshots.promote();
        self.frame_index = frame_index;

        engine_debug!(SOURCE, "Frame {}: {} -> {} triangles, {} small / {} micro sectors, {} matched, {} unmatched{}",
            frame_index, input_triangles, stats.triangles,
            stats.sector_count(SectorLevel::Small), stats.sector_count(SectorLevel::Micro),
            stats.matching.matched(), stats.matching.unmatched,
            if fell_back { " (replaced)" } else { "" });

        Ok(FrameOutput { records, appearance, stats })
    }

    fn sort_and_clean(&mut self, mesh: &mut ReducedMesh) -> Result<(SectorHierarchy, DuplicateReport)> {
        let mut hierarchy = self.sorter.execute_scene_sort(mesh)?;
        let report = self.duplicate_remover.remove_duplicates(mesh, &mut hierarchy)?;
        Ok((hierarchy, report))
    }

    /// Produce the next reduced mesh on a background worker.
    ///
    /// Returns `false` if a previous mesh is still being produced.
    pub fn submit_mesh<F>(&self, produce: F) -> bool
    where
        F: FnOnce() -> ReducedMesh + Send + 'static,
    {
        self.pending.start(produce)
    }

    /// Whether a submitted mesh is still being produced
    pub fn is_mesh_pending(&self) -> bool {
        self.pending.is_working()
    }

    /// Process the submitted mesh if it is ready; never waits for it.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if the producing worker panicked, or any
    /// error of [`Self::process_frame`].
    pub fn tick(&mut self) -> Result<Option<FrameOutput>> {
        match self.pending.try_take()? {
            Some(mesh) => self.process_frame(mesh).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "reconstructor_tests.rs"]
mod tests;
