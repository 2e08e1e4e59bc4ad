/// Four-level sector hierarchy of one frame.

use glam::{UVec3, Vec3};
use crate::error::Result;
use crate::engine_bail;
use super::hash::SectorHash;
use super::level::SectorLevel;
use super::octree::{ArrayElement, SectorOctree, NONE};
use super::table::{decode_color_sum, SectorTable};

/// Sector tables of every level plus the per-triangle assignment.
///
/// `triangle_order` lists triangles grouped by super-nano sector id; since
/// ids at every level are assigned in parent order, it is also grouped by
/// sub-micro, micro and small sector, and each table's offsets index into it.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorHierarchy {
    octree: SectorOctree,
    tables: [SectorTable; 4],
    /// Sector id per triangle, per level
    triangle_sectors: [Vec<u32>; 4],
    triangle_order: Vec<u32>,
    /// Fixed-point observed color per triangle
    triangle_colors: Vec<UVec3>,
}

impl SectorHierarchy {
    pub(crate) fn new(
        octree: SectorOctree,
        tables: [SectorTable; 4],
        triangle_sectors: [Vec<u32>; 4],
        triangle_order: Vec<u32>,
        triangle_colors: Vec<UVec3>,
    ) -> Self {
        Self { octree, tables, triangle_sectors, triangle_order, triangle_colors }
    }

    pub fn world_octant_size(&self) -> f32 {
        self.octree.world_octant_size()
    }

    pub fn octree(&self) -> &SectorOctree {
        &self.octree
    }

    /// Flat leaf list for traversal
    pub fn array(&self) -> Vec<ArrayElement> {
        self.octree.array()
    }

    pub fn table(&self, level: SectorLevel) -> &SectorTable {
        &self.tables[level.index()]
    }

    pub fn sector_count(&self, level: SectorLevel) -> usize {
        self.tables[level.index()].len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_order.len()
    }

    pub fn triangle_order(&self) -> &[u32] {
        &self.triangle_order
    }

    /// Sector id of `triangle` at `level`
    pub fn sector_of(&self, level: SectorLevel, triangle: u32) -> u32 {
        self.triangle_sectors[level.index()][triangle as usize]
    }

    pub fn triangle_sectors(&self, level: SectorLevel) -> &[u32] {
        &self.triangle_sectors[level.index()]
    }

    /// Hash of the sector holding `triangle` at `level`
    pub fn sector_hash_of(&self, level: SectorLevel, triangle: u32) -> SectorHash {
        self.table(level).hash(self.sector_of(level, triangle))
    }

    /// Triangles of one sector, contiguous in triangle order
    pub fn triangles_in(&self, level: SectorLevel, sector: u32) -> &[u32] {
        &self.triangle_order[self.table(level).triangle_range(sector)]
    }

    pub fn find(&self, level: SectorLevel, hash: SectorHash) -> Option<u32> {
        self.table(level).find(hash)
    }

    /// Observed RGB color (0..255) of a triangle, after fixed-point rounding
    pub fn triangle_color(&self, triangle: u32) -> Vec3 {
        decode_color_sum(self.triangle_colors[triangle as usize], 1).unwrap_or(Vec3::ZERO)
    }

    /// Keep only the triangles flagged in `keep` and renumber them densely.
    ///
    /// Occupancy and color aggregates are recomputed, sectors left empty are
    /// dropped at every level (ids stay in parent order), and octree leaves of
    /// dropped small sectors are emptied. Returns the old-to-new triangle map
    /// (`u32::MAX` for removed triangles).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `keep` does not cover every triangle.
    pub fn retain_triangles(&mut self, keep: &[bool]) -> Result<Vec<u32>> {
        let triangle_count = self.triangle_count();
        if keep.len() != triangle_count {
            engine_bail!(InvalidInput @ "galaxy3d::SectorHierarchy",
                "Retain mask covers {} triangles, hierarchy has {}", keep.len(), triangle_count);
        }

        let mut triangle_remap = vec![u32::MAX; triangle_count];
        let mut kept = 0u32;
        for (triangle, _) in keep.iter().enumerate().filter(|&(_, &k)| k) {
            triangle_remap[triangle] = kept;
            kept += 1;
        }

        let mut parent_remap: Option<Vec<u32>> = None;
        for level in SectorLevel::ALL {
            let index = level.index();
            let sector_count = self.tables[index].len();
            let mut counts = vec![0u32; sector_count];
            let mut sums = vec![UVec3::ZERO; sector_count];
            for (triangle, &sector) in self.triangle_sectors[index].iter().enumerate() {
                if keep[triangle] {
                    counts[sector as usize] += 1;
                    sums[sector as usize] += self.triangle_colors[triangle];
                }
            }

            let remap = self.tables[index].retain(&counts, &sums, parent_remap.as_deref());

            let sectors = &self.triangle_sectors[index];
            self.triangle_sectors[index] = sectors
                .iter()
                .zip(keep)
                .filter(|&(_, &k)| k)
                .map(|(&sector, _)| remap[sector as usize])
                .collect();

            if level == SectorLevel::Small {
                self.octree.refresh(&self.tables[index], Some(&remap));
            }
            parent_remap = Some(remap);
        }

        self.triangle_order = self
            .triangle_order
            .iter()
            .map(|&triangle| triangle_remap[triangle as usize])
            .filter(|&triangle| triangle != NONE)
            .collect();

        self.triangle_colors = self
            .triangle_colors
            .iter()
            .zip(keep)
            .filter(|&(_, &k)| k)
            .map(|(&color, _)| color)
            .collect();

        Ok(triangle_remap)
    }
}
