/// Per-level sector records.

use std::ops::Range;
use glam::{UVec3, Vec3};
use super::hash::{HashEntry, SectorHash};
use super::level::SectorLevel;

/// Fixed-point scale of aggregate color sums
pub const COLOR_SCALE: f32 = 16.0;

/// Encode an RGB color (0..255) as fixed point
pub fn encode_color(color: Vec3) -> UVec3 {
    (color.clamp(Vec3::ZERO, Vec3::splat(255.0)) * COLOR_SCALE).round().as_uvec3()
}

/// Mean color of a fixed-point sum over `count` elements
pub fn decode_color_sum(sum: UVec3, count: u32) -> Option<Vec3> {
    if count == 0 {
        return None;
    }
    Some(sum.as_vec3() / (COLOR_SCALE * count as f32))
}

/// Sectors of one level of a frame's hierarchy.
///
/// Sector ids are dense and ordered by parent, so every parent's children
/// (and every sector's triangles) form one contiguous range.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorTable {
    level: SectorLevel,
    hashes: Vec<SectorHash>,
    /// Sector id at the coarser level (octree node index for small sectors)
    parents: Vec<u32>,
    counts: Vec<u32>,
    offsets: Vec<u32>,
    color_sums: Vec<UVec3>,
    sorted: Vec<HashEntry>,
}

impl SectorTable {
    pub(crate) fn new(
        level: SectorLevel,
        hashes: Vec<SectorHash>,
        parents: Vec<u32>,
        counts: Vec<u32>,
        color_sums: Vec<UVec3>,
    ) -> Self {
        let mut table = Self::assemble(level, hashes, parents, counts, color_sums);
        table.build_sorted();
        table
    }

    fn assemble(
        level: SectorLevel,
        hashes: Vec<SectorHash>,
        parents: Vec<u32>,
        counts: Vec<u32>,
        color_sums: Vec<UVec3>,
    ) -> Self {
        let mut offsets = Vec::with_capacity(counts.len());
        let mut running = 0u32;
        for &count in &counts {
            offsets.push(running);
            running += count;
        }

        Self {
            level,
            hashes,
            parents,
            counts,
            offsets,
            color_sums,
            sorted: Vec::new(),
        }
    }

    fn build_sorted(&mut self) {
        let mut sorted: Vec<HashEntry> = self
            .hashes
            .iter()
            .enumerate()
            .map(|(id, hash)| HashEntry::new(hash.value(), id as u32))
            .collect();
        HashEntry::sort(&mut sorted);
        self.sorted = sorted;
    }

    pub fn level(&self) -> SectorLevel {
        self.level
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn hash(&self, sector: u32) -> SectorHash {
        self.hashes[sector as usize]
    }

    pub fn hashes(&self) -> &[SectorHash] {
        &self.hashes
    }

    pub fn parent(&self, sector: u32) -> u32 {
        self.parents[sector as usize]
    }

    pub fn count(&self, sector: u32) -> u32 {
        self.counts[sector as usize]
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn offset(&self, sector: u32) -> u32 {
        self.offsets[sector as usize]
    }

    /// Range of this sector in the hierarchy's triangle order
    pub fn triangle_range(&self, sector: u32) -> Range<usize> {
        let start = self.offsets[sector as usize] as usize;
        start..start + self.counts[sector as usize] as usize
    }

    pub fn color_sum(&self, sector: u32) -> UVec3 {
        self.color_sums[sector as usize]
    }

    /// Mean observed RGB color (0..255) of the sector's triangles
    pub fn mean_color(&self, sector: u32) -> Option<Vec3> {
        decode_color_sum(self.color_sums[sector as usize], self.counts[sector as usize])
    }

    /// Hash-sorted lookup table
    pub fn sorted(&self) -> &[HashEntry] {
        &self.sorted
    }

    /// O(log n) sector lookup by hash
    pub fn find(&self, hash: SectorHash) -> Option<u32> {
        HashEntry::find(&self.sorted, hash.value())
    }

    pub fn contains(&self, hash: SectorHash) -> bool {
        self.find(hash).is_some()
    }

    /// Drop sectors whose new count is zero.
    ///
    /// `counts`/`color_sums` are the recomputed aggregates per old id and
    /// `parent_remap` maps old parent ids to new ones. Returns the old-to-new
    /// id map (`u32::MAX` for dropped sectors).
    pub(crate) fn retain(
        &mut self,
        counts: &[u32],
        color_sums: &[UVec3],
        parent_remap: Option<&[u32]>,
    ) -> Vec<u32> {
        let mut remap = vec![u32::MAX; self.hashes.len()];
        let mut hashes = Vec::new();
        let mut parents = Vec::new();
        let mut kept_counts = Vec::new();
        let mut kept_sums = Vec::new();

        for old in 0..self.hashes.len() {
            if counts[old] == 0 {
                continue;
            }
            remap[old] = hashes.len() as u32;
            hashes.push(self.hashes[old]);
            let parent = self.parents[old];
            parents.push(match parent_remap {
                Some(map) => map.get(parent as usize).copied().unwrap_or(u32::MAX),
                None => parent,
            });
            kept_counts.push(counts[old]);
            kept_sums.push(color_sums[old]);
        }

        // Filtering keeps the hash order, no re-sort needed
        let sorted = self
            .sorted
            .iter()
            .filter(|entry| remap[entry.index as usize] != u32::MAX)
            .map(|entry| HashEntry::new(entry.hash, remap[entry.index as usize]))
            .collect();

        let mut table = Self::assemble(self.level, hashes, parents, kept_counts, kept_sums);
        table.sorted = sorted;
        *self = table;
        remap
    }
}
