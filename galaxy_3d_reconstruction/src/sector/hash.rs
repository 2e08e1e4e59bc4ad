/// Content-derived sector hashes and sortable `(hash, index)` entries.

use glam::{IVec3, Vec3};
use rdst::{RadixKey, RadixSort};
use super::level::{quantize, SectorLevel};

const AXIS_BITS: u32 = 20;
const AXIS_BIAS: i32 = 1 << (AXIS_BITS - 1);
const AXIS_MASK: u64 = (1 << AXIS_BITS) - 1;
const LEVEL_SHIFT: u32 = 3 * AXIS_BITS;

/// Stable identity of a sector across frames.
///
/// Packs the level in the top bits and the biased integer min-corner
/// coordinate (in units of the level's size) in 20 bits per axis. Sector ids
/// are reassigned every frame; hashes are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectorHash(u64);

impl SectorHash {
    pub fn new(level: SectorLevel, coord: IVec3) -> Self {
        let biased = (coord + IVec3::splat(AXIS_BIAS)).as_uvec3();
        let x = biased.x as u64 & AXIS_MASK;
        let y = biased.y as u64 & AXIS_MASK;
        let z = biased.z as u64 & AXIS_MASK;
        Self(((level.index() as u64) << LEVEL_SHIFT) | (x << (2 * AXIS_BITS)) | (y << AXIS_BITS) | z)
    }

    /// Hash of the sector of `level` containing `point`
    pub fn of_point(level: SectorLevel, point: Vec3) -> Self {
        Self::new(level, level.coord_of(quantize(point)))
    }

    pub fn from_value(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn level(self) -> SectorLevel {
        SectorLevel::from_index((self.0 >> LEVEL_SHIFT) as usize & 3).unwrap_or(SectorLevel::SuperNano)
    }

    pub fn coord(self) -> IVec3 {
        let axis = |shift: u32| ((self.0 >> shift) & AXIS_MASK) as i32 - AXIS_BIAS;
        IVec3::new(axis(2 * AXIS_BITS), axis(AXIS_BITS), axis(0))
    }

    /// Hash of the enclosing sector one level up
    pub fn parent(self) -> Option<Self> {
        let level = self.level();
        let coarser = level.coarser()?;
        let n = IVec3::splat(level.subdivisions());
        Some(Self::new(coarser, self.coord().div_euclid(n)))
    }

    pub fn center(self) -> Vec3 {
        self.level().center(self.coord())
    }
}

/// Hash paired with the index of the element it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HashEntry {
    pub hash: u64,
    pub index: u32,
}

impl HashEntry {
    pub fn new(hash: u64, index: u32) -> Self {
        Self { hash, index }
    }

    /// Radix sort by hash, then index
    pub fn sort(entries: &mut Vec<HashEntry>) {
        entries.radix_sort_unstable();
    }

    /// Entries of a sorted table carrying `hash`
    pub fn equal_range(sorted: &[HashEntry], hash: u64) -> &[HashEntry] {
        let start = sorted.partition_point(|entry| entry.hash < hash);
        let len = sorted[start..].partition_point(|entry| entry.hash == hash);
        &sorted[start..start + len]
    }

    /// Lowest index stored under `hash` in a sorted table
    pub fn find(sorted: &[HashEntry], hash: u64) -> Option<u32> {
        Self::equal_range(sorted, hash).first().map(|entry| entry.index)
    }
}

impl RadixKey for HashEntry {
    const LEVELS: usize = 12;

    #[inline]
    fn get_level(&self, level: usize) -> u8 {
        if level < 4 {
            (self.index >> (level * 8)) as u8
        } else {
            (self.hash >> ((level - 4) * 8)) as u8
        }
    }
}
