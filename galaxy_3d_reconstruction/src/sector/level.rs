/// Sector levels and fixed-point quantization.
///
/// Every position is first quantized to an integer super-nano cell
/// (1/16 m). Coarser sector coordinates are derived from that cell with
/// integer division only, so a finer sector is always contained in exactly
/// one coarser sector, whatever floating-point noise the input carries.

use glam::{IVec3, Vec3};
use crate::buffer::BufferCategory;

/// Super-nano cells per meter
pub const CELLS_PER_METER: f32 = 16.0;

/// Edge length of a small sector, in meters
pub const SMALL_SECTOR_SIZE: f32 = 2.0;

/// Largest accepted absolute coordinate, in meters
pub const MAX_COORDINATE: f32 = 32000.0;

/// Granularity level of the sector hierarchy, coarsest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectorLevel {
    /// 2 m
    Small,
    /// 0.25 m, 512 per small sector
    Micro,
    /// 0.125 m, 8 per micro sector
    SubMicro,
    /// 0.0625 m, 8 per sub-micro sector
    SuperNano,
}

impl SectorLevel {
    pub const ALL: [SectorLevel; 4] = [
        SectorLevel::Small,
        SectorLevel::Micro,
        SectorLevel::SubMicro,
        SectorLevel::SuperNano,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            SectorLevel::Small => "small",
            SectorLevel::Micro => "micro",
            SectorLevel::SubMicro => "sub-micro",
            SectorLevel::SuperNano => "super-nano",
        }
    }

    /// Super-nano cells along one edge of a sector
    pub fn span(self) -> i32 {
        match self {
            SectorLevel::Small => 32,
            SectorLevel::Micro => 4,
            SectorLevel::SubMicro => 2,
            SectorLevel::SuperNano => 1,
        }
    }

    /// Edge length in meters
    pub fn size(self) -> f32 {
        self.span() as f32 / CELLS_PER_METER
    }

    pub fn coarser(self) -> Option<Self> {
        match self {
            SectorLevel::Small => None,
            SectorLevel::Micro => Some(SectorLevel::Small),
            SectorLevel::SubMicro => Some(SectorLevel::Micro),
            SectorLevel::SuperNano => Some(SectorLevel::SubMicro),
        }
    }

    pub fn finer(self) -> Option<Self> {
        match self {
            SectorLevel::Small => Some(SectorLevel::Micro),
            SectorLevel::Micro => Some(SectorLevel::SubMicro),
            SectorLevel::SubMicro => Some(SectorLevel::SuperNano),
            SectorLevel::SuperNano => None,
        }
    }

    /// Subdivisions per axis of the coarser level (1 for small sectors)
    pub fn subdivisions(self) -> i32 {
        match self.coarser() {
            Some(parent) => parent.span() / self.span(),
            None => 1,
        }
    }

    /// Sectors of this level inside one sector of the coarser level
    pub fn cells_per_parent(self) -> usize {
        let n = self.subdivisions() as usize;
        n * n * n
    }

    /// Buffer category sized by this level's sector count
    pub fn category(self) -> BufferCategory {
        match self {
            SectorLevel::Small => BufferCategory::SmallSector,
            SectorLevel::Micro => BufferCategory::MicroSector,
            SectorLevel::SubMicro => BufferCategory::SubMicroSector,
            SectorLevel::SuperNano => BufferCategory::SuperNanoSector,
        }
    }

    /// Coordinate, in units of this level, of the sector holding a super-nano cell
    pub fn coord_of(self, cell: IVec3) -> IVec3 {
        cell.div_euclid(IVec3::splat(self.span()))
    }

    /// Position of a sector inside its parent, `x + n*y + n*n*z`
    pub fn local_cell(self, coord: IVec3) -> u32 {
        let n = self.subdivisions();
        let local = coord.rem_euclid(IVec3::splat(n));
        (local.x + n * (local.y + n * local.z)) as u32
    }

    pub fn min_corner(self, coord: IVec3) -> Vec3 {
        coord.as_vec3() * self.size()
    }

    pub fn center(self, coord: IVec3) -> Vec3 {
        (coord.as_vec3() + 0.5) * self.size()
    }
}

/// Super-nano cell holding `point`
pub fn quantize(point: Vec3) -> IVec3 {
    (point * CELLS_PER_METER).floor().as_ivec3()
}
