//! Sector hierarchy data model: levels, hashes, octree and per-level tables

mod hash;
mod hierarchy;
mod level;
mod octree;
mod table;

pub use hash::{HashEntry, SectorHash};
pub use hierarchy::SectorHierarchy;
pub use level::{quantize, SectorLevel, CELLS_PER_METER, MAX_COORDINATE, SMALL_SECTOR_SIZE};
pub use octree::{ArrayElement, ChildMask, OctreeNode, SectorOctree, NONE};
pub use table::{decode_color_sum, encode_color, SectorTable, COLOR_SCALE};

#[cfg(test)]
#[path = "sector_tests.rs"]
mod tests;
