//! Four-pass spatial sort of a frame's triangles into the sector hierarchy

mod bucket;
mod scene_sorter;

pub use scene_sorter::{SceneSorter, SortProgress};
