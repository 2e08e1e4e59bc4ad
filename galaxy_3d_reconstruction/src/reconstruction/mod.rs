//! Per-frame reconstruction pipeline: sort, duplicate removal, matching and
//! promotion of the new mesh to the retained baseline

mod mesh;
mod reconstructor;
mod snapshot;

pub use mesh::{ReducedMesh, Rgba8};
pub use reconstructor::{FrameOutput, FrameStats, SceneReconstructor};
pub use snapshot::{DoubleBuffered, MeshSnapshot};
