/*!
# Galaxy 3D Reconstruction

Spatial sorting and cross-frame mesh matching for live scene reconstruction.

Every frame, a reduced triangle mesh from the mesh-reduction stage is sorted
into a four-level sector hierarchy, cleaned of duplicate triangles and matched
against the previous frame's mesh so accumulated appearance carries over.

## Architecture

- **SceneSorter**: four sort passes building the sector hierarchy
- **DuplicateRemover**: vertex welding, degenerate and duplicate triangle removal
- **MeshMatcher**: escalating first/second/third match with replacement fallback
- **SceneReconstructor**: per-frame pipeline over a double-buffered baseline
- **LayeredBuffer / CapacityManager**: grow-only pass storage with per-category limits
*/

// Internal modules
mod error;
mod engine;
mod config;
pub mod log;
pub mod buffer;
pub mod sector;
pub mod sort;
pub mod duplicate;
pub mod matching;
pub mod reconstruction;
pub mod utils;

// Main galaxy3d namespace module
pub mod galaxy3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine singleton
    pub use crate::engine::Engine;

    // Session configuration
    pub use crate::config::{BufferCapacities, ReconstructionConfig};

    // Frame pipeline
    pub use crate::reconstruction::{FrameOutput, FrameStats, ReducedMesh, Rgba8, SceneReconstructor};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
        // Note: engine_* macros are NOT re-exported here - they are internal only
    }

    pub mod buffer {
        pub use crate::buffer::*;
    }

    pub mod sector {
        pub use crate::sector::*;
    }

    pub mod sort {
        pub use crate::sort::*;
    }

    pub mod duplicate {
        pub use crate::duplicate::*;
    }

    pub mod matching {
        pub use crate::matching::*;
    }

    pub mod reconstruction {
        pub use crate::reconstruction::*;
    }

    pub mod utils {
        pub use crate::utils::PendingResult;
    }
}

// Re-export math library at crate root
pub use glam;
