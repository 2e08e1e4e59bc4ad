//! Cross-frame triangle matching: escalating stages that carry accumulated
//! appearance from the previous frame's mesh to the new one

mod appearance;
mod mesh_matcher;
mod record;
mod stage;

pub use appearance::TriangleAppearance;
pub use mesh_matcher::{MatchOutcome, MatchStats, MeshMatcher};
pub use record::MatchRecord;
pub use stage::{MatchProgress, MatchStage};

#[cfg(test)]
#[path = "matching_tests.rs"]
mod tests;
