use super::stage::MatchStage;

/// Link from a new triangle to the old triangle it continues.
///
/// Frame-scoped: consumed by the appearance blend, then dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchRecord {
    #[default]
    Unmatched,
    Matched {
        old_triangle: u32,
        stage: MatchStage,
        /// New corner `k` continues old corner `(k + rotation) % 3`
        rotation: u8,
    },
}

impl MatchRecord {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchRecord::Matched { .. })
    }

    pub fn old_triangle(&self) -> Option<u32> {
        match self {
            MatchRecord::Matched { old_triangle, .. } => Some(*old_triangle),
            MatchRecord::Unmatched => None,
        }
    }

    pub fn stage(&self) -> Option<MatchStage> {
        match self {
            MatchRecord::Matched { stage, .. } => Some(*stage),
            MatchRecord::Unmatched => None,
        }
    }
}
