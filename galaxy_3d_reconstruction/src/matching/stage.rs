/// Matcher stages and the transition function between them.

use std::fmt;

/// Stage of the per-frame matching protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStage {
    /// Vertex correspondence within the match tolerance
    FirstMatch,
    /// Color similarity against old super-nano, then micro sectors
    SecondMatch,
    /// Coarse color similarity against aggregates rebuilt from the old mesh
    ThirdMatch,
    /// Every triangle starts over from its observation
    Replace,
}

/// What the matcher knows after finishing a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchProgress {
    pub triangle_count: usize,
    /// Triangles without a match so far
    pub unmatched: usize,
    /// Set once the second match has evaluated the gate
    pub third_match_gate: bool,
}

impl MatchProgress {
    pub fn new(triangle_count: usize) -> Self {
        Self {
            triangle_count,
            unmatched: triangle_count,
            third_match_gate: false,
        }
    }
}

impl MatchStage {
    /// First stage of a frame.
    ///
    /// Matching needs sector hierarchies on both sides; without them the frame
    /// is a replacement.
    pub fn entry(has_old_sectors: bool, has_new_sectors: bool) -> Self {
        if has_old_sectors && has_new_sectors {
            MatchStage::FirstMatch
        } else {
            MatchStage::Replace
        }
    }

    /// Next stage after this one finished, `None` when the frame is done
    pub fn transition(self, progress: &MatchProgress) -> Option<MatchStage> {
        match self {
            MatchStage::FirstMatch if progress.unmatched > 0 => Some(MatchStage::SecondMatch),
            MatchStage::SecondMatch if progress.unmatched > 0 && progress.third_match_gate => {
                Some(MatchStage::ThirdMatch)
            }
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MatchStage::FirstMatch => "first match",
            MatchStage::SecondMatch => "second match",
            MatchStage::ThirdMatch => "third match",
            MatchStage::Replace => "replace",
        }
    }
}

impl fmt::Display for MatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
