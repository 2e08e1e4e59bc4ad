use glam::Vec3;

/// Accumulated color of a triangle and how many observations back it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleAppearance {
    /// RGB on the 0..255 scale
    pub color: Vec3,
    pub confidence: u32,
}

impl TriangleAppearance {
    /// Fresh appearance from a single observation
    pub fn observed(observation: Vec3) -> Self {
        Self { color: observation, confidence: 1 }
    }

    /// Fold a new observation into the accumulated color.
    ///
    /// The old color weighs `confidence` observations, the new one weighs
    /// one; confidence saturates at `max_confidence`.
    pub fn blend(&self, observation: Vec3, max_confidence: u32) -> Self {
        let weight = self.confidence as f32;
        Self {
            color: (self.color * weight + observation) / (weight + 1.0),
            confidence: self.confidence.saturating_add(1).min(max_confidence),
        }
    }
}

impl Default for TriangleAppearance {
    fn default() -> Self {
        Self::observed(Vec3::ZERO)
    }
}
