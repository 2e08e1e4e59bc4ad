//! Reconstruction session configuration

use crate::buffer::BufferCategory;
use crate::error::{Error, Result};
use crate::sector::SMALL_SECTOR_SIZE;

/// Element counts per buffer category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCapacities {
    pub small_sector: usize,
    /// Micro sector buffers also hold the 512 candidate cells of every small sector
    pub micro_sector: usize,
    pub sub_micro_sector: usize,
    pub super_nano_sector: usize,
    pub vertex: usize,
    pub vertex_match: usize,
    pub triangle: usize,
}

impl BufferCapacities {
    pub fn get(&self, category: BufferCategory) -> usize {
        match category {
            BufferCategory::SmallSector => self.small_sector,
            BufferCategory::MicroSector => self.micro_sector,
            BufferCategory::SubMicroSector => self.sub_micro_sector,
            BufferCategory::SuperNanoSector => self.super_nano_sector,
            BufferCategory::Vertex => self.vertex,
            BufferCategory::VertexMatch => self.vertex_match,
            BufferCategory::Triangle => self.triangle,
        }
    }

    pub fn set(&mut self, category: BufferCategory, capacity: usize) {
        let slot = match category {
            BufferCategory::SmallSector => &mut self.small_sector,
            BufferCategory::MicroSector => &mut self.micro_sector,
            BufferCategory::SubMicroSector => &mut self.sub_micro_sector,
            BufferCategory::SuperNanoSector => &mut self.super_nano_sector,
            BufferCategory::Vertex => &mut self.vertex,
            BufferCategory::VertexMatch => &mut self.vertex_match,
            BufferCategory::Triangle => &mut self.triangle,
        };
        *slot = capacity;
    }

    /// Starting allocation of a fresh session
    pub fn initial() -> Self {
        Self {
            small_sector: 16,
            micro_sector: 16 * 512,
            sub_micro_sector: 4096,
            super_nano_sector: 32768,
            vertex: 32768,
            vertex_match: 32768,
            triangle: 65536,
        }
    }

    /// Hard ceilings; the small sector limit is the largest representable sector count
    pub fn limits() -> Self {
        Self {
            small_sector: 1 << 16,
            micro_sector: 1 << 24,
            sub_micro_sector: 1 << 24,
            super_nano_sector: 1 << 24,
            vertex: 1 << 24,
            vertex_match: 1 << 25,
            triangle: 1 << 24,
        }
    }
}

/// Configuration of a reconstruction session
#[derive(Debug, Clone)]
pub struct ReconstructionConfig {
    /// First match: largest distance (meters) between matched vertices, at most one small sector
    pub match_tolerance: f32,
    /// Second match: largest RGB distance (0..255) to the mean color of the old
    /// super-nano sector, or failing that the old micro sector, with the triangle's hash
    pub color_tolerance: f32,
    /// Third match: largest RGB distance against aggregates rebuilt from the old mesh
    pub coarse_color_tolerance: f32,
    /// Duplicate remover: vertices closer than one cell of this size are welded
    pub weld_resolution: f32,
    /// Cap on the blend weight of accumulated appearance
    pub max_confidence: u32,
    /// Minimum number of new micro sectors that opens the third-match gate
    pub third_match_sector_growth: u32,
    pub initial_capacities: BufferCapacities,
    pub capacity_limits: BufferCapacities,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            match_tolerance: 2.4 / 256.0,
            color_tolerance: 24.0,
            coarse_color_tolerance: 48.0,
            weld_resolution: 1.0 / 1024.0,
            max_confidence: 255,
            third_match_sector_growth: 1,
            initial_capacities: BufferCapacities::initial(),
            capacity_limits: BufferCapacities::limits(),
        }
    }
}

impl ReconstructionConfig {
    /// Check every field before a session is built from this configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InitializationFailed` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let tolerances = [
            ("match_tolerance", self.match_tolerance),
            ("color_tolerance", self.color_tolerance),
            ("coarse_color_tolerance", self.coarse_color_tolerance),
            ("weld_resolution", self.weld_resolution),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InitializationFailed(format!(
                    "{} must be finite and positive, got {}", name, value
                )));
            }
        }

        if self.match_tolerance > SMALL_SECTOR_SIZE {
            return Err(Error::InitializationFailed(format!(
                "match_tolerance must not exceed a small sector ({} m), got {}",
                SMALL_SECTOR_SIZE, self.match_tolerance
            )));
        }

        if self.max_confidence == 0 {
            return Err(Error::InitializationFailed(
                "max_confidence must be at least 1".to_string()
            ));
        }

        for category in BufferCategory::ALL {
            let initial = self.initial_capacities.get(category);
            let limit = self.capacity_limits.get(category);
            if initial == 0 || initial > limit {
                return Err(Error::InitializationFailed(format!(
                    "initial {} capacity {} must be in 1..={}", category, initial, limit
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
