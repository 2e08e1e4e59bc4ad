//! Grow-only capacity policy shared by every component that owns buffers.

use std::fmt;
use crate::error::{Error, Result};
use super::layered_buffer::{BufferLayer, LayeredBuffer};

/// Element category a managed buffer is sized by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferCategory {
    SmallSector,
    MicroSector,
    SubMicroSector,
    SuperNanoSector,
    Vertex,
    VertexMatch,
    Triangle,
}

impl BufferCategory {
    pub const ALL: [BufferCategory; 7] = [
        BufferCategory::SmallSector,
        BufferCategory::MicroSector,
        BufferCategory::SubMicroSector,
        BufferCategory::SuperNanoSector,
        BufferCategory::Vertex,
        BufferCategory::VertexMatch,
        BufferCategory::Triangle,
    ];

    /// Human readable name, used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            BufferCategory::SmallSector => "small sector",
            BufferCategory::MicroSector => "micro sector",
            BufferCategory::SubMicroSector => "sub-micro sector",
            BufferCategory::SuperNanoSector => "super-nano sector",
            BufferCategory::Vertex => "vertex",
            BufferCategory::VertexMatch => "vertex match",
            BufferCategory::Triangle => "triangle",
        }
    }
}

impl fmt::Display for BufferCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capacity hook exposed by every component that owns managed buffers
///
/// Callers request the element count they are about to write; the component
/// guarantees the backing storage is at least that large before returning.
pub trait CapacityManager {
    /// Grow every buffer of `category` to hold at least `capacity` elements.
    ///
    /// # Errors
    ///
    /// Returns `Error::CapacityExceeded` if `capacity` is above the category's
    /// configured limit, and `Error::InvalidResource` if this component owns
    /// no buffer of that category.
    fn ensure_buffer_capacity(&mut self, category: BufferCategory, capacity: usize) -> Result<()>;

    /// Current capacity of `category`, or `None` if not owned here
    fn buffer_capacity(&self, category: BufferCategory) -> Option<usize>;
}

/// Grow a layered buffer under a hard limit.
///
/// Returns `Ok(true)` when the buffer was reallocated. A request above
/// `limit` fails with `Error::CapacityExceeded` instead of truncating; the
/// caller decides how to recover, so the breach itself is only logged at debug.
pub fn grow_buffer<L: BufferLayer>(
    buffer: &mut LayeredBuffer<L>,
    category: BufferCategory,
    capacity: usize,
    limit: usize,
    source: &str,
) -> Result<bool> {
    if capacity > limit {
        crate::engine_debug!(source, "{} needs {} {} elements, limit is {}",
            buffer.label(), capacity, category, limit);
        return Err(Error::CapacityExceeded {
            category: category.name().to_string(),
            requested: capacity,
            limit,
        });
    }

    let previous = buffer.capacity();
    let grown = buffer.ensure_capacity(capacity, limit);
    if grown {
        crate::engine_debug!(source, "{} grown from {} to {} {} elements ({} bytes)",
            buffer.label(), previous, buffer.capacity(), category, buffer.byte_len());
    }
    Ok(grown)
}

#[cfg(test)]
#[path = "capacity_tests.rs"]
mod tests;
