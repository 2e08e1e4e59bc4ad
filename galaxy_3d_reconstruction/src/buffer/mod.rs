//! Grow-only, layered storage for sector- and element-count dependent data.
//!
//! Every pass asks for its full requirement through
//! [`CapacityManager::ensure_buffer_capacity`] before writing, so a buffer is
//! never written past its end and never shrinks mid-session.

mod capacity;
mod layered_buffer;
mod scratch_pool;

pub use capacity::{BufferCategory, CapacityManager, grow_buffer};
pub use layered_buffer::{AtomicLayers, BufferLayer, LayeredBuffer};
pub use scratch_pool::{ScratchKey, ScratchPool};
