//! Frame-scoped scratch storage
//!
//! Passes that need temporary per-sector marks acquire a zeroed `u32` slice
//! from the pool and address it through a versioned key. Starting a new frame
//! removes every key, so a handle kept across frames is detected as stale
//! instead of silently reading another pass's marks. Backing vectors are
//! recycled, so steady-state frames do not allocate.

use slotmap::{new_key_type, SlotMap};
use crate::error::Result;
use crate::engine_bail;

new_key_type! {
    /// Versioned handle to a frame-scoped scratch slice
    pub struct ScratchKey;
}

pub struct ScratchPool {
    live: SlotMap<ScratchKey, Vec<u32>>,
    free: Vec<Vec<u32>>,
    frame: u64,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self {
            live: SlotMap::with_key(),
            free: Vec::new(),
            frame: 0,
        }
    }

    /// Invalidate every key handed out so far and recycle their storage
    pub fn begin_frame(&mut self) {
        let free = &mut self.free;
        free.extend(self.live.drain().map(|(_, storage)| storage));
        self.frame += 1;
    }

    /// Number of `begin_frame` calls so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Acquire `len` zeroed words valid until the next `begin_frame`
    pub fn acquire(&mut self, len: usize) -> ScratchKey {
        // Prefer the smallest recycled vector that already fits
        let best = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, storage)| storage.capacity() >= len)
            .min_by_key(|(_, storage)| storage.capacity())
            .map(|(index, _)| index);

        let mut storage = match best {
            Some(index) => self.free.swap_remove(index),
            None => self.free.pop().unwrap_or_default(),
        };
        storage.clear();
        storage.resize(len, 0);
        self.live.insert(storage)
    }

    pub fn get(&self, key: ScratchKey) -> Result<&[u32]> {
        match self.live.get(key) {
            Some(storage) => Ok(storage.as_slice()),
            None => engine_bail!("galaxy3d::ScratchPool",
                "Stale scratch key {:?} (frame {})", key, self.frame),
        }
    }

    pub fn get_mut(&mut self, key: ScratchKey) -> Result<&mut [u32]> {
        let frame = self.frame;
        match self.live.get_mut(key) {
            Some(storage) => Ok(storage.as_mut_slice()),
            None => engine_bail!("galaxy3d::ScratchPool",
                "Stale scratch key {:?} (frame {})", key, frame),
        }
    }

    /// Give a slice back before the frame ends
    pub fn release(&mut self, key: ScratchKey) {
        if let Some(storage) = self.live.remove(key) {
            self.free.push(storage);
        }
    }

    /// Live slices this frame
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Recycled vectors waiting for reuse
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "scratch_pool_tests.rs"]
mod tests;
