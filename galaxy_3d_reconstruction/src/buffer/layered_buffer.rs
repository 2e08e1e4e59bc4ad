/// Layered buffer: one allocation split into named, typed layers.
///
/// Each layer's size is a function of the buffer capacity (an element count
/// chosen by the owner: sectors, vertices, triangles, ...). Layers are
/// addressed by enum value, never by raw byte offset, and viewed as typed
/// slices through `bytemuck`.
///
/// Growth preserves what was written to every layer and zeroes the new
/// tail, so a larger capacity never invalidates lower indices.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::atomic::AtomicU32;
use bytemuck::Pod;
use crate::error::Result;
use crate::engine_bail;
use crate::utils::as_atomic_u32;

/// Every layer starts on an 8-byte boundary (the backing word size)
const LAYER_ALIGNMENT: usize = 8;

/// Describes the layers of a [`LayeredBuffer`]
pub trait BufferLayer: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Debug label of buffers built from these layers
    const LABEL: &'static str;

    /// Every layer, in storage order
    const ALL: &'static [Self];

    /// Position of this layer in [`BufferLayer::ALL`]
    fn index(self) -> usize;

    /// Bytes this layer occupies for `capacity` elements
    fn byte_size(self, capacity: usize) -> usize;
}

/// Typed, capacity-tracked storage split into layers
pub struct LayeredBuffer<L: BufferLayer> {
    capacity: usize,
    /// Byte offset of each layer, indexed by `BufferLayer::index`
    offsets: Vec<usize>,
    words: Vec<u64>,
    _layers: PhantomData<L>,
}

impl<L: BufferLayer> LayeredBuffer<L> {
    /// Allocate a zeroed buffer for `capacity` elements
    pub fn new(capacity: usize) -> Self {
        let (offsets, size) = Self::layout(capacity);
        Self {
            capacity,
            offsets,
            words: vec![0; size / LAYER_ALIGNMENT],
            _layers: PhantomData,
        }
    }

    fn layout(capacity: usize) -> (Vec<usize>, usize) {
        let mut offsets = Vec::with_capacity(L::ALL.len());
        let mut size = 0;
        for layer in L::ALL {
            offsets.push(size);
            size += layer.byte_size(capacity).next_multiple_of(LAYER_ALIGNMENT);
        }
        (offsets, size)
    }

    /// Current capacity in elements
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Debug label shared by all buffers of this layer type
    pub fn label(&self) -> &'static str {
        L::LABEL
    }

    /// Total allocation size in bytes
    pub fn byte_len(&self) -> usize {
        self.words.len() * LAYER_ALIGNMENT
    }

    /// Byte offset of a layer inside the allocation
    pub fn offset(&self, layer: L) -> usize {
        self.offsets[layer.index()]
    }

    /// Grow to at least `capacity` elements.
    ///
    /// The new capacity is the next power of two, clamped to `limit` (but never
    /// below `capacity`). Returns `true` if the buffer was reallocated.
    pub fn ensure_capacity(&mut self, capacity: usize, limit: usize) -> bool {
        if capacity <= self.capacity {
            return false;
        }
        let target = capacity.next_power_of_two().min(limit).max(capacity);
        self.change_capacity(target);
        true
    }

    /// Reallocate to exactly `capacity` elements, keeping the overlapping
    /// prefix of every layer and zeroing the rest.
    pub fn change_capacity(&mut self, capacity: usize) {
        let (offsets, size) = Self::layout(capacity);
        let mut words = vec![0u64; size / LAYER_ALIGNMENT];

        {
            let old_bytes: &[u8] = bytemuck::cast_slice(&self.words);
            let new_bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut words);
            let kept = self.capacity.min(capacity);

            for layer in L::ALL {
                let len = layer.byte_size(kept);
                let src = self.offsets[layer.index()];
                let dst = offsets[layer.index()];
                new_bytes[dst..dst + len].copy_from_slice(&old_bytes[src..src + len]);
            }
        }

        self.capacity = capacity;
        self.offsets = offsets;
        self.words = words;
    }

    fn layer_range(&self, layer: L) -> Range<usize> {
        let start = self.offsets[layer.index()];
        start..start + layer.byte_size(self.capacity)
    }

    fn cast<T: Pod>(bytes: &[u8], layer: L) -> Result<&[T]> {
        match bytemuck::try_cast_slice(bytes) {
            Ok(slice) => Ok(slice),
            Err(err) => engine_bail!("galaxy3d::LayeredBuffer",
                "{} layer {:?} cannot be viewed as {}: {:?}",
                L::LABEL, layer, std::any::type_name::<T>(), err),
        }
    }

    fn cast_mut<T: Pod>(bytes: &mut [u8], layer: L) -> Result<&mut [T]> {
        match bytemuck::try_cast_slice_mut(bytes) {
            Ok(slice) => Ok(slice),
            Err(err) => engine_bail!("galaxy3d::LayeredBuffer",
                "{} layer {:?} cannot be viewed as {}: {:?}",
                L::LABEL, layer, std::any::type_name::<T>(), err),
        }
    }

    /// View a layer as a typed slice covering the full capacity
    pub fn layer<T: Pod>(&self, layer: L) -> Result<&[T]> {
        let range = self.layer_range(layer);
        let bytes: &[u8] = bytemuck::cast_slice(&self.words);
        Self::cast(&bytes[range], layer)
    }

    /// View a layer as a mutable typed slice covering the full capacity
    pub fn layer_mut<T: Pod>(&mut self, layer: L) -> Result<&mut [T]> {
        let range = self.layer_range(layer);
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        Self::cast_mut(&mut bytes[range], layer)
    }

    /// Borrow two distinct layers mutably at the same time
    pub fn two_layers_mut<T: Pod, U: Pod>(&mut self, a: L, b: L) -> Result<(&mut [T], &mut [U])> {
        if a == b {
            engine_bail!("galaxy3d::LayeredBuffer",
                "{} layer {:?} borrowed twice", L::LABEL, a);
        }

        let range_a = self.layer_range(a);
        let range_b = self.layer_range(b);
        let a_first = range_a.start < range_b.start;
        let (first, second) = if a_first { (range_a, range_b) } else { (range_b, range_a) };

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        let (low, high) = bytes.split_at_mut(second.start);
        let low = &mut low[first];
        let high = &mut high[..second.len()];
        let (bytes_a, bytes_b) = if a_first { (low, high) } else { (high, low) };

        Ok((Self::cast_mut(bytes_a, a)?, Self::cast_mut(bytes_b, b)?))
    }

    /// Set `range` of a layer to `value`
    pub fn fill<T: Pod>(&mut self, layer: L, range: Range<usize>, value: T) -> Result<()> {
        let capacity = self.capacity;
        let slice = self.layer_mut::<T>(layer)?;
        match slice.get_mut(range.clone()) {
            Some(elements) => {
                elements.fill(value);
                Ok(())
            }
            None => engine_bail!("galaxy3d::LayeredBuffer",
                "{} layer {:?}: fill range {:?} exceeds capacity {}",
                L::LABEL, layer, range, capacity),
        }
    }

    /// Shared atomic view of every layer, for parallel accumulation
    pub fn atomic_layers(&mut self) -> AtomicLayers<'_, L> {
        let Self { capacity, offsets, words, .. } = self;
        let words: &mut [u32] = bytemuck::cast_slice_mut(words.as_mut_slice());
        AtomicLayers {
            words: as_atomic_u32(words),
            offsets: offsets.as_slice(),
            capacity: *capacity,
            _layers: PhantomData,
        }
    }
}

/// Atomic `u32` view over a [`LayeredBuffer`]
///
/// Only meaningful for layers that store `u32` elements.
pub struct AtomicLayers<'a, L: BufferLayer> {
    words: &'a [AtomicU32],
    offsets: &'a [usize],
    capacity: usize,
    _layers: PhantomData<L>,
}

impl<'a, L: BufferLayer> AtomicLayers<'a, L> {
    /// Atomic slice of one layer
    pub fn layer(&self, layer: L) -> &'a [AtomicU32] {
        let start = self.offsets[layer.index()] / 4;
        let len = layer.byte_size(self.capacity) / 4;
        &self.words[start..start + len]
    }
}

#[cfg(test)]
#[path = "layered_buffer_tests.rs"]
mod tests;
