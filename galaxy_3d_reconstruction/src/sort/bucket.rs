//! Counting-sort bucketing shared by every sort pass.

use std::sync::atomic::Ordering;
use rayon::prelude::*;
use crate::buffer::{BufferLayer, LayeredBuffer};
use crate::error::Result;

/// Layers of the per-pass cell buffer, one element per candidate cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CellLayer {
    /// Items that fell into the cell
    Counts,
    /// Compact bucket id of a non-empty cell
    BucketIds,
}

impl BufferLayer for CellLayer {
    const LABEL: &'static str = "Scene Sorter Cell Buffer";
    const ALL: &'static [Self] = &[Self::Counts, Self::BucketIds];

    fn index(self) -> usize {
        self as usize
    }

    fn byte_size(self, capacity: usize) -> usize {
        capacity * std::mem::size_of::<u32>()
    }
}

/// Non-empty cells of one pass, in parent-major cell order
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Buckets {
    /// Bucket of every item
    pub item_bucket: Vec<u32>,
    pub parent: Vec<u32>,
    pub cell: Vec<u32>,
    pub count: Vec<u32>,
}

impl Buckets {
    pub fn len(&self) -> usize {
        self.count.len()
    }
}

/// Group items by `(parent, cell)`.
///
/// Occupancy is counted with atomic adds, then a sequential scan hands out
/// bucket ids to non-empty cells in `parent * cells_per_parent + cell` order.
/// Ids are therefore deterministic and children of one parent are
/// contiguous. `buffer` must already hold `parent_count * cells_per_parent`
/// cells.
pub(crate) fn bucket(
    buffer: &mut LayeredBuffer<CellLayer>,
    parents: &[u32],
    cells: &[u32],
    parent_count: usize,
    cells_per_parent: usize,
) -> Result<Buckets> {
    let required = parent_count * cells_per_parent;
    buffer.fill(CellLayer::Counts, 0..required, 0u32)?;

    {
        let atomics = buffer.atomic_layers();
        let counts = atomics.layer(CellLayer::Counts);
        parents.par_iter().zip(cells.par_iter()).for_each(|(&parent, &cell)| {
            let slot = parent as usize * cells_per_parent + cell as usize;
            counts[slot].fetch_add(1, Ordering::Relaxed);
        });
    }

    let (counts, ids) = buffer.two_layers_mut::<u32, u32>(CellLayer::Counts, CellLayer::BucketIds)?;
    let mut buckets = Buckets::default();
    for slot in 0..required {
        let count = counts[slot];
        if count > 0 {
            ids[slot] = buckets.count.len() as u32;
            buckets.parent.push((slot / cells_per_parent) as u32);
            buckets.cell.push((slot % cells_per_parent) as u32);
            buckets.count.push(count);
        }
    }

    let ids: &[u32] = ids;
    buckets.item_bucket = parents
        .par_iter()
        .zip(cells.par_iter())
        .map(|(&parent, &cell)| ids[parent as usize * cells_per_parent + cell as usize])
        .collect();

    Ok(buckets)
}
