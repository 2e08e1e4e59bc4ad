//! Removal of redundant and degenerate triangles after the scene sort

mod duplicate_remover;

pub use duplicate_remover::{DuplicateRemover, DuplicateReport};
