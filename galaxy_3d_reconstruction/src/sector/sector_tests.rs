//! Unit tests for the sector data model
//!
//! Tests quantization, hash packing, the octree and per-level tables.

use super::*;
use glam::{IVec3, UVec3, Vec3};

// ============================================================================
// LEVEL TESTS
// ============================================================================

#[test]
fn test_level_sizes() {
    assert_eq!(SectorLevel::Small.size(), 2.0);
    assert_eq!(SectorLevel::Micro.size(), 0.25);
    assert_eq!(SectorLevel::SubMicro.size(), 0.125);
    assert_eq!(SectorLevel::SuperNano.size(), 0.0625);
}

#[test]
fn test_cells_per_parent() {
    assert_eq!(SectorLevel::Small.cells_per_parent(), 1);
    assert_eq!(SectorLevel::Micro.cells_per_parent(), 512);
    assert_eq!(SectorLevel::SubMicro.cells_per_parent(), 8);
    assert_eq!(SectorLevel::SuperNano.cells_per_parent(), 8);
}

#[test]
fn test_level_navigation() {
    assert_eq!(SectorLevel::Small.coarser(), None);
    assert_eq!(SectorLevel::Micro.coarser(), Some(SectorLevel::Small));
    assert_eq!(SectorLevel::SubMicro.finer(), Some(SectorLevel::SuperNano));
    assert_eq!(SectorLevel::SuperNano.finer(), None);
    for level in SectorLevel::ALL {
        assert_eq!(SectorLevel::from_index(level.index()), Some(level));
    }
}

#[test]
fn test_quantize_negative_coordinates_floor() {
    assert_eq!(quantize(Vec3::new(0.0, 0.01, 0.0625)), IVec3::new(0, 0, 1));
    assert_eq!(quantize(Vec3::new(-0.01, -0.0625, -0.07)), IVec3::new(-1, -1, -2));
}

#[test]
fn test_coord_of_is_nested() {
    let cell = quantize(Vec3::new(-3.3, 1.9, 0.2));
    let small = SectorLevel::Small.coord_of(cell);
    let micro = SectorLevel::Micro.coord_of(cell);
    let sub_micro = SectorLevel::SubMicro.coord_of(cell);

    assert_eq!(small, IVec3::new(-2, 0, 0));
    assert_eq!(micro.div_euclid(IVec3::splat(8)), small);
    assert_eq!(sub_micro.div_euclid(IVec3::splat(2)), micro);
    assert_eq!(cell.div_euclid(IVec3::splat(2)), sub_micro);
}

#[test]
fn test_local_cell_layout() {
    assert_eq!(SectorLevel::Micro.local_cell(IVec3::new(1, 0, 0)), 1);
    assert_eq!(SectorLevel::Micro.local_cell(IVec3::new(0, 1, 0)), 8);
    assert_eq!(SectorLevel::Micro.local_cell(IVec3::new(0, 0, 1)), 64);
    // Negative micro coord -1 is the last cell of small sector -1
    assert_eq!(SectorLevel::Micro.local_cell(IVec3::new(-1, -1, -1)), 511);
    assert_eq!(SectorLevel::SuperNano.local_cell(IVec3::new(3, 2, 5)), 1 + 0 + 4);
}

#[test]
fn test_level_corner_and_center() {
    let coord = IVec3::new(1, -1, 0);
    assert_eq!(SectorLevel::Small.min_corner(coord), Vec3::new(2.0, -2.0, 0.0));
    assert_eq!(SectorLevel::Small.center(coord), Vec3::new(3.0, -1.0, 1.0));
}

// ============================================================================
// HASH TESTS
// ============================================================================

#[test]
fn test_hash_decodes_level_and_coord() {
    let coord = IVec3::new(-5, 123, -70000);
    let hash = SectorHash::new(SectorLevel::SubMicro, coord);
    assert_eq!(hash.level(), SectorLevel::SubMicro);
    assert_eq!(hash.coord(), coord);
    assert_eq!(SectorHash::from_value(hash.value()), hash);
}

#[test]
fn test_hash_distinguishes_levels() {
    let coord = IVec3::new(1, 2, 3);
    assert_ne!(SectorHash::new(SectorLevel::Micro, coord), SectorHash::new(SectorLevel::SubMicro, coord));
}

#[test]
fn test_hash_is_stable_under_noise() {
    // Sub-cell noise inside one super-nano cell hashes identically
    let a = SectorHash::of_point(SectorLevel::SuperNano, Vec3::new(0.101, 0.52, -0.33));
    let b = SectorHash::of_point(SectorLevel::SuperNano, Vec3::new(0.1012, 0.5203, -0.3301));
    assert_eq!(a, b);
}

#[test]
fn test_hash_parent_chain() {
    let point = Vec3::new(-0.9, 3.7, 0.05);
    let super_nano = SectorHash::of_point(SectorLevel::SuperNano, point);
    let sub_micro = super_nano.parent().unwrap();
    let micro = sub_micro.parent().unwrap();
    let small = micro.parent().unwrap();

    assert_eq!(sub_micro, SectorHash::of_point(SectorLevel::SubMicro, point));
    assert_eq!(micro, SectorHash::of_point(SectorLevel::Micro, point));
    assert_eq!(small, SectorHash::of_point(SectorLevel::Small, point));
    assert_eq!(small.parent(), None);
}

#[test]
fn test_hash_center() {
    let hash = SectorHash::of_point(SectorLevel::Small, Vec3::new(0.5, -0.5, 3.0));
    assert_eq!(hash.center(), Vec3::new(1.0, -1.0, 3.0));
}

#[test]
fn test_hash_entry_radix_sort_matches_std_sort() {
    let mut entries: Vec<HashEntry> = (0..500u32)
        .map(|i| HashEntry::new(((i as u64 * 2654435761) % 97) << 33 | (i as u64 % 7), i))
        .collect();
    let mut expected = entries.clone();
    expected.sort();

    HashEntry::sort(&mut entries);
    assert_eq!(entries, expected);
}

#[test]
fn test_hash_entry_equal_range_and_find() {
    let mut entries = vec![
        HashEntry::new(30, 0),
        HashEntry::new(10, 1),
        HashEntry::new(30, 2),
        HashEntry::new(20, 3),
    ];
    HashEntry::sort(&mut entries);

    let range = HashEntry::equal_range(&entries, 30);
    assert_eq!(range.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(HashEntry::find(&entries, 20), Some(3));
    assert_eq!(HashEntry::find(&entries, 25), None);
    assert!(HashEntry::equal_range(&entries, 99).is_empty());
}

// ============================================================================
// OCTREE TESTS
// ============================================================================

#[test]
fn test_world_octant_id() {
    assert_eq!(SectorOctree::world_octant_id(Vec3::new(1.0, 1.0, 1.0)), 0);
    assert_eq!(SectorOctree::world_octant_id(Vec3::new(1.0, 1.0, -1.0)), 1);
    assert_eq!(SectorOctree::world_octant_id(Vec3::new(1.0, -1.0, 1.0)), 2);
    assert_eq!(SectorOctree::world_octant_id(Vec3::new(-1.0, 1.0, 1.0)), 4);
    assert_eq!(SectorOctree::world_octant_id(Vec3::new(-1.0, -1.0, -1.0)), 7);
    // Zero belongs to the positive side
    assert_eq!(SectorOctree::world_octant_id(Vec3::ZERO), 0);
}

#[test]
fn test_world_octant_center_matches_id() {
    for octant in 0..8 {
        let center = SectorOctree::world_octant_center(octant, 4.0);
        assert_eq!(SectorOctree::world_octant_id(center), octant);
        assert_eq!(center.abs(), Vec3::splat(2.0));
    }
}

#[test]
fn test_point_octant_bit_layout() {
    let center = Vec3::ZERO;
    assert_eq!(SectorOctree::point_octant(center, Vec3::new(-1.0, -1.0, -1.0)), 0);
    assert_eq!(SectorOctree::point_octant(center, Vec3::new(1.0, -1.0, -1.0)), 1);
    assert_eq!(SectorOctree::point_octant(center, Vec3::new(-1.0, 1.0, -1.0)), 2);
    assert_eq!(SectorOctree::point_octant(center, Vec3::new(-1.0, -1.0, 1.0)), 4);
    assert_eq!(SectorOctree::point_octant(center, Vec3::ONE), 7);
}

/// Root of size 4 with one world octant (+,+,+) split into one 2 m leaf
fn two_level_octree() -> SectorOctree {
    let mut octree = SectorOctree::new(4.0);
    let octant = octree.add_child(0, 0, 3);
    let leaf = octree.add_child(octant, 7, 3);
    octree.set_sector(leaf, 0);
    octree
}

#[test]
fn test_add_child_geometry() {
    let octree = two_level_octree();
    assert_eq!(octree.len(), 3);

    let octant = octree.node(1).unwrap();
    assert_eq!(octant.center, Vec3::splat(2.0));
    assert_eq!(octant.half_extent, 2.0);
    assert!(octant.child_mask.contains(ChildMask::OCTANT_7));

    let leaf = octree.node(2).unwrap();
    assert_eq!(leaf.center, Vec3::splat(3.0));
    assert_eq!(leaf.size(), 2.0);
    assert!(leaf.is_leaf());
    assert_eq!(octree.root().children[0], 1);
    assert_eq!(octree.root().children[1], NONE);
}

#[test]
fn test_select_node_and_locate() {
    let octree = two_level_octree();
    assert_eq!(octree.select_node(&[]), Some(octree.root()));
    assert_eq!(octree.select_node(&[0, 7]).map(|n| n.center), Some(Vec3::splat(3.0)));
    assert!(octree.select_node(&[0, 6]).is_none());
    assert!(octree.select_node(&[9]).is_none());

    assert_eq!(octree.locate(Vec3::new(2.5, 3.9, 2.0)), Some(2));
    assert_eq!(octree.locate(Vec3::new(1.0, 1.0, 1.0)), None);
    assert_eq!(octree.locate(Vec3::new(9.0, 0.0, 0.0)), None);
}

#[test]
fn test_refresh_and_array() {
    let mut octree = two_level_octree();
    let table = SectorTable::new(
        SectorLevel::Small,
        vec![SectorHash::new(SectorLevel::Small, IVec3::new(1, 1, 1))],
        vec![2],
        vec![3],
        vec![UVec3::ZERO],
    );
    octree.refresh(&table, None);
    assert_eq!(octree.root().count, 3);
    assert_eq!(octree.root().offset, 0);

    let array = octree.array();
    assert_eq!(array.len(), 1);
    assert_eq!(array[0].path, vec![0, 7]);
    assert_eq!(array[0].sector, 0);
    assert_eq!(array[0].count, 3);

    // Sector dropped: leaf emptied and skipped
    octree.refresh(&table, Some(&[NONE][..]));
    assert_eq!(octree.root().count, 0);
    assert_eq!(octree.root().offset, NONE);
    assert!(octree.array().is_empty());
}

// ============================================================================
// TABLE TESTS
// ============================================================================

fn micro_table() -> SectorTable {
    let hashes = vec![
        SectorHash::new(SectorLevel::Micro, IVec3::new(5, 0, 0)),
        SectorHash::new(SectorLevel::Micro, IVec3::new(1, 0, 0)),
        SectorHash::new(SectorLevel::Micro, IVec3::new(3, 0, 0)),
    ];
    SectorTable::new(
        SectorLevel::Micro,
        hashes,
        vec![0, 0, 1],
        vec![2, 1, 3],
        vec![UVec3::splat(3200), UVec3::splat(1600), UVec3::ZERO],
    )
}

#[test]
fn test_table_offsets_are_prefix_sums() {
    let table = micro_table();
    assert_eq!(table.len(), 3);
    assert_eq!(table.triangle_range(0), 0..2);
    assert_eq!(table.triangle_range(1), 2..3);
    assert_eq!(table.triangle_range(2), 3..6);
}

#[test]
fn test_table_sorted_lookup() {
    let table = micro_table();
    let sorted: Vec<u32> = table.sorted().iter().map(|e| e.index).collect();
    assert_eq!(sorted, vec![1, 2, 0]);
    assert_eq!(table.find(SectorHash::new(SectorLevel::Micro, IVec3::new(3, 0, 0))), Some(2));
    assert!(!table.contains(SectorHash::new(SectorLevel::Micro, IVec3::new(4, 0, 0))));
}

#[test]
fn test_table_mean_color() {
    let table = micro_table();
    assert_eq!(table.mean_color(0), Some(Vec3::splat(100.0)));
    assert_eq!(table.mean_color(1), Some(Vec3::splat(100.0)));
}

#[test]
fn test_table_retain_drops_empty_and_remaps() {
    let mut table = micro_table();
    let remap = table.retain(&[2, 0, 1], &[UVec3::splat(3200), UVec3::ZERO, UVec3::splat(16)], Some(&[0, 0][..]));
    assert_eq!(remap, vec![0, u32::MAX, 1]);
    assert_eq!(table.len(), 2);
    assert_eq!(table.triangle_range(1), 2..3);
    assert_eq!(table.parent(1), 0);
    assert_eq!(table.mean_color(1), Some(Vec3::ONE));

    let sorted: Vec<u32> = table.sorted().iter().map(|e| e.index).collect();
    assert_eq!(sorted, vec![1, 0]);
    assert_eq!(table.find(SectorHash::new(SectorLevel::Micro, IVec3::new(1, 0, 0))), None);
}

#[test]
fn test_color_encoding() {
    let encoded = encode_color(Vec3::new(10.0, 255.0, 300.0));
    assert_eq!(encoded, UVec3::new(160, 4080, 4080));
    assert_eq!(decode_color_sum(encoded * 2, 2), Some(Vec3::new(10.0, 255.0, 255.0)));
    assert_eq!(decode_color_sum(UVec3::ZERO, 0), None);
}
