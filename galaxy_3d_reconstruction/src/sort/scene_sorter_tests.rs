//! Unit tests for SceneSorter
//!
//! Tests containment across levels, completeness of the triangle order,
//! world octant sizing, determinism and capacity handling.

use super::*;
use crate::config::BufferCapacities;
use crate::error::Error;
use crate::reconstruction::{ReducedMesh, Rgba8};
use crate::sector::{SectorHash, SectorLevel};
use glam::Vec3;

// ============================================================================
// Helpers
// ============================================================================

/// One tiny triangle per centroid, vertex color `gray`
fn mesh_at(centroids: &[Vec3], gray: u8) -> ReducedMesh {
    let mut mesh = ReducedMesh::default();
    for (i, &c) in centroids.iter().enumerate() {
        let base = (i * 3) as u32;
        mesh.vertices.push(c + Vec3::new(-0.01, -0.01, 0.0));
        mesh.vertices.push(c + Vec3::new(0.02, -0.01, 0.0));
        mesh.vertices.push(c + Vec3::new(-0.01, 0.02, 0.0));
        mesh.indices.push([base, base + 1, base + 2]);
        mesh.colors.extend([Rgba8::gray(gray); 3]);
    }
    mesh
}

fn sorter() -> SceneSorter {
    SceneSorter::new(&BufferCapacities::initial(), &BufferCapacities::limits())
}

fn scattered() -> Vec<Vec3> {
    vec![
        Vec3::new(0.1, 0.1, 0.1),
        Vec3::new(0.12, 0.1, 0.1),
        Vec3::new(1.5, 0.3, 0.9),
        Vec3::new(-0.4, 0.2, 0.1),
        Vec3::new(-3.7, -5.2, 0.6),
        Vec3::new(6.1, 2.2, -7.9),
        Vec3::new(0.26, 0.1, 0.1),
    ]
}

// ============================================================================
// Structure
// ============================================================================

#[test]
fn test_every_triangle_appears_once_in_order() {
    let mesh = mesh_at(&scattered(), 128);
    let hierarchy = sorter().execute_scene_sort(&mesh).unwrap();

    let mut order = hierarchy.triangle_order().to_vec();
    order.sort();
    assert_eq!(order, (0..mesh.triangle_count() as u32).collect::<Vec<_>>());
}

#[test]
fn test_sectors_are_nested() {
    let mesh = mesh_at(&scattered(), 128);
    let hierarchy = sorter().execute_scene_sort(&mesh).unwrap();

    for triangle in 0..mesh.triangle_count() as u32 {
        let centroid = mesh.centroid(triangle as usize);
        for level in SectorLevel::ALL {
            let hash = hierarchy.sector_hash_of(level, triangle);
            assert_eq!(hash, SectorHash::of_point(level, centroid), "{} level", level.name());
            if let Some(coarser) = level.coarser() {
                assert_eq!(hash.parent(), Some(hierarchy.sector_hash_of(coarser, triangle)));
                let sector = hierarchy.sector_of(level, triangle);
                assert_eq!(
                    hierarchy.table(level).parent(sector),
                    hierarchy.sector_of(coarser, triangle)
                );
            }
        }
    }
}

#[test]
fn test_sector_ranges_hold_their_triangles() {
    let mesh = mesh_at(&scattered(), 128);
    let hierarchy = sorter().execute_scene_sort(&mesh).unwrap();

    for level in SectorLevel::ALL {
        let table = hierarchy.table(level);
        let total: u32 = table.counts().iter().sum();
        assert_eq!(total as usize, mesh.triangle_count());
        for sector in 0..table.len() as u32 {
            for &triangle in hierarchy.triangles_in(level, sector) {
                assert_eq!(hierarchy.sector_of(level, triangle), sector);
            }
        }
    }
}

#[test]
fn test_sector_counts_per_level() {
    // Triangles 0 and 1 share a super-nano sector, 6 shares their small sector only
    let mesh = mesh_at(&scattered(), 128);
    let hierarchy = sorter().execute_scene_sort(&mesh).unwrap();

    assert_eq!(hierarchy.sector_count(SectorLevel::Small), 4);
    assert_eq!(hierarchy.sector_count(SectorLevel::SuperNano), 6);
    assert_eq!(
        hierarchy.sector_of(SectorLevel::SuperNano, 0),
        hierarchy.sector_of(SectorLevel::SuperNano, 1)
    );
    assert_eq!(
        hierarchy.sector_of(SectorLevel::Small, 0),
        hierarchy.sector_of(SectorLevel::Small, 6)
    );
    assert_ne!(
        hierarchy.sector_of(SectorLevel::Micro, 0),
        hierarchy.sector_of(SectorLevel::Micro, 6)
    );
}

#[test]
fn test_small_sectors_match_octree_leaves() {
    let mesh = mesh_at(&scattered(), 128);
    let hierarchy = sorter().execute_scene_sort(&mesh).unwrap();
    let leaves = hierarchy.array();

    assert_eq!(leaves.len(), hierarchy.sector_count(SectorLevel::Small));
    for leaf in &leaves {
        assert_eq!(leaf.half_extent, 1.0);
        let table = hierarchy.table(SectorLevel::Small);
        assert_eq!(table.count(leaf.sector), leaf.count);
        assert_eq!(table.hash(leaf.sector), SectorHash::of_point(SectorLevel::Small, leaf.center));
    }

    let node = hierarchy.octree().locate(Vec3::new(-3.7, -5.2, 0.6)).unwrap();
    let sector = hierarchy.octree().nodes()[node as usize].sector;
    assert_eq!(sector, hierarchy.sector_of(SectorLevel::Small, 4));
}

#[test]
fn test_mean_colors_are_aggregated() {
    let mut mesh = mesh_at(&[Vec3::new(0.1, 0.1, 0.1), Vec3::new(0.11, 0.1, 0.1)], 0);
    for color in &mut mesh.colors[3..] {
        *color = Rgba8::gray(100);
    }
    let hierarchy = sorter().execute_scene_sort(&mesh).unwrap();

    for level in SectorLevel::ALL {
        let table = hierarchy.table(level);
        assert_eq!(table.len(), 1);
        assert_eq!(table.mean_color(0), Some(Vec3::splat(50.0)));
    }
    assert_eq!(hierarchy.triangle_color(1), Vec3::splat(100.0));
}

// ============================================================================
// World octants
// ============================================================================

#[test]
fn test_world_octant_size_doubles_past_extent() {
    let mut sorter = sorter();

    let progress = sorter.first_sort(&mesh_at(&[Vec3::new(0.5, 0.5, 0.5)], 0)).unwrap();
    assert_eq!(progress.world_octant_size(), 2.0);

    let progress = sorter.first_sort(&mesh_at(&[Vec3::new(2.5, 0.0, 0.0)], 0)).unwrap();
    assert_eq!(progress.world_octant_size(), 4.0);

    let progress = sorter.first_sort(&mesh_at(&[Vec3::new(0.0, -9.0, 0.0)], 0)).unwrap();
    assert_eq!(progress.world_octant_size(), 16.0);
}

#[test]
fn test_second_sort_subdivides_to_small_sectors() {
    let mut sorter = sorter();
    let mesh = mesh_at(&[Vec3::new(-6.5, 3.0, 1.0)], 0);

    let mut progress = sorter.first_sort(&mesh).unwrap();
    assert_eq!(progress.sector_count(SectorLevel::Small), None);
    sorter.second_sort(&mut progress).unwrap();

    // 8 m octants need two halvings to reach 2 m
    assert_eq!(progress.world_octant_size(), 8.0);
    assert_eq!(progress.subdivisions(), 2);
    assert_eq!(progress.sector_count(SectorLevel::Small), Some(1));
    assert_eq!(progress.sector_count(SectorLevel::Micro), Some(1));
}

#[test]
fn test_passes_out_of_order_fail() {
    let mut sorter = sorter();
    let mesh = mesh_at(&scattered(), 0);

    let mut progress = sorter.first_sort(&mesh).unwrap();
    assert!(sorter.third_sort(&mut progress, &mesh).is_err());

    sorter.second_sort(&mut progress).unwrap();
    assert!(sorter.second_sort(&mut progress).is_err());
    assert!(sorter.fourth_sort(progress).is_err());
}

// ============================================================================
// Edge cases
// ============================================================================

#[test]
fn test_empty_mesh_yields_empty_hierarchy() {
    let hierarchy = sorter().execute_scene_sort(&ReducedMesh::default()).unwrap();

    assert_eq!(hierarchy.triangle_count(), 0);
    for level in SectorLevel::ALL {
        assert_eq!(hierarchy.sector_count(level), 0);
    }
    assert!(hierarchy.array().is_empty());
    assert_eq!(hierarchy.world_octant_size(), 2.0);
}

#[test]
fn test_sort_is_deterministic() {
    let mesh = mesh_at(&scattered(), 77);
    let mut sorter = sorter();

    let first = sorter.execute_scene_sort(&mesh).unwrap();
    let second = sorter.execute_scene_sort(&mesh).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_boundary_centroid_goes_to_upper_sector() {
    // Centroid lands exactly on x = 0.25, the first micro boundary
    let mesh = ReducedMesh::new(
        vec![Vec3::new(0.25, 0.0, 0.0), Vec3::new(0.5, 0.0, 0.0), Vec3::ZERO],
        vec![[0, 1, 2]],
        vec![Rgba8::gray(0); 3],
    );
    let hierarchy = sorter().execute_scene_sort(&mesh).unwrap();

    assert_eq!(hierarchy.sector_hash_of(SectorLevel::Micro, 0).coord(), glam::IVec3::new(1, 0, 0));
    assert_eq!(hierarchy.sector_hash_of(SectorLevel::Small, 0).coord(), glam::IVec3::ZERO);
}

// ============================================================================
// Capacity
// ============================================================================

#[test]
fn test_buffers_grow_with_the_frame() {
    let mut initial = BufferCapacities::initial();
    initial.triangle = 2;
    initial.super_nano_sector = 2;
    let mut sorter = SceneSorter::new(&initial, &BufferCapacities::limits());

    let hierarchy = sorter.execute_scene_sort(&mesh_at(&scattered(), 0)).unwrap();
    assert_eq!(hierarchy.triangle_count(), 7);
    assert!(sorter.buffer_capacity(BufferCategory::Triangle).unwrap() >= 7);
    assert!(sorter.buffer_capacity(BufferCategory::SuperNanoSector).unwrap() >= 6);
    assert!(sorter.take_growth_events() >= 2);
    assert_eq!(sorter.take_growth_events(), 0);
}

#[test]
fn test_too_many_sectors_exceed_capacity() {
    let mut limits = BufferCapacities::limits();
    limits.super_nano_sector = 4;
    let mut initial = BufferCapacities::initial();
    initial.super_nano_sector = 2;
    let mut sorter = SceneSorter::new(&initial, &limits);

    match sorter.execute_scene_sort(&mesh_at(&scattered(), 0)) {
        Err(Error::CapacityExceeded { category, requested, limit }) => {
            assert_eq!(category, "super-nano sector");
            assert_eq!(requested, 6);
            assert_eq!(limit, 4);
        }
        other => panic!("expected CapacityExceeded, got {:?}", other),
    }
    assert_eq!(sorter.buffer_capacity(BufferCategory::SuperNanoSector), Some(2));
}

#[test]
fn test_foreign_category_is_rejected() {
    let mut sorter = sorter();
    assert!(sorter.ensure_buffer_capacity(BufferCategory::Vertex, 4).is_err());
    assert_eq!(sorter.buffer_capacity(BufferCategory::VertexMatch), None);
}
