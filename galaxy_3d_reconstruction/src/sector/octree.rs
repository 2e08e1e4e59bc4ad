/// Sector octree - flat node array from world octants down to small sectors.
///
/// The root spans `[-S, S)^3` where `S` is the world octant size. Its eight
/// children are the world octants, indexed by world octant id
/// `(x<0)*4 + (y<0)*2 + (z<0)`. Below that, children are indexed by the
/// usual octant bit layout (bit0 = X, bit1 = Y, bit2 = Z, 1 = high half).
/// Leaves are 2 m nodes, each owning one small sector.
///
/// Nodes are stored parents-before-children, so a reverse scan visits every
/// child before its parent.

use bitflags::bitflags;
use glam::Vec3;
use super::table::SectorTable;

/// Marks "no child", "no sector" and "no triangle range"
pub const NONE: u32 = u32::MAX;

/// Index of the root node in the flat node array.
const ROOT: usize = 0;

bitflags! {
    /// Which of the eight child slots of a node are populated
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChildMask: u8 {
        const OCTANT_0 = 1 << 0;
        const OCTANT_1 = 1 << 1;
        const OCTANT_2 = 1 << 2;
        const OCTANT_3 = 1 << 3;
        const OCTANT_4 = 1 << 4;
        const OCTANT_5 = 1 << 5;
        const OCTANT_6 = 1 << 6;
        const OCTANT_7 = 1 << 7;
    }
}

impl ChildMask {
    pub fn octant(octant: usize) -> Self {
        Self::from_bits_truncate(1 << (octant & 7))
    }
}

/// A single node in the sector octree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OctreeNode {
    pub center: Vec3,
    pub half_extent: f32,
    /// Triangles below this node
    pub count: u32,
    /// First triangle of this node in the hierarchy's triangle order (`NONE` if empty)
    pub offset: u32,
    pub child_mask: ChildMask,
    /// Node index per child slot (`NONE` if absent)
    pub children: [u32; 8],
    /// Small sector id of a leaf (`NONE` for inner nodes and emptied leaves)
    pub sector: u32,
}

impl OctreeNode {
    fn new(center: Vec3, half_extent: f32) -> Self {
        Self {
            center,
            half_extent,
            count: 0,
            offset: NONE,
            child_mask: ChildMask::empty(),
            children: [NONE; 8],
            sector: NONE,
        }
    }

    pub fn size(&self) -> f32 {
        self.half_extent * 2.0
    }

    pub fn is_leaf(&self) -> bool {
        self.child_mask.is_empty()
    }

    pub fn min_corner(&self) -> Vec3 {
        self.center - Vec3::splat(self.half_extent)
    }

    pub fn max_corner(&self) -> Vec3 {
        self.center + Vec3::splat(self.half_extent)
    }
}

/// Flattened leaf used for traversal by downstream stages
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayElement {
    /// Child slot taken at each depth, starting below the root
    pub path: Vec<u8>,
    pub center: Vec3,
    pub half_extent: f32,
    pub count: u32,
    pub sector: u32,
}

/// Flat octree over the small sectors of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct SectorOctree {
    nodes: Vec<OctreeNode>,
}

impl SectorOctree {
    /// Create an octree with only a root spanning `[-world_octant_size, world_octant_size)`
    pub fn new(world_octant_size: f32) -> Self {
        Self {
            nodes: vec![OctreeNode::new(Vec3::ZERO, world_octant_size)],
        }
    }

    /// World octant of a point: `(x<0)*4 + (y<0)*2 + (z<0)`
    pub fn world_octant_id(point: Vec3) -> usize {
        ((point.x < 0.0) as usize) * 4 + ((point.y < 0.0) as usize) * 2 + (point.z < 0.0) as usize
    }

    /// Center of a world octant node
    pub fn world_octant_center(octant: usize, world_octant_size: f32) -> Vec3 {
        let sign = |negative: bool| if negative { -0.5 } else { 0.5 };
        Vec3::new(sign(octant & 4 != 0), sign(octant & 2 != 0), sign(octant & 1 != 0)) * world_octant_size
    }

    /// Octant of a point relative to a center (bit0 = X, bit1 = Y, bit2 = Z, 1 = high)
    pub fn point_octant(center: Vec3, point: Vec3) -> usize {
        ((point.x >= center.x) as usize)
            | (((point.y >= center.y) as usize) << 1)
            | (((point.z >= center.z) as usize) << 2)
    }

    /// Center of child `octant` of a node
    pub fn octant_center(center: Vec3, half_extent: f32, octant: usize) -> Vec3 {
        let quarter = half_extent * 0.5;
        let offset = |high: bool| if high { quarter } else { -quarter };
        center + Vec3::new(offset(octant & 1 != 0), offset(octant & 2 != 0), offset(octant & 4 != 0))
    }

    /// Child slot of `point` below `node`
    pub fn child_slot(&self, node: u32, point: Vec3) -> Option<usize> {
        let index = node as usize;
        let node = self.nodes.get(index)?;
        if index == ROOT {
            Some(Self::world_octant_id(point))
        } else {
            Some(Self::point_octant(node.center, point))
        }
    }

    pub fn root(&self) -> &OctreeNode {
        &self.nodes[ROOT]
    }

    pub fn world_octant_size(&self) -> f32 {
        self.nodes[ROOT].half_extent
    }

    pub fn node(&self, index: u32) -> Option<&OctreeNode> {
        self.nodes.get(index as usize)
    }

    pub fn nodes(&self) -> &[OctreeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1 && self.nodes[ROOT].is_leaf()
    }

    /// Append the child in `slot` of `parent` and return its index
    pub(crate) fn add_child(&mut self, parent: u32, slot: usize, count: u32) -> u32 {
        let index = self.nodes.len() as u32;
        let parent_node = self.nodes[parent as usize];

        let (center, half_extent) = if parent as usize == ROOT {
            let size = parent_node.half_extent;
            (Self::world_octant_center(slot, size), size * 0.5)
        } else {
            (
                Self::octant_center(parent_node.center, parent_node.half_extent, slot),
                parent_node.half_extent * 0.5,
            )
        };

        let mut child = OctreeNode::new(center, half_extent);
        child.count = count;
        self.nodes.push(child);

        let parent_node = &mut self.nodes[parent as usize];
        parent_node.children[slot] = index;
        parent_node.child_mask |= ChildMask::octant(slot);
        index
    }

    pub(crate) fn set_sector(&mut self, node: u32, sector: u32) {
        if let Some(node) = self.nodes.get_mut(node as usize) {
            node.sector = sector;
        }
    }

    /// Recompute counts and offsets bottom-up from the small sector table.
    ///
    /// `remap` maps the sector id stored in each leaf to its id in `small`
    /// (`NONE` when the sector disappeared).
    pub(crate) fn refresh(&mut self, small: &SectorTable, remap: Option<&[u32]>) {
        for index in (0..self.nodes.len()).rev() {
            let node = self.nodes[index];
            if node.is_leaf() {
                let sector = match (remap, node.sector) {
                    (_, NONE) => NONE,
                    (Some(remap), sector) => remap.get(sector as usize).copied().unwrap_or(NONE),
                    (None, sector) => sector,
                };
                let leaf = &mut self.nodes[index];
                leaf.sector = sector;
                if sector == NONE {
                    leaf.count = 0;
                    leaf.offset = NONE;
                } else {
                    leaf.count = small.count(sector);
                    leaf.offset = small.offset(sector);
                }
            } else {
                let mut count = 0;
                let mut offset = NONE;
                for &child in node.children.iter().filter(|&&child| child != NONE) {
                    let child = &self.nodes[child as usize];
                    count += child.count;
                    offset = offset.min(child.offset);
                }
                let inner = &mut self.nodes[index];
                inner.count = count;
                inner.offset = if count == 0 { NONE } else { offset };
            }
        }
    }

    /// Descend to the deepest node containing `point`
    pub fn locate(&self, point: Vec3) -> Option<u32> {
        let root = &self.nodes[ROOT];
        if !(point.cmpge(root.min_corner()).all() && point.cmplt(root.max_corner()).all()) {
            return None;
        }

        let mut current = ROOT as u32;
        loop {
            let node = &self.nodes[current as usize];
            if node.is_leaf() {
                return Some(current);
            }
            let slot = self.child_slot(current, point)?;
            let child = node.children[slot];
            if child == NONE {
                return None;
            }
            current = child;
        }
    }

    /// Select a node by child path (empty path = root)
    pub fn select_node(&self, path: &[u8]) -> Option<&OctreeNode> {
        let mut node = &self.nodes[ROOT];
        for &slot in path {
            let child = *node.children.get(slot as usize)?;
            if child == NONE {
                return None;
            }
            node = &self.nodes[child as usize];
        }
        Some(node)
    }

    /// Depth-first list of non-empty leaves, children in slot order
    pub fn array(&self) -> Vec<ArrayElement> {
        let mut elements = Vec::new();
        let mut path = Vec::new();
        self.collect_leaves(ROOT, &mut path, &mut elements);
        elements
    }

    fn collect_leaves(&self, index: usize, path: &mut Vec<u8>, out: &mut Vec<ArrayElement>) {
        let node = &self.nodes[index];
        if node.is_leaf() {
            if node.count > 0 {
                out.push(ArrayElement {
                    path: path.clone(),
                    center: node.center,
                    half_extent: node.half_extent,
                    count: node.count,
                    sector: node.sector,
                });
            }
            return;
        }

        for (slot, &child) in node.children.iter().enumerate() {
            if child != NONE {
                path.push(slot as u8);
                self.collect_leaves(child as usize, path, out);
                path.pop();
            }
        }
    }
}
