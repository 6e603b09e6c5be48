//! Raycast result types

use tilenav_common::Vec3;

use crate::nav_mesh::PolyRef;

/// Options for [`NavMeshQuery::raycast`](crate::query::NavMeshQuery::raycast).
#[derive(Debug, Clone, Copy, Default)]
pub struct RaycastOptions {
    /// Accumulate filter traversal costs along the visited polygons into
    /// [`RaycastHit::path_cost`].
    pub use_costs: bool,
}

/// Result of a raycast along the walkable surface.
#[derive(Debug, Clone, Default)]
pub struct RaycastHit {
    /// Hit parameter along the segment. 1.0 means the full segment is clear.
    pub t: f32,
    /// Outward normal of the blocking wall edge on the xz-plane; zero when
    /// nothing was hit.
    pub hit_normal: Vec3,
    /// Index of the blocking edge on the final visited polygon.
    pub hit_edge_index: usize,
    /// Polygon references visited, in order from the start polygon.
    pub path: Vec<PolyRef>,
    /// Accumulated traversal cost; only filled when
    /// [`RaycastOptions::use_costs`] is set.
    pub path_cost: f32,
}

impl RaycastHit {
    /// True when the ray reached its end without hitting a wall.
    pub fn is_clear(&self) -> bool {
        self.t >= 1.0
    }
}
