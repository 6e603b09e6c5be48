//! Query filter seam
//!
//! Passability and traversal cost are policy owned by the caller, not by the
//! mesh: the engine consults a [`QueryFilter`] for every candidate edge
//! crossing. Implementations must be cheap — these run inside the inner A*
//! loop.

use tilenav_common::Vec3;

use crate::nav_mesh::{MeshTile, Poly, PolyRef};

/// Everything a cost callback may want to know about one polygon end of an
/// edge crossing.
#[derive(Clone, Copy)]
pub struct PolyContext<'m> {
    pub poly_ref: PolyRef,
    pub tile: &'m MeshTile,
    pub poly: &'m Poly,
}

/// Passability predicate and edge-traversal cost policy consulted during
/// searches.
pub trait QueryFilter {
    /// Returns true if the polygon may be traversed.
    fn pass_filter(&self, poly_ref: PolyRef, tile: &MeshTile, poly: &Poly) -> bool;

    /// Cost of moving from `pa` to `pb` across the current polygon.
    ///
    /// `prev` and `next` are absent at the ends of a path segment (the start
    /// polygon has no predecessor; the final leg to the goal position has no
    /// successor).
    fn get_cost(
        &self,
        pa: Vec3,
        pb: Vec3,
        prev: Option<PolyContext<'_>>,
        cur: PolyContext<'_>,
        next: Option<PolyContext<'_>>,
    ) -> f32;
}

/// Maximum number of distinct area ids carried by polygons.
pub const MAX_AREAS: usize = 64;

/// Flag/area based filter: polygons pass when they share a bit with
/// `include_flags` and none with `exclude_flags`; traversal cost is Euclidean
/// distance scaled by the area's cost multiplier.
#[derive(Debug, Clone)]
pub struct StandardFilter {
    pub include_flags: u16,
    pub exclude_flags: u16,
    area_cost: [f32; MAX_AREAS],
}

impl Default for StandardFilter {
    fn default() -> Self {
        Self {
            include_flags: 0xffff,
            exclude_flags: 0,
            area_cost: [1.0; MAX_AREAS],
        }
    }
}

impl StandardFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost[area as usize & (MAX_AREAS - 1)]
    }

    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        self.area_cost[area as usize & (MAX_AREAS - 1)] = cost;
    }
}

impl QueryFilter for StandardFilter {
    fn pass_filter(&self, _poly_ref: PolyRef, _tile: &MeshTile, poly: &Poly) -> bool {
        (poly.flags & self.include_flags) != 0 && (poly.flags & self.exclude_flags) == 0
    }

    fn get_cost(
        &self,
        pa: Vec3,
        pb: Vec3,
        _prev: Option<PolyContext<'_>>,
        cur: PolyContext<'_>,
        _next: Option<PolyContext<'_>>,
    ) -> f32 {
        pa.distance(pb) * self.area_cost(cur.poly.area)
    }
}
