//! Per-agent cache of nearby wall segments
//!
//! An agent refreshes its boundary only when it has moved far enough or the
//! cache went stale, so collision checks against walls stay cheap in the
//! common case. The cache keeps at most [`MAX_LOCAL_SEGS`] segments, nearest
//! first, and remembers which polygons they came from so staleness can be
//! detected against the current mesh and filter.

use tilenav::{NavMesh, NavMeshQuery, PolyRef, QueryFilter};
use tilenav_common::{distance_pt_seg_sqr_2d, sqr, Vec3};

/// Maximum number of cached wall segments.
pub const MAX_LOCAL_SEGS: usize = 8;

const MAX_LOCAL_POLYS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Segment {
    /// Segment endpoints.
    s: [Vec3; 2],
    /// Squared distance from the boundary center, for ordering and
    /// eviction.
    d: f32,
}

/// Bounded, distance-sorted cache of the wall segments around one agent.
#[derive(Debug, Clone)]
pub struct LocalBoundary {
    center: Vec3,
    segs: Vec<Segment>,
    polys: Vec<PolyRef>,
}

impl LocalBoundary {
    pub fn new() -> Self {
        Self {
            center: Vec3::splat(f32::MAX),
            segs: Vec::with_capacity(MAX_LOCAL_SEGS),
            polys: Vec::with_capacity(MAX_LOCAL_POLYS),
        }
    }

    /// Empties the cache.
    pub fn reset(&mut self) {
        self.center = Vec3::splat(f32::MAX);
        self.segs.clear();
        self.polys.clear();
    }

    /// Rebuilds the cache around `pos` from the walls of the local polygon
    /// neighbourhood.
    ///
    /// A null `poly_ref` resets the cache. A failed neighbourhood query
    /// leaves the previous contents in place; staleness then surfaces
    /// through [`is_valid`](Self::is_valid), never as an error.
    pub fn update<F: QueryFilter>(
        &mut self,
        poly_ref: PolyRef,
        pos: Vec3,
        collision_query_range: f32,
        query: &NavMeshQuery,
        nav: &NavMesh,
        filter: &F,
    ) {
        if poly_ref.is_none() {
            self.reset();
            return;
        }

        self.center = pos;

        // First query the non-overlapping polygons around the agent.
        let Ok((refs, _parents)) = query.find_local_neighbourhood(
            nav,
            poly_ref,
            pos,
            collision_query_range,
            filter,
            MAX_LOCAL_POLYS,
        ) else {
            return;
        };

        self.polys = refs;
        self.segs.clear();

        // Then keep every wall segment the query range actually reaches.
        let range_sqr = sqr(collision_query_range);
        for idx in 0..self.polys.len() {
            let nearby = self.polys[idx];
            let Ok(walls) = query.get_poly_wall_segments(nav, nearby, false, filter) else {
                continue;
            };
            for wall in walls {
                let (dist_sqr, _) = distance_pt_seg_sqr_2d(pos, wall.start, wall.end);
                if dist_sqr > range_sqr {
                    continue;
                }
                self.add_segment(dist_sqr, [wall.start, wall.end]);
            }
        }
    }

    /// Re-checks the cached polygons against the current mesh and filter.
    ///
    /// False when the cache is empty or any polygon is gone or no longer
    /// passable; the caller should refresh or replan.
    pub fn is_valid<F: QueryFilter>(
        &self,
        query: &NavMeshQuery,
        nav: &NavMesh,
        filter: &F,
    ) -> bool {
        if self.polys.is_empty() {
            return false;
        }
        self.polys
            .iter()
            .all(|&poly_ref| query.is_valid_poly_ref(nav, poly_ref, filter))
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn segment_count(&self) -> usize {
        self.segs.len()
    }

    /// Endpoints of the i-th nearest cached segment.
    pub fn segment(&self, i: usize) -> Option<(Vec3, Vec3)> {
        self.segs.get(i).map(|seg| (seg.s[0], seg.s[1]))
    }

    /// Stored squared distance of the i-th segment.
    pub fn segment_dist_sqr(&self, i: usize) -> Option<f32> {
        self.segs.get(i).map(|seg| seg.d)
    }

    /// Polygons the cached segments were derived from.
    pub fn polys(&self) -> &[PolyRef] {
        &self.polys
    }

    /// Inserts a segment keeping the list sorted by distance; when full, the
    /// farthest entry is evicted.
    fn add_segment(&mut self, dist_sqr: f32, s: [Vec3; 2]) {
        let seg = Segment { s, d: dist_sqr };
        if self.segs.is_empty() {
            self.segs.push(seg);
        } else if dist_sqr >= self.segs.last().unwrap().d {
            if self.segs.len() >= MAX_LOCAL_SEGS {
                return;
            }
            self.segs.push(seg);
        } else {
            let at = self
                .segs
                .iter()
                .position(|other| dist_sqr <= other.d)
                .unwrap_or(self.segs.len());
            self.segs.insert(at, seg);
        }
        self.segs.truncate(MAX_LOCAL_SEGS);
    }
}

impl Default for LocalBoundary {
    fn default() -> Self {
        Self::new()
    }
}
