//! Navigation mesh query engine
//!
//! One [`NavMeshQuery`] owns a search node pool, an open list and the single
//! in-flight sliced-search context, and performs every runtime query against
//! a [`NavMesh`] passed per call: point location, A* pathfinding (one-shot
//! and sliced), raycasts, straight-path extraction, nearest-wall distance
//! and local-neighbourhood enumeration.
//!
//! The mesh is a per-call parameter rather than a stored borrow so a host
//! can stream tiles in and out while a sliced search is suspended; the
//! search then detects the edit through reference validation and fails the
//! slice instead of dereferencing stale polygons. A single instance is
//! reusable across calls but not reentrant, and all sliced calls of one
//! search must target the same mesh.

use std::collections::VecDeque;

use tilenav_common::{
    closest_height_point_triangle, distance_pt_seg_sqr_2d, intersect_segment_poly_2d,
    overlap_poly_poly_2d, point_in_poly_2d, sqr, tri_area_2d, vequal, Vec3,
};

use crate::filter::{PolyContext, QueryFilter};
use crate::nav_mesh::{NavMesh, PolyRef, EXT_LINK};
use crate::node_pool::{NodeFlags, NodeIndex, NodePool, NodeQueue};
use crate::raycast::{RaycastHit, RaycastOptions};
use crate::sliced::{PathOptions, SlicedPathState, SlicedQuery, DEFAULT_RAYCAST_LIMIT};
use crate::status::{Result, Status};

/// Search heuristic scale. Slightly below 1 keeps the Euclidean heuristic
/// admissible on the polygon graph.
pub const H_SCALE: f32 = 0.999;

const DEFAULT_MAX_NODES: usize = 4096;

/// A polygon-reference path produced by the A* searches.
#[derive(Debug, Clone, Default)]
pub struct PathResult {
    /// Ordered polygon references from start to the furthest reached
    /// polygon.
    pub path: Vec<PolyRef>,
    /// True when the goal was unreachable and `path` leads to the visited
    /// polygon nearest to it instead.
    pub partial: bool,
}

/// Kind of a straight-path waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StraightPathFlag {
    Start,
    Corner,
    End,
}

/// One waypoint of a straight path.
#[derive(Debug, Clone, Copy)]
pub struct StraightPathPoint {
    pub pos: Vec3,
    pub flag: StraightPathFlag,
    /// Polygon entered at this waypoint (`NONE` for the final endpoint).
    pub poly_ref: PolyRef,
}

/// Result of straight-path corner extraction.
#[derive(Debug, Clone, Default)]
pub struct StraightPathResult {
    pub points: Vec<StraightPathPoint>,
    /// True when the corridor was cut short and the end point was clamped to
    /// the last reachable polygon.
    pub partial: bool,
}

/// Result of a nearest-wall query.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallHit {
    /// Distance from the query center to the nearest wall, or the search
    /// radius when no wall was found within it.
    pub distance: f32,
    /// Closest point on the wall.
    pub pos: Vec3,
    /// Wall normal on the xz-plane, pointing away from the wall; zero when
    /// no wall was found.
    pub normal: Vec3,
}

/// A wall or portal segment of one polygon.
#[derive(Debug, Clone, Copy)]
pub struct WallSegment {
    pub start: Vec3,
    pub end: Vec3,
    /// Neighbour polygon for portal segments; `NONE` for solid walls.
    pub nei_ref: PolyRef,
}

/// Navigation mesh query engine.
pub struct NavMeshQuery {
    node_pool: NodePool,
    open_list: NodeQueue,
    query: SlicedQuery,
}

impl Default for NavMeshQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl NavMeshQuery {
    pub fn new() -> Self {
        Self::with_max_nodes(DEFAULT_MAX_NODES)
    }

    /// Creates a query engine with a bounded search node pool.
    pub fn with_max_nodes(max_nodes: usize) -> Self {
        Self {
            node_pool: NodePool::new(max_nodes),
            open_list: NodeQueue::new(),
            query: SlicedQuery::default(),
        }
    }

    /// Finds the passable polygon nearest to `center` within the search box,
    /// and `center` clamped onto it.
    ///
    /// An empty search box is not an error: the result carries
    /// [`PolyRef::NONE`] and the original position.
    pub fn find_nearest_poly<F: QueryFilter>(
        &self,
        nav: &NavMesh,
        center: Vec3,
        half_extents: Vec3,
        filter: &F,
    ) -> Result<(PolyRef, Vec3)> {
        if !center.is_finite() || !half_extents.is_finite() || half_extents.min_element() < 0.0 {
            return Err(Status::InvalidParam);
        }

        let polys = nav.query_polygons(center - half_extents, center + half_extents, filter);

        let mut nearest_ref = PolyRef::NONE;
        let mut nearest_pt = center;
        let mut nearest_d = f32::MAX;
        for poly_ref in polys {
            let (pt, over_poly) = self.closest_point_on_poly(nav, poly_ref, center)?;
            let diff = center - pt;
            // Directly-over hits compete on height difference only, so a
            // polygon underfoot wins against a nearer edge of another one.
            let d = if over_poly {
                diff.y * diff.y
            } else {
                diff.length_squared()
            };
            if d < nearest_d {
                nearest_d = d;
                nearest_pt = pt;
                nearest_ref = poly_ref;
            }
        }

        Ok((nearest_ref, nearest_pt))
    }

    /// Closest point on a polygon to `pos`, and whether `pos` projects onto
    /// the polygon from above.
    pub fn closest_point_on_poly(
        &self,
        nav: &NavMesh,
        poly_ref: PolyRef,
        pos: Vec3,
    ) -> Result<(Vec3, bool)> {
        let (tile, poly) = nav.get_tile_and_poly(poly_ref)?;
        let verts = tile.poly_verts(poly);

        if point_in_poly_2d(pos, &verts) {
            // Height from the triangle fan.
            let mut h = pos.y;
            for i in 1..verts.len() - 1 {
                if let Some(found) =
                    closest_height_point_triangle(pos, verts[0], verts[i], verts[i + 1])
                {
                    h = found;
                    break;
                }
            }
            return Ok((Vec3::new(pos.x, h, pos.z), true));
        }

        Ok((closest_on_boundary(&verts, pos), false))
    }

    /// Closest point on the polygon's boundary; `pos` itself when it already
    /// lies inside.
    pub fn closest_point_on_poly_boundary(
        &self,
        nav: &NavMesh,
        poly_ref: PolyRef,
        pos: Vec3,
    ) -> Result<Vec3> {
        let (tile, poly) = nav.get_tile_and_poly(poly_ref)?;
        let verts = tile.poly_verts(poly);
        if point_in_poly_2d(pos, &verts) {
            return Ok(pos);
        }
        Ok(closest_on_boundary(&verts, pos))
    }

    /// Collects passable polygons overlapping the search box.
    pub fn query_polygons<F: QueryFilter>(
        &self,
        nav: &NavMesh,
        center: Vec3,
        half_extents: Vec3,
        filter: &F,
    ) -> Result<Vec<PolyRef>> {
        if !center.is_finite() || !half_extents.is_finite() || half_extents.min_element() < 0.0 {
            return Err(Status::InvalidParam);
        }
        Ok(nav.query_polygons(center - half_extents, center + half_extents, filter))
    }

    /// Checks that a reference is resident and passes the filter.
    pub fn is_valid_poly_ref<F: QueryFilter>(
        &self,
        nav: &NavMesh,
        poly_ref: PolyRef,
        filter: &F,
    ) -> bool {
        match nav.get_tile_and_poly(poly_ref) {
            Ok((tile, poly)) => poly_ref.is_some() && filter.pass_filter(poly_ref, tile, poly),
            Err(_) => false,
        }
    }

    /// Finds an ordered polygon path between two positions.
    ///
    /// When the goal is unreachable the result is tagged partial and leads
    /// to the visited polygon with the smallest heuristic distance to the
    /// goal.
    pub fn find_path<F: QueryFilter>(
        &mut self,
        nav: &NavMesh,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &F,
    ) -> Result<PathResult> {
        if !nav.is_valid_poly_ref(start_ref)
            || !nav.is_valid_poly_ref(end_ref)
            || !start_pos.is_finite()
            || !end_pos.is_finite()
        {
            return Err(Status::InvalidParam);
        }

        if start_ref == end_ref {
            return Ok(PathResult {
                path: vec![start_ref],
                partial: false,
            });
        }

        self.node_pool.clear();
        self.open_list.clear();

        let start_idx = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::OutOfNodes)?;
        {
            let node = self.node_pool.node_mut(start_idx);
            node.pos = start_pos;
            node.pidx = 0;
            node.cost = 0.0;
            node.total = start_pos.distance(end_pos) * H_SCALE;
            node.flags = NodeFlags::default();
            node.flags.insert(NodeFlags::OPEN);
        }
        self.open_list.push(start_idx, self.node_pool.nodes());

        let mut last_best = start_idx;
        let mut last_best_cost = self.node_pool.node(start_idx).total;

        while let Some(best_idx) = self.open_list.pop(self.node_pool.nodes()) {
            {
                let node = self.node_pool.node_mut(best_idx);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
            }
            let best = self.node_pool.node(best_idx).clone();

            if best.id == end_ref {
                last_best = best_idx;
                break;
            }

            let (best_tile, best_poly) = nav.get_tile_and_poly(best.id)?;

            let parent_ref = NodePool::node_from_pidx(best.pidx)
                .map(|idx| self.node_pool.node(idx).id)
                .unwrap_or(PolyRef::NONE);

            for link in best_tile.poly_links(best_poly) {
                let neighbour_ref = link.target;
                // Skip invalid ids and do not expand back to where we came
                // from.
                if neighbour_ref.is_none() || neighbour_ref == parent_ref {
                    continue;
                }
                let Ok((nb_tile, nb_poly)) = nav.get_tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_ref, nb_tile, nb_poly) {
                    continue;
                }

                // Tile-border crossings are keyed by the side they cross, so
                // a border polygon entered from different sides gets
                // distinct search nodes.
                let cross_side = if link.side != 0xff { link.side >> 1 } else { 0 };
                let Some(nb_idx) = self.node_pool.get_node(neighbour_ref, cross_side) else {
                    continue;
                };

                if self.node_pool.node(nb_idx).flags.is_empty() {
                    if let Ok(mid) = self.get_edge_mid_point(nav, best.id, neighbour_ref) {
                        self.node_pool.node_mut(nb_idx).pos = mid;
                    }
                }
                let nb_pos = self.node_pool.node(nb_idx).pos;

                let prev_ctx = poly_context(nav, parent_ref);
                let cur_ctx = PolyContext {
                    poly_ref: best.id,
                    tile: best_tile,
                    poly: best_poly,
                };
                let next_ctx = PolyContext {
                    poly_ref: neighbour_ref,
                    tile: nb_tile,
                    poly: nb_poly,
                };

                let (cost, heuristic) = if neighbour_ref == end_ref {
                    let cur_cost =
                        filter.get_cost(best.pos, nb_pos, prev_ctx, cur_ctx, Some(next_ctx));
                    let end_cost = filter.get_cost(nb_pos, end_pos, Some(cur_ctx), next_ctx, None);
                    (best.cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost =
                        filter.get_cost(best.pos, nb_pos, prev_ctx, cur_ctx, Some(next_ctx));
                    (best.cost + cur_cost, nb_pos.distance(end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let nb = self.node_pool.node(nb_idx);
                if nb.flags.contains(NodeFlags::OPEN) && total >= nb.total {
                    continue;
                }
                if nb.flags.contains(NodeFlags::CLOSED) && total >= nb.total {
                    continue;
                }

                let was_open = nb.flags.contains(NodeFlags::OPEN);
                {
                    let node = self.node_pool.node_mut(nb_idx);
                    node.pidx = NodePool::pidx_of(best_idx);
                    node.id = neighbour_ref;
                    node.flags.remove(NodeFlags::CLOSED);
                    node.cost = cost;
                    node.total = total;
                }
                if was_open {
                    self.open_list.modify(nb_idx, self.node_pool.nodes());
                } else {
                    self.node_pool
                        .node_mut(nb_idx)
                        .flags
                        .insert(NodeFlags::OPEN);
                    self.open_list.push(nb_idx, self.node_pool.nodes());
                }

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = nb_idx;
                }
            }
        }

        let path = self.path_to_node(last_best);
        let partial = self.node_pool.node(last_best).id != end_ref;
        Ok(PathResult { path, partial })
    }

    /// Initializes a sliced path search; drive it with
    /// [`update_sliced_find_path`](Self::update_sliced_find_path) and one of
    /// the finalize calls.
    ///
    /// Any previously in-flight sliced search is discarded.
    pub fn init_sliced_find_path(
        &mut self,
        nav: &NavMesh,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        options: PathOptions,
    ) -> Result<SlicedPathState> {
        if !nav.is_valid_poly_ref(start_ref)
            || !nav.is_valid_poly_ref(end_ref)
            || !start_pos.is_finite()
            || !end_pos.is_finite()
        {
            return Err(Status::InvalidParam);
        }

        self.query.reset();
        self.query.start_ref = start_ref;
        self.query.end_ref = end_ref;
        self.query.start_pos = start_pos;
        self.query.end_pos = end_pos;
        self.query.any_angle = options.any_angle;
        self.query.raycast_limit_sqr = if options.raycast_limit > 0.0 {
            sqr(options.raycast_limit)
        } else {
            sqr(DEFAULT_RAYCAST_LIMIT)
        };
        self.query.last_best_cost = f32::MAX;

        if start_ref == end_ref {
            self.query.state = SlicedPathState::Success;
            return Ok(self.query.state);
        }

        self.node_pool.clear();
        self.open_list.clear();

        let start_idx = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::OutOfNodes)?;
        {
            let node = self.node_pool.node_mut(start_idx);
            node.pos = start_pos;
            node.pidx = 0;
            node.cost = 0.0;
            node.total = start_pos.distance(end_pos) * H_SCALE;
            node.flags = NodeFlags::default();
            node.flags.insert(NodeFlags::OPEN);
        }
        self.open_list.push(start_idx, self.node_pool.nodes());

        self.query.last_best = NodePool::pidx_of(start_idx);
        self.query.last_best_cost = self.node_pool.node(start_idx).total;
        self.query.state = SlicedPathState::InProgress;
        Ok(self.query.state)
    }

    /// Runs up to `max_iter` node expansions of the in-flight sliced search.
    ///
    /// Returns the iterations actually consumed and the new state. `nav` and
    /// `filter` must match the ones the search was initialized against.
    pub fn update_sliced_find_path<F: QueryFilter>(
        &mut self,
        nav: &NavMesh,
        max_iter: usize,
        filter: &F,
    ) -> Result<(usize, SlicedPathState)> {
        if !self.query.state.is_in_progress() {
            return Ok((0, self.query.state));
        }

        // Make sure the request is still valid.
        if !nav.is_valid_poly_ref(self.query.start_ref)
            || !nav.is_valid_poly_ref(self.query.end_ref)
        {
            self.query.state = SlicedPathState::Failed;
            return Ok((0, self.query.state));
        }

        let mut iter = 0;
        while iter < max_iter && !self.open_list.is_empty() {
            iter += 1;

            let best_idx = self.open_list.pop(self.node_pool.nodes()).unwrap();
            {
                let node = self.node_pool.node_mut(best_idx);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
            }
            let best = self.node_pool.node(best_idx).clone();

            if best.id == self.query.end_ref {
                self.query.last_best = NodePool::pidx_of(best_idx);
                self.query.state = SlicedPathState::Success;
                return Ok((iter, self.query.state));
            }

            // The polygon may have vanished while the search was suspended.
            let Ok((best_tile, best_poly)) = nav.get_tile_and_poly(best.id) else {
                log::warn!("sliced search aborted: {:?} became invalid", best.id);
                self.query.state = SlicedPathState::Failed;
                return Ok((iter, self.query.state));
            };

            let parent_idx = NodePool::node_from_pidx(best.pidx);
            let (parent_ref, parent_pos, parent_cost, grandpa_ref) = match parent_idx {
                Some(pi) => {
                    let p = self.node_pool.node(pi);
                    let grandpa = NodePool::node_from_pidx(p.pidx)
                        .map(|gi| self.node_pool.node(gi).id)
                        .unwrap_or(PolyRef::NONE);
                    (p.id, p.pos, p.cost, grandpa)
                }
                None => (PolyRef::NONE, Vec3::ZERO, 0.0, PolyRef::NONE),
            };

            if parent_ref.is_some()
                && (!nav.is_valid_poly_ref(parent_ref)
                    || (grandpa_ref.is_some() && !nav.is_valid_poly_ref(grandpa_ref)))
            {
                log::warn!("sliced search aborted: corridor became invalid mid-search");
                self.query.state = SlicedPathState::Failed;
                return Ok((iter, self.query.state));
            }

            // Decide whether to test raycast shortcuts to the grandparent.
            let try_los = self.query.any_angle
                && parent_ref.is_some()
                && parent_pos.distance_squared(best.pos) < self.query.raycast_limit_sqr;

            for link in best_tile.poly_links(best_poly) {
                let neighbour_ref = link.target;
                if neighbour_ref.is_none() || neighbour_ref == parent_ref {
                    continue;
                }
                let Ok((nb_tile, nb_poly)) = nav.get_tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_ref, nb_tile, nb_poly) {
                    continue;
                }

                let cross_side = if link.side != 0xff { link.side >> 1 } else { 0 };
                let Some(nb_idx) = self.node_pool.get_node(neighbour_ref, cross_side) else {
                    continue;
                };

                // Do not expand to nodes already reached from this parent.
                if self.node_pool.node(nb_idx).pidx != 0
                    && self.node_pool.node(nb_idx).pidx == best.pidx
                {
                    continue;
                }

                if self.node_pool.node(nb_idx).flags.is_empty() {
                    if let Ok(mid) = self.get_edge_mid_point(nav, best.id, neighbour_ref) {
                        self.node_pool.node_mut(nb_idx).pos = mid;
                    }
                }
                let nb_pos = self.node_pool.node(nb_idx).pos;

                // Shortcut past the parent when there is line of sight.
                let mut found_shortcut = false;
                let mut cost = 0.0;
                if try_los {
                    if let Ok(ray) = self.raycast(
                        nav,
                        parent_ref,
                        parent_pos,
                        nb_pos,
                        filter,
                        RaycastOptions { use_costs: true },
                        grandpa_ref,
                    ) {
                        found_shortcut = ray.is_clear();
                        if found_shortcut {
                            // Shorter any-angle route; charge the raycast
                            // cost instead of the portal-midpoint cost.
                            cost = parent_cost + ray.path_cost;
                        }
                    }
                }

                let prev_ctx = poly_context(nav, parent_ref);
                let cur_ctx = PolyContext {
                    poly_ref: best.id,
                    tile: best_tile,
                    poly: best_poly,
                };
                let next_ctx = PolyContext {
                    poly_ref: neighbour_ref,
                    tile: nb_tile,
                    poly: nb_poly,
                };

                if !found_shortcut {
                    cost = best.cost
                        + filter.get_cost(best.pos, nb_pos, prev_ctx, cur_ctx, Some(next_ctx));
                }

                let heuristic = if neighbour_ref == self.query.end_ref {
                    cost +=
                        filter.get_cost(nb_pos, self.query.end_pos, Some(cur_ctx), next_ctx, None);
                    0.0
                } else {
                    nb_pos.distance(self.query.end_pos) * H_SCALE
                };
                let total = cost + heuristic;

                let nb = self.node_pool.node(nb_idx);
                if nb.flags.contains(NodeFlags::OPEN) && total >= nb.total {
                    continue;
                }
                if nb.flags.contains(NodeFlags::CLOSED) && total >= nb.total {
                    continue;
                }

                let was_open = nb.flags.contains(NodeFlags::OPEN);
                {
                    let node = self.node_pool.node_mut(nb_idx);
                    node.pidx = if found_shortcut {
                        best.pidx
                    } else {
                        NodePool::pidx_of(best_idx)
                    };
                    node.id = neighbour_ref;
                    node.flags.remove(NodeFlags::CLOSED);
                    node.flags.remove(NodeFlags::PARENT_DETACHED);
                    node.cost = cost;
                    node.total = total;
                    if found_shortcut {
                        node.flags.insert(NodeFlags::PARENT_DETACHED);
                    }
                }
                if was_open {
                    self.open_list.modify(nb_idx, self.node_pool.nodes());
                } else {
                    self.node_pool
                        .node_mut(nb_idx)
                        .flags
                        .insert(NodeFlags::OPEN);
                    self.open_list.push(nb_idx, self.node_pool.nodes());
                }

                if heuristic < self.query.last_best_cost {
                    self.query.last_best_cost = heuristic;
                    self.query.last_best = NodePool::pidx_of(nb_idx);
                }
            }
        }

        // Exhausted all nodes without reaching the goal.
        if self.open_list.is_empty() {
            self.query.state = SlicedPathState::Partial;
        }
        Ok((iter, self.query.state))
    }

    /// Materializes the committed path of the sliced search and resets the
    /// query state.
    pub fn finalize_sliced_find_path<F: QueryFilter>(
        &mut self,
        nav: &NavMesh,
        filter: &F,
    ) -> Result<PathResult> {
        match self.query.state {
            SlicedPathState::Idle => return Err(Status::Failure),
            SlicedPathState::Failed => {
                self.query.reset();
                return Err(Status::Failure);
            }
            _ => {}
        }

        let result = if self.query.start_ref == self.query.end_ref {
            // Special case: the search starts and ends on the same polygon.
            Ok(PathResult {
                path: vec![self.query.start_ref],
                partial: false,
            })
        } else {
            match NodePool::node_from_pidx(self.query.last_best) {
                Some(last_best) => self.collect_sliced_path(nav, last_best, filter),
                None => Err(Status::Failure),
            }
        };

        self.query.reset();
        result
    }

    /// Materializes the prefix of `existing` covered by the sliced search:
    /// the path to the furthest polygon of `existing` that was actually
    /// visited. Resets the query state.
    pub fn finalize_sliced_find_path_partial<F: QueryFilter>(
        &mut self,
        nav: &NavMesh,
        existing: &[PolyRef],
        filter: &F,
    ) -> Result<PathResult> {
        if existing.is_empty() {
            return Err(Status::InvalidParam);
        }
        match self.query.state {
            SlicedPathState::Idle => return Err(Status::Failure),
            SlicedPathState::Failed => {
                self.query.reset();
                return Err(Status::Failure);
            }
            _ => {}
        }

        let result = if self.query.start_ref == self.query.end_ref {
            Ok(PathResult {
                path: vec![self.query.start_ref],
                partial: false,
            })
        } else {
            // Find the furthest existing polygon that was visited.
            let mut node = None;
            for &poly_ref in existing.iter().rev() {
                if let Some(idx) = self.node_pool.find_node_any_state(poly_ref) {
                    node = Some(idx);
                    break;
                }
            }
            let node = match node {
                Some(idx) => idx,
                None => match NodePool::node_from_pidx(self.query.last_best) {
                    Some(idx) => idx,
                    None => {
                        self.query.reset();
                        return Err(Status::Failure);
                    }
                },
            };
            self.collect_sliced_path(nav, node, filter)
        };

        self.query.reset();
        result
    }

    /// State of the in-flight sliced search.
    pub fn sliced_path_state(&self) -> SlicedPathState {
        self.query.state
    }

    /// Abandons the in-flight sliced search.
    pub fn cancel_sliced_find_path(&mut self) {
        self.query.reset();
    }

    /// Walks the parent chain from `last_node`, replaying shortcut raycasts,
    /// and returns the forward path.
    fn collect_sliced_path<F: QueryFilter>(
        &mut self,
        nav: &NavMesh,
        last_node: NodeIndex,
        filter: &F,
    ) -> Result<PathResult> {
        let partial = self.node_pool.node(last_node).id != self.query.end_ref;

        // Reverse the parent chain in place, shifting each node's
        // parent-detached flag onto the reversed edge it belongs to.
        let mut prev: Option<NodeIndex> = None;
        let mut node = Some(last_node);
        let mut prev_ray = false;
        while let Some(idx) = node {
            let next = NodePool::node_from_pidx(self.node_pool.node(idx).pidx);
            let next_ray = self
                .node_pool
                .node(idx)
                .flags
                .contains(NodeFlags::PARENT_DETACHED);
            {
                let n = self.node_pool.node_mut(idx);
                n.pidx = prev.map(NodePool::pidx_of).unwrap_or(0);
                if prev_ray {
                    n.flags.insert(NodeFlags::PARENT_DETACHED);
                } else {
                    n.flags.remove(NodeFlags::PARENT_DETACHED);
                }
            }
            prev_ray = next_ray;
            prev = Some(idx);
            node = next;
        }

        // Store the path while replaying raycast shortcuts.
        let mut path = Vec::new();
        let mut node = prev;
        while let Some(idx) = node {
            let cur = self.node_pool.node(idx).clone();
            let next = NodePool::node_from_pidx(cur.pidx);
            if cur.flags.contains(NodeFlags::PARENT_DETACHED) {
                let next_idx = next.ok_or(Status::Failure)?;
                let next_pos = self.node_pool.node(next_idx).pos;
                let next_id = self.node_pool.node(next_idx).id;
                let ray = self.raycast(
                    nav,
                    cur.id,
                    cur.pos,
                    next_pos,
                    filter,
                    RaycastOptions::default(),
                    PolyRef::NONE,
                )?;
                path.extend_from_slice(&ray.path);
                // The raycast ends on a polygon boundary, which may repeat
                // the next node's polygon.
                if path.last() == Some(&next_id) {
                    path.pop();
                }
            } else {
                path.push(cur.id);
            }
            node = next;
        }

        Ok(PathResult { path, partial })
    }

    /// Casts a walkability ray along the surface from `start_pos` toward
    /// `end_pos`.
    ///
    /// `prev_ref` optionally names the polygon the ray came from, seeding
    /// the cost context when [`RaycastOptions::use_costs`] is set.
    pub fn raycast<F: QueryFilter>(
        &self,
        nav: &NavMesh,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &F,
        options: RaycastOptions,
        prev_ref: PolyRef,
    ) -> Result<RaycastHit> {
        if !nav.is_valid_poly_ref(start_ref) || !start_pos.is_finite() || !end_pos.is_finite() {
            return Err(Status::InvalidParam);
        }
        if prev_ref.is_some() && !nav.is_valid_poly_ref(prev_ref) {
            return Err(Status::InvalidParam);
        }

        let mut hit = RaycastHit::default();

        // Degenerate ray: nothing to sweep.
        if vequal(start_pos, end_pos) {
            hit.t = 1.0;
            hit.path.push(start_ref);
            return Ok(hit);
        }

        // Bounds the polygon walk against degenerate adjacency loops.
        const MAX_STEPS: usize = 256;

        let dir = end_pos - start_pos;
        let mut cur_ref = start_ref;
        let mut prev_ref = prev_ref;
        let mut cur_pos = start_pos;

        for _ in 0..MAX_STEPS {
            let (tile, poly) = nav.get_tile_and_poly(cur_ref)?;
            let verts = tile.poly_verts(poly);

            let Some(seg) = intersect_segment_poly_2d(start_pos, end_pos, &verts) else {
                // Could not hit the polygon; keep the old t and report a hit.
                return Ok(hit);
            };
            if seg.tmax > hit.t {
                hit.t = seg.tmax;
            }
            hit.path.push(cur_ref);

            let Some(seg_max) = seg.seg_max else {
                // The end point is inside the current polygon.
                hit.t = 1.0;
                if options.use_costs {
                    let cur_ctx = PolyContext {
                        poly_ref: cur_ref,
                        tile,
                        poly,
                    };
                    hit.path_cost += filter.get_cost(
                        cur_pos,
                        end_pos,
                        poly_context(nav, prev_ref),
                        cur_ctx,
                        None,
                    );
                }
                return Ok(hit);
            };
            hit.hit_edge_index = seg_max;

            let hit_pos = start_pos + dir * seg.tmax;

            // Follow the link across the exit edge, honoring partial border
            // links.
            let mut next_ref = PolyRef::NONE;
            for link in tile.poly_links(poly) {
                if link.edge as usize != seg_max {
                    continue;
                }
                let Ok((nb_tile, nb_poly)) = nav.get_tile_and_poly(link.target) else {
                    continue;
                };
                if !filter.pass_filter(link.target, nb_tile, nb_poly) {
                    continue;
                }
                if link.side != 0xff {
                    let (va, vb) = tile.edge_verts(poly, seg_max);
                    let (a0, a1, p) = if link.side == 0 || link.side == 4 {
                        (va.z, vb.z, hit_pos.z)
                    } else {
                        (va.x, vb.x, hit_pos.x)
                    };
                    let s = 1.0 / 255.0;
                    let l0 = a0 + (a1 - a0) * (link.bmin as f32 * s);
                    let l1 = a0 + (a1 - a0) * (link.bmax as f32 * s);
                    let (lmin, lmax) = (l0.min(l1), l0.max(l1));
                    if p < lmin || p > lmax {
                        continue;
                    }
                }
                next_ref = link.target;
                break;
            }

            if options.use_costs {
                let cur_ctx = PolyContext {
                    poly_ref: cur_ref,
                    tile,
                    poly,
                };
                hit.path_cost += filter.get_cost(
                    cur_pos,
                    hit_pos,
                    poly_context(nav, prev_ref),
                    cur_ctx,
                    poly_context(nav, next_ref),
                );
            }

            if next_ref.is_none() {
                // Blocked: report the outward normal of the wall edge.
                let (va, vb) = tile.edge_verts(poly, seg_max);
                let dx = vb.x - va.x;
                let dz = vb.z - va.z;
                hit.hit_normal = Vec3::new(dz, 0.0, -dx).normalize_or_zero();
                hit.t = seg.tmax;
                return Ok(hit);
            }

            prev_ref = cur_ref;
            cur_ref = next_ref;
            cur_pos = hit_pos;
        }

        Ok(hit)
    }

    /// Finds the distance from `center` to the nearest wall reachable within
    /// `max_radius`, searching outward polygon by polygon.
    pub fn find_distance_to_wall<F: QueryFilter>(
        &mut self,
        nav: &NavMesh,
        start_ref: PolyRef,
        center: Vec3,
        max_radius: f32,
        filter: &F,
    ) -> Result<WallHit> {
        if !nav.is_valid_poly_ref(start_ref)
            || !center.is_finite()
            || max_radius < 0.0
            || !max_radius.is_finite()
        {
            return Err(Status::InvalidParam);
        }

        self.node_pool.clear();
        self.open_list.clear();

        let start_idx = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::OutOfNodes)?;
        {
            let node = self.node_pool.node_mut(start_idx);
            node.pos = center;
            node.pidx = 0;
            node.cost = 0.0;
            node.total = 0.0;
            node.flags = NodeFlags::default();
            node.flags.insert(NodeFlags::OPEN);
        }
        self.open_list.push(start_idx, self.node_pool.nodes());

        let mut radius_sqr = sqr(max_radius);
        let mut hit_pos = Vec3::ZERO;
        let mut best_edge: Option<(Vec3, Vec3)> = None;

        while let Some(best_idx) = self.open_list.pop(self.node_pool.nodes()) {
            {
                let node = self.node_pool.node_mut(best_idx);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
            }
            let best = self.node_pool.node(best_idx).clone();
            let (tile, poly) = nav.get_tile_and_poly(best.id)?;

            let parent_ref = NodePool::node_from_pidx(best.pidx)
                .map(|idx| self.node_pool.node(idx).id)
                .unwrap_or(PolyRef::NONE);

            // Hit test walls.
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if (poly.neis[j] & EXT_LINK) != 0 {
                    // Tile border: solid unless a passable neighbour is
                    // linked across this edge.
                    let mut solid = true;
                    for link in tile.poly_links(poly) {
                        if link.edge as usize == j {
                            if link.target.is_some() {
                                if let Ok((nb_tile, nb_poly)) = nav.get_tile_and_poly(link.target)
                                {
                                    if filter.pass_filter(link.target, nb_tile, nb_poly) {
                                        solid = false;
                                    }
                                }
                            }
                            break;
                        }
                    }
                    if !solid {
                        continue;
                    }
                } else if poly.neis[j] != 0 {
                    // Internal edge: only blocked neighbours count as walls.
                    let idx = (poly.neis[j] - 1) as usize;
                    let nb_ref = nav.poly_ref(tile, idx);
                    if filter.pass_filter(nb_ref, tile, &tile.polys[idx]) {
                        continue;
                    }
                }

                let (va, vb) = tile.edge_verts(poly, j);
                let (dist_sqr, tseg) = distance_pt_seg_sqr_2d(center, va, vb);
                if dist_sqr > radius_sqr {
                    continue;
                }

                // Hit wall; shrink the search radius.
                radius_sqr = dist_sqr;
                hit_pos = va.lerp(vb, tseg);
                best_edge = Some((va, vb));
            }

            for link in tile.poly_links(poly) {
                let neighbour_ref = link.target;
                if neighbour_ref.is_none() || neighbour_ref == parent_ref {
                    continue;
                }
                let Ok((nb_tile, nb_poly)) = nav.get_tile_and_poly(neighbour_ref) else {
                    continue;
                };

                // Prune neighbours whose connecting edge lies beyond the
                // current best radius.
                let (va, vb) = tile.edge_verts(poly, link.edge as usize);
                let (dist_sqr, _) = distance_pt_seg_sqr_2d(center, va, vb);
                if dist_sqr > radius_sqr {
                    continue;
                }
                if !filter.pass_filter(neighbour_ref, nb_tile, nb_poly) {
                    continue;
                }

                let Some(nb_idx) = self.node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };
                if self.node_pool.node(nb_idx).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }

                if self.node_pool.node(nb_idx).flags.is_empty() {
                    if let Ok(mid) = self.get_edge_mid_point(nav, best.id, neighbour_ref) {
                        self.node_pool.node_mut(nb_idx).pos = mid;
                    }
                }

                let total = best.total + best.pos.distance(self.node_pool.node(nb_idx).pos);
                let nb = self.node_pool.node(nb_idx);
                if nb.flags.contains(NodeFlags::OPEN) && total >= nb.total {
                    continue;
                }

                let was_open = nb.flags.contains(NodeFlags::OPEN);
                {
                    let node = self.node_pool.node_mut(nb_idx);
                    node.id = neighbour_ref;
                    node.flags.remove(NodeFlags::CLOSED);
                    node.pidx = NodePool::pidx_of(best_idx);
                    node.total = total;
                }
                if was_open {
                    self.open_list.modify(nb_idx, self.node_pool.nodes());
                } else {
                    self.node_pool
                        .node_mut(nb_idx)
                        .flags
                        .insert(NodeFlags::OPEN);
                    self.open_list.push(nb_idx, self.node_pool.nodes());
                }
            }
        }

        let normal = match best_edge {
            Some((va, vb)) => {
                let tangent = vb - va;
                Vec3::new(tangent.z, 0.0, -tangent.x).normalize_or_zero()
            }
            None => Vec3::ZERO,
        };

        Ok(WallHit {
            distance: radius_sqr.sqrt(),
            pos: hit_pos,
            normal,
        })
    }

    /// Enumerates one polygon's wall segments; with `store_portals` the
    /// passable portal segments are included too, tagged with the neighbour
    /// reference.
    pub fn get_poly_wall_segments<F: QueryFilter>(
        &self,
        nav: &NavMesh,
        poly_ref: PolyRef,
        store_portals: bool,
        filter: &F,
    ) -> Result<Vec<WallSegment>> {
        let (tile, poly) = nav.get_tile_and_poly(poly_ref)?;

        let mut segments = Vec::new();
        let nv = poly.vert_count as usize;
        for j in 0..nv {
            let (va, vb) = tile.edge_verts(poly, j);

            if (poly.neis[j] & EXT_LINK) != 0 {
                // Tile border: passable links cover sub-ranges of the edge;
                // everything uncovered is wall.
                let mut ints: Vec<(u8, u8, PolyRef)> = Vec::new();
                for link in tile.poly_links(poly) {
                    if link.edge as usize != j || link.target.is_none() {
                        continue;
                    }
                    let Ok((nb_tile, nb_poly)) = nav.get_tile_and_poly(link.target) else {
                        continue;
                    };
                    if !filter.pass_filter(link.target, nb_tile, nb_poly) {
                        continue;
                    }
                    let pos = ints
                        .iter()
                        .position(|&(bmin, _, _)| link.bmin < bmin)
                        .unwrap_or(ints.len());
                    ints.insert(pos, (link.bmin, link.bmax, link.target));
                }

                let mut prev_max = 0u16;
                for (bmin, bmax, nei_ref) in ints {
                    if store_portals {
                        segments.push(WallSegment {
                            start: va.lerp(vb, bmin as f32 / 255.0),
                            end: va.lerp(vb, bmax as f32 / 255.0),
                            nei_ref,
                        });
                    }
                    if bmin as u16 > prev_max {
                        segments.push(WallSegment {
                            start: va.lerp(vb, prev_max as f32 / 255.0),
                            end: va.lerp(vb, bmin as f32 / 255.0),
                            nei_ref: PolyRef::NONE,
                        });
                    }
                    prev_max = prev_max.max(bmax as u16);
                }
                if prev_max < 255 {
                    segments.push(WallSegment {
                        start: va.lerp(vb, prev_max as f32 / 255.0),
                        end: vb,
                        nei_ref: PolyRef::NONE,
                    });
                }
                continue;
            }

            let mut nei_ref = PolyRef::NONE;
            if poly.neis[j] != 0 {
                let idx = (poly.neis[j] - 1) as usize;
                let candidate = nav.poly_ref(tile, idx);
                if filter.pass_filter(candidate, tile, &tile.polys[idx]) {
                    nei_ref = candidate;
                }
            }

            if nei_ref.is_none() || store_portals {
                segments.push(WallSegment {
                    start: va,
                    end: vb,
                    nei_ref,
                });
            }
        }

        Ok(segments)
    }

    /// Collects the non-overlapping polygons reachable from `start_ref`
    /// whose connecting portals lie within `radius` of `center`.
    ///
    /// Returns the accepted references and, parallel to them, the reference
    /// each one was reached from (`NONE` for the start polygon).
    pub fn find_local_neighbourhood<F: QueryFilter>(
        &self,
        nav: &NavMesh,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &F,
        max_result: usize,
    ) -> Result<(Vec<PolyRef>, Vec<PolyRef>)> {
        const MAX_STACK: usize = 48;

        if !nav.is_valid_poly_ref(start_ref)
            || !center.is_finite()
            || radius < 0.0
            || !radius.is_finite()
            || max_result == 0
        {
            return Err(Status::InvalidParam);
        }

        let radius_sqr = sqr(radius);
        let mut result_refs = vec![start_ref];
        let mut result_parents = vec![PolyRef::NONE];
        let mut visited = vec![start_ref];
        let mut stack = VecDeque::from([start_ref]);

        while let Some(cur_ref) = stack.pop_front() {
            let (cur_tile, cur_poly) = nav.get_tile_and_poly(cur_ref)?;

            for link in cur_tile.poly_links(cur_poly) {
                let neighbour_ref = link.target;
                if neighbour_ref.is_none() || visited.contains(&neighbour_ref) {
                    continue;
                }
                let Ok((nb_tile, nb_poly)) = nav.get_tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_ref, nb_tile, nb_poly) {
                    continue;
                }

                // The search circle must reach the connecting portal.
                let Ok((va, vb)) = self.get_portal_points(nav, cur_ref, neighbour_ref) else {
                    continue;
                };
                let (dist_sqr, _) = distance_pt_seg_sqr_2d(center, va, vb);
                if dist_sqr > radius_sqr {
                    continue;
                }

                visited.push(neighbour_ref);

                // Reject candidates overlapping already accepted polygons;
                // directly linked neighbours share an edge, not area.
                let nb_verts = nb_tile.poly_verts(nb_poly);
                let mut overlaps = false;
                for &past_ref in &result_refs {
                    let connected = nb_tile.poly_links(nb_poly).any(|l| l.target == past_ref);
                    if connected {
                        continue;
                    }
                    let Ok((past_tile, past_poly)) = nav.get_tile_and_poly(past_ref) else {
                        continue;
                    };
                    let past_verts = past_tile.poly_verts(past_poly);
                    if overlap_poly_poly_2d(&nb_verts, &past_verts) {
                        overlaps = true;
                        break;
                    }
                }
                if overlaps {
                    continue;
                }

                if result_refs.len() < max_result {
                    result_refs.push(neighbour_ref);
                    result_parents.push(cur_ref);
                }
                if stack.len() < MAX_STACK {
                    stack.push_back(neighbour_ref);
                }
            }
        }

        Ok((result_refs, result_parents))
    }

    /// Extracts the straight ("string pulled") path along a polygon
    /// corridor.
    pub fn find_straight_path(
        &self,
        nav: &NavMesh,
        start_pos: Vec3,
        end_pos: Vec3,
        path: &[PolyRef],
    ) -> Result<StraightPathResult> {
        if path.is_empty() || !start_pos.is_finite() || !end_pos.is_finite() {
            return Err(Status::InvalidParam);
        }

        let mut result = StraightPathResult::default();

        let start = self.closest_point_on_poly_boundary(nav, path[0], start_pos)?;
        let end = self.closest_point_on_poly_boundary(nav, path[path.len() - 1], end_pos)?;

        result.points.push(StraightPathPoint {
            pos: start,
            flag: StraightPathFlag::Start,
            poly_ref: path[0],
        });

        if path.len() > 1 {
            let mut portal_apex = start;
            let mut portal_left = start;
            let mut portal_right = start;
            let mut apex_index = 0usize;
            let mut left_index = 0usize;
            let mut right_index = 0usize;
            let mut left_poly_ref = path[0];
            let mut right_poly_ref = path[0];

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_ref) = if i + 1 < path.len() {
                    match self.get_portal_points(nav, path[i], path[i + 1]) {
                        Ok((l, r)) => (l, r, path[i + 1]),
                        Err(_) => {
                            // The corridor is stale past this polygon; clamp
                            // the end onto it and report a partial path.
                            let clamped =
                                self.closest_point_on_poly_boundary(nav, path[i], end_pos)?;
                            append_end(&mut result.points, clamped);
                            result.partial = true;
                            return Ok(result);
                        }
                    }
                } else {
                    (end, end, PolyRef::NONE)
                };

                if i == 0 {
                    // Starting directly on the first portal: skip it.
                    let (d, _) = distance_pt_seg_sqr_2d(portal_apex, left, right);
                    if d < sqr(0.001) {
                        i += 1;
                        continue;
                    }
                }

                // Tighten the right side of the funnel.
                if tri_area_2d(portal_apex, portal_right, right) <= 0.0 {
                    if vequal(portal_apex, portal_right)
                        || tri_area_2d(portal_apex, portal_left, right) > 0.0
                    {
                        portal_right = right;
                        right_poly_ref = to_ref;
                        right_index = i;
                    } else {
                        // The right boundary crossed the left one: the left
                        // corner becomes the next waypoint and new apex.
                        result.points.push(StraightPathPoint {
                            pos: portal_left,
                            flag: StraightPathFlag::Corner,
                            poly_ref: left_poly_ref,
                        });
                        portal_apex = portal_left;
                        apex_index = left_index;
                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Tighten the left side of the funnel.
                if tri_area_2d(portal_apex, portal_left, left) >= 0.0 {
                    if vequal(portal_apex, portal_left)
                        || tri_area_2d(portal_apex, portal_right, left) < 0.0
                    {
                        portal_left = left;
                        left_poly_ref = to_ref;
                        left_index = i;
                    } else {
                        result.points.push(StraightPathPoint {
                            pos: portal_right,
                            flag: StraightPathFlag::Corner,
                            poly_ref: right_poly_ref,
                        });
                        portal_apex = portal_right;
                        apex_index = right_index;
                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }
        }

        append_end(&mut result.points, end);
        Ok(result)
    }

    /// The left/right endpoints of the portal crossed between two linked
    /// polygons, seen while traveling from `from_ref` to `to_ref`.
    pub fn get_portal_points(
        &self,
        nav: &NavMesh,
        from_ref: PolyRef,
        to_ref: PolyRef,
    ) -> Result<(Vec3, Vec3)> {
        let (tile, poly) = nav.get_tile_and_poly(from_ref)?;
        nav.get_tile_and_poly(to_ref)?;

        for link in tile.poly_links(poly) {
            if link.target != to_ref {
                continue;
            }
            let (va, vb) = tile.edge_verts(poly, link.edge as usize);
            // Border links may cover a sub-range of the edge.
            if link.side != 0xff && (link.bmin != 0 || link.bmax != 255) {
                let s = 1.0 / 255.0;
                let left = va.lerp(vb, link.bmin as f32 * s);
                let right = va.lerp(vb, link.bmax as f32 * s);
                return Ok((left, right));
            }
            return Ok((va, vb));
        }
        Err(Status::InvalidParam)
    }

    /// Midpoint of the portal between two linked polygons.
    pub fn get_edge_mid_point(
        &self,
        nav: &NavMesh,
        from_ref: PolyRef,
        to_ref: PolyRef,
    ) -> Result<Vec3> {
        let (left, right) = self.get_portal_points(nav, from_ref, to_ref)?;
        Ok((left + right) * 0.5)
    }

    /// Number of nodes touched by the most recent search.
    pub fn nodes_used(&self) -> usize {
        self.node_pool.node_count()
    }

    fn path_to_node(&self, last: NodeIndex) -> Vec<PolyRef> {
        let mut path = Vec::new();
        let mut idx = last;
        loop {
            let node = self.node_pool.node(idx);
            path.push(node.id);
            match NodePool::node_from_pidx(node.pidx) {
                Some(parent) => idx = parent,
                None => break,
            }
        }
        path.reverse();
        path
    }
}

fn poly_context(nav: &NavMesh, poly_ref: PolyRef) -> Option<PolyContext<'_>> {
    if poly_ref.is_none() {
        return None;
    }
    nav.get_tile_and_poly(poly_ref)
        .ok()
        .map(|(tile, poly)| PolyContext {
            poly_ref,
            tile,
            poly,
        })
}

fn closest_on_boundary(verts: &[Vec3], pos: Vec3) -> Vec3 {
    let mut best_d = f32::MAX;
    let mut best_pt = verts[0];
    for i in 0..verts.len() {
        let j = (i + 1) % verts.len();
        let (d, t) = distance_pt_seg_sqr_2d(pos, verts[i], verts[j]);
        if d < best_d {
            best_d = d;
            best_pt = verts[i].lerp(verts[j], t);
        }
    }
    best_pt
}

/// Appends the end point, merging with a coincident final corner.
fn append_end(points: &mut Vec<StraightPathPoint>, end: Vec3) {
    if let Some(last) = points.last_mut() {
        if vequal(last.pos, end) {
            last.flag = StraightPathFlag::End;
            last.poly_ref = PolyRef::NONE;
            return;
        }
    }
    points.push(StraightPathPoint {
        pos: end,
        flag: StraightPathFlag::End,
        poly_ref: PolyRef::NONE,
    });
}
