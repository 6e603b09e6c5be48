//! Tiled polygon navigation mesh store and query engine
//!
//! This crate holds the runtime core of tilenav: a tiled walkable-surface
//! mesh and the queries simulated agents run against it every tick.
//!
//! # Features
//!
//! - **Tiled Mesh Store**: polygons, vertices and adjacency links per tile,
//!   with salted references that survive tile streaming
//! - **Point Location**: nearest-polygon lookup and point clamping
//! - **Pathfinding**: A* over the polygon graph, one-shot or sliced across
//!   frame-budgeted update calls, with optional any-angle raycast shortcuts
//! - **Raycast**: walkability line-of-sight tests along the surface
//! - **Straight Path**: funnel-based corner extraction over a corridor
//! - **Wall Queries**: nearest-wall distance and per-polygon wall segments
//!   feeding local obstacle avoidance
//!
//! Mesh data comes from an external build pipeline as plain vertex, polygon
//! and neighbour arrays ([`TileData`]); this crate never generates geometry.
//!
//! # Example
//!
//! ```rust,ignore
//! use tilenav::{NavMesh, NavMeshParams, NavMeshQuery, StandardFilter};
//!
//! let mut mesh = NavMesh::new(NavMeshParams::default())?;
//! mesh.add_tile(tile_data)?;
//!
//! let mut query = NavMeshQuery::new();
//! let filter = StandardFilter::default();
//!
//! let (start_ref, start) = query.find_nearest_poly(&mesh, start, extents, &filter)?;
//! let (end_ref, end) = query.find_nearest_poly(&mesh, end, extents, &filter)?;
//! let route = query.find_path(&mesh, start_ref, end_ref, start, end, &filter)?;
//! ```
//!
//! The mesh is a per-call parameter so tiles can stream in and out while
//! sliced searches are suspended; a suspended search notices the edit and
//! fails its next slice instead of touching stale polygons.

pub mod filter;
pub mod nav_mesh;
pub mod node_pool;
pub mod query;
pub mod raycast;
pub mod sliced;
pub mod status;

pub use filter::{PolyContext, QueryFilter, StandardFilter};
pub use nav_mesh::{
    Link, MeshTile, NavMesh, NavMeshParams, Poly, PolyData, PolyRef, TileData, EXT_LINK,
    NULL_LINK, VERTS_PER_POLY,
};
pub use query::{
    NavMeshQuery, PathResult, StraightPathFlag, StraightPathPoint, StraightPathResult, WallHit,
    WallSegment, H_SCALE,
};
pub use raycast::{RaycastHit, RaycastOptions};
pub use sliced::{PathOptions, SlicedPathState, DEFAULT_RAYCAST_LIMIT};
pub use status::{Result, Status};

#[cfg(test)]
mod test_mesh;

#[cfg(test)]
mod path_query_tests;
