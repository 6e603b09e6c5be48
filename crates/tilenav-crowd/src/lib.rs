//! Per-agent local avoidance support on tilenav meshes
//!
//! This crate holds the two per-agent pieces a crowd coordinator consults
//! every simulation tick:
//!
//! - [`LocalBoundary`]: a bounded, distance-sorted cache of the wall
//!   segments near an agent, refreshed through the navigation query engine
//! - [`ObstacleAvoidanceQuery`]: fixed-capacity registries of circular
//!   (agent) and segment (wall) obstacles, with grid and adaptive velocity
//!   samplers that pick the least-penalized candidate velocity
//!
//! Both are plain values with no internal locking; a coordinator runs one
//! set per worker thread and never shares an instance across concurrent
//! callers.

pub mod local_boundary;
pub mod obstacle_avoidance;

pub use local_boundary::{LocalBoundary, MAX_LOCAL_SEGS};
pub use obstacle_avoidance::{
    ObstacleAvoidanceDebugData, ObstacleAvoidanceParams, ObstacleAvoidanceQuery, ObstacleCircle,
    ObstacleSegment, MAX_PATTERN_DIVS, MAX_PATTERN_RINGS,
};
