//! Common math and geometry utilities shared by the tilenav crates
//!
//! Navigation queries work almost exclusively on the xz-plane: the mesh is a
//! walkable surface and the y-axis only matters for height placement. This
//! crate layers the xz-plane helpers on top of [`glam`] that the query engine
//! and the avoidance sampler both need.

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// 3D position/velocity type used throughout the tilenav crates.
pub type Vec3 = glam::Vec3;
