//! Sliced pathfinding state machine
//!
//! A sliced search is an A* whose expansion loop is chopped into
//! caller-budgeted slices: `init` seeds the open list, each `update` call
//! pops at most `max_iter` nodes, and `finalize` materializes the committed
//! path. The whole context lives by value on the query so it can be
//! suspended across arbitrary scheduling boundaries (typically frame ticks).

use tilenav_common::Vec3;

use crate::nav_mesh::PolyRef;
use crate::node_pool::NodeIndex;

/// State of the in-flight sliced search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlicedPathState {
    /// No sliced search has been initialized.
    #[default]
    Idle,
    /// The search has budget left to consume.
    InProgress,
    /// The goal polygon was reached.
    Success,
    /// The open list drained before reaching the goal; a best-effort path to
    /// the nearest visited polygon is available.
    Partial,
    /// A polygon reference became invalid while the search was suspended;
    /// the search must be restarted.
    Failed,
}

impl SlicedPathState {
    pub fn is_in_progress(self) -> bool {
        self == SlicedPathState::InProgress
    }

    /// True when `finalize` can produce a path.
    pub fn has_result(self) -> bool {
        matches!(self, SlicedPathState::Success | SlicedPathState::Partial)
    }
}

/// Options for path searches.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOptions {
    /// Shortcut across polygon corners by raycasting to the grandparent node
    /// when the parent is closer than `raycast_limit`. Produces any-angle
    /// paths instead of portal-midpoint zigzags.
    pub any_angle: bool,
    /// Maximum parent distance for shortcut raycasts; values <= 0 select a
    /// default budget.
    pub raycast_limit: f32,
}

/// Default shortcut raycast range, in world units.
pub const DEFAULT_RAYCAST_LIMIT: f32 = 32.0;

/// The single in-flight sliced-search context of a query engine.
#[derive(Debug, Clone, Default)]
pub(crate) struct SlicedQuery {
    pub state: SlicedPathState,
    pub start_ref: PolyRef,
    pub end_ref: PolyRef,
    pub start_pos: Vec3,
    pub end_pos: Vec3,
    pub any_angle: bool,
    pub raycast_limit_sqr: f32,
    /// Node nearest to the goal seen so far (pidx-encoded; 0 = none).
    pub last_best: NodeIndex,
    pub last_best_cost: f32,
}

impl SlicedQuery {
    pub fn reset(&mut self) {
        *self = SlicedQuery::default();
    }
}
