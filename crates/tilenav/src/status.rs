//! Status codes for navigation queries

/// Result type for navigation operations.
pub type Result<T> = std::result::Result<T, Status>;

/// Failure status of a navigation operation.
///
/// Recoverable "partial" outcomes are not statuses: a best-effort path is
/// still `Ok` and carries its own partial flag (see
/// [`PathResult`](crate::query::PathResult) and
/// [`SlicedPathState`](crate::sliced::SlicedPathState)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Status {
    /// A provided parameter was malformed: an invalid polygon reference, a
    /// non-finite position, a negative radius, or similar. Nothing was
    /// mutated.
    #[error("invalid parameter")]
    InvalidParam,
    /// An internal invariant broke mid-operation, e.g. a polygon reference
    /// cached by an in-progress sliced search became invalid because the
    /// mesh changed underneath it. The operation was aborted.
    #[error("operation failed")]
    Failure,
    /// The search node pool was exhausted before the query completed.
    #[error("search node pool exhausted")]
    OutOfNodes,
    /// Tile data handed to the mesh store was malformed.
    #[error("malformed tile data: {0}")]
    InvalidMesh(&'static str),
    /// The tile arena is full or the tile location is already occupied.
    #[error("tile storage rejected the tile: {0}")]
    TileRejected(&'static str),
    /// The requested item does not exist.
    #[error("value not found")]
    NotFound,
}
