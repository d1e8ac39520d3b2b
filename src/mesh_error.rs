//! MeshDartError and OperationError: error types for mesh-dart public APIs
//!
//! [`MeshDartError`] covers setup, navigation and configuration failures and is
//! the only error that propagates out of a scheduler pass. [`OperationError`]
//! explains why one local edit was not applied; whenever it is returned the
//! mesh is observably unchanged.

use thiserror::Error;

use crate::data::scalar::ScalarType;
use crate::topology::primitive::{MeshKind, PrimitiveType};

/// Unified error type for mesh-dart setup and navigation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshDartError {
    /// The tuple refers to a dead cell or carries an outdated generation stamp.
    #[error("tuple is stale or does not refer to a live cell")]
    InvalidTuple,
    /// Switching the top-level primitive from a boundary facet.
    #[error("no neighbor across {primitive:?} of cell {cell} (boundary)")]
    NoSuchNeighbor {
        cell: usize,
        primitive: PrimitiveType,
    },
    /// The primitive does not exist in a mesh of this kind.
    #[error("primitive {primitive:?} is not part of a {kind:?} mesh")]
    UnsupportedPrimitive {
        primitive: PrimitiveType,
        kind: MeshKind,
    },
    /// Same name and primitive already registered with another type or stride.
    #[error("attribute `{name}` on {primitive:?} already registered with a different type or stride")]
    AttributeConflict {
        name: String,
        primitive: PrimitiveType,
    },
    /// No attribute with this name on this primitive.
    #[error("attribute `{name}` on {primitive:?} is not registered")]
    AttributeMissing {
        name: String,
        primitive: PrimitiveType,
    },
    /// The attribute exists but stores another scalar type.
    #[error("attribute `{name}` holds {found:?} values, requested {expected:?}")]
    AttributeTypeMismatch {
        name: String,
        expected: ScalarType,
        found: ScalarType,
    },
    /// A row or default value does not match the attribute stride.
    #[error("attribute `{name}` expects rows of {expected} values, got {found}")]
    StrideMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    /// Input cell references a vertex outside the declared vertex range.
    #[error("cell {cell} references vertex {vertex} outside [0, {n_vertices})")]
    InvalidVertexId {
        cell: usize,
        vertex: usize,
        n_vertices: usize,
    },
    /// Input cell has the wrong number of vertices for the mesh kind.
    #[error("cell {cell} has {found} vertices, expected {expected}")]
    CellArity {
        cell: usize,
        expected: usize,
        found: usize,
    },
    /// Input cell lists the same vertex twice.
    #[error("cell {cell} repeats a vertex")]
    DegenerateCell { cell: usize },
    /// A facet is shared by more than two cells.
    #[error("facet {facet:?} is shared by more than two cells")]
    NonManifoldFacet { facet: Vec<usize> },
    /// The simplex id is not live.
    #[error("{primitive:?} {id} is not live")]
    InactiveSimplex { primitive: PrimitiveType, id: usize },
    /// The shared mesh is being consolidated.
    #[error("mesh is being consolidated")]
    ConsolidateInProgress,
    /// Consolidation requested while scheduler passes still run.
    #[error("cannot consolidate while {0} pass(es) are running")]
    PassInProgress(usize),
    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Returned by `validate_invariants` when internal tables disagree.
    #[error("invariant check failed: {0}")]
    InvariantsViolated(String),
}

/// Phase of the operation protocol in which an invariant was evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CheckStage {
    Before,
    After,
}

/// Why a single operation was not applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The input tuple went stale before the operation started.
    #[error("input tuple is stale")]
    InvalidTuple,
    /// The operation does not apply to this configuration.
    #[error("operation not applicable: {0}")]
    TopologyPrecondition(&'static str),
    /// Collapsing would pinch the mesh or merge boundary components.
    #[error("collapse violates the link condition")]
    LinkConditionViolation,
    /// Swap requested on a boundary edge.
    #[error("edge is on the boundary")]
    NotInteriorEdge,
    /// Face swap requested on a boundary face.
    #[error("face is on the boundary")]
    NotInteriorFace,
    /// A registered invariant rejected the pre- or post-image.
    #[error("invariant `{invariant}` rejected the {stage:?} image")]
    InvariantViolation {
        invariant: String,
        stage: CheckStage,
    },
    /// The shared mesh is being consolidated.
    #[error("mesh is being consolidated")]
    ConsolidateInProgress,
    /// The concurrent scheduler could not claim the footprint.
    #[error("could not lock the operation footprint after {retries} retries")]
    LockRetryExhausted { retries: usize },
    /// Attribute setup error surfaced while transferring values.
    #[error("attribute transfer failed: {0}")]
    Attribute(MeshDartError),
    /// The edit needed more preallocated slots than the mesh had; the caller
    /// grows the mesh and retries.
    #[error("mesh ran out of preallocated slots")]
    OutOfSlots,
}

impl OperationError {
    /// Topological preconditions, including the link condition.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            OperationError::TopologyPrecondition(_)
                | OperationError::LinkConditionViolation
                | OperationError::NotInteriorEdge
                | OperationError::NotInteriorFace
        )
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, OperationError::InvariantViolation { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, OperationError::InvalidTuple)
    }
}

impl From<MeshDartError> for OperationError {
    fn from(err: MeshDartError) -> Self {
        match err {
            MeshDartError::InvalidTuple => OperationError::InvalidTuple,
            MeshDartError::NoSuchNeighbor { .. } => {
                OperationError::TopologyPrecondition("navigation crossed the boundary")
            }
            MeshDartError::ConsolidateInProgress => OperationError::ConsolidateInProgress,
            other => OperationError::Attribute(other),
        }
    }
}
