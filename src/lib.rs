#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-dart
//!
//! mesh-dart is a mesh-topology kernel for simplicial meshes (edge, triangle
//! and tetrahedral). It navigates meshes through small precomputed dart
//! tables instead of explicit adjacency pointers, applies local edits (edge
//! split, collapse, swap and tetrahedral face swap) as atomic transactions,
//! and schedules many edits sequentially or concurrently.
//!
//! ## Features
//! - [`Tuple`] cursors navigated in O(1) by table lookup, with generation
//!   stamps so stale cursors are detected instead of dangling
//! - Typed per-primitive attributes with transfer strategies for edits
//! - The operation protocol: before-check, rewrite, attribute transfer,
//!   after-check, then commit or exact rollback
//! - [`scheduler::ExecutePass`]: priority-ordered passes with a sequential
//!   policy and a partitioned concurrent policy with footprint claims
//! - Multimesh change notifications and a streaming attribute visitor
//!
//! ## Determinism
//!
//! The sequential policy is fully deterministic. The concurrent policy
//! partitions vertices with a `SmallRng` seeded from
//! [`scheduler::SchedulerConfig::partition_seed`]; commit order across
//! partitions is not fixed.
//!
//! ## Invariant checking
//! Enable the `check-invariants` feature to validate the whole connectivity
//! table after every committed operation.

pub mod data;
pub mod debug_invariants;
pub mod mesh;
pub mod mesh_error;
pub mod multimesh;
pub mod ops;
pub mod partitioning;
pub mod scheduler;
pub mod topology;

pub use debug_invariants::DebugInvariants;
pub use mesh::Mesh;
pub use mesh_error::{MeshDartError, OperationError};
pub use topology::{MeshKind, PrimitiveType, SimplexKey, Tuple};

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::data::{
        Accessor, AccessorMut, AttributeHandle, AttributeRow, AttributeScalar, AttributeVisitor,
        ScalarType, TypedHandle,
    };
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::mesh::Mesh;
    pub use crate::mesh_error::{CheckStage, MeshDartError, OperationError};
    pub use crate::multimesh::{CommittedChanges, MultiMeshObserver};
    pub use crate::ops::{
        AttributeTransferStrategy, Committed, FnInvariant, Invariant, InvariantCollection, InvariantExt,
        LinkConditionInvariant, MaxEdgeLengthInvariant, Operation, OperationKind,
        OperationSettings, OperationState, SimplexImage, SimplexInversionInvariant, Transfer,
        TransferSource, ValenceImprovementInvariant,
    };
    pub use crate::partitioning::{PartitionMap, PartitionerConfig, partition_vertices};
    pub use crate::scheduler::{
        ExecutePass, PassReport, PassStats, SchedulerConfig, SchedulerPolicy, SchedulerState,
        SharedMesh,
    };
    pub use crate::topology::{
        ConsolidateMap, MeshKind, PrimitiveType, Simplex, SimplexDart, SimplexKey, Tuple,
    };
}
