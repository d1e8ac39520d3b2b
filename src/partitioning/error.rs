//! Partitioning errors for mesh-dart

use thiserror::Error;

/// Errors from vertex partitioning.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Asked for zero parts.
    #[error("Empty partition request: no parts available")]
    NoParts,
    /// A live vertex ended up without a part.
    #[error("PartitionMap missing part for vertex {0}")]
    MissingPartition(usize),
}
