//! Notification hook for cross-mesh correspondence maps.
//!
//! The kernel does not maintain parent/child relations between meshes. It
//! reports every committed edit and every consolidation to the registered
//! observers so an external mapper can keep its own tables in sync.

use crate::ops::OperationKind;
use crate::ops::image::SimplexImage;
use crate::topology::connectivity::ConsolidateMap;
use crate::topology::tuple::Tuple;

/// What one committed operation replaced.
#[derive(Clone, Copy, Debug)]
pub struct CommittedChanges<'a> {
    pub kind: OperationKind,
    /// Simplices of the removed cells, as they were before the edit.
    pub pre: &'a SimplexImage,
    /// Simplices of the cells that replaced them.
    pub post: &'a SimplexImage,
    pub representative: Tuple,
}

/// Receives structural change notifications from a [`crate::mesh::Mesh`].
///
/// Called right after the edit commits. Under the concurrent scheduler several
/// workers may call in at once, each holding the mesh by shared reference;
/// implementations must not block on other mesh work.
pub trait MultiMeshObserver: Send + Sync {
    /// Exactly once per committed operation, after attribute transfer.
    fn on_operation_committed(&self, changes: &CommittedChanges<'_>);

    /// After ids were compacted.
    fn on_consolidated(&self, _map: &ConsolidateMap) {}
}
