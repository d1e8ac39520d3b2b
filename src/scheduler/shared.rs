//! A mesh shared between scheduler workers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::mesh::Mesh;
use crate::mesh_error::{MeshDartError, OperationError};
use crate::ops::{Committed, Operation, OperationKind, OperationSettings};
use crate::topology::connectivity::ConsolidateMap;
use crate::topology::tuple::Tuple;

/// Mesh behind a reader-writer lock, with the bookkeeping that keeps
/// consolidation and scheduler passes apart.
#[derive(Debug)]
pub struct SharedMesh {
    mesh: RwLock<Mesh>,
    consolidating: AtomicBool,
    active_passes: AtomicUsize,
}

/// Registration of a running pass; unregisters on drop.
#[derive(Debug)]
pub(crate) struct PassGuard<'a> {
    shared: &'a SharedMesh,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.shared.active_passes.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SharedMesh {
    pub fn new(mesh: Mesh) -> Self {
        Self {
            mesh: RwLock::new(mesh),
            consolidating: AtomicBool::new(false),
            active_passes: AtomicUsize::new(0),
        }
    }

    pub fn into_inner(self) -> Mesh {
        self.mesh.into_inner()
    }

    /// Shared read access for queries.
    pub fn read(&self) -> RwLockReadGuard<'_, Mesh> {
        self.mesh.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Mesh> {
        self.mesh.write()
    }

    pub fn active_passes(&self) -> usize {
        self.active_passes.load(Ordering::Acquire)
    }

    pub fn is_consolidating(&self) -> bool {
        self.consolidating.load(Ordering::Acquire)
    }

    pub(crate) fn begin_pass(&self) -> Result<PassGuard<'_>, MeshDartError> {
        if self.is_consolidating() {
            return Err(MeshDartError::ConsolidateInProgress);
        }
        self.active_passes.fetch_add(1, Ordering::AcqRel);
        let guard = PassGuard { shared: self };
        // consolidate may have raised its flag between the check and the increment
        if self.is_consolidating() {
            return Err(MeshDartError::ConsolidateInProgress);
        }
        Ok(guard)
    }

    /// Compact the mesh. Fails while any pass runs or another consolidation
    /// holds the mesh.
    pub fn consolidate(&self) -> Result<ConsolidateMap, MeshDartError> {
        let running = self.active_passes();
        if running > 0 {
            return Err(MeshDartError::PassInProgress(running));
        }
        if self
            .consolidating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MeshDartError::ConsolidateInProgress);
        }
        let running = self.active_passes();
        if running > 0 {
            self.consolidating.store(false, Ordering::Release);
            return Err(MeshDartError::PassInProgress(running));
        }
        let map = self.mesh.write().consolidate();
        self.consolidating.store(false, Ordering::Release);
        Ok(map)
    }

    /// Run one operation outside any pass.
    pub fn execute(
        &self,
        kind: OperationKind,
        tuple: Tuple,
        settings: &OperationSettings,
    ) -> Result<Committed, OperationError> {
        let mut mesh = self.mesh.write();
        if self.is_consolidating() {
            return Err(OperationError::ConsolidateInProgress);
        }
        Operation::new(kind, tuple, settings).execute(&mut mesh)
    }
}

impl From<Mesh> for SharedMesh {
    fn from(mesh: Mesh) -> Self {
        Self::new(mesh)
    }
}
