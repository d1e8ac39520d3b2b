//! Local operations and their execution protocol.
//!
//! Every operation runs the same state machine:
//! `Proposed -> BeforeChecked -> Rewritten -> AttributesTransferred ->
//! AfterChecked -> Committed`, or ends in `RolledBack` from any state. Checks
//! before the rewrite never mutate the mesh; failures after it undo the
//! operation's own connectivity and attribute logs, so a failed operation
//! leaves the mesh exactly as it found it.
//!
//! The rewrite itself only needs a shared mesh. It takes ids from slots the
//! mesh preallocated; when they run out it fails with
//! [`OperationError::OutOfSlots`], and [`Operation::execute`] grows the mesh
//! and runs again.

pub(crate) mod edit;
pub mod image;
pub mod invariant;
pub mod transfer;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::attribute_store::TypedHandle;
use crate::data::scalar::AttributeScalar;
#[cfg(feature = "check-invariants")]
use crate::debug_invariants::DebugInvariants;
use crate::mesh::{Mesh, Transaction};
use crate::mesh_error::{CheckStage, OperationError};
use crate::multimesh::CommittedChanges;
use crate::topology::tuple::Tuple;

use self::edit::{Applied, EditPlan};
use self::transfer::{ErasedTransfer, TransferRule};

pub use self::image::{ImageCell, SimplexImage};
pub use self::invariant::{
    FnInvariant, Invariant, InvariantCollection, InvariantExt, LinkConditionInvariant,
    MaxEdgeLengthInvariant, SimplexInversionInvariant, ValenceImprovementInvariant,
};
pub use self::transfer::{
    AttributeTransferStrategy, SimplexPredicate, Transfer, TransferSource, boundary_predicate,
    tag_predicate,
};

/// Kind of local edit.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Insert a vertex on an edge.
    Split,
    /// Merge an edge's tuple vertex into the other endpoint.
    Collapse,
    /// Flip an interior edge (2-2 on triangles, 3-2 on tetrahedra).
    Swap,
    /// Replace a face shared by two tetrahedra with an edge (2-3).
    FaceSwap,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Split => "split",
            OperationKind::Collapse => "collapse",
            OperationKind::Swap => "swap",
            OperationKind::FaceSwap => "face_swap",
        }
    }
}

/// Protocol state of one operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OperationState {
    Proposed,
    BeforeChecked,
    Rewritten,
    AttributesTransferred,
    AfterChecked,
    Committed,
    RolledBack,
}

/// Outcome of a committed operation.
#[derive(Clone, Debug)]
pub struct Committed {
    pub kind: OperationKind,
    /// Tuple on the new vertex (split), the surviving vertex (collapse) or the
    /// new edge or face (swaps).
    pub representative: Tuple,
    /// Edges around the edit, for re-seeding a scheduler queue.
    pub new_candidates: Vec<Tuple>,
    pub post: SimplexImage,
}

/// Invariants and attribute transfer rules shared by many operations.
#[derive(Clone, Default)]
pub struct OperationSettings {
    invariants: InvariantCollection,
    transfers: Vec<Arc<dyn ErasedTransfer>>,
}

impl OperationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invariants(&self) -> &InvariantCollection {
        &self.invariants
    }

    pub fn add_invariant<I: Invariant + 'static>(&mut self, invariant: I) -> &mut Self {
        self.invariants.push(invariant);
        self
    }

    pub fn add_invariant_arc(&mut self, invariant: Arc<dyn Invariant>) -> &mut Self {
        self.invariants.push_arc(invariant);
        self
    }

    fn push_rule<T: AttributeScalar>(
        &mut self,
        handle: &TypedHandle<T>,
        strategy: Arc<dyn AttributeTransferStrategy<T>>,
        predicate: Option<SimplexPredicate>,
        kind: Option<OperationKind>,
    ) -> &mut Self {
        self.transfers.push(Arc::new(TransferRule::new(
            handle.clone(),
            strategy,
            predicate,
            kind,
        )));
        self
    }

    /// Transfer rule for `handle` used by every operation kind.
    pub fn set_transfer<T, S>(&mut self, handle: &TypedHandle<T>, strategy: S) -> &mut Self
    where
        T: AttributeScalar,
        S: AttributeTransferStrategy<T> + 'static,
    {
        self.push_rule(handle, Arc::new(strategy), None, None)
    }

    /// Rule for one operation kind; overrides the general rule for that kind.
    pub fn set_transfer_for<T, S>(&mut self, kind: OperationKind, handle: &TypedHandle<T>, strategy: S) -> &mut Self
    where
        T: AttributeScalar,
        S: AttributeTransferStrategy<T> + 'static,
    {
        self.push_rule(handle, Arc::new(strategy), None, Some(kind))
    }

    /// General rule whose sources are flagged by `predicate`.
    pub fn set_transfer_with_predicate<T, S>(
        &mut self,
        handle: &TypedHandle<T>,
        strategy: S,
        predicate: SimplexPredicate,
    ) -> &mut Self
    where
        T: AttributeScalar,
        S: AttributeTransferStrategy<T> + 'static,
    {
        self.push_rule(handle, Arc::new(strategy), Some(predicate), None)
    }

    /// One rule per attribute: the latest kind-specific rule if any, else the
    /// latest general one.
    fn rules_for(&self, kind: OperationKind) -> Vec<Arc<dyn ErasedTransfer>> {
        let mut chosen: Vec<Arc<dyn ErasedTransfer>> = Vec::new();
        for rule in &self.transfers {
            if rule.kind_filter().is_some_and(|k| k != kind) {
                continue;
            }
            match chosen.iter().position(|c| c.handle() == rule.handle()) {
                Some(i) => {
                    if rule.kind_filter().is_some() || chosen[i].kind_filter().is_none() {
                        chosen[i] = Arc::clone(rule);
                    }
                }
                None => chosen.push(Arc::clone(rule)),
            }
        }
        chosen
    }
}

/// Spare slots per primitive reserved before a run; doubled on each retry.
const INITIAL_HEADROOM: usize = 64;

/// One local edit on one input tuple.
pub struct Operation<'s> {
    kind: OperationKind,
    input: Tuple,
    settings: &'s OperationSettings,
    state: OperationState,
}

impl<'s> Operation<'s> {
    pub fn new(kind: OperationKind, input: Tuple, settings: &'s OperationSettings) -> Self {
        Self {
            kind,
            input,
            settings,
            state: OperationState::Proposed,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn input(&self) -> &Tuple {
        &self.input
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    fn advance(&mut self, next: OperationState) {
        log::trace!("{} {:?}: {:?} -> {:?}", self.kind.as_str(), self.input, self.state, next);
        self.state = next;
    }

    /// Run the protocol. On error the mesh is unchanged and the state is
    /// `RolledBack`.
    pub fn execute(&mut self, mesh: &mut Mesh) -> Result<Committed, OperationError> {
        let mut headroom = INITIAL_HEADROOM;
        loop {
            mesh.reserve(headroom);
            match self.execute_shared(mesh) {
                Err(OperationError::OutOfSlots) => {
                    log::debug!("{} ran out of slots, growing by {}", self.kind.as_str(), headroom * 2);
                    self.state = OperationState::Proposed;
                    headroom *= 2;
                }
                #[cfg(feature = "check-invariants")]
                Ok(committed) => {
                    mesh.debug_assert_invariants();
                    return Ok(committed);
                }
                other => return other,
            }
        }
    }

    /// One attempt through a shared mesh. Fails with
    /// [`OperationError::OutOfSlots`] when the preallocated slots run out; the
    /// caller grows the mesh and runs a fresh operation.
    pub(crate) fn execute_shared(&mut self, mesh: &Mesh) -> Result<Committed, OperationError> {
        match self.run(mesh) {
            Ok(committed) => Ok(committed),
            Err(err) => {
                self.advance(OperationState::RolledBack);
                Err(err)
            }
        }
    }

    fn run(&mut self, mesh: &Mesh) -> Result<Committed, OperationError> {
        if self.state != OperationState::Proposed {
            return Err(OperationError::TopologyPrecondition("operation already executed"));
        }
        if !mesh.is_valid(&self.input) {
            return Err(OperationError::InvalidTuple);
        }
        let plan = edit::plan(mesh, self.kind, &self.input)?;
        if !LinkConditionInvariant.before(mesh, &plan.pre) {
            return Err(LinkConditionInvariant.violation(CheckStage::Before));
        }
        self.settings.invariants.check_before(mesh, &plan.pre)?;
        self.advance(OperationState::BeforeChecked);

        let rules = self.settings.rules_for(self.kind);
        let captured = rules
            .iter()
            .map(|rule| rule.capture(mesh, &plan.pre))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = Transaction::default();
        let result = self.rewrite(mesh, &mut tx, &plan, &rules, &captured);
        let (applied, representative) = match result {
            Ok(done) => done,
            Err(err) => {
                mesh.rollback(tx);
                return Err(err);
            }
        };
        let new_candidates = plan.new_candidates(mesh, &applied);
        mesh.commit(tx);
        self.advance(OperationState::Committed);

        let changes = CommittedChanges {
            kind: self.kind,
            pre: &plan.pre,
            post: &applied.post,
            representative,
        };
        for observer in mesh.observers() {
            observer.on_operation_committed(&changes);
        }

        Ok(Committed {
            kind: self.kind,
            representative,
            new_candidates,
            post: applied.post,
        })
    }

    /// Everything between the first logged write and the commit decision.
    fn rewrite(
        &mut self,
        mesh: &Mesh,
        tx: &mut Transaction,
        plan: &EditPlan,
        rules: &[Arc<dyn ErasedTransfer>],
        captured: &[transfer::CapturedRows],
    ) -> Result<(Applied, Tuple), OperationError> {
        let applied = plan.apply(mesh, tx)?;
        self.advance(OperationState::Rewritten);

        for (rule, rows) in rules.iter().zip(captured) {
            let targets = plan.transfer_targets(&applied, rule.handle().primitive());
            rule.apply(mesh, tx, rows, &targets)?;
        }
        self.advance(OperationState::AttributesTransferred);

        self.settings
            .invariants
            .check_after(mesh, &plan.pre, &applied.post)?;
        self.advance(OperationState::AfterChecked);

        let representative = plan.representative(mesh, &applied).ok_or(
            OperationError::TopologyPrecondition("edit left no tuple on its representative simplex"),
        )?;
        Ok((applied, representative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh_error::OperationError;
    use crate::ops::invariant::FnInvariant;
    use crate::ops::transfer::Transfer;
    use crate::topology::primitive::{MeshKind, PrimitiveType};
    use crate::topology::simplex::SimplexKey;

    fn quad() -> Mesh {
        Mesh::from_cells(MeshKind::Triangle, 4, &[[0, 1, 3], [1, 2, 3]]).unwrap()
    }

    #[test]
    fn split_interior_edge() {
        let mut mesh = quad();
        let settings = OperationSettings::new();
        let t = mesh.tuple_of(&SimplexKey::new(&[1, 3])).unwrap();
        let mut op = Operation::new(OperationKind::Split, t, &settings);
        let done = op.execute(&mut mesh).unwrap();
        assert_eq!(op.state(), OperationState::Committed);
        assert_eq!(mesh.connectivity().live_count(PrimitiveType::Face), 4);
        assert_eq!(mesh.connectivity().live_count(PrimitiveType::Vertex), 5);
        let w = mesh.id(&done.representative, PrimitiveType::Vertex).unwrap();
        assert_eq!(w, 4);
        assert_eq!(done.new_candidates.len(), 4);
        assert!(!mesh.is_valid(&t));
    }

    #[test]
    fn stale_tuples_are_rejected() {
        let mut mesh = quad();
        let settings = OperationSettings::new();
        let t = mesh.tuple_of(&SimplexKey::new(&[1, 3])).unwrap();
        Operation::new(OperationKind::Split, t, &settings)
            .execute(&mut mesh)
            .unwrap();
        let mut again = Operation::new(OperationKind::Split, t, &settings);
        assert_eq!(again.execute(&mut mesh).unwrap_err(), OperationError::InvalidTuple);
        assert_eq!(again.state(), OperationState::RolledBack);
    }

    #[test]
    fn after_check_failure_rolls_back_everything() {
        let mut mesh = quad();
        let pos = mesh
            .register_attribute("position", PrimitiveType::Vertex, &[0.0f64; 2])
            .unwrap();
        let mut settings = OperationSettings::new();
        settings
            .set_transfer(&pos, Transfer::Mean)
            .add_invariant(FnInvariant::after("reject", |_, _, _| false));
        let before = mesh.clone();
        let t = mesh.tuple_of(&SimplexKey::new(&[1, 3])).unwrap();
        let err = Operation::new(OperationKind::Split, t, &settings)
            .execute(&mut mesh)
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(mesh, before);
    }

    #[test]
    fn kind_specific_rules_override_general_ones() {
        let mut mesh = quad();
        let h = mesh.register_attribute("w", PrimitiveType::Vertex, &[0.0f64]).unwrap();
        let mut settings = OperationSettings::new();
        settings
            .set_transfer_for(OperationKind::Split, &h, Transfer::CopyTuple)
            .set_transfer(&h, Transfer::Mean);
        let split = settings.rules_for(OperationKind::Split);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].kind_filter(), Some(OperationKind::Split));
        assert_eq!(settings.rules_for(OperationKind::Swap)[0].kind_filter(), None);
    }

    #[test]
    fn full_mesh_grows_and_retries() {
        let mut mesh = quad();
        let settings = OperationSettings::new();
        let t = mesh.tuple_of(&SimplexKey::new(&[1, 3])).unwrap();
        let mut op = Operation::new(OperationKind::Split, t, &settings);
        // built meshes carry no spare slot
        assert_eq!(op.execute_shared(&mesh).unwrap_err(), OperationError::OutOfSlots);
        assert_eq!(mesh, quad());
        let mut op = Operation::new(OperationKind::Split, t, &settings);
        op.execute(&mut mesh).unwrap();
        assert_eq!(op.state(), OperationState::Committed);
        assert!(mesh.connectivity().physical_capacity(PrimitiveType::Face) >= 64);
    }

    #[test]
    fn point_meshes_reject_edits() {
        let mut mesh = Mesh::from_points(4);
        let settings = OperationSettings::new();
        let t = mesh.get_all(PrimitiveType::Vertex)[0];
        for kind in [OperationKind::Split, OperationKind::Collapse, OperationKind::Swap, OperationKind::FaceSwap] {
            let err = Operation::new(kind, t, &settings).execute(&mut mesh).unwrap_err();
            assert!(matches!(err, OperationError::TopologyPrecondition(_)), "{kind:?}: {err:?}");
            assert!(err.is_precondition());
        }
        assert_eq!(mesh, Mesh::from_points(4));
    }

    #[test]
    fn swap_rejects_boundary_edges() {
        let mut mesh = quad();
        let settings = OperationSettings::new();
        let t = mesh.tuple_of(&SimplexKey::new(&[0, 1])).unwrap();
        let err = Operation::new(OperationKind::Swap, t, &settings)
            .execute(&mut mesh)
            .unwrap_err();
        assert_eq!(err, OperationError::NotInteriorEdge);
    }
}
