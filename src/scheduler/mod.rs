//! Candidate scheduling: run many operations over a mesh.
//!
//! An [`ExecutePass`] takes `(kind, tuple)` candidates, orders them by a
//! priority callback and executes them until the queue drains, the stopping
//! criterion fires or the cancel flag is raised. Each commit re-seeds the
//! queue with the edges around the edit. Per-operation failures are counted
//! in [`PassStats`], never propagated; only setup errors end a pass early.

mod claims;
mod concurrent;
mod queue;
mod shared;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::mesh::Mesh;
use crate::mesh_error::{MeshDartError, OperationError};
use crate::ops::{Committed, Operation, OperationKind, OperationSettings};
use crate::topology::tuple::Tuple;

use self::queue::CandidateQueue;
pub use self::shared::SharedMesh;

pub type PriorityFn = Arc<dyn Fn(&Mesh, OperationKind, &Tuple) -> f64 + Send + Sync>;
pub type ShouldProcessFn = Arc<dyn Fn(&Mesh, OperationKind, &Tuple) -> bool + Send + Sync>;
pub type StoppingFn = Arc<dyn Fn(&Mesh) -> bool + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerPolicy {
    /// Calling thread only, strict priority order.
    #[default]
    Sequential,
    /// One worker per vertex partition, footprints claimed before editing.
    Concurrent,
}

/// Pass configuration. Every field has a default, so partial documents
/// deserialize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub policy: SchedulerPolicy,
    /// Worker count for the concurrent policy; 0 means the rayon default.
    pub num_workers: usize,
    /// Processed candidates between two stopping-criterion evaluations.
    pub checking_frequency: usize,
    /// Edge hops around the input simplex claimed before an edit.
    pub lock_radius: usize,
    /// Failed claims tolerated per candidate before it counts as failed.
    pub max_lock_retries: usize,
    pub partition_seed: u64,
    /// Hard cap on attempted operations.
    pub max_attempts: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulerPolicy::Sequential,
            num_workers: 0,
            checking_frequency: 100,
            lock_radius: 2,
            max_lock_retries: 8,
            partition_seed: 42,
            max_attempts: None,
        }
    }
}

impl SchedulerConfig {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn concurrent(num_workers: usize) -> Self {
        Self {
            policy: SchedulerPolicy::Concurrent,
            num_workers,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), MeshDartError> {
        if self.checking_frequency == 0 {
            return Err(MeshDartError::InvalidConfig(
                "checking_frequency must be at least 1".into(),
            ));
        }
        if self.lock_radius == 0 {
            return Err(MeshDartError::InvalidConfig(
                "lock_radius must be at least 1 to cover the edited cells".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn worker_count(&self) -> usize {
        if self.num_workers == 0 {
            rayon::current_num_threads().max(1)
        } else {
            self.num_workers
        }
    }
}

/// Outcome counters of one pass.
///
/// `attempted == succeeded + failed_invariant + failed_precondition`. Stale
/// candidates, `should_process` rejections and exhausted lock retries are
/// counted without being attempted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed_invariant: usize,
    pub failed_precondition: usize,
    pub failed_stale: usize,
    pub failed_lock: usize,
    pub skipped_should_process: usize,
}

impl PassStats {
    pub fn merge(&mut self, other: &PassStats) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed_invariant += other.failed_invariant;
        self.failed_precondition += other.failed_precondition;
        self.failed_stale += other.failed_stale;
        self.failed_lock += other.failed_lock;
        self.skipped_should_process += other.skipped_should_process;
    }

    /// Candidates taken off a queue.
    pub fn processed(&self) -> usize {
        self.attempted + self.failed_stale + self.failed_lock + self.skipped_should_process
    }

    /// Count the outcome of one attempted operation. Setup errors are
    /// handed back for propagation.
    pub(crate) fn record(
        &mut self,
        result: Result<Committed, OperationError>,
    ) -> Result<Option<Committed>, MeshDartError> {
        self.attempted += 1;
        match result {
            Ok(committed) => {
                self.succeeded += 1;
                Ok(Some(committed))
            }
            Err(err) if err.is_invariant_violation() => {
                self.failed_invariant += 1;
                Ok(None)
            }
            Err(err) if err.is_precondition() => {
                self.failed_precondition += 1;
                Ok(None)
            }
            Err(OperationError::Attribute(err)) => Err(err),
            Err(OperationError::ConsolidateInProgress) => Err(MeshDartError::ConsolidateInProgress),
            Err(err) => {
                // stale or lock outcomes are caught before the attempt
                self.attempted -= 1;
                self.failed_stale += usize::from(err.is_stale());
                self.failed_lock += usize::from(!err.is_stale());
                Ok(None)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Running,
    /// The queue drained.
    Finished,
    /// The stopping criterion or the attempt cap ended the pass.
    StoppedByCriterion,
    /// The cancel flag was raised.
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassReport {
    pub state: SchedulerState,
    pub stats: PassStats,
}

/// A configured pass over a mesh.
pub struct ExecutePass {
    settings: OperationSettings,
    config: SchedulerConfig,
    priority: PriorityFn,
    should_process: Option<ShouldProcessFn>,
    stopping: Option<StoppingFn>,
    reseed: bool,
    cancel: Arc<AtomicBool>,
    state: SchedulerState,
}

impl ExecutePass {
    pub fn new(settings: OperationSettings, config: SchedulerConfig) -> Result<Self, MeshDartError> {
        config.validate()?;
        Ok(Self {
            settings,
            config,
            priority: Arc::new(|_, _, _| 0.0),
            should_process: None,
            stopping: None,
            reseed: true,
            cancel: Arc::new(AtomicBool::new(false)),
            state: SchedulerState::Idle,
        })
    }

    /// Larger values run first.
    pub fn with_priority<F>(mut self, f: F) -> Self
    where
        F: Fn(&Mesh, OperationKind, &Tuple) -> f64 + Send + Sync + 'static,
    {
        self.priority = Arc::new(f);
        self
    }

    /// Cheap recheck on pop; `false` drops the candidate without attempting it.
    pub fn with_should_process<F>(mut self, f: F) -> Self
    where
        F: Fn(&Mesh, OperationKind, &Tuple) -> bool + Send + Sync + 'static,
    {
        self.should_process = Some(Arc::new(f));
        self
    }

    pub fn with_stopping_criterion<F>(mut self, f: F) -> Self
    where
        F: Fn(&Mesh) -> bool + Send + Sync + 'static,
    {
        self.stopping = Some(Arc::new(f));
        self
    }

    /// Whether commits push their new candidates (with the same kind).
    pub fn with_reseeding(mut self, reseed: bool) -> Self {
        self.reseed = reseed;
        self
    }

    /// Share an externally owned cancel flag.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn settings(&self) -> &OperationSettings {
        &self.settings
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    fn transition(&mut self, next: SchedulerState) {
        log::trace!("scheduler: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run on an exclusively borrowed mesh. Always sequential.
    pub fn run(
        &mut self,
        mesh: &mut Mesh,
        candidates: Vec<(OperationKind, Tuple)>,
    ) -> Result<PassReport, MeshDartError> {
        self.transition(SchedulerState::Running);
        let result = self.run_sequential(mesh, candidates);
        self.finish(result)
    }

    /// Run on a shared mesh with the configured policy.
    pub fn run_shared(
        &mut self,
        shared: &SharedMesh,
        candidates: Vec<(OperationKind, Tuple)>,
    ) -> Result<PassReport, MeshDartError> {
        let _pass = shared.begin_pass()?;
        self.transition(SchedulerState::Running);
        let result = match self.config.policy {
            SchedulerPolicy::Sequential => {
                let mut mesh = shared.write();
                self.run_sequential(&mut mesh, candidates)
            }
            SchedulerPolicy::Concurrent => concurrent::run(self, shared, candidates),
        };
        self.finish(result)
    }

    fn finish(
        &mut self,
        result: Result<PassReport, MeshDartError>,
    ) -> Result<PassReport, MeshDartError> {
        match result {
            Ok(report) => {
                self.transition(report.state);
                log::debug!("pass ended {:?}: {:?}", report.state, report.stats);
                Ok(report)
            }
            Err(err) => {
                self.transition(SchedulerState::Idle);
                Err(err)
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn should_stop(&self, mesh: &Mesh, processed: usize) -> bool {
        processed % self.config.checking_frequency == 0
            && self.stopping.as_ref().is_some_and(|stop| stop(mesh))
    }

    fn run_sequential(
        &self,
        mesh: &mut Mesh,
        candidates: Vec<(OperationKind, Tuple)>,
    ) -> Result<PassReport, MeshDartError> {
        log::debug!("sequential pass over {} candidates", candidates.len());
        let mut queue = CandidateQueue::new();
        for (kind, tuple) in candidates {
            let priority = (self.priority)(mesh, kind, &tuple);
            queue.push(kind, tuple, priority);
        }
        let mut stats = PassStats::default();
        let mut processed = 0usize;
        let state = loop {
            if self.cancelled() {
                break SchedulerState::Cancelled;
            }
            if self.config.max_attempts.is_some_and(|cap| stats.attempted >= cap) {
                break SchedulerState::StoppedByCriterion;
            }
            let Some(entry) = queue.pop() else {
                break SchedulerState::Finished;
            };
            processed += 1;

            if !mesh.is_valid(&entry.tuple) {
                stats.failed_stale += 1;
            } else if self
                .should_process
                .as_ref()
                .is_some_and(|f| !f(mesh, entry.kind, &entry.tuple))
            {
                stats.skipped_should_process += 1;
            } else {
                let result = Operation::new(entry.kind, entry.tuple, &self.settings).execute(mesh);
                if let Some(committed) = stats.record(result)? {
                    if self.reseed {
                        for tuple in committed.new_candidates {
                            let priority = (self.priority)(mesh, entry.kind, &tuple);
                            queue.push(entry.kind, tuple, priority);
                        }
                    }
                }
            }

            if self.should_stop(mesh, processed) {
                break SchedulerState::StoppedByCriterion;
            }
        };
        Ok(PassReport { state, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::primitive::{MeshKind, PrimitiveType};
    use crate::topology::simplex::SimplexKey;

    fn quad() -> Mesh {
        Mesh::from_cells(MeshKind::Triangle, 4, &[[0, 1, 3], [1, 2, 3]]).unwrap()
    }

    fn all_edges(mesh: &Mesh, kind: OperationKind) -> Vec<(OperationKind, Tuple)> {
        mesh.get_all(PrimitiveType::Edge)
            .into_iter()
            .map(|t| (kind, t))
            .collect()
    }

    #[test]
    fn config_defaults_and_validation() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.checking_frequency, 100);
        assert_eq!(cfg.lock_radius, 2);
        assert!(cfg.validate().is_ok());
        let bad = SchedulerConfig {
            checking_frequency: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            ExecutePass::new(OperationSettings::new(), bad),
            Err(MeshDartError::InvalidConfig(_))
        ));
    }

    #[test]
    fn stale_candidates_are_counted_not_attempted() {
        let mut mesh = quad();
        let t = mesh.tuple_of(&SimplexKey::new(&[1, 3])).unwrap();
        let mut pass = ExecutePass::new(OperationSettings::new(), SchedulerConfig::default())
            .unwrap()
            .with_reseeding(false);
        // the second copy is stale once the first commits
        let report = pass
            .run(&mut mesh, vec![(OperationKind::Split, t), (OperationKind::Split, t)])
            .unwrap();
        assert_eq!(report.state, SchedulerState::Finished);
        assert_eq!(report.stats.succeeded, 1);
        assert_eq!(report.stats.failed_stale, 1);
        assert_eq!(report.stats.attempted, 1);
        assert_eq!(pass.state(), SchedulerState::Finished);
    }

    #[test]
    fn precondition_failures_are_counted() {
        let mut mesh = quad();
        let candidates = all_edges(&mesh, OperationKind::Swap);
        let mut pass = ExecutePass::new(OperationSettings::new(), SchedulerConfig::default())
            .unwrap()
            .with_reseeding(false)
            .with_priority(|m, _, t| {
                // boundary edges first
                if m.is_boundary(t, PrimitiveType::Edge).unwrap_or(false) { 1.0 } else { 0.0 }
            });
        let report = pass.run(&mut mesh, candidates).unwrap();
        let s = report.stats;
        assert_eq!(s.failed_precondition, 4);
        assert_eq!(s.succeeded, 1);
        assert_eq!(s.attempted, s.succeeded + s.failed_invariant + s.failed_precondition);
    }

    #[test]
    fn should_process_skips_without_attempting() {
        let mut mesh = quad();
        let candidates = all_edges(&mesh, OperationKind::Split);
        let mut pass = ExecutePass::new(OperationSettings::new(), SchedulerConfig::default())
            .unwrap()
            .with_should_process(|_, _, _| false);
        let report = pass.run(&mut mesh, candidates).unwrap();
        assert_eq!(report.stats.skipped_should_process, 5);
        assert_eq!(report.stats.attempted, 0);
    }

    #[test]
    fn cancel_flag_stops_before_the_next_item() {
        let mut mesh = quad();
        let candidates = all_edges(&mesh, OperationKind::Split);
        let mut pass = ExecutePass::new(OperationSettings::new(), SchedulerConfig::default()).unwrap();
        pass.cancel_flag().store(true, Ordering::Release);
        let report = pass.run(&mut mesh, candidates).unwrap();
        assert_eq!(report.state, SchedulerState::Cancelled);
        assert_eq!(report.stats.processed(), 0);
    }

    #[test]
    fn attempt_cap_ends_the_pass() {
        let mut mesh = quad();
        let candidates = all_edges(&mesh, OperationKind::Split);
        let cfg = SchedulerConfig {
            max_attempts: Some(3),
            ..SchedulerConfig::default()
        };
        let mut pass = ExecutePass::new(OperationSettings::new(), cfg).unwrap();
        let report = pass.run(&mut mesh, candidates).unwrap();
        assert_eq!(report.state, SchedulerState::StoppedByCriterion);
        assert_eq!(report.stats.attempted, 3);
    }
}
