//! Concurrent policy: one worker per vertex partition.
//!
//! Workers prepare candidates under the shared read lock (validity,
//! `should_process`, footprint) and claim the footprint in the vertex claim
//! table. The edit itself runs under the read lock too: connectivity rows and
//! attribute cells are written through shared references, and with a lock
//! radius of at least 2 every row an edit touches has all its vertices inside
//! the worker's claim. The write lock is only taken to grow the slot tables
//! when an edit runs out of preallocated slots.
//!
//! Within a partition candidates run in priority order; across partitions
//! there is no ordering. A candidate whose footprint is busy goes to the
//! global retry queue until it exceeds `max_lock_retries`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::mesh::Mesh;
use crate::mesh_error::{MeshDartError, OperationError};
use crate::ops::{Operation, OperationKind};
use crate::partitioning::{PartitionMap, PartitionerConfig, partition_vertices};
use crate::scheduler::claims::VertexClaims;
use crate::scheduler::queue::{CandidateQueue, QueueEntry};
use crate::scheduler::shared::SharedMesh;
use crate::scheduler::{ExecutePass, PassReport, PassStats, SchedulerState};
use crate::topology::primitive::PrimitiveType;
use crate::topology::tuple::Tuple;

/// Spare slots per primitive reserved before a pass and added on each growth.
const SLOT_HEADROOM: usize = 256;

/// Simplex whose vertices seed an operation's footprint.
fn input_primitive(kind: OperationKind) -> PrimitiveType {
    match kind {
        OperationKind::FaceSwap => PrimitiveType::Face,
        _ => PrimitiveType::Edge,
    }
}

fn footprint(mesh: &Mesh, kind: OperationKind, tuple: &Tuple, radius: usize) -> Option<Vec<usize>> {
    let key = mesh
        .connectivity()
        .tuple_key(tuple, input_primitive(kind))
        .ok()?;
    Some(mesh.vertex_ring(key.vertices(), radius))
}

struct Shared<'p> {
    pass: &'p ExecutePass,
    mesh: &'p SharedMesh,
    partition: PartitionMap,
    queues: Vec<Mutex<CandidateQueue>>,
    retry: Mutex<VecDeque<QueueEntry>>,
    claims: VertexClaims,
    /// Queued plus in-flight candidates.
    pending: AtomicUsize,
    processed: AtomicUsize,
    attempts: AtomicUsize,
    stop: AtomicBool,
    outcome: Mutex<Option<SchedulerState>>,
    error: Mutex<Option<MeshDartError>>,
}

impl Shared<'_> {
    fn halt(&self, state: SchedulerState) {
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            *outcome = Some(state);
        }
        self.stop.store(true, Ordering::Release);
    }

    fn fail(&self, err: MeshDartError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.stop.store(true, Ordering::Release);
    }

    fn owner(&self, mesh: &Mesh, tuple: &Tuple, fallback: usize) -> usize {
        mesh.id(tuple, PrimitiveType::Vertex)
            .ok()
            .and_then(|v| self.partition.get(&v).copied())
            .filter(|&p| p < self.queues.len())
            .unwrap_or(fallback)
    }

    fn enqueue(&self, mesh: &Mesh, kind: OperationKind, tuple: Tuple, fallback: usize) {
        let priority = (self.pass.priority)(mesh, kind, &tuple);
        let part = self.owner(mesh, &tuple, fallback);
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.queues[part].lock().push(kind, tuple, priority);
    }

    fn next(&self, worker: usize) -> Option<QueueEntry> {
        let own = self.queues[worker].lock().pop();
        own.or_else(|| self.retry.lock().pop_front())
    }
}

pub(crate) fn run(
    pass: &ExecutePass,
    mesh: &SharedMesh,
    candidates: Vec<(OperationKind, Tuple)>,
) -> Result<PassReport, MeshDartError> {
    let n_workers = pass.config.worker_count();
    mesh.write().reserve(SLOT_HEADROOM.max(candidates.len()));
    let partition = {
        let guard = mesh.read();
        let cfg = PartitionerConfig {
            n_parts: n_workers,
            rng_seed: pass.config.partition_seed,
        };
        partition_vertices(&guard, &cfg).map_err(|e| MeshDartError::InvalidConfig(e.to_string()))?
    };
    log::debug!(
        "concurrent pass over {} candidates with {} workers",
        candidates.len(),
        n_workers
    );

    let state = Shared {
        pass,
        mesh,
        partition,
        queues: (0..n_workers).map(|_| Mutex::new(CandidateQueue::new())).collect(),
        retry: Mutex::new(VecDeque::new()),
        claims: VertexClaims::new(),
        pending: AtomicUsize::new(0),
        processed: AtomicUsize::new(0),
        attempts: AtomicUsize::new(0),
        stop: AtomicBool::new(false),
        outcome: Mutex::new(None),
        error: Mutex::new(None),
    };
    {
        let guard = mesh.read();
        for (kind, tuple) in candidates {
            state.enqueue(&guard, kind, tuple, 0);
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_workers)
        .build()
        .map_err(|e| MeshDartError::InvalidConfig(e.to_string()))?;
    let stats: Vec<Mutex<PassStats>> = (0..n_workers).map(|_| Mutex::new(PassStats::default())).collect();
    pool.scope(|s| {
        for (worker, slot) in stats.iter().enumerate() {
            let state = &state;
            s.spawn(move |_| {
                let local = worker_loop(state, worker);
                *slot.lock() = local;
            });
        }
    });

    if let Some(err) = state.error.into_inner() {
        return Err(err);
    }
    let mut total = PassStats::default();
    for s in &stats {
        total.merge(&s.lock());
    }
    Ok(PassReport {
        state: state.outcome.into_inner().unwrap_or(SchedulerState::Finished),
        stats: total,
    })
}

fn worker_loop(state: &Shared<'_>, worker: usize) -> PassStats {
    let mut stats = PassStats::default();
    let config = &state.pass.config;
    while !state.stop.load(Ordering::Acquire) {
        let Some(entry) = state.next(worker) else {
            if state.pending.load(Ordering::Acquire) == 0 {
                break;
            }
            std::thread::yield_now();
            continue;
        };
        if state.pass.cancelled() {
            state.halt(SchedulerState::Cancelled);
            break;
        }
        if let Err(err) = process(state, worker, entry, &mut stats) {
            state.fail(err);
        }
        state.pending.fetch_sub(1, Ordering::AcqRel);

        let processed = state.processed.fetch_add(1, Ordering::AcqRel) + 1;
        if processed % config.checking_frequency == 0 {
            if let Some(stop) = &state.pass.stopping {
                if stop(&state.mesh.read()) {
                    state.halt(SchedulerState::StoppedByCriterion);
                }
            }
        }
    }
    stats
}

fn requeue(state: &Shared<'_>, mut entry: QueueEntry, stats: &mut PassStats) {
    entry.attempts += 1;
    if entry.attempts > state.pass.config.max_lock_retries {
        log::warn!(
            "{} candidate dropped after {} failed footprint claims",
            entry.kind.as_str(),
            entry.attempts
        );
        stats.failed_lock += 1;
        return;
    }
    state.pending.fetch_add(1, Ordering::AcqRel);
    state.retry.lock().push_back(entry);
}

fn process(
    state: &Shared<'_>,
    worker: usize,
    entry: QueueEntry,
    stats: &mut PassStats,
) -> Result<(), MeshDartError> {
    let pass = state.pass;
    let radius = pass.config.lock_radius;

    let claimed_area = {
        let mesh = state.mesh.read();
        if !mesh.is_valid(&entry.tuple) {
            stats.failed_stale += 1;
            return Ok(());
        }
        if let Some(f) = &pass.should_process {
            if !f(&mesh, entry.kind, &entry.tuple) {
                stats.skipped_should_process += 1;
                return Ok(());
            }
        }
        footprint(&mesh, entry.kind, &entry.tuple, radius)
    };
    let Some(area) = claimed_area else {
        stats.failed_stale += 1;
        return Ok(());
    };
    let Some(claim) = state.claims.try_claim(worker, &area) else {
        requeue(state, entry, stats);
        return Ok(());
    };

    let mut counted = false;
    let mut headroom = SLOT_HEADROOM;
    loop {
        let mesh = state.mesh.read();
        if !mesh.is_valid(&entry.tuple) {
            stats.failed_stale += 1;
            return Ok(());
        }
        // another worker may have grown the neighborhood since the claim
        match footprint(&mesh, entry.kind, &entry.tuple, radius) {
            Some(current) if claim.covers(&current) => {}
            _ => {
                drop(mesh);
                drop(claim);
                requeue(state, entry, stats);
                return Ok(());
            }
        }
        if !counted {
            counted = true;
            if let Some(cap) = pass.config.max_attempts {
                if state.attempts.fetch_add(1, Ordering::AcqRel) >= cap {
                    state.halt(SchedulerState::StoppedByCriterion);
                    return Ok(());
                }
            }
        }

        let result = Operation::new(entry.kind, entry.tuple, &pass.settings).execute_shared(&mesh);
        if matches!(result, Err(OperationError::OutOfSlots)) {
            drop(mesh);
            log::debug!("worker {worker} out of slots, growing by {headroom}");
            state.mesh.write().reserve(headroom);
            headroom *= 2;
            continue;
        }
        if let Some(committed) = stats.record(result)? {
            if pass.reseed {
                for tuple in committed.new_candidates {
                    state.enqueue(&mesh, entry.kind, tuple, worker);
                }
            }
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::debug_invariants::DebugInvariants;
    use crate::multimesh::{CommittedChanges, MultiMeshObserver};
    use crate::ops::OperationSettings;
    use crate::scheduler::SchedulerConfig;
    use crate::topology::primitive::MeshKind;

    fn strip(n: usize) -> Mesh {
        let mut cells = Vec::new();
        for i in 0..n - 1 {
            let (a, b, c, d) = (i, i + 1, n + i, n + i + 1);
            cells.push([a, b, d]);
            cells.push([a, d, c]);
        }
        Mesh::from_cells(MeshKind::Triangle, 2 * n, &cells).unwrap()
    }

    fn grid(n: usize) -> Mesh {
        let id = |i: usize, j: usize| j * (n + 1) + i;
        let mut cells = Vec::new();
        for j in 0..n {
            for i in 0..n {
                cells.push([id(i, j), id(i + 1, j), id(i + 1, j + 1)]);
                cells.push([id(i, j), id(i + 1, j + 1), id(i, j + 1)]);
            }
        }
        Mesh::from_cells(MeshKind::Triangle, (n + 1) * (n + 1), &cells).unwrap()
    }

    fn split_all_edges(mesh: &Mesh) -> Vec<(OperationKind, Tuple)> {
        mesh.get_all(PrimitiveType::Edge)
            .into_iter()
            .map(|t| (OperationKind::Split, t))
            .collect()
    }

    /// Holds each committing worker until a second one arrives or time runs out.
    struct Rendezvous {
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl MultiMeshObserver for Rendezvous {
        fn on_operation_committed(&self, _changes: &CommittedChanges<'_>) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(10);
            while self.max_seen.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                self.max_seen
                    .fetch_max(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
                std::thread::yield_now();
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct CommitCounter(AtomicUsize);

    impl MultiMeshObserver for CommitCounter {
        fn on_operation_committed(&self, _changes: &CommittedChanges<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn two_workers_edit_at_the_same_time() {
        let mut mesh = grid(12);
        mesh.reserve(4096);
        let rendezvous = Arc::new(Rendezvous {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        mesh.add_observer(Arc::clone(&rendezvous) as Arc<dyn MultiMeshObserver>);
        let candidates = split_all_edges(&mesh);
        let shared = SharedMesh::new(mesh);
        let mut pass = ExecutePass::new(OperationSettings::new(), SchedulerConfig::concurrent(2))
            .unwrap()
            .with_reseeding(false);
        let report = pass.run_shared(&shared, candidates).unwrap();
        assert_eq!(report.state, SchedulerState::Finished);
        assert!(report.stats.succeeded >= 2);
        // a worker waiting in the observer still holds its edit's lock
        assert_eq!(rendezvous.max_seen.load(Ordering::SeqCst), 2);
        let mesh = shared.into_inner();
        mesh.validate_invariants().unwrap();
    }

    #[test]
    fn stopping_criterion_halts_concurrent_workers() {
        const STOP_AT: usize = 5;
        const CHECK_EVERY: usize = 4;
        const WORKERS: usize = 2;
        let mut mesh = grid(10);
        let counter = Arc::new(CommitCounter(AtomicUsize::new(0)));
        mesh.add_observer(Arc::clone(&counter) as Arc<dyn MultiMeshObserver>);
        let candidates = split_all_edges(&mesh);
        let shared = SharedMesh::new(mesh);
        let config = SchedulerConfig {
            checking_frequency: CHECK_EVERY,
            ..SchedulerConfig::concurrent(WORKERS)
        };
        let seen = Arc::clone(&counter);
        let mut pass = ExecutePass::new(OperationSettings::new(), config)
            .unwrap()
            .with_stopping_criterion(move |_| seen.0.load(Ordering::SeqCst) >= STOP_AT);
        let report = pass.run_shared(&shared, candidates).unwrap();
        assert_eq!(report.state, SchedulerState::StoppedByCriterion);
        assert_eq!(pass.state(), SchedulerState::StoppedByCriterion);
        let s = report.stats;
        assert_eq!(s.succeeded, counter.0.load(Ordering::SeqCst));
        assert!(s.succeeded >= STOP_AT);
        // past the threshold each worker finishes at most one checking window
        assert!(s.succeeded <= STOP_AT + WORKERS * CHECK_EVERY, "{s:?}");
        shared.into_inner().validate_invariants().unwrap();
    }

    #[test]
    fn footprint_grows_with_radius() {
        let mesh = strip(6);
        let t = mesh.tuple_of(&crate::topology::simplex::SimplexKey::new(&[2, 3])).unwrap();
        let one = footprint(&mesh, OperationKind::Split, &t, 1).unwrap();
        let two = footprint(&mesh, OperationKind::Split, &t, 2).unwrap();
        assert!(one.contains(&2) && one.contains(&3));
        assert!(two.len() > one.len());
        assert!(one.iter().all(|v| two.contains(v)));
    }

    #[test]
    fn concurrent_splits_keep_counters_consistent() {
        let mesh = strip(12);
        let candidates: Vec<_> = mesh
            .get_all(PrimitiveType::Edge)
            .into_iter()
            .map(|t| (OperationKind::Split, t))
            .collect();
        let n = candidates.len();
        let shared = SharedMesh::new(mesh);
        let mut pass = ExecutePass::new(OperationSettings::new(), SchedulerConfig::concurrent(3))
            .unwrap()
            .with_reseeding(false);
        let report = pass.run_shared(&shared, candidates).unwrap();
        let s = report.stats;
        assert_eq!(report.state, SchedulerState::Finished);
        assert_eq!(s.processed(), n);
        assert_eq!(s.attempted, s.succeeded + s.failed_invariant + s.failed_precondition);
        assert!(s.succeeded >= 1);
        assert_eq!(shared.active_passes(), 0);
        let mesh = shared.into_inner();
        assert_eq!(
            mesh.connectivity().live_count(PrimitiveType::Vertex),
            24 + s.succeeded
        );
    }
}
