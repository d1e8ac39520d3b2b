//! Per-vertex claim table for the concurrent policy.
//!
//! A worker claims every vertex of an operation's footprint before touching
//! the mesh. Claims are taken in ascending vertex order and never waited on:
//! if any vertex is held by another worker, everything taken so far is
//! released and the candidate goes back to the retry queue.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug, Default)]
pub(crate) struct VertexClaims {
    owners: DashMap<usize, usize>,
}

/// Releases its vertices on drop.
#[derive(Debug)]
pub(crate) struct ClaimGuard<'a> {
    claims: &'a VertexClaims,
    worker: usize,
    vertices: Vec<usize>,
}

impl VertexClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim all of `vertices` for `worker`, or none of them.
    pub fn try_claim(&self, worker: usize, vertices: &[usize]) -> Option<ClaimGuard<'_>> {
        let mut sorted = vertices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut guard = ClaimGuard {
            claims: self,
            worker,
            vertices: Vec::with_capacity(sorted.len()),
        };
        for v in sorted {
            // the entry holds a shard lock; it must be gone before the guard drops
            let taken = match self.owners.entry(v) {
                Entry::Occupied(e) => *e.get() == worker,
                Entry::Vacant(e) => {
                    e.insert(worker);
                    guard.vertices.push(v);
                    true
                }
            };
            if !taken {
                return None;
            }
        }
        Some(guard)
    }

    pub fn owner(&self, vertex: usize) -> Option<usize> {
        self.owners.get(&vertex).map(|w| *w)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }
}

impl ClaimGuard<'_> {
    pub fn covers(&self, vertices: &[usize]) -> bool {
        vertices.iter().all(|v| self.vertices.binary_search(v).is_ok())
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        for v in &self.vertices {
            self.claims.owners.remove_if(v, |_, w| *w == self.worker);
        }
    }
}
