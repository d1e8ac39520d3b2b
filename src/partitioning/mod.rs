//! Vertex partitioning for the concurrent scheduler.
//!
//! Each worker of a concurrent pass owns the candidates whose tuple vertex
//! falls in its part. Parts are grown breadth-first from randomly sampled
//! seed vertices, one ring at a time and round-robin, so they come out
//! roughly balanced and edge-connected.

pub mod error;

use std::collections::VecDeque;

use hashbrown::HashMap;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::mesh::Mesh;
use crate::topology::primitive::PrimitiveType;

pub use self::error::PartitionError;

pub type PartitionId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionerConfig {
    /// Number of parts; one per worker.
    pub n_parts: usize,
    /// Seed for picking the initial vertex of each part.
    pub rng_seed: u64,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            n_parts: 2,
            rng_seed: 42,
        }
    }
}

/// Part of every live vertex at partitioning time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMap(HashMap<usize, PartitionId>);

impl PartitionMap {
    pub fn with_capacity(cap: usize) -> Self {
        Self(HashMap::with_capacity(cap))
    }
    pub fn insert(&mut self, v: usize, p: PartitionId) {
        self.0.insert(v, p);
    }
    pub fn get(&self, v: &usize) -> Option<&PartitionId> {
        self.0.get(v)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&usize, &PartitionId)> {
        self.0.iter()
    }

    /// Vertex count of each of `n_parts` parts.
    pub fn part_sizes(&self, n_parts: usize) -> Vec<usize> {
        let mut sizes = vec![0; n_parts];
        for &p in self.0.values() {
            if let Some(s) = sizes.get_mut(p) {
                *s += 1;
            }
        }
        sizes
    }
}

/// Assign every live vertex of `mesh` to one of `cfg.n_parts` parts.
pub fn partition_vertices(mesh: &Mesh, cfg: &PartitionerConfig) -> Result<PartitionMap, PartitionError> {
    if cfg.n_parts == 0 {
        return Err(PartitionError::NoParts);
    }
    let conn = mesh.connectivity();
    let vertices: Vec<usize> = conn.live_ids(PrimitiveType::Vertex).collect();
    let mut map = PartitionMap::with_capacity(vertices.len());
    if vertices.is_empty() {
        return Ok(map);
    }

    let mut rng = SmallRng::seed_from_u64(cfg.rng_seed);
    let n_seeds = cfg.n_parts.min(vertices.len());
    let mut frontiers: Vec<VecDeque<usize>> = vec![VecDeque::new(); cfg.n_parts];
    let mut sizes = vec![0usize; cfg.n_parts];
    for (part, idx) in rand::seq::index::sample(&mut rng, vertices.len(), n_seeds)
        .into_iter()
        .enumerate()
    {
        let v = vertices[idx];
        map.insert(v, part);
        sizes[part] += 1;
        frontiers[part].push_back(v);
    }

    // grow one vertex per part per round
    while frontiers.iter().any(|f| !f.is_empty()) {
        for part in 0..cfg.n_parts {
            let Some(v) = frontiers[part].pop_front() else {
                continue;
            };
            for w in conn.one_ring(v) {
                if map.get(&w).is_none() {
                    map.insert(w, part);
                    sizes[part] += 1;
                    frontiers[part].push_back(w);
                }
            }
        }
    }

    // components no seed reached
    for &v in &vertices {
        if map.get(&v).is_none() {
            let part = (0..cfg.n_parts).min_by_key(|&p| sizes[p]).unwrap_or(0);
            map.insert(v, part);
            sizes[part] += 1;
        }
    }

    if let Some(&missing) = vertices.iter().find(|v| map.get(v).is_none()) {
        return Err(PartitionError::MissingPartition(missing));
    }
    log::debug!("partitioned {} vertices into {:?}", vertices.len(), sizes);
    Ok(map)
}
