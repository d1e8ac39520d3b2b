//! Planning and applying the connectivity rewrite of each operation kind.
//!
//! A plan is computed on the unmodified mesh and lists the cells to remove
//! and the vertex lists replacing them. New cells are always built by
//! substituting one vertex of an old cell, which keeps their orientation.

use std::collections::BTreeSet;

use crate::mesh::{Mesh, Transaction};
use crate::mesh_error::OperationError;
use crate::ops::OperationKind;
use crate::ops::image::SimplexImage;
use crate::ops::transfer::TransferTarget;
use crate::topology::primitive::{MeshKind, PrimitiveType};
use crate::topology::simplex::SimplexKey;
use crate::topology::tuple::Tuple;

/// Placeholder for the vertex a split allocates.
pub(crate) const NEW_VERTEX: usize = usize::MAX - 2;

/// Where the operation's representative tuple points after the edit.
#[derive(Clone, Debug)]
pub(crate) enum Representative {
    /// Tuple at `first`, on the edge to `second` if given.
    Directed(usize, Option<usize>),
    /// Tuple on the simplex with this vertex set.
    Key(SimplexKey),
}

#[derive(Clone, Debug)]
pub(crate) struct EditPlan {
    pub kind: OperationKind,
    pub pre: SimplexImage,
    pub removed: Vec<usize>,
    pub added: Vec<Vec<usize>>,
    pub retired: Vec<usize>,
    pub allocates_vertex: bool,
    /// Simplices containing the first vertex inherit from copies of
    /// themselves with it replaced by each of the others.
    pub substitution: Option<(usize, [usize; 2])>,
    pub representative: Representative,
}

/// Result of applying a plan.
#[derive(Clone, Debug)]
pub(crate) struct Applied {
    pub post: SimplexImage,
    /// Ids taken from free lists or appended, per dimension.
    pub allocated: Vec<Vec<usize>>,
    pub new_vertex: Option<usize>,
}

fn replaced(cell: &[usize], from: usize, to: usize) -> Vec<usize> {
    cell.iter().map(|&x| if x == from { to } else { x }).collect()
}

fn edge_endpoints(mesh: &Mesh, t: &Tuple) -> Result<(usize, usize), OperationError> {
    let key = mesh.connectivity().tuple_key(t, PrimitiveType::Edge)?;
    let u = mesh.id(t, PrimitiveType::Vertex)?;
    let v = key
        .vertices()
        .iter()
        .copied()
        .find(|&x| x != u)
        .ok_or(OperationError::InvalidTuple)?;
    Ok((u, v))
}

pub(crate) fn plan(mesh: &Mesh, kind: OperationKind, t: &Tuple) -> Result<EditPlan, OperationError> {
    if mesh.kind() == MeshKind::Point {
        return Err(OperationError::TopologyPrecondition("operations need a mesh with edges"));
    }
    match kind {
        OperationKind::Split => plan_split(mesh, t),
        OperationKind::Collapse => plan_collapse(mesh, t),
        OperationKind::Swap => plan_swap(mesh, t),
        OperationKind::FaceSwap => plan_face_swap(mesh, t),
    }
}

fn plan_split(mesh: &Mesh, t: &Tuple) -> Result<EditPlan, OperationError> {
    let conn = mesh.connectivity();
    let (u, v) = edge_endpoints(mesh, t)?;
    let star = conn.star(t.cell(), &[u, v]);
    let added = star
        .iter()
        .flat_map(|&c| {
            let cell = conn.vertices_of(c);
            [replaced(&cell, v, NEW_VERTEX), replaced(&cell, u, NEW_VERTEX)]
        })
        .collect();
    Ok(EditPlan {
        kind: OperationKind::Split,
        pre: SimplexImage::capture(conn, OperationKind::Split, SimplexKey::new(&[u, v]), &star),
        removed: star,
        added,
        retired: Vec::new(),
        allocates_vertex: true,
        substitution: Some((NEW_VERTEX, [u, v])),
        representative: Representative::Directed(NEW_VERTEX, Some(v)),
    })
}

/// Removes `u = t`'s vertex and keeps `v`.
fn plan_collapse(mesh: &Mesh, t: &Tuple) -> Result<EditPlan, OperationError> {
    let conn = mesh.connectivity();
    let (u, v) = edge_endpoints(mesh, t)?;
    let star = conn.star(t.cell(), &[u]);
    let added = star
        .iter()
        .map(|&c| conn.vertices_of(c))
        .filter(|cell| !cell.contains(&v))
        .map(|cell| replaced(&cell, u, v))
        .collect();
    Ok(EditPlan {
        kind: OperationKind::Collapse,
        pre: SimplexImage::capture(conn, OperationKind::Collapse, SimplexKey::new(&[u, v]), &star),
        removed: star,
        added,
        retired: vec![u],
        allocates_vertex: false,
        substitution: Some((v, [u, v])),
        representative: Representative::Directed(v, None),
    })
}

/// 2-2 swap on triangles, 3-2 swap on tetrahedra.
fn plan_swap(mesh: &Mesh, t: &Tuple) -> Result<EditPlan, OperationError> {
    let conn = mesh.connectivity();
    let d = mesh.kind().dimension();
    if mesh.kind() == MeshKind::Edge {
        return Err(OperationError::TopologyPrecondition("edge swap needs a triangle or tetrahedral mesh"));
    }
    let (u, v) = edge_endpoints(mesh, t)?;
    let edge = SimplexKey::new(&[u, v]);
    if conn.is_boundary_simplex(&edge) {
        return Err(OperationError::NotInteriorEdge);
    }
    let star = conn.star(t.cell(), &[u, v]);
    if star.len() != d {
        return Err(OperationError::TopologyPrecondition(if d == 2 {
            "edge swap needs exactly two incident triangles"
        } else {
            "edge swap needs exactly three incident tetrahedra"
        }));
    }
    let ring: Vec<usize> = star
        .iter()
        .flat_map(|&c| conn.vertices_of(c))
        .filter(|&x| x != u && x != v)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ring.len() != d {
        return Err(OperationError::TopologyPrecondition("edge ring is not a simple cycle"));
    }
    let new_key = SimplexKey::new(&ring);
    if conn.find_simplex(&new_key).is_some() {
        return Err(OperationError::TopologyPrecondition("swap would duplicate an existing simplex"));
    }
    let first = conn.vertices_of(star[0]);
    let m = ring
        .iter()
        .copied()
        .find(|x| !first.contains(x))
        .ok_or(OperationError::TopologyPrecondition("edge ring is not a simple cycle"))?;
    Ok(EditPlan {
        kind: OperationKind::Swap,
        pre: SimplexImage::capture(conn, OperationKind::Swap, edge, &star),
        added: vec![replaced(&first, v, m), replaced(&first, u, m)],
        removed: star,
        retired: Vec::new(),
        allocates_vertex: false,
        substitution: None,
        representative: Representative::Key(new_key),
    })
}

/// 2-3 swap: the face between two tetrahedra becomes the edge joining their apexes.
fn plan_face_swap(mesh: &Mesh, t: &Tuple) -> Result<EditPlan, OperationError> {
    if mesh.kind() != MeshKind::Tetrahedron {
        return Err(OperationError::TopologyPrecondition("face swap needs a tetrahedral mesh"));
    }
    let conn = mesh.connectivity();
    let face = conn.tuple_key(t, PrimitiveType::Face)?;
    let cp = t.cell();
    let cell_p = conn.vertices_of(cp);
    let slot = cell_p
        .iter()
        .position(|x| !face.contains(*x))
        .ok_or(OperationError::InvalidTuple)?;
    let p = cell_p[slot];
    let cq = conn.cell_neighbor(cp, slot).ok_or(OperationError::NotInteriorFace)?;
    let q = conn
        .vertices_of(cq)
        .into_iter()
        .find(|x| !face.contains(*x))
        .ok_or(OperationError::InvalidTuple)?;
    if conn.find_simplex(&SimplexKey::new(&[p, q])).is_some() {
        return Err(OperationError::TopologyPrecondition("face swap would duplicate an existing edge"));
    }
    let added = face.vertices().iter().map(|&x| replaced(&cell_p, x, q)).collect();
    Ok(EditPlan {
        kind: OperationKind::FaceSwap,
        pre: SimplexImage::capture(conn, OperationKind::FaceSwap, face, &[cp, cq]),
        removed: vec![cp, cq],
        added,
        retired: Vec::new(),
        allocates_vertex: false,
        substitution: None,
        representative: Representative::Directed(p, Some(q)),
    })
}

impl EditPlan {
    fn resolve(&self, x: usize, w: Option<usize>) -> usize {
        match (x, w) {
            (NEW_VERTEX, Some(w)) => w,
            _ => x,
        }
    }

    /// Rewrite the connectivity and reset attribute rows of reused slots.
    /// Every write is logged in `tx`.
    pub(crate) fn apply(&self, mesh: &Mesh, tx: &mut Transaction) -> Result<Applied, OperationError> {
        let conn = mesh.connectivity();
        let w = match self.allocates_vertex {
            true => Some(conn.alloc_vertex(&mut tx.edits)?),
            false => None,
        };
        let added: Vec<Vec<usize>> = self
            .added
            .iter()
            .map(|cell| cell.iter().map(|&x| self.resolve(x, w)).collect())
            .collect();
        let mut edit = conn.replace_cells(&mut tx.edits, &self.removed, &added, &self.retired)?;
        if let Some(w) = w {
            edit.allocated[0].push(w);
        }
        for primitive in mesh.kind().primitives() {
            let ids = &edit.allocated[primitive.dimension()];
            mesh.attributes().reset_rows(primitive, ids, &mut tx.rows);
        }
        let post = SimplexImage::capture(conn, self.kind, self.representative_key(w), &edit.added);
        Ok(Applied {
            post,
            allocated: edit.allocated,
            new_vertex: w,
        })
    }

    fn representative_key(&self, w: Option<usize>) -> SimplexKey {
        match &self.representative {
            Representative::Directed(a, None) => SimplexKey::new(&[self.resolve(*a, w)]),
            Representative::Directed(a, Some(b)) => SimplexKey::new(&[self.resolve(*a, w), self.resolve(*b, w)]),
            Representative::Key(key) => *key,
        }
    }

    /// Simplices of `primitive` whose rows are recomputed, with their sources.
    ///
    /// Targets are freshly allocated simplices and, for collapses, every
    /// simplex containing the surviving vertex.
    pub(crate) fn transfer_targets(&self, applied: &Applied, primitive: PrimitiveType) -> Vec<TransferTarget> {
        let k = primitive.dimension();
        let survivor = match (self.kind, self.substitution) {
            (OperationKind::Collapse, Some((v, _))) => Some(v),
            _ => None,
        };
        let substitution = self
            .substitution
            .map(|(t, sources)| (self.resolve(t, applied.new_vertex), sources));
        let post = applied.post.simplices(primitive);
        let deleted: Vec<SimplexKey> = self
            .pre
            .simplices(primitive)
            .iter()
            .map(|s| *s.key())
            .filter(|key| !applied.post.contains(key))
            .collect();
        let fresh = &applied.allocated[k];
        post.iter()
            .filter(|s| fresh.contains(&s.id()) || survivor.is_some_and(|v| s.key().contains(v)))
            .map(|s| {
                let mut sources: Vec<SimplexKey> = match substitution {
                    Some((target, from)) if s.key().contains(target) => from
                        .iter()
                        .filter_map(|&x| s.key().substitute(target, x))
                        .filter(|key| self.pre.contains(key))
                        .collect(),
                    _ => Vec::new(),
                };
                if sources.is_empty() {
                    sources = deleted.clone();
                }
                TransferTarget { id: s.id(), sources }
            })
            .collect()
    }

    /// Tuple handed back to the caller for the edited region.
    pub(crate) fn representative(&self, mesh: &Mesh, applied: &Applied) -> Option<Tuple> {
        let conn = mesh.connectivity();
        match &self.representative {
            Representative::Key(key) => conn.tuple_of_key(key),
            Representative::Directed(a, b) => {
                let a = self.resolve(*a, applied.new_vertex);
                let b = b.map(|b| self.resolve(b, applied.new_vertex));
                let key = self.representative_key(applied.new_vertex);
                let primitive = key.primitive()?;
                let cell = conn.anchor(primitive, conn.find_simplex(&key)?)?;
                conn.tuple_on(cell, a, b)
            }
        }
    }

    /// Edges worth re-examining after the edit.
    pub(crate) fn new_candidates(&self, mesh: &Mesh, applied: &Applied) -> Vec<Tuple> {
        let conn = mesh.connectivity();
        let keys: Vec<SimplexKey> = match self.kind {
            OperationKind::Split => {
                let w = applied.new_vertex;
                applied
                    .post
                    .simplices(PrimitiveType::Edge)
                    .iter()
                    .filter(|e| w.is_some_and(|w| e.key().contains(w)))
                    .map(|e| *e.key())
                    .collect()
            }
            OperationKind::Collapse => {
                let Some((v, _)) = self.substitution else {
                    return Vec::new();
                };
                let star = conn.star_of(&SimplexKey::new(&[v]));
                let image = SimplexImage::capture(conn, self.kind, SimplexKey::new(&[v]), &star);
                image
                    .simplices(PrimitiveType::Edge)
                    .iter()
                    .map(|e| *e.key())
                    .collect()
            }
            OperationKind::Swap | OperationKind::FaceSwap => applied
                .post
                .simplices(PrimitiveType::Edge)
                .iter()
                .filter(|e| self.pre.contains(e.key()))
                .map(|e| *e.key())
                .collect(),
        };
        keys.iter().filter_map(|key| conn.tuple_of_key(key)).collect()
    }
}
