//! Link condition for edge collapse.
//!
//! The closed link of a simplex `X` is the set of simplices `Y` disjoint from
//! `X` such that `X ∪ Y` is a live simplex. Boundary facets are coned off to a
//! virtual vertex so that collapses joining two boundary components are caught
//! like any other pinch. Collapsing `(u, v)` keeps the mesh a manifold iff
//! `link(u) ∩ link(v) == link(uv)`.

use std::collections::BTreeSet;

use itertools::Itertools;

use crate::topology::connectivity::Connectivity;
use crate::topology::simplex::SimplexKey;

/// Virtual vertex standing in for "outside the mesh".
pub const DUMMY_VERTEX: usize = usize::MAX - 1;

fn insert_subsets(vertices: &[usize], extra: Option<usize>, out: &mut BTreeSet<SimplexKey>) {
    for r in 0..=vertices.len() {
        for mut ids in vertices.iter().copied().combinations(r) {
            ids.extend(extra);
            if !ids.is_empty() {
                out.insert(SimplexKey::new(&ids));
            }
        }
    }
}

/// Closed link of `simplex`, including the cone over boundary facets.
pub fn link(conn: &Connectivity, simplex: &SimplexKey) -> BTreeSet<SimplexKey> {
    let mut out = BTreeSet::new();
    for c in conn.star_of(simplex) {
        let verts = conn.vertices_of(c);
        let rest: Vec<usize> = verts
            .iter()
            .copied()
            .filter(|v| !simplex.contains(*v))
            .collect();
        insert_subsets(&rest, None, &mut out);
        for (i, &opposite) in verts.iter().enumerate() {
            if simplex.contains(opposite) || conn.cell_neighbor(c, i).is_some() {
                continue;
            }
            let on_facet: Vec<usize> = rest.iter().copied().filter(|&v| v != opposite).collect();
            insert_subsets(&on_facet, Some(DUMMY_VERTEX), &mut out);
        }
    }
    out
}

/// True if collapsing the edge `(u, v)` preserves the manifold structure.
///
/// Returns `false` when the edge is not live.
pub fn link_condition(conn: &Connectivity, u: usize, v: usize) -> bool {
    let edge = SimplexKey::new(&[u, v]);
    if conn.find_simplex(&edge).is_none() {
        return false;
    }
    let lu = link(conn, &SimplexKey::new(&[u]));
    let lv = link(conn, &SimplexKey::new(&[v]));
    let shared: BTreeSet<SimplexKey> = lu.intersection(&lv).copied().collect();
    shared == link(conn, &edge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::primitive::MeshKind;

    #[test]
    fn lone_triangle_fails() {
        let c = Connectivity::from_cells(MeshKind::Triangle, 3, &[[0, 1, 2]]).unwrap();
        assert!(!link_condition(&c, 0, 1));
    }

    #[test]
    fn split_triangle_edge_passes() {
        // 0-3-1 split of triangle (0, 1, 2)
        let c = Connectivity::from_cells(MeshKind::Triangle, 4, &[[0, 3, 2], [3, 1, 2]]).unwrap();
        assert!(link_condition(&c, 3, 0));
        let l = link(&c, &SimplexKey::new(&[0, 3]));
        assert!(l.contains(&SimplexKey::new(&[2])));
        assert!(l.contains(&SimplexKey::new(&[DUMMY_VERTEX])));
    }

    #[test]
    fn boundary_bridge_fails() {
        // strip of three triangles, every vertex on the boundary
        let c = Connectivity::from_cells(
            MeshKind::Triangle,
            5,
            &[[0, 1, 2], [1, 3, 2], [1, 4, 3]],
        )
        .unwrap();
        // (1, 2) is interior but both endpoints are on the boundary and the
        // collapse would pinch the strip at vertex 2.
        assert!(!link_condition(&c, 1, 2));
        assert!(link_condition(&c, 0, 1));
    }
}
