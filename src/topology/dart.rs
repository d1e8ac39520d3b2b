//! Transition tables for tuple navigation.
//!
//! A dart of a d-simplex is a permutation `p` of its `d + 1` local vertices:
//! `p[0]` is the tuple's vertex, `{p[0], p[1]}` its edge, `{p[0], p[1], p[2]}`
//! its face. Switching the k-th primitive inside a cell swaps positions `k` and
//! `k + 1`, i.e. right multiplication by a transposition. Darts form the
//! symmetric group S_{d+1}, composed as `product(a, b)[i] = a[b[i]]`.
//!
//! Tables are built once per [`MeshKind`] on first use and shared by every mesh.

use hashbrown::HashMap;
use itertools::Itertools;
use once_cell::sync::Lazy;

use crate::topology::primitive::MeshKind;

/// Index of a dart inside its table (at most 24 for tetrahedra).
pub type DartIndex = u8;

static POINT_DART: Lazy<SimplexDart> = Lazy::new(|| SimplexDart::build(MeshKind::Point));
static EDGE_DART: Lazy<SimplexDart> = Lazy::new(|| SimplexDart::build(MeshKind::Edge));
static TRI_DART: Lazy<SimplexDart> = Lazy::new(|| SimplexDart::build(MeshKind::Triangle));
static TET_DART: Lazy<SimplexDart> = Lazy::new(|| SimplexDart::build(MeshKind::Tetrahedron));

/// Precomputed permutation tables for one cell type.
#[derive(Debug)]
pub struct SimplexDart {
    kind: MeshKind,
    n: usize,
    perms: Vec<[u8; 4]>,
    index: HashMap<[u8; 4], DartIndex>,
    product: Vec<DartIndex>,
    inverse: Vec<DartIndex>,
    /// `switches[k][dart]`, for `k < dimension`.
    switches: Vec<Vec<DartIndex>>,
    /// `local[dart][k]`: index of the dart's k-simplex in `faces[k]`.
    local: Vec<[u8; 4]>,
    /// Local k-simplices as sorted local-vertex lists, lexicographic order.
    faces: Vec<Vec<Vec<u8>>>,
    /// `(lv, le, lf) -> dart`; `None` marks inconsistent combinations.
    from_locals: Vec<Option<DartIndex>>,
    /// First dart (lexicographic) whose k-simplex is `j`: `canonical[k][j]`.
    canonical: Vec<Vec<DartIndex>>,
    ccw: Vec<bool>,
    n_edges: usize,
    n_faces: usize,
}

impl SimplexDart {
    /// Shared tables for `kind`.
    pub fn get(kind: MeshKind) -> &'static SimplexDart {
        match kind {
            MeshKind::Point => &POINT_DART,
            MeshKind::Edge => &EDGE_DART,
            MeshKind::Triangle => &TRI_DART,
            MeshKind::Tetrahedron => &TET_DART,
        }
    }

    fn build(kind: MeshKind) -> Self {
        let n = kind.vertices_per_cell();
        let d = kind.dimension();
        let pad = |p: &[u8]| {
            let mut a = [0u8, 1, 2, 3];
            a[..n].copy_from_slice(p);
            a
        };
        let perms: Vec<[u8; 4]> = (0..n as u8).permutations(n).map(|p| pad(&p)).collect();
        let index: HashMap<[u8; 4], DartIndex> = perms
            .iter()
            .enumerate()
            .map(|(i, p)| (*p, i as DartIndex))
            .collect();
        let count = perms.len();

        let compose = |a: &[u8; 4], b: &[u8; 4]| {
            let mut c = [0u8, 1, 2, 3];
            for i in 0..n {
                c[i] = a[b[i] as usize];
            }
            c
        };

        let mut product = vec![0; count * count];
        for (i, a) in perms.iter().enumerate() {
            for (j, b) in perms.iter().enumerate() {
                product[i * count + j] = index[&compose(a, b)];
            }
        }

        let inverse: Vec<DartIndex> = perms
            .iter()
            .map(|a| {
                let mut inv = [0u8, 1, 2, 3];
                for i in 0..n {
                    inv[a[i] as usize] = i as u8;
                }
                index[&inv]
            })
            .collect();

        let switches: Vec<Vec<DartIndex>> = (0..d)
            .map(|k| {
                let mut tau = [0u8, 1, 2, 3];
                tau.swap(k, k + 1);
                let t = index[&tau] as usize;
                (0..count).map(|a| product[a * count + t]).collect()
            })
            .collect();

        let faces: Vec<Vec<Vec<u8>>> = (0..=d)
            .map(|k| (0..n as u8).combinations(k + 1).collect())
            .collect();

        let local: Vec<[u8; 4]> = perms
            .iter()
            .map(|p| {
                let mut out = [0u8; 4];
                for k in 0..=d {
                    let mut prefix: Vec<u8> = p[..=k].to_vec();
                    prefix.sort_unstable();
                    let j = faces[k].iter().position(|f| *f == prefix).unwrap_or(0);
                    out[k] = j as u8;
                }
                out
            })
            .collect();

        let n_edges = faces.get(1).map_or(1, Vec::len);
        let n_faces = if d >= 2 { faces[2].len() } else { 1 };
        let mut from_locals = vec![None; n * n_edges * n_faces];
        for (dart, loc) in local.iter().enumerate() {
            let lf = if d >= 2 { loc[2] as usize } else { 0 };
            let slot = (loc[0] as usize * n_edges + loc[1] as usize) * n_faces + lf;
            from_locals[slot] = Some(dart as DartIndex);
        }

        let canonical: Vec<Vec<DartIndex>> = (0..=d)
            .map(|k| {
                (0..faces[k].len())
                    .map(|j| {
                        local
                            .iter()
                            .position(|loc| loc[k] as usize == j)
                            .unwrap_or(0) as DartIndex
                    })
                    .collect()
            })
            .collect();

        let ccw: Vec<bool> = perms
            .iter()
            .map(|p| {
                let mut inversions = 0;
                for i in 0..n {
                    for j in i + 1..n {
                        if p[i] > p[j] {
                            inversions += 1;
                        }
                    }
                }
                inversions % 2 == 0
            })
            .collect();

        Self {
            kind,
            n,
            perms,
            index,
            product,
            inverse,
            switches,
            local,
            faces,
            from_locals,
            canonical,
            ccw,
            n_edges,
            n_faces,
        }
    }

    #[inline]
    pub fn kind(&self) -> MeshKind {
        self.kind
    }

    /// Number of darts (`(d + 1)!`).
    #[inline]
    pub fn size(&self) -> usize {
        self.perms.len()
    }

    #[inline]
    pub fn identity(&self) -> DartIndex {
        0
    }

    /// Local vertex sequence of a dart.
    #[inline]
    pub fn permutation(&self, dart: DartIndex) -> &[u8] {
        &self.perms[dart as usize][..self.n]
    }

    pub(crate) fn index_of(&self, perm: &[u8]) -> Option<DartIndex> {
        let mut key = [0u8, 1, 2, 3];
        key[..self.n].copy_from_slice(perm);
        self.index.get(&key).copied()
    }

    /// Group product: `product(a, b)[i] = a[b[i]]`.
    #[inline]
    pub fn product(&self, a: DartIndex, b: DartIndex) -> DartIndex {
        self.product[a as usize * self.size() + b as usize]
    }

    #[inline]
    pub fn inverse(&self, a: DartIndex) -> DartIndex {
        self.inverse[a as usize]
    }

    /// In-cell switch of the dimension-`k` primitive. `None` when `k` is the
    /// cell dimension or above; crossing into a neighbor needs adjacency.
    #[inline]
    pub fn switch(&self, dart: DartIndex, k: usize) -> Option<DartIndex> {
        self.switches.get(k).map(|t| t[dart as usize])
    }

    /// Even permutations are counter-clockwise.
    #[inline]
    pub fn is_ccw(&self, dart: DartIndex) -> bool {
        self.ccw[dart as usize]
    }

    /// Index of the dart's `k`-simplex among the cell's local `k`-simplices.
    #[inline]
    pub fn local_simplex(&self, dart: DartIndex, k: usize) -> usize {
        self.local[dart as usize][k] as usize
    }

    /// Local vertices of local `k`-simplex `j`.
    #[inline]
    pub fn simplex_vertices(&self, k: usize, j: usize) -> &[u8] {
        &self.faces[k][j]
    }

    /// Number of local `k`-simplices in one cell.
    #[inline]
    pub fn simplex_count(&self, k: usize) -> usize {
        self.faces.get(k).map_or(0, Vec::len)
    }

    /// Dart for the local `(vertex, edge, face)` triple, if consistent.
    pub fn from_locals(&self, lv: usize, le: usize, lf: usize) -> Option<DartIndex> {
        if lv >= self.n || le >= self.n_edges || lf >= self.n_faces {
            return None;
        }
        self.from_locals[(lv * self.n_edges + le) * self.n_faces + lf]
    }

    /// `(local_vertex, local_edge, local_face)` of a dart.
    pub fn locals(&self, dart: DartIndex) -> (u8, u8, u8) {
        let loc = self.local[dart as usize];
        let lf = if self.kind.dimension() >= 2 { loc[2] } else { 0 };
        (loc[0], loc[1], lf)
    }

    /// Lexicographically first dart whose `k`-simplex is local simplex `j`.
    pub fn canonical(&self, k: usize, j: usize) -> Option<DartIndex> {
        self.canonical.get(k).and_then(|c| c.get(j)).copied()
    }

    /// The local vertex not on the dart's facet.
    #[inline]
    pub fn opposite_vertex(&self, dart: DartIndex) -> usize {
        self.perms[dart as usize][self.kind.dimension()] as usize
    }

    /// In-cell switch dimensions that carry `from` onto `to`, in application order.
    ///
    /// The relative permutation `inverse(from) * to` is sorted back to the
    /// identity with adjacent swaps; each swap is one switch.
    pub fn switch_sequence(&self, from: DartIndex, to: DartIndex) -> Vec<usize> {
        let rel = self.product(self.inverse(from), to);
        let mut a = self.perms[rel as usize];
        let mut swaps = Vec::new();
        for pass in 0..self.n {
            for j in 0..self.n.saturating_sub(1 + pass) {
                if a[j] > a[j + 1] {
                    a.swap(j, j + 1);
                    swaps.push(j);
                }
            }
        }
        swaps.reverse();
        swaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [MeshKind; 4] = [
        MeshKind::Point,
        MeshKind::Edge,
        MeshKind::Triangle,
        MeshKind::Tetrahedron,
    ];

    #[test]
    fn table_sizes() {
        assert_eq!(SimplexDart::get(MeshKind::Point).size(), 1);
        assert_eq!(SimplexDart::get(MeshKind::Edge).size(), 2);
        assert_eq!(SimplexDart::get(MeshKind::Triangle).size(), 6);
        assert_eq!(SimplexDart::get(MeshKind::Tetrahedron).size(), 24);
    }

    #[test]
    fn switches_are_involutions_and_flip_parity() {
        for kind in KINDS {
            let t = SimplexDart::get(kind);
            for dart in 0..t.size() as DartIndex {
                for k in 0..kind.dimension() {
                    let s = t.switch(dart, k).unwrap();
                    assert_eq!(t.switch(s, k), Some(dart));
                    assert_ne!(t.is_ccw(s), t.is_ccw(dart));
                }
                assert_eq!(t.switch(dart, kind.dimension()), None);
            }
        }
    }

    #[test]
    fn group_laws() {
        for kind in KINDS {
            let t = SimplexDart::get(kind);
            let n = t.size() as DartIndex;
            for a in 0..n {
                assert_eq!(t.product(a, t.inverse(a)), t.identity());
                assert_eq!(t.product(t.identity(), a), a);
                for b in 0..n {
                    for c in 0..n {
                        assert_eq!(
                            t.product(t.product(a, b), c),
                            t.product(a, t.product(b, c))
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn locals_round_trip() {
        for kind in KINDS {
            let t = SimplexDart::get(kind);
            for dart in 0..t.size() as DartIndex {
                let (lv, le, lf) = t.locals(dart);
                assert_eq!(
                    t.from_locals(lv as usize, le as usize, lf as usize),
                    Some(dart)
                );
            }
        }
    }

    #[test]
    fn tet_edge_order_is_lexicographic() {
        let t = SimplexDart::get(MeshKind::Tetrahedron);
        let edges: Vec<&[u8]> = (0..6).map(|j| t.simplex_vertices(1, j)).collect();
        assert_eq!(
            edges,
            vec![&[0, 1][..], &[0, 2], &[0, 3], &[1, 2], &[1, 3], &[2, 3]]
        );
        // vertex 1 with edge {0,1} is the identity switched once
        assert_eq!(t.from_locals(1, 0, 0), t.switch(t.identity(), 0));
    }

    #[test]
    fn point_table_is_trivial() {
        let t = SimplexDart::get(MeshKind::Point);
        assert_eq!(t.simplex_count(0), 1);
        assert_eq!(t.simplex_count(1), 0);
        assert_eq!(t.switch(t.identity(), 0), None);
        assert_eq!(t.canonical(0, 0), Some(t.identity()));
        assert_eq!(t.opposite_vertex(t.identity()), 0);
    }

    #[test]
    fn switch_sequence_reaches_target() {
        for kind in KINDS {
            let t = SimplexDart::get(kind);
            for from in 0..t.size() as DartIndex {
                for to in 0..t.size() as DartIndex {
                    let mut cur = from;
                    for k in t.switch_sequence(from, to) {
                        cur = t.switch(cur, k).unwrap();
                    }
                    assert_eq!(cur, to);
                }
            }
        }
    }
}
