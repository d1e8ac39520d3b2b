//! Tuple: a navigable cursor onto one (vertex, edge, face, cell) incidence.

use crate::topology::dart::{DartIndex, SimplexDart};
use crate::topology::primitive::MeshKind;

/// Mesh cursor. Local indices refer to the lexicographic local simplex lists
/// of the cell type; `generation` is the cell's stamp when the tuple was made.
///
/// Tuples are plain values: they never borrow the mesh, and a structural edit
/// touching their cell makes them fail validity checks instead of dangling.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Tuple {
    local_vertex: u8,
    local_edge: u8,
    local_face: u8,
    cell: usize,
    generation: u64,
}

impl Tuple {
    pub(crate) fn new(
        local_vertex: u8,
        local_edge: u8,
        local_face: u8,
        cell: usize,
        generation: u64,
    ) -> Self {
        Self {
            local_vertex,
            local_edge,
            local_face,
            cell,
            generation,
        }
    }

    pub(crate) fn from_dart(table: &SimplexDart, dart: DartIndex, cell: usize, generation: u64) -> Self {
        let (lv, le, lf) = table.locals(dart);
        Self::new(lv, le, lf, cell, generation)
    }

    /// Dart of this tuple in the tables of `kind`, if the local triple is consistent.
    pub(crate) fn dart(&self, kind: MeshKind) -> Option<DartIndex> {
        SimplexDart::get(kind).from_locals(
            self.local_vertex as usize,
            self.local_edge as usize,
            self.local_face as usize,
        )
    }

    #[inline]
    pub fn local_vertex(&self) -> usize {
        self.local_vertex as usize
    }

    #[inline]
    pub fn local_edge(&self) -> usize {
        self.local_edge as usize
    }

    #[inline]
    pub fn local_face(&self) -> usize {
        self.local_face as usize
    }

    /// Global id of the cell holding this cursor.
    #[inline]
    pub fn cell(&self) -> usize {
        self.cell
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Tuple: Copy, Send, Sync, std::hash::Hash);

    #[test]
    fn dart_round_trip() {
        let table = SimplexDart::get(MeshKind::Tetrahedron);
        for dart in 0..table.size() as DartIndex {
            let t = Tuple::from_dart(table, dart, 7, 3);
            assert_eq!(t.dart(MeshKind::Tetrahedron), Some(dart));
            assert_eq!(t.cell(), 7);
            assert_eq!(t.generation(), 3);
        }
    }

    #[test]
    fn inconsistent_locals_have_no_dart() {
        // vertex 3 does not lie on tet edge {0,1}
        let t = Tuple::new(3, 0, 0, 0, 0);
        assert_eq!(t.dart(MeshKind::Tetrahedron), None);
    }
}
