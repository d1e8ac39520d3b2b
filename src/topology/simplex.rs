//! Vertex-set identity of simplices.
//!
//! A [`SimplexKey`] is the sorted list of global vertex ids of a simplex. It is
//! independent of cell ids and orientation, so it survives the cell
//! relabeling performed by local edits and is what the edge/face registry,
//! the link condition and attribute transfer match on.

use core::fmt::{Debug, Formatter};

use crate::topology::primitive::PrimitiveType;

const PAD: usize = usize::MAX;

/// Sorted vertex ids of a simplex with up to four vertices.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SimplexKey {
    len: u8,
    ids: [usize; 4],
}

impl SimplexKey {
    /// Build a key from vertex ids in any order. Ids past the fourth are ignored.
    pub fn new(vertices: &[usize]) -> Self {
        debug_assert!(vertices.len() <= 4, "simplex keys hold at most 4 vertices");
        let len = vertices.len().min(4);
        let mut ids = [PAD; 4];
        ids[..len].copy_from_slice(&vertices[..len]);
        ids[..len].sort_unstable();
        Self {
            len: len as u8,
            ids,
        }
    }

    #[inline]
    pub fn vertices(&self) -> &[usize] {
        &self.ids[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Primitive type implied by the vertex count.
    pub fn primitive(&self) -> Option<PrimitiveType> {
        self.len().checked_sub(1).and_then(PrimitiveType::from_dimension)
    }

    #[inline]
    pub fn contains(&self, vertex: usize) -> bool {
        self.vertices().contains(&vertex)
    }

    /// True if every vertex of `other` is a vertex of `self`.
    pub fn contains_all(&self, other: &[usize]) -> bool {
        other.iter().all(|v| self.contains(*v))
    }

    /// Replace `from` by `to`. `None` if `from` is absent or `to` is already a
    /// vertex (the result would be degenerate). Replacing a vertex by itself
    /// returns the key unchanged.
    pub fn substitute(&self, from: usize, to: usize) -> Option<Self> {
        if !self.contains(from) {
            return None;
        }
        if from == to {
            return Some(*self);
        }
        if self.contains(to) {
            return None;
        }
        let mut ids = self.vertices().to_vec();
        for v in ids.iter_mut() {
            if *v == from {
                *v = to;
            }
        }
        Some(Self::new(&ids))
    }

    /// Add one vertex; the key is returned unchanged if it is full or the
    /// vertex is already present.
    pub fn with_vertex(&self, vertex: usize) -> Self {
        if self.contains(vertex) || self.len() == 4 {
            return *self;
        }
        let mut ids = self.vertices().to_vec();
        ids.push(vertex);
        Self::new(&ids)
    }
}

impl Debug for SimplexKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.vertices()).finish()
    }
}

/// A live simplex: its primitive type, slot id and vertex set.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Simplex {
    primitive: PrimitiveType,
    id: usize,
    key: SimplexKey,
}

impl Simplex {
    pub fn new(primitive: PrimitiveType, id: usize, key: SimplexKey) -> Self {
        Self { primitive, id, key }
    }

    #[inline]
    pub fn primitive(&self) -> PrimitiveType {
        self.primitive
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn key(&self) -> &SimplexKey {
        &self.key
    }

    #[inline]
    pub fn vertices(&self) -> &[usize] {
        self.key.vertices()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_ignore_vertex_order() {
        assert_eq!(SimplexKey::new(&[3, 1, 2]), SimplexKey::new(&[2, 3, 1]));
        assert_eq!(SimplexKey::new(&[3, 1, 2]).vertices(), &[1, 2, 3]);
        assert_ne!(SimplexKey::new(&[1, 2]), SimplexKey::new(&[1, 2, 3]));
    }

    #[test]
    fn substitution_rejects_degenerate_results() {
        let edge = SimplexKey::new(&[4, 7]);
        assert_eq!(edge.substitute(4, 9), Some(SimplexKey::new(&[7, 9])));
        assert_eq!(edge.substitute(4, 7), None);
        assert_eq!(edge.substitute(5, 9), None);
        assert_eq!(edge.substitute(7, 7), Some(edge));
    }

    #[test]
    fn primitive_follows_length() {
        assert_eq!(SimplexKey::new(&[0]).primitive(), Some(PrimitiveType::Vertex));
        assert_eq!(
            SimplexKey::new(&[0, 1, 2, 3]).primitive(),
            Some(PrimitiveType::Tetrahedron)
        );
        assert_eq!(SimplexKey::new(&[]).primitive(), None);
        assert_eq!(SimplexKey::new(&[5, 1]).with_vertex(3).vertices(), &[1, 3, 5]);
    }
}
