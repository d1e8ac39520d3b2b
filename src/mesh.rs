//! The mesh: connectivity, attributes and change observers.

use core::fmt::{Debug, Formatter};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use crate::data::accessor::{Accessor, AccessorMut};
use crate::data::attribute_store::{AttributeHandle, AttributeStore, RowLog, TypedHandle};
use crate::data::scalar::AttributeScalar;
use crate::data::visit::AttributeVisitor;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshDartError;
use crate::multimesh::MultiMeshObserver;
use crate::topology::connectivity::{ConsolidateMap, Connectivity, EditLog};
use crate::topology::dart::SimplexDart;
use crate::topology::primitive::{MeshKind, PrimitiveType};
use crate::topology::simplex::{Simplex, SimplexKey};
use crate::topology::tuple::Tuple;

/// A simplicial mesh of one [`MeshKind`].
///
/// Owns its connectivity and attribute columns. Tuples and accessors are
/// transient views; structural edits go through [`crate::ops::Operation`].
#[derive(Clone)]
pub struct Mesh {
    connectivity: Connectivity,
    attributes: AttributeStore,
    observers: Vec<Arc<dyn MultiMeshObserver>>,
}

impl Debug for Mesh {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mesh")
            .field("connectivity", &self.connectivity)
            .field("attributes", &self.attributes)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Compares topology and attribute values of slots in use; observers and
/// preallocated spare slots are ignored.
impl PartialEq for Mesh {
    fn eq(&self, other: &Self) -> bool {
        self.connectivity == other.connectivity
            && self
                .attributes
                .same_values(&other.attributes, |p| self.connectivity.capacity(p))
    }
}

/// Undo logs of one in-flight operation.
#[derive(Debug, Default)]
pub(crate) struct Transaction {
    pub edits: EditLog,
    pub rows: RowLog,
}

impl Mesh {
    /// Empty mesh of `kind`.
    pub fn new(kind: MeshKind) -> Self {
        Self {
            connectivity: Connectivity::new(kind),
            attributes: AttributeStore::new(),
            observers: Vec::new(),
        }
    }

    /// Mesh over vertices `0..n_vertices` with the given cells.
    pub fn from_cells<C: AsRef<[usize]>>(
        kind: MeshKind,
        n_vertices: usize,
        cells: &[C],
    ) -> Result<Self, MeshDartError> {
        Ok(Self {
            connectivity: Connectivity::from_cells(kind, n_vertices, cells)?,
            attributes: AttributeStore::new(),
            observers: Vec::new(),
        })
    }

    /// Point mesh over vertices `0..n_vertices`.
    pub fn from_points(n_vertices: usize) -> Self {
        let cells: &[[usize; 1]] = &[];
        Self::from_cells(MeshKind::Point, n_vertices, cells).unwrap_or_else(|_| Self::new(MeshKind::Point))
    }

    #[inline]
    pub fn kind(&self) -> MeshKind {
        self.connectivity.kind()
    }

    #[inline]
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    #[inline]
    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    // ---------------------------------------------------------------------
    // navigation
    // ---------------------------------------------------------------------

    pub fn is_valid(&self, t: &Tuple) -> bool {
        self.connectivity.is_valid(t)
    }

    pub fn switch(&self, t: &Tuple, primitive: PrimitiveType) -> Result<Tuple, MeshDartError> {
        self.connectivity.switch(t, primitive)
    }

    /// Apply switches in order, failing on the first boundary.
    pub fn switch_tuples(&self, t: &Tuple, primitives: &[PrimitiveType]) -> Result<Tuple, MeshDartError> {
        primitives
            .iter()
            .try_fold(*t, |cur, &p| self.connectivity.switch(&cur, p))
    }

    pub fn id(&self, t: &Tuple, primitive: PrimitiveType) -> Result<usize, MeshDartError> {
        self.connectivity.tuple_id(t, primitive)
    }

    pub fn is_ccw(&self, t: &Tuple) -> Result<bool, MeshDartError> {
        self.connectivity.is_ccw(t)
    }

    pub fn tuple_from_id(&self, primitive: PrimitiveType, id: usize) -> Result<Tuple, MeshDartError> {
        self.connectivity.tuple_from_id(primitive, id)
    }

    /// The tuple's `primitive`-simplex with its id and vertex set.
    pub fn simplex(&self, t: &Tuple, primitive: PrimitiveType) -> Result<Simplex, MeshDartError> {
        let id = self.connectivity.tuple_id(t, primitive)?;
        let key = self.connectivity.tuple_key(t, primitive)?;
        Ok(Simplex::new(primitive, id, key))
    }

    /// Canonical tuples of every live simplex of `primitive`, ascending id.
    ///
    /// A tuple lives in a cell, so vertices not referenced by any cell have
    /// no tuple and are skipped. In point meshes every vertex is its own
    /// cell and none is skipped.
    pub fn get_all(&self, primitive: PrimitiveType) -> Vec<Tuple> {
        if !self.kind().contains(primitive) {
            return Vec::new();
        }
        self.connectivity
            .live_ids(primitive)
            .filter_map(|id| self.connectivity.tuple_from_id(primitive, id).ok())
            .collect()
    }

    /// Tuple on the live simplex with vertex set `key`.
    pub fn tuple_of(&self, key: &SimplexKey) -> Option<Tuple> {
        self.connectivity.tuple_of_key(key)
    }

    /// Facets: no neighbor across them. Lower simplices: contained in a
    /// boundary facet. Cells: own a boundary facet.
    pub fn is_boundary(&self, t: &Tuple, primitive: PrimitiveType) -> Result<bool, MeshDartError> {
        let key = self.connectivity.tuple_key(t, primitive)?;
        if primitive == self.kind().top_primitive() {
            let n = self.connectivity.vertices_per_cell();
            return Ok((0..n).any(|i| self.connectivity.cell_neighbor(t.cell(), i).is_none()));
        }
        Ok(self.connectivity.is_boundary_simplex(&key))
    }

    /// Switches that carry `from` onto `to` inside one cell.
    pub fn find_local_switch_sequence(
        &self,
        from: &Tuple,
        to: &Tuple,
    ) -> Result<Vec<PrimitiveType>, MeshDartError> {
        if !self.is_valid(from) || !self.is_valid(to) || from.cell() != to.cell() {
            return Err(MeshDartError::InvalidTuple);
        }
        let kind = self.kind();
        let (a, b) = from
            .dart(kind)
            .zip(to.dart(kind))
            .ok_or(MeshDartError::InvalidTuple)?;
        Ok(SimplexDart::get(kind)
            .switch_sequence(a, b)
            .into_iter()
            .filter_map(PrimitiveType::from_dimension)
            .collect())
    }

    /// Vertices within `radius` edge hops of `seeds`, ascending.
    pub fn vertex_ring(&self, seeds: &[usize], radius: usize) -> Vec<usize> {
        let mut seen: BTreeSet<usize> = seeds
            .iter()
            .copied()
            .filter(|&v| self.connectivity.is_active(PrimitiveType::Vertex, v))
            .collect();
        let mut frontier: VecDeque<(usize, usize)> = seen.iter().map(|&v| (v, 0)).collect();
        while let Some((v, depth)) = frontier.pop_front() {
            if depth == radius {
                continue;
            }
            for w in self.connectivity.one_ring(v) {
                if seen.insert(w) {
                    frontier.push_back((w, depth + 1));
                }
            }
        }
        seen.into_iter().collect()
    }

    // ---------------------------------------------------------------------
    // attributes
    // ---------------------------------------------------------------------

    /// Register an attribute whose rows start as `default`.
    pub fn register_attribute<T: AttributeScalar>(
        &mut self,
        name: &str,
        primitive: PrimitiveType,
        default: &[T],
    ) -> Result<TypedHandle<T>, MeshDartError> {
        if !self.kind().contains(primitive) {
            return Err(MeshDartError::UnsupportedPrimitive {
                primitive,
                kind: self.kind(),
            });
        }
        let capacity = self.connectivity.physical_capacity(primitive);
        self.attributes.register(name, primitive, default, capacity)
    }

    pub fn get_attribute_handle<T: AttributeScalar>(
        &self,
        name: &str,
        primitive: PrimitiveType,
    ) -> Result<TypedHandle<T>, MeshDartError> {
        self.attributes.typed_handle(name, primitive)
    }

    pub fn attribute_handle(&self, name: &str, primitive: PrimitiveType) -> Result<AttributeHandle, MeshDartError> {
        self.attributes.handle(name, primitive)
    }

    pub fn create_accessor<'a, T: AttributeScalar>(
        &'a self,
        handle: &'a TypedHandle<T>,
    ) -> Result<Accessor<'a, T>, MeshDartError> {
        let column = self.attributes.column(handle)?;
        Ok(Accessor::new(column, &self.connectivity, handle.primitive(), handle.name()))
    }

    pub fn create_accessor_mut<'a, T: AttributeScalar>(
        &'a mut self,
        handle: &'a TypedHandle<T>,
    ) -> Result<AccessorMut<'a, T>, MeshDartError> {
        let column = self.attributes.column(handle)?;
        Ok(AccessorMut::new(column, &self.connectivity, handle.primitive(), handle.name()))
    }

    /// `(id, row)` for every live simplex of the handle's primitive type.
    pub fn stream_attribute<'a, T: AttributeScalar>(
        &'a self,
        handle: &TypedHandle<T>,
    ) -> Result<impl Iterator<Item = (usize, Vec<T>)> + 'a, MeshDartError> {
        let column = self.attributes.column(handle)?;
        Ok(self
            .connectivity
            .live_ids(handle.primitive())
            .filter_map(move |id| column.row(id).map(|row| (id, row))))
    }

    /// Stream every registered attribute to `visitor`, in registration order.
    pub fn visit_attributes<V: AttributeVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), MeshDartError> {
        for handle in self.attributes.handles() {
            if !visitor.begin_attribute(handle) {
                continue;
            }
            let column = self.attributes.tagged(handle)?;
            for id in self.connectivity.live_ids(handle.primitive()) {
                if let Some(row) = column.row(id) {
                    visitor.visit_row(handle, id, row.as_row());
                }
            }
            visitor.end_attribute(handle);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // observers, transactions, consolidation
    // ---------------------------------------------------------------------

    pub fn add_observer(&mut self, observer: Arc<dyn MultiMeshObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn observers(&self) -> &[Arc<dyn MultiMeshObserver>] {
        &self.observers
    }

    /// Keep the writes recorded in `tx` and release the ids it freed.
    pub(crate) fn commit(&self, tx: Transaction) {
        self.connectivity.commit(tx.edits);
    }

    /// Undo every write recorded in `tx`.
    pub(crate) fn rollback(&self, tx: Transaction) {
        self.attributes.undo(tx.rows);
        self.connectivity.undo(tx.edits);
    }

    /// Preallocate room for `additional` new simplices of every primitive,
    /// so edits can run through a shared reference without growing.
    pub fn reserve(&mut self, additional: usize) {
        self.connectivity.reserve(additional);
        for primitive in self.kind().primitives() {
            let capacity = self.connectivity.physical_capacity(primitive);
            self.attributes.resize(primitive, capacity);
        }
    }

    /// Compact ids of every primitive to `[0, live_count)`.
    ///
    /// Attribute columns follow the same permutation. Every outstanding tuple
    /// becomes invalid.
    pub fn consolidate(&mut self) -> ConsolidateMap {
        let map = self.connectivity.consolidate();
        self.attributes.permute(&map);
        log::debug!(
            "consolidated mesh: {} vertices, {} cells",
            self.connectivity.live_count(PrimitiveType::Vertex),
            self.connectivity.live_count(self.kind().top_primitive()),
        );
        for observer in &self.observers {
            observer.on_consolidated(&map);
        }
        map
    }
}

impl DebugInvariants for Mesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "mesh");
    }

    fn validate_invariants(&self) -> Result<(), MeshDartError> {
        self.connectivity.validate_invariants()?;
        for handle in self.attributes.handles() {
            let rows = self.attributes.tagged(handle)?.rows();
            let capacity = self.connectivity.physical_capacity(handle.primitive());
            if rows < capacity {
                return Err(MeshDartError::InvariantsViolated(format!(
                    "attribute `{}` has {rows} rows for {capacity} slots",
                    handle.name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::visit::AttributeRow;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Mesh: Send, Sync, Clone);

    fn quad() -> Mesh {
        Mesh::from_cells(MeshKind::Triangle, 4, &[[0, 1, 3], [1, 2, 3]]).unwrap()
    }

    #[test]
    fn accessors_read_and_write_by_tuple() {
        let mut mesh = quad();
        let pos = mesh.register_attribute("position", PrimitiveType::Vertex, &[0.0f64; 2]).unwrap();
        let t = mesh.tuple_from_id(PrimitiveType::Vertex, 2).unwrap();
        {
            let mut acc = mesh.create_accessor_mut(&pos).unwrap();
            acc.set_vector_attribute(&t, &[1.0, 1.0]).unwrap();
            let err = acc.set_vector_attribute(&t, &[1.0]).unwrap_err();
            assert!(matches!(err, MeshDartError::StrideMismatch { expected: 2, found: 1, .. }));
        }
        let acc = mesh.create_accessor(&pos).unwrap();
        assert_eq!(acc.vector_attribute(&t).unwrap(), vec![1.0, 1.0]);
        assert_eq!(acc.row(0), Some(vec![0.0, 0.0]));
        assert!(acc.scalar_attribute(&t).is_err());
    }

    #[test]
    fn unsupported_primitive_is_rejected() {
        let mut mesh = quad();
        let err = mesh
            .register_attribute("vol", PrimitiveType::Tetrahedron, &[0.0f64])
            .unwrap_err();
        assert!(matches!(err, MeshDartError::UnsupportedPrimitive { .. }));
    }

    #[test]
    fn boundary_queries() {
        let mesh = quad();
        let diag = mesh.tuple_of(&SimplexKey::new(&[1, 3])).unwrap();
        assert!(!mesh.is_boundary(&diag, PrimitiveType::Edge).unwrap());
        assert!(mesh.is_boundary(&diag, PrimitiveType::Vertex).unwrap());
        let outer = mesh.tuple_of(&SimplexKey::new(&[0, 1])).unwrap();
        assert!(mesh.is_boundary(&outer, PrimitiveType::Edge).unwrap());
        assert!(mesh.is_boundary(&outer, PrimitiveType::Face).unwrap());
    }

    #[test]
    fn local_switch_sequence_reaches_target() {
        let mesh = Mesh::from_cells(MeshKind::Tetrahedron, 4, &[[0, 1, 2, 3]]).unwrap();
        let all: Vec<Tuple> = (0..24u8)
            .map(|d| Tuple::from_dart(SimplexDart::get(MeshKind::Tetrahedron), d, 0, mesh.connectivity().cell_stamp(0).unwrap()))
            .collect();
        for from in &all {
            for to in &all {
                let seq = mesh.find_local_switch_sequence(from, to).unwrap();
                assert_eq!(mesh.switch_tuples(from, &seq).unwrap(), *to);
            }
        }
    }

    #[test]
    fn vertex_ring_grows_by_hops() {
        let mesh = Mesh::from_cells(MeshKind::Edge, 6, &[[0, 1], [1, 2], [2, 3], [3, 4], [4, 5]]).unwrap();
        assert_eq!(mesh.vertex_ring(&[2], 0), vec![2]);
        assert_eq!(mesh.vertex_ring(&[2], 1), vec![1, 2, 3]);
        assert_eq!(mesh.vertex_ring(&[2], 2), vec![0, 1, 2, 3, 4]);
    }

    struct Collect(Vec<(String, usize, usize)>);

    impl AttributeVisitor for Collect {
        fn visit_row(&mut self, handle: &AttributeHandle, id: usize, row: AttributeRow<'_>) {
            self.0.push((handle.name().to_string(), id, row.len()));
        }
    }

    #[test]
    fn visitor_sees_live_rows_only() {
        let mut mesh = quad();
        mesh.register_attribute("tag", PrimitiveType::Face, &[0u32]).unwrap();
        mesh.register_attribute("w", PrimitiveType::Vertex, &[0.0f32; 3]).unwrap();
        let mut v = Collect(Vec::new());
        mesh.visit_attributes(&mut v).unwrap();
        assert_eq!(v.0.len(), 2 + 4);
        assert_eq!(v.0[0], ("tag".to_string(), 0, 1));
        assert_eq!(v.0[2], ("w".to_string(), 0, 3));
        mesh.validate_invariants().unwrap();
    }

    #[test]
    fn get_all_skips_vertices_without_cells() {
        // vertex 4 is not used by any cell
        let mesh = Mesh::from_cells(MeshKind::Triangle, 5, &[[0, 1, 3], [1, 2, 3]]).unwrap();
        assert!(mesh.connectivity().is_active(PrimitiveType::Vertex, 4));
        let ids: Vec<usize> = mesh
            .get_all(PrimitiveType::Vertex)
            .iter()
            .map(|t| mesh.id(t, PrimitiveType::Vertex).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(mesh.tuple_from_id(PrimitiveType::Vertex, 4).is_err());
    }

    #[test]
    fn point_meshes_hold_every_vertex() {
        let mut mesh = Mesh::from_points(3);
        assert_eq!(mesh.kind().top_primitive(), PrimitiveType::Vertex);
        let all = mesh.get_all(PrimitiveType::Vertex);
        assert_eq!(all.len(), 3);
        let ids: Vec<usize> = all.iter().map(|t| mesh.id(t, PrimitiveType::Vertex).unwrap()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(mesh.get_all(PrimitiveType::Edge).is_empty());

        let w = mesh.register_attribute("w", PrimitiveType::Vertex, &[0.5f64]).unwrap();
        mesh.create_accessor_mut(&w).unwrap().set_scalar_attribute(&all[1], 2.0).unwrap();
        let acc = mesh.create_accessor(&w).unwrap();
        assert_eq!(acc.scalar_attribute(&all[1]).unwrap(), 2.0);
        assert_eq!(acc.scalar_attribute(&all[0]).unwrap(), 0.5);
        assert!(mesh.switch(&all[0], PrimitiveType::Vertex).is_err());
        assert!(mesh.register_attribute("e", PrimitiveType::Edge, &[0.0f64]).is_err());
        mesh.validate_invariants().unwrap();
    }
}
