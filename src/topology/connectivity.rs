//! Flat connectivity table for simplicial meshes.
//!
//! Every cell owns a fixed-size row of vertex ids, neighbor ids (the neighbor
//! across the facet opposite local vertex `i` sits in slot `i`) and, for the
//! intermediate dimensions, ids of its edges and faces. Intermediate simplices
//! are identified through a registry keyed by their sorted vertex ids, which
//! keeps their ids stable across local edits. Deleted slots go to per-dimension
//! free lists and are reused by later allocations.
//!
//! Rows sit behind one small lock each and the registries are sharded maps,
//! so edits on disjoint regions run through `&self` at the same time. Slot
//! vectors only grow through [`Connectivity::reserve`]; an edit that finds no
//! preallocated slot fails with [`EditFailure::OutOfSlots`] and is retried by
//! its caller after growing the table.
//!
//! Structural edits write into an [`EditLog`]: every write records the value
//! it replaces, so a failed operation can be undone exactly. Ids an edit frees
//! stay in its log until [`Connectivity::commit`], so no other edit can take
//! them while the first one may still roll back.

use core::fmt::{Debug, Formatter};
use core::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::{MeshDartError, OperationError};
use crate::topology::dart::{DartIndex, SimplexDart};
use crate::topology::primitive::{MeshKind, PrimitiveType};
use crate::topology::simplex::SimplexKey;
use crate::topology::tuple::Tuple;

/// Neighbor sentinel for facets on the mesh boundary.
pub const BOUNDARY: usize = usize::MAX;
/// Anchor sentinel for simplices not referenced by any cell.
pub(crate) const NO_CELL: usize = usize::MAX;
const NO_ID: usize = usize::MAX;
/// Edge and face ids stored per cell (6 + 4 for tetrahedra).
const CELL_SIMPLICES: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CellRow {
    vertices: [usize; 4],
    adjacency: [usize; 4],
    /// Ids of the cell's edges, then faces, at `Connectivity::offsets`.
    simplices: [usize; CELL_SIMPLICES],
    active: bool,
    stamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SimplexRow {
    active: bool,
    /// Some live cell containing the simplex.
    anchor: usize,
    /// Number of live cells containing the simplex.
    refcount: u32,
}

trait Row: Copy + PartialEq + Send {
    const EMPTY: Self;
}

impl Row for CellRow {
    const EMPTY: Self = CellRow {
        vertices: [NO_ID; 4],
        adjacency: [BOUNDARY; 4],
        simplices: [NO_ID; CELL_SIMPLICES],
        active: false,
        stamp: 0,
    };
}

impl Row for SimplexRow {
    const EMPTY: Self = SimplexRow {
        active: false,
        anchor: NO_CELL,
        refcount: 0,
    };
}

/// Logical length and free list of one dimension.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Allocator {
    len: usize,
    free: Vec<usize>,
}

/// Slots of one dimension. `rows` holds the preallocated slots; ids below
/// `alloc.len` are in use or on the free list.
struct SlotTable<R> {
    rows: Vec<Mutex<R>>,
    alloc: Mutex<Allocator>,
}

impl<R: Row> SlotTable<R> {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            alloc: Mutex::new(Allocator::default()),
        }
    }

    fn from_rows(rows: Vec<R>) -> Self {
        let len = rows.len();
        Self {
            rows: rows.into_iter().map(Mutex::new).collect(),
            alloc: Mutex::new(Allocator {
                len,
                free: Vec::new(),
            }),
        }
    }

    #[inline]
    fn get(&self, id: usize) -> Option<R> {
        self.rows.get(id).map(|r| *r.lock())
    }

    /// Overwrite a row, returning the previous one.
    fn set(&self, id: usize, row: R) -> Option<R> {
        self.rows
            .get(id)
            .map(|slot| core::mem::replace(&mut *slot.lock(), row))
    }

    fn len(&self) -> usize {
        self.alloc.lock().len
    }

    fn physical(&self) -> usize {
        self.rows.len()
    }

    /// Slots an edit can still take without growing.
    fn spare(&self) -> usize {
        let a = self.alloc.lock();
        self.rows.len() - a.len + a.free.len()
    }

    /// Reused id (`true`) or the next unused one, if any is left.
    fn take(&self) -> Option<(usize, bool)> {
        let mut a = self.alloc.lock();
        if let Some(id) = a.free.pop() {
            return Some((id, true));
        }
        if a.len < self.rows.len() {
            a.len += 1;
            return Some((a.len - 1, false));
        }
        None
    }

    fn grow(&mut self, rows: usize) {
        if rows > self.rows.len() {
            self.rows.resize_with(rows, || Mutex::new(R::EMPTY));
        }
    }

    /// Rows `[0, len)`.
    fn snapshot(&self) -> Vec<R> {
        let len = self.len();
        self.rows[..len].iter().map(|r| *r.lock()).collect()
    }

    fn free_ids(&self) -> Vec<usize> {
        self.alloc.lock().free.clone()
    }
}

impl<R: Row> Clone for SlotTable<R> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.iter().map(|r| Mutex::new(*r.lock())).collect(),
            alloc: Mutex::new(self.alloc.lock().clone()),
        }
    }
}

/// Compares the allocator and the rows in use; spare slots are ignored.
impl<R: Row> PartialEq for SlotTable<R> {
    fn eq(&self, other: &Self) -> bool {
        *self.alloc.lock() == *other.alloc.lock() && self.snapshot() == other.snapshot()
    }
}

impl<R: Row> Debug for SlotTable<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let a = self.alloc.lock();
        f.debug_struct("SlotTable")
            .field("len", &a.len)
            .field("free", &a.free.len())
            .field("physical", &self.rows.len())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Undo {
    Cell { cell: usize, row: CellRow },
    Simplex { dim: usize, id: usize, row: SimplexRow },
    /// Taken from the free list.
    Reused { dim: usize, id: usize },
    /// Taken past the previous length.
    Appended { dim: usize, id: usize },
    RegistryInserted { dim: usize, key: SimplexKey },
    RegistryRemoved { dim: usize, key: SimplexKey, id: usize },
}

/// Undo entries of one edit, oldest first.
///
/// Owned by the operation that writes it, so edits on disjoint regions keep
/// separate logs. Undoing restores every row it touched and returns taken ids
/// to their allocator, whatever other edits did in between.
#[derive(Debug, Default)]
pub(crate) struct EditLog {
    entries: Vec<Undo>,
    /// `(dim, id)` freed by the edit, published on commit.
    released: Vec<(usize, usize)>,
}

impl EditLog {
    #[inline]
    fn push(&mut self, undo: Undo) {
        self.entries.push(undo);
    }
}

/// Slots written by one [`Connectivity::replace_cells`] call.
#[derive(Clone, Debug, Default)]
pub(crate) struct CellEdit {
    /// New cell ids, in the order of the `added` argument.
    pub added: Vec<usize>,
    /// Newly allocated (or reused) ids per dimension.
    pub allocated: Vec<Vec<usize>>,
}

/// Why a cell replacement could not be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EditFailure {
    NonManifold(SimplexKey),
    Orphaned(usize),
    StillReferenced(usize),
    /// No preallocated slot left in this dimension.
    OutOfSlots(usize),
}

impl From<EditFailure> for OperationError {
    fn from(f: EditFailure) -> Self {
        match f {
            EditFailure::NonManifold(_) => {
                OperationError::TopologyPrecondition("edit would create a non-manifold facet")
            }
            EditFailure::Orphaned(_) => {
                OperationError::TopologyPrecondition("edit would leave a vertex without cells")
            }
            EditFailure::StillReferenced(_) => {
                OperationError::TopologyPrecondition("retired vertex is still referenced")
            }
            EditFailure::OutOfSlots(_) => OperationError::OutOfSlots,
        }
    }
}

/// Vertex ids of one cell in stored (orientation) order, copied out of the table.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellVertices {
    len: u8,
    ids: [usize; 4],
}

impl CellVertices {
    const EMPTY: CellVertices = CellVertices {
        len: 0,
        ids: [NO_ID; 4],
    };
}

impl Deref for CellVertices {
    type Target = [usize];

    fn deref(&self) -> &[usize] {
        &self.ids[..self.len as usize]
    }
}

impl Debug for CellVertices {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl IntoIterator for CellVertices {
    type Item = usize;
    type IntoIter = core::iter::Take<core::array::IntoIter<usize, 4>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter().take(self.len as usize)
    }
}

impl<'a> IntoIterator for &'a CellVertices {
    type Item = &'a usize;
    type IntoIter = core::slice::Iter<'a, usize>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Old-to-new id maps produced by [`Connectivity::consolidate`], per dimension.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsolidateMap {
    old_to_new: Vec<Vec<Option<usize>>>,
    new_to_old: Vec<Vec<usize>>,
}

impl ConsolidateMap {
    /// New id of a live simplex; `None` if it was dead before consolidation.
    pub fn new_id(&self, primitive: PrimitiveType, old: usize) -> Option<usize> {
        self.old_to_new
            .get(primitive.dimension())?
            .get(old)
            .copied()
            .flatten()
    }

    pub fn old_id(&self, primitive: PrimitiveType, new: usize) -> Option<usize> {
        self.new_to_old.get(primitive.dimension())?.get(new).copied()
    }

    /// Dense list of old ids in their new order.
    pub fn new_to_old(&self, primitive: PrimitiveType) -> &[usize] {
        self.new_to_old
            .get(primitive.dimension())
            .map_or(&[], Vec::as_slice)
    }

    /// True if no id moved and nothing was dropped.
    pub fn is_identity(&self) -> bool {
        self.new_to_old
            .iter()
            .zip(&self.old_to_new)
            .all(|(n2o, o2n)| n2o.len() == o2n.len() && n2o.iter().enumerate().all(|(i, &o)| i == o))
    }
}

#[inline]
fn remap(table: &[Option<usize>], id: usize) -> usize {
    table.get(id).copied().flatten().unwrap_or(NO_ID)
}

/// Cell-vertex, cell-cell and cell-subsimplex incidence with free lists.
pub struct Connectivity {
    kind: MeshKind,
    n: usize,
    cells: SlotTable<CellRow>,
    next_stamp: AtomicU64,
    /// Vertex, edge and face slots below the cell dimension.
    slots: Vec<SlotTable<SimplexRow>>,
    /// Edge and face registries, index `dim - 1`.
    registries: Vec<DashMap<SimplexKey, usize>>,
    /// Start of each dimension's ids in `CellRow::simplices`.
    offsets: [usize; 4],
}

impl Clone for Connectivity {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            n: self.n,
            cells: self.cells.clone(),
            next_stamp: AtomicU64::new(self.next_stamp.load(Ordering::Acquire)),
            slots: self.slots.clone(),
            registries: self.registries.clone(),
            offsets: self.offsets,
        }
    }
}

fn sorted_registry(registry: &DashMap<SimplexKey, usize>) -> Vec<(SimplexKey, usize)> {
    let mut entries: Vec<(SimplexKey, usize)> = registry.iter().map(|e| (*e.key(), *e.value())).collect();
    entries.sort_unstable();
    entries
}

/// Compares the topology in use: rows, free lists and registries. The stamp
/// counter and spare slots are not part of the comparison.
impl PartialEq for Connectivity {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.cells == other.cells
            && self.slots == other.slots
            && self
                .registries
                .iter()
                .zip(&other.registries)
                .all(|(a, b)| a.len() == b.len() && sorted_registry(a) == sorted_registry(b))
    }
}

impl Debug for Connectivity {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connectivity")
            .field("kind", &self.kind)
            .field("cells", &self.cells)
            .field("slots", &self.slots)
            .field(
                "registries",
                &self.registries.iter().map(DashMap::len).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Connectivity {
    /// Empty table for `kind`.
    pub fn new(kind: MeshKind) -> Self {
        let d = kind.dimension();
        let table = SimplexDart::get(kind);
        let mut offsets = [0usize; 4];
        for k in 2..d {
            offsets[k] = offsets[k - 1] + table.simplex_count(k - 1);
        }
        Self {
            kind,
            n: kind.vertices_per_cell(),
            cells: SlotTable::new(),
            next_stamp: AtomicU64::new(1),
            slots: (0..d).map(|_| SlotTable::new()).collect(),
            registries: (1..d).map(|_| DashMap::new()).collect(),
            offsets,
        }
    }

    /// Build from `n_vertices` vertices and per-cell vertex lists.
    ///
    /// Cell orientation is taken as given. Fails on out-of-range or repeated
    /// vertices and on facets shared by more than two cells. Point meshes hold
    /// every vertex of `0..n_vertices`; their cell list is only validated.
    pub fn from_cells<C: AsRef<[usize]>>(
        kind: MeshKind,
        n_vertices: usize,
        cells: &[C],
    ) -> Result<Self, MeshDartError> {
        let n = kind.vertices_per_cell();
        let table = SimplexDart::get(kind);
        let d = kind.dimension();
        let mut keys: Vec<HashSet<SimplexKey>> = vec![HashSet::new(); d];
        for (i, cell) in cells.iter().enumerate() {
            let c = cell.as_ref();
            if c.len() != n {
                return Err(MeshDartError::CellArity {
                    cell: i,
                    expected: n,
                    found: c.len(),
                });
            }
            if let Some(&vertex) = c.iter().find(|&&v| v >= n_vertices) {
                return Err(MeshDartError::InvalidVertexId {
                    cell: i,
                    vertex,
                    n_vertices,
                });
            }
            let key = SimplexKey::new(c);
            if key.vertices().windows(2).any(|w| w[0] == w[1]) {
                return Err(MeshDartError::DegenerateCell { cell: i });
            }
            for (k, set) in keys.iter_mut().enumerate().skip(1) {
                for j in 0..table.simplex_count(k) {
                    set.insert(key_of(table, c, k, j));
                }
            }
        }

        let mut conn = Self::new(kind);
        let mut log = EditLog::default();
        if kind == MeshKind::Point {
            conn.cells.grow(n_vertices);
            for v in 0..n_vertices {
                let c = conn.alloc_cell(&mut log).map_err(|_| MeshDartError::InvalidConfig(
                    "point table could not be allocated".into(),
                ))?;
                let mut row = CellRow::EMPTY;
                row.vertices[0] = v;
                conn.write_cell(&mut log, c, row);
            }
            return Ok(conn);
        }

        conn.cells.grow(cells.len());
        conn.slots[0].grow(n_vertices);
        for k in 1..d {
            conn.slots[k].grow(keys[k].len());
        }
        for _ in 0..n_vertices {
            conn.alloc_simplex(&mut log, 0)
                .map_err(|_| MeshDartError::InvalidConfig("vertex table could not be allocated".into()))?;
        }
        let added: Vec<Vec<usize>> = cells.iter().map(|c| c.as_ref().to_vec()).collect();
        conn.replace_cells(&mut log, &[], &added, &[])
            .map_err(|f| match f {
                EditFailure::NonManifold(key) => MeshDartError::NonManifoldFacet {
                    facet: key.vertices().to_vec(),
                },
                EditFailure::Orphaned(v) | EditFailure::StillReferenced(v) => {
                    MeshDartError::InactiveSimplex {
                        primitive: PrimitiveType::Vertex,
                        id: v,
                    }
                }
                EditFailure::OutOfSlots(dim) => MeshDartError::InvalidConfig(format!(
                    "dimension {dim} ran out of preallocated slots while building"
                )),
            })?;
        Ok(conn)
    }

    // ---------------------------------------------------------------------
    // queries
    // ---------------------------------------------------------------------

    #[inline]
    pub fn kind(&self) -> MeshKind {
        self.kind
    }

    #[inline]
    pub fn vertices_per_cell(&self) -> usize {
        self.n
    }

    #[inline]
    fn dim(&self) -> usize {
        self.kind.dimension()
    }

    #[inline]
    fn cell(&self, cell: usize) -> CellRow {
        self.cells.get(cell).unwrap_or(CellRow::EMPTY)
    }

    #[inline]
    fn simplex_row(&self, k: usize, id: usize) -> SimplexRow {
        self.slots
            .get(k)
            .and_then(|s| s.get(id))
            .unwrap_or(SimplexRow::EMPTY)
    }

    fn allocator(&self, k: usize) -> &Mutex<Allocator> {
        match self.slots.get(k) {
            Some(s) => &s.alloc,
            None => &self.cells.alloc,
        }
    }

    fn len_of(&self, k: usize) -> usize {
        let d = self.dim();
        if k == d {
            self.cells.len()
        } else if k < d {
            self.slots[k].len()
        } else {
            0
        }
    }

    fn active_at(&self, k: usize, id: usize) -> bool {
        let d = self.dim();
        if k == d {
            self.cells.get(id).is_some_and(|r| r.active)
        } else if k < d {
            self.slots[k].get(id).is_some_and(|r| r.active)
        } else {
            false
        }
    }

    /// Number of id slots (live or free) for `primitive`.
    pub fn capacity(&self, primitive: PrimitiveType) -> usize {
        self.len_of(primitive.dimension())
    }

    /// Preallocated slots for `primitive`, in use or not. Attribute columns
    /// keep at least this many rows.
    pub fn physical_capacity(&self, primitive: PrimitiveType) -> usize {
        let k = primitive.dimension();
        let d = self.dim();
        if k == d {
            self.cells.physical()
        } else if k < d {
            self.slots[k].physical()
        } else {
            0
        }
    }

    pub fn is_active(&self, primitive: PrimitiveType, id: usize) -> bool {
        self.active_at(primitive.dimension(), id)
    }

    pub fn live_count(&self, primitive: PrimitiveType) -> usize {
        self.live_ids(primitive).count()
    }

    /// Live ids of `primitive`, ascending.
    pub fn live_ids(&self, primitive: PrimitiveType) -> impl Iterator<Item = usize> + '_ {
        let k = primitive.dimension();
        (0..self.len_of(k)).filter(move |&id| self.active_at(k, id))
    }

    /// Free-list contents for `primitive`.
    pub fn free_ids(&self, primitive: PrimitiveType) -> Vec<usize> {
        let k = primitive.dimension();
        let d = self.dim();
        if k == d {
            self.cells.free_ids()
        } else if k < d {
            self.slots[k].free_ids()
        } else {
            Vec::new()
        }
    }

    /// Vertex ids of a cell slot in stored (orientation) order; `None` past
    /// the capacity.
    pub fn cell_vertices(&self, cell: usize) -> Option<CellVertices> {
        (cell < self.cells.len()).then(|| self.vertices_of(cell))
    }

    /// Vertices of a cell the caller knows to exist; empty when out of range.
    pub(crate) fn vertices_of(&self, cell: usize) -> CellVertices {
        match self.cells.get(cell) {
            Some(row) => CellVertices {
                len: self.n as u8,
                ids: row.vertices,
            },
            None => CellVertices::EMPTY,
        }
    }

    /// Neighbor across the facet opposite local vertex `slot`.
    pub fn cell_neighbor(&self, cell: usize, slot: usize) -> Option<usize> {
        match self.cells.get(cell).and_then(|r| r.adjacency.get(slot).copied()) {
            Some(nb) if nb != BOUNDARY && slot < self.n => Some(nb),
            _ => None,
        }
    }

    /// Generation stamp of a cell slot; `None` past the capacity.
    pub fn cell_stamp(&self, cell: usize) -> Option<u64> {
        (cell < self.cells.len()).then(|| self.cell(cell).stamp)
    }

    /// Some live cell containing the simplex (cells anchor themselves).
    pub fn anchor(&self, primitive: PrimitiveType, id: usize) -> Option<usize> {
        let k = primitive.dimension();
        let d = self.dim();
        if k == d {
            return self.active_at(k, id).then_some(id);
        }
        match self.slots.get(k).and_then(|s| s.get(id)) {
            Some(r) if r.active && r.anchor != NO_CELL => Some(r.anchor),
            _ => None,
        }
    }

    /// Number of live cells containing the simplex.
    pub fn refcount(&self, primitive: PrimitiveType, id: usize) -> usize {
        let k = primitive.dimension();
        if k == self.dim() {
            return usize::from(self.is_active(primitive, id));
        }
        self.simplex_row(k, id).refcount as usize
    }

    #[inline]
    fn id_in_row(&self, row: &CellRow, cell: usize, k: usize, j: usize) -> usize {
        if k == 0 {
            row.vertices[j]
        } else if k == self.dim() {
            cell
        } else {
            row.simplices[self.offsets[k] + j]
        }
    }

    /// Id of local `k`-simplex `j` of `cell`.
    pub(crate) fn simplex_id(&self, cell: usize, k: usize, j: usize) -> usize {
        self.id_in_row(&self.cell(cell), cell, k, j)
    }

    /// Vertex set of local `k`-simplex `j` of `cell`.
    pub(crate) fn local_key(&self, cell: usize, k: usize, j: usize) -> SimplexKey {
        key_of(SimplexDart::get(self.kind), &self.cell(cell).vertices, k, j)
    }

    fn facet_key(&self, cell: usize, slot: usize) -> SimplexKey {
        facet_of(&self.cell(cell).vertices[..self.n], slot)
    }

    /// Local vertex of `cell` opposite the facet `key`.
    fn facet_slot(&self, cell: usize, key: &SimplexKey) -> Option<usize> {
        let row = self.cell(cell);
        let verts = &row.vertices[..self.n];
        let slot = verts.iter().position(|v| !key.contains(*v))?;
        (facet_of(verts, slot) == *key).then_some(slot)
    }

    fn registered(&self, k: usize, key: &SimplexKey) -> Option<usize> {
        self.registries.get(k - 1)?.get(key).map(|id| *id)
    }

    /// Id of the live simplex with vertex set `key`.
    pub fn find_simplex(&self, key: &SimplexKey) -> Option<usize> {
        let k = key.len().checked_sub(1)?;
        let d = self.dim();
        let first = *key.vertices().first()?;
        if k == 0 {
            return self.is_active(PrimitiveType::Vertex, first).then_some(first);
        }
        if k < d {
            return self.registered(k, key);
        }
        if k == d {
            let seed = self.anchor(PrimitiveType::Vertex, first)?;
            return self
                .star(seed, &[first])
                .into_iter()
                .find(|&c| SimplexKey::new(&self.vertices_of(c)) == *key);
        }
        None
    }

    /// Cells containing `simplex`, reached from `seed` across facets that
    /// contain it. `seed` must contain `simplex`. Sorted ascending.
    pub fn star(&self, seed: usize, simplex: &[usize]) -> Vec<usize> {
        let n = self.n;
        let mut seen = HashSet::new();
        seen.insert(seed);
        let mut stack = vec![seed];
        let mut out = Vec::new();
        while let Some(c) = stack.pop() {
            out.push(c);
            let row = self.cell(c);
            for i in 0..n {
                if simplex.contains(&row.vertices[i]) {
                    continue;
                }
                let nb = row.adjacency[i];
                if nb != BOUNDARY && seen.insert(nb) {
                    stack.push(nb);
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Star of the live simplex with vertex set `key`.
    pub fn star_of(&self, key: &SimplexKey) -> Vec<usize> {
        let Some(primitive) = key.primitive() else {
            return Vec::new();
        };
        let seed = self
            .find_simplex(key)
            .and_then(|id| self.anchor(primitive, id));
        match seed {
            Some(seed) => self.star(seed, key.vertices()),
            None => Vec::new(),
        }
    }

    /// Vertices sharing a cell with `v`, ascending.
    pub fn one_ring(&self, v: usize) -> Vec<usize> {
        let mut ring: Vec<usize> = self
            .star_of(&SimplexKey::new(&[v]))
            .into_iter()
            .flat_map(|c| self.vertices_of(c))
            .filter(|&w| w != v)
            .collect();
        ring.sort_unstable();
        ring.dedup();
        ring
    }

    /// True if the simplex lies in a boundary facet.
    pub fn is_boundary_simplex(&self, key: &SimplexKey) -> bool {
        self.star_of(key).into_iter().any(|c| {
            let row = self.cell(c);
            (0..self.n).any(|i| !key.contains(row.vertices[i]) && row.adjacency[i] == BOUNDARY)
        })
    }

    // ---------------------------------------------------------------------
    // tuple navigation
    // ---------------------------------------------------------------------

    /// Live cell, matching stamp, consistent local indices.
    pub fn is_valid(&self, t: &Tuple) -> bool {
        self.cells
            .get(t.cell())
            .is_some_and(|row| row.active && row.stamp == t.generation())
            && t.dart(self.kind).is_some()
    }

    fn dart_of(&self, t: &Tuple) -> Result<DartIndex, MeshDartError> {
        if !self.is_valid(t) {
            return Err(MeshDartError::InvalidTuple);
        }
        t.dart(self.kind).ok_or(MeshDartError::InvalidTuple)
    }

    fn check_primitive(&self, primitive: PrimitiveType) -> Result<usize, MeshDartError> {
        if self.kind.contains(primitive) {
            Ok(primitive.dimension())
        } else {
            Err(MeshDartError::UnsupportedPrimitive {
                primitive,
                kind: self.kind,
            })
        }
    }

    /// Global id of the tuple's `primitive`-simplex.
    pub fn tuple_id(&self, t: &Tuple, primitive: PrimitiveType) -> Result<usize, MeshDartError> {
        let k = self.check_primitive(primitive)?;
        let dart = self.dart_of(t)?;
        let j = SimplexDart::get(self.kind).local_simplex(dart, k);
        Ok(self.simplex_id(t.cell(), k, j))
    }

    /// Vertex set of the tuple's `primitive`-simplex.
    pub fn tuple_key(&self, t: &Tuple, primitive: PrimitiveType) -> Result<SimplexKey, MeshDartError> {
        let k = self.check_primitive(primitive)?;
        let dart = self.dart_of(t)?;
        let j = SimplexDart::get(self.kind).local_simplex(dart, k);
        Ok(self.local_key(t.cell(), k, j))
    }

    pub fn is_ccw(&self, t: &Tuple) -> Result<bool, MeshDartError> {
        let dart = self.dart_of(t)?;
        Ok(SimplexDart::get(self.kind).is_ccw(dart))
    }

    /// Switch the tuple's `primitive`, crossing into the neighboring cell when
    /// `primitive` is the cell dimension.
    pub fn switch(&self, t: &Tuple, primitive: PrimitiveType) -> Result<Tuple, MeshDartError> {
        let k = self.check_primitive(primitive)?;
        let dart = self.dart_of(t)?;
        let table = SimplexDart::get(self.kind);
        let d = self.dim();
        if k < d {
            let next = table.switch(dart, k).ok_or(MeshDartError::InvalidTuple)?;
            return Ok(Tuple::from_dart(table, next, t.cell(), t.generation()));
        }

        let cell = t.cell();
        let row = self.cell(cell);
        let perm = table.permutation(dart);
        let nb = row.adjacency[table.opposite_vertex(dart)];
        if nb == BOUNDARY {
            return Err(MeshDartError::NoSuchNeighbor { cell, primitive });
        }
        let nb_row = self.cell(nb);
        let nb_verts = &nb_row.vertices[..self.n];
        let mut q = [0u8; 4];
        let mut used = [false; 4];
        for pos in 0..d {
            let global = row.vertices[perm[pos] as usize];
            let local = nb_verts
                .iter()
                .position(|&x| x == global)
                .ok_or(MeshDartError::InvalidTuple)?;
            q[pos] = local as u8;
            used[local] = true;
        }
        let last = (0..self.n)
            .find(|&i| !used[i])
            .ok_or(MeshDartError::InvalidTuple)?;
        q[d] = last as u8;
        let next = table
            .index_of(&q[..self.n])
            .ok_or(MeshDartError::InvalidTuple)?;
        Ok(Tuple::from_dart(table, next, nb, nb_row.stamp))
    }

    /// Canonical tuple of a live simplex, taken in its anchor cell.
    pub fn tuple_from_id(&self, primitive: PrimitiveType, id: usize) -> Result<Tuple, MeshDartError> {
        let k = self.check_primitive(primitive)?;
        let inactive = MeshDartError::InactiveSimplex { primitive, id };
        let cell = self.anchor(primitive, id).ok_or(inactive.clone())?;
        let row = self.cell(cell);
        let table = SimplexDart::get(self.kind);
        let j = (0..table.simplex_count(k))
            .find(|&j| self.id_in_row(&row, cell, k, j) == id)
            .ok_or(inactive.clone())?;
        let dart = table.canonical(k, j).ok_or(inactive)?;
        Ok(Tuple::from_dart(table, dart, cell, row.stamp))
    }

    /// Tuple in `cell` whose vertex is `first` and, if given, whose edge ends at `second`.
    pub(crate) fn tuple_on(&self, cell: usize, first: usize, second: Option<usize>) -> Option<Tuple> {
        let row = self.cells.get(cell).filter(|r| r.active)?;
        let table = SimplexDart::get(self.kind);
        (0..table.size() as DartIndex)
            .find(|&dart| {
                let p = table.permutation(dart);
                row.vertices[p[0] as usize] == first
                    && second.is_none_or(|s| p.len() > 1 && row.vertices[p[1] as usize] == s)
            })
            .map(|dart| Tuple::from_dart(table, dart, cell, row.stamp))
    }

    /// Tuple whose simplex of `key`'s dimension is exactly `key`, with the
    /// tuple's vertex at `key`'s smallest id.
    pub fn tuple_of_key(&self, key: &SimplexKey) -> Option<Tuple> {
        let primitive = key.primitive()?;
        let id = self.find_simplex(key)?;
        let cell = self.anchor(primitive, id)?;
        let row = self.cell(cell);
        let table = SimplexDart::get(self.kind);
        let first = *key.vertices().first()?;
        (0..table.size() as DartIndex)
            .find(|&dart| {
                let p = table.permutation(dart);
                row.vertices[p[0] as usize] == first
                    && p[..key.len()].iter().all(|&l| key.contains(row.vertices[l as usize]))
            })
            .map(|dart| Tuple::from_dart(table, dart, cell, row.stamp))
    }

    // ---------------------------------------------------------------------
    // growth and undo
    // ---------------------------------------------------------------------

    /// Make sure every dimension can hand out `additional` more ids without
    /// growing. Grows by at least half the current size to keep growth rare.
    pub(crate) fn reserve(&mut self, additional: usize) {
        let spare = self.cells.spare();
        if spare < additional {
            let physical = self.cells.physical();
            self.cells.grow(physical + (additional - spare).max(physical / 2));
        }
        for s in &mut self.slots {
            let spare = s.spare();
            if spare < additional {
                let physical = s.physical();
                s.grow(physical + (additional - spare).max(physical / 2));
            }
        }
    }

    /// Keep the edit: ids it freed go to their free lists.
    pub(crate) fn commit(&self, log: EditLog) {
        for (dim, id) in log.released {
            self.allocator(dim).lock().free.push(id);
        }
    }

    /// Undo every write recorded in `log`, newest first.
    pub(crate) fn undo(&self, log: EditLog) {
        for entry in log.entries.into_iter().rev() {
            match entry {
                Undo::Cell { cell, row } => {
                    self.cells.set(cell, row);
                }
                Undo::Simplex { dim, id, row } => {
                    self.slots[dim].set(id, row);
                }
                Undo::Reused { dim, id } => self.allocator(dim).lock().free.push(id),
                Undo::Appended { dim, id } => {
                    let mut a = self.allocator(dim).lock();
                    if a.len == id + 1 {
                        a.len = id;
                    } else {
                        // a later edit appended past us and is still live
                        a.free.push(id);
                    }
                }
                Undo::RegistryInserted { dim, key } => {
                    self.registries[dim - 1].remove(&key);
                }
                Undo::RegistryRemoved { dim, key, id } => {
                    self.registries[dim - 1].insert(key, id);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // primitive writes (all logged)
    // ---------------------------------------------------------------------

    fn set_simplex_row(&self, log: &mut EditLog, k: usize, id: usize, row: SimplexRow) {
        if let Some(old) = self.slots[k].set(id, row) {
            log.push(Undo::Simplex { dim: k, id, row: old });
        }
    }

    fn alloc_simplex(&self, log: &mut EditLog, k: usize) -> Result<usize, EditFailure> {
        let (id, reused) = self.slots[k].take().ok_or(EditFailure::OutOfSlots(k))?;
        log.push(if reused {
            Undo::Reused { dim: k, id }
        } else {
            Undo::Appended { dim: k, id }
        });
        self.set_simplex_row(
            log,
            k,
            id,
            SimplexRow {
                active: true,
                anchor: NO_CELL,
                refcount: 0,
            },
        );
        Ok(id)
    }

    fn release_simplex(&self, log: &mut EditLog, k: usize, id: usize) {
        self.set_simplex_row(log, k, id, SimplexRow::EMPTY);
        log.released.push((k, id));
    }

    fn retain(&self, log: &mut EditLog, k: usize, id: usize, cell: usize) {
        let rc = self.simplex_row(k, id).refcount;
        self.set_simplex_row(
            log,
            k,
            id,
            SimplexRow {
                active: true,
                anchor: cell,
                refcount: rc + 1,
            },
        );
    }

    /// Drop one reference; returns the remaining count.
    fn release_ref(&self, log: &mut EditLog, k: usize, id: usize) -> u32 {
        let mut row = self.simplex_row(k, id);
        row.refcount = row.refcount.saturating_sub(1);
        self.set_simplex_row(log, k, id, row);
        row.refcount
    }

    fn registry_insert(&self, log: &mut EditLog, k: usize, key: SimplexKey, id: usize) {
        self.registries[k - 1].insert(key, id);
        log.push(Undo::RegistryInserted { dim: k, key });
    }

    fn registry_remove(&self, log: &mut EditLog, k: usize, key: &SimplexKey) {
        if let Some((key, id)) = self.registries[k - 1].remove(key) {
            log.push(Undo::RegistryRemoved { dim: k, key, id });
        }
    }

    fn alloc_cell(&self, log: &mut EditLog) -> Result<usize, EditFailure> {
        let d = self.dim();
        let (c, reused) = self.cells.take().ok_or(EditFailure::OutOfSlots(d))?;
        log.push(if reused {
            Undo::Reused { dim: d, id: c }
        } else {
            Undo::Appended { dim: d, id: c }
        });
        Ok(c)
    }

    /// Store a finished row under a fresh stamp.
    fn write_cell(&self, log: &mut EditLog, cell: usize, mut row: CellRow) {
        row.active = true;
        row.stamp = self.next_stamp.fetch_add(1, Ordering::AcqRel);
        if let Some(old) = self.cells.set(cell, row) {
            log.push(Undo::Cell { cell, row: old });
        }
    }

    fn update_cell(&self, log: &mut EditLog, cell: usize, f: impl FnOnce(&mut CellRow)) {
        let Some(slot) = self.cells.rows.get(cell) else {
            return;
        };
        let mut row = slot.lock();
        log.push(Undo::Cell { cell, row: *row });
        f(&mut *row);
    }

    fn release_cell(&self, log: &mut EditLog, cell: usize) {
        self.update_cell(log, cell, |row| row.active = false);
        log.released.push((self.dim(), cell));
    }

    fn set_adjacency(&self, log: &mut EditLog, cell: usize, slot: usize, neighbor: usize) {
        self.update_cell(log, cell, |row| row.adjacency[slot] = neighbor);
    }

    // ---------------------------------------------------------------------
    // structural edits
    // ---------------------------------------------------------------------

    /// Allocate a vertex with no incident cells.
    pub(crate) fn alloc_vertex(&self, log: &mut EditLog) -> Result<usize, EditFailure> {
        self.alloc_simplex(log, 0)
    }

    /// Replace `removed` cells by `added` vertex lists and release the
    /// `retired` vertices, which must end up with no incident cells.
    ///
    /// New cells are registered before the removed ones are released, so edges
    /// and faces present on both sides keep their ids. Adjacency is rebuilt by
    /// matching facets among the new cells and the outside neighbors of the
    /// removed ones. On error the log holds every write made so far.
    pub(crate) fn replace_cells(
        &self,
        log: &mut EditLog,
        removed: &[usize],
        added: &[Vec<usize>],
        retired: &[usize],
    ) -> Result<CellEdit, EditFailure> {
        let n = self.n;
        let d = self.dim();
        let table = SimplexDart::get(self.kind);
        let removed_set: HashSet<usize> = removed.iter().copied().collect();

        let mut external: HashMap<SimplexKey, (usize, usize)> = HashMap::new();
        let mut candidates: Vec<usize> = Vec::new();
        for &r in removed {
            let row = self.cell(r);
            for i in 0..n {
                let nb = row.adjacency[i];
                if nb == BOUNDARY || removed_set.contains(&nb) {
                    continue;
                }
                let key = facet_of(&row.vertices[..n], i);
                if let Some(slot) = self.facet_slot(nb, &key) {
                    external.insert(key, (nb, slot));
                    candidates.push(nb);
                }
            }
        }

        let mut edit = CellEdit {
            added: Vec::with_capacity(added.len()),
            allocated: vec![Vec::new(); d + 1],
        };
        for verts in added {
            let c = self.alloc_cell(log)?;
            let mut row = CellRow::EMPTY;
            row.vertices[..n].copy_from_slice(verts);
            for &v in verts {
                self.retain(log, 0, v, c);
            }
            for k in 1..d {
                for j in 0..table.simplex_count(k) {
                    let key = key_of(table, verts, k, j);
                    let id = match self.registered(k, &key) {
                        Some(id) => id,
                        None => {
                            let id = self.alloc_simplex(log, k)?;
                            self.registry_insert(log, k, key, id);
                            edit.allocated[k].push(id);
                            id
                        }
                    };
                    self.retain(log, k, id, c);
                    row.simplices[self.offsets[k] + j] = id;
                }
            }
            self.write_cell(log, c, row);
            edit.added.push(c);
            edit.allocated[d].push(c);
        }

        let mut touched: Vec<(usize, usize, SimplexKey)> = Vec::new();
        for &r in removed {
            let row = self.cell(r);
            for k in 0..d {
                for j in 0..table.simplex_count(k) {
                    let id = self.id_in_row(&row, r, k, j);
                    let key = key_of(table, &row.vertices, k, j);
                    if self.release_ref(log, k, id) == 0 && k > 0 {
                        self.registry_remove(log, k, &key);
                        self.release_simplex(log, k, id);
                    } else {
                        touched.push((k, id, key));
                    }
                }
            }
            self.release_cell(log, r);
        }

        let mut open: HashMap<SimplexKey, Vec<(usize, usize)>> = HashMap::new();
        for &c in &edit.added {
            for i in 0..n {
                open.entry(self.facet_key(c, i)).or_default().push((c, i));
            }
        }
        for (key, sides) in &open {
            match (sides.as_slice(), external.get(key).copied()) {
                ([(a, i), (b, j)], None) => {
                    self.set_adjacency(log, *a, *i, *b);
                    self.set_adjacency(log, *b, *j, *a);
                }
                ([(a, i)], Some((e, j))) => {
                    self.set_adjacency(log, *a, *i, e);
                    self.set_adjacency(log, e, j, *a);
                }
                ([(a, i)], None) => self.set_adjacency(log, *a, *i, BOUNDARY),
                _ => return Err(EditFailure::NonManifold(*key)),
            }
            if d >= 2 {
                if let Some(id) = self.registered(d - 1, key) {
                    if self.simplex_row(d - 1, id).refcount > 2 {
                        return Err(EditFailure::NonManifold(*key));
                    }
                }
            }
        }
        for (key, &(e, j)) in &external {
            if !open.contains_key(key) {
                self.set_adjacency(log, e, j, BOUNDARY);
            }
        }

        for &(k, id, _) in &touched {
            if k == 0 && self.simplex_row(0, id).refcount == 0 && !retired.contains(&id) {
                return Err(EditFailure::Orphaned(id));
            }
        }
        for &v in retired {
            if self.simplex_row(0, v).refcount != 0 {
                return Err(EditFailure::StillReferenced(v));
            }
            self.release_simplex(log, 0, v);
        }

        candidates.extend(edit.added.iter().copied());
        let holds = |c: usize, key: &SimplexKey| {
            let row = self.cell(c);
            row.active && SimplexKey::new(&row.vertices[..n]).contains_all(key.vertices())
        };
        for (k, id, key) in touched {
            let s = self.simplex_row(k, id);
            if !s.active || s.refcount == 0 {
                continue;
            }
            if s.anchor != NO_CELL && self.cell(s.anchor).active {
                continue;
            }
            let found = candidates
                .iter()
                .copied()
                .find(|&c| holds(c, &key))
                .or_else(|| {
                    log::warn!("anchor repair for {key:?} fell back to a full cell scan");
                    (0..self.cells.len()).find(|&c| holds(c, &key))
                });
            if let Some(c) = found {
                self.set_simplex_row(log, k, id, SimplexRow { anchor: c, ..s });
            }
        }

        Ok(edit)
    }

    /// Compact every dimension to `[0, live_count)` and restamp all cells.
    pub(crate) fn consolidate(&mut self) -> ConsolidateMap {
        let d = self.dim();
        let n = self.n;
        let table = SimplexDart::get(self.kind);
        let cells = self.cells.snapshot();
        let slots: Vec<Vec<SimplexRow>> = self.slots.iter().map(SlotTable::snapshot).collect();

        let mut map = ConsolidateMap::default();
        for k in 0..=d {
            let active: Vec<bool> = if k == d {
                cells.iter().map(|r| r.active).collect()
            } else {
                slots[k].iter().map(|r| r.active).collect()
            };
            let new_to_old: Vec<usize> = (0..active.len()).filter(|&i| active[i]).collect();
            let mut old_to_new = vec![None; active.len()];
            for (new, &old) in new_to_old.iter().enumerate() {
                old_to_new[old] = Some(new);
            }
            map.old_to_new.push(old_to_new);
            map.new_to_old.push(new_to_old);
        }

        let mut stamp = *self.next_stamp.get_mut();
        let rows: Vec<CellRow> = map.new_to_old[d]
            .iter()
            .map(|&old| {
                let r = cells[old];
                let mut row = CellRow::EMPTY;
                for i in 0..n {
                    row.vertices[i] = remap(&map.old_to_new[0], r.vertices[i]);
                    row.adjacency[i] = match r.adjacency[i] {
                        BOUNDARY => BOUNDARY,
                        nb => remap(&map.old_to_new[d], nb),
                    };
                }
                for k in 1..d {
                    for j in 0..table.simplex_count(k) {
                        let o = self.offsets[k] + j;
                        row.simplices[o] = remap(&map.old_to_new[k], r.simplices[o]);
                    }
                }
                row.active = true;
                row.stamp = stamp;
                stamp += 1;
                row
            })
            .collect();
        *self.next_stamp.get_mut() = stamp;
        let count = rows.len();
        self.cells = SlotTable::from_rows(rows);

        for k in 0..d {
            let kept: Vec<SimplexRow> = map.new_to_old[k]
                .iter()
                .map(|&o| {
                    let s = slots[k][o];
                    SimplexRow {
                        active: true,
                        anchor: match s.anchor {
                            NO_CELL => NO_CELL,
                            a => remap(&map.old_to_new[d], a),
                        },
                        refcount: s.refcount,
                    }
                })
                .collect();
            self.slots[k] = SlotTable::from_rows(kept);
        }

        for k in 1..d {
            let registry = DashMap::with_capacity(map.new_to_old[k].len());
            for c in 0..count {
                for j in 0..table.simplex_count(k) {
                    registry.insert(self.local_key(c, k, j), self.simplex_id(c, k, j));
                }
            }
            self.registries[k - 1] = registry;
        }
        map
    }
}

/// Vertex set of local `k`-simplex `j` of a cell with vertices `verts`.
fn key_of(table: &SimplexDart, verts: &[usize], k: usize, j: usize) -> SimplexKey {
    let locals = table.simplex_vertices(k, j);
    let mut ids = [0usize; 4];
    for (i, &l) in locals.iter().enumerate() {
        ids[i] = verts[l as usize];
    }
    SimplexKey::new(&ids[..locals.len()])
}

/// Facet of a cell opposite local vertex `slot`.
fn facet_of(verts: &[usize], slot: usize) -> SimplexKey {
    let mut ids = [0usize; 4];
    let mut len = 0;
    for (i, &v) in verts.iter().enumerate() {
        if i != slot {
            ids[len] = v;
            len += 1;
        }
    }
    SimplexKey::new(&ids[..len])
}

fn check_free(alloc: &Allocator, active: &[bool], what: &str) -> Result<(), MeshDartError> {
    let mut seen = vec![false; active.len()];
    for &id in &alloc.free {
        if id >= active.len() || active[id] || seen[id] {
            return Err(MeshDartError::InvariantsViolated(format!(
                "{what} free list holds {id}, which is live, duplicated or out of range"
            )));
        }
        seen[id] = true;
    }
    let dead = active.iter().filter(|a| !**a).count();
    if dead != alloc.free.len() {
        return Err(MeshDartError::InvariantsViolated(format!(
            "{what} free list has {} ids but {dead} slots are dead",
            alloc.free.len()
        )));
    }
    Ok(())
}

impl DebugInvariants for Connectivity {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "connectivity");
    }

    fn validate_invariants(&self) -> Result<(), MeshDartError> {
        let fail = |msg: String| Err(MeshDartError::InvariantsViolated(msg));
        let n = self.n;
        let d = self.dim();
        let cells = self.cells.snapshot();
        let slots: Vec<Vec<SimplexRow>> = self.slots.iter().map(SlotTable::snapshot).collect();
        let cell_active: Vec<bool> = cells.iter().map(|r| r.active).collect();
        check_free(&self.cells.alloc.lock(), &cell_active, "cell")?;
        for (k, s) in self.slots.iter().enumerate() {
            let active: Vec<bool> = slots[k].iter().map(|r| r.active).collect();
            check_free(&s.alloc.lock(), &active, PrimitiveType::ALL[k].as_str())?;
        }

        let table = SimplexDart::get(self.kind);
        let mut counts: Vec<Vec<u32>> = slots.iter().map(|s| vec![0; s.len()]).collect();
        let live = |k: usize, id: usize| -> bool {
            if k == d {
                cells.get(id).is_some_and(|r| r.active)
            } else {
                slots[k].get(id).is_some_and(|r| r.active)
            }
        };
        for (c, row) in cells.iter().enumerate() {
            if !row.active {
                continue;
            }
            let verts = &row.vertices[..n];
            let key = SimplexKey::new(verts);
            if key.vertices().windows(2).any(|w| w[0] == w[1]) {
                return fail(format!("cell {c} repeats a vertex"));
            }
            if d == 0 && verts[0] != c {
                return fail(format!("point {c} stores vertex {}", verts[0]));
            }
            for k in 0..d {
                for j in 0..table.simplex_count(k) {
                    let id = self.id_in_row(row, c, k, j);
                    if !live(k, id) {
                        return fail(format!("cell {c} references dead {k}-simplex {id}"));
                    }
                    counts[k][id] += 1;
                    if k > 0 && self.registered(k, &key_of(table, verts, k, j)) != Some(id) {
                        return fail(format!("registry disagrees with cell {c} on {k}-simplex {id}"));
                    }
                }
            }
            for i in 0..n {
                let nb = row.adjacency[i];
                if nb == BOUNDARY {
                    continue;
                }
                if !live(d, nb) {
                    return fail(format!("cell {c} is adjacent to dead cell {nb}"));
                }
                let facet = facet_of(verts, i);
                match self.facet_slot(nb, &facet) {
                    Some(j) if cells[nb].adjacency[j] == c => {}
                    _ => return fail(format!("adjacency {c} -> {nb} is not symmetric")),
                }
            }
        }
        for (k, rows) in slots.iter().enumerate() {
            for (id, s) in rows.iter().enumerate() {
                if !s.active {
                    continue;
                }
                if counts[k][id] != s.refcount {
                    return fail(format!(
                        "{k}-simplex {id} has refcount {} but {} cells",
                        s.refcount, counts[k][id]
                    ));
                }
                if s.refcount > 0 {
                    let holds = live(d, s.anchor)
                        && (0..table.simplex_count(k)).any(|j| self.id_in_row(&cells[s.anchor], s.anchor, k, j) == id);
                    if !holds {
                        return fail(format!("{k}-simplex {id} has a stale anchor"));
                    }
                }
            }
        }
        for (t, registry) in self.registries.iter().enumerate() {
            let live = slots[t + 1].iter().filter(|r| r.active).count();
            if registry.len() != live {
                return fail(format!(
                    "registry for dimension {} has {} entries, {live} live",
                    t + 1,
                    registry.len()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Connectivity: Send, Sync, Clone);

    fn square() -> Connectivity {
        // 3---2
        // | \ |
        // 0---1
        Connectivity::from_cells(MeshKind::Triangle, 4, &[[0, 1, 3], [1, 2, 3]]).unwrap()
    }

    #[test]
    fn builds_adjacency_and_registry() {
        let c = square();
        assert_eq!(c.live_count(PrimitiveType::Vertex), 4);
        assert_eq!(c.live_count(PrimitiveType::Edge), 5);
        assert_eq!(c.live_count(PrimitiveType::Face), 2);
        // facet opposite vertex 0 of cell 0 is {1,3}
        assert_eq!(c.cell_neighbor(0, 0), Some(1));
        assert_eq!(c.cell_neighbor(1, 1), Some(0));
        assert_eq!(c.cell_neighbor(0, 1), None);
        c.validate_invariants().unwrap();
    }

    #[test]
    fn rejects_bad_input() {
        let arity = Connectivity::from_cells(MeshKind::Triangle, 3, &[vec![0, 1]]);
        assert!(matches!(arity, Err(MeshDartError::CellArity { .. })));
        let range = Connectivity::from_cells(MeshKind::Triangle, 3, &[[0, 1, 5]]);
        assert!(matches!(range, Err(MeshDartError::InvalidVertexId { vertex: 5, .. })));
        let degenerate = Connectivity::from_cells(MeshKind::Triangle, 3, &[[0, 1, 1]]);
        assert!(matches!(degenerate, Err(MeshDartError::DegenerateCell { cell: 0 })));
        let fan = Connectivity::from_cells(MeshKind::Triangle, 5, &[[0, 1, 2], [1, 0, 3], [0, 1, 4]]);
        assert_eq!(
            fan.unwrap_err(),
            MeshDartError::NonManifoldFacet { facet: vec![0, 1] }
        );
    }

    #[test]
    fn out_of_range_queries_return_none() {
        let c = square();
        assert_eq!(c.cell_vertices(7), None);
        assert_eq!(c.cell_stamp(7), None);
        assert_eq!(c.cell_neighbor(7, 0), None);
        assert_eq!(c.cell_vertices(1).as_deref(), Some(&[1, 2, 3][..]));
        assert!(c.cell_stamp(1).is_some());
    }

    #[test]
    fn replace_keeps_shared_edge_ids_and_fills_free_lists() {
        let mut c = square();
        c.reserve(8);
        let diag = c.find_simplex(&SimplexKey::new(&[1, 3])).unwrap();
        let outer = c.find_simplex(&SimplexKey::new(&[0, 1])).unwrap();
        let mut log = EditLog::default();
        let edit = c
            .replace_cells(&mut log, &[0, 1], &[vec![0, 1, 2], vec![0, 2, 3]], &[])
            .unwrap();
        assert!(c.free_ids(PrimitiveType::Face).is_empty());
        c.commit(log);
        assert_eq!(edit.added, vec![2, 3]);
        assert_eq!(c.find_simplex(&SimplexKey::new(&[0, 1])), Some(outer));
        assert_eq!(c.find_simplex(&SimplexKey::new(&[1, 3])), None);
        assert!(c.free_ids(PrimitiveType::Edge).contains(&diag));
        assert_eq!(c.free_ids(PrimitiveType::Face), vec![0, 1]);
        c.validate_invariants().unwrap();
    }

    #[test]
    fn rollback_restores_exact_state() {
        let mut c = square();
        c.reserve(8);
        let before = c.clone();
        let mut log = EditLog::default();
        let w = c.alloc_vertex(&mut log).unwrap();
        c.replace_cells(&mut log, &[0], &[vec![0, 1, w], vec![0, w, 3]], &[])
            .unwrap();
        assert_ne!(c, before);
        c.undo(log);
        assert_eq!(c, before);
        c.validate_invariants().unwrap();
    }

    #[test]
    fn full_tables_report_out_of_slots() {
        let c = square();
        let mut log = EditLog::default();
        // built tables have no spare slot
        assert_eq!(c.alloc_vertex(&mut log), Err(EditFailure::OutOfSlots(0)));
        let err = c
            .replace_cells(&mut log, &[0], &[vec![0, 1, 2]], &[])
            .unwrap_err();
        assert_eq!(err, EditFailure::OutOfSlots(2));
        c.undo(log);
        assert_eq!(c, square());
    }

    #[test]
    fn interleaved_logs_undo_independently() {
        // two strips sharing nothing; edits on both, the first one undone
        let mut c = Connectivity::from_cells(
            MeshKind::Triangle,
            8,
            &[[0, 1, 3], [1, 2, 3], [4, 5, 7], [5, 6, 7]],
        )
        .unwrap();
        c.reserve(8);
        let mut left = EditLog::default();
        let mut right = EditLog::default();
        let a = c.alloc_vertex(&mut left).unwrap();
        let b = c.alloc_vertex(&mut right).unwrap();
        c.replace_cells(&mut left, &[0], &[vec![0, 1, a], vec![0, a, 3], vec![a, 1, 3]], &[])
            .unwrap();
        c.replace_cells(&mut right, &[2], &[vec![4, 5, b], vec![4, b, 7], vec![b, 5, 7]], &[])
            .unwrap();
        c.undo(left);
        c.commit(right);
        c.validate_invariants().unwrap();
        assert!(!c.is_active(PrimitiveType::Vertex, a));
        assert!(c.is_active(PrimitiveType::Vertex, b));
        assert_eq!(c.one_ring(b), vec![4, 5, 7]);
        assert!(c.free_ids(PrimitiveType::Vertex).contains(&a));
    }

    #[test]
    fn freed_ids_stay_private_until_commit() {
        let mut c = square();
        c.reserve(8);
        let mut first = EditLog::default();
        c.replace_cells(&mut first, &[0, 1], &[vec![0, 1, 2], vec![0, 2, 3]], &[])
            .unwrap();
        // a second edit cannot take the cells the first one freed
        let mut second = EditLog::default();
        assert_eq!(c.alloc_cell(&mut second), Ok(4));
        c.undo(second);
        c.undo(first);
        assert_eq!(c, {
            let mut fresh = square();
            fresh.reserve(8);
            fresh
        });
        c.validate_invariants().unwrap();
    }

    #[test]
    fn orphaned_vertices_are_rejected() {
        let c = square();
        let mut log = EditLog::default();
        let err = c.replace_cells(&mut log, &[0], &[], &[]).unwrap_err();
        assert_eq!(err, EditFailure::Orphaned(0));
        c.undo(log);
        c.validate_invariants().unwrap();
    }

    #[test]
    fn consolidate_compacts_and_restamps() {
        let mut c = square();
        c.reserve(8);
        let mut log = EditLog::default();
        c.replace_cells(&mut log, &[0, 1], &[vec![0, 1, 2], vec![0, 2, 3]], &[])
            .unwrap();
        c.commit(log);
        let stamps: Vec<u64> = (2..4).filter_map(|cell| c.cell_stamp(cell)).collect();
        let map = c.consolidate();
        assert_eq!(map.new_id(PrimitiveType::Face, 2), Some(0));
        assert_eq!(map.new_id(PrimitiveType::Face, 0), None);
        assert_eq!(c.capacity(PrimitiveType::Face), 2);
        assert!(c.free_ids(PrimitiveType::Edge).is_empty());
        let first = c.cell_stamp(0).unwrap();
        assert!(stamps.iter().all(|s| *s < first));
        c.validate_invariants().unwrap();
        let again = c.consolidate();
        assert!(again.is_identity());
    }

    #[test]
    fn tet_faces_are_registered_once() {
        let c = Connectivity::from_cells(MeshKind::Tetrahedron, 5, &[[0, 1, 2, 3], [1, 0, 2, 4]]).unwrap();
        assert_eq!(c.live_count(PrimitiveType::Edge), 9);
        assert_eq!(c.live_count(PrimitiveType::Face), 7);
        let shared = c.find_simplex(&SimplexKey::new(&[0, 1, 2])).unwrap();
        assert_eq!(c.refcount(PrimitiveType::Face, shared), 2);
        c.validate_invariants().unwrap();
    }

    #[test]
    fn point_tables_hold_one_cell_per_vertex() {
        let c = Connectivity::from_cells(MeshKind::Point, 3, &[[0], [2]]).unwrap();
        assert_eq!(c.live_count(PrimitiveType::Vertex), 3);
        assert_eq!(c.cell_vertices(1).as_deref(), Some(&[1][..]));
        assert!(c.one_ring(1).is_empty());
        assert_eq!(c.find_simplex(&SimplexKey::new(&[2])), Some(2));
        c.validate_invariants().unwrap();
    }
}
