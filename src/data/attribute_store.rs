//! Named, typed attribute columns per primitive type.

use core::fmt::{Debug, Formatter};
use core::marker::PhantomData;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::data::column::Column;
use crate::data::scalar::{AttributeScalar, ScalarType, TaggedColumn};
use crate::mesh_error::MeshDartError;
use crate::topology::connectivity::ConsolidateMap;
use crate::topology::primitive::PrimitiveType;

/// Identifies one registered column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeHandle {
    name: String,
    primitive: PrimitiveType,
    scalar: ScalarType,
    stride: usize,
    index: usize,
}

impl AttributeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primitive(&self) -> PrimitiveType {
        self.primitive
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Typed view; `None` if `T` is not the stored scalar type.
    pub fn typed<T: AttributeScalar>(&self) -> Option<TypedHandle<T>> {
        (self.scalar == T::SCALAR_TYPE).then(|| TypedHandle {
            handle: self.clone(),
            _marker: PhantomData,
        })
    }
}

/// Handle whose scalar type is fixed at compile time.
pub struct TypedHandle<T> {
    handle: AttributeHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedHandle<T> {
    pub fn untyped(&self) -> &AttributeHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn primitive(&self) -> PrimitiveType {
        self.handle.primitive
    }

    pub fn stride(&self) -> usize {
        self.handle.stride
    }
}

impl<T> Clone for TypedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for TypedHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<T> Eq for TypedHandle<T> {}

impl<T> Debug for TypedHandle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("TypedHandle").field(&self.handle).finish()
    }
}

#[derive(Clone, Debug)]
struct StoredAttribute {
    handle: AttributeHandle,
    column: TaggedColumn,
}

/// Previous contents of rows written by one operation, oldest first.
#[derive(Debug, Default)]
pub(crate) struct RowLog {
    /// `(attribute index, row, previous bits)`.
    entries: Vec<(usize, usize, Vec<u64>)>,
}

/// All attribute columns of one mesh, in registration order.
#[derive(Clone, Debug, Default)]
pub struct AttributeStore {
    attributes: Vec<StoredAttribute>,
    by_name: HashMap<(PrimitiveType, String), usize>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` on `primitive` with `default` as the initial row of
    /// every slot. Registering the same name, type and stride again returns
    /// the existing handle.
    pub fn register<T: AttributeScalar>(
        &mut self,
        name: &str,
        primitive: PrimitiveType,
        default: &[T],
        capacity: usize,
    ) -> Result<TypedHandle<T>, MeshDartError> {
        let stride = default.len();
        if stride == 0 {
            return Err(MeshDartError::InvalidConfig(format!(
                "attribute `{name}` needs a non-empty default row"
            )));
        }
        if let Some(&index) = self.by_name.get(&(primitive, name.to_string())) {
            let existing = &self.attributes[index].handle;
            if existing.scalar == T::SCALAR_TYPE && existing.stride == stride {
                return existing.typed().ok_or(MeshDartError::AttributeConflict {
                    name: name.to_string(),
                    primitive,
                });
            }
            return Err(MeshDartError::AttributeConflict {
                name: name.to_string(),
                primitive,
            });
        }
        let index = self.attributes.len();
        let handle = AttributeHandle {
            name: name.to_string(),
            primitive,
            scalar: T::SCALAR_TYPE,
            stride,
            index,
        };
        self.attributes.push(StoredAttribute {
            handle: handle.clone(),
            column: T::wrap(Column::new(stride, default.to_vec(), capacity)),
        });
        self.by_name.insert((primitive, name.to_string()), index);
        Ok(TypedHandle {
            handle,
            _marker: PhantomData,
        })
    }

    pub fn handle(&self, name: &str, primitive: PrimitiveType) -> Result<AttributeHandle, MeshDartError> {
        self.by_name
            .get(&(primitive, name.to_string()))
            .map(|&i| self.attributes[i].handle.clone())
            .ok_or_else(|| MeshDartError::AttributeMissing {
                name: name.to_string(),
                primitive,
            })
    }

    pub fn typed_handle<T: AttributeScalar>(
        &self,
        name: &str,
        primitive: PrimitiveType,
    ) -> Result<TypedHandle<T>, MeshDartError> {
        let handle = self.handle(name, primitive)?;
        let found = handle.scalar;
        handle.typed().ok_or_else(|| MeshDartError::AttributeTypeMismatch {
            name: name.to_string(),
            expected: T::SCALAR_TYPE,
            found,
        })
    }

    /// Registered handles in registration order.
    pub fn handles(&self) -> impl Iterator<Item = &AttributeHandle> {
        self.attributes.iter().map(|a| &a.handle)
    }

    fn stored(&self, handle: &AttributeHandle) -> Result<&StoredAttribute, MeshDartError> {
        self.attributes
            .get(handle.index)
            .filter(|a| a.handle == *handle)
            .ok_or_else(|| MeshDartError::AttributeMissing {
                name: handle.name.clone(),
                primitive: handle.primitive,
            })
    }

    pub fn tagged(&self, handle: &AttributeHandle) -> Result<&TaggedColumn, MeshDartError> {
        Ok(&self.stored(handle)?.column)
    }

    pub fn column<T: AttributeScalar>(&self, handle: &TypedHandle<T>) -> Result<&Column<T>, MeshDartError> {
        let stored = self.stored(&handle.handle)?;
        T::unwrap(&stored.column).ok_or(MeshDartError::AttributeTypeMismatch {
            name: handle.handle.name.clone(),
            expected: T::SCALAR_TYPE,
            found: stored.column.scalar_type(),
        })
    }

    /// Grow every column of `primitive` to `capacity` rows.
    pub(crate) fn resize(&mut self, primitive: PrimitiveType, capacity: usize) {
        for a in &mut self.attributes {
            if a.handle.primitive == primitive {
                a.column.resize(capacity);
            }
        }
    }

    /// Overwrite one row, logging its previous contents. Rows past the column
    /// are skipped.
    pub(crate) fn write_row<T: AttributeScalar>(
        &self,
        handle: &TypedHandle<T>,
        id: usize,
        values: &[T],
        log: &mut RowLog,
    ) -> Result<(), MeshDartError> {
        let column = self.column(handle)?;
        if let Some(old) = column.swap_row(id, values) {
            log.entries.push((handle.handle.index, id, old));
        }
        Ok(())
    }

    /// Write the default row into freshly allocated slots of `primitive`.
    pub(crate) fn reset_rows(&self, primitive: PrimitiveType, ids: &[usize], log: &mut RowLog) {
        for (index, a) in self.attributes.iter().enumerate() {
            if a.handle.primitive != primitive {
                continue;
            }
            for &id in ids {
                if let Some(old) = a.column.reset_row(id) {
                    log.entries.push((index, id, old));
                }
            }
        }
    }

    /// Restore every row recorded in `log`, newest first.
    pub(crate) fn undo(&self, log: RowLog) {
        for (index, id, old) in log.entries.into_iter().rev() {
            if let Some(a) = self.attributes.get(index) {
                a.column.restore(id, &old);
            }
        }
    }

    /// Same attributes with the same values in the first `rows(primitive)`
    /// rows of each column.
    pub(crate) fn same_values(&self, other: &AttributeStore, rows: impl Fn(PrimitiveType) -> usize) -> bool {
        self.attributes.len() == other.attributes.len()
            && self.attributes.iter().zip(&other.attributes).all(|(a, b)| {
                a.handle == b.handle
                    && a.column.rows_equal(&b.column, rows(a.handle.primitive))
            })
    }

    /// Apply the id compaction of a consolidate pass to every column.
    pub(crate) fn permute(&mut self, map: &ConsolidateMap) {
        for a in &mut self.attributes {
            a.column.permute(map.new_to_old(a.handle.primitive));
        }
    }
}
