//! Tuple-addressed views onto one attribute column.
//!
//! Rows are handed out as copies; columns are shared with concurrent edits.

use crate::data::column::Column;
use crate::data::scalar::AttributeScalar;
use crate::mesh_error::MeshDartError;
use crate::topology::connectivity::Connectivity;
use crate::topology::primitive::PrimitiveType;
use crate::topology::tuple::Tuple;

fn inactive(primitive: PrimitiveType, id: usize) -> MeshDartError {
    MeshDartError::InactiveSimplex { primitive, id }
}

fn single<T: Copy>(name: &str, row: Vec<T>) -> Result<T, MeshDartError> {
    match row.as_slice() {
        [value] => Ok(*value),
        _ => Err(MeshDartError::StrideMismatch {
            name: name.to_string(),
            expected: 1,
            found: row.len(),
        }),
    }
}

/// Read-only view of one attribute.
pub struct Accessor<'a, T> {
    column: &'a Column<T>,
    conn: &'a Connectivity,
    primitive: PrimitiveType,
    name: &'a str,
}

impl<'a, T: AttributeScalar> Accessor<'a, T> {
    pub(crate) fn new(column: &'a Column<T>, conn: &'a Connectivity, primitive: PrimitiveType, name: &'a str) -> Self {
        Self {
            column,
            conn,
            primitive,
            name,
        }
    }

    pub fn primitive(&self) -> PrimitiveType {
        self.primitive
    }

    pub fn stride(&self) -> usize {
        self.column.stride()
    }

    /// Row of a live simplex by id.
    pub fn row(&self, id: usize) -> Option<Vec<T>> {
        if !self.conn.is_active(self.primitive, id) {
            return None;
        }
        self.column.row(id)
    }

    /// Row of the tuple's simplex of this accessor's primitive type.
    pub fn vector_attribute(&self, t: &Tuple) -> Result<Vec<T>, MeshDartError> {
        let id = self.conn.tuple_id(t, self.primitive)?;
        self.column.row(id).ok_or_else(|| inactive(self.primitive, id))
    }

    /// Single value of a stride-1 attribute.
    pub fn scalar_attribute(&self, t: &Tuple) -> Result<T, MeshDartError> {
        single(self.name, self.vector_attribute(t)?)
    }
}

/// Read-write view of one attribute.
pub struct AccessorMut<'a, T> {
    inner: Accessor<'a, T>,
}

impl<'a, T: AttributeScalar> AccessorMut<'a, T> {
    pub(crate) fn new(column: &'a Column<T>, conn: &'a Connectivity, primitive: PrimitiveType, name: &'a str) -> Self {
        Self {
            inner: Accessor::new(column, conn, primitive, name),
        }
    }

    pub fn stride(&self) -> usize {
        self.inner.stride()
    }

    pub fn row(&self, id: usize) -> Option<Vec<T>> {
        self.inner.row(id)
    }

    pub fn vector_attribute(&self, t: &Tuple) -> Result<Vec<T>, MeshDartError> {
        self.inner.vector_attribute(t)
    }

    pub fn scalar_attribute(&self, t: &Tuple) -> Result<T, MeshDartError> {
        self.inner.scalar_attribute(t)
    }

    fn check_stride(&self, values: &[T]) -> Result<(), MeshDartError> {
        let stride = self.inner.stride();
        if values.len() != stride {
            return Err(MeshDartError::StrideMismatch {
                name: self.inner.name.to_string(),
                expected: stride,
                found: values.len(),
            });
        }
        Ok(())
    }

    /// Overwrite the tuple's row; `values` must match the stride.
    pub fn set_vector_attribute(&mut self, t: &Tuple, values: &[T]) -> Result<(), MeshDartError> {
        self.check_stride(values)?;
        let id = self.inner.conn.tuple_id(t, self.inner.primitive)?;
        self.inner
            .column
            .swap_row(id, values)
            .map(drop)
            .ok_or_else(|| inactive(self.inner.primitive, id))
    }

    pub fn set_scalar_attribute(&mut self, t: &Tuple, value: T) -> Result<(), MeshDartError> {
        self.set_vector_attribute(t, &[value])
    }

    /// Overwrite the row of a live simplex by id.
    pub fn set_row(&mut self, id: usize, values: &[T]) -> Result<(), MeshDartError> {
        self.check_stride(values)?;
        let primitive = self.inner.primitive;
        if !self.inner.conn.is_active(primitive, id) {
            return Err(inactive(primitive, id));
        }
        self.inner
            .column
            .swap_row(id, values)
            .map(drop)
            .ok_or_else(|| inactive(primitive, id))
    }
}
