//! Iteration boundary for external serializers.
//!
//! [`crate::mesh::Mesh::visit_attributes`] walks every registered attribute
//! and streams `(id, row)` pairs for the live simplices of its primitive type.
//! File formats implement [`AttributeVisitor`]; nothing here prescribes one.

use crate::data::attribute_store::AttributeHandle;

/// One row of any supported scalar type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AttributeRow<'a> {
    F64(&'a [f64]),
    F32(&'a [f32]),
    I32(&'a [i32]),
    I64(&'a [i64]),
    U32(&'a [u32]),
    U64(&'a [u64]),
}

impl AttributeRow<'_> {
    pub fn len(&self) -> usize {
        match self {
            AttributeRow::F64(r) => r.len(),
            AttributeRow::F32(r) => r.len(),
            AttributeRow::I32(r) => r.len(),
            AttributeRow::I64(r) => r.len(),
            AttributeRow::U32(r) => r.len(),
            AttributeRow::U64(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives attribute rows, one attribute at a time.
pub trait AttributeVisitor {
    /// Return `false` to skip this attribute.
    fn begin_attribute(&mut self, _handle: &AttributeHandle) -> bool {
        true
    }

    fn visit_row(&mut self, handle: &AttributeHandle, id: usize, row: AttributeRow<'_>);

    fn end_attribute(&mut self, _handle: &AttributeHandle) {}
}
