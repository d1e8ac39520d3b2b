//! Per-primitive attribute storage.
//!
//! Attributes are fixed-stride typed columns indexed by simplex id, registered
//! by name per primitive type. Cells are atomic words, so operations on
//! disjoint regions write rows through a shared mesh; each operation logs the
//! rows it overwrites so a rejected edit restores them exactly.

pub mod accessor;
pub mod attribute_store;
pub mod column;
pub mod scalar;
pub mod visit;

pub use accessor::{Accessor, AccessorMut};
pub use attribute_store::{AttributeHandle, AttributeStore, TypedHandle};
pub use column::Column;
pub use scalar::{AttributeScalar, ScalarType, TaggedColumn, TaggedRows};
pub use visit::{AttributeRow, AttributeVisitor};
