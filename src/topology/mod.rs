//! Simplicial topology: primitive types, dart tables, tuples and the
//! connectivity table they navigate.
//!
//! - [`dart`]: per-cell-type permutation tables
//! - [`tuple`]: the mesh cursor
//! - [`connectivity`]: row-locked incidence tables with free lists and per-edit undo logs
//! - [`link`]: the link condition for edge collapse

pub mod connectivity;
pub mod dart;
pub mod link;
pub mod primitive;
pub mod simplex;
pub mod tuple;

pub use connectivity::{BOUNDARY, CellVertices, ConsolidateMap, Connectivity};
pub use dart::{DartIndex, SimplexDart};
pub use primitive::{MeshKind, PrimitiveType};
pub use simplex::{Simplex, SimplexKey};
pub use tuple::Tuple;
