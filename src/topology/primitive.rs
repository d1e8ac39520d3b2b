//! Primitive types and mesh kinds.

use serde::{Deserialize, Serialize};

/// Simplex dimensions a mesh can be navigated over.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveType {
    /// 0D vertex.
    Vertex,
    /// 1D edge.
    Edge,
    /// 2D triangle.
    Face,
    /// 3D tetrahedron.
    Tetrahedron,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 4] = [
        PrimitiveType::Vertex,
        PrimitiveType::Edge,
        PrimitiveType::Face,
        PrimitiveType::Tetrahedron,
    ];

    /// Topological dimension of the primitive.
    pub const fn dimension(self) -> usize {
        match self {
            PrimitiveType::Vertex => 0,
            PrimitiveType::Edge => 1,
            PrimitiveType::Face => 2,
            PrimitiveType::Tetrahedron => 3,
        }
    }

    pub const fn from_dimension(dim: usize) -> Option<Self> {
        match dim {
            0 => Some(PrimitiveType::Vertex),
            1 => Some(PrimitiveType::Edge),
            2 => Some(PrimitiveType::Face),
            3 => Some(PrimitiveType::Tetrahedron),
            _ => None,
        }
    }

    /// Returns a stable string label for the primitive.
    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveType::Vertex => "vertex",
            PrimitiveType::Edge => "edge",
            PrimitiveType::Face => "face",
            PrimitiveType::Tetrahedron => "tetrahedron",
        }
    }
}

/// Top-level cell type of a simplicial mesh.
///
/// Selects the transition tables used for navigation and the shape of the
/// connectivity arrays.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum MeshKind {
    /// Point clouds: every vertex is its own cell.
    Point,
    /// Polylines: cells are edges.
    Edge,
    /// Triangle meshes.
    Triangle,
    /// Tetrahedral meshes.
    Tetrahedron,
}

impl MeshKind {
    /// Dimension of the top-level cells.
    pub const fn dimension(self) -> usize {
        match self {
            MeshKind::Point => 0,
            MeshKind::Edge => 1,
            MeshKind::Triangle => 2,
            MeshKind::Tetrahedron => 3,
        }
    }

    pub const fn vertices_per_cell(self) -> usize {
        self.dimension() + 1
    }

    pub fn top_primitive(self) -> PrimitiveType {
        match self {
            MeshKind::Point => PrimitiveType::Vertex,
            MeshKind::Edge => PrimitiveType::Edge,
            MeshKind::Triangle => PrimitiveType::Face,
            MeshKind::Tetrahedron => PrimitiveType::Tetrahedron,
        }
    }

    /// True if `primitive` is a simplex of this mesh (dimension up to the cells).
    pub fn contains(self, primitive: PrimitiveType) -> bool {
        primitive.dimension() <= self.dimension()
    }

    /// Primitives of this mesh, vertices first.
    pub fn primitives(self) -> impl Iterator<Item = PrimitiveType> {
        (0..=self.dimension()).filter_map(PrimitiveType::from_dimension)
    }

    /// Number of `primitive` simplices in one cell (e.g. 6 edges per tetrahedron).
    pub fn simplices_per_cell(self, primitive: PrimitiveType) -> usize {
        if !self.contains(primitive) {
            return 0;
        }
        binomial(self.vertices_per_cell(), primitive.dimension() + 1)
    }
}

pub(crate) const fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let mut acc = 1;
    let mut i = 0;
    while i < k {
        acc = acc * (n - i) / (i + 1);
        i += 1;
    }
    acc
}
