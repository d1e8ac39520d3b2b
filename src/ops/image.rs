//! Pre- and post-images of a local edit.

use crate::ops::OperationKind;
use crate::topology::connectivity::Connectivity;
use crate::topology::dart::SimplexDart;
use crate::topology::primitive::PrimitiveType;
use crate::topology::simplex::{Simplex, SimplexKey};

/// A cell of an image, vertices in stored orientation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageCell {
    pub id: usize,
    pub vertices: Vec<usize>,
}

/// The cells an operation removes (pre-image) or creates (post-image), with
/// every simplex of those cells grouped by dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimplexImage {
    kind: OperationKind,
    input: SimplexKey,
    cells: Vec<ImageCell>,
    /// `simplices[k]`, sorted by key.
    simplices: Vec<Vec<Simplex>>,
}

impl SimplexImage {
    pub(crate) fn capture(conn: &Connectivity, kind: OperationKind, input: SimplexKey, cells: &[usize]) -> Self {
        let d = conn.kind().dimension();
        let table = SimplexDart::get(conn.kind());
        let mut simplices: Vec<Vec<Simplex>> = vec![Vec::new(); d + 1];
        let mut image_cells = Vec::with_capacity(cells.len());
        for &c in cells {
            image_cells.push(ImageCell {
                id: c,
                vertices: conn.vertices_of(c).to_vec(),
            });
            for (k, bucket) in simplices.iter_mut().enumerate() {
                let Some(primitive) = PrimitiveType::from_dimension(k) else {
                    continue;
                };
                for j in 0..table.simplex_count(k) {
                    bucket.push(Simplex::new(
                        primitive,
                        conn.simplex_id(c, k, j),
                        conn.local_key(c, k, j),
                    ));
                }
            }
        }
        for bucket in &mut simplices {
            bucket.sort_by_key(|s| *s.key());
            bucket.dedup_by_key(|s| *s.key());
        }
        Self {
            kind,
            input,
            cells: image_cells,
            simplices,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Vertex set of the operation's input simplex.
    pub fn input(&self) -> &SimplexKey {
        &self.input
    }

    pub fn cells(&self) -> &[ImageCell] {
        &self.cells
    }

    pub fn simplices(&self, primitive: PrimitiveType) -> &[Simplex] {
        self.simplices
            .get(primitive.dimension())
            .map_or(&[], Vec::as_slice)
    }

    pub fn vertices(&self) -> impl Iterator<Item = usize> + '_ {
        self.simplices(PrimitiveType::Vertex).iter().map(Simplex::id)
    }

    /// Every simplex of the image, lowest dimension first.
    pub fn all(&self) -> impl Iterator<Item = &Simplex> {
        self.simplices.iter().flatten()
    }

    pub fn find(&self, key: &SimplexKey) -> Option<&Simplex> {
        let bucket = self.simplices.get(key.len().checked_sub(1)?)?;
        bucket
            .binary_search_by_key(key, |s| *s.key())
            .ok()
            .map(|i| &bucket[i])
    }

    pub fn contains(&self, key: &SimplexKey) -> bool {
        self.find(key).is_some()
    }
}
