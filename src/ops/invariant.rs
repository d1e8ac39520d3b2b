//! Predicates checked before and after a local edit.
//!
//! An [`Invariant`] sees the simplices an operation touches: the pre-image
//! before anything is mutated, and the pre- and post-images once the edit and
//! attribute transfer are applied. Invariants combine with [`InvariantExt::and`]
//! and [`InvariantExt::or`] and are grouped in an [`InvariantCollection`].

use std::sync::Arc;

use crate::data::attribute_store::TypedHandle;
use crate::mesh::Mesh;
use crate::mesh_error::{CheckStage, OperationError};
use crate::ops::OperationKind;
use crate::ops::image::SimplexImage;
use crate::topology::link::link_condition;
use crate::topology::primitive::{MeshKind, PrimitiveType};
use crate::topology::simplex::SimplexKey;

/// A check over the simplices changed by one operation.
pub trait Invariant: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluated on the unmodified mesh.
    fn before(&self, _mesh: &Mesh, _pre: &SimplexImage) -> bool {
        true
    }

    /// Evaluated on the edited mesh, after attribute transfer.
    fn after(&self, _mesh: &Mesh, _pre: &SimplexImage, _post: &SimplexImage) -> bool {
        true
    }

    /// Error reported when this invariant rejects an image.
    fn violation(&self, stage: CheckStage) -> OperationError {
        OperationError::InvariantViolation {
            invariant: self.name().to_string(),
            stage,
        }
    }
}

impl<I: Invariant + ?Sized> Invariant for Arc<I> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn before(&self, mesh: &Mesh, pre: &SimplexImage) -> bool {
        (**self).before(mesh, pre)
    }

    fn after(&self, mesh: &Mesh, pre: &SimplexImage, post: &SimplexImage) -> bool {
        (**self).after(mesh, pre, post)
    }

    fn violation(&self, stage: CheckStage) -> OperationError {
        (**self).violation(stage)
    }
}

/// Accepts iff both sides accept.
pub struct And<A, B> {
    left: A,
    right: B,
    name: String,
}

/// Accepts iff either side accepts.
pub struct Or<A, B> {
    left: A,
    right: B,
    name: String,
}

impl<A: Invariant, B: Invariant> Invariant for And<A, B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn before(&self, mesh: &Mesh, pre: &SimplexImage) -> bool {
        self.left.before(mesh, pre) && self.right.before(mesh, pre)
    }

    fn after(&self, mesh: &Mesh, pre: &SimplexImage, post: &SimplexImage) -> bool {
        self.left.after(mesh, pre, post) && self.right.after(mesh, pre, post)
    }
}

impl<A: Invariant, B: Invariant> Invariant for Or<A, B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn before(&self, mesh: &Mesh, pre: &SimplexImage) -> bool {
        self.left.before(mesh, pre) || self.right.before(mesh, pre)
    }

    fn after(&self, mesh: &Mesh, pre: &SimplexImage, post: &SimplexImage) -> bool {
        self.left.after(mesh, pre, post) || self.right.after(mesh, pre, post)
    }
}

/// Combinators available on every invariant.
pub trait InvariantExt: Invariant + Sized {
    fn and<B: Invariant>(self, other: B) -> And<Self, B> {
        let name = format!("({} and {})", self.name(), other.name());
        And {
            left: self,
            right: other,
            name,
        }
    }

    fn or<B: Invariant>(self, other: B) -> Or<Self, B> {
        let name = format!("({} or {})", self.name(), other.name());
        Or {
            left: self,
            right: other,
            name,
        }
    }
}

impl<I: Invariant> InvariantExt for I {}

/// Ordered set of invariants; the first rejection wins.
#[derive(Clone, Default)]
pub struct InvariantCollection {
    invariants: Vec<Arc<dyn Invariant>>,
}

impl InvariantCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Arc::new(invariant));
    }

    pub fn push_arc(&mut self, invariant: Arc<dyn Invariant>) {
        self.invariants.push(invariant);
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    pub fn check_before(&self, mesh: &Mesh, pre: &SimplexImage) -> Result<(), OperationError> {
        match self.invariants.iter().find(|i| !i.before(mesh, pre)) {
            Some(failed) => Err(failed.violation(CheckStage::Before)),
            None => Ok(()),
        }
    }

    pub fn check_after(&self, mesh: &Mesh, pre: &SimplexImage, post: &SimplexImage) -> Result<(), OperationError> {
        match self.invariants.iter().find(|i| !i.after(mesh, pre, post)) {
            Some(failed) => Err(failed.violation(CheckStage::After)),
            None => Ok(()),
        }
    }
}

impl Invariant for InvariantCollection {
    fn name(&self) -> &str {
        "collection"
    }

    fn before(&self, mesh: &Mesh, pre: &SimplexImage) -> bool {
        self.check_before(mesh, pre).is_ok()
    }

    fn after(&self, mesh: &Mesh, pre: &SimplexImage, post: &SimplexImage) -> bool {
        self.check_after(mesh, pre, post).is_ok()
    }
}

type BeforeFn = dyn Fn(&Mesh, &SimplexImage) -> bool + Send + Sync;
type AfterFn = dyn Fn(&Mesh, &SimplexImage, &SimplexImage) -> bool + Send + Sync;

/// Invariant backed by closures.
#[derive(Clone)]
pub struct FnInvariant {
    name: String,
    before: Option<Arc<BeforeFn>>,
    after: Option<Arc<AfterFn>>,
}

impl FnInvariant {
    pub fn before<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Mesh, &SimplexImage) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            before: Some(Arc::new(f)),
            after: None,
        }
    }

    pub fn after<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Mesh, &SimplexImage, &SimplexImage) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            before: None,
            after: Some(Arc::new(f)),
        }
    }
}

impl Invariant for FnInvariant {
    fn name(&self) -> &str {
        &self.name
    }

    fn before(&self, mesh: &Mesh, pre: &SimplexImage) -> bool {
        self.before.as_ref().is_none_or(|f| f(mesh, pre))
    }

    fn after(&self, mesh: &Mesh, pre: &SimplexImage, post: &SimplexImage) -> bool {
        self.after.as_ref().is_none_or(|f| f(mesh, pre, post))
    }
}

/// Collapses must not pinch the mesh or join boundary components.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkConditionInvariant;

impl Invariant for LinkConditionInvariant {
    fn name(&self) -> &str {
        "link_condition"
    }

    fn before(&self, mesh: &Mesh, pre: &SimplexImage) -> bool {
        if pre.kind() != OperationKind::Collapse {
            return true;
        }
        match pre.input().vertices() {
            [u, v] => link_condition(mesh.connectivity(), *u, *v),
            _ => false,
        }
    }

    fn violation(&self, _stage: CheckStage) -> OperationError {
        OperationError::LinkConditionViolation
    }
}

fn positions(mesh: &Mesh, position: &TypedHandle<f64>, cell: &[usize]) -> Option<Vec<Vec<f64>>> {
    let column = mesh.attributes().column(position).ok()?;
    cell.iter().map(|&v| column.row(v)).collect()
}

fn signed_measure(p: &[Vec<f64>], stride: usize) -> Option<f64> {
    match (p.len(), stride) {
        (3, 2) => {
            let (a, b, c) = (&p[0], &p[1], &p[2]);
            Some((b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]))
        }
        (4, 3) => {
            let e = |i: usize| [p[i][0] - p[0][0], p[i][1] - p[0][1], p[i][2] - p[0][2]];
            let (x, y, z) = (e(1), e(2), e(3));
            Some(
                x[0] * (y[1] * z[2] - y[2] * z[1]) - x[1] * (y[0] * z[2] - y[2] * z[0])
                    + x[2] * (y[0] * z[1] - y[1] * z[0]),
            )
        }
        _ => None,
    }
}

/// Every post-image cell keeps a positive signed area (triangles with 2D
/// positions) or volume (tetrahedra with 3D positions).
///
/// Edge meshes and embeddings without an orientation are accepted as is.
#[derive(Clone, Debug)]
pub struct SimplexInversionInvariant {
    position: TypedHandle<f64>,
}

impl SimplexInversionInvariant {
    pub fn new(position: TypedHandle<f64>) -> Self {
        Self { position }
    }
}

impl Invariant for SimplexInversionInvariant {
    fn name(&self) -> &str {
        "simplex_inversion"
    }

    fn after(&self, mesh: &Mesh, _pre: &SimplexImage, post: &SimplexImage) -> bool {
        let stride = self.position.stride();
        let oriented = matches!(
            (mesh.kind(), stride),
            (MeshKind::Triangle, 2) | (MeshKind::Tetrahedron, 3)
        );
        if !oriented {
            return true;
        }
        post.cells().iter().all(|cell| {
            positions(mesh, &self.position, &cell.vertices)
                .and_then(|p| signed_measure(&p, stride))
                .is_some_and(|m| m > 0.0)
        })
    }
}

/// No post-image edge is longer than `max_length`.
#[derive(Clone, Debug)]
pub struct MaxEdgeLengthInvariant {
    position: TypedHandle<f64>,
    max_length: f64,
}

impl MaxEdgeLengthInvariant {
    pub fn new(position: TypedHandle<f64>, max_length: f64) -> Self {
        Self {
            position,
            max_length,
        }
    }
}

impl Invariant for MaxEdgeLengthInvariant {
    fn name(&self) -> &str {
        "max_edge_length"
    }

    fn after(&self, mesh: &Mesh, _pre: &SimplexImage, post: &SimplexImage) -> bool {
        let max_sq = self.max_length * self.max_length;
        post.simplices(PrimitiveType::Edge).iter().all(|e| {
            positions(mesh, &self.position, e.vertices()).is_some_and(|p| {
                let sq: f64 = p[0].iter().zip(&p[1]).map(|(a, b)| (a - b) * (a - b)).sum();
                sq <= max_sq
            })
        })
    }
}

/// Triangle swaps must bring vertex valences closer to 6 (interior) or 4
/// (boundary), measured as the sum of squared deviations.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValenceImprovementInvariant;

impl ValenceImprovementInvariant {
    fn deviation(valence: i64, boundary: bool) -> i64 {
        let target = if boundary { 4 } else { 6 };
        (valence - target) * (valence - target)
    }
}

impl Invariant for ValenceImprovementInvariant {
    fn name(&self) -> &str {
        "valence_improvement"
    }

    fn after(&self, mesh: &Mesh, pre: &SimplexImage, post: &SimplexImage) -> bool {
        if pre.kind() != OperationKind::Swap || mesh.kind() != MeshKind::Triangle {
            return true;
        }
        let conn = mesh.connectivity();
        let (mut before, mut after) = (0, 0);
        for v in pre.vertices() {
            let now = conn.one_ring(v).len() as i64;
            let gained = post
                .simplices(PrimitiveType::Edge)
                .iter()
                .filter(|e| e.key().contains(v) && !pre.contains(e.key()))
                .count() as i64;
            let lost = pre
                .simplices(PrimitiveType::Edge)
                .iter()
                .filter(|e| e.key().contains(v) && !post.contains(e.key()))
                .count() as i64;
            let boundary = conn.is_boundary_simplex(&SimplexKey::new(&[v]));
            after += Self::deviation(now, boundary);
            before += Self::deviation(now - gained + lost, boundary);
        }
        after < before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::primitive::MeshKind;

    fn mesh_and_image() -> (Mesh, SimplexImage) {
        let mesh = Mesh::from_cells(MeshKind::Triangle, 3, &[[0, 1, 2]]).unwrap();
        let img = SimplexImage::capture(
            mesh.connectivity(),
            OperationKind::Split,
            SimplexKey::new(&[0, 1]),
            &[0],
        );
        (mesh, img)
    }

    #[test]
    fn collection_reports_first_failure() {
        let (mesh, img) = mesh_and_image();
        let mut all = InvariantCollection::new();
        all.push(FnInvariant::before("yes", |_, _| true));
        all.push(FnInvariant::before("no", |_, _| false));
        all.push(FnInvariant::before("never reached", |_, _| false));
        assert_eq!(
            all.check_before(&mesh, &img),
            Err(OperationError::InvariantViolation {
                invariant: "no".into(),
                stage: CheckStage::Before,
            })
        );
        assert!(all.check_after(&mesh, &img, &img).is_ok());
    }

    #[test]
    fn combinators_name_themselves() {
        let (mesh, img) = mesh_and_image();
        let yes = FnInvariant::before("a", |_, _| true);
        let no = FnInvariant::before("b", |_, _| false);
        let both = yes.clone().and(no.clone());
        assert_eq!(both.name(), "(a and b)");
        assert!(!both.before(&mesh, &img));
        assert!(yes.or(no).before(&mesh, &img));
    }

    #[test]
    fn link_condition_reports_its_own_error() {
        assert_eq!(
            LinkConditionInvariant.violation(CheckStage::Before),
            OperationError::LinkConditionViolation
        );
    }

    #[test]
    fn inversion_detects_flipped_triangles() {
        let mut mesh = Mesh::from_cells(MeshKind::Triangle, 3, &[[0, 1, 2]]).unwrap();
        let pos = mesh
            .register_attribute("position", PrimitiveType::Vertex, &[0.0f64; 2])
            .unwrap();
        {
            let mut acc = mesh.create_accessor_mut(&pos).unwrap();
            acc.set_row(1, &[1.0, 0.0]).unwrap();
            acc.set_row(2, &[0.0, 1.0]).unwrap();
        }
        let img = SimplexImage::capture(mesh.connectivity(), OperationKind::Split, SimplexKey::new(&[0, 1]), &[0]);
        let inv = SimplexInversionInvariant::new(pos.clone());
        assert!(inv.after(&mesh, &img, &img));
        mesh.create_accessor_mut(&pos).unwrap().set_row(2, &[0.0, -1.0]).unwrap();
        assert!(!inv.after(&mesh, &img, &img));
        let short = MaxEdgeLengthInvariant::new(pos, 1.2);
        assert!(!short.after(&mesh, &img, &img));
    }
}
