//! Attribute transfer across a local edit.
//!
//! Old values are captured from the pre-image before the connectivity is
//! rewritten, since freed ids may be reused by the new simplices. After the
//! rewrite each new simplex gets its value from the captured rows of the
//! simplices it replaces.

use std::sync::Arc;


use crate::data::attribute_store::{AttributeHandle, TypedHandle};
use crate::data::scalar::{AttributeScalar, TaggedRows};
use crate::mesh::{Mesh, Transaction};
use crate::mesh_error::MeshDartError;
use crate::ops::OperationKind;
use crate::ops::image::SimplexImage;
use crate::topology::simplex::{Simplex, SimplexKey};

/// One old value a new value may be derived from.
#[derive(Clone, Copy, Debug)]
pub struct TransferSource<'a, T> {
    pub key: SimplexKey,
    pub values: &'a [T],
    /// Result of the rule's predicate on the source, before the edit.
    pub flagged: bool,
}

/// Decides the new row of a simplex from its sources.
///
/// Returning `None` leaves the default row in place.
pub trait AttributeTransferStrategy<T>: Send + Sync {
    fn compute(&self, sources: &[TransferSource<'_, T>]) -> Option<Vec<T>>;
}

type CustomFn<T> = dyn Fn(&[TransferSource<'_, T>]) -> Option<Vec<T>> + Send + Sync;

/// Built-in strategies.
///
/// When a predicate is configured and the sources disagree on it, `Mean`
/// averages only the flagged sources and the copy strategies prefer them.
#[derive(Clone)]
pub enum Transfer<T> {
    /// Keep the default row.
    None,
    /// Copy from the input tuple's side (the first source).
    CopyTuple,
    /// Copy from the other side (the last source).
    CopyOther,
    /// Component-wise mean.
    Mean,
    Custom(Arc<CustomFn<T>>),
}

impl<T> Transfer<T> {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[TransferSource<'_, T>]) -> Option<Vec<T>> + Send + Sync + 'static,
    {
        Transfer::Custom(Arc::new(f))
    }
}

fn preferred<'s, 'a, T>(sources: &'s [TransferSource<'a, T>]) -> Vec<&'s TransferSource<'a, T>> {
    let flagged: Vec<_> = sources.iter().filter(|s| s.flagged).collect();
    if flagged.is_empty() || flagged.len() == sources.len() {
        sources.iter().collect()
    } else {
        flagged
    }
}

fn mean<T: AttributeScalar>(sources: &[&TransferSource<'_, T>]) -> Option<Vec<T>> {
    let first = sources.first()?;
    let stride = first.values.len();
    let mut acc = vec![0.0f64; stride];
    for s in sources {
        if s.values.len() != stride {
            return None;
        }
        for (a, v) in acc.iter_mut().zip(s.values) {
            *a += v.to_f64()?;
        }
    }
    let n = sources.len() as f64;
    acc.into_iter().map(|a| T::from_f64(a / n)).collect()
}

impl<T: AttributeScalar> AttributeTransferStrategy<T> for Transfer<T> {
    fn compute(&self, sources: &[TransferSource<'_, T>]) -> Option<Vec<T>> {
        match self {
            Transfer::None => None,
            Transfer::CopyTuple => preferred(sources).first().map(|s| s.values.to_vec()),
            Transfer::CopyOther => preferred(sources).last().map(|s| s.values.to_vec()),
            Transfer::Mean => mean(&preferred(sources)),
            Transfer::Custom(f) => f(sources),
        }
    }
}

/// Predicate on a pre-image simplex, evaluated before the edit.
pub type SimplexPredicate = Arc<dyn Fn(&Mesh, &Simplex) -> bool + Send + Sync>;

/// Flags simplices lying on the mesh boundary.
pub fn boundary_predicate() -> SimplexPredicate {
    Arc::new(|mesh: &Mesh, s: &Simplex| mesh.connectivity().is_boundary_simplex(s.key()))
}

/// Flags simplices whose first attribute component equals `value`.
pub fn tag_predicate<T: AttributeScalar>(handle: TypedHandle<T>, value: T) -> SimplexPredicate {
    Arc::new(move |mesh: &Mesh, s: &Simplex| {
        mesh.attributes()
            .column(&handle)
            .ok()
            .and_then(|c| c.row(s.id()))
            .and_then(|row| row.first().copied())
            .is_some_and(|v| v == value)
    })
}

/// Old rows of one attribute over a pre-image, sorted by key.
#[derive(Clone, Debug)]
pub(crate) struct CapturedRows {
    keys: Vec<SimplexKey>,
    flags: Vec<bool>,
    rows: TaggedRows,
}

/// A simplex whose row is recomputed, with the keys of its sources.
#[derive(Clone, Debug)]
pub(crate) struct TransferTarget {
    pub id: usize,
    pub sources: Vec<SimplexKey>,
}

/// Type-erased transfer rule, one per attribute.
pub(crate) trait ErasedTransfer: Send + Sync {
    fn handle(&self) -> &AttributeHandle;
    fn kind_filter(&self) -> Option<OperationKind>;
    fn capture(&self, mesh: &Mesh, pre: &SimplexImage) -> Result<CapturedRows, MeshDartError>;
    fn apply(
        &self,
        mesh: &Mesh,
        tx: &mut Transaction,
        captured: &CapturedRows,
        targets: &[TransferTarget],
    ) -> Result<(), MeshDartError>;
}

pub(crate) struct TransferRule<T> {
    handle: TypedHandle<T>,
    strategy: Arc<dyn AttributeTransferStrategy<T>>,
    predicate: Option<SimplexPredicate>,
    kind: Option<OperationKind>,
}

impl<T: AttributeScalar> TransferRule<T> {
    pub(crate) fn new(
        handle: TypedHandle<T>,
        strategy: Arc<dyn AttributeTransferStrategy<T>>,
        predicate: Option<SimplexPredicate>,
        kind: Option<OperationKind>,
    ) -> Self {
        Self {
            handle,
            strategy,
            predicate,
            kind,
        }
    }
}

impl<T: AttributeScalar> ErasedTransfer for TransferRule<T> {
    fn handle(&self) -> &AttributeHandle {
        self.handle.untyped()
    }

    fn kind_filter(&self) -> Option<OperationKind> {
        self.kind
    }

    fn capture(&self, mesh: &Mesh, pre: &SimplexImage) -> Result<CapturedRows, MeshDartError> {
        let column = mesh.attributes().column(&self.handle)?;
        let simplices = pre.simplices(self.handle.primitive());
        let mut rows = Vec::with_capacity(simplices.len() * column.stride());
        let mut keys = Vec::with_capacity(simplices.len());
        let mut flags = Vec::with_capacity(simplices.len());
        for s in simplices {
            let row = column.row(s.id()).ok_or(MeshDartError::InactiveSimplex {
                primitive: s.primitive(),
                id: s.id(),
            })?;
            rows.extend(row);
            keys.push(*s.key());
            flags.push(self.predicate.as_ref().is_some_and(|p| p(mesh, s)));
        }
        Ok(CapturedRows {
            keys,
            flags,
            rows: T::wrap_rows(rows),
        })
    }

    fn apply(
        &self,
        mesh: &Mesh,
        tx: &mut Transaction,
        captured: &CapturedRows,
        targets: &[TransferTarget],
    ) -> Result<(), MeshDartError> {
        let stride = self.handle.stride();
        let rows = T::unwrap_rows(&captured.rows).ok_or(MeshDartError::AttributeTypeMismatch {
            name: self.handle.name().to_string(),
            expected: T::SCALAR_TYPE,
            found: captured.rows.scalar_type(),
        })?;
        let store = mesh.attributes();
        for target in targets {
            let sources: Vec<TransferSource<'_, T>> = target
                .sources
                .iter()
                .filter_map(|key| {
                    let i = captured.keys.binary_search(key).ok()?;
                    Some(TransferSource {
                        key: *key,
                        values: &rows[i * stride..(i + 1) * stride],
                        flagged: captured.flags[i],
                    })
                })
                .collect();
            let Some(values) = self.strategy.compute(&sources) else {
                continue;
            };
            if values.len() != stride {
                return Err(MeshDartError::StrideMismatch {
                    name: self.handle.name().to_string(),
                    expected: stride,
                    found: values.len(),
                });
            }
            store.write_row(&self.handle, target.id, &values, &mut tx.rows)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src<'a>(ids: &[usize], values: &'a [f64], flagged: bool) -> TransferSource<'a, f64> {
        TransferSource {
            key: SimplexKey::new(ids),
            values,
            flagged,
        }
    }

    #[test]
    fn mean_averages_components() {
        let a = [0.0, 2.0];
        let b = [1.0, 4.0];
        let out = Transfer::Mean.compute(&[src(&[0], &a, false), src(&[1], &b, false)]);
        assert_eq!(out, Some(vec![0.5, 3.0]));
        assert_eq!(Transfer::<f64>::Mean.compute(&[]), None);
    }

    #[test]
    fn flagged_sources_win_when_flags_differ() {
        let a = [0.0];
        let b = [1.0];
        let sources = [src(&[0], &a, false), src(&[1], &b, true)];
        assert_eq!(Transfer::Mean.compute(&sources), Some(vec![1.0]));
        assert_eq!(Transfer::CopyTuple.compute(&sources), Some(vec![1.0]));
        let agreeing = [src(&[0], &a, true), src(&[1], &b, true)];
        assert_eq!(Transfer::Mean.compute(&agreeing), Some(vec![0.5]));
        assert_eq!(Transfer::CopyTuple.compute(&agreeing), Some(vec![0.0]));
        assert_eq!(Transfer::CopyOther.compute(&agreeing), Some(vec![1.0]));
        assert_eq!(Transfer::<f64>::None.compute(&agreeing), None);
    }

    #[test]
    fn integer_mean_rounds() {
        let a = [1i64];
        let b = [2i64];
        let sources = [
            TransferSource {
                key: SimplexKey::new(&[0]),
                values: &a[..],
                flagged: false,
            },
            TransferSource {
                key: SimplexKey::new(&[1]),
                values: &b[..],
                flagged: false,
            },
        ];
        assert_eq!(Transfer::Mean.compute(&sources), Some(vec![2]));
        let max = Transfer::custom(|s: &[TransferSource<'_, i64>]| s.iter().map(|x| x.values.to_vec()).max());
        assert_eq!(max.compute(&sources), Some(vec![2]));
    }
}
