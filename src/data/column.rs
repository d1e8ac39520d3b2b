//! Fixed-stride typed column over atomic cells.
//!
//! Every scalar is kept as its 64-bit pattern in an [`AtomicU64`], so rows can
//! be written through a shared reference while other threads edit other rows.
//! Only growth and compaction need `&mut`.

use core::fmt::{Debug, Formatter};
use core::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::data::scalar::AttributeScalar;

/// Values of one attribute, `stride` scalars per simplex id.
///
/// Slots beyond the live range keep whatever they last held; new slots are
/// filled with the default row.
pub struct Column<T> {
    stride: usize,
    default: Vec<T>,
    data: Vec<AtomicU64>,
    _marker: PhantomData<T>,
}

impl<T: AttributeScalar> Column<T> {
    /// Column of `rows` default rows. `default.len()` is the stride.
    pub fn new(stride: usize, default: Vec<T>, rows: usize) -> Self {
        debug_assert_eq!(stride, default.len());
        let mut column = Self {
            stride,
            default,
            data: Vec::new(),
            _marker: PhantomData,
        };
        column.resize(rows);
        column
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.data.len() / self.stride.max(1)
    }

    pub fn default_row(&self) -> &[T] {
        &self.default
    }

    #[inline]
    fn cells(&self, id: usize) -> Option<&[AtomicU64]> {
        self.data.get(id * self.stride..(id + 1) * self.stride)
    }

    /// Copy of one row.
    pub fn row(&self, id: usize) -> Option<Vec<T>> {
        self.cells(id)
            .map(|cells| cells.iter().map(|c| T::from_word(c.load(Ordering::Acquire))).collect())
    }

    /// Store `values` into row `id` and return the previous bit patterns.
    pub(crate) fn swap_row(&self, id: usize, values: &[T]) -> Option<Vec<u64>> {
        let cells = self.cells(id)?;
        debug_assert_eq!(cells.len(), values.len());
        Some(
            cells
                .iter()
                .zip(values)
                .map(|(c, v)| c.swap(v.to_word(), Ordering::AcqRel))
                .collect(),
        )
    }

    /// Write the default row into `id`, returning the previous bit patterns.
    pub(crate) fn reset_row(&self, id: usize) -> Option<Vec<u64>> {
        self.swap_row(id, &self.default)
    }

    /// Put back bit patterns returned by [`Column::swap_row`].
    pub(crate) fn restore(&self, id: usize, bits: &[u64]) {
        if let Some(cells) = self.cells(id) {
            for (c, &b) in cells.iter().zip(bits) {
                c.store(b, Ordering::Release);
            }
        }
    }

    /// Grow to `rows` rows; never shrinks.
    pub fn resize(&mut self, rows: usize) {
        let target = rows * self.stride;
        while self.data.len() < target {
            for v in &self.default {
                self.data.push(AtomicU64::new(v.to_word()));
            }
        }
    }

    /// Keep rows `new_to_old[i]` as row `i`, dropping everything else.
    pub(crate) fn permute(&mut self, new_to_old: &[usize]) {
        let mut data = Vec::with_capacity(new_to_old.len() * self.stride);
        for &old in new_to_old {
            match self.cells(old) {
                Some(cells) => data.extend(cells.iter().map(|c| AtomicU64::new(c.load(Ordering::Acquire)))),
                None => data.extend(self.default.iter().map(|v| AtomicU64::new(v.to_word()))),
            }
        }
        self.data = data;
    }

    /// True if the first `rows` rows hold the same bits in both columns.
    pub(crate) fn rows_equal(&self, other: &Self, rows: usize) -> bool {
        let n = rows * self.stride;
        self.stride == other.stride
            && self.data.len() >= n
            && other.data.len() >= n
            && self.data[..n]
                .iter()
                .zip(&other.data[..n])
                .all(|(a, b)| a.load(Ordering::Acquire) == b.load(Ordering::Acquire))
    }
}

impl<T: AttributeScalar> Clone for Column<T> {
    fn clone(&self) -> Self {
        Self {
            stride: self.stride,
            default: self.default.clone(),
            data: self
                .data
                .iter()
                .map(|c| AtomicU64::new(c.load(Ordering::Acquire)))
                .collect(),
            _marker: PhantomData,
        }
    }
}

impl<T: AttributeScalar> PartialEq for Column<T> {
    fn eq(&self, other: &Self) -> bool {
        self.default == other.default && self.rows() == other.rows() && self.rows_equal(other, self.rows())
    }
}

impl<T: AttributeScalar> Debug for Column<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Column")
            .field("stride", &self.stride)
            .field("default", &self.default)
            .field("rows", &self.rows())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_undoes_a_swap() {
        let col = Column::new(2, vec![0.0f64, 1.0], 2);
        col.swap_row(0, &[5.0, 6.0]).unwrap();
        let before = col.clone();
        let old = col.swap_row(0, &[8.0, 9.0]).unwrap();
        assert_eq!(col.row(0), Some(vec![8.0, 9.0]));
        col.restore(0, &old);
        assert_eq!(col, before);
        assert_eq!(col.swap_row(2, &[1.0, 1.0]), None);
    }

    #[test]
    fn new_rows_take_the_default() {
        let mut col = Column::new(3, vec![1u32, 2, 3], 0);
        col.resize(2);
        assert_eq!(col.row(1), Some(vec![1u32, 2, 3]));
        assert_eq!(col.row(2), None);
        col.swap_row(1, &[7, 7, 7]);
        col.reset_row(1);
        assert_eq!(col.row(1).as_deref(), Some(col.default_row()));
    }

    #[test]
    fn negative_and_fractional_values_survive_the_bit_store() {
        let col = Column::new(1, vec![0i32], 1);
        col.swap_row(0, &[-17]);
        assert_eq!(col.row(0), Some(vec![-17]));
        let col = Column::new(1, vec![0.0f32], 1);
        col.swap_row(0, &[-0.125]);
        assert_eq!(col.row(0), Some(vec![-0.125f32]));
    }

    #[test]
    fn permute_compacts() {
        let mut col = Column::new(1, vec![0i32], 4);
        for i in 0..4 {
            col.swap_row(i, &[i as i32 * 10]);
        }
        col.permute(&[1, 3]);
        assert_eq!(col.rows(), 2);
        assert_eq!(col.row(1), Some(vec![30]));
    }

    #[test]
    fn rows_equal_ignores_spare_rows() {
        let a = Column::new(1, vec![0u64], 2);
        let b = Column::new(1, vec![0u64], 5);
        b.swap_row(4, &[3]);
        assert!(a.rows_equal(&b, 2));
        assert_ne!(a, b);
    }
}
