//! Scalar tags for attribute columns.
//!
//! Columns are stored type-erased in [`TaggedColumn`]; the [`AttributeScalar`]
//! trait maps each supported Rust scalar to its tag and back.

use core::fmt::Debug;

use num_traits::NumCast;
use serde::{Deserialize, Serialize};

use crate::data::column::Column;
use crate::data::visit::AttributeRow;

/// Scalar type tag for attribute columns.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    F64,
    F32,
    I32,
    I64,
    U32,
    U64,
}

impl ScalarType {
    /// Returns a stable string label for the scalar type.
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::F64 => "f64",
            ScalarType::F32 => "f32",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::U32 => "u32",
            ScalarType::U64 => "u64",
        }
    }

    /// Parse a scalar type from a string label.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "f64" => Some(ScalarType::F64),
            "f32" => Some(ScalarType::F32),
            "i32" => Some(ScalarType::I32),
            "i64" => Some(ScalarType::I64),
            "u32" => Some(ScalarType::U32),
            "u64" => Some(ScalarType::U64),
            _ => None,
        }
    }
}

/// Type-erased attribute column.
#[derive(Clone, Debug, PartialEq)]
pub enum TaggedColumn {
    F64(Column<f64>),
    F32(Column<f32>),
    I32(Column<i32>),
    I64(Column<i64>),
    U32(Column<u32>),
    U64(Column<u64>),
}

/// Type-erased value rows, used to carry captured values through an operation.
#[derive(Clone, Debug, PartialEq)]
pub enum TaggedRows {
    F64(Vec<f64>),
    F32(Vec<f32>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

macro_rules! each_column {
    ($value:expr, $col:ident => $body:expr) => {
        match $value {
            TaggedColumn::F64($col) => $body,
            TaggedColumn::F32($col) => $body,
            TaggedColumn::I32($col) => $body,
            TaggedColumn::I64($col) => $body,
            TaggedColumn::U32($col) => $body,
            TaggedColumn::U64($col) => $body,
        }
    };
}

impl TaggedColumn {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            TaggedColumn::F64(_) => ScalarType::F64,
            TaggedColumn::F32(_) => ScalarType::F32,
            TaggedColumn::I32(_) => ScalarType::I32,
            TaggedColumn::I64(_) => ScalarType::I64,
            TaggedColumn::U32(_) => ScalarType::U32,
            TaggedColumn::U64(_) => ScalarType::U64,
        }
    }

    pub fn rows(&self) -> usize {
        each_column!(self, c => c.rows())
    }

    pub(crate) fn resize(&mut self, rows: usize) {
        each_column!(self, c => c.resize(rows))
    }

    pub(crate) fn reset_row(&self, id: usize) -> Option<Vec<u64>> {
        each_column!(self, c => c.reset_row(id))
    }

    pub(crate) fn restore(&self, id: usize, bits: &[u64]) {
        each_column!(self, c => c.restore(id, bits))
    }

    /// Copy of one row.
    pub fn row(&self, id: usize) -> Option<TaggedRows> {
        match self {
            TaggedColumn::F64(c) => c.row(id).map(TaggedRows::F64),
            TaggedColumn::F32(c) => c.row(id).map(TaggedRows::F32),
            TaggedColumn::I32(c) => c.row(id).map(TaggedRows::I32),
            TaggedColumn::I64(c) => c.row(id).map(TaggedRows::I64),
            TaggedColumn::U32(c) => c.row(id).map(TaggedRows::U32),
            TaggedColumn::U64(c) => c.row(id).map(TaggedRows::U64),
        }
    }

    /// Same scalar type and the same bits in the first `rows` rows.
    pub(crate) fn rows_equal(&self, other: &TaggedColumn, rows: usize) -> bool {
        match (self, other) {
            (TaggedColumn::F64(a), TaggedColumn::F64(b)) => a.rows_equal(b, rows),
            (TaggedColumn::F32(a), TaggedColumn::F32(b)) => a.rows_equal(b, rows),
            (TaggedColumn::I32(a), TaggedColumn::I32(b)) => a.rows_equal(b, rows),
            (TaggedColumn::I64(a), TaggedColumn::I64(b)) => a.rows_equal(b, rows),
            (TaggedColumn::U32(a), TaggedColumn::U32(b)) => a.rows_equal(b, rows),
            (TaggedColumn::U64(a), TaggedColumn::U64(b)) => a.rows_equal(b, rows),
            _ => false,
        }
    }

    pub(crate) fn permute(&mut self, new_to_old: &[usize]) {
        each_column!(self, c => c.permute(new_to_old))
    }
}

impl TaggedRows {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            TaggedRows::F64(_) => ScalarType::F64,
            TaggedRows::F32(_) => ScalarType::F32,
            TaggedRows::I32(_) => ScalarType::I32,
            TaggedRows::I64(_) => ScalarType::I64,
            TaggedRows::U32(_) => ScalarType::U32,
            TaggedRows::U64(_) => ScalarType::U64,
        }
    }

    /// Borrow as a visitor row.
    pub fn as_row(&self) -> AttributeRow<'_> {
        match self {
            TaggedRows::F64(r) => AttributeRow::F64(r),
            TaggedRows::F32(r) => AttributeRow::F32(r),
            TaggedRows::I32(r) => AttributeRow::I32(r),
            TaggedRows::I64(r) => AttributeRow::I64(r),
            TaggedRows::U32(r) => AttributeRow::U32(r),
            TaggedRows::U64(r) => AttributeRow::U64(r),
        }
    }
}

/// Scalars that can be stored in an attribute column.
pub trait AttributeScalar:
    Copy + Default + PartialEq + Debug + Send + Sync + NumCast + 'static
{
    /// Scalar type tag for this concrete type.
    const SCALAR_TYPE: ScalarType;

    fn wrap(column: Column<Self>) -> TaggedColumn;
    fn unwrap(column: &TaggedColumn) -> Option<&Column<Self>>;
    fn wrap_rows(rows: Vec<Self>) -> TaggedRows;
    fn unwrap_rows(rows: &TaggedRows) -> Option<&[Self]>;

    /// Convert an averaged value back; integers round to nearest.
    fn from_f64(x: f64) -> Option<Self>;

    /// Bit pattern stored in a column cell.
    fn to_word(self) -> u64;
    fn from_word(word: u64) -> Self;
}

macro_rules! impl_attribute_scalar {
    ($t:ty, $variant:ident, float, $to:expr, $from:expr) => {
        impl_attribute_scalar!(@impl $t, $variant, |x: f64| <$t as NumCast>::from(x), $to, $from);
    };
    ($t:ty, $variant:ident, int, $to:expr, $from:expr) => {
        impl_attribute_scalar!(@impl $t, $variant, |x: f64| <$t as NumCast>::from(x.round()), $to, $from);
    };
    (@impl $t:ty, $variant:ident, $conv:expr, $to:expr, $from:expr) => {
        impl AttributeScalar for $t {
            const SCALAR_TYPE: ScalarType = ScalarType::$variant;

            fn wrap(column: Column<Self>) -> TaggedColumn {
                TaggedColumn::$variant(column)
            }

            fn unwrap(column: &TaggedColumn) -> Option<&Column<Self>> {
                if let TaggedColumn::$variant(column) = column {
                    Some(column)
                } else {
                    None
                }
            }

            fn wrap_rows(rows: Vec<Self>) -> TaggedRows {
                TaggedRows::$variant(rows)
            }

            fn unwrap_rows(rows: &TaggedRows) -> Option<&[Self]> {
                if let TaggedRows::$variant(rows) = rows {
                    Some(rows)
                } else {
                    None
                }
            }

            fn from_f64(x: f64) -> Option<Self> {
                ($conv)(x)
            }

            #[inline]
            fn to_word(self) -> u64 {
                ($to)(self)
            }

            #[inline]
            fn from_word(word: u64) -> Self {
                ($from)(word)
            }
        }
    };
}

impl_attribute_scalar!(f64, F64, float, |x: f64| x.to_bits(), f64::from_bits);
impl_attribute_scalar!(f32, F32, float, |x: f32| <u64 as From<u32>>::from(x.to_bits()), |b: u64| f32::from_bits(b as u32));
impl_attribute_scalar!(i32, I32, int, |x: i32| <u64 as From<u32>>::from(x as u32), |b: u64| b as u32 as i32);
impl_attribute_scalar!(i64, I64, int, |x: i64| x as u64, |b: u64| b as i64);
impl_attribute_scalar!(u32, U32, int, <u64 as From<u32>>::from, |b: u64| b as u32);
impl_attribute_scalar!(u64, U64, int, |x: u64| x, |b: u64| b);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for t in [
            ScalarType::F64,
            ScalarType::F32,
            ScalarType::I32,
            ScalarType::I64,
            ScalarType::U32,
            ScalarType::U64,
        ] {
            assert_eq!(ScalarType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ScalarType::parse("f16"), None);
    }

    #[test]
    fn integer_means_round() {
        assert_eq!(i64::from_f64(2.5), Some(3));
        assert_eq!(u32::from_f64(1.4), Some(1));
        assert_eq!(u32::from_f64(-3.0), None);
        assert_eq!(f32::from_f64(0.5), Some(0.5));
    }

    #[test]
    fn tags_reject_other_types() {
        let col = f64::wrap(Column::new(1, vec![0.0], 2));
        assert!(f64::unwrap(&col).is_some());
        assert!(i32::unwrap(&col).is_none());
        assert_eq!(col.scalar_type(), ScalarType::F64);
        let rows = u64::wrap_rows(vec![1, 2]);
        assert_eq!(u64::unwrap_rows(&rows), Some(&[1u64, 2][..]));
        assert!(f32::unwrap_rows(&rows).is_none());
        assert_eq!(rows.as_row(), AttributeRow::U64(&[1, 2]));
    }

    #[test]
    fn bit_patterns_round_trip() {
        assert_eq!(i32::from_word((-5i32).to_word()), -5);
        assert_eq!((-5i32).to_word() >> 32, 0);
        assert_eq!(i64::from_word(i64::MIN.to_word()), i64::MIN);
        assert_eq!(f32::from_word(1.5f32.to_word()), 1.5);
        assert!(f64::from_word(f64::NAN.to_word()).is_nan());
    }
}
