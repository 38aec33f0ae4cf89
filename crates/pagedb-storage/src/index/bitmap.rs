//! Page-shaped bitmaps
//!
//! A [`Bitmap`] has one row per table page and one bit per record slot of
//! that page. Each row is a [`RoaringBitmap`] of set slots together with the
//! page's row count, so mostly-false rows stay small on disk. A
//! [`PresenceMatrix`] pairs a bitmap with the value whose occurrences it
//! marks.

use std::ops::{BitAnd, BitOr, BitOrAssign, BitXor};

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use pagedb_common::error::{Result, StorageError};

/// Slot bound for a page of `len` rows; page capacities are validated to fit in `u32`
fn slot_bound(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Set slots of one table page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Row {
    len: usize,
    #[serde(with = "roaring_bytes")]
    bits: RoaringBitmap,
}

impl Row {
    fn new(len: usize, bits: RoaringBitmap) -> Self {
        Self { len, bits }
    }

    fn clear(len: usize) -> Self {
        Self::new(len, RoaringBitmap::new())
    }

    fn complement(self) -> Self {
        let mut full = RoaringBitmap::new();
        full.insert_range(0..slot_bound(self.len));
        Self::new(self.len, full - &self.bits)
    }
}

/// Boolean grid shaped like a table: one row of slots per page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bitmap {
    rows: Vec<Row>,
}

impl Bitmap {
    /// All-false grid with the given row counts per page
    pub fn empty(sizes: &[usize]) -> Self {
        Self {
            rows: sizes.iter().map(|&len| Row::clear(len)).collect(),
        }
    }

    /// Row count of every page
    pub fn shape(&self) -> Vec<usize> {
        self.rows.iter().map(|row| row.len).collect()
    }

    pub fn page_count(&self) -> usize {
        self.rows.len()
    }

    /// Set slots of `page`
    pub fn row(&self, page: usize) -> Option<&RoaringBitmap> {
        self.rows.get(page).map(|row| &row.bits)
    }

    pub fn get(&self, page: usize, slot: usize) -> bool {
        match (self.rows.get(page), u32::try_from(slot)) {
            (Some(row), Ok(slot)) => row.bits.contains(slot),
            _ => false,
        }
    }

    /// Whether any slot of `page` is set
    pub fn page_has_any(&self, page: usize) -> bool {
        self.rows.get(page).is_some_and(|row| !row.bits.is_empty())
    }

    /// True when no bit is set anywhere
    pub fn is_clear(&self) -> bool {
        self.rows.iter().all(|row| row.bits.is_empty())
    }

    pub fn count_ones(&self) -> u64 {
        self.rows.iter().map(|row| row.bits.len()).sum()
    }

    /// Set positions as `(page, slot)` pairs, in page order
    pub fn ones(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(page, row)| row.bits.iter().map(move |slot| (page, slot as usize)))
    }

    /// Pages with at least one bit set
    pub fn candidate_pages(&self) -> Vec<bool> {
        self.rows.iter().map(|row| !row.bits.is_empty()).collect()
    }

    /// Bitwise NOT within each page's row count
    #[must_use]
    pub fn complement(self) -> Self {
        Self {
            rows: self.rows.into_iter().map(Row::complement).collect(),
        }
    }

    /// A page of `len` rows with `bits` set was inserted at `page`
    pub fn insert_row(&mut self, page: usize, len: usize, bits: RoaringBitmap) -> Result<()> {
        if page > self.rows.len() {
            return Err(self.missing_row(page));
        }
        self.rows.insert(page, Row::new(len, bits));
        Ok(())
    }

    /// Page `page` now holds `len` rows with `bits` set
    pub fn replace_row(&mut self, page: usize, len: usize, bits: RoaringBitmap) -> Result<()> {
        if let Some(row) = self.rows.get_mut(page) {
            *row = Row::new(len, bits);
            return Ok(());
        }
        Err(self.missing_row(page))
    }

    pub fn remove_row(&mut self, page: usize) -> Result<()> {
        if page >= self.rows.len() {
            return Err(self.missing_row(page));
        }
        self.rows.remove(page);
        Ok(())
    }

    fn missing_row(&self, page: usize) -> pagedb_common::Error {
        StorageError::CorruptData(format!(
            "bitmap has {} page rows, got page {page}",
            self.rows.len()
        ))
        .into()
    }

    fn zip_rows(
        &self,
        other: &Bitmap,
        op: impl Fn(&RoaringBitmap, &RoaringBitmap) -> RoaringBitmap,
    ) -> Bitmap {
        debug_assert_eq!(self.shape(), other.shape(), "bitmap shapes differ");
        Bitmap {
            rows: self
                .rows
                .iter()
                .zip(&other.rows)
                .map(|(mine, theirs)| Row::new(mine.len, op(&mine.bits, &theirs.bits)))
                .collect(),
        }
    }
}

impl BitAnd for &Bitmap {
    type Output = Bitmap;

    fn bitand(self, other: &Bitmap) -> Bitmap {
        self.zip_rows(other, |a, b| a & b)
    }
}

impl BitOr for &Bitmap {
    type Output = Bitmap;

    fn bitor(self, other: &Bitmap) -> Bitmap {
        self.zip_rows(other, |a, b| a | b)
    }
}

impl BitXor for &Bitmap {
    type Output = Bitmap;

    fn bitxor(self, other: &Bitmap) -> Bitmap {
        self.zip_rows(other, |a, b| a ^ b)
    }
}

impl BitOrAssign<&Bitmap> for Bitmap {
    fn bitor_assign(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.shape(), other.shape(), "bitmap shapes differ");
        for (mine, theirs) in self.rows.iter_mut().zip(&other.rows) {
            mine.bits |= &theirs.bits;
        }
    }
}

/// Occurrences of one pivot value across the whole table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMatrix<V> {
    pivot: V,
    bits: Bitmap,
}

impl<V: PartialEq> PresenceMatrix<V> {
    /// Matrix for a value first seen in `values`, the contents of table page
    /// `page`; every other page is all-false. `sizes` already includes `page`.
    pub fn new(pivot: V, sizes: &[usize], page: usize, values: &[V]) -> Result<Self> {
        let mut bits = Bitmap::empty(sizes);
        bits.replace_row(page, values.len(), membership(&pivot, values))?;
        Ok(Self { pivot, bits })
    }

    pub fn pivot(&self) -> &V {
        &self.pivot
    }

    pub fn bits(&self) -> &Bitmap {
        &self.bits
    }

    /// A table page was inserted at `page`
    pub fn insert_row(&mut self, page: usize, values: &[V]) -> Result<()> {
        let row = membership(&self.pivot, values);
        self.bits.insert_row(page, values.len(), row)
    }

    /// Table page `page` now holds `values`
    pub fn replace_row(&mut self, page: usize, values: &[V]) -> Result<()> {
        let row = membership(&self.pivot, values);
        self.bits.replace_row(page, values.len(), row)
    }

    /// Table page `page` was dropped
    pub fn remove_row(&mut self, page: usize) -> Result<()> {
        self.bits.remove_row(page)
    }

    /// A matrix with no bit set marks a value that no longer exists
    pub fn is_dead(&self) -> bool {
        self.bits.is_clear()
    }
}

/// Slots of `values` equal to `pivot`
fn membership<V: PartialEq>(pivot: &V, values: &[V]) -> RoaringBitmap {
    (0u32..)
        .zip(values)
        .filter_map(|(slot, value)| (value == pivot).then_some(slot))
        .collect()
}

/// Stores a [`RoaringBitmap`] in its portable serialized form
mod roaring_bytes {
    use roaring::RoaringBitmap;
    use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bits: &RoaringBitmap, serializer: S) -> Result<S::Ok, S::Error> {
        let mut bytes = Vec::with_capacity(bits.serialized_size());
        bits.serialize_into(&mut bytes).map_err(<S::Error as ser::Error>::custom)?;
        bytes.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RoaringBitmap, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        RoaringBitmap::deserialize_from(bytes.as_slice()).map_err(<D::Error as de::Error>::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(bitmap: &Bitmap, page: usize) -> Vec<u32> {
        bitmap.row(page).map(|row| row.iter().collect()).unwrap_or_default()
    }

    #[test]
    fn test_new_matrix_marks_only_its_page() {
        let matrix = PresenceMatrix::new(7, &[2, 3], 1, &[7, 1, 7]).unwrap();
        assert_eq!(matrix.bits().shape(), vec![2, 3]);
        assert!(slots(matrix.bits(), 0).is_empty());
        assert_eq!(slots(matrix.bits(), 1), vec![0, 2]);
        assert_eq!(matrix.bits().count_ones(), 2);
    }

    #[test]
    fn test_rows_follow_page_changes() {
        let mut matrix = PresenceMatrix::new("a", &[1], 0, &["a"]).unwrap();
        matrix.insert_row(1, &["b", "a"]).unwrap();
        assert_eq!(matrix.bits().ones().collect::<Vec<_>>(), vec![(0, 0), (1, 1)]);

        matrix.replace_row(0, &["c"]).unwrap();
        assert!(!matrix.bits().page_has_any(0));
        matrix.remove_row(0).unwrap();
        assert_eq!(matrix.bits().shape(), vec![2]);
        assert!(!matrix.is_dead());

        matrix.replace_row(0, &["b", "b"]).unwrap();
        assert!(matrix.is_dead());
    }

    #[test]
    fn test_missing_rows_are_corrupt_data() {
        let mut matrix = PresenceMatrix::new(1, &[2], 0, &[1, 2]).unwrap();
        assert!(matches!(
            matrix.replace_row(3, &[1]),
            Err(pagedb_common::Error::Storage(StorageError::CorruptData(_)))
        ));
        assert!(matrix.remove_row(1).is_err());
        assert!(matrix.insert_row(2, &[1]).is_err());
        assert!(PresenceMatrix::new(1, &[2], 1, &[1]).is_err());
        assert_eq!(matrix.bits().shape(), vec![2]);
    }

    #[test]
    fn test_set_operations_and_complement() {
        let a = PresenceMatrix::new(1, &[2, 1], 0, &[1, 2]).unwrap();
        let b = PresenceMatrix::new(1, &[2, 1], 1, &[1]).unwrap();
        let c = PresenceMatrix::new(2, &[2, 1], 0, &[1, 2]).unwrap();
        let (a, b, c) = (a.bits(), b.bits(), c.bits());

        let mut union = a.clone();
        union |= b;
        assert_eq!(union, a | b);
        assert_eq!(union.candidate_pages(), vec![true, true]);
        assert!((a & b).is_clear());
        assert_eq!((&union ^ a).ones().collect::<Vec<_>>(), vec![(1, 0)]);

        let flipped = union.complement();
        assert_eq!(flipped.ones().collect::<Vec<_>>(), vec![(0, 1)]);
        assert_eq!(&flipped, c);
        assert!(Bitmap::empty(&[3, 0]).is_clear());
        assert_eq!(Bitmap::empty(&[3, 0]).complement().count_ones(), 3);
    }

    #[test]
    fn test_sparse_matrix_encodes_compactly() {
        let sizes = vec![200; 50];
        let mut values = vec![0; 200];
        values[17] = 1;
        let matrix = PresenceMatrix::new(1, &sizes, 25, &values).unwrap();

        let bytes = bincode::serialize(&matrix).unwrap();
        let bits: usize = sizes.iter().sum();
        assert!(bytes.len() * 4 < bits, "{} bytes for {bits} bits", bytes.len());

        let decoded: PresenceMatrix<i32> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, matrix);
        assert_eq!(decoded.bits().ones().collect::<Vec<_>>(), vec![(25, 17)]);
    }
}
