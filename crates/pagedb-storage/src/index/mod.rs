//! Bitmap indexes
//!
//! An [`Index`] covers one column of a table. Every distinct value of the
//! column owns exactly one [`PresenceMatrix`], and the matrices are spread
//! over pivot-sorted [`IndexPage`]s that overflow into each other the same
//! way table pages do. The index also tracks the row count of every table
//! page so new matrices can be shaped like the table.

mod bitmap;
mod page;

pub use bitmap::{Bitmap, PresenceMatrix};
pub use page::IndexPage;

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pagedb_common::error::{Result, StorageError};
use pagedb_common::metrics;
use pagedb_common::CompareOp;

use crate::paging::locate_start;
use crate::store::{PageId, PageStore};

/// A value type that can pivot a presence matrix
pub trait IndexKey: Ord + Clone + Debug + Serialize + DeserializeOwned {}

impl<T> IndexKey for T where T: Ord + Clone + Debug + Serialize + DeserializeOwned {}

/// Per-column bitmap index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index<V> {
    column: String,
    pages: Vec<PageId>,
    sizes: Vec<usize>,
    #[serde(skip)]
    marker: PhantomData<fn() -> V>,
}

impl<V: IndexKey> Index<V> {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            pages: Vec::new(),
            sizes: Vec::new(),
            marker: PhantomData,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Index page ids in pivot order
    pub fn page_ids(&self) -> &[PageId] {
        &self.pages
    }

    /// Row count of every table page, by page number
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Load every index page in pivot order
    pub fn load_pages(&self, store: &PageStore) -> Result<Vec<IndexPage<V>>> {
        self.pages
            .iter()
            .map(|&id| store.read_index_page(&self.column, id))
            .collect()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// A table page holding `values` was inserted at `page_number`
    pub fn insert_page(&mut self, store: &PageStore, page_number: usize, values: &[V]) -> Result<()> {
        if page_number > self.sizes.len() {
            return Err(self.out_of_range(page_number));
        }
        self.sizes.insert(page_number, values.len());

        let mut tracked = BTreeSet::new();
        for &id in &self.pages {
            let mut page: IndexPage<V> = store.read_index_page(&self.column, id)?;
            page.insert_row(page_number, values)?;
            tracked.extend(page.pivots().cloned());
            store.write_index_page(&self.column, &page)?;
        }

        self.track_new_values(store, page_number, values, &tracked)
    }

    /// The table page at `page_number` now holds `values`
    pub fn update_page(&mut self, store: &PageStore, page_number: usize, values: &[V]) -> Result<()> {
        if page_number >= self.sizes.len() {
            return Err(self.out_of_range(page_number));
        }
        self.sizes[page_number] = values.len();

        let mut tracked = BTreeSet::new();
        let mut emptied = Vec::new();
        for &id in &self.pages {
            let mut page: IndexPage<V> = store.read_index_page(&self.column, id)?;
            let dropped = page.replace_row(page_number, values)?;
            tracked.extend(page.pivots().cloned());
            store.write_index_page(&self.column, &page)?;
            self.note_dropped(dropped, &page, &mut emptied);
        }
        self.pages.retain(|id| !emptied.contains(id));

        self.track_new_values(store, page_number, values, &tracked)
    }

    /// The table page at `page_number` was dropped; later pages shift down
    pub fn delete_page(&mut self, store: &PageStore, page_number: usize) -> Result<()> {
        if page_number >= self.sizes.len() {
            return Err(self.out_of_range(page_number));
        }
        self.sizes.remove(page_number);

        let mut emptied = Vec::new();
        for &id in &self.pages {
            let mut page: IndexPage<V> = store.read_index_page(&self.column, id)?;
            let dropped = page.remove_row(page_number)?;
            store.write_index_page(&self.column, &page)?;
            self.note_dropped(dropped, &page, &mut emptied);
        }
        self.pages.retain(|id| !emptied.contains(id));
        Ok(())
    }

    fn out_of_range(&self, page_number: usize) -> pagedb_common::Error {
        StorageError::CorruptData(format!(
            "index on {} tracks {} table pages, got page number {page_number}",
            self.column,
            self.sizes.len()
        ))
        .into()
    }

    fn note_dropped(&self, dropped: usize, page: &IndexPage<V>, emptied: &mut Vec<PageId>) {
        for _ in 0..dropped {
            metrics::record_matrix_lifecycle("destroyed");
        }
        if page.is_empty() {
            debug!("Index page {} on column {} emptied", page.id(), self.column);
            emptied.push(page.id());
        }
    }

    /// Give every value of `values` not already in `tracked` its own matrix
    fn track_new_values(
        &mut self,
        store: &PageStore,
        page_number: usize,
        values: &[V],
        tracked: &BTreeSet<V>,
    ) -> Result<()> {
        let fresh: BTreeSet<&V> = values.iter().filter(|v| !tracked.contains(*v)).collect();
        for value in fresh {
            let matrix = PresenceMatrix::new(value.clone(), &self.sizes, page_number, values)?;
            self.insert_new_value(store, matrix)?;
        }
        Ok(())
    }

    /// Place a new matrix in pivot order, chaining overflow through later
    /// pages and appending a page when the last one overflows
    pub fn insert_new_value(&mut self, store: &PageStore, matrix: PresenceMatrix<V>) -> Result<()> {
        metrics::record_matrix_lifecycle("created");

        let pivot = matrix.pivot().clone();
        let start = locate_start(self.pages.len(), |n| {
            let page: IndexPage<V> = store.read_index_page(&self.column, self.pages[n])?;
            Ok::<_, pagedb_common::Error>(page.first_pivot().is_some_and(|first| *first >= pivot))
        })?;

        let mut carry = Some(matrix);
        for &id in self.pages.iter().skip(start) {
            let Some(matrix) = carry.take() else { break };
            let mut page: IndexPage<V> = store.read_index_page(&self.column, id)?;
            let placement = page.insert_matrix(matrix);
            if placement.changed() {
                store.write_index_page(&self.column, &page)?;
            }
            carry = placement.into_overflow();
        }

        if let Some(matrix) = carry {
            let mut page = store.new_index_page::<V>(&self.column);
            // a fresh page always has room
            let _ = page.insert_matrix(matrix);
            store.write_index_page(&self.column, &page)?;
            debug!(
                "Created index page {} on column {} ({} pages)",
                page.id(),
                self.column,
                self.pages.len() + 1
            );
            self.pages.push(page.id());
        }
        Ok(())
    }

    // ========================================================================
    // Query
    // ========================================================================

    /// Rows whose value satisfies `<row value> op target`
    pub fn query(&self, store: &PageStore, op: CompareOp, target: &V) -> Result<Bitmap> {
        match op {
            CompareOp::Eq => self.equal_to(store, target),
            CompareOp::Ne => Ok(self.equal_to(store, target)?.complement()),
            CompareOp::Lt => self.below(store, target, false),
            CompareOp::Le => self.below(store, target, true),
            CompareOp::Gt => Ok(self.below(store, target, true)?.complement()),
            CompareOp::Ge => Ok(self.below(store, target, false)?.complement()),
        }
    }

    fn equal_to(&self, store: &PageStore, target: &V) -> Result<Bitmap> {
        for &id in &self.pages {
            let page: IndexPage<V> = store.read_index_page(&self.column, id)?;
            if page.first_pivot().is_some_and(|first| first > target) {
                break;
            }
            if let Some(matrix) = page.find(target) {
                return Ok(matrix.bits().clone());
            }
        }
        Ok(Bitmap::empty(&self.sizes))
    }

    fn below(&self, store: &PageStore, target: &V, inclusive: bool) -> Result<Bitmap> {
        let mut acc = Bitmap::empty(&self.sizes);
        for &id in &self.pages {
            let page: IndexPage<V> = store.read_index_page(&self.column, id)?;
            if !page.union_below(target, inclusive, &mut acc) {
                break;
            }
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageOptions;

    fn store(dir: &std::path::Path, index_capacity: usize) -> PageStore {
        let store = PageStore::new(dir, StorageOptions::with_capacities(2, index_capacity));
        store.init_layout().unwrap();
        store.init_index_dir("v").unwrap();
        store
    }

    fn all_pivots(index: &Index<i32>, store: &PageStore) -> Vec<Vec<i32>> {
        index
            .load_pages(store)
            .unwrap()
            .iter()
            .map(|page| page.pivots().copied().collect())
            .collect()
    }

    #[test]
    fn test_insert_pages_spreads_pivots_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 2);
        let mut index = Index::new("v");

        index.insert_page(&store, 0, &[5, 1]).unwrap();
        index.insert_page(&store, 1, &[3, 9]).unwrap();
        index.insert_page(&store, 2, &[1, 7]).unwrap();

        assert_eq!(index.sizes(), &[2, 2, 2]);
        assert_eq!(all_pivots(&index, &store), vec![vec![1, 3], vec![5, 7], vec![9]]);

        let ones = index.query(&store, CompareOp::Eq, &1).unwrap();
        assert_eq!(ones.ones().collect::<Vec<_>>(), vec![(0, 1), (2, 0)]);
    }

    #[test]
    fn test_range_queries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 2);
        let mut index = Index::new("v");
        index.insert_page(&store, 0, &[1, 2]).unwrap();
        index.insert_page(&store, 1, &[3, 4]).unwrap();

        let count = |op, target| index.query(&store, op, &target).unwrap().count_ones();
        assert_eq!(count(CompareOp::Lt, 3), 2);
        assert_eq!(count(CompareOp::Le, 3), 3);
        assert_eq!(count(CompareOp::Gt, 3), 1);
        assert_eq!(count(CompareOp::Ge, 3), 2);
        assert_eq!(count(CompareOp::Ne, 3), 3);
        assert_eq!(count(CompareOp::Eq, 10), 0);
        assert_eq!(count(CompareOp::Lt, 0), 0);
    }

    #[test]
    fn test_update_and_delete_pages_drop_dead_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1);
        let mut index = Index::new("v");
        index.insert_page(&store, 0, &[1, 2]).unwrap();
        index.insert_page(&store, 1, &[3]).unwrap();
        assert_eq!(index.page_ids().len(), 3);

        index.update_page(&store, 0, &[2, 4]).unwrap();
        assert_eq!(all_pivots(&index, &store), vec![vec![2], vec![3], vec![4]]);

        index.delete_page(&store, 1).unwrap();
        assert_eq!(index.sizes(), &[2]);
        assert_eq!(all_pivots(&index, &store), vec![vec![2], vec![4]]);
        assert!(index.query(&store, CompareOp::Eq, &3).unwrap().is_clear());
    }

    #[test]
    fn test_empty_index_query_is_all_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 2);
        let index: Index<i32> = Index::new("v");
        let bits = index.query(&store, CompareOp::Le, &5).unwrap();
        assert!(bits.is_clear());
        assert_eq!(bits.page_count(), 0);
    }

    #[test]
    fn test_stale_index_page_is_corrupt_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 2);
        let mut index = Index::new("v");
        index.insert_page(&store, 0, &[1, 2]).unwrap();
        let stale = index.load_pages(&store).unwrap().remove(0);

        index.insert_page(&store, 1, &[3]).unwrap();
        assert_eq!(index.page_ids().len(), 2);
        store.write_index_page("v", &stale).unwrap();

        assert!(matches!(
            index.update_page(&store, 1, &[4]),
            Err(pagedb_common::Error::Storage(StorageError::CorruptData(_)))
        ));
    }

    #[test]
    fn test_bad_page_number_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 2);
        let mut index: Index<i32> = Index::new("v");
        assert!(index.insert_page(&store, 1, &[1]).is_err());
        assert!(index.delete_page(&store, 0).is_err());
    }
}
