//! Tables
//!
//! A table is an ordered list of [`TablePage`]s, sorted by the key column
//! across page boundaries, plus one bitmap [`Index`] per indexed column. The
//! page list and the indexes are described by `table.json` in the table
//! directory; pages themselves live in the [`PageStore`].
//!
//! Every structural change to the page list goes through [`Table::reshape`]
//! so all indexes see the same sequence of page insertions, updates and
//! removals.

mod page;
mod select;
mod verify;

pub use page::TablePage;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pagedb_common::error::{Result, SchemaError, StorageError, ValidationError};
use pagedb_common::{metrics, CompareOp, Record, Value, TOUCH_DATE};

use crate::catalog::ColumnDescriptor;
use crate::index::Index;
use crate::paging::locate_start;
use crate::store::{PageId, PageStore};
use crate::StorageOptions;

const DESCRIPTOR_FILE: &str = "table.json";

/// Persisted shape of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub key_column: String,
    /// Page ids in key order; position is the page number
    pub pages: Vec<PageId>,
    pub indices: BTreeMap<String, Index<Value>>,
}

/// A structural change to the page list, mirrored into every index
#[derive(Debug, Clone, Copy)]
pub enum PageChange<'a> {
    Inserted { number: usize, page: &'a TablePage },
    Updated { number: usize, page: &'a TablePage },
    Removed { number: usize },
}

impl PageChange<'_> {
    fn label(&self) -> &'static str {
        match self {
            PageChange::Inserted { .. } => "inserted",
            PageChange::Updated { .. } => "updated",
            PageChange::Removed { .. } => "removed",
        }
    }
}

/// An open table
#[derive(Debug)]
pub struct Table {
    descriptor: TableDescriptor,
    columns: Vec<ColumnDescriptor>,
    store: PageStore,
}

impl Table {
    /// Create an empty table in `dir`
    pub fn create(
        dir: impl Into<PathBuf>,
        name: &str,
        key_column: &str,
        columns: Vec<ColumnDescriptor>,
        options: StorageOptions,
    ) -> Result<Self> {
        let store = PageStore::new(dir, options);
        store.init_layout()?;

        let table = Self {
            descriptor: TableDescriptor {
                name: name.to_string(),
                key_column: key_column.to_string(),
                pages: Vec::new(),
                indices: BTreeMap::new(),
            },
            columns,
            store,
        };
        table.save()?;
        info!("Created table {} keyed on {}", name, key_column);
        Ok(table)
    }

    /// Open the table stored in `dir`, attaching its catalog columns
    pub fn open(
        dir: impl Into<PathBuf>,
        columns: Vec<ColumnDescriptor>,
        options: StorageOptions,
    ) -> Result<Self> {
        let store = PageStore::new(dir, options);
        let path = store.root().join(DESCRIPTOR_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            StorageError::ReadFailed(format!("table descriptor {}: {e}", path.display()))
        })?;
        let descriptor: TableDescriptor = serde_json::from_str(&content).map_err(|e| {
            StorageError::CorruptData(format!("table descriptor {}: {e}", path.display()))
        })?;
        Ok(Self {
            descriptor,
            columns,
            store,
        })
    }

    fn save(&self) -> Result<()> {
        let path = self.store.root().join(DESCRIPTOR_FILE);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&self.descriptor)?;
        fs::write(&tmp, content)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| {
                StorageError::WriteFailed(format!("table descriptor {}: {e}", path.display()))
            })?;
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn key_column(&self) -> &str {
        &self.descriptor.key_column
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn page_ids(&self) -> &[PageId] {
        &self.descriptor.pages
    }

    pub fn page_count(&self) -> usize {
        self.descriptor.pages.len()
    }

    /// Load the page at `number`
    pub fn load_page(&self, number: usize) -> Result<TablePage> {
        let id = self.descriptor.pages.get(number).copied().ok_or_else(|| {
            StorageError::ReadFailed(format!(
                "table {} has no page {number}",
                self.descriptor.name
            ))
        })?;
        self.store.read_table_page(id)
    }

    pub fn index(&self, column: &str) -> Option<&Index<Value>> {
        self.descriptor.indices.get(column)
    }

    pub fn is_indexed(&self, column: &str) -> bool {
        self.descriptor.indices.contains_key(column)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store a record, stamping its touch date
    pub fn insert(&mut self, mut record: Record) -> Result<()> {
        record.insert(TOUCH_DATE, Utc::now());
        let touched = self.insert_stamped(record)?;
        self.save()?;
        metrics::record_write("insert", touched);
        Ok(())
    }

    /// Insert in key order; returns the number of pages written
    fn insert_stamped(&mut self, record: Record) -> Result<usize> {
        let key_column = self.descriptor.key_column.clone();
        let key = record
            .get(&key_column)
            .cloned()
            .ok_or_else(|| ValidationError::MissingColumn(key_column.clone()))?;

        let start = locate_start(self.page_count(), |number| {
            let page = self.load_page(number)?;
            Ok::<_, pagedb_common::Error>(page.first_key(&key_column).is_some_and(|first| *first >= key))
        })?;

        let mut touched = 0;
        let mut carry = Some(record);
        let mut number = start;
        while number < self.page_count() {
            let Some(record) = carry.take() else { break };
            let mut page = self.load_page(number)?;
            carry = page.insert(record, &key_column);
            if page.is_dirty() {
                self.store.write_table_page(&mut page)?;
                self.reshape(PageChange::Updated { number, page: &page })?;
                touched += 1;
            }
            if carry.is_some() {
                debug!("Page {} of {} overflowed", number, self.descriptor.name);
            }
            number += 1;
        }

        if let Some(record) = carry {
            let mut page = self.store.new_table_page();
            // a fresh page always has room
            let _ = page.insert(record, &key_column);
            self.store.write_table_page(&mut page)?;
            let number = self.page_count();
            self.descriptor.pages.push(page.id());
            self.reshape(PageChange::Inserted { number, page: &page })?;
            touched += 1;
            debug!(
                "Appended page {} to {} ({} pages)",
                page.id(),
                self.descriptor.name,
                self.page_count()
            );
        }
        Ok(touched)
    }

    /// Overwrite the fields of `mask` on every record whose `match_column`
    /// equals the mask's; returns the number of records updated.
    ///
    /// Updating on a non-key column moves the matched records out of their
    /// pages and reinserts them in key order.
    pub fn update(&mut self, match_column: &str, mask: &Record) -> Result<usize> {
        let target = mask
            .get(match_column)
            .cloned()
            .ok_or_else(|| ValidationError::MissingColumn(match_column.to_string()))?;
        let candidates = self.equality_candidates(match_column, &target)?;
        let key_column = self.descriptor.key_column.clone();
        let touched_at = Utc::now();

        let mut updated = 0;
        let mut moved = Vec::new();
        let touched = self.rewrite_pages(&candidates, |page| {
            let (count, records) = page.update(match_column, mask, &key_column, touched_at);
            updated += count;
            moved.extend(records);
        })?;

        let mut reinserted = 0;
        for record in moved {
            reinserted += self.insert_stamped(record)?;
        }
        self.save()?;
        metrics::record_write("update", touched + reinserted);
        debug!("Updated {} records of {}", updated, self.descriptor.name);
        Ok(updated)
    }

    /// Remove every record matching all fields of `mask`; returns the number
    /// of records removed. An empty mask removes everything.
    pub fn delete(&mut self, mask: &Record) -> Result<usize> {
        let candidates = match mask.iter().find(|(column, _)| self.is_indexed(column)) {
            Some((column, value)) => self.equality_candidates(column, value)?,
            None => vec![true; self.page_count()],
        };

        let mut removed = 0;
        let touched = self.rewrite_pages(&candidates, |page| {
            removed += page.delete(mask);
        })?;

        self.save()?;
        metrics::record_write("delete", touched);
        debug!("Deleted {} records from {}", removed, self.descriptor.name);
        Ok(removed)
    }

    /// Pages that may hold `column == value`: every page unless the column
    /// is indexed
    fn equality_candidates(&self, column: &str, value: &Value) -> Result<Vec<bool>> {
        match self.descriptor.indices.get(column) {
            Some(index) => Ok(index
                .query(&self.store, CompareOp::Eq, value)?
                .candidate_pages()),
            None => Ok(vec![true; self.page_count()]),
        }
    }

    /// Apply `mutate` to every candidate page, persisting and reshaping the
    /// ones that change and dropping the ones left empty. Returns the number
    /// of pages written.
    fn rewrite_pages(
        &mut self,
        candidates: &[bool],
        mut mutate: impl FnMut(&mut TablePage),
    ) -> Result<usize> {
        let plan: Vec<PageId> = self
            .descriptor
            .pages
            .iter()
            .zip(candidates)
            .filter(|(_, &candidate)| candidate)
            .map(|(&id, _)| id)
            .collect();

        let mut touched = 0;
        for id in plan {
            let Some(number) = self.descriptor.pages.iter().position(|&p| p == id) else {
                continue;
            };
            let mut page = self.store.read_table_page(id)?;
            mutate(&mut page);
            if !page.is_dirty() {
                continue;
            }
            self.store.write_table_page(&mut page)?;
            touched += 1;
            if page.is_empty() {
                self.descriptor.pages.remove(number);
                self.reshape(PageChange::Removed { number })?;
                debug!("Dropped empty page {} from {}", id, self.descriptor.name);
            } else {
                self.reshape(PageChange::Updated {
                    number,
                    page: &page,
                })?;
            }
        }
        Ok(touched)
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Mirror one page list change into every index
    pub fn reshape(&mut self, change: PageChange<'_>) -> Result<()> {
        for (column, index) in &mut self.descriptor.indices {
            match change {
                PageChange::Inserted { number, page } => {
                    index.insert_page(&self.store, number, &page.values(column)?)?;
                }
                PageChange::Updated { number, page } => {
                    index.update_page(&self.store, number, &page.values(column)?)?;
                }
                PageChange::Removed { number } => index.delete_page(&self.store, number)?,
            }
            metrics::record_index_reshape(change.label());
        }
        Ok(())
    }

    /// Build a bitmap index on `column` from the existing pages
    pub fn create_bitmap_index(&mut self, column: &str) -> Result<()> {
        if self.is_indexed(column) {
            return Err(SchemaError::AlreadyIndexed {
                table: self.descriptor.name.clone(),
                column: column.to_string(),
            }
            .into());
        }
        if !self.columns.iter().any(|c| c.column == column) {
            return Err(SchemaError::ColumnNotFound {
                table: self.descriptor.name.clone(),
                column: column.to_string(),
            }
            .into());
        }

        self.store.init_index_dir(column)?;
        let mut index = Index::new(column);
        for number in 0..self.page_count() {
            let page = self.load_page(number)?;
            index.insert_page(&self.store, number, &page.values(column)?)?;
        }

        info!(
            "Created bitmap index on {}.{} over {} pages ({} index pages)",
            self.descriptor.name,
            column,
            self.page_count(),
            index.page_ids().len()
        );
        self.descriptor.indices.insert(column.to_string(), index);
        self.save()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Every record, in key order
    pub fn select_all(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for number in 0..self.page_count() {
            records.extend_from_slice(self.load_page(number)?.records());
        }
        Ok(records)
    }
}
