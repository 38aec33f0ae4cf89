//! Table pages
//!
//! A page holds up to `capacity` records sorted ascending by the table's key
//! column. Records with equal keys keep their arrival order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pagedb_common::error::{Result, StorageError};
use pagedb_common::{Record, Value, TOUCH_DATE};

use crate::paging::insert_bounded;
use crate::store::PageId;

/// Bounded, key-sorted block of records; the unit of row storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePage {
    id: PageId,
    capacity: usize,
    records: Vec<Record>,
    #[serde(skip)]
    dirty: bool,
}

impl TablePage {
    pub fn new(id: PageId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            records: Vec::with_capacity(capacity),
            dirty: false,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, row: usize) -> Option<&Record> {
        self.records.get(row)
    }

    /// Smallest key on the page
    pub fn first_key(&self, key_column: &str) -> Option<&Value> {
        self.records.first().and_then(|record| record.get(key_column))
    }

    /// Whether the page changed since it was last read or written
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Insert in key order.
    ///
    /// Returns the record that no longer fits: the evicted tail of a full
    /// page, or `record` itself when it sorts after everything on a full page
    /// (the page is then left untouched and stays clean).
    pub fn insert(&mut self, record: Record, key_column: &str) -> Option<Record> {
        let key = record.get(key_column).cloned();
        let placement = insert_bounded(&mut self.records, record, self.capacity, |existing| {
            existing.get(key_column) > key.as_ref()
        });
        if placement.changed() {
            self.dirty = true;
        }
        placement.into_overflow()
    }

    /// Overwrite every record whose `match_column` equals the mask's value.
    ///
    /// Updated records get `touched_at` as their touch date. When
    /// `match_column` is not the key column the updated records leave the
    /// page and are returned so the caller can reinsert them in key order.
    /// Returns the number of records updated alongside the moved ones.
    pub fn update(
        &mut self,
        match_column: &str,
        mask: &Record,
        key_column: &str,
        touched_at: DateTime<Utc>,
    ) -> (usize, Vec<Record>) {
        let Some(target) = mask.get(match_column) else {
            return (0, Vec::new());
        };
        let in_place = match_column == key_column;

        let mut updated = 0;
        let mut moved = Vec::new();
        let mut kept = Vec::with_capacity(self.records.len());
        for mut record in self.records.drain(..) {
            if record.get(match_column) != Some(target) {
                kept.push(record);
                continue;
            }
            record.overwrite(mask);
            record.insert(TOUCH_DATE, touched_at);
            updated += 1;
            if in_place {
                kept.push(record);
            } else {
                moved.push(record);
            }
        }
        self.records = kept;

        if updated > 0 {
            self.dirty = true;
        }
        (updated, moved)
    }

    /// Remove every record matching all fields of `mask`
    pub fn delete(&mut self, mask: &Record) -> usize {
        let before = self.records.len();
        self.records.retain(|record| !record.matches(mask));
        let removed = before - self.records.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// The column's value for every record, in page order
    pub fn values(&self, column: &str) -> Result<Vec<Value>> {
        self.records
            .iter()
            .enumerate()
            .map(|(row, record)| {
                record.get(column).cloned().ok_or_else(|| {
                    StorageError::CorruptData(format!(
                        "table page {} row {row} has no value for column {column}",
                        self.id
                    ))
                    .into()
                })
            })
            .collect()
    }
}
