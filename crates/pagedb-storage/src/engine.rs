//! Main storage engine implementation
//!
//! The engine validates every request against the catalog and routes it to
//! the table it names. Tables are opened from disk for the duration of one
//! call; nothing is cached between calls.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use pagedb_common::config::StorageConfig;
use pagedb_common::error::{Result, StorageError, ValidationError};
use pagedb_common::{Combinator, Record, Term};

use crate::catalog::Catalog;
use crate::table::Table;
use crate::StorageOptions;

/// Records produced by a select: finite, consumed once.
///
/// The table pages a select touches are read while the select runs, so the
/// records are already in memory when the set is handed out; only iteration
/// is deferred. Collapsing duplicate records and reporting an exact `len()`
/// both need the full result.
#[derive(Debug)]
pub struct ResultSet {
    records: std::vec::IntoIter<Record>,
}

impl ResultSet {
    fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl Iterator for ResultSet {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.records.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for ResultSet {}

/// Main storage engine routing requests to tables
#[derive(Debug)]
pub struct StorageEngine {
    /// Data directory
    root: PathBuf,
    /// Options handed to every table
    options: StorageOptions,
    /// Table schemas
    catalog: Catalog,
}

impl StorageEngine {
    /// Open the engine over `config.data_dir`, creating it when missing
    pub fn open(config: &StorageConfig) -> Result<Self> {
        Self::with_options(StorageOptions::try_from(config)?)
    }

    pub fn with_options(options: StorageOptions) -> Result<Self> {
        let root = PathBuf::from(&options.path);
        info!("Initializing storage engine at {}", root.display());

        fs::create_dir_all(&root).map_err(|e| {
            StorageError::WriteFailed(format!("cannot create {}: {e}", root.display()))
        })?;
        let catalog = Catalog::open(&root)?;

        info!(
            "Storage engine ready: {} tables, page capacity {}, index page capacity {}",
            catalog.table_names().len(),
            options.table_page_capacity,
            options.index_page_capacity
        );
        Ok(Self {
            root,
            options,
            catalog,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn table_names(&self) -> Vec<String> {
        self.catalog.table_names()
    }

    /// Open a table for inspection
    pub fn open_table(&self, name: &str) -> Result<Table> {
        let columns = self.catalog.schema_for(name)?;
        Table::open(self.root.join(name), columns, self.options.clone())
    }

    // ========================================================================
    // DDL
    // ========================================================================

    /// Create a table from `(column, type tag)` pairs
    pub fn create_table(&mut self, name: &str, key_column: &str, columns: &[(&str, &str)]) -> Result<()> {
        let descriptors = self.catalog.register_table(name, key_column, columns)?;
        let created = Table::create(
            self.root.join(name),
            name,
            key_column,
            descriptors,
            self.options.clone(),
        );
        if let Err(e) = created {
            warn!("Creating table {} failed, dropping it from the catalog: {}", name, e);
            self.catalog.unregister_table(name)?;
            return Err(e);
        }
        Ok(())
    }

    /// Build a bitmap index on `table.column`
    pub fn create_index(&mut self, table: &str, column: &str) -> Result<()> {
        self.catalog.column(table, column)?;
        let mut handle = self.open_table(table)?;
        handle.create_bitmap_index(column)?;
        self.catalog.mark_indexed(table, column)
    }

    // ========================================================================
    // DML
    // ========================================================================

    /// Insert a full record; the touch date is set by the engine
    pub fn insert(&self, table: &str, record: Record) -> Result<()> {
        self.catalog.validate_record(table, &record)?;
        self.open_table(table)?.insert(record)
    }

    /// Update every record whose `match_column` equals the mask's value
    pub fn update(&self, table: &str, match_column: &str, mask: &Record) -> Result<usize> {
        self.catalog.column(table, match_column)?;
        if !mask.contains(match_column) {
            return Err(ValidationError::MissingColumn(match_column.to_string()).into());
        }
        self.catalog.validate_mask(table, mask, false)?;
        self.open_table(table)?.update(match_column, mask)
    }

    /// Delete every record matching the mask; an empty mask deletes all
    pub fn delete(&self, table: &str, mask: &Record) -> Result<usize> {
        self.catalog.validate_mask(table, mask, true)?;
        self.open_table(table)?.delete(mask)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Evaluate a select; all terms must name the same table
    pub fn select(&self, terms: &[Term], combinators: &[Combinator]) -> Result<ResultSet> {
        self.catalog.validate_query(terms, combinators)?;
        // validate_query guarantees at least one term
        let table = terms
            .first()
            .map(|term| term.table.as_str())
            .unwrap_or_default();
        let records = self.open_table(table)?.select(terms, combinators)?;
        debug!("Select on {} returned {} records", table, records.len());
        Ok(ResultSet::new(records))
    }

    /// Every record of a table, in key order
    pub fn select_all(&self, table: &str) -> Result<ResultSet> {
        Ok(ResultSet::new(self.open_table(table)?.select_all()?))
    }

    /// Run the consistency checker over a table
    pub fn verify(&self, table: &str) -> Result<()> {
        self.open_table(table)?.verify()?;
        info!("Table {} verified", table);
        Ok(())
    }
}
