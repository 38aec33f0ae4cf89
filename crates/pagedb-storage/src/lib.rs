//! PageDB Storage Engine
//!
//! File-backed table storage providing:
//! - Key-sorted, capacity-bounded table pages with overflow chaining
//! - Per-column bitmap indexes built from presence matrices
//! - Boolean select evaluation over indexed and scanned predicates
//! - A JSON catalog of table schemas

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod codec;
pub mod index;
pub mod store;
pub mod table;

mod engine;
mod paging;

pub use catalog::{Catalog, ColumnDescriptor};
pub use codec::Compression;
pub use engine::{ResultSet, StorageEngine};
pub use index::{Bitmap, Index, IndexKey, IndexPage, PresenceMatrix};
pub use store::{PageId, PageStore};
pub use table::{PageChange, Table, TableDescriptor, TablePage};

use pagedb_common::config::StorageConfig;
use pagedb_common::error::Error;

/// Storage engine options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Path to the data directory
    pub path: String,
    /// Maximum records per table page
    pub table_page_capacity: usize,
    /// Maximum presence matrices per index page
    pub index_page_capacity: usize,
    /// Codec applied to index pages
    pub compression: Compression,
}

impl StorageOptions {
    /// Default options with explicit page capacities
    pub fn with_capacities(table_page_capacity: usize, index_page_capacity: usize) -> Self {
        Self {
            table_page_capacity,
            index_page_capacity,
            ..Self::default()
        }
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        let config = StorageConfig::default();
        Self {
            path: config.data_dir,
            table_page_capacity: config.table_page_capacity,
            index_page_capacity: config.index_page_capacity,
            compression: Compression::default(),
        }
    }
}

impl TryFrom<&StorageConfig> for StorageOptions {
    type Error = Error;

    fn try_from(config: &StorageConfig) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self {
            path: config.data_dir.clone(),
            table_page_capacity: config.table_page_capacity,
            index_page_capacity: config.index_page_capacity,
            compression: config.compression_algorithm.parse()?,
        })
    }
}
