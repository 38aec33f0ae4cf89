//! Page files of one table
//!
//! Layout under the table directory:
//! - `pages/<id>.page` one file per table page
//! - `indices/<column>/<id>.idx` one compressed file per index page
//!
//! Page ids are creation timestamps in nanoseconds; a store never hands out
//! the same id twice and skips ids whose file already exists.

use std::cell::Cell;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pagedb_common::error::{Result, StorageError};
use pagedb_common::metrics;

use crate::codec::{self, Compression, PageKind};
use crate::index::{IndexKey, IndexPage};
use crate::table::TablePage;
use crate::StorageOptions;

const PAGES_DIR: &str = "pages";
const INDICES_DIR: &str = "indices";

/// Stable identity of a page file, fixed at creation
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PageId(u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}", self.0)
    }
}

/// Reads and writes the page files of one table
#[derive(Debug)]
pub struct PageStore {
    root: PathBuf,
    options: StorageOptions,
    last_id: Cell<u64>,
}

impl PageStore {
    pub fn new(root: impl Into<PathBuf>, options: StorageOptions) -> Self {
        Self {
            root: root.into(),
            options,
            last_id: Cell::new(0),
        }
    }

    /// Table directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Create the page and index directories
    pub fn init_layout(&self) -> Result<()> {
        for dir in [self.root.join(PAGES_DIR), self.root.join(INDICES_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| {
                StorageError::WriteFailed(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Create the directory holding one column's index pages
    pub fn init_index_dir(&self, column: &str) -> Result<()> {
        let dir = self.index_dir(column);
        fs::create_dir_all(&dir).map_err(|e| {
            StorageError::WriteFailed(format!("cannot create {}: {e}", dir.display())).into()
        })
    }

    pub fn table_page_path(&self, id: PageId) -> PathBuf {
        self.root.join(PAGES_DIR).join(format!("{id}.page"))
    }

    pub fn index_page_path(&self, column: &str, id: PageId) -> PathBuf {
        self.index_dir(column).join(format!("{id}.idx"))
    }

    fn index_dir(&self, column: &str) -> PathBuf {
        self.root.join(INDICES_DIR).join(column)
    }

    // ========================================================================
    // Table Pages
    // ========================================================================

    /// A fresh, empty, not yet persisted table page
    pub fn new_table_page(&self) -> TablePage {
        let id = self.allocate(|id| self.table_page_path(id));
        metrics::record_page_created(PageKind::Table.label());
        debug!("Allocated table page {}", id);
        TablePage::new(id, self.options.table_page_capacity)
    }

    pub fn read_table_page(&self, id: PageId) -> Result<TablePage> {
        let path = self.table_page_path(id);
        let bytes = read_file(PageKind::Table, &path)?;
        let mut page: TablePage = codec::decode(PageKind::Table, &bytes)?;
        page.mark_clean();
        Ok(page)
    }

    /// Persist a table page, or remove its file once it is empty
    pub fn write_table_page(&self, page: &mut TablePage) -> Result<()> {
        let path = self.table_page_path(page.id());
        if page.is_empty() {
            remove_file(PageKind::Table, &path)?;
        } else {
            let image = codec::encode(PageKind::Table, Compression::None, &*page)?;
            write_file(PageKind::Table, &path, &image)?;
        }
        page.mark_clean();
        Ok(())
    }

    // ========================================================================
    // Index Pages
    // ========================================================================

    /// A fresh, empty, not yet persisted index page for `column`
    pub fn new_index_page<V: IndexKey>(&self, column: &str) -> IndexPage<V> {
        let id = self.allocate(|id| self.index_page_path(column, id));
        metrics::record_page_created(PageKind::Index.label());
        debug!("Allocated index page {} for column {}", id, column);
        IndexPage::new(id, self.options.index_page_capacity)
    }

    pub fn read_index_page<V: IndexKey>(&self, column: &str, id: PageId) -> Result<IndexPage<V>> {
        let path = self.index_page_path(column, id);
        let bytes = read_file(PageKind::Index, &path)?;
        codec::decode(PageKind::Index, &bytes)
    }

    /// Persist an index page, or remove its file once it is empty
    pub fn write_index_page<V: IndexKey>(&self, column: &str, page: &IndexPage<V>) -> Result<()> {
        let path = self.index_page_path(column, page.id());
        if page.is_empty() {
            return remove_file(PageKind::Index, &path);
        }
        let image = codec::encode(PageKind::Index, self.options.compression, page)?;
        write_file(PageKind::Index, &path, &image)
    }

    fn allocate(&self, path_of: impl Fn(PageId) -> PathBuf) -> PageId {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .and_then(|nanos| u64::try_from(nanos).ok())
            .unwrap_or_default();
        let mut candidate = now.max(self.last_id.get() + 1);
        while path_of(PageId(candidate)).exists() {
            candidate += 1;
        }
        self.last_id.set(candidate);
        PageId(candidate)
    }
}

fn read_file(kind: PageKind, path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).map_err(|e| {
        StorageError::ReadFailed(format!("{kind} page {}: {e}", path.display()))
    })?;
    metrics::record_page_read(kind.label(), bytes.len() as u64);
    Ok(bytes)
}

/// Write through a sibling temp file so a page is replaced whole or not at all
fn write_file(kind: PageKind, path: &Path, image: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, image)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|e| StorageError::WriteFailed(format!("{kind} page {}: {e}", path.display())))?;
    metrics::record_page_write(kind.label(), image.len() as u64);
    Ok(())
}

fn remove_file(kind: PageKind, path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed empty {} page {}", kind, path.display());
            metrics::record_page_delete(kind.label());
            Ok(())
        }
        // never persisted
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::DeleteFailed(format!(
            "{kind} page {}: {e}",
            path.display()
        ))
        .into()),
    }
}
