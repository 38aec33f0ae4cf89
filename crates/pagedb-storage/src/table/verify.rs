//! Consistency checks over a table's pages and indexes

use pagedb_common::error::{Result, StorageError};
use pagedb_common::Value;

use super::{Table, TablePage};
use crate::index::Index;

fn corrupt(message: String) -> pagedb_common::Error {
    StorageError::CorruptData(message).into()
}

impl Table {
    /// Check every page and index of the table, failing on the first
    /// inconsistency found
    pub fn verify(&self) -> Result<()> {
        let name = self.name();
        let key_column = self.key_column();

        let mut pages = Vec::with_capacity(self.page_count());
        let mut previous_max: Option<Value> = None;
        for number in 0..self.page_count() {
            let page = self.load_page(number)?;
            if page.is_empty() {
                return Err(corrupt(format!("{name} page {number} is empty")));
            }
            if page.len() > page.capacity() {
                return Err(corrupt(format!(
                    "{name} page {number} holds {} records, capacity is {}",
                    page.len(),
                    page.capacity()
                )));
            }
            let keys = page.values(key_column)?;
            if keys.windows(2).any(|pair| pair[0] > pair[1]) {
                return Err(corrupt(format!("{name} page {number} is out of key order")));
            }
            if let (Some(max), Some(first)) = (&previous_max, keys.first()) {
                if max > first {
                    return Err(corrupt(format!(
                        "{name} page {number} starts below the end of page {}",
                        number - 1
                    )));
                }
            }
            previous_max = keys.last().cloned();
            pages.push(page);
        }

        for index in self.descriptor.indices.values() {
            self.verify_index(index, &pages)?;
        }
        Ok(())
    }

    fn verify_index(&self, index: &Index<Value>, pages: &[TablePage]) -> Result<()> {
        let column = index.column();
        let shape: Vec<usize> = pages.iter().map(TablePage::len).collect();
        if index.sizes() != shape.as_slice() {
            return Err(corrupt(format!(
                "index on {column} tracks page sizes {:?}, table has {shape:?}",
                index.sizes()
            )));
        }

        let values = pages
            .iter()
            .map(|page| page.values(column))
            .collect::<Result<Vec<_>>>()?;

        let mut previous: Option<Value> = None;
        let mut covered = 0;
        for page in index.load_pages(&self.store)? {
            if page.is_empty() || page.len() > page.capacity() {
                return Err(corrupt(format!(
                    "index page {} on {column} holds {} matrices, capacity is {}",
                    page.id(),
                    page.len(),
                    page.capacity()
                )));
            }
            for matrix in page.matrices() {
                let pivot = matrix.pivot();
                if previous.as_ref().is_some_and(|p| p >= pivot) {
                    return Err(corrupt(format!(
                        "index on {column} is out of pivot order at {pivot}"
                    )));
                }
                if matrix.bits().shape() != shape {
                    return Err(corrupt(format!(
                        "matrix for {pivot} on {column} is not shaped like the table"
                    )));
                }
                if matrix.is_dead() {
                    return Err(corrupt(format!("matrix for {pivot} on {column} is empty")));
                }
                for (number, row) in values.iter().enumerate() {
                    for (slot, value) in row.iter().enumerate() {
                        if matrix.bits().get(number, slot) != (value == pivot) {
                            return Err(corrupt(format!(
                                "matrix for {pivot} on {column} disagrees with page {number} row {slot}"
                            )));
                        }
                    }
                }
                covered += matrix.bits().count_ones();
                previous = Some(pivot.clone());
            }
        }

        let rows: u64 = shape.iter().map(|&len| len as u64).sum();
        if covered != rows {
            return Err(corrupt(format!(
                "index on {column} covers {covered} of {rows} rows"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::table::tests::{row, table};
    use pagedb_common::error::StorageError;
    use pagedb_common::Error;

    #[test]
    fn test_fresh_table_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table(dir.path(), 2);
        table.verify().unwrap();
        for (key, v) in [("C", 1), ("A", 2), ("B", 1), ("D", 3)] {
            table.insert(row(key, v)).unwrap();
        }
        table.create_bitmap_index("v").unwrap();
        table.create_bitmap_index("k").unwrap();
        table.verify().unwrap();
    }

    #[test]
    fn test_detects_missing_page_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table(dir.path(), 2);
        table.insert(row("A", 1)).unwrap();
        let id = table.page_ids()[0];
        std::fs::remove_file(table.store.table_page_path(id)).unwrap();
        assert!(matches!(
            table.verify(),
            Err(Error::Storage(StorageError::ReadFailed(_)))
        ));
    }

    #[test]
    fn test_detects_tampered_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table(dir.path(), 2);
        table.insert(row("A", 1)).unwrap();
        let path = table.store.table_page_path(table.page_ids()[0]);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            table.verify(),
            Err(Error::Storage(StorageError::CorruptData(_)))
        ));
    }
}
