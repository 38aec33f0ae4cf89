//! Table catalog
//!
//! A flat list of column descriptors, persisted as JSON in
//! `<data_dir>/catalog.json`. The catalog owns schemas and validates records,
//! masks and queries against them before they reach a table.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pagedb_common::error::{QueryError, Result, SchemaError, StorageError, ValidationError};
use pagedb_common::{Combinator, CompareOp, DataType, Record, Term, TOUCH_DATE};

const CATALOG_FILE: &str = "catalog.json";

/// One column of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub table: String,
    pub column: String,
    pub data_type: DataType,
    pub is_key: bool,
    pub indexed: bool,
}

impl ColumnDescriptor {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        data_type: DataType,
        is_key: bool,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            data_type,
            is_key,
            indexed: false,
        }
    }
}

/// Registry of every table's columns
#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    columns: Vec<ColumnDescriptor>,
}

impl Catalog {
    /// Load the catalog of `data_dir`; a missing file is an empty catalog
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let path = data_dir.as_ref().join(CATALOG_FILE);
        let columns = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                StorageError::CorruptData(format!("catalog {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(
                    StorageError::ReadFailed(format!("catalog {}: {e}", path.display())).into(),
                )
            }
        };
        let catalog = Self { path, columns };
        debug!(
            "Loaded catalog with {} tables",
            catalog.table_names().len()
        );
        Ok(catalog)
    }

    fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.columns)?;
        fs::write(&self.path, content).map_err(|e| {
            StorageError::WriteFailed(format!("catalog {}: {e}", self.path.display())).into()
        })
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// Register a table from `(column, type tag)` pairs; the touch date
    /// column is appended automatically
    pub fn register_table(
        &mut self,
        name: &str,
        key_column: &str,
        columns: &[(&str, &str)],
    ) -> Result<Vec<ColumnDescriptor>> {
        check_name(name)?;
        if self.contains_table(name) {
            return Err(SchemaError::TableExists(name.to_string()).into());
        }
        if columns.is_empty() {
            return Err(SchemaError::NoColumns(name.to_string()).into());
        }
        if !columns.iter().any(|(column, _)| *column == key_column) {
            return Err(SchemaError::InvalidKey {
                table: name.to_string(),
                key: key_column.to_string(),
            }
            .into());
        }

        let mut descriptors: Vec<ColumnDescriptor> = Vec::with_capacity(columns.len() + 1);
        for &(column, tag) in columns {
            check_name(column)?;
            if column == TOUCH_DATE {
                return Err(SchemaError::ReservedColumn(column.to_string()).into());
            }
            if descriptors.iter().any(|d| d.column == column) {
                return Err(SchemaError::DuplicateColumn {
                    table: name.to_string(),
                    column: column.to_string(),
                }
                .into());
            }
            let data_type: DataType = tag.parse().map_err(SchemaError::InvalidType)?;
            descriptors.push(ColumnDescriptor::new(
                name,
                column,
                data_type,
                column == key_column,
            ));
        }
        descriptors.push(ColumnDescriptor::new(
            name,
            TOUCH_DATE,
            DataType::Timestamp,
            false,
        ));

        self.columns.extend(descriptors.iter().cloned());
        self.save()?;
        info!("Registered table {} with {} columns", name, columns.len());
        Ok(descriptors)
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.table == name)
    }

    /// Table names in registration order
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for descriptor in &self.columns {
            if !names.contains(&descriptor.table) {
                names.push(descriptor.table.clone());
            }
        }
        names
    }

    pub fn schema_for(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let schema: Vec<ColumnDescriptor> = self
            .columns
            .iter()
            .filter(|c| c.table == table)
            .cloned()
            .collect();
        if schema.is_empty() {
            return Err(SchemaError::TableNotFound(table.to_string()).into());
        }
        Ok(schema)
    }

    pub fn column(&self, table: &str, column: &str) -> Result<&ColumnDescriptor> {
        if !self.contains_table(table) {
            return Err(SchemaError::TableNotFound(table.to_string()).into());
        }
        self.columns
            .iter()
            .find(|c| c.table == table && c.column == column)
            .ok_or_else(|| {
                SchemaError::ColumnNotFound {
                    table: table.to_string(),
                    column: column.to_string(),
                }
                .into()
            })
    }

    /// Forget a table registered by [`Catalog::register_table`]
    pub fn unregister_table(&mut self, name: &str) -> Result<()> {
        if !self.contains_table(name) {
            return Err(SchemaError::TableNotFound(name.to_string()).into());
        }
        self.columns.retain(|descriptor| descriptor.table != name);
        self.save()?;
        info!("Unregistered table {}", name);
        Ok(())
    }

    pub fn mark_indexed(&mut self, table: &str, column: &str) -> Result<()> {
        self.column(table, column)?;
        for descriptor in &mut self.columns {
            if descriptor.table == table && descriptor.column == column {
                descriptor.indexed = true;
            }
        }
        self.save()
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// A full record: every user column present, nothing else
    pub fn validate_record(&self, table: &str, record: &Record) -> Result<()> {
        if record.contains(TOUCH_DATE) {
            return Err(ValidationError::ReservedColumn(TOUCH_DATE.to_string()).into());
        }
        for descriptor in self.schema_for(table)? {
            if descriptor.column != TOUCH_DATE && !record.contains(&descriptor.column) {
                return Err(ValidationError::MissingColumn(descriptor.column).into());
            }
        }
        self.validate_mask(table, record, false)
    }

    /// A partial record: known columns with values of the declared type
    pub fn validate_mask(&self, table: &str, mask: &Record, allow_touch_date: bool) -> Result<()> {
        let schema = self.schema_for(table)?;
        for (column, value) in mask.iter() {
            if column == TOUCH_DATE && !allow_touch_date {
                return Err(ValidationError::ReservedColumn(column.to_string()).into());
            }
            let descriptor = schema
                .iter()
                .find(|d| d.column == column)
                .ok_or_else(|| ValidationError::UnknownColumn(column.to_string()))?;
            if value.data_type() != descriptor.data_type {
                return Err(ValidationError::TypeMismatch {
                    column: column.to_string(),
                    expected: descriptor.data_type.to_string(),
                    actual: value.data_type().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Terms against one existing table, joined by one combinator each
    pub fn validate_query(&self, terms: &[Term], combinators: &[Combinator]) -> Result<()> {
        let Some(first) = terms.first() else {
            return Err(QueryError::EmptyQuery.into());
        };
        if combinators.len() != terms.len() - 1 {
            return Err(QueryError::CombinatorCount {
                terms: terms.len(),
                expected: terms.len() - 1,
                actual: combinators.len(),
            }
            .into());
        }

        for term in terms {
            if term.table != first.table {
                return Err(QueryError::MixedTables {
                    expected: first.table.clone(),
                    actual: term.table.clone(),
                }
                .into());
            }
            let descriptor = self.column(&term.table, &term.column)?;
            if term.value.data_type() != descriptor.data_type {
                return Err(ValidationError::TypeMismatch {
                    column: term.column.clone(),
                    expected: descriptor.data_type.to_string(),
                    actual: term.value.data_type().to_string(),
                }
                .into());
            }
            if descriptor.data_type == DataType::Boolean
                && !matches!(term.op, CompareOp::Eq | CompareOp::Ne)
            {
                return Err(QueryError::UnsupportedOperator {
                    column: term.column.clone(),
                    operator: term.op.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Table and column names become path components, so only
/// `[A-Za-z0-9_-]` is accepted
fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagedb_common::{Error, Value};

    fn catalog(dir: &Path) -> Catalog {
        let mut catalog = Catalog::open(dir).unwrap();
        catalog
            .register_table("T", "k", &[("k", "string"), ("v", "int"), ("b", "bool")])
            .unwrap();
        catalog
    }

    #[test]
    fn test_register_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        catalog.mark_indexed("T", "v").unwrap();

        let reloaded = Catalog::open(dir.path()).unwrap();
        let schema = reloaded.schema_for("T").unwrap();
        let names: Vec<&str> = schema.iter().map(|c| c.column.as_str()).collect();
        assert_eq!(names, vec!["k", "v", "b", TOUCH_DATE]);
        assert!(schema[0].is_key);
        assert!(schema[1].indexed);
        assert_eq!(schema[3].data_type, DataType::Timestamp);
        assert_eq!(reloaded.table_names(), vec!["T".to_string()]);
    }

    #[test]
    fn test_register_rejects_bad_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());

        let cases: [(&str, &str, Vec<(&str, &str)>); 6] = [
            ("T", "k", vec![("k", "string")]),
            ("U", "k", vec![]),
            ("U", "x", vec![("k", "string")]),
            ("U", "k", vec![("k", "string"), (TOUCH_DATE, "date")]),
            ("U", "k", vec![("k", "blob")]),
            ("../U", "k", vec![("k", "string")]),
        ];
        for (name, key, columns) in cases {
            let err = catalog.register_table(name, key, &columns).unwrap_err();
            assert!(matches!(err, Error::Schema(_)), "{name}: {err}");
        }
        assert!(!catalog.contains_table("U"));
    }

    #[test]
    fn test_register_rejects_path_like_column_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog(dir.path());
        for column in ["..", "../../escaped", "a/b", "", "a\\b"] {
            let err = catalog
                .register_table("U", "k", &[("k", "string"), (column, "integer")])
                .unwrap_err();
            assert!(
                matches!(err, Error::Schema(SchemaError::InvalidName(ref n)) if n == column),
                "{column:?}: {err}"
            );
        }
        assert!(!catalog.contains_table("U"));
        catalog
            .register_table("U", "k", &[("k", "string"), ("v_2-x", "integer")])
            .unwrap();
    }

    #[test]
    fn test_validate_record() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let full = Record::new().with("k", "A").with("v", 1).with("b", true);
        catalog.validate_record("T", &full).unwrap();

        let missing = Record::new().with("k", "A").with("v", 1);
        assert!(matches!(
            catalog.validate_record("T", &missing),
            Err(Error::Validation(ValidationError::MissingColumn(_)))
        ));
        let wrong_type = full.clone().with("v", "one");
        assert!(matches!(
            catalog.validate_record("T", &wrong_type),
            Err(Error::Validation(ValidationError::TypeMismatch { .. }))
        ));
        let stamped = full.clone().with(TOUCH_DATE, chrono::Utc::now());
        assert!(catalog.validate_record("T", &stamped).is_err());
        assert!(catalog.validate_mask("T", &Record::new().with(TOUCH_DATE, chrono::Utc::now()), true).is_ok());
        assert!(catalog.validate_record("Nope", &full).is_err());
    }

    #[test]
    fn test_validate_query() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let v = Term::new("T", "v", CompareOp::Lt, 3);
        let b = Term::new("T", "b", CompareOp::Eq, true);
        catalog
            .validate_query(&[v.clone(), b.clone()], &[Combinator::And])
            .unwrap();

        assert!(catalog.validate_query(&[v.clone()], &[Combinator::Or]).is_err());
        assert!(catalog
            .validate_query(&[Term::new("T", "b", CompareOp::Lt, true)], &[])
            .is_err());
        assert!(catalog
            .validate_query(&[v.clone(), Term::new("U", "v", CompareOp::Eq, 1)], &[Combinator::Or])
            .is_err());
        assert!(catalog
            .validate_query(&[Term::new("T", "v", CompareOp::Eq, Value::from("x"))], &[])
            .is_err());
        assert!(catalog
            .validate_query(&[Term::new("T", "missing", CompareOp::Eq, 1)], &[])
            .is_err());
    }
}
