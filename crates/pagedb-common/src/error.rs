//! Error types for PageDB
//!
//! Provides a unified error type hierarchy for the entire system.

use thiserror::Error;

/// Result type alias using PageDB's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for PageDB
#[derive(Error, Debug)]
pub enum Error {
    // Schema Errors
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    // Validation Errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // Query Errors
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    // Storage Errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Catalog and schema errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Invalid table or column name: {0:?}")]
    InvalidName(String),

    #[error("Column not found: {table}.{column}")]
    ColumnNotFound { table: String, column: String },

    #[error("Duplicate column: {table}.{column}")]
    DuplicateColumn { table: String, column: String },

    #[error("Column name is reserved: {0}")]
    ReservedColumn(String),

    #[error("Invalid column type: {0}")]
    InvalidType(String),

    #[error("Key column {key} is not a column of table {table}")]
    InvalidKey { table: String, key: String },

    #[error("Table {0} declares no columns")]
    NoColumns(String),

    #[error("Column already indexed: {table}.{column}")]
    AlreadyIndexed { table: String, column: String },
}

/// Record and mask validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing value for column: {0}")]
    MissingColumn(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Column {0} is maintained by the system and cannot be set")]
    ReservedColumn(String),

    #[error("Type mismatch for column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid value for column {column}: {reason}")]
    InvalidValue { column: String, reason: String },
}

/// Query-related errors
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Query has no terms")]
    EmptyQuery,

    #[error("Expected {expected} combinators for {terms} terms, got {actual}")]
    CombinatorCount {
        terms: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Unknown combinator: {0}")]
    UnknownCombinator(String),

    #[error("Inconsistent table names in query: expected {expected}, got {actual}")]
    MixedTables { expected: String, actual: String },

    #[error("Operator {operator} is not supported on column {column}")]
    UnsupportedOperator { column: String, operator: String },
}

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
