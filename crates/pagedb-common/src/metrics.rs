//! Metrics and observability for PageDB
//!
//! Thin wrappers over the `metrics` facade. Nothing is recorded unless the
//! embedding program installs a recorder.
#![allow(clippy::cast_precision_loss)]

use metrics::{counter, histogram};

// ============================================================================
// Storage Metrics
// ============================================================================

/// Record a page file read
pub fn record_page_read(kind: &'static str, bytes: u64) {
    counter!("pagedb_page_reads_total", "kind" => kind).increment(1);
    counter!("pagedb_storage_bytes_read_total", "kind" => kind).increment(bytes);
}

/// Record a page file write
pub fn record_page_write(kind: &'static str, bytes: u64) {
    counter!("pagedb_page_writes_total", "kind" => kind).increment(1);
    counter!("pagedb_storage_bytes_written_total", "kind" => kind).increment(bytes);
}

/// Record a page file removal
pub fn record_page_delete(kind: &'static str) {
    counter!("pagedb_page_deletes_total", "kind" => kind).increment(1);
}

/// Record a page allocation
pub fn record_page_created(kind: &'static str) {
    counter!("pagedb_pages_created_total", "kind" => kind).increment(1);
}

// ============================================================================
// Index Metrics
// ============================================================================

/// Record one index reshape caused by a table page change
pub fn record_index_reshape(change: &'static str) {
    counter!("pagedb_index_reshapes_total", "change" => change).increment(1);
}

/// Record a presence matrix being created or destroyed
pub fn record_matrix_lifecycle(event: &'static str) {
    counter!("pagedb_presence_matrices_total", "event" => event).increment(1);
}

// ============================================================================
// Query Metrics
// ============================================================================

/// Record a completed select
pub fn record_select(terms: usize, indexed_terms: usize, rows: usize, latency_us: f64) {
    counter!("pagedb_selects_total").increment(1);
    counter!("pagedb_select_terms_total").increment(terms as u64);
    counter!("pagedb_select_indexed_terms_total").increment(indexed_terms as u64);
    histogram!("pagedb_select_rows").record(rows as f64);
    histogram!("pagedb_select_duration_us").record(latency_us);
}

/// Record a completed write operation
pub fn record_write(operation: &'static str, pages_touched: usize) {
    counter!("pagedb_writes_total", "operation" => operation).increment(1);
    histogram!("pagedb_write_pages_touched", "operation" => operation)
        .record(pages_touched as f64);
}
