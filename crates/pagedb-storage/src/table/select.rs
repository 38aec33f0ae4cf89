//! Select evaluation
//!
//! Terms on indexed columns are answered from their index as a bitmap;
//! the rest are answered by scanning pages into a bitmap of the same shape.
//! Term bitmaps are folded strictly left to right: `((t0 op0 t1) op1 t2) ...`.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use roaring::RoaringBitmap;
use tracing::debug;

use pagedb_common::error::{QueryError, Result};
use pagedb_common::{metrics, Combinator, Record, Term};

use super::{Table, TablePage};
use crate::index::Bitmap;

/// Pages loaded while answering one select
struct PageCache<'a> {
    table: &'a Table,
    pages: HashMap<usize, TablePage>,
}

impl<'a> PageCache<'a> {
    fn new(table: &'a Table) -> Self {
        Self {
            table,
            pages: HashMap::new(),
        }
    }

    fn page(&mut self, number: usize) -> Result<&TablePage> {
        if !self.pages.contains_key(&number) {
            let page = self.table.load_page(number)?;
            self.pages.insert(number, page);
        }
        // loaded above
        Ok(&self.pages[&number])
    }
}

impl Table {
    /// Evaluate `terms` joined by `combinators`; the result holds each
    /// distinct matching record once, in key order.
    pub fn select(&self, terms: &[Term], combinators: &[Combinator]) -> Result<Vec<Record>> {
        if terms.is_empty() {
            return Err(QueryError::EmptyQuery.into());
        }
        if combinators.len() != terms.len() - 1 {
            return Err(QueryError::CombinatorCount {
                terms: terms.len(),
                expected: terms.len() - 1,
                actual: combinators.len(),
            }
            .into());
        }
        let started = Instant::now();
        let mut cache = PageCache::new(self);

        // Indexed terms first, so their bitmaps can narrow the scans
        let mut indexed = Vec::with_capacity(terms.len());
        for term in terms {
            let bits = match self.index(&term.column) {
                Some(index) => Some(index.query(&self.store, term.op, &term.value)?),
                None => None,
            };
            indexed.push(bits);
        }
        let indexed_terms = indexed.iter().flatten().count();

        let shape = match indexed.iter().flatten().next() {
            Some(bits) => bits.shape(),
            None => {
                let mut shape = Vec::with_capacity(self.page_count());
                for number in 0..self.page_count() {
                    shape.push(cache.page(number)?.len());
                }
                shape
            }
        };

        // With only ANDs, a row outside every indexed term's pages cannot
        // match; any OR or XOR lets scanned terms contribute on their own
        let all_and = combinators.iter().all(|c| *c == Combinator::And);
        let scan_pages: Vec<bool> = if all_and && indexed_terms > 0 {
            let mut union = Bitmap::empty(&shape);
            for bits in indexed.iter().flatten() {
                union |= bits;
            }
            union.candidate_pages()
        } else {
            vec![true; shape.len()]
        };
        debug!(
            "Select on {}: {} terms, {} indexed, scanning {} of {} pages",
            self.name(),
            terms.len(),
            indexed_terms,
            scan_pages.iter().filter(|&&p| p).count(),
            shape.len()
        );

        let mut results = Vec::with_capacity(terms.len());
        for (term, bits) in terms.iter().zip(indexed) {
            let bits = match bits {
                Some(bits) => bits,
                None => scan(&mut cache, term, &shape, &scan_pages)?,
            };
            results.push(bits);
        }

        let mut results = results.into_iter();
        let mut acc = results.next().unwrap_or_default();
        for (combinator, next) in combinators.iter().zip(results) {
            acc = match combinator {
                Combinator::And => &acc & &next,
                Combinator::Or => &acc | &next,
                Combinator::Xor => &acc ^ &next,
            };
        }

        let mut records = BTreeSet::new();
        for (page, slot) in acc.ones() {
            if let Some(record) = cache.page(page)?.get(slot) {
                records.insert(record.clone());
            }
        }
        let key_column = self.key_column();
        let mut records: Vec<Record> = records.into_iter().collect();
        records.sort_by(|a, b| a.get(key_column).cmp(&b.get(key_column)));

        metrics::record_select(
            terms.len(),
            indexed_terms,
            records.len(),
            started.elapsed().as_secs_f64() * 1_000_000.0,
        );
        Ok(records)
    }
}

/// Resolve a term by testing every record of the candidate pages
fn scan(cache: &mut PageCache<'_>, term: &Term, shape: &[usize], pages: &[bool]) -> Result<Bitmap> {
    let mut bits = Bitmap::empty(shape);
    for (number, _) in pages.iter().enumerate().filter(|(_, &candidate)| candidate) {
        let page = cache.page(number)?;
        let matching: RoaringBitmap = (0u32..)
            .zip(page.records())
            .filter_map(|(slot, record)| term.matches(record).then_some(slot))
            .collect();
        bits.replace_row(number, page.len(), matching)?;
    }
    Ok(bits)
}
