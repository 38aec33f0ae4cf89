//! Index pages: bounded, pivot-sorted runs of presence matrices

use serde::{Deserialize, Serialize};

use pagedb_common::error::Result;

use super::bitmap::{Bitmap, PresenceMatrix};
use super::IndexKey;
use crate::paging::{insert_bounded, Placement};
use crate::store::PageId;

/// Bounded block of presence matrices sorted ascending by pivot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPage<V> {
    id: PageId,
    capacity: usize,
    matrices: Vec<PresenceMatrix<V>>,
}

impl<V: IndexKey> IndexPage<V> {
    pub fn new(id: PageId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            matrices: Vec::new(),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn matrices(&self) -> &[PresenceMatrix<V>] {
        &self.matrices
    }

    /// Smallest pivot on the page
    pub fn first_pivot(&self) -> Option<&V> {
        self.matrices.first().map(PresenceMatrix::pivot)
    }

    pub fn pivots(&self) -> impl Iterator<Item = &V> {
        self.matrices.iter().map(PresenceMatrix::pivot)
    }

    pub fn find(&self, pivot: &V) -> Option<&PresenceMatrix<V>> {
        self.matrices
            .binary_search_by(|matrix| matrix.pivot().cmp(pivot))
            .ok()
            .map(|at| &self.matrices[at])
    }

    pub(crate) fn insert_matrix(
        &mut self,
        matrix: PresenceMatrix<V>,
    ) -> Placement<PresenceMatrix<V>> {
        let pivot = matrix.pivot().clone();
        insert_bounded(&mut self.matrices, matrix, self.capacity, |existing| {
            *existing.pivot() > pivot
        })
    }

    /// Mirror a newly inserted table page into every matrix
    pub fn insert_row(&mut self, page: usize, values: &[V]) -> Result<()> {
        for matrix in &mut self.matrices {
            matrix.insert_row(page, values)?;
        }
        Ok(())
    }

    /// Mirror new contents of a table page; returns the matrices that died
    pub fn replace_row(&mut self, page: usize, values: &[V]) -> Result<usize> {
        for matrix in &mut self.matrices {
            matrix.replace_row(page, values)?;
        }
        Ok(self.drop_dead())
    }

    /// Mirror a dropped table page; returns the matrices that died
    pub fn remove_row(&mut self, page: usize) -> Result<usize> {
        for matrix in &mut self.matrices {
            matrix.remove_row(page)?;
        }
        Ok(self.drop_dead())
    }

    /// OR every matrix whose pivot is below `target` (or equal, when
    /// `inclusive`) into `acc`. Returns false once a pivot past the bound is
    /// seen, meaning no later page can contribute.
    pub fn union_below(&self, target: &V, inclusive: bool, acc: &mut Bitmap) -> bool {
        for matrix in &self.matrices {
            let below = if inclusive {
                matrix.pivot() <= target
            } else {
                matrix.pivot() < target
            };
            if !below {
                return false;
            }
            *acc |= matrix.bits();
        }
        true
    }

    fn drop_dead(&mut self) -> usize {
        let before = self.matrices.len();
        self.matrices.retain(|matrix| !matrix.is_dead());
        before - self.matrices.len()
    }
}
