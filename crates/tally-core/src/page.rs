//! Pagination over stored rows.

use serde::{Deserialize, Serialize};

use crate::{Rejection, table::CellValue};

/// A validated 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
  page:      u64,
  page_size: u64,
}

impl PageRequest {
  pub fn new(page: u64, page_size: u64) -> Result<Self, Rejection> {
    if page == 0 || page_size == 0 {
      return Err(Rejection::InvalidPage { page, page_size });
    }
    Ok(Self { page, page_size })
  }

  pub fn page(&self) -> u64 { self.page }

  pub fn page_size(&self) -> u64 { self.page_size }

  /// Number of rows before this page.
  pub fn offset(&self) -> u64 { (self.page - 1).saturating_mul(self.page_size) }

  pub fn total_pages(&self, total_rows: u64) -> u64 { total_rows.div_ceil(self.page_size) }
}

/// One page of a data table, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPage {
  pub columns:     Vec<String>,
  pub rows:        Vec<Vec<CellValue>>,
  pub page:        u64,
  pub page_size:   u64,
  pub total_rows:  u64,
  pub total_pages: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_page_or_size_is_rejected() {
    assert!(PageRequest::new(0, 10).is_err());
    assert!(PageRequest::new(1, 0).is_err());
  }

  #[test]
  fn offsets_and_page_counts() {
    let p = PageRequest::new(3, 10).unwrap();
    assert_eq!(p.offset(), 20);
    assert_eq!(p.total_pages(0), 0);
    assert_eq!(p.total_pages(10), 1);
    assert_eq!(p.total_pages(21), 3);
  }
}
