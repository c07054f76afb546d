//! Offset/limit pagination shared by audit and listing queries

use serde::{Deserialize, Serialize};

use crate::error::{CertLedgerError, Result};

pub const MAX_PAGE_SIZE: u32 = 100;

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Result<Self> {
        if page == 0 {
            return Err(CertLedgerError::ValidationError(
                "page must be at least 1".to_string(),
            ));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(CertLedgerError::ValidationError(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(Self { page, limit })
    }

    /// Build from optional query parameters; pagination applies only when `page` or `limit` is given.
    pub fn from_query(page: Option<u32>, limit: Option<u32>) -> Result<Option<Self>> {
        match (page, limit) {
            (None, None) => Ok(None),
            (page, limit) => Self::new(page.unwrap_or(1), limit.unwrap_or(10)).map(Some),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_count: u64,
    pub has_more: bool,
}

impl PageMeta {
    pub fn new(request: PageRequest, total_count: u64) -> Self {
        let limit = request.limit as u64;
        let total_pages = ((total_count + limit - 1) / limit) as u32;
        Self {
            current_page: request.page,
            total_pages,
            total_count,
            has_more: request.page < total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

/// Either a single page or the full sequence, depending on whether pagination was requested
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Page(Paginated<T>),
    All(Vec<T>),
}

impl<T> Listing<T> {
    /// Slice an already-merged sequence.
    pub fn from_vec(items: Vec<T>, page: Option<PageRequest>) -> Self {
        match page {
            None => Listing::All(items),
            Some(request) => {
                let total_count = items.len() as u64;
                let data = items
                    .into_iter()
                    .skip(request.offset())
                    .take(request.limit as usize)
                    .collect();
                Listing::Page(Paginated {
                    data,
                    meta: PageMeta::new(request, total_count),
                })
            }
        }
    }

    pub fn items(&self) -> &[T] {
        match self {
            Listing::Page(page) => &page.data,
            Listing::All(items) => items,
        }
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            Listing::Page(page) => page.data,
            Listing::All(items) => items,
        }
    }

    pub fn meta(&self) -> Option<&PageMeta> {
        match self {
            Listing::Page(page) => Some(&page.meta),
            Listing::All(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_for_partial_last_page() {
        let meta = PageMeta::new(PageRequest::new(2, 10).unwrap(), 25);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_more);

        let last = PageMeta::new(PageRequest::new(3, 10).unwrap(), 25);
        assert!(!last.has_more);
    }

    #[test]
    fn test_empty_sequence_has_no_pages() {
        let listing = Listing::from_vec(Vec::<u32>::new(), Some(PageRequest::new(1, 5).unwrap()));
        let meta = listing.meta().unwrap();
        assert_eq!(meta.total_pages, 0);
        assert_eq!(meta.total_count, 0);
        assert!(!meta.has_more);
    }

    #[test]
    fn test_slices_merged_sequence() {
        let items: Vec<u32> = (1..=12).collect();
        let listing = Listing::from_vec(items, Some(PageRequest::new(2, 5).unwrap()));
        assert_eq!(listing.items(), &[6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_rejects_bad_requests() {
        assert!(PageRequest::new(0, 10).is_err());
        assert!(PageRequest::new(1, 0).is_err());
        assert!(PageRequest::new(1, MAX_PAGE_SIZE + 1).is_err());
        assert_eq!(PageRequest::from_query(None, None).unwrap(), None);
        assert_eq!(
            PageRequest::from_query(Some(2), None).unwrap(),
            Some(PageRequest { page: 2, limit: 10 })
        );
    }
}
