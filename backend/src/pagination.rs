//! Pagination helpers for workflow and execution listings

use serde::{Deserialize, Serialize};

/// Default page size if not specified
pub const DEFAULT_PAGE_SIZE: usize = 25;
/// Maximum allowed page size
pub const MAX_PAGE_SIZE: usize = 100;
/// Default page number (1-indexed for API consumers)
pub const DEFAULT_PAGE: usize = 1;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PaginationParams {
    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: usize,
    /// Number of items per page
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    DEFAULT_PAGE
}

fn default_per_page() -> usize {
    DEFAULT_PAGE_SIZE
}

impl PaginationParams {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1) * self.limit()
    }

    pub fn limit(&self) -> usize {
        self.per_page.clamp(1, MAX_PAGE_SIZE)
    }

    /// Slice an already-sorted collection down to the requested page.
    pub fn paginate<T>(&self, items: Vec<T>) -> PaginatedResponse<T> {
        let total = items.len();
        let data = items
            .into_iter()
            .skip(self.offset())
            .take(self.limit())
            .collect();
        PaginatedResponse::new(data, self, total)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Pagination metadata returned with list responses
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PaginationMeta {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMeta {
    pub fn new(page: usize, per_page: usize, total: usize) -> Self {
        let total_pages = total.div_ceil(per_page.max(1));
        Self {
            page,
            per_page,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// Standard paginated response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub meta: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, params: &PaginationParams, total: usize) -> Self {
        Self {
            data,
            meta: PaginationMeta::new(params.page.max(1), params.limit(), total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_and_limit_are_clamped() {
        assert_eq!(PaginationParams::new(0, 10).offset(), 0);
        assert_eq!(PaginationParams::new(3, 10).offset(), 20);
        assert_eq!(PaginationParams::new(1, 0).limit(), 1);
        assert_eq!(PaginationParams::new(1, 1000).limit(), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_paginate_slices_items() {
        let items: Vec<u32> = (1..=7).collect();
        let page = PaginationParams::new(2, 3).paginate(items);

        assert_eq!(page.data, vec![4, 5, 6]);
        assert_eq!(page.meta.total, 7);
        assert_eq!(page.meta.total_pages, 3);
        assert!(page.meta.has_next);
        assert!(page.meta.has_prev);
    }

    #[test]
    fn test_page_past_the_end_is_empty() {
        let page = PaginationParams::new(5, 10).paginate(vec![1, 2, 3]);
        assert!(page.data.is_empty());
        assert!(!page.meta.has_next);
    }
}
