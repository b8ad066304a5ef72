//! Page/limit pagination for the admin order listing.

use serde::{Deserialize, Serialize};

use bazaar_core::{DomainError, DomainResult};

pub const DEFAULT_PAGE_LIMIT: u64 = 10;
pub const MAX_PAGE_LIMIT: u64 = 100;
/// Largest row offset a store can be asked to skip (Postgres `OFFSET` is a bigint).
pub const MAX_OFFSET: u64 = i64::MAX as u64;

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u64,
    limit: u64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    /// `page` defaults to 1 and `limit` to 10 (capped at 100). Zero is rejected,
    /// as is a page whose offset would exceed [`MAX_OFFSET`].
    pub fn new(page: Option<u64>, limit: Option<u64>) -> DomainResult<Self> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if page == 0 {
            return Err(DomainError::validation("page must be at least 1"));
        }
        if limit == 0 {
            return Err(DomainError::validation("limit must be at least 1"));
        }
        let limit = limit.min(MAX_PAGE_LIMIT);
        match (page - 1).checked_mul(limit) {
            Some(offset) if offset <= MAX_OFFSET => Ok(Self { page, limit }),
            _ => Err(DomainError::validation("page is out of range")),
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.limit
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.limit)
    }
}

/// One page of results plus the counters the admin listing reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: u64,
    pub total_pages: u64,
    pub total: u64,
}
