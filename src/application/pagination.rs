//! Page-number pagination for list views.

use thiserror::Error;

use crate::source::ListQuery;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("page must be at least 1")]
    InvalidPage,
    #[error("limit must be between 1 and {MAX_PAGE_SIZE}")]
    InvalidLimit,
}

/// A validated page of a (possibly tag-filtered) list view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
    tag: Option<String>,
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>, tag: Option<String>) -> Result<Self, PaginationError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(PaginationError::InvalidPage);
        }
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(PaginationError::InvalidLimit);
        }
        let tag = tag.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        Ok(Self { page, limit, tag })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Offset-based query for the source; saturates rather than overflowing.
    pub fn to_query(&self) -> ListQuery {
        ListQuery {
            offset: (self.page - 1).saturating_mul(self.limit),
            limit: self.limit,
            tag: self.tag.clone(),
        }
    }
}
