use axum::http::{HeaderValue, header::HeaderMap};
use serde::{Deserialize, Serialize};

use crate::errors::{CriteriaError, Result};

/// Window of the result set: skip `offset` records, return at most `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Standard REST pagination; pages are 1-based and page 0 reads as 1.
    pub fn from_page(page: u64, per_page: u64) -> Result<Self> {
        if per_page == 0 {
            return Err(CriteriaError::MalformedPagination {
                reason: "per_page must be at least 1".to_string(),
            });
        }
        let offset = page
            .saturating_sub(1)
            .checked_mul(per_page)
            .ok_or_else(|| CriteriaError::MalformedPagination {
                reason: format!("page {page} is out of range"),
            })?;
        Ok(Self::new(offset, per_page))
    }

    /// React Admin pagination, an inclusive `[start,end]` JSON pair.
    pub fn from_range(raw: &str) -> Result<Self> {
        let [start, end] = serde_json::from_str::<[u64; 2]>(raw.trim()).map_err(|e| {
            CriteriaError::MalformedPagination {
                reason: format!("expected `[start,end]`: {e}"),
            }
        })?;
        if end < start {
            return Err(CriteriaError::MalformedPagination {
                reason: format!("range end {end} is before start {start}"),
            });
        }
        let limit = (end - start)
            .checked_add(1)
            .ok_or_else(|| CriteriaError::MalformedPagination {
                reason: format!("range [{start},{end}] is too wide"),
            })?;
        Ok(Self::new(start, limit))
    }

    /// Parse the raw pagination string: a `[start,end]` range or
    /// `offset[,limit]` with `default_limit` filling the gap.
    pub fn parse(raw: &str, default_limit: u64) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with('[') {
            return Self::from_range(raw);
        }
        let number = |token: &str| {
            token
                .trim()
                .parse::<u64>()
                .map_err(|_| CriteriaError::MalformedPagination {
                    reason: format!("`{}` is not a non-negative integer", token.trim()),
                })
        };
        let (offset, limit) = match raw.split_once(',') {
            Some((offset, limit)) => (number(offset)?, number(limit)?),
            None => (number(raw)?, default_limit),
        };
        if limit == 0 {
            return Err(CriteriaError::MalformedPagination {
                reason: "limit must be at least 1".to_string(),
            });
        }
        Ok(Self::new(offset, limit))
    }

    #[must_use]
    pub fn to_raw(&self) -> String {
        format!("[{},{}]", self.offset, self.last())
    }

    /// Cap the window size at `max`.
    #[must_use]
    pub fn clamp(self, max: u64) -> Self {
        Self::new(self.offset, self.limit.min(max.max(1)))
    }

    /// 1-based page number of this window.
    #[must_use]
    pub const fn page(&self) -> u64 {
        if self.limit == 0 {
            1
        } else {
            self.offset / self.limit + 1
        }
    }

    /// Index of the last record in the window.
    #[must_use]
    pub const fn last(&self) -> u64 {
        self.offset.saturating_add(self.limit).saturating_sub(1)
    }

    /// `Content-Range` header for this window, e.g. `posts 0-9/100`.
    /// Control characters are stripped from the resource name.
    #[must_use]
    pub fn content_range(&self, total_count: u64, resource_name: &str) -> HeaderMap {
        let last = self.last().min(total_count.saturating_sub(1));
        let offset = self.offset;
        let safe_name = sanitize_resource_name(resource_name);

        let mut headers = HeaderMap::new();
        let value = format!("{safe_name} {offset}-{last}/{total_count}")
            .parse::<HeaderValue>()
            .or_else(|_| format!("items {offset}-{last}/{total_count}").parse::<HeaderValue>());
        if let Ok(value) = value {
            headers.insert("Content-Range", value);
        }
        headers
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(0, crate::config::DEFAULT_PER_PAGE)
    }
}

fn sanitize_resource_name(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii() && !c.is_ascii_control()).collect()
}
