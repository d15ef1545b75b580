use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: u64 = 10;
pub const DEFAULT_MAX_PER_PAGE: u64 = 1000;
pub const DEFAULT_MAX_FILTER_DEPTH: usize = 16;
pub const DEFAULT_MAX_VALUE_LENGTH: usize = 10_000;

/// Request keys and limits used when building criteria from query
/// parameters.
///
/// The library never loads configuration itself; deserialize this from
/// whatever source the application uses. Missing fields take their defaults:
///
/// ```json
/// {"filters_key": "filter", "max_per_page": 100}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaConfig {
    /// Query key carrying the text search string
    pub search_key: String,
    /// Query key carrying the sort string
    pub sort_key: String,
    /// Query key carrying the raw filter string
    pub filters_key: String,
    pub page_key: String,
    pub per_page_key: String,
    /// Query key carrying a `[start,end]` range
    pub range_key: String,
    pub per_page: u64,
    pub max_per_page: u64,
    /// Deepest nesting of groups and EXISTS trees accepted from clients
    pub max_filter_depth: usize,
    /// Longest text operand accepted, in bytes
    pub max_value_length: usize,
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            search_key: "search".to_string(),
            sort_key: "sort".to_string(),
            filters_key: "filters".to_string(),
            page_key: "page".to_string(),
            per_page_key: "per_page".to_string(),
            range_key: "range".to_string(),
            per_page: DEFAULT_PER_PAGE,
            max_per_page: DEFAULT_MAX_PER_PAGE,
            max_filter_depth: DEFAULT_MAX_FILTER_DEPTH,
            max_value_length: DEFAULT_MAX_VALUE_LENGTH,
        }
    }
}
