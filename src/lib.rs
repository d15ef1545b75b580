//! # criteriacrate
//!
//! Describe *what* to fetch (filters, text search, sorting, pagination and
//! the relations to load) as plain, serializable data, and let a query
//! driver decide *how*.
//!
//! ```rust
//! use criteriacrate::{
//!     CriteriaConfig, CriteriaFactory, CriteriaParams, FilterFactory, QueryDriver,
//!     driver::sea::{SeaQueryDriver, SeaTable},
//! };
//!
//! let factory = CriteriaFactory::new(FilterFactory::standard(), CriteriaConfig::default());
//! let params = CriteriaParams {
//!     filters: Some("status|eq|published,and|views|gte|100".to_string()),
//!     sort: Some("created_at,desc".to_string()),
//!     ..CriteriaParams::default()
//! };
//! let criteria = factory.from_params(&params)?;
//!
//! let posts = SeaTable::new("posts", "id");
//! let query = SeaQueryDriver.compile(&posts, &criteria)?;
//! assert!(query.select().to_string(sea_orm::sea_query::SqliteQueryBuilder).contains("ORDER BY"));
//! # Ok::<(), criteriacrate::CriteriaError>(())
//! ```
//!
//! ## Modules
//!
//! - [`filtering`]: the filter tree, its raw-string codec, validation and
//!   optimization
//! - [`criteria`]: the [`Criteria`] aggregate and [`CriteriaFactory`]
//! - [`driver`]: the [`QueryDriver`] seam plus in-memory and sea-query drivers
//! - [`sort`], [`search`], [`pagination`]: the remaining parts of a criteria
//! - [`errors`]: [`CriteriaError`] and its HTTP mapping

pub mod config;
pub mod criteria;
pub mod driver;
pub mod errors;
pub mod filtering;
pub mod models;
pub mod pagination;
pub mod search;
pub mod sort;

pub use config::CriteriaConfig;
pub use criteria::{Criteria, CriteriaFactory, LoadContext};
pub use driver::{DriverRegistry, QueryDriver, RelationLoad, RelationshipResolver};
pub use errors::{CriteriaError, Result, ValidationErrors};
pub use filtering::{
    AttributeKind, AttributeSchema, BooleanOperator, FilterFactory, FilterNode, FilterSet,
    OperatorKind, Scalar, Value,
};
pub use models::CriteriaParams;
pub use pagination::Pagination;
pub use search::TextSearch;
pub use sort::{SortDirection, Sorting};
