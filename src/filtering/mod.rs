//! # Filter Expressions
//!
//! A filter is a tree of typed predicates joined by AND/OR, with relation
//! existence groups (`has` / `!has`) for filtering on related records.
//!
//! ## Pipeline
//!
//! 1. **Decode**: raw strings ([`decode_filters`]) or JSON become structured
//!    [`FilterData`] items. Syntax errors fail immediately.
//! 2. **Build**: the [`FilterFactory`] resolves operator tokens, sanitizes
//!    values and validates them against the [`AttributeSchema`], collecting
//!    every violation before failing.
//! 3. **Optimize**: [`optimize`] merges and removes redundant nodes without
//!    changing what the tree matches.
//!
//! [`FilterSet`] runs the whole pipeline and is what aggregates embed.
//!
//! ## Raw format
//!
//! ```text
//! age|gt|18,or|status|in|draft,review
//! has|comments[approved|eq|true,or|score|gte|4]
//! comments|!exists|[spam|eq|true]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use criteriacrate::filtering::{FilterFactory, FilterSet};
//!
//! let factory = FilterFactory::standard();
//! let mut filters = FilterSet::new();
//! filters.set_raw("status|eq|draft,or|status|eq|review", &factory)?;
//!
//! assert_eq!(filters.to_raw().as_deref(), Some("status|in|draft,review"));
//! # Ok::<(), criteriacrate::CriteriaError>(())
//! ```

pub mod codec;
pub mod factory;
pub mod node;
pub mod operator;
pub mod optimizer;
pub mod schema;
pub mod set;
pub mod value;

pub use codec::{decode_filters, decode_filters_with_depth, encode_filters, encode_sequence};
pub use factory::{FilterFactory, ValueShape, is_valid_attribute_name};
pub use node::{FilterData, FilterNode, Group, GroupData, GroupMode, Predicate, PredicateData};
pub use operator::{BooleanOperator, OperatorKind};
pub use optimizer::{is_noop, optimize};
pub use schema::{AttributeKind, AttributeLookup, AttributeSchema};
pub use set::FilterSet;
pub use value::{Scalar, Value};
