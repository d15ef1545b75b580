use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

/// Query parameters describing a criteria request.
///
/// Every field carries the raw string form; [`CriteriaFactory::from_params`]
/// decodes and validates them together.
///
/// # Filtering
/// The `filters` parameter uses the compact filter syntax, for example:
/// ```text
/// status|in|draft,review,and|has|comments[approved|eq|true]
/// ```
///
/// # Pagination
/// Either `page` and `per_page` (1-based pages), or a React Admin `range`:
/// ```json
/// [0,9]
/// ```
///
/// # Sorting
/// `attribute[,direction]`, or the React Admin form:
/// ```json
/// ["id", "ASC"]
/// ```
///
/// [`CriteriaFactory::from_params`]: crate::criteria::CriteriaFactory::from_params
#[derive(Debug, Clone, Deserialize, IntoParams, ToSchema, Default)]
#[into_params(parameter_in = Query)]
pub struct CriteriaParams {
    /// Filter expression in the compact raw syntax.
    #[param(example = "age|gte|18,or|status|in|draft,review")]
    pub filters: Option<String>,
    /// Sort order as `attribute[,direction]`.
    #[param(example = "created_at,desc")]
    pub sort: Option<String>,
    /// Text search as `term|attribute[,attribute...]`.
    #[param(example = "rust|title,body")]
    pub search: Option<String>,
    /// 1-based page number.
    #[param(example = 1)]
    pub page: Option<u64>,
    #[param(example = 20)]
    pub per_page: Option<u64>,
    /// Range for pagination in the format "[start, end]".
    #[param(example = "[0,9]")]
    pub range: Option<String>,
}
