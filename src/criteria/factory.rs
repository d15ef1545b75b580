use std::collections::HashMap;
use tracing::{debug, warn};

use super::{Criteria, LoadContext};
use crate::{
    config::CriteriaConfig,
    errors::{CriteriaError, Result, ValidationErrors},
    filtering::{FilterFactory, decode_filters_with_depth, optimize},
    models::CriteriaParams,
    pagination::Pagination,
    search::TextSearch,
    sort::Sorting,
};

///
/// CriteriaFactory
///
/// Builds [`Criteria`] from raw request strings. Every present part is
/// decoded and validated; failures from all parts are reported together as
/// `ValidationFailed`, keyed by the configured request key (filter failures
/// keep their item path under it, e.g. `filters.0.value`).
///

#[derive(Debug, Clone, Default)]
pub struct CriteriaFactory {
    filters: FilterFactory,
    config: CriteriaConfig,
}

impl CriteriaFactory {
    /// The filter factory's depth and length limits are taken from `config`.
    #[must_use]
    pub fn new(filters: FilterFactory, config: CriteriaConfig) -> Self {
        Self {
            filters: filters.with_config(&config),
            config,
        }
    }

    #[must_use]
    pub const fn filter_factory(&self) -> &FilterFactory {
        &self.filters
    }

    #[must_use]
    pub const fn config(&self) -> &CriteriaConfig {
        &self.config
    }

    /// Build criteria from raw strings. Absent or blank parts are skipped.
    pub fn create(
        &self,
        text_search: Option<&str>,
        sorting: Option<&str>,
        filters: Option<&str>,
        context: Option<LoadContext>,
    ) -> Result<Criteria> {
        let mut builder = Builder::new(self);
        builder.text_search(text_search);
        builder.sorting(sorting);
        builder.filters(filters);
        builder.finish(context)
    }

    /// Build criteria from typed query parameters, pagination included.
    /// `page`/`per_page` win over `range`; the window is clamped to
    /// `max_per_page`.
    pub fn from_params(&self, params: &CriteriaParams) -> Result<Criteria> {
        let mut builder = Builder::new(self);
        builder.text_search(params.search.as_deref());
        builder.sorting(params.sort.as_deref());
        builder.filters(params.filters.as_deref());

        if params.page.is_some() || params.per_page.is_some() {
            let key = if params.page.is_some() {
                &self.config.page_key
            } else {
                &self.config.per_page_key
            };
            builder.pagination(
                key,
                Pagination::from_page(
                    params.page.unwrap_or(1),
                    params.per_page.unwrap_or(self.config.per_page),
                ),
            );
        } else if let Some(range) = non_blank(params.range.as_deref()) {
            builder.pagination(&self.config.range_key, Pagination::from_range(range));
        }

        builder.finish(None)
    }

    /// Build criteria from a raw query map using the configured keys.
    pub fn from_query_map(&self, query: &HashMap<String, String>) -> Result<Criteria> {
        let mut errors = ValidationErrors::new();
        let mut number = |key: &str| {
            let raw = non_blank(query.get(key).map(String::as_str))?;
            raw.trim().parse::<u64>().map_or_else(
                |_| {
                    errors.add(key, format!("`{raw}` is not a positive integer."));
                    None
                },
                Some,
            )
        };
        let page = number(&self.config.page_key);
        let per_page = number(&self.config.per_page_key);

        let params = CriteriaParams {
            filters: query.get(&self.config.filters_key).cloned(),
            sort: query.get(&self.config.sort_key).cloned(),
            search: query.get(&self.config.search_key).cloned(),
            page,
            per_page,
            range: query.get(&self.config.range_key).cloned(),
        };

        match self.from_params(&params) {
            Ok(criteria) if errors.is_empty() => Ok(criteria),
            Ok(_) => Err(CriteriaError::ValidationFailed(errors)),
            Err(CriteriaError::ValidationFailed(found)) => {
                errors.extend(found);
                Err(CriteriaError::ValidationFailed(errors))
            }
            Err(error) => Err(error),
        }
    }
}

/// Accumulates one criteria and every failure found while filling it.
struct Builder<'a> {
    factory: &'a CriteriaFactory,
    criteria: Criteria,
    errors: ValidationErrors,
}

impl<'a> Builder<'a> {
    fn new(factory: &'a CriteriaFactory) -> Self {
        Self {
            factory,
            criteria: Criteria::new(),
            errors: ValidationErrors::new(),
        }
    }

    fn text_search(&mut self, raw: Option<&str>) {
        let Some(raw) = non_blank(raw) else { return };
        let key = &self.factory.config.search_key;
        match TextSearch::parse(raw) {
            Ok(search) => {
                let messages = search.validate(self.factory.filters.schema());
                if messages.is_empty() {
                    self.criteria.set_text_search(Some(search));
                }
                for message in messages {
                    self.errors.add(key, message);
                }
            }
            Err(error) => self.errors.add(key, error.to_string()),
        }
    }

    fn sorting(&mut self, raw: Option<&str>) {
        let Some(raw) = non_blank(raw) else { return };
        let key = &self.factory.config.sort_key;
        match Sorting::parse(raw) {
            Ok(sorting) => {
                let messages = sorting.validate(self.factory.filters.schema());
                if messages.is_empty() {
                    self.criteria.set_sorting(Some(sorting));
                }
                for message in messages {
                    self.errors.add(key, message);
                }
            }
            Err(error) => self.errors.add(key, error.to_string()),
        }
    }

    fn filters(&mut self, raw: Option<&str>) {
        let Some(raw) = non_blank(raw) else { return };
        let key = &self.factory.config.filters_key;
        let filters = &self.factory.filters;

        let built = decode_filters_with_depth(raw, filters.max_depth())
            .and_then(|items| filters.build_at(&items, key));
        match built {
            Ok(root) => {
                self.criteria.set_filters(root.as_ref().and_then(optimize));
            }
            Err(CriteriaError::ValidationFailed(found)) => self.errors.extend(found),
            Err(error) => self.errors.add(key, error.to_string()),
        }
    }

    fn pagination(&mut self, key: &str, pagination: Result<Pagination>) {
        match pagination {
            Ok(pagination) => {
                self.criteria
                    .set_pagination(Some(pagination.clamp(self.factory.config.max_per_page)));
            }
            Err(error) => self.errors.add(key, error.to_string()),
        }
    }

    fn finish(mut self, context: Option<LoadContext>) -> Result<Criteria> {
        if !self.errors.is_empty() {
            warn!(errors = self.errors.len(), "criteria rejected");
            return Err(CriteriaError::ValidationFailed(self.errors));
        }
        if let Some(context) = context {
            *self.criteria.context_mut() = context;
        }
        debug!(
            filters = self.criteria.filters().is_some(),
            sorting = self.criteria.sorting().is_some(),
            search = self.criteria.text_search().is_some(),
            "criteria created"
        );
        Ok(self.criteria)
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.filter(|raw| !raw.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::{AttributeKind, AttributeSchema};

    fn factory() -> CriteriaFactory {
        let schema = AttributeSchema::strict()
            .with_attribute("title", AttributeKind::Text)
            .with_attribute("views", AttributeKind::Integer);
        CriteriaFactory::new(
            FilterFactory::standard().with_schema(schema),
            CriteriaConfig {
                max_per_page: 50,
                ..CriteriaConfig::default()
            },
        )
    }

    #[test]
    fn test_create_from_raw_strings() {
        let criteria = factory()
            .create(Some("rust|title"), Some("views,desc"), Some("views|gt|3"), None)
            .unwrap();
        assert_eq!(criteria.sorting(), Some(&Sorting::desc("views")));
        assert_eq!(criteria.text_search().unwrap().term, "rust");
        assert!(criteria.filters().is_some());
    }

    #[test]
    fn test_create_skips_blank_parts() {
        let criteria = factory().create(Some(""), None, Some("  "), None).unwrap();
        assert_eq!(criteria, Criteria::new());
    }

    #[test]
    fn test_create_reports_every_failure() {
        let error = factory()
            .create(Some("rust"), Some("secret"), Some("views|gt|many"), None)
            .unwrap_err();
        let CriteriaError::ValidationFailed(errors) = error else {
            panic!("expected validation failure, got {error:?}");
        };
        let keys: Vec<&str> = errors.keys().collect();
        assert_eq!(keys, ["filters.0.value", "search", "sort"]);
    }

    #[test]
    fn test_malformed_filter_string_is_keyed() {
        let Err(CriteriaError::ValidationFailed(errors)) =
            factory().create(None, None, Some("views|gt|[1"), None)
        else {
            panic!("expected validation failure");
        };
        assert!(errors.get("filters").is_some());
    }

    #[test]
    fn test_from_params_pagination() {
        let params = CriteriaParams {
            page: Some(2),
            per_page: Some(500),
            ..CriteriaParams::default()
        };
        let criteria = factory().from_params(&params).unwrap();
        assert_eq!(criteria.pagination(), Some(&Pagination::new(500, 50)));

        let params = CriteriaParams {
            range: Some("[10,19]".to_string()),
            ..CriteriaParams::default()
        };
        let criteria = factory().from_params(&params).unwrap();
        assert_eq!(criteria.pagination(), Some(&Pagination::new(10, 10)));
    }

    #[test]
    fn test_from_query_map_uses_configured_keys() {
        let factory = CriteriaFactory::new(
            FilterFactory::standard(),
            CriteriaConfig {
                filters_key: "filter".to_string(),
                ..CriteriaConfig::default()
            },
        );
        let query: HashMap<String, String> = [
            ("filter".to_string(), "status|eq|draft".to_string()),
            ("page".to_string(), "abc".to_string()),
        ]
        .into_iter()
        .collect();

        let Err(CriteriaError::ValidationFailed(errors)) = factory.from_query_map(&query) else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.keys().collect::<Vec<_>>(), ["page"]);

        let query: HashMap<String, String> =
            [("filter".to_string(), "status|eq|draft".to_string())].into_iter().collect();
        let criteria = factory.from_query_map(&query).unwrap();
        assert_eq!(criteria.filter_set().to_raw().as_deref(), Some("status|eq|draft"));
    }
}
