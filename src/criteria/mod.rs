//! # Criteria
//!
//! [`Criteria`] is the full description of a fetch: filters, sorting, text
//! search, pagination and what to load alongside the records. It is plain
//! data; drivers turn it into queries.
//!
//! ```rust
//! use criteriacrate::{Criteria, FilterFactory};
//!
//! let factory = FilterFactory::standard();
//! let mut criteria = Criteria::new();
//! criteria
//!     .set_filters_raw("status|eq|published", &factory)?
//!     .set_sorting_raw("created_at,desc", &factory)?
//!     .add_relation("author", None);
//!
//! assert_eq!(criteria.sorting().map(|s| s.to_raw()).as_deref(), Some("created_at,desc"));
//! # Ok::<(), criteriacrate::CriteriaError>(())
//! ```

mod context;
mod factory;

pub use context::LoadContext;
pub use factory::CriteriaFactory;

use tracing::warn;

use crate::{
    config::CriteriaConfig,
    errors::{CriteriaError, Result, ValidationErrors},
    filtering::{AttributeSchema, FilterFactory, FilterNode, FilterSet, Value},
    pagination::Pagination,
    search::TextSearch,
    sort::Sorting,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    filters: FilterSet,
    sorting: Option<Sorting>,
    text_search: Option<TextSearch>,
    pagination: Option<Pagination>,
    context: LoadContext,
}

impl Criteria {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    //
    // Accessors
    //

    #[must_use]
    pub const fn filters(&self) -> Option<&FilterNode> {
        self.filters.get()
    }

    #[must_use]
    pub const fn filter_set(&self) -> &FilterSet {
        &self.filters
    }

    pub const fn filter_set_mut(&mut self) -> &mut FilterSet {
        &mut self.filters
    }

    #[must_use]
    pub const fn sorting(&self) -> Option<&Sorting> {
        self.sorting.as_ref()
    }

    #[must_use]
    pub const fn text_search(&self) -> Option<&TextSearch> {
        self.text_search.as_ref()
    }

    #[must_use]
    pub const fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    #[must_use]
    pub const fn context(&self) -> &LoadContext {
        &self.context
    }

    pub const fn context_mut(&mut self) -> &mut LoadContext {
        &mut self.context
    }

    //
    // Mutators
    //

    pub fn set_filters(&mut self, filters: Option<FilterNode>) -> &mut Self {
        self.filters.set(filters);
        self
    }

    pub fn set_sorting(&mut self, sorting: Option<Sorting>) -> &mut Self {
        self.sorting = sorting;
        self
    }

    pub fn set_text_search(&mut self, text_search: Option<TextSearch>) -> &mut Self {
        self.text_search = text_search;
        self
    }

    pub fn set_pagination(&mut self, pagination: Option<Pagination>) -> &mut Self {
        self.pagination = pagination;
        self
    }

    pub fn set_attributes<I, S>(&mut self, attributes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.set_attributes(attributes);
        self
    }

    pub fn add_relation(&mut self, relation: impl Into<String>, criteria: Option<Self>) -> &mut Self {
        self.context.add_relation(relation, criteria);
        self
    }

    pub fn set_relations<I, S>(&mut self, relations: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, Option<Self>)>,
        S: Into<String>,
    {
        self.context.set_relations(relations);
        self
    }

    pub fn add_relation_count(&mut self, relation: impl Into<String>, criteria: Option<Self>) -> &mut Self {
        self.context.add_relation_count(relation, criteria);
        self
    }

    pub fn set_relation_counts<I, S>(&mut self, relations: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, Option<Self>)>,
        S: Into<String>,
    {
        self.context.set_relation_counts(relations);
        self
    }

    //
    // Raw setters
    //

    pub fn set_filters_raw(&mut self, raw: &str, factory: &FilterFactory) -> Result<&mut Self> {
        self.filters.set_raw(raw, factory)?;
        Ok(self)
    }

    pub fn set_filters_json(&mut self, json: &serde_json::Value, factory: &FilterFactory) -> Result<&mut Self> {
        self.filters.set_json(json, factory)?;
        Ok(self)
    }

    /// Parse `attribute[,direction]` and check it against the factory schema.
    pub fn set_sorting_raw(&mut self, raw: &str, factory: &FilterFactory) -> Result<&mut Self> {
        let sorting = Sorting::parse(raw).inspect_err(|error| warn!(%error, raw, "rejected sort string"))?;
        reject("sort", sorting.validate(factory.schema()))?;
        self.sorting = Some(sorting);
        Ok(self)
    }

    /// Parse `term|attr1,attr2` and check it against the factory schema.
    pub fn set_text_search_raw(&mut self, raw: &str, factory: &FilterFactory) -> Result<&mut Self> {
        let search = TextSearch::parse(raw).inspect_err(|error| warn!(%error, raw, "rejected search string"))?;
        reject("search", search.validate(factory.schema()))?;
        self.text_search = Some(search);
        Ok(self)
    }

    /// Parse `[start,end]` or `offset[,limit]`. A missing limit falls back to
    /// `config.per_page`; the window is clamped to `config.max_per_page`.
    pub fn set_pagination_raw(&mut self, raw: &str, config: &CriteriaConfig) -> Result<&mut Self> {
        let pagination = Pagination::parse(raw, config.per_page)
            .inspect_err(|error| warn!(%error, raw, "rejected pagination string"))?;
        self.pagination = Some(pagination.clamp(config.max_per_page));
        Ok(self)
    }

    //
    // Builders
    //

    pub fn where_(
        &mut self,
        attribute: &str,
        operator: &str,
        value: impl Into<Value>,
        factory: &FilterFactory,
    ) -> Result<&mut Self> {
        self.filters.where_(attribute, operator, value, factory)?;
        Ok(self)
    }

    pub fn or_where(
        &mut self,
        attribute: &str,
        operator: &str,
        value: impl Into<Value>,
        factory: &FilterFactory,
    ) -> Result<&mut Self> {
        self.filters.or_where(attribute, operator, value, factory)?;
        Ok(self)
    }

    /// Re-check everything against the factory, including criteria nested
    /// under relations, and report every violation at once.
    pub fn validate(&self, factory: &FilterFactory) -> Result<()> {
        let mut errors = ValidationErrors::new();
        self.collect_violations(factory, factory.schema(), "", &mut errors);
        errors.into_result()
    }

    fn collect_violations(
        &self,
        factory: &FilterFactory,
        schema: &AttributeSchema,
        prefix: &str,
        errors: &mut ValidationErrors,
    ) {
        let scoped;
        let factory = if std::ptr::eq(schema, factory.schema()) {
            factory
        } else {
            scoped = factory.clone().with_schema(schema.clone());
            &scoped
        };

        match factory.build_at(&self.filters.to_data(), &format!("{prefix}filters")) {
            Err(CriteriaError::ValidationFailed(found)) => errors.extend(found),
            Err(error) => errors.add(format!("{prefix}filters"), error.to_string()),
            Ok(_) => {}
        }
        if let Some(sorting) = &self.sorting {
            for message in sorting.validate(schema) {
                errors.add(format!("{prefix}sort"), message);
            }
        }
        if let Some(search) = &self.text_search {
            for message in search.validate(schema) {
                errors.add(format!("{prefix}search"), message);
            }
        }

        let scopes = [
            ("relations", self.context.relations()),
            ("relation_counts", self.context.relation_counts()),
        ];
        for (section, relations) in scopes {
            for (relation, criteria) in relations {
                let key = format!("{prefix}{section}.{relation}");
                match schema.relation(relation) {
                    None => errors.add(key, format!("Unknown relation `{relation}`.")),
                    Some(related) => {
                        if let Some(criteria) = criteria {
                            criteria.collect_violations(factory, related, &format!("{key}."), errors);
                        }
                    }
                }
            }
        }
    }
}

fn reject(key: &str, messages: Vec<String>) -> Result<()> {
    let mut errors = ValidationErrors::new();
    for message in messages {
        errors.add(key, message);
    }
    errors.into_result()
}
