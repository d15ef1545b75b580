//! # Query Drivers
//!
//! A [`QueryDriver`] turns a [`Criteria`] into something its storage engine
//! can run. The criteria itself never knows which engine it targets; the
//! [`DriverRegistry`] picks the driver from the type of the query context.
//!
//! Two drivers ship with the crate:
//!
//! - [`memory::MemoryDriver`] evaluates criteria over JSON records with
//!   embedded relations.
//! - [`sea::SeaQueryDriver`] compiles criteria into sea-query select
//!   statements without executing them.

pub mod memory;
pub mod sea;

use std::{
    any::{Any, TypeId, type_name},
    collections::{BTreeMap, HashMap},
    fmt,
};
use tracing::{debug, warn};

use crate::{
    criteria::{Criteria, LoadContext},
    errors::{CriteriaError, Result},
};

/// Compiles criteria against one kind of query context.
pub trait QueryDriver: Send + Sync {
    /// What the driver compiles against, e.g. a table description.
    type Context: 'static;
    /// The compiled, executable form.
    type Query: 'static;

    fn name(&self) -> &'static str;

    /// Unsupported operators fail with `UnsupportedOperator`, references to
    /// relations the context does not know fail with `UnknownRelation`.
    fn compile(&self, context: &Self::Context, criteria: &Criteria) -> Result<Self::Query>;
}

/// Loads relations, or their counts, onto records that were already fetched.
pub trait RelationshipResolver {
    type Records: ?Sized;

    fn resolve_on_records(
        &self,
        records: &mut Self::Records,
        relation: &str,
        criteria: Option<&Criteria>,
    ) -> Result<()>;

    fn resolve_count_on_records(
        &self,
        records: &mut Self::Records,
        relation: &str,
        criteria: Option<&Criteria>,
    ) -> Result<()>;
}

/// One relation to load with the parent records.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationLoad {
    /// Related records, filtered and shaped by `criteria`.
    Records { relation: String, criteria: Criteria },
    /// Number of related records matching `criteria`.
    Count {
        relation: String,
        criteria: Option<Criteria>,
    },
}

impl RelationLoad {
    #[must_use]
    pub fn relation(&self) -> &str {
        match self {
            Self::Records { relation, .. } | Self::Count { relation, .. } => relation,
        }
    }
}

/// Flatten a load context into loads of direct relations.
///
/// Dotted paths are pushed into the criteria of their first segment, so
/// `comments.author` loads `comments` and, inside them, `author`. Dotted
/// counts load their parent relation the same way. Counts come first.
#[must_use]
pub fn plan_loads(context: &LoadContext) -> Vec<RelationLoad> {
    let mut records: BTreeMap<String, Criteria> = BTreeMap::new();
    let mut counts = Vec::new();

    for (path, criteria) in context.relations() {
        match path.split_once('.') {
            None => {
                let entry = records.entry(path.clone()).or_default();
                let nested = std::mem::take(entry.context_mut());
                *entry = criteria.clone().unwrap_or_default();
                merge_context(entry.context_mut(), nested);
            }
            Some((first, rest)) => {
                records
                    .entry(first.to_string())
                    .or_default()
                    .context_mut()
                    .add_relation(rest, criteria.clone());
            }
        }
    }

    for (path, criteria) in context.relation_counts() {
        match path.split_once('.') {
            None => counts.push(RelationLoad::Count {
                relation: path.clone(),
                criteria: criteria.clone(),
            }),
            Some((first, rest)) => {
                records
                    .entry(first.to_string())
                    .or_default()
                    .context_mut()
                    .add_relation_count(rest, criteria.clone());
            }
        }
    }

    counts.extend(
        records
            .into_iter()
            .map(|(relation, criteria)| RelationLoad::Records { relation, criteria }),
    );
    counts
}

/// Loads collected from deeper paths join the explicit criteria's own.
fn merge_context(target: &mut LoadContext, nested: LoadContext) {
    for (relation, criteria) in nested.relations() {
        if !target.relations().contains_key(relation) {
            target.add_relation(relation.clone(), criteria.clone());
        }
    }
    for (relation, criteria) in nested.relation_counts() {
        if !target.relation_counts().contains_key(relation) {
            target.add_relation_count(relation.clone(), criteria.clone());
        }
    }
}

///
/// DriverRegistry
///
/// Drivers keyed by the type of their query context. Built at startup and
/// passed to whatever compiles criteria.
///

#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<TypeId, (&'static str, Box<dyn Any + Send + Sync>)>,
}

type BoxedDriver<C, Q> = Box<dyn QueryDriver<Context = C, Query = Q>>;

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_driver<D: QueryDriver + 'static>(mut self, driver: D) -> Self {
        self.register(driver);
        self
    }

    /// Register `driver` for its context type, replacing any earlier one.
    pub fn register<D: QueryDriver + 'static>(&mut self, driver: D) -> &mut Self {
        let name = driver.name();
        let boxed: BoxedDriver<D::Context, D::Query> = Box::new(driver);
        self.drivers
            .insert(TypeId::of::<D::Context>(), (name, Box::new(boxed)));
        self
    }

    #[must_use]
    pub fn supports<C: 'static>(&self) -> bool {
        self.drivers.contains_key(&TypeId::of::<C>())
    }

    /// Compile `criteria` with the driver registered for `C`.
    pub fn compile<C: 'static, Q: 'static>(&self, context: &C, criteria: &Criteria) -> Result<Q> {
        let driver = self
            .drivers
            .get(&TypeId::of::<C>())
            .and_then(|(_, driver)| driver.downcast_ref::<BoxedDriver<C, Q>>());

        let Some(driver) = driver else {
            warn!(context = type_name::<C>(), "no query driver registered");
            return Err(CriteriaError::NoDriverFound {
                context: type_name::<C>(),
            });
        };

        debug!(driver = driver.name(), context = type_name::<C>(), "compiling criteria");
        driver.compile(context, criteria)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.drivers.values().map(|(name, _)| name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::Sorting;

    struct Upper;

    impl QueryDriver for Upper {
        type Context = String;
        type Query = String;

        fn name(&self) -> &'static str {
            "upper"
        }

        fn compile(&self, context: &String, criteria: &Criteria) -> Result<String> {
            let sort = criteria.sorting().map(Sorting::to_raw).unwrap_or_default();
            Ok(format!("{} {sort}", context.to_uppercase()))
        }
    }

    #[test]
    fn test_registry_dispatches_on_context_type() {
        let registry = DriverRegistry::new().with_driver(Upper);
        let mut criteria = Criteria::new();
        criteria.set_sorting(Some(Sorting::asc("id")));

        assert!(registry.supports::<String>());
        let query: String = registry.compile(&"posts".to_string(), &criteria).unwrap();
        assert_eq!(query, "POSTS id,asc");
    }

    #[test]
    fn test_registry_without_driver() {
        let registry = DriverRegistry::new();
        let result: Result<String> = registry.compile(&42_u32, &Criteria::new());
        assert!(matches!(result, Err(CriteriaError::NoDriverFound { .. })));
    }

    #[test]
    fn test_plan_loads_pushes_dotted_paths_down() {
        let mut scoped = Criteria::new();
        scoped.set_sorting(Some(Sorting::desc("created_at")));

        let mut context = LoadContext::new();
        context
            .add_relation("comments.author", None)
            .add_relation("comments", Some(scoped))
            .add_relation_count("comments.likes", None)
            .add_relation_count("tags", None);

        let loads = plan_loads(&context);
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0], RelationLoad::Count { relation: "tags".into(), criteria: None });

        let RelationLoad::Records { relation, criteria } = &loads[1] else {
            panic!("expected a records load");
        };
        assert_eq!(relation, "comments");
        assert_eq!(criteria.sorting(), Some(&Sorting::desc("created_at")));
        assert!(criteria.context().relations().contains_key("author"));
        assert!(criteria.context().relation_counts().contains_key("likes"));
    }
}
